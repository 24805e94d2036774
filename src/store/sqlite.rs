use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use log::{debug, info};
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

use crate::error::StoreError;
use crate::logic::dates::{format_canonical, parse_canonical};
use crate::model::{
    is_placeholder, placeholder, CanonicalRecord, ChangeSet, HistoryEntry, Id, InstrumentField,
    PersistedInstrument,
};
use crate::store::traits::InstrumentStore;

type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS instruments (
        id TEXT PRIMARY KEY,
        "group_code" TEXT NOT NULL DEFAULT '-',
        "test_code" TEXT NOT NULL DEFAULT '-',
        "name" TEXT NOT NULL,
        "type" TEXT NOT NULL,
        "brand" TEXT NOT NULL DEFAULT '-',
        "model" TEXT NOT NULL DEFAULT '-',
        "serial_number" TEXT NOT NULL DEFAULT '-',
        "location" TEXT NOT NULL DEFAULT '-',
        "measurement_range" TEXT NOT NULL DEFAULT '-',
        "unit" TEXT NOT NULL DEFAULT '-',
        "class" TEXT NOT NULL DEFAULT '-',
        "status" TEXT NOT NULL DEFAULT '-',
        "certificate_id" TEXT NOT NULL DEFAULT '-',
        "certificate_expiry" DATE,
        "description" TEXT NOT NULL DEFAULT '-',
        "acceptance_criterion" TEXT NOT NULL DEFAULT '-',
        "operating_interval" TEXT NOT NULL DEFAULT '-',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"CREATE INDEX IF NOT EXISTS idx_instruments_serial ON instruments ("serial_number")"#,
    r#"CREATE INDEX IF NOT EXISTS idx_instruments_group_test ON instruments ("group_code", "test_code")"#,
    // No foreign key: history outlives the instrument it describes.
    r#"
    CREATE TABLE IF NOT EXISTS instrument_history (
        id TEXT PRIMARY KEY,
        instrument_id TEXT NOT NULL,
        field TEXT NOT NULL,
        previous_value TEXT NOT NULL,
        new_value TEXT NOT NULL,
        changed_at TEXT NOT NULL
    )
    "#,
    r#"CREATE INDEX IF NOT EXISTS idx_history_instrument ON instrument_history (instrument_id)"#,
];

#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the SQLite database at `database_url`
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("Invalid SQLite URL: {}", database_url))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .context("Failed to create SQLite connection pool")?;

        Ok(Self { pool })
    }

    /// Private in-memory database. A single connection that never expires,
    /// since every SQLite memory connection is its own database.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .context("Failed to open in-memory SQLite database")?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Create tables and indexes. Safe to run on every start.
    pub async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context("Failed to run schema migration")?;
        }
        info!("Instrument schema ready");
        Ok(())
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn quoted_columns() -> Vec<String> {
    InstrumentField::ALL
        .iter()
        .map(|field| format!("\"{}\"", field.as_str()))
        .collect()
}

fn select_sql() -> String {
    format!(
        "SELECT id, {}, created_at, updated_at FROM instruments",
        quoted_columns().join(", ")
    )
}

fn insert_sql() -> String {
    let columns = quoted_columns();
    let placeholders = vec!["?"; columns.len() + 3].join(", ");
    format!(
        "INSERT INTO instruments (id, {}, created_at, updated_at) VALUES ({})",
        columns.join(", "),
        placeholders
    )
}

fn update_sql() -> String {
    let assignments: Vec<String> = quoted_columns()
        .into_iter()
        .map(|column| format!("{} = ?", column))
        .collect();
    format!(
        "UPDATE instruments SET {}, updated_at = ? WHERE id = ?",
        assignments.join(", ")
    )
}

/// Expiry is the one typed column: NULL stands for the placeholder.
fn expiry_value(record: &CanonicalRecord) -> Result<Option<NaiveDate>, StoreError> {
    let raw = &record.certificate_expiry;
    if is_placeholder(raw) {
        return Ok(None);
    }
    parse_canonical(raw).map(Some).ok_or_else(|| {
        StoreError::Mutation(format!(
            "Certificate expiry '{}' of instrument {} is not YYYY-MM-DD",
            raw, record.name
        ))
    })
}

fn bind_fields<'q>(
    mut query: SqliteQuery<'q>,
    record: &'q CanonicalRecord,
) -> Result<SqliteQuery<'q>, StoreError> {
    for field in InstrumentField::ALL {
        query = match field {
            InstrumentField::CertificateExpiry => query.bind(expiry_value(record)?),
            _ => query.bind(record.get(field)),
        };
    }
    Ok(query)
}

fn row_to_instrument(row: &SqliteRow) -> Result<PersistedInstrument, StoreError> {
    let mut record = CanonicalRecord::default();
    for field in InstrumentField::ALL {
        match field {
            InstrumentField::CertificateExpiry => {
                let expiry: Option<NaiveDate> = row.try_get(field.as_str())?;
                record.certificate_expiry = expiry.map(format_canonical).unwrap_or_else(placeholder);
            }
            _ => {
                let value: String = row.try_get(field.as_str())?;
                record.set(field, &value);
            }
        }
    }

    Ok(PersistedInstrument {
        id: row.try_get("id")?,
        record,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

fn row_to_history(row: &SqliteRow) -> Result<HistoryEntry, StoreError> {
    let field: String = row.try_get("field")?;
    Ok(HistoryEntry {
        id: row.try_get("id")?,
        instrument_id: row.try_get("instrument_id")?,
        field: field.parse().map_err(StoreError::Corrupt)?,
        previous_value: row.try_get("previous_value")?,
        new_value: row.try_get("new_value")?,
        changed_at: row.try_get::<DateTime<Utc>, _>("changed_at")?,
    })
}

#[async_trait::async_trait]
impl InstrumentStore for SqliteStore {
    async fn snapshot(&self) -> Result<Vec<PersistedInstrument>, StoreError> {
        let sql = format!("{} ORDER BY created_at, id", select_sql());
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_instrument).collect()
    }

    async fn apply(&self, changes: &ChangeSet) -> Result<(), StoreError> {
        let insert = insert_sql();
        let update = update_sql();

        // Dropping the transaction without commit rolls everything back.
        let mut tx = self.pool.begin().await?;

        for instrument in &changes.inserts {
            let query = sqlx::query(&insert).bind(&instrument.id);
            bind_fields(query, &instrument.record)?
                .bind(instrument.created_at)
                .bind(instrument.updated_at)
                .execute(&mut *tx)
                .await
                .map_err(|e| StoreError::Mutation(format!("Insert of {} failed: {}", instrument.id, e)))?;
        }

        for instrument in &changes.updates {
            let result = bind_fields(sqlx::query(&update), &instrument.record)?
                .bind(instrument.updated_at)
                .bind(&instrument.id)
                .execute(&mut *tx)
                .await?;
            if result.rows_affected() != 1 {
                return Err(StoreError::Mutation(format!(
                    "Instrument {} not found for update",
                    instrument.id
                )));
            }
        }

        for id in &changes.deletes {
            let result = sqlx::query("DELETE FROM instruments WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            if result.rows_affected() != 1 {
                return Err(StoreError::Mutation(format!(
                    "Instrument {} not found for delete",
                    id
                )));
            }
        }

        for entry in &changes.history {
            sqlx::query(
                r#"
                INSERT INTO instrument_history (id, instrument_id, field, previous_value, new_value, changed_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&entry.id)
            .bind(&entry.instrument_id)
            .bind(entry.field.as_str())
            .bind(&entry.previous_value)
            .bind(&entry.new_value)
            .bind(entry.changed_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(
            "Applied {} inserts, {} updates, {} deletes, {} history entries",
            changes.inserts.len(),
            changes.updates.len(),
            changes.deletes.len(),
            changes.history.len()
        );
        Ok(())
    }

    async fn get_instrument(&self, id: &Id) -> Result<Option<PersistedInstrument>, StoreError> {
        let sql = format!("{} WHERE id = ?", select_sql());
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;

        let Some(row) = row else {
            return Ok(None);
        };
        row_to_instrument(&row).map(Some)
    }

    async fn list_history(&self, instrument_id: &Id) -> Result<Vec<HistoryEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, instrument_id, field, previous_value, new_value, changed_at
            FROM instrument_history
            WHERE instrument_id = ?
            ORDER BY changed_at DESC, rowid DESC
            "#,
        )
        .bind(instrument_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_history).collect()
    }
}

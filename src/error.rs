use thiserror::Error;

use crate::model::InstrumentField;

/// Failures raised by a persisted store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store could not be reached (pool exhausted, file missing, I/O).
    /// Transient: the caller may retry, the store never does.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A mutation was rejected while applying a batch. The batch was rolled back.
    #[error("Store mutation failed: {0}")]
    Mutation(String),

    /// A stored row could not be decoded into the instrument model.
    #[error("Corrupt stored data: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Tls(_)
            | sqlx::Error::WorkerCrashed => StoreError::Unavailable(err.to_string()),
            sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::ColumnNotFound(_)
            | sqlx::Error::Decode(_) => StoreError::Corrupt(err.to_string()),
            other => StoreError::Mutation(other.to_string()),
        }
    }
}

/// Failures of a reconciliation run. None of them leave a partial effect.
#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("Invalid record {index} ({identity}): {reason}")]
    Validation {
        index: usize,
        identity: String,
        reason: String,
    },

    #[error(
        "Refusing to remove {removed} of {total} instruments (limit {:.0}%)",
        .limit * 100.0
    )]
    RemovalGuard {
        removed: usize,
        total: usize,
        limit: f64,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ReconcileError {
    pub(crate) fn missing_fields(index: usize, identity: &str, fields: &[InstrumentField]) -> Self {
        let names: Vec<&str> = fields.iter().map(|f| f.as_str()).collect();
        ReconcileError::Validation {
            index,
            identity: identity.to_string(),
            reason: format!("missing mandatory fields: {}", names.join(", ")),
        }
    }
}

/// Failures while writing or reading spreadsheets.
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    #[error("No instruments for group '{group}' and test '{test}'")]
    EmptySelection { group: String, test: String },
}

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    Json as RequestJson,
};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{ExportError, ReconcileError, StoreError};
use crate::logic::{
    export_catalog, export_test, normalize_batch, CatalogSummary, ExportOptions, MissingFields,
    RawFieldMap, Reconciler,
};
use crate::model::{CanonicalRecord, HistoryEntry, Id, MergeStats, PersistedInstrument};
use crate::store::InstrumentStore;

/// Shared handler state: the serialized reconciler plus where sheets go.
pub struct CatalogState<S: InstrumentStore> {
    pub reconciler: Reconciler<S>,
    pub export_dir: PathBuf,
    pub expiry_warning_days: i64,
}

impl<S: InstrumentStore> CatalogState<S> {
    pub fn new(reconciler: Reconciler<S>, export_dir: PathBuf, expiry_warning_days: i64) -> Self {
        Self {
            reconciler,
            export_dir,
            expiry_warning_days,
        }
    }

    fn store(&self) -> &S {
        self.reconciler.store().as_ref()
    }
}

pub type AppState<S> = Arc<CatalogState<S>>;

pub type ApiError = (StatusCode, Json<ErrorResponse>);
pub type ApiResult<T> = Result<Json<T>, ApiError>;

/// Simple health check endpoint
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

#[derive(Debug, Serialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
    pub total: usize,
}

impl<T> ListResponse<T> {
    fn new(items: Vec<T>) -> Self {
        let total = items.len();
        Self { items, total }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: &str) -> Self {
        Self {
            error: message.to_string(),
        }
    }
}

fn api_error(status: StatusCode, message: &str) -> ApiError {
    (status, Json(ErrorResponse::new(message)))
}

fn store_error(err: StoreError) -> ApiError {
    let status = if err.is_transient() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    api_error(status, &err.to_string())
}

fn reconcile_error(err: ReconcileError) -> ApiError {
    match err {
        ReconcileError::Validation { .. } => {
            api_error(StatusCode::UNPROCESSABLE_ENTITY, &err.to_string())
        }
        ReconcileError::RemovalGuard { .. } => api_error(StatusCode::CONFLICT, &err.to_string()),
        ReconcileError::Store(store) => store_error(store),
    }
}

fn export_error(err: ExportError) -> ApiError {
    match err {
        ExportError::Io(_) => api_error(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string()),
        ExportError::MissingColumns(_) => {
            api_error(StatusCode::UNPROCESSABLE_ENTITY, &err.to_string())
        }
        ExportError::EmptySelection { .. } => api_error(StatusCode::NOT_FOUND, &err.to_string()),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputFormat {
    /// Scraper output: raw field maps that still need normalizing.
    Raw,
    #[default]
    Canonical,
}

#[derive(Debug, Deserialize)]
pub struct ReconcileRequest {
    #[serde(default)]
    pub format: InputFormat,
    pub records: Vec<Value>,
    /// Compute the statistics without touching the store.
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Serialize)]
pub struct ReconcileResponse {
    pub stats: MergeStats,
    pub skipped: Vec<MissingFields>,
    pub dry_run: bool,
}

fn decode_records(
    request: ReconcileRequest,
) -> Result<(Vec<CanonicalRecord>, Vec<MissingFields>), ApiError> {
    match request.format {
        InputFormat::Canonical => {
            let records = request
                .records
                .into_iter()
                .enumerate()
                .map(|(index, value)| {
                    serde_json::from_value::<CanonicalRecord>(value).map_err(|e| {
                        api_error(
                            StatusCode::UNPROCESSABLE_ENTITY,
                            &format!("Invalid record {}: {}", index, e),
                        )
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok((records, Vec::new()))
        }
        InputFormat::Raw => {
            let raws = request
                .records
                .into_iter()
                .enumerate()
                .map(|(index, value)| match value {
                    Value::Object(map) => Ok(map),
                    _ => Err(api_error(
                        StatusCode::UNPROCESSABLE_ENTITY,
                        &format!("Invalid record {}: expected an object", index),
                    )),
                })
                .collect::<Result<Vec<RawFieldMap>, _>>()?;
            let batch = normalize_batch(&raws);
            Ok((batch.records, batch.skipped))
        }
    }
}

pub async fn reconcile_instruments<S: InstrumentStore>(
    State(state): State<AppState<S>>,
    RequestJson(request): RequestJson<ReconcileRequest>,
) -> ApiResult<ReconcileResponse> {
    let dry_run = request.dry_run;
    let (records, skipped) = decode_records(request)?;

    let stats = if dry_run {
        state
            .reconciler
            .preview(&records)
            .await
            .map_err(reconcile_error)?
            .stats
    } else {
        state.reconciler.run(&records).await.map_err(|e| {
            error!("Reconciliation failed: {}", e);
            reconcile_error(e)
        })?
    };

    Ok(Json(ReconcileResponse {
        stats,
        skipped,
        dry_run,
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct InstrumentQuery {
    pub group: Option<String>,
    pub test: Option<String>,
    pub status: Option<String>,
    #[serde(rename = "type")]
    pub instrument_type: Option<String>,
}

impl InstrumentQuery {
    fn matches(&self, instrument: &PersistedInstrument) -> bool {
        let record = &instrument.record;
        let wanted = |filter: &Option<String>, value: &str| {
            filter.as_deref().map_or(true, |f| f == value)
        };
        wanted(&self.group, &record.group_code)
            && wanted(&self.test, &record.test_code)
            && wanted(&self.status, &record.status)
            && wanted(&self.instrument_type, &record.instrument_type)
    }
}

pub async fn list_instruments<S: InstrumentStore>(
    State(state): State<AppState<S>>,
    Query(query): Query<InstrumentQuery>,
) -> ApiResult<ListResponse<PersistedInstrument>> {
    let instruments = state.store().snapshot().await.map_err(store_error)?;
    let items: Vec<PersistedInstrument> = instruments
        .into_iter()
        .filter(|instrument| query.matches(instrument))
        .collect();
    Ok(Json(ListResponse::new(items)))
}

pub async fn get_instrument<S: InstrumentStore>(
    State(state): State<AppState<S>>,
    Path(id): Path<Id>,
) -> ApiResult<PersistedInstrument> {
    match state.store().get_instrument(&id).await {
        Ok(Some(instrument)) => Ok(Json(instrument)),
        Ok(None) => Err(api_error(StatusCode::NOT_FOUND, "Instrument not found")),
        Err(e) => Err(store_error(e)),
    }
}

/// History is kept after deletion, so an unknown id yields an empty list.
pub async fn get_instrument_history<S: InstrumentStore>(
    State(state): State<AppState<S>>,
    Path(id): Path<Id>,
) -> ApiResult<ListResponse<HistoryEntry>> {
    let entries = state.store().list_history(&id).await.map_err(store_error)?;
    Ok(Json(ListResponse::new(entries)))
}

pub async fn get_summary<S: InstrumentStore>(
    State(state): State<AppState<S>>,
) -> ApiResult<CatalogSummary> {
    let instruments = state.store().snapshot().await.map_err(store_error)?;
    Ok(Json(CatalogSummary::from_instruments(&instruments)))
}

#[derive(Debug, Serialize)]
pub struct ExportResponse {
    /// Sheet URLs, relative to the server root.
    pub files: Vec<String>,
}

/// Restricts an export to one test's sheet when both are given.
#[derive(Debug, Default, Deserialize)]
pub struct ExportQuery {
    pub group: Option<String>,
    pub test: Option<String>,
}

pub async fn export_sheets<S: InstrumentStore>(
    State(state): State<AppState<S>>,
    Query(query): Query<ExportQuery>,
) -> ApiResult<ExportResponse> {
    let instruments = state.store().snapshot().await.map_err(store_error)?;
    let dir = state.export_dir.clone();
    let options = ExportOptions {
        today: chrono::Local::now().date_naive(),
        warning_days: state.expiry_warning_days,
    };

    let written = tokio::task::spawn_blocking(move || match (query.group, query.test) {
        (Some(group), Some(test)) => {
            export_test(&dir, &instruments, &group, &test, &options).map(|path| vec![path])
        }
        _ => export_catalog(&dir, &instruments, &options),
    })
    .await
    .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()))?
    .map_err(|e| {
        warn!("Export failed: {}", e);
        export_error(e)
    })?;

    let files = written
        .iter()
        .filter_map(|path| path.file_name())
        .map(|name| format!("/exports/{}", encode_path_segment(&name.to_string_lossy())))
        .collect::<Vec<_>>();
    info!("Exported {} sheets", files.len());

    Ok(Json(ExportResponse { files }))
}

/// Percent-encodes everything outside the RFC 3986 unreserved set.
fn encode_path_segment(segment: &str) -> String {
    let mut encoded = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                encoded.push(byte as char)
            }
            _ => encoded.push_str(&format!("%{:02X}", byte)),
        }
    }
    encoded
}

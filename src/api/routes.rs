use axum::{
    routing::{get, post},
    Router,
};
use std::path::Path;
use tower_http::services::ServeDir;

use crate::api::handlers::{self, AppState};
use crate::store::InstrumentStore;

pub fn create_router<S: InstrumentStore + 'static>(export_dir: &Path) -> Router<AppState<S>> {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Synchronization
        .route("/reconcile", post(handlers::reconcile_instruments::<S>))
        // Catalog
        .route("/instruments", get(handlers::list_instruments::<S>))
        .route("/instruments/:id", get(handlers::get_instrument::<S>))
        .route(
            "/instruments/:id/history",
            get(handlers::get_instrument_history::<S>),
        )
        .route("/summary", get(handlers::get_summary::<S>))
        // Spreadsheets
        .route("/export", post(handlers::export_sheets::<S>))
        .nest_service("/exports", ServeDir::new(export_dir))
}

pub mod api;
pub mod config;
pub mod error;
pub mod logic;
pub mod model;
pub mod store;

// Export API types
pub use api::handlers;
pub use api::routes;

pub use error::{ExportError, ReconcileError, StoreError};

pub use logic::{
    normalize, normalize_batch, reconcile, reconcile_with, CatalogSummary, ReconcileOptions,
    Reconciler,
};

// Export all model types
pub use model::*;

// Export store types
pub use store::{InstrumentStore, MemoryStore, SqliteStore};


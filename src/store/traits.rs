use crate::error::StoreError;
use crate::model::{ChangeSet, HistoryEntry, Id, PersistedInstrument};

/// Transactional instrument collection with an append-only history table.
#[async_trait::async_trait]
pub trait InstrumentStore: Send + Sync {
    /// Consistent read of every instrument at one point in time.
    async fn snapshot(&self) -> Result<Vec<PersistedInstrument>, StoreError>;

    /// Applies inserts, updates, deletes and the history append atomically.
    /// On error nothing from the change set is visible.
    async fn apply(&self, changes: &ChangeSet) -> Result<(), StoreError>;

    /// Get a single instrument by surrogate id
    async fn get_instrument(&self, id: &Id) -> Result<Option<PersistedInstrument>, StoreError>;

    /// History for an instrument, newest first. Survives the instrument's deletion.
    async fn list_history(&self, instrument_id: &Id) -> Result<Vec<HistoryEntry>, StoreError>;
}

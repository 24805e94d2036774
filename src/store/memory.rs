use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::StoreError;
use crate::model::{ChangeSet, HistoryEntry, Id, PersistedInstrument};
use crate::store::traits::InstrumentStore;

#[derive(Debug, Clone, Default)]
struct Tables {
    instruments: BTreeMap<Id, PersistedInstrument>,
    history: Vec<HistoryEntry>,
}

/// In-process store. Used for dry runs and tests.
///
/// `apply` stages the whole change set on a copy of the tables and swaps it in
/// only when every mutation succeeded.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    fail_next_apply: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_instruments(instruments: Vec<PersistedInstrument>) -> Self {
        let store = Self::new();
        {
            let mut tables = store.tables.write();
            for instrument in instruments {
                tables.instruments.insert(instrument.id.clone(), instrument);
            }
        }
        store
    }

    /// Makes the next `apply` fail after staging part of the batch.
    pub fn fail_next_apply(&self) {
        self.fail_next_apply.store(true, Ordering::SeqCst);
    }

    pub fn history_len(&self) -> usize {
        self.tables.read().history.len()
    }

    pub fn all_history(&self) -> Vec<HistoryEntry> {
        self.tables.read().history.clone()
    }
}

#[async_trait::async_trait]
impl InstrumentStore for MemoryStore {
    async fn snapshot(&self) -> Result<Vec<PersistedInstrument>, StoreError> {
        Ok(self.tables.read().instruments.values().cloned().collect())
    }

    async fn apply(&self, changes: &ChangeSet) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        let mut staged = tables.clone();

        for instrument in &changes.inserts {
            if staged.instruments.contains_key(&instrument.id) {
                return Err(StoreError::Mutation(format!(
                    "Instrument {} already exists",
                    instrument.id
                )));
            }
            staged.instruments.insert(instrument.id.clone(), instrument.clone());
        }

        if self.fail_next_apply.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Mutation("Injected failure during apply".to_string()));
        }

        for instrument in &changes.updates {
            match staged.instruments.get_mut(&instrument.id) {
                Some(slot) => *slot = instrument.clone(),
                None => {
                    return Err(StoreError::Mutation(format!(
                        "Instrument {} not found for update",
                        instrument.id
                    )))
                }
            }
        }

        for id in &changes.deletes {
            if staged.instruments.remove(id).is_none() {
                return Err(StoreError::Mutation(format!(
                    "Instrument {} not found for delete",
                    id
                )));
            }
        }

        staged.history.extend(changes.history.iter().cloned());
        *tables = staged;
        Ok(())
    }

    async fn get_instrument(&self, id: &Id) -> Result<Option<PersistedInstrument>, StoreError> {
        Ok(self.tables.read().instruments.get(id).cloned())
    }

    async fn list_history(&self, instrument_id: &Id) -> Result<Vec<HistoryEntry>, StoreError> {
        let mut entries: Vec<HistoryEntry> = self
            .tables
            .read()
            .history
            .iter()
            .filter(|entry| &entry.instrument_id == instrument_id)
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.changed_at.cmp(&a.changed_at));
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CanonicalRecord, InstrumentField};

    #[tokio::test]
    async fn failed_apply_leaves_tables_untouched() {
        let existing = PersistedInstrument::new(CanonicalRecord::new("Old", "Temp"));
        let store = MemoryStore::with_instruments(vec![existing.clone()]);
        store.fail_next_apply();

        let changes = ChangeSet {
            inserts: vec![PersistedInstrument::new(CanonicalRecord::new("New", "Temp"))],
            deletes: vec![existing.id.clone()],
            ..ChangeSet::default()
        };
        assert!(store.apply(&changes).await.is_err());
        assert_eq!(store.snapshot().await.unwrap(), vec![existing]);

        // The fault is one-shot.
        assert!(store.apply(&changes).await.is_ok());
        assert_eq!(store.snapshot().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn update_of_missing_row_rolls_back_inserts() {
        let store = MemoryStore::new();
        let ghost = PersistedInstrument::new(CanonicalRecord::new("Ghost", "Temp"));
        let changes = ChangeSet {
            inserts: vec![PersistedInstrument::new(
                CanonicalRecord::new("New", "Temp").with(InstrumentField::SerialNumber, "SN-1"),
            )],
            updates: vec![ghost],
            ..ChangeSet::default()
        };

        assert!(matches!(store.apply(&changes).await, Err(StoreError::Mutation(_))));
        assert!(store.snapshot().await.unwrap().is_empty());
    }
}

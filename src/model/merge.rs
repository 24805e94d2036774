use serde::{Deserialize, Serialize};

use crate::model::{HistoryEntry, Id, PersistedInstrument};

/// Mutations computed by a reconciliation run but not yet committed.
///
/// A store applies a change set as one unit: inserts, updates, deletes and
/// the history append either all land or none do.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub inserts: Vec<PersistedInstrument>,
    pub updates: Vec<PersistedInstrument>,
    pub deletes: Vec<Id>,
    pub history: Vec<HistoryEntry>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty()
            && self.updates.is_empty()
            && self.deletes.is_empty()
            && self.history.is_empty()
    }
}

/// Statistics surfaced to the caller after each run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeStats {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    pub warnings: usize,
}

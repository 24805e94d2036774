use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{generate_id, CanonicalRecord, Id, InstrumentField};

/// An instrument as it lives in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedInstrument {
    pub id: Id,
    #[serde(flatten)]
    pub record: CanonicalRecord,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PersistedInstrument {
    pub fn new(record: CanonicalRecord) -> Self {
        let now = Utc::now();
        Self {
            id: generate_id(),
            record,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn identity_key(&self) -> Option<&str> {
        self.record.identity_key()
    }
}

/// One field-level change recorded by a reconciliation run. Never mutated
/// after it is written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: Id,
    pub instrument_id: Id,
    pub field: InstrumentField,
    pub previous_value: String,
    pub new_value: String,
    pub changed_at: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn new(
        instrument_id: &Id,
        field: InstrumentField,
        previous_value: &str,
        new_value: &str,
        changed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: generate_id(),
            instrument_id: instrument_id.clone(),
            field,
            previous_value: previous_value.to_string(),
            new_value: new_value.to_string(),
            changed_at,
        }
    }
}

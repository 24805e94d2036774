use log::warn;
use std::collections::hash_map::Entry;
use std::collections::HashMap;

use crate::model::{known, CanonicalRecord, Id, PersistedInstrument};

/// How an incoming record was matched to an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    SerialNumber,
    Name,
}

/// Lookup structures over a store snapshot, built once per reconciliation run.
#[derive(Debug, Default)]
pub struct IdentityIndex {
    by_serial: HashMap<String, Id>,
    by_name: HashMap<String, Id>,
    duplicates: usize,
}

impl IdentityIndex {
    /// Indexes every entity by its non-placeholder serial number and name.
    ///
    /// When two entities share a key the first one encountered keeps it; the
    /// collision is logged and counted in [`IdentityIndex::duplicates`].
    pub fn build<'a, I>(entities: I) -> Self
    where
        I: IntoIterator<Item = &'a PersistedInstrument>,
    {
        let mut index = Self::default();
        for entity in entities {
            index.insert(entity);
        }
        index
    }

    /// Registers an entity. Existing keys are never overwritten.
    pub fn insert(&mut self, entity: &PersistedInstrument) {
        if let Some(serial) = known(&entity.record.serial_number) {
            if !claim(&mut self.by_serial, serial, &entity.id) {
                warn!(
                    "Duplicate serial number '{}' on instrument {}; keeping the first match",
                    serial, entity.id
                );
                self.duplicates += 1;
            }
        }
        if let Some(name) = known(&entity.record.name) {
            if !claim(&mut self.by_name, name, &entity.id) && known(&entity.record.serial_number).is_none() {
                warn!(
                    "Duplicate name '{}' on instrument {} without serial number; keeping the first match",
                    name, entity.id
                );
                self.duplicates += 1;
            }
        }
    }

    /// Serial number first, then name. `None` means "new entity".
    pub fn resolve(&self, record: &CanonicalRecord) -> Option<&Id> {
        self.resolve_with_kind(record).map(|(id, _)| id)
    }

    pub fn resolve_with_kind(&self, record: &CanonicalRecord) -> Option<(&Id, MatchKind)> {
        if let Some(id) = known(&record.serial_number).and_then(|s| self.by_serial.get(s)) {
            return Some((id, MatchKind::SerialNumber));
        }
        known(&record.name)
            .and_then(|n| self.by_name.get(n))
            .map(|id| (id, MatchKind::Name))
    }

    /// Key collisions seen while indexing.
    pub fn duplicates(&self) -> usize {
        self.duplicates
    }
}

fn claim(map: &mut HashMap<String, Id>, key: &str, id: &Id) -> bool {
    match map.entry(key.to_string()) {
        Entry::Occupied(existing) => existing.get() == id,
        Entry::Vacant(slot) => {
            slot.insert(id.clone());
            true
        }
    }
}

use itertools::Itertools;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::model::{is_placeholder, CanonicalRecord, InstrumentField, PersistedInstrument};

/// Aggregate counts over the catalog, used by the summary endpoint and the CLI report.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CatalogSummary {
    pub total: usize,
    pub by_group: BTreeMap<String, usize>,
    pub by_test: BTreeMap<String, usize>,
    pub by_status: BTreeMap<String, usize>,
    pub by_type: BTreeMap<String, usize>,
    /// Placeholder count per field; fields with none are omitted.
    pub placeholders: BTreeMap<InstrumentField, usize>,
}

impl CatalogSummary {
    pub fn from_instruments(instruments: &[PersistedInstrument]) -> Self {
        Self::from_records(instruments.iter().map(|i| &i.record))
    }

    pub fn from_records<'a, I>(records: I) -> Self
    where
        I: IntoIterator<Item = &'a CanonicalRecord>,
    {
        let records: Vec<&CanonicalRecord> = records.into_iter().collect();

        let placeholders = records
            .iter()
            .flat_map(|r| {
                InstrumentField::ALL
                    .into_iter()
                    .filter(move |field| is_placeholder(r.get(*field)))
            })
            .counts()
            .into_iter()
            .collect();

        Self {
            total: records.len(),
            by_group: count_by(&records, InstrumentField::GroupCode),
            by_test: count_by(&records, InstrumentField::TestCode),
            by_status: count_by(&records, InstrumentField::Status),
            by_type: count_by(&records, InstrumentField::Type),
            placeholders,
        }
    }
}

fn count_by(records: &[&CanonicalRecord], field: InstrumentField) -> BTreeMap<String, usize> {
    records
        .iter()
        .map(|r| r.get(field).to_string())
        .counts()
        .into_iter()
        .collect()
}

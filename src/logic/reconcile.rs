use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::ReconcileError;
use crate::logic::dates::parse_canonical;
use crate::logic::identity::IdentityIndex;
use crate::model::{
    is_placeholder, placeholder, CanonicalRecord, ChangeSet, HistoryEntry, Id, InstrumentField,
    MergeStats, PersistedInstrument,
};
use crate::store::InstrumentStore;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ReconcileOptions {
    /// Largest share of the collection (0.0..=1.0) a single run may delete.
    /// `None` applies deletions unconditionally, including a full clear on an
    /// empty batch.
    pub max_removal_ratio: Option<f64>,
}

/// The staged outcome of a run before it touches the store.
#[derive(Debug, Clone, Default)]
pub struct MergePlan {
    pub changes: ChangeSet,
    pub stats: MergeStats,
}

/// Serializes reconciliation runs against one store.
pub struct Reconciler<S: InstrumentStore> {
    store: Arc<S>,
    options: ReconcileOptions,
    run_lock: Mutex<()>,
}

impl<S: InstrumentStore> Reconciler<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            options: ReconcileOptions::default(),
            run_lock: Mutex::new(()),
        }
    }

    pub fn with_options(mut self, options: ReconcileOptions) -> Self {
        self.options = options;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn options(&self) -> ReconcileOptions {
        self.options
    }

    /// Runs one reconciliation. A concurrent caller waits for the run in flight.
    pub async fn run(&self, incoming: &[CanonicalRecord]) -> Result<MergeStats, ReconcileError> {
        let _running = self.run_lock.lock().await;
        reconcile_with(incoming, self.store.as_ref(), &self.options).await
    }

    /// Computes what a run would do without applying it.
    pub async fn preview(&self, incoming: &[CanonicalRecord]) -> Result<MergePlan, ReconcileError> {
        let _running = self.run_lock.lock().await;
        validate_batch(incoming)?;
        let snapshot = self.store.snapshot().await?;
        let plan = plan_changes(incoming, &snapshot, Utc::now());
        check_removal_guard(&plan, snapshot.len(), &self.options)?;
        Ok(plan)
    }
}

/// Merges `incoming` into `store` with deletions applied unconditionally.
pub async fn reconcile<S>(incoming: &[CanonicalRecord], store: &S) -> Result<MergeStats, ReconcileError>
where
    S: InstrumentStore + ?Sized,
{
    reconcile_with(incoming, store, &ReconcileOptions::default()).await
}

pub async fn reconcile_with<S>(
    incoming: &[CanonicalRecord],
    store: &S,
    options: &ReconcileOptions,
) -> Result<MergeStats, ReconcileError>
where
    S: InstrumentStore + ?Sized,
{
    validate_batch(incoming)?;

    let snapshot = store.snapshot().await?;
    info!(
        "Reconciling {} incoming instruments against {} persisted",
        incoming.len(),
        snapshot.len()
    );
    if incoming.is_empty() && !snapshot.is_empty() {
        warn!(
            "Incoming batch is empty; all {} persisted instruments will be removed",
            snapshot.len()
        );
    }

    let plan = plan_changes(incoming, &snapshot, Utc::now());
    check_removal_guard(&plan, snapshot.len(), options)?;

    if plan.changes.is_empty() {
        debug!("Store already synchronized; nothing to apply");
    } else {
        store.apply(&plan.changes).await?;
    }

    let stats = plan.stats;
    info!(
        "Reconciliation finished: {} added, {} updated, {} removed, {} warnings",
        stats.added, stats.updated, stats.removed, stats.warnings
    );
    Ok(stats)
}

/// Rejects records that break the mandatory-field or placeholder invariants.
pub fn validate_batch(incoming: &[CanonicalRecord]) -> Result<(), ReconcileError> {
    for (index, record) in incoming.iter().enumerate() {
        let identity = record.identity_key().unwrap_or("<no identity>");

        let missing = record.missing_mandatory();
        if !missing.is_empty() {
            return Err(ReconcileError::missing_fields(index, identity, &missing));
        }

        let blank = record.blank_fields();
        if !blank.is_empty() {
            let names: Vec<&str> = blank.iter().map(|f| f.as_str()).collect();
            return Err(ReconcileError::Validation {
                index,
                identity: identity.to_string(),
                reason: format!("blank or padded values in: {}", names.join(", ")),
            });
        }
    }
    Ok(())
}

fn check_removal_guard(
    plan: &MergePlan,
    total: usize,
    options: &ReconcileOptions,
) -> Result<(), ReconcileError> {
    let Some(limit) = options.max_removal_ratio else {
        return Ok(());
    };
    let removed = plan.stats.removed;
    if total > 0 && removed as f64 / total as f64 > limit {
        warn!(
            "Removal guard tripped: {} of {} instruments would be removed",
            removed, total
        );
        return Err(ReconcileError::RemovalGuard { removed, total, limit });
    }
    Ok(())
}

/// Computes the identity-keyed diff between a batch and a snapshot.
///
/// Pure: the snapshot is not modified and nothing is written. The returned
/// change set holds full entity rows for inserts and updates, the ids to
/// delete, and one history entry per changed field.
pub fn plan_changes(
    incoming: &[CanonicalRecord],
    snapshot: &[PersistedInstrument],
    now: DateTime<Utc>,
) -> MergePlan {
    let mut index = IdentityIndex::build(snapshot);
    let persisted: HashMap<&Id, &PersistedInstrument> =
        snapshot.iter().map(|entity| (&entity.id, entity)).collect();

    let mut stats = MergeStats {
        warnings: index.duplicates(),
        ..MergeStats::default()
    };
    let mut changes = ChangeSet::default();

    // Working copies of matched entities, in the order they were first matched.
    let mut touched: HashMap<Id, PersistedInstrument> = HashMap::new();
    let mut touched_order: Vec<Id> = Vec::new();
    let mut staged_inserts: HashMap<Id, usize> = HashMap::new();
    let mut matched: HashSet<Id> = HashSet::new();
    let mut seen_keys: HashSet<String> = HashSet::new();

    for record in incoming {
        let expiry_usable = expiry_is_valid(&record.certificate_expiry);
        if !expiry_usable {
            warn!(
                "Invalid certificate expiry '{}' for instrument {}; keeping previous value",
                record.certificate_expiry, record.name
            );
            stats.warnings += 1;
        }

        if let Some(key) = record.identity_key() {
            seen_keys.insert(key.to_string());
        }

        let resolved = index.resolve(record).cloned();
        match resolved {
            None => {
                let mut fields = record.clone();
                if !expiry_usable {
                    fields.certificate_expiry = placeholder();
                }
                let entity = PersistedInstrument {
                    id: crate::model::generate_id(),
                    record: fields,
                    created_at: now,
                    updated_at: now,
                };
                debug!("New instrument {:?} staged as {}", entity.identity_key(), entity.id);
                stats.warnings += register(&mut index, &entity);
                staged_inserts.insert(entity.id.clone(), changes.inserts.len());
                changes.inserts.push(entity);
                stats.added += 1;
            }
            Some(id) if staged_inserts.contains_key(&id) => {
                warn!(
                    "Instrument {:?} appears more than once in the batch; last occurrence wins",
                    record.identity_key()
                );
                stats.warnings += 1;
                let entity = &mut changes.inserts[staged_inserts[&id]];
                overwrite_fields(&mut entity.record, record, expiry_usable);
                stats.warnings += register(&mut index, entity);
            }
            Some(id) => {
                if !matched.insert(id.clone()) {
                    warn!(
                        "Instrument {} matched more than once in the batch; last occurrence wins",
                        id
                    );
                    stats.warnings += 1;
                }

                let Some(original) = persisted.get(&id) else {
                    continue;
                };
                let entity = touched.entry(id.clone()).or_insert_with(|| {
                    touched_order.push(id.clone());
                    (*original).clone()
                });
                overwrite_fields(&mut entity.record, record, expiry_usable);
                // A serial or name gained here must resolve to this entity for later records.
                stats.warnings += register(&mut index, entity);
            }
        }
    }

    for entity in snapshot {
        if matched.contains(&entity.id) {
            continue;
        }
        let still_reported = entity
            .identity_key()
            .is_some_and(|key| seen_keys.contains(key));
        if still_reported {
            continue;
        }
        debug!("Instrument {} ({:?}) no longer reported upstream", entity.id, entity.identity_key());
        changes.deletes.push(entity.id.clone());
        stats.removed += 1;
    }

    // History is the net change per entity, so repeated matches in one batch
    // collapse into a single diff against the persisted row.
    for id in touched_order {
        let (Some(original), Some(mut entity)) = (persisted.get(&id), touched.remove(&id)) else {
            continue;
        };
        let entries = field_changes(original, &entity.record, now);
        if entries.is_empty() {
            continue;
        }
        entity.updated_at = now;
        changes.history.extend(entries);
        changes.updates.push(entity);
    }
    stats.updated = changes.updates.len();

    MergePlan { changes, stats }
}

/// One history entry per field where `next` differs from the persisted row.
fn field_changes(
    original: &PersistedInstrument,
    next: &CanonicalRecord,
    now: DateTime<Utc>,
) -> Vec<HistoryEntry> {
    InstrumentField::ALL
        .into_iter()
        .filter(|&field| original.record.get(field) != next.get(field))
        .map(|field| {
            HistoryEntry::new(&original.id, field, original.record.get(field), next.get(field), now)
        })
        .collect()
}

/// Indexes `entity`'s current keys, returning how many collided with another entity.
fn register(index: &mut IdentityIndex, entity: &PersistedInstrument) -> usize {
    let before = index.duplicates();
    index.insert(entity);
    index.duplicates() - before
}

fn overwrite_fields(target: &mut CanonicalRecord, incoming: &CanonicalRecord, expiry_usable: bool) {
    for field in InstrumentField::ALL {
        if field == InstrumentField::CertificateExpiry && !expiry_usable {
            continue;
        }
        target.set(field, incoming.get(field));
    }
}

fn expiry_is_valid(value: &str) -> bool {
    is_placeholder(value) || parse_canonical(value).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, serial: &str) -> CanonicalRecord {
        CanonicalRecord::new(name, "Temp").with(InstrumentField::SerialNumber, serial)
    }

    fn persisted(id: &str, record: CanonicalRecord) -> PersistedInstrument {
        let mut entity = PersistedInstrument::new(record);
        entity.id = id.to_string();
        entity
    }

    #[test]
    fn new_record_is_inserted_verbatim() {
        let incoming = vec![record("Thermometer A", "-").with(InstrumentField::Status, "Ativo")];
        let plan = plan_changes(&incoming, &[], Utc::now());

        assert_eq!(plan.stats, MergeStats { added: 1, ..MergeStats::default() });
        assert_eq!(plan.changes.inserts.len(), 1);
        assert_eq!(plan.changes.inserts[0].record, incoming[0]);
        assert_eq!(plan.changes.inserts[0].identity_key(), Some("Thermometer A"));
    }

    #[test]
    fn single_field_change_yields_one_history_entry() {
        let before = record("Thermo", "SN-123").with(InstrumentField::Location, "Lab 1");
        let after = before.clone().with(InstrumentField::Location, "Lab 2");
        let snapshot = vec![persisted("e1", before)];

        let plan = plan_changes(&[after], &snapshot, Utc::now());

        assert_eq!(plan.stats, MergeStats { updated: 1, ..MergeStats::default() });
        assert_eq!(plan.changes.history.len(), 1);
        let entry = &plan.changes.history[0];
        assert_eq!(entry.instrument_id, "e1");
        assert_eq!(entry.field, InstrumentField::Location);
        assert_eq!(entry.previous_value, "Lab 1");
        assert_eq!(entry.new_value, "Lab 2");
        assert_eq!(plan.changes.updates[0].record.location, "Lab 2");
    }

    #[test]
    fn identical_record_is_a_no_op() {
        let current = record("Thermo", "SN-1");
        let snapshot = vec![persisted("e1", current.clone())];

        let plan = plan_changes(&[current], &snapshot, Utc::now());

        assert_eq!(plan.stats, MergeStats::default());
        assert!(plan.changes.is_empty());
    }

    #[test]
    fn several_changed_fields_count_one_update() {
        let before = record("Thermo", "SN-1");
        let after = before
            .clone()
            .with(InstrumentField::Brand, "Fluke")
            .with(InstrumentField::Model, "54-II");
        let plan = plan_changes(&[after], &[persisted("e1", before)], Utc::now());

        assert_eq!(plan.stats.updated, 1);
        assert_eq!(plan.changes.history.len(), 2);
    }

    #[test]
    fn absent_entities_are_removed() {
        let snapshot = vec![
            persisted("keep", record("Kept", "SN-1")),
            persisted("gone", record("Gone", "SN-2")),
        ];
        let plan = plan_changes(&[record("Kept", "SN-1")], &snapshot, Utc::now());

        assert_eq!(plan.stats.removed, 1);
        assert_eq!(plan.changes.deletes, vec!["gone".to_string()]);
    }

    #[test]
    fn empty_batch_clears_the_collection() {
        let snapshot = vec![
            persisted("a", record("A", "SN-1")),
            persisted("b", record("B", "-")),
        ];
        let plan = plan_changes(&[], &snapshot, Utc::now());
        assert_eq!(plan.stats.removed, 2);
    }

    #[test]
    fn gaining_a_serial_number_keeps_identity() {
        // Matched by name; the new serial must not cause a delete + insert.
        let snapshot = vec![persisted("e1", record("Thermo", "-"))];
        let plan = plan_changes(&[record("Thermo", "SN-9")], &snapshot, Utc::now());

        assert_eq!(plan.stats, MergeStats { updated: 1, ..MergeStats::default() });
        assert_eq!(plan.changes.history[0].field, InstrumentField::SerialNumber);
        assert!(plan.changes.deletes.is_empty());
    }

    #[test]
    fn serial_gained_mid_batch_resolves_later_records() {
        let snapshot = vec![persisted("e1", record("Thermo", "-"))];
        let incoming = vec![record("Thermo", "SN-9"), record("Thermo B", "SN-9")];

        let plan = plan_changes(&incoming, &snapshot, Utc::now());

        assert_eq!(plan.stats, MergeStats { updated: 1, warnings: 1, ..MergeStats::default() });
        assert!(plan.changes.inserts.is_empty());
        assert!(plan.changes.deletes.is_empty());
        let entity = &plan.changes.updates[0];
        assert_eq!(entity.id, "e1");
        assert_eq!(entity.record.name, "Thermo B");
        assert_eq!(entity.record.serial_number, "SN-9");
        let fields: Vec<InstrumentField> = plan.changes.history.iter().map(|h| h.field).collect();
        assert_eq!(fields, vec![InstrumentField::Name, InstrumentField::SerialNumber]);

        // Same batch against the applied state changes nothing.
        let rerun = plan_changes(&incoming, &plan.changes.updates, Utc::now());
        assert_eq!(rerun.stats, MergeStats { warnings: 1, ..MergeStats::default() });
        assert!(rerun.changes.is_empty());
    }

    #[test]
    fn invalid_expiry_warns_and_keeps_previous_value() {
        let before = record("Thermo", "SN-1").with(InstrumentField::CertificateExpiry, "2025-01-01");
        let after = before
            .clone()
            .with(InstrumentField::CertificateExpiry, "31/31/2025")
            .with(InstrumentField::Location, "Lab 3");
        let plan = plan_changes(&[after], &[persisted("e1", before)], Utc::now());

        assert_eq!(plan.stats.warnings, 1);
        assert_eq!(plan.stats.updated, 1);
        assert_eq!(plan.changes.updates[0].record.certificate_expiry, "2025-01-01");
        assert!(plan
            .changes
            .history
            .iter()
            .all(|entry| entry.field != InstrumentField::CertificateExpiry));
    }

    #[test]
    fn invalid_expiry_on_insert_becomes_placeholder() {
        let incoming = record("Thermo", "SN-1").with(InstrumentField::CertificateExpiry, "soon");
        let plan = plan_changes(&[incoming], &[], Utc::now());

        assert_eq!(plan.stats.added, 1);
        assert_eq!(plan.stats.warnings, 1);
        assert_eq!(plan.changes.inserts[0].record.certificate_expiry, "-");
    }

    #[test]
    fn duplicate_incoming_records_insert_once() {
        let first = record("Thermo", "SN-1").with(InstrumentField::Location, "Lab 1");
        let second = first.clone().with(InstrumentField::Location, "Lab 2");
        let plan = plan_changes(&[first, second], &[], Utc::now());

        assert_eq!(plan.stats.added, 1);
        assert_eq!(plan.stats.warnings, 1);
        assert_eq!(plan.changes.inserts[0].record.location, "Lab 2");
    }

    #[test]
    fn duplicate_serials_in_snapshot_are_warnings_not_deletions() {
        let snapshot = vec![
            persisted("first", record("A", "SN-1")),
            persisted("second", record("B", "SN-1")),
        ];
        let plan = plan_changes(&[record("A", "SN-1")], &snapshot, Utc::now());

        assert_eq!(plan.stats.warnings, 1);
        assert_eq!(plan.stats.removed, 0);
        assert_eq!(plan.stats.updated, 0);
    }

    #[test]
    fn validation_rejects_missing_type() {
        let bad = CanonicalRecord::new("Thermo", "-");
        let err = validate_batch(&[record("Ok", "-"), bad]).unwrap_err();
        match err {
            ReconcileError::Validation { index, identity, .. } => {
                assert_eq!(index, 1);
                assert_eq!(identity, "Thermo");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn validation_rejects_empty_strings() {
        let mut bad = record("Thermo", "SN-1");
        bad.brand = String::new();
        assert!(matches!(
            validate_batch(&[bad]),
            Err(ReconcileError::Validation { .. })
        ));
    }

    #[test]
    fn removal_guard_trips_above_ratio() {
        let snapshot: Vec<_> = (0..4)
            .map(|i| persisted(&format!("e{i}"), record(&format!("I{i}"), "-")))
            .collect();
        let plan = plan_changes(&[record("I0", "-")], &snapshot, Utc::now());
        let options = ReconcileOptions { max_removal_ratio: Some(0.5) };

        assert!(matches!(
            check_removal_guard(&plan, snapshot.len(), &options),
            Err(ReconcileError::RemovalGuard { removed: 3, total: 4, .. })
        ));
        assert!(check_removal_guard(&plan, snapshot.len(), &ReconcileOptions::default()).is_ok());
    }
}

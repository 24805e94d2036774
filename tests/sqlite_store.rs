use instrument_catalog::logic::reconcile;
use instrument_catalog::model::{CanonicalRecord, ChangeSet, InstrumentField, MergeStats, PersistedInstrument};
use instrument_catalog::store::{InstrumentStore, SqliteStore};
use instrument_catalog::StoreError;

fn balance(serial: &str) -> CanonicalRecord {
    CanonicalRecord::new("Balança analítica", "Massa")
        .with(InstrumentField::GroupCode, "SPG0121")
        .with(InstrumentField::TestCode, "Ensaio 102")
        .with(InstrumentField::SerialNumber, serial)
        .with(InstrumentField::MeasurementRange, "0 - 220 g")
        .with(InstrumentField::CertificateExpiry, "2026-01-31")
}

#[tokio::test]
async fn applied_rows_come_back_from_snapshot() {
    let store = SqliteStore::in_memory().await.unwrap();
    let with_expiry = PersistedInstrument::new(balance("B-1"));
    let without_expiry = PersistedInstrument::new(CanonicalRecord::new("Paquímetro", "Dimensional"));

    store
        .apply(&ChangeSet {
            inserts: vec![with_expiry.clone(), without_expiry.clone()],
            ..ChangeSet::default()
        })
        .await
        .unwrap();

    let snapshot = store.snapshot().await.unwrap();
    assert_eq!(snapshot.len(), 2);

    let stored = store.get_instrument(&with_expiry.id).await.unwrap().unwrap();
    assert_eq!(stored.record, with_expiry.record);

    let stored = store.get_instrument(&without_expiry.id).await.unwrap().unwrap();
    assert_eq!(stored.record.certificate_expiry, "-");

    assert!(store.get_instrument(&"missing".to_string()).await.unwrap().is_none());
}

#[tokio::test]
async fn failed_update_rolls_back_the_batch() {
    let store = SqliteStore::in_memory().await.unwrap();
    let existing = PersistedInstrument::new(balance("B-1"));
    store
        .apply(&ChangeSet {
            inserts: vec![existing.clone()],
            ..ChangeSet::default()
        })
        .await
        .unwrap();
    let before = store.snapshot().await.unwrap();

    let ghost = PersistedInstrument::new(balance("B-404"));
    let result = store
        .apply(&ChangeSet {
            inserts: vec![PersistedInstrument::new(balance("B-2"))],
            updates: vec![ghost],
            deletes: vec![existing.id.clone()],
            ..ChangeSet::default()
        })
        .await;

    assert!(matches!(result, Err(StoreError::Mutation(_))));
    assert_eq!(store.snapshot().await.unwrap(), before);
}

#[tokio::test]
async fn non_canonical_expiry_is_rejected() {
    let store = SqliteStore::in_memory().await.unwrap();
    let bad = PersistedInstrument::new(balance("B-1").with(InstrumentField::CertificateExpiry, "31/01/2026"));

    let result = store
        .apply(&ChangeSet {
            inserts: vec![bad],
            ..ChangeSet::default()
        })
        .await;

    assert!(matches!(result, Err(StoreError::Mutation(_))));
    assert!(store.snapshot().await.unwrap().is_empty());
}

#[tokio::test]
async fn reconcile_is_idempotent_and_history_outlives_deletion() {
    let store = SqliteStore::in_memory().await.unwrap();

    let first = reconcile(&[balance("B-1")], &store).await.unwrap();
    assert_eq!(first.added, 1);
    assert_eq!(reconcile(&[balance("B-1")], &store).await.unwrap(), MergeStats::default());

    let id = store.snapshot().await.unwrap().remove(0).id;
    let moved = balance("B-1")
        .with(InstrumentField::Location, "Sala 3")
        .with(InstrumentField::CertificateExpiry, "2027-01-31");
    let second = reconcile(&[moved], &store).await.unwrap();
    assert_eq!(second.updated, 1);

    let history = store.list_history(&id).await.unwrap();
    assert_eq!(history.len(), 2);
    let fields: Vec<InstrumentField> = history.iter().map(|h| h.field).collect();
    assert!(fields.contains(&InstrumentField::Location));
    assert!(fields.contains(&InstrumentField::CertificateExpiry));

    let removed = reconcile(&[], &store).await.unwrap();
    assert_eq!(removed.removed, 1);
    assert!(store.get_instrument(&id).await.unwrap().is_none());
    assert_eq!(store.list_history(&id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn database_file_is_created_and_reopened() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("catalog.db").display());

    {
        let store = SqliteStore::new(&url, 2).await.unwrap();
        store.migrate().await.unwrap();
        reconcile(&[balance("B-1")], &store).await.unwrap();
        store.pool().close().await;
    }

    let reopened = SqliteStore::new(&url, 2).await.unwrap();
    reopened.migrate().await.unwrap();
    let snapshot = reopened.snapshot().await.unwrap();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].record.serial_number, "B-1");
}

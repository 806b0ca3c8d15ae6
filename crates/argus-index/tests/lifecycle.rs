use argus_index::{
    DiscoveryConfig, DiscoveryIndex, DiscoveryError, FrameworkId, MemoryPressureBus,
    VERSION_FILE_NAME,
};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

const JUNIT: FrameworkId = FrameworkId(1);

fn init_logs() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn root(dir: &tempfile::TempDir) -> PathBuf {
    dir.path().join("discovery")
}

fn record_one(index: &DiscoveryIndex) {
    index
        .update_test_data(
            "T",
            "run",
            JUNIT,
            &HashMap::from([("C".to_string(), vec!["m".to_string()])]),
            &["d/testData/f.txt".to_string()],
            Some("core"),
        )
        .unwrap();
}

#[test]
fn data_survives_dispose_and_reopen() {
    init_logs();
    let dir = tempfile::tempdir().unwrap();

    let index = DiscoveryIndex::open(DiscoveryConfig::new(root(&dir)));
    record_one(&index);
    index.dispose().unwrap();

    let index = DiscoveryIndex::open(DiscoveryConfig::new(root(&dir)));
    let cancel = CancellationToken::new();
    assert!(index.has_test_trace("T", "run", JUNIT).unwrap());
    assert_eq!(index.get_tests_by_class_name("C", JUNIT, &cancel).unwrap().len(), 1);
    assert_eq!(
        index.get_affected_files("T", "run", JUNIT).unwrap(),
        vec!["d/testData/f.txt".to_string()]
    );
    assert_eq!(
        index.get_test_modules_by_method_name("T", "run", JUNIT).unwrap(),
        vec!["core".to_string()]
    );
}

#[test]
fn flush_persists_without_dispose() {
    let dir = tempfile::tempdir().unwrap();

    let index = DiscoveryIndex::open(DiscoveryConfig::new(root(&dir)));
    record_one(&index);
    index.flush();
    drop(index);

    let index = DiscoveryIndex::open(DiscoveryConfig::new(root(&dir)));
    assert!(index.has_test_trace("T", "run", JUNIT).unwrap());
}

#[test]
fn low_memory_notification_flushes_in_the_background() {
    let dir = tempfile::tempdir().unwrap();
    let bus = MemoryPressureBus::new();

    let index =
        DiscoveryIndex::open(DiscoveryConfig::new(root(&dir)).with_memory_bus(bus.clone()));
    record_one(&index);
    bus.notify_low_memory();
    // Neither flush() nor dispose(): only the low-memory flush made the
    // index pair durable.
    drop(index);

    let index = DiscoveryIndex::open(DiscoveryConfig::new(root(&dir)));
    assert!(index.has_test_trace("T", "run", JUNIT).unwrap());
}

#[test]
fn version_bump_wipes_state() {
    init_logs();
    let dir = tempfile::tempdir().unwrap();

    let index = DiscoveryIndex::open(DiscoveryConfig::new(root(&dir)));
    record_one(&index);
    index.dispose().unwrap();

    // A future engine persisted a different schema version here.
    std::fs::write(root(&dir).join(VERSION_FILE_NAME), b"999\n").unwrap();

    let index = DiscoveryIndex::open(DiscoveryConfig::new(root(&dir)));
    assert!(!index.has_test_trace("T", "run", JUNIT).unwrap());
    assert_eq!(index.stats().test_identities, 0);
}

#[test]
fn corrupted_table_recovers_by_wiping() {
    init_logs();
    let dir = tempfile::tempdir().unwrap();

    let index = DiscoveryIndex::open(DiscoveryConfig::new(root(&dir)));
    record_one(&index);
    index.dispose().unwrap();

    std::fs::write(root(&dir).join("className.enum"), b"not a table").unwrap();

    let index = DiscoveryIndex::open(DiscoveryConfig::new(root(&dir)));
    assert!(!index.has_test_trace("T", "run", JUNIT).unwrap());

    // The rebuilt directory is fully usable.
    record_one(&index);
    index.dispose().unwrap();
    let index = DiscoveryIndex::open(DiscoveryConfig::new(root(&dir)));
    assert!(index.has_test_trace("T", "run", JUNIT).unwrap());
}

#[test]
fn dispose_is_idempotent_and_terminal() {
    let dir = tempfile::tempdir().unwrap();

    let index = DiscoveryIndex::open(DiscoveryConfig::new(root(&dir)));
    record_one(&index);
    index.dispose().unwrap();
    index.dispose().unwrap();

    let err = index
        .update_test_data("U", "run", JUNIT, &HashMap::new(), &[], None)
        .unwrap_err();
    assert!(matches!(
        err,
        DiscoveryError::Storage(argus_storage::StorageError::Closed { .. })
    ));

    let err = index.has_test_trace("T", "run", JUNIT).unwrap_err();
    assert!(matches!(err, DiscoveryError::Storage(_)));
}

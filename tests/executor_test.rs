mod common;

use std::{fs, path::Path, sync::Arc};

use arkdrop_engine::{
    batch::BatchBuilder,
    initialize,
    unit::{IncomingState, OutgoingState, OutgoingUnit, Unit},
    BatchDescriptor, BatchExecutor, DropError, Direction, EngineConfig,
    IncomingBatch, OutgoingBatch, Outcome, PhaseOutcome,
};
use common::{config, file_count, source_files, MemoryRegistry, MemoryStore};
use rstest::rstest;
use tempdir::TempDir;

type Executor = BatchExecutor<MemoryStore, MemoryRegistry>;

fn executor(
    config: EngineConfig,
) -> (Executor, Arc<MemoryStore>, Arc<MemoryRegistry>) {
    let store = Arc::new(MemoryStore::default());
    let registry = Arc::new(MemoryRegistry::default());
    let executor =
        BatchExecutor::new(store.clone(), registry.clone(), config).unwrap();
    (executor, store, registry)
}

#[rstest]
#[case(0)]
#[case(1)]
fn executor_requires_valid_config(#[case] max_concurrent_units: usize) {
    let dir = TempDir::new("executor_config").unwrap();
    let config = EngineConfig {
        max_concurrent_units,
        ..config(dir.path())
    };
    let result = BatchExecutor::new(
        Arc::new(MemoryStore::default()),
        Arc::new(MemoryRegistry::default()),
        config,
    );
    assert_eq!(
        matches!(result, Err(DropError::Config(_))),
        max_concurrent_units == 0
    );
}

fn outgoing(dir: &Path, count: usize) -> OutgoingBatch {
    BatchBuilder::new("Pixel", "Galaxy")
        .units(source_files(dir, count).into_iter().map(OutgoingUnit::from_path))
        .build()
        .unwrap()
}

fn states(batch: &OutgoingBatch) -> Vec<OutgoingState> {
    batch.units().iter().map(|u| u.state()).collect()
}

#[tokio::test]
async fn load_and_stage_advance_the_whole_batch() {
    initialize();
    let dir = TempDir::new("executor_stage").unwrap();
    let config = config(dir.path());
    let staging_dir = config.staging_dir.clone();
    let (executor, store, registry) = executor(config);
    let mut batch = outgoing(dir.path(), 3);

    let report = executor.load(&mut batch).await.unwrap();
    assert!(report.is_advanced());
    assert_eq!(batch.state(), OutgoingState::Loaded);
    assert_eq!(file_count(&staging_dir), 3);

    let report = executor.stage(&mut batch).await.unwrap();
    assert!(report.is_advanced());
    assert_eq!(batch.state(), OutgoingState::Staged);
    assert_eq!(report.entries.len(), 3);
    assert!(report
        .entries
        .iter()
        .all(|e| e.direction() == Direction::Upload && e.is_success()));

    assert_eq!(store.len(), 3);
    for unit in batch.units() {
        let remote_path = unit.remote_path().unwrap();
        assert!(remote_path.starts_with(batch.id()));
        assert!(remote_path.ends_with(".txt"));
        assert_eq!(store.blob(remote_path).unwrap().len() as u64, unit.size());
        assert!(unit.local_path().is_none());
    }
    assert_eq!(file_count(&staging_dir), 0);

    let published = registry.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0], BatchDescriptor::from_batch(&batch).unwrap());
    assert_eq!(
        batch.reference(),
        Some(format!("batches/{}", batch.id()).as_str())
    );
}

#[rstest]
#[case(0)]
#[case(1)]
#[case(2)]
#[tokio::test]
async fn failed_upload_reverts_every_unit(#[case] failing: usize) {
    initialize();
    let dir = TempDir::new("executor_upload_fail").unwrap();
    let (executor, store, registry) = executor(config(dir.path()));
    let mut batch = outgoing(dir.path(), 3);
    executor.load(&mut batch).await.unwrap();

    let failing_id = batch.units()[failing].id();
    store.fail_on(failing_id.to_string());
    let report = executor.stage(&mut batch).await.unwrap();

    assert_eq!(
        report.outcome,
        PhaseOutcome::UnitsFailed {
            failed: vec![failing_id]
        }
    );
    assert_eq!(states(&batch), vec![OutgoingState::Loaded; 3]);
    assert!(registry.published().is_empty());
    let failure = report
        .entries
        .iter()
        .find(|e| e.unit_id() == failing_id)
        .unwrap();
    assert_eq!(failure.outcome(), Outcome::Failure);
    assert_eq!(failure.bytes(), 0);

    let first_paths: Vec<_> = batch
        .units()
        .iter()
        .map(|u| u.remote_path().unwrap().to_owned())
        .collect();
    store.heal();
    let retry = executor.stage(&mut batch).await.unwrap();
    assert!(retry.is_advanced());
    assert_eq!(batch.state(), OutgoingState::Staged);
    let retried_paths: Vec<_> = batch
        .units()
        .iter()
        .map(|u| u.remote_path().unwrap().to_owned())
        .collect();
    assert_eq!(first_paths, retried_paths);
    assert_eq!(store.len(), 3);
}

#[rstest]
#[case(0)]
#[case(1)]
#[case(2)]
#[tokio::test]
async fn failed_load_reverts_every_unit(#[case] failing: usize) {
    initialize();
    let dir = TempDir::new("executor_load_fail").unwrap();
    let config = config(dir.path());
    let staging_dir = config.staging_dir.clone();
    let (executor, _, _) = executor(config);
    let mut batch = outgoing(dir.path(), 3);
    fs::remove_file(batch.units()[failing].source()).unwrap();

    let report = executor.load(&mut batch).await.unwrap();
    assert_eq!(
        report.outcome,
        PhaseOutcome::UnitsFailed {
            failed: vec![batch.units()[failing].id()]
        }
    );
    assert_eq!(states(&batch), vec![OutgoingState::Picked; 3]);
    assert!(batch.units().iter().all(|u| u.local_path().is_none()));
    assert_eq!(file_count(&staging_dir), 0);
}

#[tokio::test]
async fn publish_failure_leaves_batch_loaded() {
    initialize();
    let dir = TempDir::new("executor_publish_fail").unwrap();
    let (executor, store, registry) = executor(config(dir.path()));
    let mut batch = outgoing(dir.path(), 3);
    executor.load(&mut batch).await.unwrap();
    registry.set_failing(true);

    let report = executor.stage(&mut batch).await.unwrap();
    assert!(matches!(report.outcome, PhaseOutcome::PublishFailed(_)));
    assert_eq!(batch.state(), OutgoingState::Loaded);
    assert_eq!(states(&batch), vec![OutgoingState::Loaded; 3]);
    assert_eq!(batch.reference(), None);
    assert!(batch
        .units()
        .iter()
        .all(|u| u.local_path().map(|p| p.exists()).unwrap_or(false)));
    assert_eq!(store.len(), 3);

    registry.set_failing(false);
    assert!(executor.stage(&mut batch).await.unwrap().is_advanced());
}

#[tokio::test]
async fn local_copies_kept_when_release_is_disabled() {
    initialize();
    let dir = TempDir::new("executor_keep_copies").unwrap();
    let config = EngineConfig {
        release_after_stage: false,
        ..config(dir.path())
    };
    let (executor, _, _) = executor(config);
    let mut batch = outgoing(dir.path(), 2);

    executor.load(&mut batch).await.unwrap();
    executor.stage(&mut batch).await.unwrap();
    assert_eq!(batch.state(), OutgoingState::Staged);
    assert!(batch.units().iter().all(|u| u.local_path().is_some()));
}

#[tokio::test]
async fn phase_in_wrong_state_is_rejected() {
    initialize();
    let dir = TempDir::new("executor_wrong_state").unwrap();
    let (executor, store, _) = executor(config(dir.path()));
    let mut batch = outgoing(dir.path(), 2);

    let err = executor.stage(&mut batch).await.unwrap_err();
    assert!(matches!(err, DropError::StateConflict(_)));
    assert_eq!(states(&batch), vec![OutgoingState::Picked; 2]);
    assert!(batch.units().iter().all(|u| u.remote_path().is_none()));
    assert_eq!(store.len(), 0);

    executor.load(&mut batch).await.unwrap();
    assert!(executor.load(&mut batch).await.unwrap_err().is_state_conflict());
}

fn incoming(store: &MemoryStore, count: usize) -> IncomingBatch {
    let json = format!(
        r#"{{"batch_id":"remote-batch","units":{{{}}}}}"#,
        (0..count)
            .map(|i| {
                let id = uuid::Uuid::new_v4();
                let remote_path = format!("remote-batch/{id}.txt");
                store.put(&remote_path, format!("blob {i}").as_bytes());
                format!(
                    r#""{id}":{{"content_type":"text/plain","remote_path":"{remote_path}","size_bytes":6}}"#
                )
            })
            .collect::<Vec<_>>()
            .join(",")
    );
    let descriptor = BatchDescriptor::from_json(&json).unwrap();
    IncomingBatch::from_descriptor(descriptor, "Galaxy", "Pixel").unwrap()
}

#[tokio::test]
async fn download_materializes_every_blob() {
    initialize();
    let dir = TempDir::new("executor_download").unwrap();
    let config = config(dir.path());
    let download_dir = config.download_dir.clone();
    let (executor, store, _) = executor(config);
    let mut batch = incoming(&store, 3);

    let report = executor.download(&mut batch).await.unwrap();
    assert!(report.is_advanced());
    assert_eq!(batch.state(), IncomingState::Downloaded);
    assert_eq!(report.entries.len(), 3);
    assert!(report
        .entries
        .iter()
        .all(|e| e.direction() == Direction::Download && e.bytes() == 6));

    for unit in batch.units() {
        let local = unit.local_path().unwrap();
        assert!(local.starts_with(&download_dir));
        let expected = store.blob(unit.remote_path().unwrap()).unwrap();
        assert_eq!(fs::read(local).unwrap(), expected);
    }
}

#[rstest]
#[case(0)]
#[case(2)]
#[tokio::test]
async fn failed_download_discards_every_file(#[case] failing: usize) {
    initialize();
    let dir = TempDir::new("executor_download_fail").unwrap();
    let config = config(dir.path());
    let download_dir = config.download_dir.clone();
    let (executor, store, _) = executor(config);
    let mut batch = incoming(&store, 3);
    store.fail_on(batch.units()[failing].id().to_string());

    let report = executor.download(&mut batch).await.unwrap();
    assert!(matches!(report.outcome, PhaseOutcome::UnitsFailed { .. }));
    assert!(batch
        .units()
        .iter()
        .all(|u| u.state() == IncomingState::Received
            && u.local_path().is_none()));
    assert_eq!(file_count(&download_dir), 0);

    store.heal();
    assert!(executor.download(&mut batch).await.unwrap().is_advanced());
    assert_eq!(file_count(&download_dir), 3);
}

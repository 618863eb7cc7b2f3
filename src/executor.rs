//! Runs one phase of a batch with one task per unit.
//!
//! A phase either advances every unit of the batch or none of them: when
//! a single unit fails, the units that did succeed are rolled back to the
//! state the batch had before the phase started.

use std::{
    future::Future,
    path::Path,
    sync::Arc,
    time::{Duration, Instant},
};

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;

use crate::{
    batch::{IncomingBatch, OutgoingBatch},
    config::EngineConfig,
    descriptor::BatchDescriptor,
    endpoint::{Direction, Outcome, TransferLogEntry},
    storage::{BatchRegistry, BlobStore},
    unit::{extension_for, IncomingState, OutgoingState, Unit, UnitId},
    DropError, Result,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PhaseOutcome {
    Advanced,
    UnitsFailed { failed: Vec<UnitId> },
    PublishFailed(String),
}

#[derive(Debug)]
pub struct PhaseReport {
    pub outcome: PhaseOutcome,
    /// One entry per attempted unit for the upload and download phases.
    pub entries: Vec<TransferLogEntry>,
}

impl PhaseReport {
    pub fn is_advanced(&self) -> bool {
        self.outcome == PhaseOutcome::Advanced
    }

    fn new(outcome: PhaseOutcome, entries: Vec<TransferLogEntry>) -> Self {
        Self { outcome, entries }
    }
}

struct UnitResult<T> {
    unit_id: UnitId,
    result: Result<T>,
    elapsed: Duration,
}

pub struct BatchExecutor<S, R> {
    store: Arc<S>,
    registry: Arc<R>,
    config: EngineConfig,
}

impl<S: BlobStore, R: BatchRegistry> BatchExecutor<S, R> {
    pub fn new(
        store: Arc<S>,
        registry: Arc<R>,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            registry,
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Copies every picked file into the staging directory.
    pub async fn load(&self, batch: &mut OutgoingBatch) -> Result<PhaseReport> {
        require_all(batch.units(), OutgoingState::Picked, batch.id(), "load")?;
        log::info!("loading batch {} ({} units)", batch.id(), batch.len());

        let requests = batch
            .units_mut()
            .iter_mut()
            .map(|unit| unit.begin_load())
            .collect::<Result<Vec<_>>>()?;

        let staging_dir = self.config.staging_dir.clone();
        let quality = self.config.jpeg_quality;
        let jobs = requests
            .into_iter()
            .map(|request| {
                let staging_dir = staging_dir.clone();
                let unit_id = request.unit_id;
                let job = async move {
                    let content = tokio::task::spawn_blocking(move || {
                        request.run(&staging_dir, quality)
                    })
                    .await??;
                    Ok::<_, DropError>(content)
                };
                (unit_id, job)
            })
            .collect();

        let mut failed = Vec::new();
        for done in self.run_all(jobs).await {
            let unit = batch
                .unit_mut(done.unit_id)
                .ok_or_else(|| unknown_unit(done.unit_id))?;
            match done.result {
                Ok(content) => unit.complete_load(content)?,
                Err(e) => {
                    log::warn!("failed to load unit {}: {}", done.unit_id, e);
                    unit.fail_load()?;
                    failed.push(done.unit_id);
                }
            }
        }

        if !failed.is_empty() {
            log::warn!(
                "load of batch {} failed for {} of {} units, rolling back",
                batch.id(),
                failed.len(),
                batch.len()
            );
            batch.units_mut().iter_mut().for_each(|u| u.rollback_load());
            return Ok(PhaseReport::new(
                PhaseOutcome::UnitsFailed { failed },
                Vec::new(),
            ));
        }

        log::info!("batch {} loaded, {} bytes", batch.id(), batch.total_size());
        Ok(PhaseReport::new(PhaseOutcome::Advanced, Vec::new()))
    }

    /// Uploads every local copy and then publishes the batch descriptor.
    pub async fn stage(
        &self,
        batch: &mut OutgoingBatch,
    ) -> Result<PhaseReport> {
        require_all(batch.units(), OutgoingState::Loaded, batch.id(), "stage")?;
        log::info!("staging batch {} ({} units)", batch.id(), batch.len());

        let batch_id = batch.id().to_owned();
        for unit in batch.units_mut() {
            if unit.remote_path().is_none() {
                let remote_path = format!(
                    "{}/{}{}",
                    batch_id,
                    unit.id(),
                    extension_for(unit.content_type())
                );
                unit.assign_remote_path(remote_path)?;
            }
        }

        let requests = batch
            .units_mut()
            .iter_mut()
            .map(|unit| unit.begin_stage())
            .collect::<Result<Vec<_>>>()?;

        let jobs = requests
            .into_iter()
            .map(|request| {
                let store = self.store.clone();
                let unit_id = request.unit_id;
                let job = async move {
                    let bytes = tokio::fs::read(&request.local_path).await?;
                    let len = bytes.len() as u64;
                    log::trace!(
                        "uploading {} bytes to {}",
                        len,
                        request.remote_path
                    );
                    store.upload(bytes, request.remote_path).await?;
                    Ok::<_, DropError>(len)
                };
                (unit_id, job)
            })
            .collect();

        let mut failed = Vec::new();
        let mut entries = Vec::new();
        for done in self.run_all(jobs).await {
            let unit = batch
                .unit_mut(done.unit_id)
                .ok_or_else(|| unknown_unit(done.unit_id))?;
            let (outcome, bytes) = match done.result {
                Ok(len) => {
                    unit.complete_stage()?;
                    (Outcome::Success, len)
                }
                Err(e) => {
                    log::warn!("failed to stage unit {}: {}", done.unit_id, e);
                    unit.fail_stage()?;
                    failed.push(done.unit_id);
                    (Outcome::Failure, 0)
                }
            };
            entries.push(TransferLogEntry::new(
                Direction::Upload,
                done.unit_id,
                unit.label(),
                outcome,
                bytes,
                done.elapsed,
            ));
        }

        if !failed.is_empty() {
            log::warn!(
                "stage of batch {} failed for {} of {} units, rolling back",
                batch.id(),
                failed.len(),
                batch.len()
            );
            batch.units_mut().iter_mut().for_each(|u| u.rollback_stage());
            return Ok(PhaseReport::new(
                PhaseOutcome::UnitsFailed { failed },
                entries,
            ));
        }

        let descriptor = BatchDescriptor::from_batch(batch)?;
        match self.registry.publish(descriptor).await {
            Ok(reference) => {
                log::info!("batch {} published as {}", batch.id(), reference);
                batch.set_reference(Some(reference));
            }
            Err(e) => {
                log::error!("failed to publish batch {}: {}", batch.id(), e);
                batch.units_mut().iter_mut().for_each(|u| u.rollback_stage());
                return Ok(PhaseReport::new(
                    PhaseOutcome::PublishFailed(e.to_string()),
                    entries,
                ));
            }
        }

        if self.config.release_after_stage {
            for unit in batch.units_mut() {
                if let Err(e) = unit.release_local() {
                    log::warn!(
                        "failed to release local copy of unit {}: {}",
                        unit.id(),
                        e
                    );
                }
            }
        }

        Ok(PhaseReport::new(PhaseOutcome::Advanced, entries))
    }

    /// Pulls every blob of a received batch into the download directory.
    pub async fn download(
        &self,
        batch: &mut IncomingBatch,
    ) -> Result<PhaseReport> {
        require_all(
            batch.units(),
            IncomingState::Received,
            batch.id(),
            "download",
        )?;
        log::info!("downloading batch {} ({} units)", batch.id(), batch.len());

        let requests = batch
            .units_mut()
            .iter_mut()
            .map(|unit| unit.begin_download())
            .collect::<Result<Vec<_>>>()?;

        let download_dir = self.config.download_dir.clone();
        let jobs = requests
            .into_iter()
            .map(|request| {
                let store = self.store.clone();
                let download_dir = download_dir.clone();
                let unit_id = request.unit_id;
                let target = request.target_in(&download_dir);
                let job = async move {
                    let bytes = store.download(request.remote_path).await?;
                    tokio::fs::create_dir_all(&download_dir).await?;
                    write_file(&target, &bytes).await?;
                    Ok::<_, DropError>((target, bytes.len() as u64))
                };
                (unit_id, job)
            })
            .collect();

        let mut failed = Vec::new();
        let mut entries = Vec::new();
        for done in self.run_all(jobs).await {
            let unit = batch
                .unit_mut(done.unit_id)
                .ok_or_else(|| unknown_unit(done.unit_id))?;
            let (outcome, bytes) = match done.result {
                Ok((path, len)) => {
                    unit.complete_download(path)?;
                    (Outcome::Success, len)
                }
                Err(e) => {
                    log::warn!(
                        "failed to download unit {}: {}",
                        done.unit_id,
                        e
                    );
                    unit.fail_download()?;
                    failed.push(done.unit_id);
                    (Outcome::Failure, 0)
                }
            };
            entries.push(TransferLogEntry::new(
                Direction::Download,
                done.unit_id,
                unit.label(),
                outcome,
                bytes,
                done.elapsed,
            ));
        }

        if !failed.is_empty() {
            log::warn!(
                "download of batch {} failed for {} of {} units, rolling back",
                batch.id(),
                failed.len(),
                batch.len()
            );
            batch
                .units_mut()
                .iter_mut()
                .for_each(|u| u.rollback_download());
            return Ok(PhaseReport::new(
                PhaseOutcome::UnitsFailed { failed },
                entries,
            ));
        }

        log::info!("batch {} downloaded", batch.id());
        Ok(PhaseReport::new(PhaseOutcome::Advanced, entries))
    }

    /// Spawns every job, bounded by `max_concurrent_units`, and waits for
    /// all of them. Errors and panics come back as values.
    async fn run_all<T, F>(&self, jobs: Vec<(UnitId, F)>) -> Vec<UnitResult<T>>
    where
        T: Send + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_units));
        let mut tasks = FuturesUnordered::new();

        for (unit_id, job) in jobs {
            let semaphore = semaphore.clone();
            let handle = tokio::spawn(async move {
                match semaphore.acquire_owned().await {
                    Ok(_permit) => {
                        let started = Instant::now();
                        let result = job.await;
                        (result, started.elapsed())
                    }
                    Err(e) => (Err(DropError::Task(e.to_string())), Duration::ZERO),
                }
            });
            tasks.push(async move { (unit_id, handle.await) });
        }

        let mut results = Vec::with_capacity(tasks.len());
        while let Some((unit_id, joined)) = tasks.next().await {
            let (result, elapsed) = match joined {
                Ok(done) => done,
                Err(e) => {
                    log::error!("task for unit {} did not finish: {}", unit_id, e);
                    (Err(e.into()), Duration::ZERO)
                }
            };
            results.push(UnitResult {
                unit_id,
                result,
                elapsed,
            });
        }
        results
    }
}

fn require_all<U: Unit>(
    units: &[U],
    expected: U::State,
    batch_id: &str,
    operation: &str,
) -> Result<()> {
    if let Some(unit) = units.iter().find(|u| u.state() != expected) {
        log::warn!(
            "cannot {} batch {}: unit {} is {:?}, expected {:?}",
            operation,
            batch_id,
            unit.id(),
            unit.state(),
            expected
        );
        return Err(DropError::StateConflict(format!(
            "cannot {} batch {}: unit {} is {:?}",
            operation,
            batch_id,
            unit.id(),
            unit.state()
        )));
    }
    Ok(())
}

fn unknown_unit(unit_id: UnitId) -> DropError {
    DropError::Task(format!("result for unknown unit {}", unit_id))
}

async fn write_file(target: &Path, bytes: &[u8]) -> Result<()> {
    if let Err(e) = tokio::fs::write(target, bytes).await {
        if let Err(cleanup) = tokio::fs::remove_file(target).await {
            log::trace!(
                "no partial file to discard at {}: {}",
                target.display(),
                cleanup
            );
        }
        return Err(e.into());
    }
    Ok(())
}

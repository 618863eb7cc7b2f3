use std::{
    fs,
    path::{Path, PathBuf},
};

use uuid::Uuid;

use super::{content_type_for, extension_for, normalize, Unit, UnitId};
use crate::{DropError, Result};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OutgoingState {
    #[default]
    Picked,
    Loading,
    Loaded,
    Staging,
    Staged,
}

impl OutgoingState {
    /// Size may only change before any byte has left the device.
    pub fn is_pre_transfer(self) -> bool {
        self <= OutgoingState::Loaded
    }
}

/// Result of loading a picked file into a local copy owned by the engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoadedContent {
    pub path: PathBuf,
    pub size: u64,
}

/// Inputs of the load step, detached from the unit so it can run on a
/// background task.
#[derive(Clone, Debug)]
pub struct LoadRequest {
    pub unit_id: UnitId,
    pub source: PathBuf,
    pub content_type: String,
}

impl LoadRequest {
    /// Reads the source, normalizes it and writes the result into
    /// `staging_dir`. Partial output is removed on failure.
    pub fn run(&self, staging_dir: &Path, jpeg_quality: u8) -> Result<LoadedContent> {
        let target = staging_dir.join(format!(
            "{}{}",
            self.unit_id,
            extension_for(&self.content_type)
        ));

        let result = self.write_to(&target, staging_dir, jpeg_quality);
        if result.is_err() && target.exists() {
            if let Err(e) = fs::remove_file(&target) {
                log::error!(
                    "failed to discard partial copy {}: {}",
                    target.display(),
                    e
                );
            }
        }
        result
    }

    fn write_to(
        &self,
        target: &Path,
        staging_dir: &Path,
        jpeg_quality: u8,
    ) -> Result<LoadedContent> {
        let bytes = fs::read(&self.source)?;
        let bytes = normalize(&self.content_type, bytes, jpeg_quality)?;
        fs::create_dir_all(staging_dir)?;
        fs::write(target, &bytes)?;
        Ok(LoadedContent {
            path: target.to_path_buf(),
            size: bytes.len() as u64,
        })
    }
}

/// Inputs of the upload step.
#[derive(Clone, Debug)]
pub struct StageRequest {
    pub unit_id: UnitId,
    pub local_path: PathBuf,
    pub remote_path: String,
}

#[derive(Debug)]
pub struct OutgoingUnit {
    id: UnitId,
    source: PathBuf,
    local_path: Option<PathBuf>,
    remote_path: Option<String>,
    content_type: String,
    size: u64,
    state: OutgoingState,
}

impl OutgoingUnit {
    pub fn new<P: Into<PathBuf>>(source: P, content_type: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            source: source.into(),
            local_path: None,
            remote_path: None,
            content_type: content_type.to_owned(),
            size: 0,
            state: OutgoingState::Picked,
        }
    }

    /// Picks a file, guessing its content type from the extension.
    pub fn from_path<P: Into<PathBuf>>(source: P) -> Self {
        let source = source.into();
        let content_type = content_type_for(&source);
        Self::new(source, content_type)
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    /// File name announced to the peer.
    pub fn name(&self) -> String {
        self.source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.id.to_string())
    }

    pub fn local_path(&self) -> Option<&Path> {
        self.local_path.as_deref()
    }

    pub fn set_size(&mut self, size: u64) -> Result<()> {
        if !self.state.is_pre_transfer() {
            return Err(self.conflict("set size"));
        }
        self.size = size;
        Ok(())
    }

    pub fn begin_load(&mut self) -> Result<LoadRequest> {
        if self.state != OutgoingState::Picked {
            return Err(self.conflict("load"));
        }
        self.state = OutgoingState::Loading;
        Ok(LoadRequest {
            unit_id: self.id,
            source: self.source.clone(),
            content_type: self.content_type.clone(),
        })
    }

    pub fn complete_load(&mut self, content: LoadedContent) -> Result<()> {
        if self.state != OutgoingState::Loading {
            return Err(self.conflict("complete load"));
        }
        self.local_path = Some(content.path);
        self.size = content.size;
        self.state = OutgoingState::Loaded;
        Ok(())
    }

    pub fn fail_load(&mut self) -> Result<()> {
        if self.state != OutgoingState::Loading {
            return Err(self.conflict("fail load"));
        }
        self.local_path = None;
        self.state = OutgoingState::Picked;
        Ok(())
    }

    /// The remote path is assigned once and never changes afterwards, so
    /// a retried upload overwrites the same blob.
    pub fn assign_remote_path(&mut self, remote_path: String) -> Result<()> {
        if let Some(current) = &self.remote_path {
            return Err(DropError::StateConflict(format!(
                "unit {} already has remote path {}",
                self.id, current
            )));
        }
        self.remote_path = Some(remote_path);
        Ok(())
    }

    pub fn begin_stage(&mut self) -> Result<StageRequest> {
        if self.state != OutgoingState::Loaded {
            return Err(self.conflict("stage"));
        }
        let (Some(local_path), Some(remote_path)) =
            (&self.local_path, &self.remote_path)
        else {
            return Err(DropError::StateConflict(format!(
                "unit {} is missing a local copy or a remote path",
                self.id
            )));
        };
        let request = StageRequest {
            unit_id: self.id,
            local_path: local_path.clone(),
            remote_path: remote_path.clone(),
        };
        self.state = OutgoingState::Staging;
        Ok(request)
    }

    pub fn complete_stage(&mut self) -> Result<()> {
        if self.state != OutgoingState::Staging {
            return Err(self.conflict("complete stage"));
        }
        self.state = OutgoingState::Staged;
        Ok(())
    }

    pub fn fail_stage(&mut self) -> Result<()> {
        if self.state != OutgoingState::Staging {
            return Err(self.conflict("fail stage"));
        }
        self.state = OutgoingState::Loaded;
        Ok(())
    }

    /// Deletes the local copy once the unit is staged.
    pub fn release_local(&mut self) -> Result<()> {
        if self.state != OutgoingState::Staged {
            return Err(self.conflict("release local copy"));
        }
        if let Some(path) = self.local_path.take() {
            fs::remove_file(&path)?;
            log::debug!("released local copy {}", path.display());
        }
        Ok(())
    }

    /// Batch rollback of the stage phase.
    pub(crate) fn rollback_stage(&mut self) {
        if matches!(
            self.state,
            OutgoingState::Staging | OutgoingState::Staged
        ) {
            self.state = OutgoingState::Loaded;
        }
    }

    /// Batch rollback of the load phase; the local copy is discarded.
    pub(crate) fn rollback_load(&mut self) {
        if self.state > OutgoingState::Loaded {
            self.rollback_stage();
        }
        self.discard_local();
        self.state = OutgoingState::Picked;
    }

    /// Deletes the engine-owned local copy, if any, without touching the
    /// unit state.
    pub(crate) fn discard_local(&mut self) {
        if let Some(path) = self.local_path.take() {
            if let Err(e) = fs::remove_file(&path) {
                log::error!(
                    "failed to discard local copy {}: {}",
                    path.display(),
                    e
                );
            }
        }
    }

    fn conflict(&self, operation: &str) -> DropError {
        log::warn!(
            "cannot {} unit {} in state {:?}",
            operation,
            self.id,
            self.state
        );
        DropError::StateConflict(format!(
            "cannot {} unit {} in state {:?}",
            operation, self.id, self.state
        ))
    }
}

impl Unit for OutgoingUnit {
    type State = OutgoingState;

    fn id(&self) -> UnitId {
        self.id
    }

    fn content_type(&self) -> &str {
        &self.content_type
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn remote_path(&self) -> Option<&str> {
        self.remote_path.as_deref()
    }

    fn state(&self) -> OutgoingState {
        self.state
    }

    fn label(&self) -> String {
        self.remote_path.clone().unwrap_or_else(|| self.name())
    }
}

use std::{
    fs,
    path::{Path, PathBuf},
};

use uuid::Uuid;

use super::{content_type_for, extension_for, Unit, UnitId};
use crate::{codec::WireRecord, DropError, Result};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IncomingState {
    #[default]
    Received,
    Downloading,
    Downloaded,
}

/// Inputs of the download step.
#[derive(Clone, Debug)]
pub struct DownloadRequest {
    pub unit_id: UnitId,
    pub remote_path: String,
    pub content_type: String,
}

impl DownloadRequest {
    /// Local file the downloaded blob is written to.
    pub fn target_in(&self, download_dir: &Path) -> PathBuf {
        download_dir.join(format!(
            "{}{}",
            self.unit_id,
            extension_for(&self.content_type)
        ))
    }
}

#[derive(Debug)]
pub struct IncomingUnit {
    id: UnitId,
    name: String,
    remote_path: String,
    content_type: String,
    size: u64,
    local_path: Option<PathBuf>,
    state: IncomingState,
}

impl IncomingUnit {
    pub fn new(
        name: impl Into<String>,
        remote_path: impl Into<String>,
        content_type: impl Into<String>,
        size: u64,
    ) -> Self {
        Self::with_id(Uuid::new_v4(), name, remote_path, content_type, size)
    }

    pub fn with_id(
        id: UnitId,
        name: impl Into<String>,
        remote_path: impl Into<String>,
        content_type: impl Into<String>,
        size: u64,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            remote_path: remote_path.into(),
            content_type: content_type.into(),
            size,
            local_path: None,
            state: IncomingState::Received,
        }
    }

    pub fn from_record(record: WireRecord) -> Self {
        let content_type = content_type_for(&record.name);
        Self::new(record.name, record.url, content_type, record.size)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn local_path(&self) -> Option<&Path> {
        self.local_path.as_deref()
    }

    pub fn set_size(&mut self, size: u64) -> Result<()> {
        if self.state != IncomingState::Received {
            return Err(self.conflict("set size"));
        }
        self.size = size;
        Ok(())
    }

    pub fn begin_download(&mut self) -> Result<DownloadRequest> {
        if self.state != IncomingState::Received {
            return Err(self.conflict("download"));
        }
        self.state = IncomingState::Downloading;
        Ok(DownloadRequest {
            unit_id: self.id,
            remote_path: self.remote_path.clone(),
            content_type: self.content_type.clone(),
        })
    }

    pub fn complete_download(&mut self, path: PathBuf) -> Result<()> {
        if self.state != IncomingState::Downloading {
            return Err(self.conflict("complete download"));
        }
        self.local_path = Some(path);
        self.state = IncomingState::Downloaded;
        Ok(())
    }

    pub fn fail_download(&mut self) -> Result<()> {
        if self.state != IncomingState::Downloading {
            return Err(self.conflict("fail download"));
        }
        self.state = IncomingState::Received;
        Ok(())
    }

    /// Batch rollback of the download phase; a materialized file is
    /// removed again.
    pub(crate) fn rollback_download(&mut self) {
        if let Some(path) = self.local_path.take() {
            if let Err(e) = fs::remove_file(&path) {
                log::error!(
                    "failed to discard downloaded file {}: {}",
                    path.display(),
                    e
                );
            }
        }
        self.state = IncomingState::Received;
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

impl Unit for IncomingUnit {
    type State = IncomingState;

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
        Some(&self.remote_path)
    }

    fn state(&self) -> IncomingState {
        self.state
    }

    fn label(&self) -> String {
        self.remote_path.clone()
    }
}

use std::str::Utf8Error;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DropError>;

#[derive(Error, Debug)]
pub enum DropError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Collaborator error: {0}")]
    Collaborator(String),
    #[error("Decoding error: {0}")]
    Decode(String),
    #[error("Encoding error: {0}")]
    Encode(String),
    #[error("State conflict: {0}")]
    StateConflict(String),
    #[error("Endpoint not found: {0}")]
    EndpointNotFound(String),
    #[error("Batch not found: {0}")]
    BatchNotFound(String),
    #[error("Invalid batch: {0}")]
    InvalidBatch(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Task error: {0}")]
    Task(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DropError {
    pub fn is_state_conflict(&self) -> bool {
        matches!(self, DropError::StateConflict(_))
    }
}

impl From<Utf8Error> for DropError {
    fn from(e: Utf8Error) -> Self {
        Self::Decode(e.to_string())
    }
}

impl From<serde_json::Error> for DropError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

impl From<toml::de::Error> for DropError {
    fn from(e: toml::de::Error) -> Self {
        Self::Config(e.to_string())
    }
}

impl From<image::ImageError> for DropError {
    fn from(e: image::ImageError) -> Self {
        Self::Encode(e.to_string())
    }
}

impl From<tokio::task::JoinError> for DropError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Task(e.to_string())
    }
}

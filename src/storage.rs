use std::future::Future;

use crate::{descriptor::BatchDescriptor, Result};

/// Durable blob store the outgoing side stages files into and the
/// incoming side pulls them from. Each call is a single attempt; retries
/// are decided by the batch executor's caller.
pub trait BlobStore: Send + Sync + 'static {
    fn upload(
        &self,
        bytes: Vec<u8>,
        remote_path: String,
    ) -> impl Future<Output = Result<()>> + Send;

    fn download(
        &self,
        remote_path: String,
    ) -> impl Future<Output = Result<Vec<u8>>> + Send;
}

/// Metadata registry announcing uploaded batches. Publishing is what
/// triggers the remote pull, so it is the last step of staging.
pub trait BatchRegistry: Send + Sync + 'static {
    /// Returns a registry reference for the published batch.
    fn publish(
        &self,
        descriptor: BatchDescriptor,
    ) -> impl Future<Output = Result<String>> + Send;
}

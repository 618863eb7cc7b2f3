//! Orchestration engine for moving batches of files between two peers,
//! either over a direct peer channel or through a blob store and a
//! metadata registry.

pub mod batch;
pub mod codec;
pub mod config;
pub mod descriptor;
pub mod endpoint;
mod errors;
pub mod executor;
pub mod session;
pub mod storage;
pub mod transport;
pub mod unit;

pub use batch::{Batch, BatchBuilder, IncomingBatch, OutgoingBatch};
pub use config::EngineConfig;
pub use descriptor::{BatchDescriptor, UnitDescriptor};
pub use endpoint::{
    Direction, Endpoint, EndpointState, EndpointSubscriber, EndpointTable,
    Outcome, TransferLog, TransferLogEntry,
};
pub use errors::{DropError, Result};
pub use executor::{BatchExecutor, PhaseOutcome, PhaseReport};
pub use session::Session;
pub use storage::{BatchRegistry, BlobStore};
pub use transport::{
    Medium, PayloadStatus, Registration, Transport, TransportEvent,
    TransportListener,
};

/// Sets up `env_logger` once; later calls are no-ops.
pub fn initialize() {
    let _ = env_logger::builder().is_test(true).try_init();
}

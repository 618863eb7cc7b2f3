//! Single owner of the endpoint table.
//!
//! Transport notifications are queued and applied one at a time by the
//! session, so endpoint state is never mutated concurrently. Batch phases
//! run on the executor's tasks and report back here.

use std::{
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver};
use uuid::Uuid;

use crate::{
    batch::{BatchBuilder, IncomingBatch, OutgoingBatch},
    config::EngineConfig,
    descriptor::BatchDescriptor,
    endpoint::{
        Direction, EndpointState, EndpointSubscriber, EndpointTable,
        InFlightSend, Outcome, TransferLogEntry,
    },
    executor::{BatchExecutor, PhaseReport},
    storage::{BatchRegistry, BlobStore},
    transport::{
        PayloadStatus, QueueListener, Registration, Transport, TransportEvent,
    },
    unit::{OutgoingState, OutgoingUnit, Unit},
    DropError, Result,
};

#[derive(Clone, Copy, Debug)]
enum OutgoingPhase {
    Load,
    Stage,
}

pub struct Session<T: Transport, S: BlobStore, R: BatchRegistry> {
    transport: Arc<T>,
    executor: BatchExecutor<S, R>,
    endpoints: EndpointTable,
    events: UnboundedReceiver<TransportEvent>,
    registration: Registration<T>,
}

impl<T: Transport, S: BlobStore, R: BatchRegistry> Session<T, S, R> {
    pub fn new(
        transport: Arc<T>,
        store: Arc<S>,
        registry: Arc<R>,
        config: EngineConfig,
    ) -> Result<Self> {
        let executor = BatchExecutor::new(store, registry, config)?;
        let (queue, events) = mpsc::unbounded_channel();
        let listener = Arc::new(QueueListener::new(
            format!("session-{}", Uuid::new_v4()),
            queue,
        ));
        let registration = Registration::new(transport.clone(), listener);
        log::info!(
            "session started for {} (listener {})",
            executor.config().local_name,
            registration.listener_id()
        );

        Ok(Self {
            transport,
            executor,
            endpoints: EndpointTable::new(),
            events,
            registration,
        })
    }

    pub fn endpoints(&self) -> &EndpointTable {
        &self.endpoints
    }

    pub fn config(&self) -> &EngineConfig {
        self.executor.config()
    }

    pub fn listener_id(&self) -> &str {
        self.registration.listener_id()
    }

    pub fn subscribe(&mut self, subscriber: Arc<dyn EndpointSubscriber>) {
        self.endpoints.subscribe(subscriber);
    }

    pub fn unsubscribe(&mut self, subscriber: Arc<dyn EndpointSubscriber>) {
        self.endpoints.unsubscribe(subscriber);
    }

    pub fn select(&mut self, endpoint_id: &str) -> Result<()> {
        self.endpoints.select(endpoint_id)
    }

    pub async fn request_connection(&mut self, endpoint_id: &str) -> Result<()> {
        self.endpoints.request_connection(endpoint_id)?;
        if let Err(e) = self.transport.connect(endpoint_id).await {
            log::error!("connection request to {} failed: {}", endpoint_id, e);
            self.endpoints.connection_failed(endpoint_id)?;
            return Err(e);
        }
        Ok(())
    }

    pub async fn disconnect(&mut self, endpoint_id: &str) -> Result<()> {
        let previous = self.endpoints.begin_disconnect(endpoint_id)?;
        match self.transport.disconnect(endpoint_id).await {
            Ok(()) => self.endpoints.remove(endpoint_id),
            Err(e) => {
                log::error!("disconnect from {} failed: {}", endpoint_id, e);
                self.endpoints.abort_disconnect(endpoint_id, previous)?;
                Err(e)
            }
        }
    }

    /// Picks files for the endpoint and returns the new batch id.
    pub fn create_outgoing_batch(
        &mut self,
        endpoint_id: &str,
        sources: impl IntoIterator<Item = PathBuf>,
    ) -> Result<String> {
        let local_name = self.config().local_name.clone();
        let endpoint = self.endpoints.get_mut(endpoint_id)?;

        let mut builder = BatchBuilder::new(local_name, endpoint.name())
            .units(sources.into_iter().map(OutgoingUnit::from_path));
        if let Some(token) = endpoint.correlation_token() {
            builder = builder.correlation_token(token);
        }
        let batch = builder.build()?;
        let batch_id = batch.id().to_owned();
        log::info!(
            "created batch {} with {} units for {}",
            batch_id,
            batch.len(),
            endpoint_id
        );
        endpoint.add_outgoing(batch);
        Ok(batch_id)
    }

    pub async fn load_batch(
        &mut self,
        endpoint_id: &str,
        batch_id: &str,
    ) -> Result<PhaseReport> {
        self.run_outgoing_phase(endpoint_id, batch_id, OutgoingPhase::Load)
            .await
    }

    pub async fn stage_batch(
        &mut self,
        endpoint_id: &str,
        batch_id: &str,
    ) -> Result<PhaseReport> {
        self.run_outgoing_phase(endpoint_id, batch_id, OutgoingPhase::Stage)
            .await
    }

    /// Sends the wire encoding of a staged batch over the peer channel.
    /// The endpoint stays `Sending` until the transport reports a terminal
    /// progress status for the payload.
    pub fn send_batch(&mut self, endpoint_id: &str, batch_id: &str) -> Result<()> {
        let batch = self
            .endpoints
            .get(endpoint_id)
            .ok_or_else(|| DropError::EndpointNotFound(endpoint_id.to_owned()))?
            .outgoing_batch(batch_id)
            .ok_or_else(|| DropError::BatchNotFound(batch_id.to_owned()))?;
        if batch.state() != OutgoingState::Staged {
            log::warn!(
                "cannot send batch {} in state {:?}",
                batch_id,
                batch.state()
            );
            return Err(DropError::StateConflict(format!(
                "batch {} is {:?}, only staged batches can be sent",
                batch_id,
                batch.state()
            )));
        }
        let payload = batch.encode_wire()?;

        self.endpoints.begin_transfer(endpoint_id, Direction::Send)?;
        let started = Instant::now();
        log::debug!(
            "sending {} bytes of batch {} to {}",
            payload.len(),
            batch_id,
            endpoint_id
        );

        match self.transport.send_bytes(endpoint_id, payload) {
            Ok(()) => {
                self.endpoints.get_mut(endpoint_id)?.set_in_flight(Some(
                    InFlightSend {
                        batch_id: batch_id.to_owned(),
                        started,
                    },
                ));
                Ok(())
            }
            Err(e) => {
                log::error!("failed to send batch {}: {}", batch_id, e);
                self.endpoints.finish_transfer(endpoint_id)?;
                self.log_send(endpoint_id, batch_id, Outcome::Failure, started)?;
                Err(e)
            }
        }
    }

    /// Registers a batch announced through the metadata registry.
    pub fn receive_descriptor(
        &mut self,
        endpoint_id: &str,
        descriptor: BatchDescriptor,
    ) -> Result<String> {
        let local_name = self.config().local_name.clone();
        let endpoint = self.endpoints.get_mut(endpoint_id)?;
        if endpoint.incoming_batch(&descriptor.batch_id).is_some() {
            return Err(DropError::StateConflict(format!(
                "batch {} was already received",
                descriptor.batch_id
            )));
        }
        let batch =
            IncomingBatch::from_descriptor(descriptor, endpoint.name(), local_name)?;
        let batch_id = batch.id().to_owned();
        log::info!("received descriptor of batch {} from {}", batch_id, endpoint_id);
        endpoint.add_incoming(batch);
        Ok(batch_id)
    }

    pub async fn download_batch(
        &mut self,
        endpoint_id: &str,
        batch_id: &str,
    ) -> Result<PhaseReport> {
        let endpoint = self.endpoints.get_mut(endpoint_id)?;
        if endpoint.incoming_batch(batch_id).is_none() {
            return Err(DropError::BatchNotFound(batch_id.to_owned()));
        }
        self.endpoints
            .begin_transfer(endpoint_id, Direction::Download)?;

        let result = match self
            .endpoints
            .get_mut(endpoint_id)?
            .incoming_batch_mut(batch_id)
        {
            Some(batch) => self.executor.download(batch).await,
            None => Err(DropError::BatchNotFound(batch_id.to_owned())),
        };
        self.finish_phase(endpoint_id, result)
    }

    /// Waits for the next transport notification.
    pub async fn next_event(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }

    /// Applies every queued notification and returns how many were
    /// handled. Rejected notifications are logged and skipped.
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        loop {
            match self.events.try_recv() {
                Ok(event) => {
                    if let Err(e) = self.handle_event(event) {
                        log::warn!("transport event rejected: {}", e);
                    }
                    handled += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {
                    return handled
                }
            }
        }
    }

    pub fn handle_event(&mut self, event: TransportEvent) -> Result<()> {
        log::trace!("transport event: {:?}", event);
        match event {
            TransportEvent::EndpointFound {
                endpoint_id,
                name,
                medium,
            } => self.endpoints.discover(&endpoint_id, &name, medium),
            TransportEvent::EndpointLost { endpoint_id }
            | TransportEvent::ConnectionDisconnected { endpoint_id } => {
                self.endpoints.remove(&endpoint_id)
            }
            TransportEvent::EndpointDistanceChanged {
                endpoint_id,
                distance,
            } => {
                log::debug!("endpoint {} is now {}", endpoint_id, distance);
                Ok(())
            }
            TransportEvent::ConnectionInitiated { endpoint_id, name } => {
                self.endpoints.connection_initiated(&endpoint_id, &name)
            }
            TransportEvent::ConnectionAccepted { endpoint_id } => {
                self.endpoints.accept(&endpoint_id)
            }
            TransportEvent::ConnectionRejected { endpoint_id } => {
                self.endpoints.reject(&endpoint_id)
            }
            TransportEvent::BandwidthUpgraded {
                endpoint_id,
                medium,
            } => self.endpoints.upgrade_medium(&endpoint_id, medium),
            TransportEvent::PayloadInitiated {
                endpoint_id,
                payload_id,
                content,
            } => {
                log::debug!(
                    "holding payload {} ({} bytes) from {}",
                    payload_id,
                    content.len(),
                    endpoint_id
                );
                self.endpoints
                    .get_mut(&endpoint_id)?
                    .hold_payload(payload_id, content);
                Ok(())
            }
            TransportEvent::PayloadProgress {
                endpoint_id,
                payload_id,
                status,
                bytes_total,
                bytes_transferred,
            } => {
                if status == PayloadStatus::InProgress {
                    log::trace!(
                        "payload {}: {}/{} bytes",
                        payload_id,
                        bytes_transferred,
                        bytes_total
                    );
                    return Ok(());
                }
                self.payload_finished(&endpoint_id, payload_id, status)
            }
        }
    }

    async fn run_outgoing_phase(
        &mut self,
        endpoint_id: &str,
        batch_id: &str,
        phase: OutgoingPhase,
    ) -> Result<PhaseReport> {
        let endpoint = self.endpoints.get_mut(endpoint_id)?;
        if endpoint.outgoing_batch(batch_id).is_none() {
            return Err(DropError::BatchNotFound(batch_id.to_owned()));
        }
        self.endpoints.begin_transfer(endpoint_id, Direction::Upload)?;

        let result = match self
            .endpoints
            .get_mut(endpoint_id)?
            .outgoing_batch_mut(batch_id)
        {
            Some(batch) => match phase {
                OutgoingPhase::Load => self.executor.load(batch).await,
                OutgoingPhase::Stage => self.executor.stage(batch).await,
            },
            None => Err(DropError::BatchNotFound(batch_id.to_owned())),
        };
        self.finish_phase(endpoint_id, result)
    }

    fn finish_phase(
        &mut self,
        endpoint_id: &str,
        result: Result<PhaseReport>,
    ) -> Result<PhaseReport> {
        self.endpoints.finish_transfer(endpoint_id)?;
        let report = result?;
        self.endpoints
            .append_log(endpoint_id, report.entries.iter().cloned())?;
        Ok(report)
    }

    fn payload_finished(
        &mut self,
        endpoint_id: &str,
        payload_id: i64,
        status: PayloadStatus,
    ) -> Result<()> {
        let local_name = self.config().local_name.clone();
        let endpoint = self.endpoints.get_mut(endpoint_id)?;

        if let Some(content) = endpoint.take_payload(payload_id) {
            if status != PayloadStatus::Success {
                log::warn!(
                    "discarding payload {} from {}: {:?}",
                    payload_id,
                    endpoint_id,
                    status
                );
                return Ok(());
            }
            let batch = match IncomingBatch::from_wire(
                &content,
                endpoint.name(),
                local_name,
            ) {
                Ok(batch) => batch,
                Err(e) => {
                    log::error!(
                        "payload {} from {} is not a valid batch: {}",
                        payload_id,
                        endpoint_id,
                        e
                    );
                    let entry = TransferLogEntry::new(
                        Direction::Receive,
                        Uuid::nil(),
                        format!("payload {}", payload_id),
                        Outcome::Failure,
                        content.len() as u64,
                        Duration::ZERO,
                    );
                    self.endpoints.append_log(endpoint_id, [entry])?;
                    return Err(e);
                }
            };
            log::info!(
                "received batch {} with {} units from {}",
                batch.id(),
                batch.len(),
                endpoint_id
            );
            let entries = batch
                .units()
                .iter()
                .map(|unit| {
                    TransferLogEntry::new(
                        Direction::Receive,
                        unit.id(),
                        unit.label(),
                        Outcome::Success,
                        unit.size(),
                        Duration::ZERO,
                    )
                })
                .collect::<Vec<_>>();
            endpoint.add_incoming(batch);
            return self.endpoints.append_log(endpoint_id, entries);
        }

        let Some(send) = endpoint.in_flight().cloned() else {
            log::debug!(
                "ignoring progress of untracked payload {} from {}",
                payload_id,
                endpoint_id
            );
            return Ok(());
        };
        endpoint.set_in_flight(None);
        if self.endpoints.state(endpoint_id)? == EndpointState::Sending {
            self.endpoints.finish_transfer(endpoint_id)?;
        }

        let outcome = match status {
            PayloadStatus::Success => Outcome::Success,
            PayloadStatus::Canceled => Outcome::Canceled,
            PayloadStatus::Failure | PayloadStatus::InProgress => {
                Outcome::Failure
            }
        };
        self.log_send(endpoint_id, &send.batch_id, outcome, send.started)?;
        if outcome == Outcome::Success {
            if let Some(batch) = self
                .endpoints
                .get_mut(endpoint_id)?
                .release_outgoing(&send.batch_id)
            {
                log::info!("batch {} delivered to {}", batch.id(), endpoint_id);
            }
        }
        Ok(())
    }

    fn log_send(
        &mut self,
        endpoint_id: &str,
        batch_id: &str,
        outcome: Outcome,
        started: Instant,
    ) -> Result<()> {
        let elapsed = started.elapsed();
        let entries = self
            .endpoints
            .get(endpoint_id)
            .and_then(|e| e.outgoing_batch(batch_id))
            .map(|batch| send_entries(batch, outcome, elapsed))
            .unwrap_or_default();
        self.endpoints.append_log(endpoint_id, entries)
    }
}

fn send_entries(
    batch: &OutgoingBatch,
    outcome: Outcome,
    elapsed: Duration,
) -> Vec<TransferLogEntry> {
    batch
        .units()
        .iter()
        .map(|unit| {
            let bytes = if outcome == Outcome::Success {
                unit.size()
            } else {
                0
            };
            TransferLogEntry::new(
                Direction::Send,
                unit.id(),
                unit.label(),
                outcome,
                bytes,
                elapsed,
            )
        })
        .collect()
}

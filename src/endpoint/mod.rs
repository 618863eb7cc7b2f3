//! Remote peers, their connection state and everything they own.

mod history;
mod table;

use std::{collections::HashMap, time::Instant};

pub use history::{Direction, Outcome, TransferLog, TransferLogEntry};
pub use table::EndpointTable;

use crate::{
    batch::{IncomingBatch, OutgoingBatch},
    transport::Medium,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EndpointState {
    Discovered,
    Pending,
    Connected,
    Sending,
    Receiving,
    Disconnecting,
    Removed,
}

impl EndpointState {
    pub fn is_connected(self) -> bool {
        matches!(
            self,
            EndpointState::Connected
                | EndpointState::Sending
                | EndpointState::Receiving
        )
    }
}

pub trait EndpointSubscriber: Send + Sync {
    fn get_id(&self) -> String;
    fn notify_state_changed(&self, event: EndpointStateChangedEvent);
    fn notify_transfer_logged(&self, event: TransferLoggedEvent);
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EndpointStateChangedEvent {
    pub endpoint_id: String,
    pub previous: Option<EndpointState>,
    pub current: EndpointState,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferLoggedEvent {
    pub endpoint_id: String,
    pub entry: TransferLogEntry,
}

/// Direct-channel send waiting for its terminal progress update.
#[derive(Clone, Debug)]
pub(crate) struct InFlightSend {
    pub batch_id: String,
    pub started: Instant,
}

#[derive(Debug)]
pub struct Endpoint {
    id: String,
    name: String,
    state: EndpointState,
    medium: Medium,
    is_incoming: bool,
    correlation_token: Option<String>,
    outgoing: Vec<OutgoingBatch>,
    incoming: Vec<IncomingBatch>,
    log: TransferLog,
    in_flight: Option<InFlightSend>,
    pending_payloads: HashMap<i64, Vec<u8>>,
}

impl Endpoint {
    fn new(
        id: String,
        name: String,
        state: EndpointState,
        medium: Medium,
        is_incoming: bool,
    ) -> Self {
        Self {
            id,
            name,
            state,
            medium,
            is_incoming,
            correlation_token: None,
            outgoing: Vec::new(),
            incoming: Vec::new(),
            log: TransferLog::default(),
            in_flight: None,
            pending_payloads: HashMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> EndpointState {
        self.state
    }

    pub fn medium(&self) -> Medium {
        self.medium
    }

    /// Whether the remote side initiated the connection.
    pub fn is_incoming(&self) -> bool {
        self.is_incoming
    }

    pub fn correlation_token(&self) -> Option<&str> {
        self.correlation_token.as_deref()
    }

    pub fn outgoing_batches(&self) -> &[OutgoingBatch] {
        &self.outgoing
    }

    pub fn incoming_batches(&self) -> &[IncomingBatch] {
        &self.incoming
    }

    pub fn outgoing_batch(&self, batch_id: &str) -> Option<&OutgoingBatch> {
        self.outgoing.iter().find(|b| b.id() == batch_id)
    }

    pub fn incoming_batch(&self, batch_id: &str) -> Option<&IncomingBatch> {
        self.incoming.iter().find(|b| b.id() == batch_id)
    }

    pub fn log(&self) -> &TransferLog {
        &self.log
    }

    pub(crate) fn outgoing_batch_mut(
        &mut self,
        batch_id: &str,
    ) -> Option<&mut OutgoingBatch> {
        self.outgoing.iter_mut().find(|b| b.id() == batch_id)
    }

    pub(crate) fn incoming_batch_mut(
        &mut self,
        batch_id: &str,
    ) -> Option<&mut IncomingBatch> {
        self.incoming.iter_mut().find(|b| b.id() == batch_id)
    }

    pub(crate) fn add_outgoing(&mut self, batch: OutgoingBatch) {
        self.outgoing.push(batch);
    }

    pub(crate) fn add_incoming(&mut self, batch: IncomingBatch) {
        self.incoming.push(batch);
    }

    pub(crate) fn release_outgoing(
        &mut self,
        batch_id: &str,
    ) -> Option<OutgoingBatch> {
        let index = self.outgoing.iter().position(|b| b.id() == batch_id)?;
        Some(self.outgoing.remove(index))
    }

    pub(crate) fn in_flight(&self) -> Option<&InFlightSend> {
        self.in_flight.as_ref()
    }

    pub(crate) fn set_in_flight(&mut self, send: Option<InFlightSend>) {
        self.in_flight = send;
    }

    pub(crate) fn hold_payload(&mut self, payload_id: i64, content: Vec<u8>) {
        self.pending_payloads.insert(payload_id, content);
    }

    pub(crate) fn take_payload(&mut self, payload_id: i64) -> Option<Vec<u8>> {
        self.pending_payloads.remove(&payload_id)
    }

    pub fn has_pending_payload(&self, payload_id: i64) -> bool {
        self.pending_payloads.contains_key(&payload_id)
    }

    /// Drops everything the endpoint owns, including the local copies of
    /// its outgoing units.
    fn clear(&mut self) {
        for batch in &mut self.outgoing {
            batch.units_mut().iter_mut().for_each(|u| u.discard_local());
        }
        self.outgoing.clear();
        self.incoming.clear();
        self.log.clear();
        self.in_flight = None;
        self.pending_payloads.clear();
    }
}

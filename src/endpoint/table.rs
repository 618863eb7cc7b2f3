use std::{collections::HashMap, sync::Arc};

use super::{
    Direction, Endpoint, EndpointState, EndpointStateChangedEvent,
    EndpointSubscriber, TransferLogEntry, TransferLoggedEvent,
};
use crate::{transport::Medium, DropError, Result};

/// Every endpoint known to the local device, in discovery order.
///
/// All connection state changes go through this table. A transition that
/// is not legal from the current state is rejected and leaves the
/// endpoint untouched.
#[derive(Default)]
pub struct EndpointTable {
    endpoints: Vec<Endpoint>,
    selected: Option<String>,
    subscribers: HashMap<String, Arc<dyn EndpointSubscriber>>,
}

impl EndpointTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, subscriber: Arc<dyn EndpointSubscriber>) {
        self.subscribers.insert(subscriber.get_id(), subscriber);
    }

    pub fn unsubscribe(&mut self, subscriber: Arc<dyn EndpointSubscriber>) {
        self.subscribers.remove(&subscriber.get_id());
    }

    pub fn discover(
        &mut self,
        id: &str,
        name: &str,
        medium: Medium,
    ) -> Result<()> {
        if self.position(id).is_some() {
            log::warn!("endpoint {} was already discovered", id);
            return Err(DropError::StateConflict(format!(
                "endpoint {} already exists",
                id
            )));
        }
        log::info!("discovered endpoint {} ({}) over {}", id, name, medium);
        self.endpoints.push(Endpoint::new(
            id.to_owned(),
            name.to_owned(),
            EndpointState::Discovered,
            medium,
            false,
        ));
        self.notify_state(id, None, EndpointState::Discovered);
        Ok(())
    }

    pub fn request_connection(&mut self, id: &str) -> Result<()> {
        self.transition(
            id,
            &[EndpointState::Discovered],
            EndpointState::Pending,
            "request connection",
        )
        .map(|_| ())
    }

    /// A connection handshake started, by either side. Unknown endpoints
    /// are remote initiators and get added as incoming.
    pub fn connection_initiated(&mut self, id: &str, name: &str) -> Result<()> {
        match self.position(id) {
            None => {
                if name.trim().is_empty() {
                    log::warn!("ignoring initiation from {} without a name", id);
                    return Err(DropError::Collaborator(format!(
                        "endpoint {} initiated a connection without a name",
                        id
                    )));
                }
                log::info!("incoming connection from {} ({})", id, name);
                self.endpoints.push(Endpoint::new(
                    id.to_owned(),
                    name.to_owned(),
                    EndpointState::Pending,
                    Medium::Unknown,
                    true,
                ));
                self.notify_state(id, None, EndpointState::Pending);
            }
            Some(_) => {
                self.transition(
                    id,
                    &[EndpointState::Discovered, EndpointState::Pending],
                    EndpointState::Pending,
                    "initiate connection",
                )?;
            }
        }
        self.selected = Some(id.to_owned());
        Ok(())
    }

    pub fn accept(&mut self, id: &str) -> Result<()> {
        self.transition(
            id,
            &[EndpointState::Pending],
            EndpointState::Connected,
            "accept connection",
        )
        .map(|_| ())
    }

    pub fn reject(&mut self, id: &str) -> Result<()> {
        self.abandon_pending(id, "reject connection")
    }

    pub fn connection_failed(&mut self, id: &str) -> Result<()> {
        self.abandon_pending(id, "fail connection")
    }

    /// Claims the connection for a single in-flight batch.
    pub fn begin_transfer(
        &mut self,
        id: &str,
        direction: Direction,
    ) -> Result<()> {
        let next = match direction {
            Direction::Send | Direction::Upload => EndpointState::Sending,
            Direction::Receive | Direction::Download => {
                EndpointState::Receiving
            }
        };
        self.transition(id, &[EndpointState::Connected], next, "begin transfer")
            .map(|_| ())
    }

    pub fn finish_transfer(&mut self, id: &str) -> Result<()> {
        self.transition(
            id,
            &[EndpointState::Sending, EndpointState::Receiving],
            EndpointState::Connected,
            "finish transfer",
        )
        .map(|_| ())
    }

    /// Returns the state to restore if the disconnect request fails.
    pub fn begin_disconnect(&mut self, id: &str) -> Result<EndpointState> {
        self.transition(
            id,
            &[EndpointState::Connected, EndpointState::Pending],
            EndpointState::Disconnecting,
            "disconnect",
        )
    }

    pub fn abort_disconnect(
        &mut self,
        id: &str,
        previous: EndpointState,
    ) -> Result<()> {
        if !matches!(
            previous,
            EndpointState::Connected | EndpointState::Pending
        ) {
            log::warn!(
                "cannot restore endpoint {} to {:?} after disconnect",
                id,
                previous
            );
            return Err(DropError::StateConflict(format!(
                "endpoint {id} cannot return to {previous:?} after disconnect"
            )));
        }
        self.transition(
            id,
            &[EndpointState::Disconnecting],
            previous,
            "abort disconnect",
        )
        .map(|_| ())
    }

    /// Drops the endpoint together with its batches and transfer log.
    pub fn remove(&mut self, id: &str) -> Result<()> {
        let index = self.position(id).ok_or_else(|| not_found(id))?;
        let mut endpoint = self.endpoints.remove(index);
        let previous = endpoint.state;
        endpoint.clear();
        endpoint.state = EndpointState::Removed;
        log::info!("removed endpoint {} (was {:?})", id, previous);

        if self.selected.as_deref() == Some(id) {
            self.selected = self.endpoints.first().map(|e| e.id.clone());
        }
        self.notify_state(id, Some(previous), EndpointState::Removed);
        Ok(())
    }

    pub fn upgrade_medium(&mut self, id: &str, medium: Medium) -> Result<()> {
        let endpoint = self.get_mut(id)?;
        log::debug!("endpoint {} medium {} -> {}", id, endpoint.medium, medium);
        endpoint.medium = medium;
        Ok(())
    }

    pub fn set_correlation_token(
        &mut self,
        id: &str,
        token: impl Into<String>,
    ) -> Result<()> {
        self.get_mut(id)?.correlation_token = Some(token.into());
        Ok(())
    }

    pub fn append_log(
        &mut self,
        id: &str,
        entries: impl IntoIterator<Item = TransferLogEntry>,
    ) -> Result<()> {
        let index = self.position(id).ok_or_else(|| not_found(id))?;
        for entry in entries {
            self.endpoints[index].log.append(entry.clone());
            let event = TransferLoggedEvent {
                endpoint_id: id.to_owned(),
                entry,
            };
            self.subscribers
                .values()
                .for_each(|s| s.notify_transfer_logged(event.clone()));
        }
        Ok(())
    }

    pub fn state(&self, id: &str) -> Result<EndpointState> {
        self.get(id).map(|e| e.state).ok_or_else(|| not_found(id))
    }

    pub fn get(&self, id: &str) -> Option<&Endpoint> {
        self.endpoints.iter().find(|e| e.id == id)
    }

    pub(crate) fn get_mut(&mut self, id: &str) -> Result<&mut Endpoint> {
        self.endpoints
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| not_found(id))
    }

    pub fn selected(&self) -> Option<&Endpoint> {
        self.selected.as_deref().and_then(|id| self.get(id))
    }

    pub fn select(&mut self, id: &str) -> Result<()> {
        if self.position(id).is_none() {
            return Err(not_found(id));
        }
        self.selected = Some(id.to_owned());
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Endpoint> {
        self.endpoints.iter()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    fn abandon_pending(&mut self, id: &str, operation: &str) -> Result<()> {
        let endpoint = self.get(id).ok_or_else(|| not_found(id))?;
        if endpoint.state != EndpointState::Pending {
            return Err(conflict(id, operation, endpoint.state));
        }
        if endpoint.is_incoming {
            self.remove(id)
        } else {
            self.transition(
                id,
                &[EndpointState::Pending],
                EndpointState::Discovered,
                operation,
            )
            .map(|_| ())
        }
    }

    fn transition(
        &mut self,
        id: &str,
        allowed: &[EndpointState],
        next: EndpointState,
        operation: &str,
    ) -> Result<EndpointState> {
        let endpoint = self.get_mut(id).map_err(|e| {
            log::warn!("cannot {}: unknown endpoint {}", operation, id);
            e
        })?;
        let previous = endpoint.state;
        if !allowed.contains(&previous) {
            return Err(conflict(id, operation, previous));
        }
        endpoint.state = next;
        if previous != next {
            log::debug!("endpoint {}: {:?} -> {:?}", id, previous, next);
            self.notify_state(id, Some(previous), next);
        }
        Ok(previous)
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.endpoints.iter().position(|e| e.id == id)
    }

    fn notify_state(
        &self,
        id: &str,
        previous: Option<EndpointState>,
        current: EndpointState,
    ) {
        let event = EndpointStateChangedEvent {
            endpoint_id: id.to_owned(),
            previous,
            current,
        };
        self.subscribers
            .values()
            .for_each(|s| s.notify_state_changed(event.clone()));
    }
}

fn not_found(id: &str) -> DropError {
    DropError::EndpointNotFound(id.to_owned())
}

fn conflict(id: &str, operation: &str, state: EndpointState) -> DropError {
    log::warn!("cannot {} for endpoint {} in state {:?}", operation, id, state);
    DropError::StateConflict(format!(
        "cannot {} for endpoint {} in state {:?}",
        operation, id, state
    ))
}

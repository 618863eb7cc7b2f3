//! Peer channel collaborator and the notifications it delivers.

use std::{fmt, future::Future, sync::Arc};

use tokio::sync::mpsc::UnboundedSender;

use crate::Result;

/// Active transport technology of a connected endpoint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Medium {
    #[default]
    Unknown,
    Bluetooth,
    Ble,
    WifiLan,
    WifiHotspot,
    WifiDirect,
    WebRtc,
}

impl fmt::Display for Medium {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Medium::Unknown => "unknown",
            Medium::Bluetooth => "bluetooth",
            Medium::Ble => "ble",
            Medium::WifiLan => "wifi-lan",
            Medium::WifiHotspot => "wifi-hotspot",
            Medium::WifiDirect => "wifi-direct",
            Medium::WebRtc => "webrtc",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PayloadStatus {
    InProgress,
    Success,
    Failure,
    Canceled,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TransportEvent {
    EndpointFound {
        endpoint_id: String,
        name: String,
        medium: Medium,
    },
    EndpointLost {
        endpoint_id: String,
    },
    EndpointDistanceChanged {
        endpoint_id: String,
        distance: String,
    },
    ConnectionInitiated {
        endpoint_id: String,
        name: String,
    },
    ConnectionAccepted {
        endpoint_id: String,
    },
    ConnectionRejected {
        endpoint_id: String,
    },
    ConnectionDisconnected {
        endpoint_id: String,
    },
    BandwidthUpgraded {
        endpoint_id: String,
        medium: Medium,
    },
    /// Payload content arrives before its transfer is confirmed; it stays
    /// provisional until a `Success` progress update for the same id.
    PayloadInitiated {
        endpoint_id: String,
        payload_id: i64,
        content: Vec<u8>,
    },
    PayloadProgress {
        endpoint_id: String,
        payload_id: i64,
        status: PayloadStatus,
        bytes_total: u64,
        bytes_transferred: u64,
    },
}

impl TransportEvent {
    pub fn endpoint_id(&self) -> &str {
        match self {
            TransportEvent::EndpointFound { endpoint_id, .. }
            | TransportEvent::EndpointLost { endpoint_id }
            | TransportEvent::EndpointDistanceChanged { endpoint_id, .. }
            | TransportEvent::ConnectionInitiated { endpoint_id, .. }
            | TransportEvent::ConnectionAccepted { endpoint_id }
            | TransportEvent::ConnectionRejected { endpoint_id }
            | TransportEvent::ConnectionDisconnected { endpoint_id }
            | TransportEvent::BandwidthUpgraded { endpoint_id, .. }
            | TransportEvent::PayloadInitiated { endpoint_id, .. }
            | TransportEvent::PayloadProgress { endpoint_id, .. } => {
                endpoint_id
            }
        }
    }
}

pub trait TransportListener: Send + Sync {
    fn get_id(&self) -> String;
    fn notify(&self, event: TransportEvent);
}

pub trait Transport: Send + Sync + 'static {
    fn connect(
        &self,
        endpoint_id: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    fn disconnect(
        &self,
        endpoint_id: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    fn send_bytes(&self, endpoint_id: &str, bytes: Vec<u8>) -> Result<()>;

    fn register(&self, listener: Arc<dyn TransportListener>);

    fn unregister(&self, listener_id: &str);
}

/// Keeps a listener registered with a transport for as long as it lives.
pub struct Registration<T: Transport> {
    transport: Arc<T>,
    listener_id: String,
}

impl<T: Transport> Registration<T> {
    pub fn new(transport: Arc<T>, listener: Arc<dyn TransportListener>) -> Self {
        let listener_id = listener.get_id();
        transport.register(listener);
        log::debug!("registered transport listener {}", listener_id);
        Self {
            transport,
            listener_id,
        }
    }

    pub fn listener_id(&self) -> &str {
        &self.listener_id
    }
}

impl<T: Transport> Drop for Registration<T> {
    fn drop(&mut self) {
        self.transport.unregister(&self.listener_id);
        log::debug!("unregistered transport listener {}", self.listener_id);
    }
}

/// Forwards notifications into the session's single-writer queue.
pub struct QueueListener {
    id: String,
    queue: UnboundedSender<TransportEvent>,
}

impl QueueListener {
    pub fn new(id: String, queue: UnboundedSender<TransportEvent>) -> Self {
        Self { id, queue }
    }
}

impl TransportListener for QueueListener {
    fn get_id(&self) -> String {
        self.id.clone()
    }

    fn notify(&self, event: TransportEvent) {
        if self.queue.send(event).is_err() {
            log::warn!("listener {} dropped an event, queue closed", self.id);
        }
    }
}

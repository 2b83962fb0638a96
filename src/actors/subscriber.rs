//! Subscriber connections and the registry the distributor fans out to
//!
//! A subscriber is anything that can take JSON text frames: the websocket
//! stream endpoint, or an in-process [`SubscriberConnection::pair`]. The
//! distributor is the only writer of a subscriber's outbound queue; the read
//! loop is the only reader of its inbound side and exists solely to notice
//! when the connection goes away.

use std::collections::HashMap;
use std::fmt;

use futures::stream::{self, BoxStream, Stream, StreamExt};
use rand::Rng;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::AbortHandle;
use tracing::{debug, trace, warn};

use super::messages::DistributorMessage;

/// Attempts at finding an unused random handle before giving up
pub const MAX_HANDLE_ATTEMPTS: usize = 16;

/// Opaque handle of a registered subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SubscriberId(u32);

impl SubscriberId {
    pub fn new(value: u32) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// What happened on the inbound side of a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A text frame from the peer (ignored)
    Message(String),

    /// The peer closed the connection
    Closed,

    /// The transport failed
    Error(String),
}

/// A live connection handed to the distributor
pub struct SubscriberConnection {
    /// Queue of outgoing text frames
    pub outbound: mpsc::Sender<String>,

    /// Events coming from the peer; the end of the stream counts as closed
    pub inbound: BoxStream<'static, ConnectionEvent>,
}

impl SubscriberConnection {
    pub fn new(
        outbound: mpsc::Sender<String>,
        inbound: impl Stream<Item = ConnectionEvent> + Send + 'static,
    ) -> Self {
        Self {
            outbound,
            inbound: inbound.boxed(),
        }
    }

    /// In-process connection, returning the peer's end of it
    pub fn pair(buffer: usize) -> (Self, RemotePeer) {
        let (outbound, frames) = mpsc::channel(buffer);
        let (events, inbound) = mpsc::channel(buffer);

        let inbound = stream::unfold(inbound, |mut rx: mpsc::Receiver<ConnectionEvent>| async move {
            rx.recv().await.map(|event| (event, rx))
        });

        (
            Self::new(outbound, inbound),
            RemotePeer { frames, events },
        )
    }
}

impl fmt::Debug for SubscriberConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberConnection")
            .field("outbound_closed", &self.outbound.is_closed())
            .finish_non_exhaustive()
    }
}

/// Peer side of [`SubscriberConnection::pair`]
///
/// Dropping `events` closes the connection from the peer's side.
pub struct RemotePeer {
    /// Frames the distributor fanned out to this peer
    pub frames: mpsc::Receiver<String>,

    /// Inject inbound events
    pub events: mpsc::Sender<ConnectionEvent>,
}

/// Outcome of a single fan-out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOutReport {
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
}

struct Subscriber {
    outbound: mpsc::Sender<String>,
    reader: AbortHandle,
}

/// Registered subscribers, owned by the distributor loop
#[derive(Default)]
pub(crate) struct SubscriberRegistry {
    entries: HashMap<SubscriberId, Subscriber>,
}

impl SubscriberRegistry {
    /// Find an unused random handle
    pub(crate) fn allocate(&self) -> Option<SubscriberId> {
        let mut rng = rand::thread_rng();
        self.allocate_with(|| rng.gen_range(0..=u32::MAX))
    }

    /// Find an unused handle from `generate`, giving up after
    /// [`MAX_HANDLE_ATTEMPTS`] collisions
    pub(crate) fn allocate_with(&self, mut generate: impl FnMut() -> u32) -> Option<SubscriberId> {
        (0..MAX_HANDLE_ATTEMPTS)
            .map(|_| SubscriberId(generate()))
            .find(|id| !self.entries.contains_key(id))
    }

    pub(crate) fn insert(
        &mut self,
        id: SubscriberId,
        outbound: mpsc::Sender<String>,
        reader: AbortHandle,
    ) {
        debug_assert!(!self.entries.contains_key(&id), "subscriber handle reused");
        self.entries.insert(id, Subscriber { outbound, reader });
    }

    /// Remove a subscriber, closing its outbound queue and read loop
    pub(crate) fn remove(&mut self, id: SubscriberId) -> bool {
        match self.entries.remove(&id) {
            Some(subscriber) => {
                subscriber.reader.abort();
                true
            }
            None => false,
        }
    }

    /// Offer a frame to every subscriber without waiting on any of them
    pub(crate) fn fan_out(&self, frame: &str) -> FanOutReport {
        let mut report = FanOutReport {
            attempted: self.entries.len(),
            ..Default::default()
        };

        for (id, subscriber) in &self.entries {
            match subscriber.outbound.try_send(frame.to_owned()) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!("subscriber {id} is not keeping up, dropping frame");
                    report.failed += 1;
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("subscriber {id} already closed");
                    report.failed += 1;
                }
            }
        }

        report
    }

    pub(crate) fn handles(&self) -> Vec<SubscriberId> {
        let mut handles: Vec<_> = self.entries.keys().copied().collect();
        handles.sort_unstable();
        handles
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Remove every subscriber
    pub(crate) fn clear(&mut self) {
        for (_, subscriber) in self.entries.drain() {
            subscriber.reader.abort();
        }
    }
}

/// Watch a connection's inbound side and report its end to the distributor
pub(crate) async fn read_loop(
    id: SubscriberId,
    mut inbound: BoxStream<'static, ConnectionEvent>,
    distributor: mpsc::WeakSender<DistributorMessage>,
) {
    loop {
        match inbound.next().await {
            Some(ConnectionEvent::Message(text)) => {
                trace!("ignoring {} byte frame from subscriber {id}", text.len());
            }
            Some(ConnectionEvent::Error(e)) => {
                warn!("subscriber {id} connection failed: {e}");
                break;
            }
            Some(ConnectionEvent::Closed) | None => {
                debug!("subscriber {id} disconnected");
                break;
            }
        }
    }

    if let Some(distributor) = distributor.upgrade() {
        let _ = distributor
            .send(DistributorMessage::Unsubscribe(id))
            .await;
    }
}

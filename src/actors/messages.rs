//! Message types for actor communication
//!
//! ## Design Principles
//!
//! 1. **Single inbox**: Everything that changes distributor state arrives as a
//!    [`DistributorMessage`] and is handled one message at a time
//! 2. **Private control channels**: Pollers only ever receive [`PollerCommand`]s
//! 3. **Request/Response**: oneshot channels for queries and acknowledgements

use serde::Serialize;
use tokio::sync::oneshot;

use crate::measurement::Measurement;
use crate::monitor::Monitor;

use super::subscriber::{SubscriberConnection, SubscriberId};

/// Messages accepted by the distributor inbox
#[derive(Debug)]
pub enum DistributorMessage {
    /// Register a live connection for measurement fan-out
    Subscribe(SubscriberConnection),

    /// Remove a subscriber, closing its outbound queue
    ///
    /// Sent by the subscriber's read loop when the connection closes.
    Unsubscribe(SubscriberId),

    /// Begin periodic polling of a stored monitor
    Start(Monitor),

    /// Stop periodic polling of a monitor
    Stop(i64),

    /// Poll a monitor once, outside of its schedule
    PollNow(PollTarget),

    /// A finished measurement, to be persisted and fanned out
    MeasurementResult(Measurement),

    /// A measurement after its persistence attempt, ready for fan-out
    ///
    /// Sent by the distributor's own persistence tasks. `id` is unset when
    /// the insert failed.
    Persisted(Measurement),

    /// Report registered subscribers and running monitors
    Snapshot {
        respond_to: oneshot::Sender<DistributorSnapshot>,
    },

    /// Stop all pollers, close all subscribers and exit
    ///
    /// The acknowledgement is sent once all spawned tasks are joined (or
    /// aborted after the grace period).
    Shutdown {
        respond_to: Option<oneshot::Sender<()>>,
    },
}

/// Which monitor a [`DistributorMessage::PollNow`] refers to
#[derive(Debug, Clone)]
pub enum PollTarget {
    /// A stored monitor, loaded from storage if it is not running
    Id(i64),

    /// A full monitor definition
    Monitor(Monitor),
}

impl PollTarget {
    pub fn id(&self) -> Option<i64> {
        match self {
            PollTarget::Id(id) => Some(*id),
            PollTarget::Monitor(monitor) => monitor.id,
        }
    }
}

impl From<i64> for PollTarget {
    fn from(id: i64) -> Self {
        PollTarget::Id(id)
    }
}

impl From<Monitor> for PollTarget {
    fn from(monitor: Monitor) -> Self {
        PollTarget::Monitor(monitor)
    }
}

/// Commands sent to a single poller over its control channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerCommand {
    /// Poll right away and restart the interval
    PollNow,

    /// Exit, discarding any in-flight measurement
    Stop,
}

/// Point-in-time view of the distributor's registries
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DistributorSnapshot {
    /// Registered subscriber handles, ascending
    pub subscribers: Vec<SubscriberId>,

    /// Ids of monitors with a running poller, ascending
    pub monitors: Vec<i64>,
}

//! Actor-based scheduling and fan-out
//!
//! Each actor runs as an independent async task communicating via Tokio
//! channels.
//!
//! ## Architecture Overview
//!
//! ```text
//!                    ┌───────────────────┐
//!                    │  Hub (main / API) │
//!                    └─────────┬─────────┘
//!                              │ DistributorHandle
//!                    ┌─────────▼─────────┐        ┌─────────────┐
//!                    │    Distributor    │───────►│   Storage   │
//!                    └──┬─────────────┬──┘        └─────────────┘
//!              spawns   │             │   spawns
//!          ┌────────────▼──┐      ┌───▼────────────┐
//!          │ Poller (per   │      │ Read loop (per │
//!          │ monitor)      │      │ subscriber)    │
//!          └───────┬───────┘      └───────┬────────┘
//!                  │ MeasurementResult    │ Unsubscribe
//!                  └──────────► inbox ◄───┘
//! ```
//!
//! ## Actor Types
//!
//! - **Distributor**: Owns the poller table and the subscriber registry,
//!   persists measurements and fans them out
//! - **Poller**: Probes one monitor on its interval
//! - **Read loop**: Watches a subscriber connection for its end
//!
//! ## Communication Patterns
//!
//! 1. **Inbox**: One bounded mpsc channel into the distributor
//! 2. **Control**: One private mpsc channel per poller
//! 3. **Request/Response**: oneshot channels for snapshots and shutdown

pub mod distributor;
pub mod messages;
pub mod poller;
pub mod subscriber;

pub use distributor::{DistributorHandle, INBOX_CAPACITY, SHUTDOWN_GRACE};
pub use messages::{DistributorMessage, DistributorSnapshot, PollTarget, PollerCommand};
pub use subscriber::{
    ConnectionEvent, FanOutReport, RemotePeer, SubscriberConnection, SubscriberId,
};

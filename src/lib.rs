//! Uptime monitoring hub
//!
//! Monitors (HTTP, TCP, ICMP, script) are polled on their interval by a
//! [`actors::DistributorHandle`]. Every [`measurement::Measurement`] is
//! persisted through a [`storage::StorageBackend`] and streamed to all live
//! subscribers as JSON.

pub mod actors;
pub mod api;
pub mod config;
pub mod measurement;
pub mod monitor;
pub mod probe;
pub mod storage;
pub mod util;

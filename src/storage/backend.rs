//! Storage backend trait definition
//!
//! The distributor only needs [`StorageBackend::insert_measurement`]; the
//! control API reads and writes monitors and reads measurement history
//! directly, bypassing the distributor.

use async_trait::async_trait;

use super::error::StorageResult;
use crate::measurement::{Certificate, Measurement};
use crate::monitor::Monitor;

/// Trait for persistent storage backends
///
/// Implementations must be `Send + Sync` as they are shared between the
/// distributor, ad hoc poll tasks and API handlers.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Persist a new monitor and return its identity
    ///
    /// Fails with [`StorageError::AlreadyPersisted`](super::StorageError::AlreadyPersisted)
    /// if the monitor already has an id.
    async fn insert_monitor(&self, monitor: &Monitor) -> StorageResult<i64>;

    /// Replace the stored configuration of a monitor
    async fn update_monitor(&self, monitor: &Monitor) -> StorageResult<()>;

    /// Delete a monitor together with its measurements
    async fn delete_monitor(&self, id: i64) -> StorageResult<()>;

    async fn select_monitor(&self, id: i64) -> StorageResult<Option<Monitor>>;

    /// All monitors, ordered by id
    async fn select_monitors(&self) -> StorageResult<Vec<Monitor>>;

    /// Persist a measurement with its certificates and return its identity
    async fn insert_measurement(&self, measurement: &Measurement) -> StorageResult<i64>;

    /// Most recent measurements of a monitor, newest first
    ///
    /// Certificates are not included, use [`StorageBackend::select_certificates`].
    async fn select_measurements(
        &self,
        monitor_id: i64,
        limit: usize,
    ) -> StorageResult<Vec<Measurement>>;

    async fn select_certificates(&self, measurement_id: i64) -> StorageResult<Vec<Certificate>>;

    /// Close the backend and release resources
    async fn close(&self) -> StorageResult<()>;
}

//! In-memory storage backend (no persistence)
//!
//! Useful for:
//! - Testing without database dependencies
//! - Deployments that only care about the live stream
//!
//! ## Limitations
//!
//! - **No persistence**: All data lost on restart
//! - **Limited capacity**: Only the latest measurements are kept

use std::collections::{BTreeMap, VecDeque};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::backend::StorageBackend;
use super::error::{StorageError, StorageResult};
use crate::measurement::{Certificate, Measurement};
use crate::monitor::Monitor;

/// Maximum measurements kept across all monitors
const MAX_MEASUREMENTS: usize = 10_000;

#[derive(Default)]
struct MemoryState {
    monitors: BTreeMap<i64, Monitor>,

    /// Oldest first, bounded by [`MAX_MEASUREMENTS`]
    measurements: VecDeque<Measurement>,

    last_monitor_id: i64,
    last_measurement_id: i64,
}

/// In-memory storage backend
#[derive(Default)]
pub struct MemoryBackend {
    state: RwLock<MemoryState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn insert_monitor(&self, monitor: &Monitor) -> StorageResult<i64> {
        if let Some(id) = monitor.id {
            return Err(StorageError::AlreadyPersisted(id));
        }

        let mut state = self.state.write().await;
        state.last_monitor_id += 1;
        let id = state.last_monitor_id;

        let mut stored = monitor.clone();
        stored.id = Some(id);
        state.monitors.insert(id, stored);

        debug!("stored monitor {id} in memory");
        Ok(id)
    }

    async fn update_monitor(&self, monitor: &Monitor) -> StorageResult<()> {
        let id = monitor.id.ok_or(StorageError::MissingIdentity)?;

        let mut state = self.state.write().await;
        let stored = state
            .monitors
            .get_mut(&id)
            .ok_or(StorageError::MonitorNotFound(id))?;
        *stored = monitor.clone();
        Ok(())
    }

    async fn delete_monitor(&self, id: i64) -> StorageResult<()> {
        let mut state = self.state.write().await;
        state
            .monitors
            .remove(&id)
            .ok_or(StorageError::MonitorNotFound(id))?;
        state.measurements.retain(|m| m.monitor_id != id);
        Ok(())
    }

    async fn select_monitor(&self, id: i64) -> StorageResult<Option<Monitor>> {
        Ok(self.state.read().await.monitors.get(&id).cloned())
    }

    async fn select_monitors(&self) -> StorageResult<Vec<Monitor>> {
        Ok(self.state.read().await.monitors.values().cloned().collect())
    }

    async fn insert_measurement(&self, measurement: &Measurement) -> StorageResult<i64> {
        let mut state = self.state.write().await;
        state.last_measurement_id += 1;
        let id = state.last_measurement_id;

        let mut stored = measurement.clone();
        stored.id = Some(id);
        state.measurements.push_back(stored);
        if state.measurements.len() > MAX_MEASUREMENTS {
            state.measurements.pop_front();
        }

        Ok(id)
    }

    async fn select_measurements(
        &self,
        monitor_id: i64,
        limit: usize,
    ) -> StorageResult<Vec<Measurement>> {
        let state = self.state.read().await;
        let measurements = state
            .measurements
            .iter()
            .rev()
            .filter(|m| m.monitor_id == monitor_id)
            .take(limit)
            .map(|m| {
                let mut m = m.clone();
                m.certificates.clear();
                m
            })
            .collect();

        Ok(measurements)
    }

    async fn select_certificates(&self, measurement_id: i64) -> StorageResult<Vec<Certificate>> {
        let state = self.state.read().await;
        let certificates = state
            .measurements
            .iter()
            .find(|m| m.id == Some(measurement_id))
            .map(|m| m.certificates.clone())
            .unwrap_or_default();

        Ok(certificates)
    }

    async fn close(&self) -> StorageResult<()> {
        debug!("closing in-memory backend (no-op)");
        Ok(())
    }
}

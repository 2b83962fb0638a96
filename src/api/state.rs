//! API shared state containing the distributor handle and storage

use std::sync::Arc;

use crate::actors::DistributorHandle;
use crate::storage::StorageBackend;

/// Shared state passed to all API handlers
#[derive(Clone)]
pub struct ApiState {
    /// Scheduling and stream subscriptions
    pub distributor: DistributorHandle,

    /// Monitor configuration and measurement history, read and written
    /// directly
    pub storage: Arc<dyn StorageBackend>,
}

impl ApiState {
    pub fn new(distributor: DistributorHandle, storage: Arc<dyn StorageBackend>) -> Self {
        Self {
            distributor,
            storage,
        }
    }
}

//! Persistence for monitors, measurements and certificates
//!
//! ## Design
//!
//! - **Trait-based**: `StorageBackend` trait allows swapping implementations
//! - **Async**: All operations are async for compatibility with Tokio actors
//! - **Shared**: Backends are passed around as `Arc<dyn StorageBackend>`
//!
//! ## Backends
//!
//! - **SQLite** (default): Embedded database with migrations
//! - **In-Memory**: No persistence, for testing or stream-only deployments
//!
//! ## Usage
//!
//! ```no_run
//! use upwatch::config::StorageConfig;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let storage = upwatch::storage::open(&StorageConfig::default()).await?;
//!     let monitors = storage.select_monitors().await?;
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod error;
pub mod memory;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, warn};

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use memory::MemoryBackend;

use crate::config::StorageConfig;
use crate::monitor::Monitor;

/// Open the backend selected by the configuration
pub async fn open(config: &StorageConfig) -> StorageResult<Arc<dyn StorageBackend>> {
    match config {
        StorageConfig::None => {
            info!("using in-memory storage, nothing will be persisted");
            Ok(Arc::new(MemoryBackend::new()))
        }
        #[cfg(feature = "storage-sqlite")]
        StorageConfig::Sqlite { path } => {
            let backend = sqlite::SqliteBackend::new(path).await?;
            Ok(Arc::new(backend))
        }
        #[cfg(not(feature = "storage-sqlite"))]
        StorageConfig::Sqlite { .. } => Err(StorageError::ConnectionFailed(
            "compiled without the storage-sqlite feature".to_string(),
        )),
    }
}

/// Insert configured monitors whose name is not stored yet
///
/// Returns the number of inserted monitors. Invalid monitors are skipped.
pub async fn seed_monitors(
    storage: &dyn StorageBackend,
    monitors: &[Monitor],
) -> StorageResult<usize> {
    let mut known: HashSet<String> = storage
        .select_monitors()
        .await?
        .into_iter()
        .map(|monitor| monitor.name)
        .collect();

    let mut inserted = 0;
    for monitor in monitors {
        if known.contains(&monitor.name) {
            continue;
        }
        if let Err(e) = monitor.validate() {
            warn!("skipping configured monitor '{}': {e}", monitor.name);
            continue;
        }

        let mut monitor = monitor.clone();
        monitor.id = None;
        let id = storage.insert_monitor(&monitor).await?;
        info!("seeded monitor '{}' as {id}", monitor.name);

        known.insert(monitor.name);
        inserted += 1;
    }

    Ok(inserted)
}

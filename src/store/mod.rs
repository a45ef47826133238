//! Task persistence behind the `TaskStore` trait.

pub mod libsql_backend;
pub mod memory;
pub mod migrations;
pub mod traits;

use std::sync::Arc;

use tracing::info;

pub use libsql_backend::LibSqlTaskStore;
pub use memory::InMemoryTaskStore;
pub use traits::{TaskStore, TaskUpdate};

use crate::config::ServerConfig;
use crate::error::Result;

/// Open the configured store: libSQL when a database path is set, otherwise
/// in-memory.
pub async fn open_store(config: &ServerConfig) -> Result<Arc<dyn TaskStore>> {
    match &config.db_path {
        Some(path) => Ok(Arc::new(LibSqlTaskStore::new_local(path).await?)),
        None => {
            info!("TASKS_DB_PATH not set, using in-memory task store");
            Ok(Arc::new(InMemoryTaskStore::new()))
        }
    }
}

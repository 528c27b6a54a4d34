//! Application wiring.
//!
//! [`AppState`] builds one storage handle, one set of caches and the five
//! components over them. Collaborators receive explicit instances; nothing is
//! process-global.

use std::sync::Arc;

use tracing::info;

use crate::cache::GraphCaches;
use crate::categories::CategoryRegistry;
use crate::config::Config;
use crate::error::AppResult;
use crate::graph::GraphStore;
use crate::storage::{SharedStorage, SqliteStorage};
use crate::transfer::ImportExport;
use crate::traversal::TraversalEngine;

/// Application state shared across callers.
pub struct AppState {
    /// Application configuration.
    pub config: Config,
    /// Storage backend.
    pub storage: SharedStorage,
    /// Graph, tree and issue-list caches.
    pub caches: GraphCaches,
    /// Node and connection CRUD.
    pub graph: GraphStore,
    /// Session state machine.
    pub traversal: TraversalEngine,
    /// Bulk import/export.
    pub transfer: ImportExport,
    /// Display-category relabelling.
    pub categories: CategoryRegistry,
}

impl AppState {
    /// Create application state over an existing storage backend
    pub fn new(config: Config, storage: SharedStorage) -> Self {
        let caches = GraphCaches::new(&config.cache);
        let graph = GraphStore::new(storage.clone(), caches.clone());
        let traversal = TraversalEngine::new(graph.clone(), storage.clone());
        let transfer = ImportExport::new(graph.clone());
        let categories = CategoryRegistry::new(graph.clone());

        info!(
            graph_ttl_secs = config.cache.graph.ttl_secs,
            tree_ttl_secs = config.cache.tree.ttl_secs,
            aggregate_ttl_secs = config.cache.aggregate.ttl_secs,
            "AppState initialized"
        );

        Self {
            config,
            storage,
            caches,
            graph,
            traversal,
            transfer,
            categories,
        }
    }

    /// Open the configured SQLite database and build state over it
    pub async fn connect(config: Config) -> AppResult<Self> {
        let storage = SqliteStorage::new(&config.database).await?;
        info!(path = %config.database.path.display(), "Database initialized");
        Ok(Self::new(config, Arc::new(storage)))
    }

    /// Build state over a fresh in-memory database
    pub async fn in_memory(config: Config) -> AppResult<Self> {
        let storage = SqliteStorage::new_in_memory().await?;
        Ok(Self::new(config, Arc::new(storage)))
    }
}

/// Shared application state type
pub type SharedState = Arc<AppState>;

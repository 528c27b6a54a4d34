//! Display-category labels.
//!
//! `display_category` is a free-text UI grouping label on nodes, distinct
//! from the category key that defines an issue. Relabelling never touches
//! node text, type or connections.

use std::collections::BTreeSet;

use tracing::info;

use crate::error::AppResult;
use crate::graph::GraphStore;

/// Bulk operations over display-category labels
#[derive(Clone)]
pub struct CategoryRegistry {
    graph: GraphStore,
}

impl CategoryRegistry {
    /// Create a registry over a graph store
    pub fn new(graph: GraphStore) -> Self {
        Self { graph }
    }

    /// Distinct non-null display categories across all nodes
    pub async fn list_categories(&self) -> AppResult<BTreeSet<String>> {
        let names = self.graph.storage().list_display_categories().await?;
        Ok(names.into_iter().collect())
    }

    /// Replace `old` with `new` wherever it appears. Idempotent.
    pub async fn rename(&self, old: &str, new: &str) -> AppResult<u64> {
        if old == new {
            return Ok(0);
        }
        let updated = self
            .graph
            .storage()
            .rename_display_category(old, new)
            .await?;
        self.after_relabel(updated).await;

        info!(old = %old, new = %new, updated, "Display category renamed");
        Ok(updated)
    }

    /// Clear the label wherever it equals `name`
    pub async fn delete(&self, name: &str) -> AppResult<u64> {
        let updated = self.graph.storage().clear_display_category(name).await?;
        self.after_relabel(updated).await;

        info!(name = %name, updated, "Display category cleared");
        Ok(updated)
    }

    /// Set the label of every node of one issue
    pub async fn set_for_issue(
        &self,
        category: &str,
        display_category: Option<String>,
    ) -> AppResult<u64> {
        let updated = self
            .graph
            .storage()
            .set_display_category_for(category, display_category)
            .await?;
        self.after_relabel(updated).await;

        info!(category = %category, updated, "Issue display category set");
        Ok(updated)
    }

    async fn after_relabel(&self, updated: u64) {
        if updated > 0 {
            self.graph.caches().clear_all().await;
        }
    }
}

//! Typed query filters.
//!
//! Each filter compiles to a parameterized `WHERE` clause through
//! [`sqlx::QueryBuilder`]; user-supplied values are always bound, never
//! spliced into SQL text.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite};

use super::{to_db_timestamp, NodeType, SessionState};

/// Largest page a session listing may request.
pub const MAX_PAGE_SIZE: u32 = 200;

/// Default session listing page size.
pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// Filter for node listings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeFilter {
    /// Only nodes with this category key.
    pub category: Option<String>,
    /// Only nodes of this type.
    pub node_type: Option<NodeType>,
    /// Only nodes with this semantic tag.
    pub semantic_id: Option<String>,
    /// Only active nodes.
    pub active_only: bool,
}

impl NodeFilter {
    /// Every node, active or not.
    pub fn all() -> Self {
        Self::default()
    }

    /// Active nodes only.
    pub fn active() -> Self {
        Self {
            active_only: true,
            ..Self::default()
        }
    }

    /// Restrict to a category
    pub fn in_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Restrict to a node type
    pub fn of_type(mut self, node_type: NodeType) -> Self {
        self.node_type = Some(node_type);
        self
    }

    /// Restrict to a semantic tag
    pub fn with_semantic_id(mut self, semantic_id: impl Into<String>) -> Self {
        self.semantic_id = Some(semantic_id.into());
        self
    }

    pub(crate) fn push_where(&self, qb: &mut QueryBuilder<'_, Sqlite>) {
        qb.push(" WHERE 1 = 1");
        if let Some(category) = &self.category {
            qb.push(" AND category = ").push_bind(category.clone());
        }
        if let Some(node_type) = self.node_type {
            qb.push(" AND node_type = ").push_bind(node_type.as_str());
        }
        if let Some(semantic_id) = &self.semantic_id {
            qb.push(" AND semantic_id = ").push_bind(semantic_id.clone());
        }
        if self.active_only {
            qb.push(" AND is_active = 1");
        }
    }
}

/// Filter for connection listings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionFilter {
    /// Only connections leaving this node.
    pub from_node_id: Option<String>,
    /// Only connections entering this node.
    pub to_node_id: Option<String>,
    /// Only connections whose source node has this category key.
    pub from_category: Option<String>,
    /// Only connections whose target node has this category key.
    pub to_category: Option<String>,
    /// Only connections touching this node at either end.
    pub touching_node_id: Option<String>,
    /// Only active connections.
    pub active_only: bool,
}

impl ConnectionFilter {
    /// Every connection, active or not.
    pub fn all() -> Self {
        Self::default()
    }

    /// Active connections only.
    pub fn active() -> Self {
        Self {
            active_only: true,
            ..Self::default()
        }
    }

    /// Restrict to a source node
    pub fn from_node(mut self, node_id: impl Into<String>) -> Self {
        self.from_node_id = Some(node_id.into());
        self
    }

    /// Restrict to a target node
    pub fn to_node(mut self, node_id: impl Into<String>) -> Self {
        self.to_node_id = Some(node_id.into());
        self
    }

    /// Restrict to sources within a category
    pub fn from_category(mut self, category: impl Into<String>) -> Self {
        self.from_category = Some(category.into());
        self
    }

    /// Restrict to targets within a category
    pub fn to_category(mut self, category: impl Into<String>) -> Self {
        self.to_category = Some(category.into());
        self
    }

    /// Restrict to connections touching a node
    pub fn touching(mut self, node_id: impl Into<String>) -> Self {
        self.touching_node_id = Some(node_id.into());
        self
    }

    pub(crate) fn push_where(&self, qb: &mut QueryBuilder<'_, Sqlite>) {
        qb.push(" WHERE 1 = 1");
        if let Some(from) = &self.from_node_id {
            qb.push(" AND from_node_id = ").push_bind(from.clone());
        }
        if let Some(to) = &self.to_node_id {
            qb.push(" AND to_node_id = ").push_bind(to.clone());
        }
        if let Some(category) = &self.from_category {
            qb.push(" AND from_node_id IN (SELECT id FROM nodes WHERE category = ")
                .push_bind(category.clone())
                .push(")");
        }
        if let Some(category) = &self.to_category {
            qb.push(" AND to_node_id IN (SELECT id FROM nodes WHERE category = ")
                .push_bind(category.clone())
                .push(")");
        }
        if let Some(node_id) = &self.touching_node_id {
            qb.push(" AND (from_node_id = ")
                .push_bind(node_id.clone())
                .push(" OR to_node_id = ")
                .push_bind(node_id.clone())
                .push(")");
        }
        if self.active_only {
            qb.push(" AND is_active = 1");
        }
    }
}

/// Filter and pagination for session listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionFilter {
    /// Only sessions in this state.
    pub state: Option<SessionState>,
    /// Only sessions whose current category is this key.
    pub category: Option<String>,
    /// Only sessions started at or after this instant.
    pub started_after: Option<DateTime<Utc>>,
    /// Only sessions started at or before this instant.
    pub started_before: Option<DateTime<Utc>>,
    /// Case-insensitive substring of tech identifier or client site.
    pub search: Option<String>,
    /// 1-based page number.
    pub page: u32,
    /// Rows per page, capped at [`MAX_PAGE_SIZE`].
    pub page_size: u32,
}

impl Default for SessionFilter {
    fn default() -> Self {
        Self {
            state: None,
            category: None,
            started_after: None,
            started_before: None,
            search: None,
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl SessionFilter {
    /// Restrict to a state
    pub fn with_state(mut self, state: SessionState) -> Self {
        self.state = Some(state);
        self
    }

    /// Restrict to a category
    pub fn in_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Restrict to a free-text search
    pub fn matching(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    /// Select a page
    pub fn page(mut self, page: u32, page_size: u32) -> Self {
        self.page = page;
        self.page_size = page_size;
        self
    }

    /// Page size after clamping to `1..=MAX_PAGE_SIZE`.
    pub fn effective_page_size(&self) -> u32 {
        self.page_size.clamp(1, MAX_PAGE_SIZE)
    }

    /// Row offset of the requested page.
    ///
    /// Widened to `i64` so any `u32` page and page size multiply without
    /// overflow.
    pub fn offset(&self) -> i64 {
        i64::from(self.page.max(1) - 1) * i64::from(self.effective_page_size())
    }

    pub(crate) fn push_where(&self, qb: &mut QueryBuilder<'_, Sqlite>) {
        qb.push(" WHERE 1 = 1");
        if let Some(state) = self.state {
            qb.push(" AND state = ").push_bind(state.as_str());
        }
        if let Some(category) = &self.category {
            qb.push(" AND category = ").push_bind(category.clone());
        }
        if let Some(after) = &self.started_after {
            qb.push(" AND started_at >= ").push_bind(to_db_timestamp(after));
        }
        if let Some(before) = &self.started_before {
            qb.push(" AND started_at <= ").push_bind(to_db_timestamp(before));
        }
        if let Some(search) = self.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            let pattern = format!("%{}%", escape_like(&search.to_lowercase()));
            qb.push(" AND (LOWER(COALESCE(tech_identifier, '')) LIKE ")
                .push_bind(pattern.clone())
                .push(" ESCAPE '\\' OR LOWER(COALESCE(client_site, '')) LIKE ")
                .push_bind(pattern)
                .push(" ESCAPE '\\')");
        }
    }
}

/// Date window for session statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStatsFilter {
    /// Only sessions started at or after this instant.
    pub started_after: Option<DateTime<Utc>>,
    /// Only sessions started at or before this instant.
    pub started_before: Option<DateTime<Utc>>,
}

impl SessionStatsFilter {
    /// Restrict to sessions started at or after `start`
    pub fn since(mut self, start: DateTime<Utc>) -> Self {
        self.started_after = Some(start);
        self
    }

    /// Restrict to sessions started at or before `end`
    pub fn until(mut self, end: DateTime<Utc>) -> Self {
        self.started_before = Some(end);
        self
    }

    pub(crate) fn push_where(&self, qb: &mut QueryBuilder<'_, Sqlite>) {
        qb.push(" WHERE 1 = 1");
        if let Some(after) = &self.started_after {
            qb.push(" AND started_at >= ").push_bind(to_db_timestamp(after));
        }
        if let Some(before) = &self.started_before {
            qb.push(" AND started_at <= ").push_bind(to_db_timestamp(before));
        }
    }
}

/// Escape LIKE wildcards so search text matches literally.
fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

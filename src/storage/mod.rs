//! Storage layer for the troubleshooting graph and traversal sessions.
//!
//! This module defines the persisted entities (nodes, connections, sessions),
//! the typed filters used to query them, and the [`Storage`] trait that the
//! rest of the crate talks to. [`SqliteStorage`] is the SQLite-backed
//! implementation.
//!
//! Every [`Storage`] method is a single atomic unit: multi-statement
//! operations (cascade deletes, bulk inserts, category toggles) run inside one
//! transaction and either apply completely or not at all.

mod filter;
mod sqlite;


pub use filter::{ConnectionFilter, NodeFilter, SessionFilter, SessionStatsFilter};
pub use sqlite::SqliteStorage;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StorageResult;

/// Kind of graph node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// Asks the user something; answered by picking an outgoing connection.
    #[default]
    Question,
    /// Terminal diagnosis or fix.
    Conclusion,
}

impl NodeType {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Question => "question",
            NodeType::Conclusion => "conclusion",
        }
    }
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for NodeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "question" => Ok(NodeType::Question),
            "conclusion" => Ok(NodeType::Conclusion),
            _ => Err(format!("Unknown node type: {}", s)),
        }
    }
}

/// A vertex of a troubleshooting graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique node identifier.
    pub id: String,
    /// Issue category key this node belongs to.
    pub category: String,
    /// Question or conclusion.
    pub node_type: NodeType,
    /// Text shown to the user.
    pub text: String,
    /// Internal stable tag (e.g. `printer_start`), never shown to users.
    pub semantic_id: Option<String>,
    /// Free-text UI grouping label.
    pub display_category: Option<String>,
    /// Editor layout position.
    pub position_x: Option<f64>,
    /// Editor layout position.
    pub position_y: Option<f64>,
    /// Whether the node is currently enabled.
    pub is_active: bool,
    /// When the node was created.
    pub created_at: DateTime<Utc>,
    /// When the node was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Node {
    /// Create a new active node with a fresh id.
    pub fn new(category: impl Into<String>, node_type: NodeType, text: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            category: category.into(),
            node_type,
            text: text.into(),
            semantic_id: None,
            display_category: None,
            position_x: None,
            position_y: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the internal semantic tag
    pub fn with_semantic_id(mut self, semantic_id: impl Into<String>) -> Self {
        self.semantic_id = Some(semantic_id.into());
        self
    }

    /// Set the display category label
    pub fn with_display_category(mut self, display_category: impl Into<String>) -> Self {
        self.display_category = Some(display_category.into());
        self
    }

    /// Set the layout position
    pub fn with_position(mut self, x: f64, y: f64) -> Self {
        self.position_x = Some(x);
        self.position_y = Some(y);
        self
    }

    /// Mark as inactive
    pub fn as_inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    /// Whether this node ends a traversal.
    pub fn is_conclusion(&self) -> bool {
        self.node_type == NodeType::Conclusion
    }
}

/// A labeled, directed edge representing one selectable answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    /// Unique connection identifier.
    pub id: String,
    /// Source node ID.
    pub from_node_id: String,
    /// Target node ID.
    pub to_node_id: String,
    /// Answer text shown to the user.
    pub label: String,
    /// Position among the source node's options.
    pub order_index: i32,
    /// Whether the connection is currently offered.
    pub is_active: bool,
    /// When the connection was created.
    pub created_at: DateTime<Utc>,
    /// When the connection was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Connection {
    /// Create a new active connection with a fresh id.
    pub fn new(
        from_node_id: impl Into<String>,
        to_node_id: impl Into<String>,
        label: impl Into<String>,
        order_index: i32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            from_node_id: from_node_id.into(),
            to_node_id: to_node_id.into(),
            label: label.into(),
            order_index,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the connection touches the given node at either end.
    pub fn touches(&self, node_id: &str) -> bool {
        self.from_node_id == node_id || self.to_node_id == node_id
    }
}

/// Lifecycle state of a troubleshooting session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Parked at a question, awaiting an answer.
    #[default]
    Active,
    /// Reached a conclusion.
    Concluded,
    /// Explicitly abandoned by the user.
    Abandoned,
}

impl SessionState {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Active => "active",
            SessionState::Concluded => "concluded",
            SessionState::Abandoned => "abandoned",
        }
    }

    /// Whether no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionState::Active)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SessionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(SessionState::Active),
            "concluded" => Ok(SessionState::Concluded),
            "abandoned" => Ok(SessionState::Abandoned),
            _ => Err(format!("Unknown session state: {}", s)),
        }
    }
}

/// One answered question in a session's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryStep {
    /// Node the answer was given at.
    pub from_node_id: String,
    /// Text of that node at the time of answering.
    pub from_node_text: String,
    /// Connection that was chosen.
    pub connection_id: String,
    /// Label of that connection at the time of answering.
    pub connection_label: String,
    /// Node the session moved to.
    pub to_node_id: String,
    /// When the answer was recorded.
    pub answered_at: DateTime<Utc>,
}

/// A user's traversal through an issue graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Unique session identifier.
    pub id: String,
    /// Category of the current node.
    pub category: String,
    /// Node the session is parked at.
    pub current_node_id: String,
    /// Lifecycle state.
    pub state: SessionState,
    /// Append-only list of answered steps.
    pub history: Vec<HistoryStep>,
    /// Optional technician label supplied at start.
    pub tech_identifier: Option<String>,
    /// Optional site label supplied at start.
    pub client_site: Option<String>,
    /// Conclusion text once concluded.
    pub final_conclusion: Option<String>,
    /// When the session was started.
    pub started_at: DateTime<Utc>,
    /// When the session last changed.
    pub updated_at: DateTime<Utc>,
    /// When the session reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
    /// Optimistic concurrency counter.
    pub version: i64,
}

impl Session {
    /// Create a new active session parked at `root_node_id`.
    pub fn new(category: impl Into<String>, root_node_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            category: category.into(),
            current_node_id: root_node_id.into(),
            state: SessionState::Active,
            history: Vec::new(),
            tech_identifier: None,
            client_site: None,
            final_conclusion: None,
            started_at: now,
            updated_at: now,
            completed_at: None,
            version: 0,
        }
    }

    /// Set the technician label
    pub fn with_tech_identifier(mut self, tech: impl Into<String>) -> Self {
        self.tech_identifier = Some(tech.into());
        self
    }

    /// Set the client site label
    pub fn with_client_site(mut self, site: impl Into<String>) -> Self {
        self.client_site = Some(site.into());
        self
    }
}

/// Outcome of a cascading node delete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CascadeOutcome {
    /// The node that was removed.
    pub node: Node,
    /// Number of connections removed along with it.
    pub connections_removed: u64,
}

/// Row counts affected by a category-wide operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCounts {
    /// Nodes affected.
    pub nodes: u64,
    /// Connections affected.
    pub connections: u64,
}

/// How often one conclusion was reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConclusionCount {
    pub conclusion: String,
    pub count: i64,
}

/// Sessions currently in one category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategorySessionCount {
    pub category: String,
    pub count: i64,
}

/// Aggregate session statistics over a date window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub total_sessions: i64,
    /// Sessions that reached a conclusion.
    pub completed_sessions: i64,
    /// Explicitly abandoned sessions plus active ones gone stale.
    pub abandoned_sessions: i64,
    /// Active sessions started after the staleness cutoff.
    pub active_sessions: i64,
    /// Mean history length of concluded sessions with at least one step.
    pub avg_steps_to_completion: f64,
    /// Most frequent final conclusions, most common first.
    pub most_common_conclusions: Vec<ConclusionCount>,
    /// Session counts per current category, largest first.
    pub sessions_by_category: Vec<CategorySessionCount>,
}

/// Format a timestamp for storage.
///
/// Fixed-width UTC so lexical order in SQL matches chronological order.
pub(crate) fn to_db_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Shared handle to a storage backend.
pub type SharedStorage = Arc<dyn Storage>;

/// Storage trait for database operations.
///
/// Implementations must make every method atomic and must perform cascade
/// steps explicitly; no cascading foreign keys are assumed.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Storage: Send + Sync {
    // Node operations

    /// Insert a node.
    async fn insert_node(&self, node: &Node) -> StorageResult<()>;
    /// Fetch a node by id.
    async fn get_node(&self, id: &str) -> StorageResult<Option<Node>>;
    /// Overwrite a node row. Returns false if the node does not exist.
    async fn update_node(&self, node: &Node) -> StorageResult<bool>;
    /// Delete a node and every connection touching it, atomically.
    /// Returns `None` when the node does not exist.
    async fn delete_node_cascade(&self, id: &str) -> StorageResult<Option<CascadeOutcome>>;
    /// List nodes matching a filter, oldest first.
    async fn list_nodes(&self, filter: &NodeFilter) -> StorageResult<Vec<Node>>;
    /// Whether any node (active or not) uses the category key.
    async fn category_exists(&self, category: &str) -> StorageResult<bool>;
    /// Distinct category keys, sorted.
    async fn list_category_keys(&self) -> StorageResult<Vec<String>>;

    // Connection operations

    /// Insert a connection.
    async fn insert_connection(&self, connection: &Connection) -> StorageResult<()>;
    /// Fetch a connection by id.
    async fn get_connection(&self, id: &str) -> StorageResult<Option<Connection>>;
    /// Overwrite a connection row. Returns false if it does not exist.
    async fn update_connection(&self, connection: &Connection) -> StorageResult<bool>;
    /// Hard-delete a connection. Returns false if it did not exist.
    async fn delete_connection(&self, id: &str) -> StorageResult<bool>;
    /// List connections matching a filter, by (order_index, creation).
    async fn list_connections(&self, filter: &ConnectionFilter) -> StorageResult<Vec<Connection>>;

    // Category-wide operations

    /// Insert a complete node/connection set in one transaction.
    async fn insert_graph(&self, nodes: &[Node], connections: &[Connection]) -> StorageResult<()>;
    /// Delete every node of a category and every connection touching them.
    async fn delete_category(&self, category: &str) -> StorageResult<CategoryCounts>;
    /// Set `is_active` on every node of a category and on every connection
    /// that targets one of those nodes.
    async fn set_category_active(&self, category: &str, active: bool)
        -> StorageResult<CategoryCounts>;

    // Display-category labels

    /// Distinct non-null display categories, sorted.
    async fn list_display_categories(&self) -> StorageResult<Vec<String>>;
    /// Replace one display category label with another.
    async fn rename_display_category(&self, old: &str, new: &str) -> StorageResult<u64>;
    /// Clear a display category label.
    async fn clear_display_category(&self, name: &str) -> StorageResult<u64>;
    /// Set the display category of every node in an issue category.
    async fn set_display_category_for(
        &self,
        category: &str,
        display_category: Option<String>,
    ) -> StorageResult<u64>;

    // Session operations

    /// Insert a new session.
    async fn insert_session(&self, session: &Session) -> StorageResult<()>;
    /// Fetch a session by id.
    async fn get_session(&self, id: &str) -> StorageResult<Option<Session>>;
    /// Persist a session only if the stored version equals `expected_version`.
    /// Returns false when the version check fails or the session is gone.
    async fn update_session_versioned(
        &self,
        session: &Session,
        expected_version: i64,
    ) -> StorageResult<bool>;
    /// List sessions matching a filter, newest first.
    async fn list_sessions(&self, filter: &SessionFilter) -> StorageResult<Vec<Session>>;
    /// Count sessions matching a filter, ignoring pagination.
    async fn count_sessions(&self, filter: &SessionFilter) -> StorageResult<i64>;
    /// Aggregate statistics for sessions in the filter's window. Active
    /// sessions started at or before `stale_before` count as abandoned.
    async fn session_stats(
        &self,
        filter: &SessionStatsFilter,
        stale_before: DateTime<Utc>,
    ) -> StorageResult<SessionStats>;
}

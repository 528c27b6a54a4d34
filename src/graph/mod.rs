//! Troubleshooting graph: nodes, connections and the issues they form.
//!
//! [`GraphStore`] owns every node and connection mutation, enforces the graph
//! invariants and keeps the [`GraphCaches`](crate::cache::GraphCaches)
//! consistent with storage. The pure analysis helpers in [`analysis`] (root
//! lookup, completeness, reachability, tree rendering) work on an
//! [`IssueGraph`] snapshot.

pub mod analysis;
mod store;
mod validate;

pub use store::GraphStore;
pub use validate::{require_text, validate_category_key, MAX_CATEGORY_LEN};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::{Connection, Node, NodeType};

/// Input for creating a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewNode {
    pub category: String,
    pub node_type: NodeType,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semantic_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position_x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position_y: Option<f64>,
}

impl NewNode {
    /// A question node
    pub fn question(category: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(category, NodeType::Question, text)
    }

    /// A conclusion node
    pub fn conclusion(category: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(category, NodeType::Conclusion, text)
    }

    fn new(category: impl Into<String>, node_type: NodeType, text: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            node_type,
            text: text.into(),
            semantic_id: None,
            display_category: None,
            position_x: None,
            position_y: None,
        }
    }

    /// Set the semantic tag
    pub fn with_semantic_id(mut self, semantic_id: impl Into<String>) -> Self {
        self.semantic_id = Some(semantic_id.into());
        self
    }

    /// Set the display category
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
}

/// Partial update for a node. `None` leaves a field unchanged; the nested
/// options on nullable fields distinguish "clear" from "keep".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodePatch {
    pub text: Option<String>,
    pub node_type: Option<NodeType>,
    pub semantic_id: Option<Option<String>>,
    pub display_category: Option<Option<String>>,
    pub position_x: Option<f64>,
    pub position_y: Option<f64>,
    pub is_active: Option<bool>,
}

impl NodePatch {
    /// Replace the text
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Change the node type
    pub fn node_type(mut self, node_type: NodeType) -> Self {
        self.node_type = Some(node_type);
        self
    }

    /// Set or clear the display category
    pub fn display_category(mut self, display_category: Option<String>) -> Self {
        self.display_category = Some(display_category);
        self
    }

    /// Move the node
    pub fn position(mut self, x: f64, y: f64) -> Self {
        self.position_x = Some(x);
        self.position_y = Some(y);
        self
    }

    /// Enable or disable the node
    pub fn active(mut self, is_active: bool) -> Self {
        self.is_active = Some(is_active);
        self
    }
}

/// Input for creating a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewConnection {
    pub from_node_id: String,
    pub to_node_id: String,
    pub label: String,
    #[serde(default)]
    pub order_index: i32,
}

impl NewConnection {
    /// Create connection input
    pub fn new(
        from_node_id: impl Into<String>,
        to_node_id: impl Into<String>,
        label: impl Into<String>,
        order_index: i32,
    ) -> Self {
        Self {
            from_node_id: from_node_id.into(),
            to_node_id: to_node_id.into(),
            label: label.into(),
            order_index,
        }
    }
}

/// Partial update for a connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionPatch {
    pub to_node_id: Option<String>,
    pub label: Option<String>,
    pub order_index: Option<i32>,
    pub is_active: Option<bool>,
}

impl ConnectionPatch {
    /// Retarget the connection
    pub fn to_node(mut self, to_node_id: impl Into<String>) -> Self {
        self.to_node_id = Some(to_node_id.into());
        self
    }

    /// Replace the label
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Move the option
    pub fn order_index(mut self, order_index: i32) -> Self {
        self.order_index = Some(order_index);
        self
    }

    /// Enable or disable the connection
    pub fn active(mut self, is_active: bool) -> Self {
        self.is_active = Some(is_active);
        self
    }
}

/// Input for creating an issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewIssue {
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_category: Option<String>,
    pub root_question: String,
}

impl NewIssue {
    /// Create issue input
    pub fn new(category: impl Into<String>, root_question: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            display_category: None,
            root_question: root_question.into(),
        }
    }

    /// Set the display category
    pub fn with_display_category(mut self, display_category: impl Into<String>) -> Self {
        self.display_category = Some(display_category.into());
        self
    }
}

/// Active nodes and connections of one category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueGraph {
    pub category: String,
    /// Active nodes, oldest first.
    pub nodes: Vec<Node>,
    /// Active connections leaving those nodes, by (order_index, created_at).
    pub connections: Vec<Connection>,
}

impl IssueGraph {
    /// Look up a node of this graph
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Ordered outgoing connections of a node
    pub fn outgoing<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a Connection> + 'a {
        self.connections
            .iter()
            .filter(move |c| c.from_node_id == node_id)
    }
}

/// A connection paired with the node it leads to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionWithTarget {
    pub connection: Connection,
    pub target: Node,
}

/// A node with its ordered, traversable outgoing connections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeWithConnections {
    pub node: Node,
    pub connections: Vec<ConnectionWithTarget>,
}

/// Summary of one issue (category).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub category: String,
    pub display_category: Option<String>,
    pub root_node_id: Option<String>,
    pub node_count: usize,
    /// True when every node of the category is active.
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Completeness diagnostics for a category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphReport {
    pub category: String,
    pub root_node_id: Option<String>,
    /// Active questions with no active outgoing connection.
    pub incomplete_question_ids: Vec<String>,
    /// Active nodes not reachable from the root.
    pub unreachable_node_ids: Vec<String>,
    /// Whether the active graph contains a cycle. Cycles are legal.
    pub has_cycle: bool,
}

impl GraphReport {
    /// Root exists and every active question has an answer.
    pub fn is_complete(&self) -> bool {
        self.root_node_id.is_some() && self.incomplete_question_ids.is_empty()
    }
}

/// Rendered tree of a category, starting at its root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueTree {
    pub category: String,
    pub root: TreeNode,
}

/// One rendered node with its options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
    pub node_id: String,
    pub node_type: NodeType,
    pub text: String,
    pub options: Vec<TreeOption>,
}

/// One option of a rendered node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeOption {
    pub connection_id: String,
    pub label: String,
    pub next: TreeBranch,
}

/// Where an option leads in the rendered tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TreeBranch {
    /// A subtree rendered in place.
    Node(Box<TreeNode>),
    /// The target is already on the current path.
    Revisit { node_id: String },
    /// The target was expanded under an earlier option.
    Shared { node_id: String },
    /// The target lies outside this category's active graph.
    External { node_id: String },
}

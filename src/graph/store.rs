use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::analysis::{self, root_semantic_id};
use super::validate::{require_text, validate_category_key};
use super::{
    ConnectionPatch, ConnectionWithTarget, GraphReport, Issue, IssueGraph, IssueTree, NewConnection,
    NewIssue, NewNode, NodePatch, NodeWithConnections,
};
use crate::cache::{GraphCaches, ISSUE_LIST_KEY};
use crate::error::{AppError, AppResult};
use crate::storage::{
    CascadeOutcome, CategoryCounts, Connection, ConnectionFilter, Node, NodeFilter, NodeType,
    SharedStorage,
};

/// Owner of every node and connection mutation.
///
/// Reads of whole categories go through the graph/tree/aggregate caches;
/// every successful mutation invalidates the affected categories before it
/// returns.
#[derive(Clone)]
pub struct GraphStore {
    storage: SharedStorage,
    caches: GraphCaches,
}

impl GraphStore {
    /// Create a graph store over a storage backend and its caches
    pub fn new(storage: SharedStorage, caches: GraphCaches) -> Self {
        Self { storage, caches }
    }

    /// The caches this store keeps consistent
    pub fn caches(&self) -> &GraphCaches {
        &self.caches
    }

    /// The underlying storage backend
    pub fn storage(&self) -> &SharedStorage {
        &self.storage
    }

    // ========================================================================
    // Nodes
    // ========================================================================

    /// Create a node
    pub async fn create_node(&self, input: NewNode) -> AppResult<Node> {
        let category = validate_category_key(&input.category)?;
        let text = require_text("text", &input.text)?;

        let mut node = Node::new(category, input.node_type, text);
        node.semantic_id = input.semantic_id;
        node.display_category = input.display_category;
        node.position_x = input.position_x;
        node.position_y = input.position_y;

        self.storage.insert_node(&node).await?;
        self.caches.invalidate_category(&node.category).await;

        info!(
            node_id = %node.id,
            category = %node.category,
            node_type = %node.node_type,
            "Node created"
        );
        Ok(node)
    }

    /// Fetch a node
    pub async fn get_node(&self, id: &str) -> AppResult<Node> {
        self.storage
            .get_node(id)
            .await?
            .ok_or_else(|| AppError::not_found("Node", id))
    }

    /// List nodes matching a filter
    pub async fn list_nodes(&self, filter: &NodeFilter) -> AppResult<Vec<Node>> {
        Ok(self.storage.list_nodes(filter).await?)
    }

    /// Merge a partial update onto a node
    pub async fn update_node(&self, id: &str, patch: NodePatch) -> AppResult<Node> {
        let mut node = self.get_node(id).await?;

        if let Some(text) = patch.text {
            node.text = require_text("text", &text)?;
        }
        if let Some(node_type) = patch.node_type {
            if node_type == NodeType::Conclusion && node.node_type != NodeType::Conclusion {
                let outgoing = self
                    .storage
                    .list_connections(&ConnectionFilter::all().from_node(id))
                    .await?;
                if !outgoing.is_empty() {
                    return Err(AppError::validation(
                        "node_type",
                        format!(
                            "Node has {} outgoing connection(s); a conclusion cannot have answers",
                            outgoing.len()
                        ),
                    ));
                }
            }
            node.node_type = node_type;
        }
        if let Some(semantic_id) = patch.semantic_id {
            node.semantic_id = semantic_id;
        }
        if let Some(display_category) = patch.display_category {
            node.display_category = display_category;
        }
        if let Some(x) = patch.position_x {
            node.position_x = Some(x);
        }
        if let Some(y) = patch.position_y {
            node.position_y = Some(y);
        }
        if let Some(is_active) = patch.is_active {
            node.is_active = is_active;
        }
        node.updated_at = Utc::now();

        let affected = self.categories_around_node(&node).await?;
        if !self.storage.update_node(&node).await? {
            return Err(AppError::not_found("Node", id));
        }
        self.invalidate_all(&affected).await;

        debug!(node_id = %id, "Node updated");
        Ok(node)
    }

    /// Delete a node and every connection touching it
    pub async fn delete_node(&self, id: &str) -> AppResult<CascadeOutcome> {
        let node = self.get_node(id).await?;
        let affected = self.categories_around_node(&node).await?;

        let outcome = self
            .storage
            .delete_node_cascade(id)
            .await?
            .ok_or_else(|| AppError::not_found("Node", id))?;
        self.invalidate_all(&affected).await;

        info!(
            node_id = %id,
            category = %outcome.node.category,
            connections_removed = outcome.connections_removed,
            "Node deleted"
        );
        Ok(outcome)
    }

    /// A node with its ordered, traversable outgoing connections
    pub async fn get_node_with_connections(&self, id: &str) -> AppResult<NodeWithConnections> {
        let node = self.get_node(id).await?;
        let connections = self.options_for(&node).await?;
        Ok(NodeWithConnections { node, connections })
    }

    /// Ordered active outgoing connections of a node whose targets are active.
    ///
    /// Conclusions and inactive nodes offer nothing.
    pub async fn options_for(&self, node: &Node) -> AppResult<Vec<ConnectionWithTarget>> {
        if node.is_conclusion() || !node.is_active {
            return Ok(Vec::new());
        }

        let graph = self.get_graph(&node.category).await?;
        let mut options = Vec::new();
        for connection in graph.outgoing(&node.id) {
            let target = match graph.node(&connection.to_node_id) {
                Some(target) => Some(target.clone()),
                None => self
                    .storage
                    .get_node(&connection.to_node_id)
                    .await?
                    .filter(|n| n.is_active),
            };
            if let Some(target) = target {
                options.push(ConnectionWithTarget {
                    connection: connection.clone(),
                    target,
                });
            }
        }
        Ok(options)
    }

    // ========================================================================
    // Connections
    // ========================================================================

    /// Create a connection between two existing nodes
    pub async fn create_connection(&self, input: NewConnection) -> AppResult<Connection> {
        let label = require_text("label", &input.label)?;
        if input.from_node_id == input.to_node_id {
            return Err(AppError::validation(
                "to_node_id",
                "A connection cannot point to its own source",
            ));
        }

        let source = self
            .storage
            .get_node(&input.from_node_id)
            .await?
            .ok_or_else(|| {
                AppError::validation(
                    "from_node_id",
                    format!("Source node does not exist: {}", input.from_node_id),
                )
            })?;
        if self.storage.get_node(&input.to_node_id).await?.is_none() {
            return Err(AppError::validation(
                "to_node_id",
                format!("Target node does not exist: {}", input.to_node_id),
            ));
        }
        if source.is_conclusion() {
            return Err(AppError::validation(
                "from_node_id",
                "A conclusion cannot have outgoing connections",
            ));
        }

        let connection =
            Connection::new(input.from_node_id, input.to_node_id, label, input.order_index);
        self.storage.insert_connection(&connection).await?;
        self.caches.invalidate_category(&source.category).await;

        info!(
            connection_id = %connection.id,
            from = %connection.from_node_id,
            to = %connection.to_node_id,
            "Connection created"
        );
        Ok(connection)
    }

    /// Fetch a connection
    pub async fn get_connection(&self, id: &str) -> AppResult<Connection> {
        self.storage
            .get_connection(id)
            .await?
            .ok_or_else(|| AppError::not_found("Connection", id))
    }

    /// List connections matching a filter
    pub async fn list_connections(&self, filter: &ConnectionFilter) -> AppResult<Vec<Connection>> {
        Ok(self.storage.list_connections(filter).await?)
    }

    /// Merge a partial update onto a connection
    pub async fn update_connection(&self, id: &str, patch: ConnectionPatch) -> AppResult<Connection> {
        let mut connection = self.get_connection(id).await?;

        if let Some(to_node_id) = patch.to_node_id {
            if to_node_id != connection.to_node_id {
                if to_node_id == connection.from_node_id {
                    return Err(AppError::validation(
                        "to_node_id",
                        "A connection cannot point to its own source",
                    ));
                }
                if self.storage.get_node(&to_node_id).await?.is_none() {
                    return Err(AppError::validation(
                        "to_node_id",
                        format!("Target node does not exist: {}", to_node_id),
                    ));
                }
                connection.to_node_id = to_node_id;
            }
        }
        if let Some(label) = patch.label {
            connection.label = require_text("label", &label)?;
        }
        if let Some(order_index) = patch.order_index {
            connection.order_index = order_index;
        }
        if let Some(is_active) = patch.is_active {
            connection.is_active = is_active;
        }
        connection.updated_at = Utc::now();

        if !self.storage.update_connection(&connection).await? {
            return Err(AppError::not_found("Connection", id));
        }
        self.invalidate_source_category(&connection).await?;

        debug!(connection_id = %id, "Connection updated");
        Ok(connection)
    }

    /// Hard-delete a connection
    pub async fn delete_connection(&self, id: &str) -> AppResult<()> {
        let connection = self.get_connection(id).await?;

        if !self.storage.delete_connection(id).await? {
            return Err(AppError::not_found("Connection", id));
        }
        self.invalidate_source_category(&connection).await?;

        info!(connection_id = %id, "Connection deleted");
        Ok(())
    }

    // ========================================================================
    // Category views
    // ========================================================================

    /// Active nodes and connections of a category
    pub async fn get_graph(&self, category: &str) -> AppResult<Arc<IssueGraph>> {
        let key = category.to_string();
        if let Some(graph) = self.caches.graphs.get(&key).await {
            debug!(category = %category, "Graph cache hit");
            return Ok(graph);
        }

        let nodes = self
            .storage
            .list_nodes(&NodeFilter::active().in_category(category))
            .await?;
        if nodes.is_empty() && !self.storage.category_exists(category).await? {
            return Err(AppError::not_found("Category", category));
        }

        let members: BTreeSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
        let connections = self
            .storage
            .list_connections(&ConnectionFilter::active().from_category(category))
            .await?
            .into_iter()
            .filter(|c| members.contains(c.from_node_id.as_str()))
            .collect();

        let graph = Arc::new(IssueGraph {
            category: key.clone(),
            nodes,
            connections,
        });
        self.caches.graphs.set(key, graph.clone()).await;

        debug!(category = %category, nodes = graph.nodes.len(), "Graph loaded");
        Ok(graph)
    }

    /// Rendered tree of a category from its root
    pub async fn get_tree(&self, category: &str) -> AppResult<Arc<IssueTree>> {
        let key = category.to_string();
        if let Some(tree) = self.caches.trees.get(&key).await {
            return Ok(tree);
        }

        let graph = self.get_graph(category).await?;
        let root = analysis::find_root(category, &graph.nodes)
            .ok_or_else(|| AppError::not_found("Root question", category))?;
        let tree = Arc::new(analysis::render_tree(&graph, root));
        self.caches.trees.set(key, tree.clone()).await;

        Ok(tree)
    }

    /// Root question of a category
    pub async fn find_root(&self, category: &str) -> AppResult<Node> {
        let graph = self.get_graph(category).await?;
        analysis::find_root(category, &graph.nodes)
            .cloned()
            .ok_or_else(|| AppError::not_found("Root question", category))
    }

    /// Completeness diagnostics for a category
    pub async fn validate(&self, category: &str) -> AppResult<GraphReport> {
        let graph = self.get_graph(category).await?;
        Ok(analysis::report(&graph))
    }

    /// Whether every active question has an answer and a root exists
    pub async fn is_complete(&self, category: &str) -> AppResult<bool> {
        Ok(self.validate(category).await?.is_complete())
    }

    // ========================================================================
    // Issues
    // ========================================================================

    /// Create an issue: a new category with its root question
    pub async fn create_issue(&self, input: NewIssue) -> AppResult<Node> {
        let category = validate_category_key(&input.category)?;
        let text = require_text("root_question", &input.root_question)?;

        if self.storage.category_exists(&category).await? {
            return Err(AppError::conflict(format!(
                "Issue category '{}' already exists",
                category
            )));
        }

        let mut root =
            Node::new(&category, NodeType::Question, text).with_semantic_id(root_semantic_id(&category));
        root.display_category = input.display_category;

        self.storage.insert_node(&root).await?;
        self.caches.invalidate_category(&category).await;

        info!(category = %category, root_id = %root.id, "Issue created");
        Ok(root)
    }

    /// Summaries of every issue, by category key
    pub async fn list_issues(&self) -> AppResult<Arc<Vec<Issue>>> {
        let key = ISSUE_LIST_KEY.to_string();
        if let Some(issues) = self.caches.issues.get(&key).await {
            return Ok(issues);
        }

        let nodes = self.storage.list_nodes(&NodeFilter::all()).await?;
        let mut by_category: BTreeMap<String, Vec<Node>> = BTreeMap::new();
        for node in nodes {
            by_category.entry(node.category.clone()).or_default().push(node);
        }

        let issues: Vec<Issue> = by_category
            .into_iter()
            .filter_map(|(category, nodes)| {
                let created_at = nodes.iter().map(|n| n.created_at).min()?;
                let root = analysis::find_root(&category, &nodes);
                let display_category = root
                    .and_then(|r| r.display_category.clone())
                    .or_else(|| nodes.iter().find_map(|n| n.display_category.clone()));
                Some(Issue {
                    root_node_id: root.map(|r| r.id.clone()),
                    display_category,
                    node_count: nodes.len(),
                    is_active: nodes.iter().all(|n| n.is_active),
                    created_at,
                    category,
                })
            })
            .collect();

        let issues = Arc::new(issues);
        self.caches.issues.set(key, issues.clone()).await;
        Ok(issues)
    }

    /// Activate or deactivate every node of an issue and every connection
    /// targeting those nodes.
    ///
    /// Activation refuses an issue with unanswered questions unless `force`.
    pub async fn set_issue_active(
        &self,
        category: &str,
        active: bool,
        force: bool,
    ) -> AppResult<CategoryCounts> {
        let nodes = self
            .storage
            .list_nodes(&NodeFilter::all().in_category(category))
            .await?;
        if nodes.is_empty() {
            return Err(AppError::not_found("Category", category));
        }

        if active && !force {
            let sources: BTreeSet<String> = self
                .storage
                .list_connections(&ConnectionFilter::all().from_category(category))
                .await?
                .into_iter()
                .map(|c| c.from_node_id)
                .collect();
            let incomplete: Vec<&str> = nodes
                .iter()
                .filter(|n| n.node_type == NodeType::Question && !sources.contains(&n.id))
                .map(|n| n.text.as_str())
                .collect();
            if !incomplete.is_empty() {
                warn!(category = %category, count = incomplete.len(), "Refusing to activate incomplete issue");
                return Err(AppError::validation(
                    "category",
                    format!(
                        "Issue has questions without answers: {}",
                        incomplete.join("; ")
                    ),
                ));
            }
        }

        let mut affected = self.categories_targeting(category).await?;
        affected.insert(category.to_string());

        let counts = self.storage.set_category_active(category, active).await?;
        self.invalidate_all(&affected).await;

        info!(
            category = %category,
            active,
            nodes = counts.nodes,
            connections = counts.connections,
            "Issue activation changed"
        );
        Ok(counts)
    }

    /// Delete an issue: every node of the category and every connection
    /// touching them, in one atomic unit.
    pub async fn delete_issue(&self, category: &str) -> AppResult<CategoryCounts> {
        if !self.storage.category_exists(category).await? {
            return Err(AppError::not_found("Category", category));
        }

        let mut affected = self.categories_targeting(category).await?;
        affected.insert(category.to_string());

        let counts = self.storage.delete_category(category).await?;
        self.invalidate_all(&affected).await;

        info!(
            category = %category,
            nodes = counts.nodes,
            connections = counts.connections,
            "Issue deleted"
        );
        Ok(counts)
    }

    // ========================================================================
    // Cache bookkeeping
    // ========================================================================

    /// Invalidate the caches of the given categories
    pub(crate) async fn invalidate_all(&self, categories: &BTreeSet<String>) {
        for category in categories {
            self.caches.invalidate_category(category).await;
        }
    }

    async fn invalidate_source_category(&self, connection: &Connection) -> AppResult<()> {
        match self.storage.get_node(&connection.from_node_id).await? {
            Some(source) => self.caches.invalidate_category(&source.category).await,
            // Orphaned connection; nothing cached can reference it by category.
            None => self.caches.clear_all().await,
        }
        Ok(())
    }

    /// The node's own category plus the categories of every node it is
    /// connected to. Those graphs embed connections to or from it.
    async fn categories_around_node(&self, node: &Node) -> AppResult<BTreeSet<String>> {
        let mut categories = BTreeSet::from([node.category.clone()]);
        let connections = self
            .storage
            .list_connections(&ConnectionFilter::all().touching(&node.id))
            .await?;

        let neighbours: BTreeSet<&str> = connections
            .iter()
            .map(|c| {
                if c.from_node_id == node.id {
                    c.to_node_id.as_str()
                } else {
                    c.from_node_id.as_str()
                }
            })
            .collect();
        for id in neighbours {
            if let Some(other) = self.storage.get_node(id).await? {
                categories.insert(other.category);
            }
        }
        Ok(categories)
    }

    /// Categories of source nodes with connections into `category`.
    async fn categories_targeting(&self, category: &str) -> AppResult<BTreeSet<String>> {
        let sources: BTreeSet<String> = self
            .storage
            .list_connections(&ConnectionFilter::all().to_category(category))
            .await?
            .into_iter()
            .map(|c| c.from_node_id)
            .collect();

        let mut categories = BTreeSet::new();
        for id in &sources {
            if let Some(source) = self.storage.get_node(id).await? {
                categories.insert(source.category);
            }
        }
        Ok(categories)
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod store_tests;

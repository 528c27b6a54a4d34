//! Bulk import and export of whole issues.
//!
//! An [`ExportDocument`] carries every node of one category and every
//! connection between those nodes. Import is per document: each one is
//! validated and inserted in its own transaction, so a bad document is
//! reported in the [`ImportReport`] without affecting the others.

use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{AppError, AppResult, ErrorKind};
use crate::graph::{require_text, validate_category_key, GraphStore};
use crate::storage::{Connection, ConnectionFilter, Node, NodeFilter, NodeType};

/// Document format version written and accepted.
pub const FORMAT_VERSION: &str = "1.0";

/// A node as it appears in an export document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportNode {
    /// Document-local id; connections refer to it.
    pub id: String,
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
    #[serde(default = "default_active")]
    pub is_active: bool,
}

/// A connection as it appears in an export document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportConnection {
    pub from_node_id: String,
    pub to_node_id: String,
    pub label: String,
    #[serde(default)]
    pub order_index: i32,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl From<&Node> for ExportNode {
    fn from(node: &Node) -> Self {
        Self {
            id: node.id.clone(),
            node_type: node.node_type,
            text: node.text.clone(),
            semantic_id: node.semantic_id.clone(),
            display_category: node.display_category.clone(),
            position_x: node.position_x,
            position_y: node.position_y,
            is_active: node.is_active,
        }
    }
}

impl From<&Connection> for ExportConnection {
    fn from(connection: &Connection) -> Self {
        Self {
            from_node_id: connection.from_node_id.clone(),
            to_node_id: connection.to_node_id.clone(),
            label: connection.label.clone(),
            order_index: connection.order_index,
            is_active: connection.is_active,
        }
    }
}

/// One issue, self-contained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportDocument {
    pub version: String,
    pub exported_at: DateTime<Utc>,
    pub category: String,
    pub nodes: Vec<ExportNode>,
    pub connections: Vec<ExportConnection>,
}

/// Import input: a single document or an array of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ImportPayload {
    Many(Vec<ExportDocument>),
    One(Box<ExportDocument>),
}

impl ImportPayload {
    /// The documents in input order
    pub fn into_documents(self) -> Vec<ExportDocument> {
        match self {
            ImportPayload::Many(documents) => documents,
            ImportPayload::One(document) => vec![*document],
        }
    }
}

/// Why a document was not imported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportErrorKind {
    Conflict,
    Validation,
    Storage,
}

/// A document that was imported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSuccess {
    pub category: String,
    pub nodes: usize,
    pub connections: usize,
}

/// A document that was rejected or rolled back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportFailure {
    pub category: String,
    pub kind: ImportErrorKind,
    pub message: String,
}

/// Outcome of an import call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportReport {
    pub successes: Vec<ImportSuccess>,
    pub errors: Vec<ImportFailure>,
}

impl ImportReport {
    fn fail(&mut self, category: &str, err: &AppError) {
        let kind = match err.kind() {
            ErrorKind::Conflict => ImportErrorKind::Conflict,
            ErrorKind::Storage => ImportErrorKind::Storage,
            _ => ImportErrorKind::Validation,
        };
        warn!(category = %category, kind = ?kind, error = %err, "Document not imported");
        self.errors.push(ImportFailure {
            category: category.to_string(),
            kind,
            message: err.user_message(),
        });
    }
}

/// Import/export of issues
#[derive(Clone)]
pub struct ImportExport {
    graph: GraphStore,
}

impl ImportExport {
    /// Create an import/export handler over a graph store
    pub fn new(graph: GraphStore) -> Self {
        Self { graph }
    }

    /// Export one category
    pub async fn export(&self, category: &str) -> AppResult<ExportDocument> {
        let storage = self.graph.storage();
        let nodes = storage
            .list_nodes(&NodeFilter::all().in_category(category))
            .await?;
        if nodes.is_empty() {
            return Err(AppError::not_found("Category", category));
        }

        let members: HashSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
        let connections: Vec<ExportConnection> = storage
            .list_connections(&ConnectionFilter::all().from_category(category))
            .await?
            .iter()
            .filter(|c| members.contains(c.to_node_id.as_str()))
            .map(ExportConnection::from)
            .collect();

        info!(
            category = %category,
            nodes = nodes.len(),
            connections = connections.len(),
            "Issue exported"
        );

        Ok(ExportDocument {
            version: FORMAT_VERSION.to_string(),
            exported_at: Utc::now(),
            category: category.to_string(),
            nodes: nodes.iter().map(ExportNode::from).collect(),
            connections,
        })
    }

    /// Export every category, in category order
    pub async fn export_all(&self) -> AppResult<Vec<ExportDocument>> {
        let categories = self.graph.storage().list_category_keys().await?;
        let mut documents = Vec::with_capacity(categories.len());
        for category in &categories {
            documents.push(self.export(category).await?);
        }
        Ok(documents)
    }

    /// Import documents one by one.
    ///
    /// Per-document problems are collected in the report. Only a failure of
    /// the category existence check aborts the whole call.
    pub async fn import(&self, documents: Vec<ExportDocument>) -> AppResult<ImportReport> {
        info!(documents = documents.len(), "Importing issues");
        let mut report = ImportReport::default();
        let storage = self.graph.storage();

        for document in documents {
            let label = document.category.trim().to_string();

            let category = match validate_category_key(&document.category) {
                Ok(category) => category,
                Err(err) => {
                    report.fail(&label, &err);
                    continue;
                }
            };

            if storage.category_exists(&category).await? {
                let err = AppError::conflict(format!(
                    "Issue category '{}' already exists; delete it first or choose another category",
                    category
                ));
                report.fail(&category, &err);
                continue;
            }

            let (nodes, connections) = match build_graph(&category, &document) {
                Ok(built) => built,
                Err(err) => {
                    report.fail(&category, &err);
                    continue;
                }
            };

            if let Err(err) = storage.insert_graph(&nodes, &connections).await {
                report.fail(&category, &AppError::from(err));
                continue;
            }

            self.graph
                .invalidate_all(&BTreeSet::from([category.clone()]))
                .await;
            info!(
                category = %category,
                nodes = nodes.len(),
                connections = connections.len(),
                "Issue imported"
            );
            report.successes.push(ImportSuccess {
                category,
                nodes: nodes.len(),
                connections: connections.len(),
            });
        }

        info!(
            succeeded = report.successes.len(),
            failed = report.errors.len(),
            "Import complete"
        );
        Ok(report)
    }
}

/// Validate a document and materialize it with fresh ids and timestamps.
fn build_graph(category: &str, document: &ExportDocument) -> AppResult<(Vec<Node>, Vec<Connection>)> {
    if document.version != FORMAT_VERSION {
        return Err(AppError::validation(
            "version",
            format!(
                "Unsupported document version '{}', expected '{}'",
                document.version, FORMAT_VERSION
            ),
        ));
    }
    if document.nodes.is_empty() {
        return Err(AppError::validation(
            "nodes",
            "Issue must have at least one node",
        ));
    }

    let mut id_map: HashMap<&str, (String, NodeType)> = HashMap::new();
    let mut nodes = Vec::with_capacity(document.nodes.len());
    for entry in &document.nodes {
        let text = require_text("text", &entry.text)?;
        let mut node = Node::new(category, entry.node_type, text);
        node.semantic_id = entry.semantic_id.clone();
        node.display_category = entry.display_category.clone();
        node.position_x = entry.position_x;
        node.position_y = entry.position_y;
        node.is_active = entry.is_active;

        if id_map
            .insert(entry.id.as_str(), (node.id.clone(), node.node_type))
            .is_some()
        {
            return Err(AppError::validation(
                "nodes",
                format!("Duplicate node id '{}'", entry.id),
            ));
        }
        nodes.push(node);
    }

    let mut connections = Vec::with_capacity(document.connections.len());
    for entry in &document.connections {
        let label = require_text("label", &entry.label)?;
        let (from, from_type) = id_map.get(entry.from_node_id.as_str()).ok_or_else(|| {
            AppError::validation(
                "connections",
                format!("Unknown source node '{}'", entry.from_node_id),
            )
        })?;
        let (to, _) = id_map.get(entry.to_node_id.as_str()).ok_or_else(|| {
            AppError::validation(
                "connections",
                format!("Unknown target node '{}'", entry.to_node_id),
            )
        })?;
        if from == to {
            return Err(AppError::validation(
                "connections",
                format!("Connection '{}' points to its own source", entry.label),
            ));
        }
        if *from_type == NodeType::Conclusion {
            return Err(AppError::validation(
                "connections",
                format!("Conclusion '{}' cannot have outgoing connections", entry.from_node_id),
            ));
        }

        let mut connection = Connection::new(from.as_str(), to.as_str(), label, entry.order_index);
        connection.is_active = entry.is_active;
        connections.push(connection);
    }

    Ok((nodes, connections))
}

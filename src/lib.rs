//! # Troubleshoot Graph
//!
//! Guided equipment troubleshooting over a directed graph of question and
//! conclusion nodes.
//!
//! ## Components
//!
//! - **GraphStore**: node/connection CRUD with cascade delete and validation
//! - **CacheLayer**: generic TTL cache fronting read-heavy graph queries
//! - **TraversalEngine**: session state machine walking a user through a graph
//! - **ImportExport**: per-document transactional bulk import and export
//! - **CategoryRegistry**: bulk relabelling of display categories
//!
//! ## Architecture
//!
//! ```text
//! TraversalEngine ──┐
//! ImportExport ─────┼──> GraphStore ──> GraphCaches
//! CategoryRegistry ─┘         │
//!                             └──────> Storage (SQLite)
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use troubleshoot_graph::{AppState, Config};
//! use troubleshoot_graph::graph::{NewConnection, NewIssue, NewNode};
//! use troubleshoot_graph::traversal::StartOptions;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let state = AppState::connect(Config::from_env()?).await?;
//!     let root = state.graph.create_issue(NewIssue::new("printer", "Is it on?")).await?;
//!     let fix = state.graph.create_node(NewNode::conclusion("printer", "Turn it on")).await?;
//!     state.graph.create_connection(NewConnection::new(&root.id, &fix.id, "No", 0)).await?;
//!
//!     let step = state.traversal.start("printer", StartOptions::default()).await?;
//!     let done = state.traversal.answer(&step.session.id, &step.options[0].connection_id).await?;
//!     assert!(done.is_conclusion);
//!     Ok(())
//! }
//! ```

/// TTL caches for graph reads.
pub mod cache;
/// Display-category relabelling.
pub mod categories;
/// Operator CLI commands.
pub mod cli;
/// Configuration management.
pub mod config;
/// Error types and result aliases for the application.
pub mod error;
/// Graph model, CRUD and analysis.
pub mod graph;
/// Application wiring.
pub mod service;
/// SQLite storage layer for persistence.
pub mod storage;
/// Bulk import and export.
pub mod transfer;
/// Session traversal.
pub mod traversal;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use service::{AppState, SharedState};

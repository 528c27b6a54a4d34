//! Operator CLI commands.
//!
//! Graph inspection, completeness checks, import/export files, session
//! statistics and display-category relabelling over an [`AppState`].

use std::fmt::Write as _;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::Subcommand;
use serde::Serialize;

use crate::graph::{TreeBranch, TreeNode};
use crate::service::AppState;
use crate::storage::SessionStatsFilter;
use crate::transfer::ImportPayload;

/// Top-level CLI subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Print the active graph of a category as JSON
    Graph {
        /// Category key
        category: String,
    },

    /// Print the rendered tree of a category
    Tree {
        /// Category key
        category: String,
    },

    /// Check a category for unanswered questions and unreachable nodes
    Check {
        /// Category key
        category: String,
    },

    /// List every issue
    Issues,

    /// Export one category, or all of them
    Export {
        /// Category key to export
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        category: Option<String>,

        /// Export every category
        #[arg(long)]
        all: bool,

        /// Write to this file instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Import one document or an array of documents from a JSON file
    Import {
        /// Path of the JSON file
        file: PathBuf,
    },

    /// Print session statistics as JSON
    Stats {
        /// Only sessions started at or after this RFC 3339 instant
        #[arg(long)]
        since: Option<DateTime<Utc>>,

        /// Only sessions started at or before this RFC 3339 instant
        #[arg(long)]
        until: Option<DateTime<Utc>>,
    },

    /// Manage display categories
    Categories {
        #[command(subcommand)]
        command: CategoryCommands,
    },
}

/// Display-category subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum CategoryCommands {
    /// List display categories
    List,

    /// Rename a display category everywhere
    Rename {
        /// Current label
        old: String,
        /// New label
        new: String,
    },

    /// Clear a display category everywhere
    Delete {
        /// Label to clear
        name: String,
    },
}

/// Result of CLI command execution.
#[derive(Debug)]
pub struct CliResult {
    /// Exit code (0 = success)
    pub exit_code: i32,
    /// Output message
    pub message: String,
}

impl CliResult {
    /// Create a success result with the given message.
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            message: message.into(),
        }
    }

    /// Create an error result with the given message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            exit_code: 1,
            message: message.into(),
        }
    }
}

/// Execute a CLI command.
pub async fn execute_command(command: Commands, state: &AppState) -> CliResult {
    match command {
        Commands::Graph { category } => execute_graph(state, &category).await,
        Commands::Tree { category } => execute_tree(state, &category).await,
        Commands::Check { category } => execute_check(state, &category).await,
        Commands::Issues => execute_issues(state).await,
        Commands::Export { category, all, out } => execute_export(state, category, all, out).await,
        Commands::Import { file } => execute_import(state, file).await,
        Commands::Stats { since, until } => execute_stats(state, since, until).await,
        Commands::Categories { command } => execute_categories(state, command).await,
    }
}

fn to_json<T: Serialize>(value: &T) -> CliResult {
    match serde_json::to_string_pretty(value) {
        Ok(json) => CliResult::success(json),
        Err(e) => CliResult::error(format!("Failed to encode output: {}", e)),
    }
}

async fn execute_graph(state: &AppState, category: &str) -> CliResult {
    match state.graph.get_graph(category).await {
        Ok(graph) => to_json(&*graph),
        Err(e) => CliResult::error(e.user_message()),
    }
}

async fn execute_tree(state: &AppState, category: &str) -> CliResult {
    match state.graph.get_tree(category).await {
        Ok(tree) => {
            let mut output = format!("{}\n", tree.category);
            render_tree_text(&tree.root, 0, &mut output);
            CliResult::success(output)
        }
        Err(e) => CliResult::error(e.user_message()),
    }
}

/// Indented text rendering of a tree.
pub fn render_tree_text(node: &TreeNode, depth: usize, output: &mut String) {
    let indent = "  ".repeat(depth);
    let _ = writeln!(output, "{}[{}] {}", indent, node.node_type, node.text);
    for option in &node.options {
        match &option.next {
            TreeBranch::Node(child) => {
                let _ = writeln!(output, "{}  -> {}", indent, option.label);
                render_tree_text(child, depth + 2, output);
            }
            TreeBranch::Revisit { node_id } => {
                let _ = writeln!(output, "{}  -> {} (back to {})", indent, option.label, node_id);
            }
            TreeBranch::Shared { node_id } => {
                let _ = writeln!(output, "{}  -> {} (see {})", indent, option.label, node_id);
            }
            TreeBranch::External { node_id } => {
                let _ = writeln!(output, "{}  -> {} (leaves issue: {})", indent, option.label, node_id);
            }
        }
    }
}

async fn execute_check(state: &AppState, category: &str) -> CliResult {
    let report = match state.graph.validate(category).await {
        Ok(report) => report,
        Err(e) => return CliResult::error(e.user_message()),
    };

    let mut output = String::new();
    let _ = writeln!(output, "Category: {}", report.category);
    let _ = writeln!(
        output,
        "Root: {}",
        report.root_node_id.as_deref().unwrap_or("(none)")
    );
    let _ = writeln!(output, "Unanswered questions: {}", report.incomplete_question_ids.len());
    for id in &report.incomplete_question_ids {
        let _ = writeln!(output, "  - {}", id);
    }
    let _ = writeln!(output, "Unreachable nodes: {}", report.unreachable_node_ids.len());
    for id in &report.unreachable_node_ids {
        let _ = writeln!(output, "  - {}", id);
    }
    let _ = writeln!(output, "Contains loops: {}", if report.has_cycle { "yes" } else { "no" });

    if report.is_complete() {
        let _ = writeln!(output, "Status: complete");
        CliResult::success(output)
    } else {
        let _ = writeln!(output, "Status: incomplete");
        CliResult::error(output)
    }
}

async fn execute_issues(state: &AppState) -> CliResult {
    let issues = match state.graph.list_issues().await {
        Ok(issues) => issues,
        Err(e) => return CliResult::error(e.user_message()),
    };

    if issues.is_empty() {
        return CliResult::success("No issues found");
    }

    let mut output = String::new();
    let _ = writeln!(output, "{:<24} {:<20} {:>6}  {}", "CATEGORY", "DISPLAY", "NODES", "STATUS");
    for issue in issues.iter() {
        let _ = writeln!(
            output,
            "{:<24} {:<20} {:>6}  {}",
            issue.category,
            issue.display_category.as_deref().unwrap_or("-"),
            issue.node_count,
            if issue.is_active { "active" } else { "inactive" }
        );
    }
    CliResult::success(output)
}

async fn execute_export(
    state: &AppState,
    category: Option<String>,
    all: bool,
    out: Option<PathBuf>,
) -> CliResult {
    let json = match (category, all) {
        (_, true) => match state.transfer.export_all().await {
            Ok(documents) => serde_json::to_string_pretty(&documents),
            Err(e) => return CliResult::error(e.user_message()),
        },
        (Some(category), false) => match state.transfer.export(&category).await {
            Ok(document) => serde_json::to_string_pretty(&document),
            Err(e) => return CliResult::error(e.user_message()),
        },
        (None, false) => return CliResult::error("Specify a category or --all"),
    };
    let json = match json {
        Ok(json) => json,
        Err(e) => return CliResult::error(format!("Failed to encode export: {}", e)),
    };

    match out {
        Some(path) => match tokio::fs::write(&path, json).await {
            Ok(()) => CliResult::success(format!("Exported to {}", path.display())),
            Err(e) => CliResult::error(format!("Failed to write {}: {}", path.display(), e)),
        },
        None => CliResult::success(json),
    }
}

async fn execute_import(state: &AppState, file: PathBuf) -> CliResult {
    let contents = match tokio::fs::read_to_string(&file).await {
        Ok(contents) => contents,
        Err(e) => return CliResult::error(format!("Failed to read {}: {}", file.display(), e)),
    };
    let payload: ImportPayload = match serde_json::from_str(&contents) {
        Ok(payload) => payload,
        Err(e) => return CliResult::error(format!("Invalid import file: {}", e)),
    };

    let report = match state.transfer.import(payload.into_documents()).await {
        Ok(report) => report,
        Err(e) => return CliResult::error(e.user_message()),
    };

    let mut output = String::new();
    for success in &report.successes {
        let _ = writeln!(
            output,
            "imported {} ({} nodes, {} connections)",
            success.category, success.nodes, success.connections
        );
    }
    for failure in &report.errors {
        let _ = writeln!(
            output,
            "failed {} [{:?}]: {}",
            failure.category, failure.kind, failure.message
        );
    }

    if report.errors.is_empty() {
        CliResult::success(output)
    } else {
        CliResult::error(output)
    }
}

async fn execute_stats(
    state: &AppState,
    since: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
) -> CliResult {
    let filter = SessionStatsFilter {
        started_after: since,
        started_before: until,
    };
    match state.traversal.session_stats(&filter).await {
        Ok(stats) => to_json(&stats),
        Err(e) => CliResult::error(e.user_message()),
    }
}

async fn execute_categories(state: &AppState, command: CategoryCommands) -> CliResult {
    let result = match command {
        CategoryCommands::List => {
            return match state.categories.list_categories().await {
                Ok(names) if names.is_empty() => CliResult::success("No display categories"),
                Ok(names) => CliResult::success(names.into_iter().collect::<Vec<_>>().join("\n")),
                Err(e) => CliResult::error(e.user_message()),
            };
        }
        CategoryCommands::Rename { old, new } => state.categories.rename(&old, &new).await,
        CategoryCommands::Delete { name } => state.categories.delete(&name).await,
    };

    match result {
        Ok(updated) => CliResult::success(format!("{} node(s) updated", updated)),
        Err(e) => CliResult::error(e.user_message()),
    }
}

//! Session state machine driving a user through an issue graph.
//!
//! A session starts Active at the category's root question. Each answer picks
//! one of the current node's offered connections and moves the session along
//! it; reaching a conclusion ends the session as Concluded. Abandoned is the
//! other terminal state. History is append-only.
//!
//! Sessions are persisted after every transition with optimistic versioning,
//! so two concurrent answers to the same session cannot both apply.

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};
use crate::graph::{ConnectionWithTarget, GraphStore};
use crate::storage::{
    HistoryStep, Node, Session, SessionFilter, SessionState, SessionStats, SessionStatsFilter,
    SharedStorage,
};

/// Active sessions started this long ago count as abandoned in statistics.
pub const STALE_SESSION_SECS: i64 = 3600;

/// Optional labels recorded when a session starts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tech_identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_site: Option<String>,
}

impl StartOptions {
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

/// One answer the user may pick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationOption {
    pub connection_id: String,
    pub label: String,
    pub target_node_id: String,
    pub target_category: String,
    pub order_index: i32,
}

impl From<&ConnectionWithTarget> for NavigationOption {
    fn from(choice: &ConnectionWithTarget) -> Self {
        Self {
            connection_id: choice.connection.id.clone(),
            label: choice.connection.label.clone(),
            target_node_id: choice.target.id.clone(),
            target_category: choice.target.category.clone(),
            order_index: choice.connection.order_index,
        }
    }
}

/// What the user sees at the session's current position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepView {
    pub session: Session,
    pub node: Node,
    /// Ordered by order_index, then creation. Empty once concluded.
    pub options: Vec<NavigationOption>,
    pub is_conclusion: bool,
    pub conclusion_text: Option<String>,
}

/// A session's recorded path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionHistory {
    pub session_id: String,
    pub state: SessionState,
    pub steps: Vec<HistoryStep>,
    pub final_conclusion: Option<String>,
}

/// One page of a session listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionPage {
    pub sessions: Vec<Session>,
    /// Matching sessions across all pages.
    pub total: i64,
    pub page: u32,
    pub page_size: u32,
}

/// Traversal engine
#[derive(Clone)]
pub struct TraversalEngine {
    graph: GraphStore,
    storage: SharedStorage,
}

impl TraversalEngine {
    /// Create a traversal engine reading the graph through `graph`
    pub fn new(graph: GraphStore, storage: SharedStorage) -> Self {
        Self { graph, storage }
    }

    /// Start a session at the category's root question
    pub async fn start(&self, category: &str, options: StartOptions) -> AppResult<StepView> {
        let root = self.graph.find_root(category).await?;

        let mut session = Session::new(&root.category, &root.id);
        session.tech_identifier = options.tech_identifier;
        session.client_site = options.client_site;

        self.storage.insert_session(&session).await?;

        info!(
            session_id = %session.id,
            category = %category,
            root_id = %root.id,
            "Session started"
        );
        self.view(session, root).await
    }

    /// Answer the current question by picking one of its offered connections
    pub async fn answer(&self, session_id: &str, connection_id: &str) -> AppResult<StepView> {
        let mut session = self.load(session_id).await?;
        if session.state.is_terminal() {
            return Err(AppError::invalid_state(format!(
                "Session {} is {} and accepts no further answers",
                session.id, session.state
            )));
        }

        let current = self
            .storage
            .get_node(&session.current_node_id)
            .await?
            .ok_or_else(|| {
                AppError::invalid_transition(format!(
                    "Current node {} no longer exists",
                    session.current_node_id
                ))
            })?;

        let choice = self
            .graph
            .options_for(&current)
            .await?
            .into_iter()
            .find(|c| c.connection.id == connection_id)
            .ok_or_else(|| {
                warn!(session_id = %session_id, connection_id = %connection_id, "Answer not offered");
                AppError::invalid_transition(format!(
                    "Connection {} is not an available answer at node {}",
                    connection_id, current.id
                ))
            })?;

        let now = Utc::now();
        let expected_version = session.version;
        let ConnectionWithTarget { connection, target } = choice;

        session.history.push(HistoryStep {
            from_node_id: current.id.clone(),
            from_node_text: current.text.clone(),
            connection_id: connection.id.clone(),
            connection_label: connection.label.clone(),
            to_node_id: target.id.clone(),
            answered_at: now,
        });
        session.current_node_id = target.id.clone();
        session.category = target.category.clone();
        if target.is_conclusion() {
            session.state = SessionState::Concluded;
            session.final_conclusion = Some(target.text.clone());
            session.completed_at = Some(now);
        }
        session.updated_at = now;
        session.version = expected_version + 1;

        self.save(&session, expected_version).await?;

        if session.state == SessionState::Concluded {
            info!(
                session_id = %session.id,
                steps = session.history.len(),
                conclusion_id = %target.id,
                "Session concluded"
            );
        } else {
            debug!(session_id = %session.id, node_id = %target.id, "Session advanced");
        }

        self.view(session, target).await
    }

    /// Abandon an active session
    pub async fn abandon(&self, session_id: &str) -> AppResult<Session> {
        let mut session = self.load(session_id).await?;
        if session.state != SessionState::Active {
            return Err(AppError::invalid_state(format!(
                "Session {} is already {}",
                session.id, session.state
            )));
        }

        let now = Utc::now();
        let expected_version = session.version;
        session.state = SessionState::Abandoned;
        session.completed_at = Some(now);
        session.updated_at = now;
        session.version = expected_version + 1;

        self.save(&session, expected_version).await?;

        info!(session_id = %session.id, steps = session.history.len(), "Session abandoned");
        Ok(session)
    }

    /// The session's current position and options
    pub async fn current(&self, session_id: &str) -> AppResult<StepView> {
        let session = self.load(session_id).await?;
        let node = self
            .storage
            .get_node(&session.current_node_id)
            .await?
            .ok_or_else(|| AppError::not_found("Node", &session.current_node_id))?;
        self.view(session, node).await
    }

    /// The session's recorded path
    pub async fn history(&self, session_id: &str) -> AppResult<SessionHistory> {
        let session = self.load(session_id).await?;
        Ok(SessionHistory {
            session_id: session.id,
            state: session.state,
            steps: session.history,
            final_conclusion: session.final_conclusion,
        })
    }

    /// A page of sessions matching a filter, newest first
    pub async fn list_sessions(&self, filter: &SessionFilter) -> AppResult<SessionPage> {
        let total = self.storage.count_sessions(filter).await?;
        let sessions = self.storage.list_sessions(filter).await?;

        Ok(SessionPage {
            sessions,
            total,
            page: filter.page.max(1),
            page_size: filter.effective_page_size(),
        })
    }

    /// Dashboard statistics for sessions started within the filter's window
    pub async fn session_stats(&self, filter: &SessionStatsFilter) -> AppResult<SessionStats> {
        if let (Some(after), Some(before)) = (filter.started_after, filter.started_before) {
            if after > before {
                return Err(AppError::validation(
                    "started_after",
                    "must not be later than started_before",
                ));
            }
        }

        let stale_before = Utc::now() - Duration::seconds(STALE_SESSION_SECS);
        let stats = self.storage.session_stats(filter, stale_before).await?;
        debug!(
            total = stats.total_sessions,
            completed = stats.completed_sessions,
            "Session stats computed"
        );
        Ok(stats)
    }

    async fn load(&self, session_id: &str) -> AppResult<Session> {
        self.storage
            .get_session(session_id)
            .await?
            .ok_or_else(|| AppError::not_found("Session", session_id))
    }

    async fn save(&self, session: &Session, expected_version: i64) -> AppResult<()> {
        if !self
            .storage
            .update_session_versioned(session, expected_version)
            .await?
        {
            warn!(session_id = %session.id, expected_version, "Session version conflict");
            return Err(AppError::invalid_transition(format!(
                "Session {} was modified concurrently; reload and retry",
                session.id
            )));
        }
        Ok(())
    }

    async fn view(&self, session: Session, node: Node) -> AppResult<StepView> {
        let is_conclusion = node.is_conclusion();
        let options = if session.state == SessionState::Active {
            self.graph
                .options_for(&node)
                .await?
                .iter()
                .map(NavigationOption::from)
                .collect()
        } else {
            Vec::new()
        };

        Ok(StepView {
            conclusion_text: is_conclusion.then(|| node.text.clone()),
            is_conclusion,
            options,
            session,
            node,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::GraphCaches;
    use crate::storage::{MockStorage, NodeType};
    use std::sync::Arc;

    fn engine(mock: MockStorage) -> TraversalEngine {
        let storage: SharedStorage = Arc::new(mock);
        let graph = GraphStore::new(storage.clone(), GraphCaches::default());
        TraversalEngine::new(graph, storage)
    }

    #[tokio::test]
    async fn test_answer_on_concluded_session_is_invalid_state() {
        let mut session = Session::new("printer", "n1");
        session.state = SessionState::Concluded;
        let id = session.id.clone();

        let mut mock = MockStorage::new();
        mock.expect_get_session()
            .returning(move |_| Ok(Some(session.clone())));

        let err = engine(mock).answer(&id, "c1").await.unwrap_err();
        assert!(matches!(err, AppError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_lost_version_race_is_invalid_transition() {
        let question = Node::new("printer", NodeType::Question, "Is it on?");
        let end = Node::new("printer", NodeType::Conclusion, "Turn it on");
        let conn = crate::storage::Connection::new(&question.id, &end.id, "No", 0);
        let session = Session::new("printer", &question.id);
        let id = session.id.clone();
        let conn_id = conn.id.clone();

        let mut mock = MockStorage::new();
        mock.expect_get_session()
            .returning(move |_| Ok(Some(session.clone())));
        let q = question.clone();
        mock.expect_get_node()
            .returning(move |_| Ok(Some(q.clone())));
        let nodes = vec![question.clone(), end.clone()];
        mock.expect_list_nodes()
            .returning(move |_| Ok(nodes.clone()));
        mock.expect_list_connections()
            .returning(move |_| Ok(vec![conn.clone()]));
        mock.expect_update_session_versioned()
            .times(1)
            .returning(|_, _| Ok(false));

        let err = engine(mock).answer(&id, &conn_id).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_session_stats_rejects_inverted_window() {
        let start = Utc::now();
        let filter = SessionStatsFilter::default()
            .since(start)
            .until(start - Duration::days(1));

        // No expectations: the window is checked before storage is queried.
        let err = engine(MockStorage::new())
            .session_stats(&filter)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_session_stats_stale_cutoff_is_an_hour_back() {
        let mut mock = MockStorage::new();
        mock.expect_session_stats()
            .withf(|_, stale_before| {
                let age = Utc::now() - *stale_before;
                age >= Duration::seconds(STALE_SESSION_SECS)
                    && age < Duration::seconds(STALE_SESSION_SECS + 60)
            })
            .times(1)
            .returning(|_, _| Ok(SessionStats::default()));

        let stats = engine(mock)
            .session_stats(&SessionStatsFilter::default())
            .await
            .unwrap();
        assert_eq!(stats.total_sessions, 0);
    }

    #[tokio::test]
    async fn test_unknown_session_is_not_found() {
        let mut mock = MockStorage::new();
        mock.expect_get_session().returning(|_| Ok(None));

        let err = engine(mock).abandon("missing").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound { .. }));
    }
}

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite};
use std::str::FromStr;
use tracing::{debug, info};

use super::{
    to_db_timestamp, CascadeOutcome, CategoryCounts, CategorySessionCount, ConclusionCount,
    Connection, ConnectionFilter, HistoryStep, Node, NodeFilter, NodeType, Session,
    SessionFilter, SessionState, SessionStats, SessionStatsFilter, Storage,
};
use crate::config::DatabaseConfig;
use crate::error::{StorageError, StorageResult};

/// Static migrator that embeds migrations at compile time
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

const NODE_COLUMNS: &str = "id, category, node_type, text, semantic_id, display_category, \
     position_x, position_y, is_active, created_at, updated_at";

const CONNECTION_COLUMNS: &str =
    "id, from_node_id, to_node_id, label, order_index, is_active, created_at, updated_at";

const SESSION_COLUMNS: &str = "id, category, current_node_id, state, history, tech_identifier, \
     client_site, final_conclusion, started_at, updated_at, completed_at, version";

/// Conclusions reported by [`Storage::session_stats`].
const TOP_CONCLUSIONS: i64 = 10;

/// SQLite-backed storage implementation
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Create a new SQLite storage instance
    pub async fn new(config: &DatabaseConfig) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| StorageError::Connection {
                    message: format!("Failed to create database directory: {}", e),
                })?;
            }
        }

        let database_url = format!("sqlite://{}?mode=rwc", config.path.display());

        let options = SqliteConnectOptions::from_str(&database_url)
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Create an in-memory database, used by tests.
    ///
    /// Every pooled connection to `:memory:` would see its own empty database,
    /// so the pool is pinned to one connection that never expires.
    pub async fn new_in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(|e| {
            StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            }
        })?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to open in-memory database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Run database migrations using embedded sqlx migrations
    async fn run_migrations(&self) -> StorageResult<()> {
        info!("Running database migrations...");

        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|e| StorageError::Migration {
                message: format!("Failed to run migrations: {}", e),
            })?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying pool for advanced queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn insert_node(&self, node: &Node) -> StorageResult<()> {
        insert_node_query(node).execute(&self.pool).await?;
        Ok(())
    }

    async fn get_node(&self, id: &str) -> StorageResult<Option<Node>> {
        let row: Option<NodeRow> =
            sqlx::query_as(&format!("SELECT {NODE_COLUMNS} FROM nodes WHERE id = ?"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(Node::try_from).transpose()
    }

    async fn update_node(&self, node: &Node) -> StorageResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE nodes
            SET node_type = ?, text = ?, semantic_id = ?, display_category = ?,
                position_x = ?, position_y = ?, is_active = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(node.node_type.as_str())
        .bind(&node.text)
        .bind(&node.semantic_id)
        .bind(&node.display_category)
        .bind(node.position_x)
        .bind(node.position_y)
        .bind(node.is_active)
        .bind(to_db_timestamp(&node.updated_at))
        .bind(&node.id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_node_cascade(&self, id: &str) -> StorageResult<Option<CascadeOutcome>> {
        let mut tx = self.pool.begin().await?;

        let row: Option<NodeRow> =
            sqlx::query_as(&format!("SELECT {NODE_COLUMNS} FROM nodes WHERE id = ?"))
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(None);
        };
        let node = Node::try_from(row)?;

        let connections = sqlx::query("DELETE FROM connections WHERE from_node_id = ? OR to_node_id = ?")
            .bind(id)
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        sqlx::query("DELETE FROM nodes WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        debug!(node_id = %id, connections_removed = connections, "Node deleted with cascade");

        Ok(Some(CascadeOutcome {
            node,
            connections_removed: connections,
        }))
    }

    async fn list_nodes(&self, filter: &NodeFilter) -> StorageResult<Vec<Node>> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {NODE_COLUMNS} FROM nodes"));
        filter.push_where(&mut qb);
        qb.push(" ORDER BY created_at ASC, rowid ASC");

        let rows: Vec<NodeRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter().map(Node::try_from).collect()
    }

    async fn category_exists(&self, category: &str) -> StorageResult<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM nodes WHERE category = ?)")
                .bind(category)
                .fetch_one(&self.pool)
                .await?;

        Ok(exists)
    }

    async fn list_category_keys(&self) -> StorageResult<Vec<String>> {
        let keys: Vec<String> =
            sqlx::query_scalar("SELECT DISTINCT category FROM nodes ORDER BY category ASC")
                .fetch_all(&self.pool)
                .await?;

        Ok(keys)
    }

    async fn insert_connection(&self, connection: &Connection) -> StorageResult<()> {
        insert_connection_query(connection)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_connection(&self, id: &str) -> StorageResult<Option<Connection>> {
        let row: Option<ConnectionRow> = sqlx::query_as(&format!(
            "SELECT {CONNECTION_COLUMNS} FROM connections WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Connection::try_from).transpose()
    }

    async fn update_connection(&self, connection: &Connection) -> StorageResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE connections
            SET to_node_id = ?, label = ?, order_index = ?, is_active = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&connection.to_node_id)
        .bind(&connection.label)
        .bind(connection.order_index)
        .bind(connection.is_active)
        .bind(to_db_timestamp(&connection.updated_at))
        .bind(&connection.id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_connection(&self, id: &str) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM connections WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_connections(&self, filter: &ConnectionFilter) -> StorageResult<Vec<Connection>> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {CONNECTION_COLUMNS} FROM connections"
        ));
        filter.push_where(&mut qb);
        qb.push(" ORDER BY order_index ASC, created_at ASC, rowid ASC");

        let rows: Vec<ConnectionRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter().map(Connection::try_from).collect()
    }

    async fn insert_graph(&self, nodes: &[Node], connections: &[Connection]) -> StorageResult<()> {
        let mut tx = self.pool.begin().await?;

        for node in nodes {
            insert_node_query(node).execute(&mut *tx).await?;
        }
        for connection in connections {
            insert_connection_query(connection).execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete_category(&self, category: &str) -> StorageResult<CategoryCounts> {
        let mut tx = self.pool.begin().await?;

        let connections = sqlx::query(
            r#"
            DELETE FROM connections
            WHERE from_node_id IN (SELECT id FROM nodes WHERE category = ?)
               OR to_node_id IN (SELECT id FROM nodes WHERE category = ?)
            "#,
        )
        .bind(category)
        .bind(category)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let nodes = sqlx::query("DELETE FROM nodes WHERE category = ?")
            .bind(category)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;

        Ok(CategoryCounts { nodes, connections })
    }

    async fn set_category_active(
        &self,
        category: &str,
        active: bool,
    ) -> StorageResult<CategoryCounts> {
        let now = to_db_timestamp(&Utc::now());
        let mut tx = self.pool.begin().await?;

        let nodes = sqlx::query("UPDATE nodes SET is_active = ?, updated_at = ? WHERE category = ?")
            .bind(active)
            .bind(&now)
            .bind(category)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let connections = sqlx::query(
            r#"
            UPDATE connections SET is_active = ?, updated_at = ?
            WHERE to_node_id IN (SELECT id FROM nodes WHERE category = ?)
            "#,
        )
        .bind(active)
        .bind(&now)
        .bind(category)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;

        Ok(CategoryCounts { nodes, connections })
    }

    async fn list_display_categories(&self) -> StorageResult<Vec<String>> {
        let names: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT display_category FROM nodes
            WHERE display_category IS NOT NULL
            ORDER BY display_category ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(names)
    }

    async fn rename_display_category(&self, old: &str, new: &str) -> StorageResult<u64> {
        let result = sqlx::query(
            "UPDATE nodes SET display_category = ?, updated_at = ? WHERE display_category = ?",
        )
        .bind(new)
        .bind(to_db_timestamp(&Utc::now()))
        .bind(old)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn clear_display_category(&self, name: &str) -> StorageResult<u64> {
        let result = sqlx::query(
            "UPDATE nodes SET display_category = NULL, updated_at = ? WHERE display_category = ?",
        )
        .bind(to_db_timestamp(&Utc::now()))
        .bind(name)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn set_display_category_for(
        &self,
        category: &str,
        display_category: Option<String>,
    ) -> StorageResult<u64> {
        let result = sqlx::query(
            "UPDATE nodes SET display_category = ?, updated_at = ? WHERE category = ?",
        )
        .bind(display_category)
        .bind(to_db_timestamp(&Utc::now()))
        .bind(category)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn insert_session(&self, session: &Session) -> StorageResult<()> {
        let history = encode_history(&session.history)?;

        sqlx::query(
            r#"
            INSERT INTO sessions (id, category, current_node_id, state, history, tech_identifier,
                                  client_site, final_conclusion, started_at, updated_at,
                                  completed_at, version)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&session.id)
        .bind(&session.category)
        .bind(&session.current_node_id)
        .bind(session.state.as_str())
        .bind(&history)
        .bind(&session.tech_identifier)
        .bind(&session.client_site)
        .bind(&session.final_conclusion)
        .bind(to_db_timestamp(&session.started_at))
        .bind(to_db_timestamp(&session.updated_at))
        .bind(session.completed_at.as_ref().map(to_db_timestamp))
        .bind(session.version)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_session(&self, id: &str) -> StorageResult<Option<Session>> {
        let row: Option<SessionRow> =
            sqlx::query_as(&format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(Session::try_from).transpose()
    }

    async fn update_session_versioned(
        &self,
        session: &Session,
        expected_version: i64,
    ) -> StorageResult<bool> {
        let history = encode_history(&session.history)?;

        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET category = ?, current_node_id = ?, state = ?, history = ?, final_conclusion = ?,
                updated_at = ?, completed_at = ?, version = ?
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(&session.category)
        .bind(&session.current_node_id)
        .bind(session.state.as_str())
        .bind(&history)
        .bind(&session.final_conclusion)
        .bind(to_db_timestamp(&session.updated_at))
        .bind(session.completed_at.as_ref().map(to_db_timestamp))
        .bind(session.version)
        .bind(&session.id)
        .bind(expected_version)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_sessions(&self, filter: &SessionFilter) -> StorageResult<Vec<Session>> {
        let mut qb =
            QueryBuilder::<Sqlite>::new(format!("SELECT {SESSION_COLUMNS} FROM sessions"));
        filter.push_where(&mut qb);
        qb.push(" ORDER BY started_at DESC, rowid DESC LIMIT ")
            .push_bind(i64::from(filter.effective_page_size()))
            .push(" OFFSET ")
            .push_bind(filter.offset());

        let rows: Vec<SessionRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter().map(Session::try_from).collect()
    }

    async fn count_sessions(&self, filter: &SessionFilter) -> StorageResult<i64> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM sessions");
        filter.push_where(&mut qb);

        let count: i64 = qb.build_query_scalar().fetch_one(&self.pool).await?;
        Ok(count)
    }

    async fn session_stats(
        &self,
        filter: &SessionStatsFilter,
        stale_before: DateTime<Utc>,
    ) -> StorageResult<SessionStats> {
        let stale = to_db_timestamp(&stale_before);

        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT COUNT(*), \
             COALESCE(SUM(CASE WHEN state = 'concluded' THEN 1 ELSE 0 END), 0), \
             COALESCE(SUM(CASE WHEN state = 'abandoned' \
                 OR (state = 'active' AND started_at <= ",
        );
        qb.push_bind(stale.clone())
            .push(") THEN 1 ELSE 0 END), 0), COALESCE(SUM(CASE WHEN state = 'active' AND started_at > ")
            .push_bind(stale)
            .push(
                " THEN 1 ELSE 0 END), 0), \
                 COALESCE(AVG(CASE WHEN state = 'concluded' AND json_array_length(history) > 0 \
                     THEN CAST(json_array_length(history) AS REAL) END), 0.0) \
                 FROM sessions",
            );
        filter.push_where(&mut qb);
        let (total, completed, abandoned, active, avg_steps): (i64, i64, i64, i64, f64) =
            qb.build_query_as().fetch_one(&self.pool).await?;

        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT final_conclusion, COUNT(*) AS hits FROM sessions",
        );
        filter.push_where(&mut qb);
        qb.push(
            " AND final_conclusion IS NOT NULL \
             GROUP BY final_conclusion ORDER BY hits DESC, final_conclusion ASC LIMIT ",
        )
        .push_bind(TOP_CONCLUSIONS);
        let conclusions: Vec<(String, i64)> = qb.build_query_as().fetch_all(&self.pool).await?;

        let mut qb = QueryBuilder::<Sqlite>::new("SELECT category, COUNT(*) AS hits FROM sessions");
        filter.push_where(&mut qb);
        qb.push(" GROUP BY category ORDER BY hits DESC, category ASC");
        let categories: Vec<(String, i64)> = qb.build_query_as().fetch_all(&self.pool).await?;

        debug!(total, completed, abandoned, active, "Computed session stats");

        Ok(SessionStats {
            total_sessions: total,
            completed_sessions: completed,
            abandoned_sessions: abandoned,
            active_sessions: active,
            avg_steps_to_completion: avg_steps,
            most_common_conclusions: conclusions
                .into_iter()
                .map(|(conclusion, count)| ConclusionCount { conclusion, count })
                .collect(),
            sessions_by_category: categories
                .into_iter()
                .map(|(category, count)| CategorySessionCount { category, count })
                .collect(),
        })
    }
}

fn insert_node_query(node: &Node) -> sqlx::query::Query<'_, Sqlite, sqlx::sqlite::SqliteArguments<'_>> {
    sqlx::query(
        r#"
        INSERT INTO nodes (id, category, node_type, text, semantic_id, display_category,
                           position_x, position_y, is_active, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&node.id)
    .bind(&node.category)
    .bind(node.node_type.as_str())
    .bind(&node.text)
    .bind(&node.semantic_id)
    .bind(&node.display_category)
    .bind(node.position_x)
    .bind(node.position_y)
    .bind(node.is_active)
    .bind(to_db_timestamp(&node.created_at))
    .bind(to_db_timestamp(&node.updated_at))
}

fn insert_connection_query(
    connection: &Connection,
) -> sqlx::query::Query<'_, Sqlite, sqlx::sqlite::SqliteArguments<'_>> {
    sqlx::query(
        r#"
        INSERT INTO connections (id, from_node_id, to_node_id, label, order_index, is_active,
                                 created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&connection.id)
    .bind(&connection.from_node_id)
    .bind(&connection.to_node_id)
    .bind(&connection.label)
    .bind(connection.order_index)
    .bind(connection.is_active)
    .bind(to_db_timestamp(&connection.created_at))
    .bind(to_db_timestamp(&connection.updated_at))
}

fn encode_history(history: &[HistoryStep]) -> StorageResult<String> {
    serde_json::to_string(history).map_err(|e| StorageError::Serialization {
        message: format!("Failed to encode session history: {}", e),
    })
}

fn parse_timestamp(value: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Serialization {
            message: format!("Invalid timestamp '{}': {}", value, e),
        })
}

// Internal row types for SQLx mapping
#[derive(sqlx::FromRow)]
struct NodeRow {
    id: String,
    category: String,
    node_type: String,
    text: String,
    semantic_id: Option<String>,
    display_category: Option<String>,
    position_x: Option<f64>,
    position_y: Option<f64>,
    is_active: bool,
    created_at: String,
    updated_at: String,
}

impl TryFrom<NodeRow> for Node {
    type Error = StorageError;

    fn try_from(row: NodeRow) -> Result<Self, Self::Error> {
        let node_type =
            NodeType::from_str(&row.node_type).map_err(|message| StorageError::Serialization {
                message,
            })?;

        Ok(Self {
            id: row.id,
            category: row.category,
            node_type,
            text: row.text,
            semantic_id: row.semantic_id,
            display_category: row.display_category,
            position_x: row.position_x,
            position_y: row.position_y,
            is_active: row.is_active,
            created_at: parse_timestamp(&row.created_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ConnectionRow {
    id: String,
    from_node_id: String,
    to_node_id: String,
    label: String,
    order_index: i32,
    is_active: bool,
    created_at: String,
    updated_at: String,
}

impl TryFrom<ConnectionRow> for Connection {
    type Error = StorageError;

    fn try_from(row: ConnectionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            from_node_id: row.from_node_id,
            to_node_id: row.to_node_id,
            label: row.label,
            order_index: row.order_index,
            is_active: row.is_active,
            created_at: parse_timestamp(&row.created_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    category: String,
    current_node_id: String,
    state: String,
    history: String,
    tech_identifier: Option<String>,
    client_site: Option<String>,
    final_conclusion: Option<String>,
    started_at: String,
    updated_at: String,
    completed_at: Option<String>,
    version: i64,
}

impl TryFrom<SessionRow> for Session {
    type Error = StorageError;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        let state = SessionState::from_str(&row.state)
            .map_err(|message| StorageError::Serialization { message })?;
        let history: Vec<HistoryStep> =
            serde_json::from_str(&row.history).map_err(|e| StorageError::Serialization {
                message: format!("Corrupt history for session {}: {}", row.id, e),
            })?;

        Ok(Self {
            id: row.id,
            category: row.category,
            current_node_id: row.current_node_id,
            state,
            history,
            tech_identifier: row.tech_identifier,
            client_site: row.client_site,
            final_conclusion: row.final_conclusion,
            started_at: parse_timestamp(&row.started_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
            completed_at: row.completed_at.as_deref().map(parse_timestamp).transpose()?,
            version: row.version,
        })
    }
}

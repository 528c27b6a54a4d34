//! Integration tests for SQLite storage layer
//!
//! Tests database operations using an in-memory SQLite database, plus one
//! file-backed database to cover pool creation and migrations on disk.

use chrono::{Duration, Utc};

use troubleshoot_graph::config::DatabaseConfig;
use troubleshoot_graph::storage::{
    Connection, ConnectionFilter, HistoryStep, Node, NodeFilter, NodeType, Session,
    SessionFilter, SessionState, SqliteStorage, Storage,
};

/// Create an in-memory storage instance for testing
async fn create_test_storage() -> SqliteStorage {
    SqliteStorage::new_in_memory()
        .await
        .expect("Failed to create in-memory storage")
}

/// Insert a question, a conclusion and a connection between them
async fn seed_pair(storage: &SqliteStorage, category: &str) -> (Node, Node, Connection) {
    let q = Node::new(category, NodeType::Question, "Is it on?");
    let c = Node::new(category, NodeType::Conclusion, "Check the plug");
    let conn = Connection::new(&q.id, &c.id, "No", 0);
    storage.insert_node(&q).await.unwrap();
    storage.insert_node(&c).await.unwrap();
    storage.insert_connection(&conn).await.unwrap();
    (q, c, conn)
}

#[cfg(test)]
mod node_tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_and_get_node() {
        let storage = create_test_storage().await;

        let node = Node::new("printer", NodeType::Question, "Is it on?")
            .with_semantic_id("printer_start")
            .with_display_category("Hardware")
            .with_position(1.5, 2.5);
        storage.insert_node(&node).await.unwrap();

        let retrieved = storage.get_node(&node.id).await.unwrap().unwrap();
        assert_eq!(retrieved.id, node.id);
        assert_eq!(retrieved.category, "printer");
        assert_eq!(retrieved.node_type, NodeType::Question);
        assert_eq!(retrieved.text, "Is it on?");
        assert_eq!(retrieved.semantic_id.as_deref(), Some("printer_start"));
        assert_eq!(retrieved.display_category.as_deref(), Some("Hardware"));
        assert_eq!(retrieved.position_x, Some(1.5));
        assert_eq!(retrieved.position_y, Some(2.5));
        assert!(retrieved.is_active);
        assert!((retrieved.created_at - node.created_at).num_milliseconds().abs() < 1);
    }

    #[tokio::test]
    async fn test_get_nonexistent_node() {
        let storage = create_test_storage().await;
        assert!(storage.get_node("nonexistent-id").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_node() {
        let storage = create_test_storage().await;

        let mut node = Node::new("printer", NodeType::Question, "Is it on?");
        storage.insert_node(&node).await.unwrap();

        node.text = "Is the power light on?".to_string();
        node.is_active = false;
        assert!(storage.update_node(&node).await.unwrap());

        let retrieved = storage.get_node(&node.id).await.unwrap().unwrap();
        assert_eq!(retrieved.text, "Is the power light on?");
        assert!(!retrieved.is_active);
    }

    #[tokio::test]
    async fn test_update_missing_node_returns_false() {
        let storage = create_test_storage().await;
        let node = Node::new("printer", NodeType::Question, "ghost");
        assert!(!storage.update_node(&node).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_nodes_filters() {
        let storage = create_test_storage().await;
        seed_pair(&storage, "printer").await;
        seed_pair(&storage, "network").await;
        let hidden = Node::new("printer", NodeType::Question, "hidden").as_inactive();
        storage.insert_node(&hidden).await.unwrap();

        let all = storage.list_nodes(&NodeFilter::all()).await.unwrap();
        assert_eq!(all.len(), 5);

        let printer = storage
            .list_nodes(&NodeFilter::all().in_category("printer"))
            .await
            .unwrap();
        assert_eq!(printer.len(), 3);
        // Oldest first
        assert_eq!(printer[0].text, "Is it on?");
        assert_eq!(printer[2].text, "hidden");

        let active = storage
            .list_nodes(&NodeFilter::active().in_category("printer"))
            .await
            .unwrap();
        assert_eq!(active.len(), 2);

        let conclusions = storage
            .list_nodes(&NodeFilter::all().of_type(NodeType::Conclusion))
            .await
            .unwrap();
        assert_eq!(conclusions.len(), 2);
    }

    #[tokio::test]
    async fn test_category_keys() {
        let storage = create_test_storage().await;
        seed_pair(&storage, "printer").await;
        seed_pair(&storage, "network").await;

        assert!(storage.category_exists("printer").await.unwrap());
        assert!(!storage.category_exists("scanner").await.unwrap());
        assert_eq!(
            storage.list_category_keys().await.unwrap(),
            vec!["network".to_string(), "printer".to_string()]
        );
    }
}

#[cfg(test)]
mod cascade_tests {
    use super::*;

    #[tokio::test]
    async fn test_delete_node_cascade_removes_touching_connections() {
        let storage = create_test_storage().await;
        let (q, c, _) = seed_pair(&storage, "printer").await;
        let other = Node::new("printer", NodeType::Question, "Another?");
        storage.insert_node(&other).await.unwrap();
        storage
            .insert_connection(&Connection::new(&other.id, &q.id, "Back", 0))
            .await
            .unwrap();
        storage
            .insert_connection(&Connection::new(&other.id, &c.id, "Skip", 1))
            .await
            .unwrap();

        let outcome = storage.delete_node_cascade(&q.id).await.unwrap().unwrap();
        assert_eq!(outcome.node.id, q.id);
        assert_eq!(outcome.connections_removed, 2);

        assert!(storage.get_node(&q.id).await.unwrap().is_none());
        let remaining = storage
            .list_connections(&ConnectionFilter::all())
            .await
            .unwrap();
        assert_eq!(remaining.len(), 1);
        assert!(remaining.iter().all(|conn| !conn.touches(&q.id)));
    }

    #[tokio::test]
    async fn test_delete_missing_node_returns_none() {
        let storage = create_test_storage().await;
        assert!(storage.delete_node_cascade("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_insert_graph_is_atomic() {
        let storage = create_test_storage().await;
        let a = Node::new("printer", NodeType::Question, "a");
        let b = Node::new("printer", NodeType::Conclusion, "b");
        // Reusing a's id violates the primary key on the second insert.
        let mut dup = Node::new("printer", NodeType::Conclusion, "dup");
        dup.id = a.id.clone();
        let conn = Connection::new(&a.id, &b.id, "next", 0);

        let result = storage.insert_graph(&[a, b, dup], &[conn]).await;
        assert!(result.is_err());
        assert!(!storage.category_exists("printer").await.unwrap());
        assert!(storage
            .list_connections(&ConnectionFilter::all())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_self_loop_rejected_by_schema() {
        let storage = create_test_storage().await;
        let a = Node::new("printer", NodeType::Question, "a");
        storage.insert_node(&a).await.unwrap();

        let result = storage
            .insert_connection(&Connection::new(&a.id, &a.id, "loop", 0))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_delete_category_removes_incoming_connections() {
        let storage = create_test_storage().await;
        let (pq, _, _) = seed_pair(&storage, "printer").await;
        let (nq, _, _) = seed_pair(&storage, "network").await;
        storage
            .insert_connection(&Connection::new(&nq.id, &pq.id, "Printer problem", 1))
            .await
            .unwrap();

        let counts = storage.delete_category("printer").await.unwrap();
        assert_eq!(counts.nodes, 2);
        assert_eq!(counts.connections, 2);

        let network = storage
            .list_connections(&ConnectionFilter::all().from_category("network"))
            .await
            .unwrap();
        assert_eq!(network.len(), 1);
    }

    #[tokio::test]
    async fn test_set_category_active_toggles_incoming_connections() {
        let storage = create_test_storage().await;
        let (pq, _, _) = seed_pair(&storage, "printer").await;
        let (nq, _, _) = seed_pair(&storage, "network").await;
        let cross = Connection::new(&nq.id, &pq.id, "Printer problem", 1);
        storage.insert_connection(&cross).await.unwrap();

        let counts = storage.set_category_active("printer", false).await.unwrap();
        assert_eq!(counts.nodes, 2);
        // The internal connection and the cross-category one both target printer nodes.
        assert_eq!(counts.connections, 2);

        let cross = storage.get_connection(&cross.id).await.unwrap().unwrap();
        assert!(!cross.is_active);
        let inactive = storage
            .list_nodes(&NodeFilter::active().in_category("printer"))
            .await
            .unwrap();
        assert!(inactive.is_empty());
    }
}

#[cfg(test)]
mod connection_tests {
    use super::*;

    #[tokio::test]
    async fn test_connection_ordering() {
        let storage = create_test_storage().await;
        let q = Node::new("printer", NodeType::Question, "Color?");
        storage.insert_node(&q).await.unwrap();

        for (label, order) in [("third", 2), ("first", 0), ("second", 1), ("also-first", 0)] {
            let target = Node::new("printer", NodeType::Conclusion, label);
            storage.insert_node(&target).await.unwrap();
            let conn = Connection::new(&q.id, &target.id, label, order);
            storage.insert_connection(&conn).await.unwrap();
        }

        let labels: Vec<String> = storage
            .list_connections(&ConnectionFilter::active().from_node(&q.id))
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.label)
            .collect();
        assert_eq!(labels, vec!["first", "also-first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_update_and_delete_connection() {
        let storage = create_test_storage().await;
        let (_, _, mut conn) = seed_pair(&storage, "printer").await;

        conn.label = "Nope".to_string();
        conn.order_index = 4;
        conn.is_active = false;
        assert!(storage.update_connection(&conn).await.unwrap());

        let retrieved = storage.get_connection(&conn.id).await.unwrap().unwrap();
        assert_eq!(retrieved.label, "Nope");
        assert_eq!(retrieved.order_index, 4);
        assert!(!retrieved.is_active);

        assert!(storage.delete_connection(&conn.id).await.unwrap());
        assert!(!storage.delete_connection(&conn.id).await.unwrap());
        assert!(storage.get_connection(&conn.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_connection_filters() {
        let storage = create_test_storage().await;
        let (q, c, conn) = seed_pair(&storage, "printer").await;

        let to_c = storage
            .list_connections(&ConnectionFilter::all().to_node(&c.id))
            .await
            .unwrap();
        assert_eq!(to_c.len(), 1);
        assert_eq!(to_c[0].id, conn.id);

        let into_printer = storage
            .list_connections(&ConnectionFilter::all().to_category("printer"))
            .await
            .unwrap();
        assert_eq!(into_printer.len(), 1);

        let touching = storage
            .list_connections(&ConnectionFilter::all().touching(&q.id))
            .await
            .unwrap();
        assert_eq!(touching.len(), 1);

        let elsewhere = storage
            .list_connections(&ConnectionFilter::all().from_category("network"))
            .await
            .unwrap();
        assert!(elsewhere.is_empty());
    }
}

#[cfg(test)]
mod display_category_tests {
    use super::*;

    #[tokio::test]
    async fn test_rename_and_clear_display_category() {
        let storage = create_test_storage().await;
        for (category, label) in [("printer", "Hardware"), ("scanner", "Hardware"), ("wifi", "Network")] {
            let node = Node::new(category, NodeType::Question, "q").with_display_category(label);
            storage.insert_node(&node).await.unwrap();
        }
        storage
            .insert_node(&Node::new("misc", NodeType::Question, "q"))
            .await
            .unwrap();

        assert_eq!(
            storage.list_display_categories().await.unwrap(),
            vec!["Hardware".to_string(), "Network".to_string()]
        );

        assert_eq!(storage.rename_display_category("Hardware", "Devices").await.unwrap(), 2);
        assert_eq!(storage.rename_display_category("Hardware", "Devices").await.unwrap(), 0);

        assert_eq!(storage.clear_display_category("Network").await.unwrap(), 1);
        assert_eq!(
            storage.list_display_categories().await.unwrap(),
            vec!["Devices".to_string()]
        );

        assert_eq!(
            storage
                .set_display_category_for("misc", Some("Other".to_string()))
                .await
                .unwrap(),
            1
        );
    }
}

#[cfg(test)]
mod session_tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_and_get_session() {
        let storage = create_test_storage().await;

        let mut session = Session::new("printer", "root-1")
            .with_tech_identifier("tech-7")
            .with_client_site("Main Office");
        session.history.push(HistoryStep {
            from_node_id: "root-1".to_string(),
            from_node_text: "Is it on?".to_string(),
            connection_id: "c1".to_string(),
            connection_label: "No".to_string(),
            to_node_id: "n2".to_string(),
            answered_at: Utc::now(),
        });
        storage.insert_session(&session).await.unwrap();

        let retrieved = storage.get_session(&session.id).await.unwrap().unwrap();
        assert_eq!(retrieved.category, "printer");
        assert_eq!(retrieved.state, SessionState::Active);
        assert_eq!(retrieved.history.len(), 1);
        assert_eq!(retrieved.history[0].connection_label, "No");
        assert_eq!(retrieved.tech_identifier.as_deref(), Some("tech-7"));
        assert_eq!(retrieved.version, 0);
        assert!(retrieved.completed_at.is_none());
    }

    #[tokio::test]
    async fn test_versioned_update() {
        let storage = create_test_storage().await;
        let mut session = Session::new("printer", "root-1");
        storage.insert_session(&session).await.unwrap();

        session.state = SessionState::Abandoned;
        session.completed_at = Some(Utc::now());
        session.version = 1;
        assert!(storage.update_session_versioned(&session, 0).await.unwrap());

        // A second writer still holding version 0 loses.
        session.version = 1;
        assert!(!storage.update_session_versioned(&session, 0).await.unwrap());

        let retrieved = storage.get_session(&session.id).await.unwrap().unwrap();
        assert_eq!(retrieved.state, SessionState::Abandoned);
        assert_eq!(retrieved.version, 1);
        assert!(retrieved.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_list_sessions_filters_and_pages() {
        let storage = create_test_storage().await;
        let base = Utc::now() - Duration::hours(10);

        for i in 0..5 {
            let mut session = Session::new(if i % 2 == 0 { "printer" } else { "wifi" }, "root")
                .with_tech_identifier(format!("Tech_{}", i))
                .with_client_site(if i < 2 { "North 100% Site" } else { "South" });
            session.started_at = base + Duration::hours(i);
            if i == 4 {
                session.state = SessionState::Concluded;
            }
            storage.insert_session(&session).await.unwrap();
        }

        let all = storage.list_sessions(&SessionFilter::default()).await.unwrap();
        assert_eq!(all.len(), 5);
        // Newest first
        assert_eq!(all[0].tech_identifier.as_deref(), Some("Tech_4"));

        let printer = SessionFilter::default().in_category("printer");
        assert_eq!(storage.count_sessions(&printer).await.unwrap(), 3);

        let concluded = SessionFilter::default().with_state(SessionState::Concluded);
        assert_eq!(storage.count_sessions(&concluded).await.unwrap(), 1);

        // Case-insensitive, and '%' is matched literally
        let search = SessionFilter::default().matching("100%");
        assert_eq!(storage.count_sessions(&search).await.unwrap(), 2);
        let search = SessionFilter::default().matching("tech_3");
        assert_eq!(storage.count_sessions(&search).await.unwrap(), 1);
        let search = SessionFilter::default().matching("tech%");
        assert_eq!(storage.count_sessions(&search).await.unwrap(), 0);

        let recent = SessionFilter {
            started_after: Some(base + Duration::minutes(150)),
            ..SessionFilter::default()
        };
        assert_eq!(storage.count_sessions(&recent).await.unwrap(), 2);

        let page = SessionFilter::default().page(2, 2);
        let second = storage.list_sessions(&page).await.unwrap();
        assert_eq!(second.len(), 2);
        assert_eq!(second[0].tech_identifier.as_deref(), Some("Tech_2"));
        assert_eq!(storage.count_sessions(&page).await.unwrap(), 5);
    }
}

#[cfg(test)]
mod file_backed_tests {
    use super::*;

    #[tokio::test]
    async fn test_file_database_persists_across_pools() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig {
            path: dir.path().join("nested").join("graph.db"),
            max_connections: 2,
        };

        let node = Node::new("printer", NodeType::Question, "Is it on?");
        {
            let storage = SqliteStorage::new(&config).await.unwrap();
            storage.insert_node(&node).await.unwrap();
            storage.pool().close().await;
        }

        let reopened = SqliteStorage::new(&config).await.unwrap();
        let retrieved = reopened.get_node(&node.id).await.unwrap();
        assert!(retrieved.is_some());
    }
}

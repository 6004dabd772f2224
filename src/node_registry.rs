// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Durable registry of remote nodes.
//!
//! Nodes share the database with the truth store. Credentials are stored
//! alongside each node but only leave the registry through the
//! crate-internal [`NodeRegistry::credentials()`], which the sync path uses
//! to build a peer client.
//!
//! # Status
//!
//! A node starts `inactive`. Only the outcome of a sync pass changes status,
//! through [`NodeRegistry::update_status()`].

use crate::db::{execute_with_retry, from_millis, now_millis, Database};
use crate::error::{ReplicationError, Result};
use crate::model::{ApiKey, Node, NodeId, NodeStatus};
use chrono::{DateTime, Utc};
use reqwest::Url;
use sqlx::sqlite::SqlitePool;
use tracing::{debug, info, warn};

type NodeRow = (i64, String, String, String, Option<i64>, i64);

const SELECT_COLUMNS: &str = "SELECT id, name, endpoint, status, last_sync, created_at FROM nodes";

fn row_to_node(row: NodeRow) -> Result<Node> {
    let (id, name, endpoint, status, last_sync, created_at) = row;
    let status = NodeStatus::parse(&status).ok_or_else(|| {
        ReplicationError::Internal(format!("Unknown stored status for node {}: {}", id, status))
    })?;
    Ok(Node {
        id,
        name,
        endpoint,
        status,
        last_sync: last_sync.map(from_millis).transpose()?,
        created_at: from_millis(created_at)?,
    })
}

/// Validate an endpoint and return its stored form (no trailing `/`).
pub fn normalize_endpoint(endpoint: &str) -> Result<String> {
    let trimmed = endpoint
        .trim()
        .trim_end_matches(|c: char| c == '/' || c.is_whitespace());
    if trimmed.is_empty() {
        return Err(ReplicationError::validation("Endpoint is required"));
    }

    let url = Url::parse(trimmed)
        .map_err(|e| ReplicationError::validation(format!("Invalid endpoint '{}': {}", trimmed, e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ReplicationError::validation(format!(
            "Endpoint must use http or https: {}",
            trimmed
        )));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(ReplicationError::validation(format!(
            "Endpoint has no host: {}",
            trimmed
        )));
    }

    Ok(trimmed.to_string())
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
        _ => false,
    }
}

/// Registry of remote nodes.
#[derive(Clone)]
pub struct NodeRegistry {
    pool: SqlitePool,
}

impl NodeRegistry {
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }

    /// Register a remote node. Starts `inactive` with no `last_sync`.
    pub async fn register(&self, name: &str, endpoint: &str, api_key: Option<&str>) -> Result<Node> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ReplicationError::validation("Name is required"));
        }
        let endpoint = normalize_endpoint(endpoint)?;

        let existing: Option<(i64,)> = sqlx::query_as("SELECT id FROM nodes WHERE endpoint = ?")
            .bind(&endpoint)
            .fetch_optional(&self.pool)
            .await?;
        if let Some((id,)) = existing {
            return Err(ReplicationError::validation(format!(
                "Endpoint already registered as node {}: {}",
                id, endpoint
            )));
        }

        let api_key = api_key.unwrap_or_default();
        let status = NodeStatus::Inactive;
        let created_at = now_millis();
        let pool = &self.pool;

        let result = execute_with_retry("node_register", || async {
            sqlx::query(
                r#"
                INSERT INTO nodes (name, endpoint, api_key, status, last_sync, created_at)
                VALUES (?, ?, ?, ?, NULL, ?)
                "#,
            )
            .bind(name)
            .bind(&endpoint)
            .bind(api_key)
            .bind(status.as_str())
            .bind(created_at)
            .execute(pool)
            .await
        })
        .await;

        let result = match result {
            Ok(result) => result,
            // Lost a race with a concurrent registration of the same endpoint
            Err(e) if is_unique_violation(&e) => {
                return Err(ReplicationError::validation(format!(
                    "Endpoint already registered: {}",
                    endpoint
                )));
            }
            Err(e) => return Err(e.into()),
        };

        let node = Node {
            id: result.last_insert_rowid(),
            name: name.to_string(),
            endpoint,
            status,
            last_sync: None,
            created_at: from_millis(created_at)?,
        };

        info!(node_id = node.id, name = %node.name, endpoint = %node.endpoint, "Node registered");
        Ok(node)
    }

    pub async fn get(&self, id: NodeId) -> Result<Node> {
        let row: Option<NodeRow> = sqlx::query_as(&format!("{} WHERE id = ?", SELECT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => row_to_node(row),
            None => Err(ReplicationError::node_not_found(id)),
        }
    }

    /// All nodes, ordered by id.
    pub async fn list(&self) -> Result<Vec<Node>> {
        let rows: Vec<NodeRow> = sqlx::query_as(&format!("{} ORDER BY id ASC", SELECT_COLUMNS))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(row_to_node).collect()
    }

    pub async fn count(&self) -> Result<usize> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM nodes")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    pub async fn remove(&self, id: NodeId) -> Result<()> {
        let pool = &self.pool;

        let result = execute_with_retry("node_remove", || async {
            sqlx::query("DELETE FROM nodes WHERE id = ?")
                .bind(id)
                .execute(pool)
                .await
        })
        .await?;

        if result.rows_affected() == 0 {
            return Err(ReplicationError::node_not_found(id));
        }

        info!(node_id = id, "Node removed");
        Ok(())
    }

    /// Record the outcome of a sync attempt.
    pub(crate) async fn update_status(
        &self,
        id: NodeId,
        status: NodeStatus,
        last_sync: DateTime<Utc>,
    ) -> Result<()> {
        let pool = &self.pool;
        let last_sync_ms = last_sync.timestamp_millis();

        let result = execute_with_retry("node_update_status", || async {
            sqlx::query("UPDATE nodes SET status = ?, last_sync = ? WHERE id = ?")
                .bind(status.as_str())
                .bind(last_sync_ms)
                .bind(id)
                .execute(pool)
                .await
        })
        .await?;

        if result.rows_affected() == 0 {
            warn!(node_id = id, status = %status, "Status update for missing node");
            return Err(ReplicationError::node_not_found(id));
        }

        debug!(node_id = id, status = %status, "Node status updated");
        Ok(())
    }

    /// The node's credential. Never exposed outside the crate.
    pub(crate) async fn credentials(&self, id: NodeId) -> Result<ApiKey> {
        let row: Option<(String,)> = sqlx::query_as("SELECT api_key FROM nodes WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|(key,)| ApiKey::new(key))
            .ok_or_else(|| ReplicationError::node_not_found(id))
    }
}

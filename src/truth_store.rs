// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The local truth store.
//!
//! Authoritative collection of truths backed by the shared SQLite database.
//! Ids come from SQLite `AUTOINCREMENT`, so they are unique across
//! concurrent writers and never reused after a delete.
//!
//! # Content Lookup
//!
//! Each row carries a SHA-256 digest of its content. [`TruthStore::find_by_content()`]
//! narrows by digest through an index and then compares the full text, so
//! the match is exact content equality.
//!
//! # Ordering
//!
//! Listings are ordered by `created_at` ascending with `id` as tie-breaker.
//! Remote nodes page through this ordering during a sync.

use crate::db::{execute_with_retry, from_millis, now_millis, Database};
use crate::error::{ReplicationError, Result};
use crate::metrics;
use crate::model::{Truth, TruthId};
use crate::topics;
use sqlx::sqlite::SqlitePool;
use std::collections::BTreeSet;
use tracing::{debug, info};

type TruthRow = (i64, String, Option<String>, String, i64);

const SELECT_COLUMNS: &str = "SELECT id, content, source, topics, created_at FROM truths";

/// Compute SHA256 content hash as hex string.
pub fn content_hash(content: &str) -> String {
    use sha2::{Digest, Sha256};
    hex::encode(Sha256::digest(content.as_bytes()))
}

fn row_to_truth(row: TruthRow) -> Result<Truth> {
    let (id, content, source, topics_json, created_at) = row;
    let topics: BTreeSet<String> = serde_json::from_str(&topics_json).map_err(|e| {
        ReplicationError::Internal(format!("Corrupt topics for truth {}: {}", id, e))
    })?;
    Ok(Truth {
        id,
        content,
        source,
        topics,
        created_at: from_millis(created_at)?,
    })
}

fn rows_to_truths(rows: Vec<TruthRow>) -> Result<Vec<Truth>> {
    rows.into_iter().map(row_to_truth).collect()
}

fn encode_topics(topics: &BTreeSet<String>) -> Result<String> {
    serde_json::to_string(topics)
        .map_err(|e| ReplicationError::Internal(format!("Cannot encode topics: {}", e)))
}

/// Durable truth collection.
#[derive(Clone)]
pub struct TruthStore {
    pool: SqlitePool,
}

impl TruthStore {
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }

    /// Store a new truth.
    ///
    /// Fails with `Validation` if `content` is empty or whitespace, before
    /// anything is written. An empty `topics` slice means "extract from content".
    pub async fn add(&self, content: &str, source: Option<&str>, topics: &[String]) -> Result<Truth> {
        if content.trim().is_empty() {
            return Err(ReplicationError::validation("Content is required"));
        }

        let source = source.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);
        let topics = topics::resolve(content, topics);
        let topics_json = encode_topics(&topics)?;
        let hash = content_hash(content);
        let created_at = now_millis();
        let pool = &self.pool;

        let result = execute_with_retry("truth_add", || async {
            sqlx::query(
                r#"
                INSERT INTO truths (content, content_hash, source, topics, created_at)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(content)
            .bind(&hash)
            .bind(&source)
            .bind(&topics_json)
            .bind(created_at)
            .execute(pool)
            .await
        })
        .await?;

        let truth = Truth {
            id: result.last_insert_rowid(),
            content: content.to_string(),
            source,
            topics,
            created_at: from_millis(created_at)?,
        };

        metrics::record_truth_mutation("add");
        debug!(truth_id = truth.id, topics = ?truth.topics, "Truth added");
        Ok(truth)
    }

    /// Fetch a truth by id.
    pub async fn get(&self, id: TruthId) -> Result<Truth> {
        let row: Option<TruthRow> = sqlx::query_as(&format!("{} WHERE id = ?", SELECT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => row_to_truth(row),
            None => Err(ReplicationError::truth_not_found(id)),
        }
    }

    /// Permanently remove a truth. Fails with `NotFound` if absent.
    pub async fn delete(&self, id: TruthId) -> Result<()> {
        let pool = &self.pool;

        let result = execute_with_retry("truth_delete", || async {
            sqlx::query("DELETE FROM truths WHERE id = ?")
                .bind(id)
                .execute(pool)
                .await
        })
        .await?;

        if result.rows_affected() == 0 {
            return Err(ReplicationError::truth_not_found(id));
        }

        metrics::record_truth_mutation("delete");
        info!(truth_id = id, "Truth deleted");
        Ok(())
    }

    /// All truths, oldest first.
    pub async fn list(&self) -> Result<Vec<Truth>> {
        let rows: Vec<TruthRow> =
            sqlx::query_as(&format!("{} ORDER BY created_at ASC, id ASC", SELECT_COLUMNS))
                .fetch_all(&self.pool)
                .await?;
        rows_to_truths(rows)
    }

    /// One page of [`list()`](Self::list).
    pub async fn list_page(&self, offset: usize, limit: usize) -> Result<Vec<Truth>> {
        let rows: Vec<TruthRow> = sqlx::query_as(&format!(
            "{} ORDER BY created_at ASC, id ASC LIMIT ? OFFSET ?",
            SELECT_COLUMNS
        ))
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;
        rows_to_truths(rows)
    }

    /// Number of stored truths.
    pub async fn count(&self) -> Result<usize> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM truths")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    /// Union of all topics across all truths.
    pub async fn list_topics(&self) -> Result<BTreeSet<String>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT topics FROM truths")
            .fetch_all(&self.pool)
            .await?;

        let mut all = BTreeSet::new();
        for (topics_json,) in rows {
            let topics: BTreeSet<String> = serde_json::from_str(&topics_json)
                .map_err(|e| ReplicationError::Internal(format!("Corrupt topics: {}", e)))?;
            all.extend(topics);
        }
        Ok(all)
    }

    /// Exact content lookup, used for duplicate detection.
    pub async fn find_by_content(&self, content: &str) -> Result<Option<Truth>> {
        let row: Option<TruthRow> = sqlx::query_as(&format!(
            "{} WHERE content_hash = ? AND content = ? ORDER BY id ASC LIMIT 1",
            SELECT_COLUMNS
        ))
        .bind(content_hash(content))
        .bind(content)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_truth).transpose()
    }

    /// Case-insensitive substring search over content.
    pub async fn search_text(&self, query: &str, limit: usize) -> Result<Vec<Truth>> {
        let rows: Vec<TruthRow> = sqlx::query_as(&format!(
            "{} WHERE instr(lower(content), lower(?)) > 0 ORDER BY created_at ASC, id ASC LIMIT ?",
            SELECT_COLUMNS
        ))
        .bind(query)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows_to_truths(rows)
    }

    /// Truths tagged with `topic` (case-insensitive).
    pub async fn by_topic(&self, topic: &str, limit: usize) -> Result<Vec<Truth>> {
        let rows: Vec<TruthRow> = sqlx::query_as(&format!(
            r#"{} WHERE EXISTS (
                SELECT 1 FROM json_each(truths.topics) WHERE lower(json_each.value) = lower(?)
            )
            ORDER BY created_at ASC, id ASC LIMIT ?"#,
            SELECT_COLUMNS
        ))
        .bind(topic.trim())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows_to_truths(rows)
    }

    /// Add topics to an existing truth. Content and creation time are untouched.
    pub async fn append_topics(&self, id: TruthId, extra: &[String]) -> Result<Truth> {
        let extra = topics::normalize(extra);
        let mut tx = self.pool.begin().await?;

        let row: Option<TruthRow> = sqlx::query_as(&format!("{} WHERE id = ?", SELECT_COLUMNS))
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        let mut truth = match row {
            Some(row) => row_to_truth(row)?,
            None => return Err(ReplicationError::truth_not_found(id)),
        };

        let before = truth.topics.len();
        truth.topics.extend(extra);
        if truth.topics.len() != before {
            sqlx::query("UPDATE truths SET topics = ? WHERE id = ?")
                .bind(encode_topics(&truth.topics)?)
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        metrics::record_truth_mutation("append_topics");
        debug!(truth_id = id, topics = ?truth.topics, "Topics appended");
        Ok(truth)
    }
}

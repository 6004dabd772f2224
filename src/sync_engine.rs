// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! One reconciliation pass against one remote node.
//!
//! # Pass Structure
//!
//! ```text
//! handshake ──► fetch listing (paged) ──► push each missing local truth
//!     │                │                          │
//!     ▼                ▼                          ▼
//!  fail: 0          fail: 0            fail: count so far, stop
//! ```
//!
//! Reconciliation is push-only and keyed on exact content: a local truth is
//! sent unless the remote already holds one with identical content. Local
//! truths are never modified by a pass, and nothing is retried within one.
//!
//! Every remote call is bounded by `sync.request_timeout`.

use crate::config::SyncConfig;
use crate::db::now_millis;
use crate::error::Result;
use crate::metrics;
use crate::model::{Node, NodeId, NodeStatus, SyncResult, TruthPayload};
use crate::peer::{BoxFuture, PeerError, PeerResult, RemotePeer};
use crate::truth_store::TruthStore;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tracing::{debug, info, info_span, warn, Instrument};

/// Result of a pass plus the node state it implies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    pub result: SyncResult,
    /// `active` on success, `error` on any transport failure.
    pub status: NodeStatus,
    /// Recorded as the node's `last_sync` whatever the outcome.
    pub attempted_at: DateTime<Utc>,
}

/// Where a pass stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Handshake,
    Fetch,
    Push,
}

impl Stage {
    fn outcome_label(self) -> &'static str {
        match self {
            Self::Handshake => "handshake_failed",
            Self::Fetch => "fetch_failed",
            Self::Push => "push_failed",
        }
    }
}

/// Runs sync passes. Stateless apart from its settings.
#[derive(Debug, Clone)]
pub struct SyncEngine {
    request_timeout: Duration,
    page_size: usize,
    max_pages: usize,
}

impl SyncEngine {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            request_timeout: config.request_timeout_duration(),
            page_size: config.page_size.max(1),
            max_pages: config.max_pages.max(1),
        }
    }

    /// Reconcile `node` against the local store.
    ///
    /// Transport failures are folded into the outcome. `Err` is returned
    /// only when the local store itself fails.
    pub async fn sync(
        &self,
        node: &Node,
        peer: &dyn RemotePeer,
        store: &TruthStore,
    ) -> Result<SyncOutcome> {
        let span = info_span!("sync", node_id = node.id, endpoint = %node.endpoint);
        self.run(node, peer, store).instrument(span).await
    }

    async fn run(&self, node: &Node, peer: &dyn RemotePeer, store: &TruthStore) -> Result<SyncOutcome> {
        let attempted_at = DateTime::from_timestamp_millis(now_millis()).unwrap_or_else(Utc::now);
        let started = Instant::now();
        metrics::record_sync_attempt(node.id);

        // Steps 1-2: anything failing before the first push counts zero
        let mut remote = match self.handshake(node.id, peer).await {
            Ok(()) => match self.remote_contents(node.id, peer).await {
                Ok(contents) => contents,
                Err(e) => return Ok(self.failed(node, Stage::Fetch, 0, e, attempted_at, started)),
            },
            Err(e) => return Ok(self.failed(node, Stage::Handshake, 0, e, attempted_at, started)),
        };

        let local = store.list().await?;
        let mut synced = 0usize;

        for truth in &local {
            if remote.contains(&truth.content) {
                continue;
            }
            let payload = TruthPayload::from(truth);
            match self.timed(node.id, "push", peer.push(&payload)).await {
                Ok(()) => {
                    synced += 1;
                    remote.insert(payload.content);
                }
                Err(e) => {
                    debug!(truth_id = truth.id, "Push failed, stopping pass");
                    return Ok(self.failed(node, Stage::Push, synced, e, attempted_at, started));
                }
            }
        }

        metrics::record_sync_outcome(node.id, "success", synced, started.elapsed());
        info!(
            synced,
            local = local.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Sync complete"
        );

        Ok(SyncOutcome {
            result: SyncResult {
                node_id: node.id,
                synced_count: synced,
                error: None,
            },
            status: NodeStatus::Active,
            attempted_at,
        })
    }

    async fn handshake(&self, node_id: NodeId, peer: &dyn RemotePeer) -> PeerResult<()> {
        let remote_id = self.timed(node_id, "handshake", peer.handshake()).await?;
        debug!(remote_id = %remote_id, "Peer accepted handshake");
        Ok(())
    }

    /// Content of every truth the remote holds, read page by page.
    ///
    /// A remote may serve fewer rows than asked for, so only an empty page
    /// ends the listing.
    async fn remote_contents(&self, node_id: NodeId, peer: &dyn RemotePeer) -> PeerResult<HashSet<String>> {
        let mut contents = HashSet::new();
        let mut offset = 0usize;

        for page_index in 0..self.max_pages {
            let page = self
                .timed(node_id, "fetch", peer.fetch_page(offset, self.page_size))
                .await?;
            if page.is_empty() {
                metrics::record_remote_snapshot(node_id, offset, page_index + 1);
                debug!(remote_truths = offset, pages = page_index + 1, "Remote listing fetched");
                return Ok(contents);
            }
            offset += page.len();
            contents.extend(page.into_iter().map(|t| t.content));
        }

        Err(PeerError::Protocol(format!(
            "remote listing still returning rows after {} pages",
            self.max_pages
        )))
    }

    async fn timed<T>(&self, node_id: NodeId, operation: &str, call: BoxFuture<'_, T>) -> PeerResult<T> {
        let start = Instant::now();
        let result = match tokio::time::timeout(self.request_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(PeerError::Timeout(operation.to_string())),
        };
        metrics::record_remote_op_latency(node_id, operation, start.elapsed());
        result
    }

    fn failed(
        &self,
        node: &Node,
        stage: Stage,
        synced: usize,
        error: PeerError,
        attempted_at: DateTime<Utc>,
        started: Instant,
    ) -> SyncOutcome {
        metrics::record_sync_outcome(node.id, stage.outcome_label(), synced, started.elapsed());
        metrics::record_error(error.kind_label());
        warn!(
            stage = stage.outcome_label(),
            synced,
            error = %error,
            "Sync failed"
        );

        SyncOutcome {
            result: SyncResult {
                node_id: node.id,
                synced_count: synced,
                error: Some(error.to_string()),
            },
            status: NodeStatus::Error,
            attempted_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-memory remote. `reject_push` is the 1-based push attempt that fails.
    #[derive(Default)]
    struct InlinePeer {
        truths: Mutex<Vec<TruthPayload>>,
        push_attempts: AtomicUsize,
        reject_push: Option<usize>,
        /// Most rows served per page, whatever the caller asks for
        page_cap: Option<usize>,
        refuse_handshake: bool,
        hang_on_fetch: bool,
    }

    impl InlinePeer {
        fn contents(&self) -> Vec<String> {
            self.truths.lock().unwrap().iter().map(|t| t.content.clone()).collect()
        }
    }

    impl RemotePeer for InlinePeer {
        fn handshake(&self) -> BoxFuture<'_, String> {
            Box::pin(async move {
                if self.refuse_handshake {
                    Err(PeerError::Unauthorized(401))
                } else {
                    Ok("remote".to_string())
                }
            })
        }

        fn fetch_page(&self, offset: usize, limit: usize) -> BoxFuture<'_, Vec<TruthPayload>> {
            Box::pin(async move {
                if self.hang_on_fetch {
                    std::future::pending::<()>().await;
                }
                let limit = self.page_cap.map_or(limit, |cap| cap.min(limit));
                let truths = self.truths.lock().unwrap();
                Ok(truths.iter().skip(offset).take(limit).cloned().collect())
            })
        }

        fn push<'a>(&'a self, truth: &'a TruthPayload) -> BoxFuture<'a, ()> {
            Box::pin(async move {
                let attempt = self.push_attempts.fetch_add(1, Ordering::SeqCst) + 1;
                if self.reject_push == Some(attempt) {
                    return Err(PeerError::Rejected { status: 500, body: "rejected".into() });
                }
                self.truths.lock().unwrap().push(truth.clone());
                Ok(())
            })
        }
    }

    fn node() -> Node {
        Node {
            id: 7,
            name: "remote".to_string(),
            endpoint: "http://remote".to_string(),
            status: NodeStatus::Inactive,
            last_sync: None,
            created_at: Utc::now(),
        }
    }

    fn payload(content: &str) -> TruthPayload {
        TruthPayload {
            content: content.to_string(),
            source: None,
            topics: Default::default(),
        }
    }

    async fn store_with(contents: &[&str]) -> TruthStore {
        let store = TruthStore::new(&Database::in_memory().await.unwrap());
        for content in contents {
            store.add(content, None, &[]).await.unwrap();
        }
        store
    }

    fn engine() -> SyncEngine {
        SyncEngine::new(&SyncConfig::testing())
    }

    #[tokio::test]
    async fn test_pushes_only_missing_truths() {
        let store = store_with(&["a", "b", "c"]).await;
        let peer = InlinePeer {
            truths: Mutex::new(vec![payload("b")]),
            ..Default::default()
        };

        let outcome = engine().sync(&node(), &peer, &store).await.unwrap();

        assert_eq!(outcome.result.synced_count, 2);
        assert!(outcome.result.error.is_none());
        assert_eq!(outcome.status, NodeStatus::Active);
        assert_eq!(peer.contents(), vec!["b", "a", "c"]);
    }

    #[tokio::test]
    async fn test_second_pass_is_noop() {
        let store = store_with(&["a", "b", "c", "d", "e"]).await;
        let peer = InlinePeer::default();

        let first = engine().sync(&node(), &peer, &store).await.unwrap();
        let second = engine().sync(&node(), &peer, &store).await.unwrap();

        assert_eq!(first.result.synced_count, 5);
        assert_eq!(second.result.synced_count, 0);
        assert_eq!(second.status, NodeStatus::Active);
        assert_eq!(peer.contents().len(), 5);
    }

    #[tokio::test]
    async fn test_duplicate_local_content_pushed_once() {
        let store = store_with(&["same", "same"]).await;
        let peer = InlinePeer::default();

        let outcome = engine().sync(&node(), &peer, &store).await.unwrap();

        assert_eq!(outcome.result.synced_count, 1);
        assert_eq!(peer.contents(), vec!["same"]);
    }

    #[tokio::test]
    async fn test_push_failure_stops_pass() {
        let store = store_with(&["one", "two", "three"]).await;
        let peer = InlinePeer {
            reject_push: Some(2),
            ..Default::default()
        };

        let outcome = engine().sync(&node(), &peer, &store).await.unwrap();

        assert_eq!(outcome.result.synced_count, 1);
        assert!(outcome.result.error.is_some());
        assert_eq!(outcome.status, NodeStatus::Error);
        // Third truth never attempted
        assert_eq!(peer.push_attempts.load(Ordering::SeqCst), 2);
        assert_eq!(peer.contents(), vec!["one"]);
    }

    #[tokio::test]
    async fn test_handshake_failure_counts_zero() {
        let store = store_with(&["a"]).await;
        let peer = InlinePeer {
            refuse_handshake: true,
            ..Default::default()
        };

        let outcome = engine().sync(&node(), &peer, &store).await.unwrap();

        assert_eq!(outcome.result.synced_count, 0);
        assert_eq!(outcome.status, NodeStatus::Error);
        assert!(outcome.result.error.unwrap().contains("401"));
        assert_eq!(peer.push_attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_hanging_fetch_times_out() {
        let store = store_with(&["a"]).await;
        let peer = InlinePeer {
            hang_on_fetch: true,
            ..Default::default()
        };

        let started = Instant::now();
        let outcome = engine().sync(&node(), &peer, &store).await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(outcome.result.synced_count, 0);
        assert!(outcome.result.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_listing_beyond_page_bound_fails() {
        let store = store_with(&["local"]).await;
        let remote: Vec<_> = (0..10).map(|i| payload(&format!("r{}", i))).collect();
        let peer = InlinePeer {
            truths: Mutex::new(remote),
            ..Default::default()
        };
        let config = SyncConfig {
            page_size: 2,
            max_pages: 3,
            ..SyncConfig::testing()
        };

        let outcome = SyncEngine::new(&config).sync(&node(), &peer, &store).await.unwrap();

        assert_eq!(outcome.status, NodeStatus::Error);
        assert_eq!(outcome.result.synced_count, 0);
        assert_eq!(peer.push_attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_listing_exactly_filling_pages() {
        let store = store_with(&["local"]).await;
        let remote: Vec<_> = (0..4).map(|i| payload(&format!("r{}", i))).collect();
        let peer = InlinePeer {
            truths: Mutex::new(remote),
            ..Default::default()
        };
        let config = SyncConfig {
            page_size: 2,
            max_pages: 3,
            ..SyncConfig::testing()
        };

        let outcome = SyncEngine::new(&config).sync(&node(), &peer, &store).await.unwrap();

        assert_eq!(outcome.status, NodeStatus::Active);
        assert_eq!(outcome.result.synced_count, 1);
    }

    #[tokio::test]
    async fn test_short_pages_do_not_end_listing() {
        let store = store_with(&["r6", "local"]).await;
        let remote: Vec<_> = (0..7).map(|i| payload(&format!("r{}", i))).collect();
        let peer = InlinePeer {
            truths: Mutex::new(remote),
            page_cap: Some(2),
            ..Default::default()
        };
        let config = SyncConfig {
            page_size: 5,
            ..SyncConfig::testing()
        };
        let engine = SyncEngine::new(&config);

        let first = engine.sync(&node(), &peer, &store).await.unwrap();
        let second = engine.sync(&node(), &peer, &store).await.unwrap();

        assert_eq!(first.result.synced_count, 1);
        assert_eq!(second.result.synced_count, 0);
        assert_eq!(peer.contents().iter().filter(|c| *c == "r6").count(), 1);
        assert_eq!(peer.contents().len(), 8);
    }

    #[tokio::test]
    async fn test_attempted_at_is_set_on_failure() {
        let store = store_with(&[]).await;
        let peer = InlinePeer {
            refuse_handshake: true,
            ..Default::default()
        };
        let before = Utc::now() - chrono::Duration::seconds(1);

        let outcome = engine().sync(&node(), &peer, &store).await.unwrap();

        assert!(outcome.attempted_at >= before);
    }
}

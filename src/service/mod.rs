// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replication service.
//!
//! The public orchestrator that ties together:
//! - The local truth store via [`crate::truth_store::TruthStore`]
//! - The node registry via [`crate::node_registry::NodeRegistry`]
//! - Sync passes via [`crate::sync_engine::SyncEngine`]
//! - Remote transport via a [`crate::peer::PeerConnector`]
//!
//! # Sync Concurrency
//!
//! A sync for a node first claims that node's lock without waiting; a second
//! concurrent request for the same node fails with `Conflict`. It then waits
//! for one of `sync.max_concurrent_syncs` global slots. Different nodes sync
//! in parallel up to that bound.
//!
//! # Status Updates
//!
//! The node's `status` and `last_sync` are written after every pass,
//! successful or not. If the node was deleted while its pass ran, the write
//! is skipped and the result is still returned.

mod types;

pub use types::{HealthCheck, ReceiveSummary, SearchKind};

use crate::config::ReplicationConfig;
use crate::db::{now_millis, Database};
use crate::error::{ReplicationError, Result};
use crate::metrics;
use crate::model::{Node, NodeId, NodeStatus, SyncResult, Truth, TruthId, TruthPayload};
use crate::node_registry::NodeRegistry;
use crate::peer::{HttpConnector, PeerConnector};
use crate::resilience::{Bulkhead, NodeLocks};
use crate::sync_engine::{SyncEngine, SyncOutcome};
use crate::truth_store::TruthStore;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Counts a running sync pass for as long as it lives.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        let running = counter.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::set_active_syncs(running);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let running = self.0.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        metrics::set_active_syncs(running);
    }
}

/// The truth store plus replication to registered nodes.
///
/// `C` is the transport used to reach nodes; production code uses the
/// default [`HttpConnector`].
pub struct ReplicationService<C: PeerConnector = HttpConnector> {
    config: ReplicationConfig,
    db: Database,
    truths: TruthStore,
    nodes: NodeRegistry,
    engine: SyncEngine,
    connector: Arc<C>,
    node_locks: NodeLocks,
    bulkhead: Bulkhead,
    syncs_in_flight: AtomicUsize,
    /// Serializes inbound batches so the duplicate check and insert are atomic
    receive_lock: Mutex<()>,
}

impl ReplicationService<HttpConnector> {
    /// Open the service with HTTP transport.
    ///
    /// Opens (or creates) the database at `config.store.sqlite_path`.
    pub async fn open(config: ReplicationConfig) -> Result<Self> {
        let connector = HttpConnector::new(&config.sync)
            .map_err(|e| ReplicationError::Config(e.to_string()))?;
        Self::with_connector(config, Arc::new(connector)).await
    }
}

impl<C: PeerConnector> ReplicationService<C> {
    /// Open the service with a custom transport.
    pub async fn with_connector(config: ReplicationConfig, connector: Arc<C>) -> Result<Self> {
        config.validate()?;
        let db = Database::open(&config.store).await?;
        let truths = TruthStore::new(&db);
        let nodes = NodeRegistry::new(&db);

        metrics::set_registered_nodes(nodes.count().await?);
        info!(
            node_id = %config.local_node_id,
            path = %db.path(),
            max_concurrent_syncs = config.sync.max_concurrent_syncs,
            "Replication service opened"
        );

        Ok(Self {
            engine: SyncEngine::new(&config.sync),
            bulkhead: Bulkhead::new(config.sync.max_concurrent_syncs),
            node_locks: NodeLocks::new(),
            syncs_in_flight: AtomicUsize::new(0),
            receive_lock: Mutex::new(()),
            config,
            db,
            truths,
            nodes,
            connector,
        })
    }

    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    /// This node's identity, as reported by the handshake endpoint.
    pub fn node_id(&self) -> &str {
        &self.config.local_node_id
    }

    /// Number of sync passes currently running.
    pub fn syncs_in_flight(&self) -> usize {
        self.syncs_in_flight.load(Ordering::SeqCst)
    }

    // =========================================================================
    // Nodes
    // =========================================================================

    pub async fn add_node(&self, name: &str, endpoint: &str, api_key: Option<&str>) -> Result<Node> {
        let node = self.nodes.register(name, endpoint, api_key).await?;
        metrics::set_registered_nodes(self.nodes.count().await?);
        Ok(node)
    }

    /// All nodes, without credentials.
    pub async fn list_nodes(&self) -> Result<Vec<Node>> {
        self.nodes.list().await
    }

    pub async fn get_node(&self, id: NodeId) -> Result<Node> {
        self.nodes.get(id).await
    }

    /// Remove a node. Does not sync; a pass already running finishes on its own.
    pub async fn delete_node(&self, id: NodeId) -> Result<()> {
        self.nodes.remove(id).await?;
        self.node_locks.remove(id);
        metrics::set_registered_nodes(self.nodes.count().await?);
        Ok(())
    }

    /// Push every local truth the node lacks.
    ///
    /// Transport failures come back inside the [`SyncResult`], never as `Err`.
    /// `Err` means the node is unknown (`NotFound`), already syncing
    /// (`Conflict`), or the local store failed.
    pub async fn sync_node(&self, id: NodeId) -> Result<SyncResult> {
        let node = self.nodes.get(id).await?;

        let _node_guard = match self.node_locks.try_lock(id) {
            Some(guard) => guard,
            None => {
                metrics::record_sync_rejected(id);
                warn!(node_id = id, "Sync already in progress, rejecting");
                return Err(ReplicationError::Conflict { node_id: id });
            }
        };

        let wait_started = Instant::now();
        let _permit = self
            .bulkhead
            .acquire()
            .await
            .map_err(|e| ReplicationError::Internal(e.to_string()))?;
        metrics::record_sync_slot_wait(wait_started.elapsed());
        let _in_flight = InFlight::enter(&self.syncs_in_flight);

        let api_key = self.nodes.credentials(id).await?;
        let outcome = match self.connector.connect(&node, &api_key) {
            Ok(peer) => self.engine.sync(&node, peer.as_ref(), &self.truths).await?,
            Err(e) => {
                warn!(node_id = id, error = %e, "Cannot build peer client");
                metrics::record_error(e.kind_label());
                SyncOutcome {
                    result: SyncResult {
                        node_id: id,
                        synced_count: 0,
                        error: Some(e.to_string()),
                    },
                    status: NodeStatus::Error,
                    attempted_at: DateTime::from_timestamp_millis(now_millis())
                        .unwrap_or_else(Utc::now),
                }
            }
        };

        match self
            .nodes
            .update_status(id, outcome.status, outcome.attempted_at)
            .await
        {
            Ok(()) => {}
            Err(ReplicationError::NotFound { .. }) => {
                warn!(node_id = id, "Node deleted during sync, status not recorded");
                self.node_locks.remove(id);
            }
            Err(e) => {
                error!(node_id = id, error = %e, "Failed to record sync status");
                return Err(e);
            }
        }

        info!(
            node_id = id,
            synced = outcome.result.synced_count,
            status = %outcome.status,
            "Sync finished"
        );
        Ok(outcome.result)
    }

    // =========================================================================
    // Truths
    // =========================================================================

    pub async fn add_truth(&self, content: &str, source: Option<&str>, topics: &[String]) -> Result<Truth> {
        self.truths.add(content, source, topics).await
    }

    pub async fn get_truth(&self, id: TruthId) -> Result<Truth> {
        self.truths.get(id).await
    }

    pub async fn delete_truth(&self, id: TruthId) -> Result<()> {
        self.truths.delete(id).await
    }

    pub async fn list_truths(&self) -> Result<Vec<Truth>> {
        self.truths.list().await
    }

    pub async fn list_truths_page(&self, offset: usize, limit: usize) -> Result<Vec<Truth>> {
        self.truths.list_page(offset, limit).await
    }

    pub async fn list_topics(&self) -> Result<BTreeSet<String>> {
        self.truths.list_topics().await
    }

    /// Search by content substring or topic. An empty query is rejected.
    pub async fn search_truths(&self, query: &str, kind: SearchKind, limit: usize) -> Result<Vec<Truth>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ReplicationError::validation("Query is required"));
        }
        match kind {
            SearchKind::Text | SearchKind::Semantic => self.truths.search_text(query, limit).await,
            SearchKind::Topic => self.truths.by_topic(query, limit).await,
        }
    }

    pub async fn truths_by_topic(&self, topic: &str, limit: usize) -> Result<Vec<Truth>> {
        self.truths.by_topic(topic, limit).await
    }

    pub async fn append_topics(&self, id: TruthId, topics: &[String]) -> Result<Truth> {
        self.truths.append_topics(id, topics).await
    }

    /// Accept truths pushed by another node.
    ///
    /// Entries with empty content, or content already stored, are skipped.
    pub async fn receive_truths(&self, batch: Vec<TruthPayload>) -> Result<ReceiveSummary> {
        let mut summary = ReceiveSummary {
            received: batch.len(),
            created: 0,
        };

        let _serialized = self.receive_lock.lock().await;
        for payload in batch {
            if payload.content.trim().is_empty() {
                continue;
            }
            if self.truths.find_by_content(&payload.content).await?.is_some() {
                continue;
            }
            let topics: Vec<String> = payload.topics.into_iter().collect();
            self.truths
                .add(&payload.content, payload.source.as_deref(), &topics)
                .await?;
            summary.created += 1;
        }

        metrics::record_truths_received(summary.received, summary.created);
        debug!(received = summary.received, created = summary.created, "Inbound truths processed");
        Ok(summary)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Health for monitoring endpoints. Performs no network I/O.
    pub async fn health(&self) -> HealthCheck {
        let truths = self.truths.count().await;
        let nodes = self.nodes.list().await;
        let healthy = truths.is_ok() && nodes.is_ok();

        if let Err(e) = truths.as_ref() {
            warn!(error = %e, "Health check: truth store unavailable");
        }

        let nodes = nodes.unwrap_or_default();
        let by_status = |status: NodeStatus| nodes.iter().filter(|n| n.status == status).count();

        HealthCheck {
            node_id: self.config.local_node_id.clone(),
            healthy,
            truths: truths.unwrap_or(0),
            nodes_total: nodes.len(),
            nodes_active: by_status(NodeStatus::Active),
            nodes_inactive: by_status(NodeStatus::Inactive),
            nodes_error: by_status(NodeStatus::Error),
            syncs_in_flight: self.syncs_in_flight(),
            max_concurrent_syncs: self.bulkhead.max_concurrent(),
        }
    }

    /// Flush and close the database.
    pub async fn close(&self) {
        info!(node_id = %self.config.local_node_id, "Closing replication service");
        self.db.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;

    async fn service() -> ReplicationService {
        let config = ReplicationConfig {
            local_node_id: "unit".into(),
            store: StoreConfig::in_memory(),
            sync: crate::config::SyncConfig::testing(),
            ..Default::default()
        };
        ReplicationService::open(config).await.unwrap()
    }

    #[tokio::test]
    async fn test_open_rejects_invalid_config() {
        let config = ReplicationConfig {
            local_node_id: "  ".into(),
            store: StoreConfig::in_memory(),
            ..Default::default()
        };
        assert!(matches!(
            ReplicationService::open(config).await,
            Err(ReplicationError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_node_lifecycle() {
        let service = service().await;

        let node = service.add_node("peer", "http://peer:5000", Some("k")).await.unwrap();
        assert_eq!(service.list_nodes().await.unwrap().len(), 1);
        assert_eq!(service.get_node(node.id).await.unwrap().name, "peer");

        service.delete_node(node.id).await.unwrap();
        assert!(service.list_nodes().await.unwrap().is_empty());
        assert!(matches!(
            service.delete_node(node.id).await,
            Err(ReplicationError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_sync_unknown_node() {
        let service = service().await;
        assert!(matches!(
            service.sync_node(42).await,
            Err(ReplicationError::NotFound { id: 42, .. })
        ));
    }

    #[tokio::test]
    async fn test_sync_unreachable_marks_error() {
        let service = service().await;
        service.add_truth("faith", None, &[]).await.unwrap();
        let node = service.add_node("down", "http://127.0.0.1:9", None).await.unwrap();

        let result = service.sync_node(node.id).await.unwrap();

        assert_eq!(result.synced_count, 0);
        assert!(result.error.is_some());
        let node = service.get_node(node.id).await.unwrap();
        assert_eq!(node.status, NodeStatus::Error);
        assert!(node.last_sync.is_some());
        assert_eq!(service.syncs_in_flight(), 0);
    }

    #[tokio::test]
    async fn test_search_requires_query() {
        let service = service().await;
        assert!(matches!(
            service.search_truths("  ", SearchKind::Text, 5).await,
            Err(ReplicationError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_search_kinds() {
        let service = service().await;
        service.add_truth("Salvation by grace", None, &[]).await.unwrap();
        service
            .add_truth("Unrelated", None, &["salvation".to_string()])
            .await
            .unwrap();

        let text = service.search_truths("grace", SearchKind::Text, 5).await.unwrap();
        assert_eq!(text.len(), 1);
        let semantic = service.search_truths("grace", SearchKind::Semantic, 5).await.unwrap();
        assert_eq!(semantic, text);
        let topic = service.search_truths("salvation", SearchKind::Topic, 5).await.unwrap();
        assert_eq!(topic.len(), 2);
    }

    #[tokio::test]
    async fn test_receive_truths_skips_duplicates_and_empty() {
        let service = service().await;
        service.add_truth("known", None, &[]).await.unwrap();

        let payload = |content: &str| TruthPayload {
            content: content.to_string(),
            source: Some("remote".to_string()),
            topics: BTreeSet::from(["history".to_string()]),
        };
        let summary = service
            .receive_truths(vec![payload("known"), payload(""), payload("new"), payload("new")])
            .await
            .unwrap();

        assert_eq!(summary, ReceiveSummary { received: 4, created: 1 });
        let created = service.list_truths().await.unwrap().pop().unwrap();
        assert_eq!(created.content, "new");
        assert_eq!(created.source.as_deref(), Some("remote"));
        assert!(created.topics.contains("history"));
    }

    #[tokio::test]
    async fn test_health() {
        let service = service().await;
        service.add_truth("one", None, &[]).await.unwrap();
        service.add_node("a", "http://a", None).await.unwrap();

        let health = service.health().await;
        assert!(health.healthy);
        assert_eq!(health.node_id, "unit");
        assert_eq!(health.truths, 1);
        assert_eq!(health.nodes_total, 1);
        assert_eq!(health.nodes_inactive, 1);
        assert_eq!(health.syncs_in_flight, 0);
        assert_eq!(health.max_concurrent_syncs, 4);
    }
}

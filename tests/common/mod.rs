//! Shared test utilities for integration and chaos tests.
//!
//! This module provides:
//! - Mock remote nodes and connector
//! - Services backed by temporary SQLite files

#![allow(dead_code)]

pub mod mock_peer;

pub use mock_peer::*;

use std::sync::Arc;
use tempfile::TempDir;
use truth_replication::{ReplicationConfig, ReplicationService};

/// A service plus the directory holding its database.
///
/// Keep the `TempDir` alive for as long as the service is used.
pub struct TestNode {
    pub service: Arc<ReplicationService<MockConnector>>,
    pub connector: Arc<MockConnector>,
    pub dir: TempDir,
}

pub fn test_config(node_id: &str, dir: &TempDir) -> ReplicationConfig {
    ReplicationConfig::for_testing(node_id, dir.path().join("truths.db"))
}

/// Open a service wired to a fresh [`MockConnector`].
pub async fn test_node(node_id: &str) -> TestNode {
    let dir = tempfile::tempdir().expect("tempdir");
    let connector = Arc::new(MockConnector::new());
    let service = ReplicationService::with_connector(test_config(node_id, &dir), connector.clone())
        .await
        .expect("open service");
    TestNode {
        service: Arc::new(service),
        connector,
        dir,
    }
}

/// Register `remote` at `endpoint` on `node` and return the new node id.
pub async fn attach_remote(node: &TestNode, endpoint: &str, remote: Arc<MockRemote>) -> i64 {
    node.connector.add_remote(endpoint, remote);
    node.service
        .add_node("remote", endpoint, Some("test-key"))
        .await
        .expect("add node")
        .id
}

//! # Truth Replication
//!
//! A durable store of short factual statements ("truths") that pushes its
//! contents to other nodes running the same service.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────────┐
//! │                          truth-replication                                │
//! │                                                                           │
//! │  ┌──────────┐    ┌────────────────────┐    ┌──────────────────────────┐   │
//! │  │ HTTP API │───►│ ReplicationService │───►│ SyncEngine (per pass)    │   │
//! │  │ (axum)   │    │ node locks, slots  │    │ handshake, fetch, push   │   │
//! │  └──────────┘    └────────────────────┘    └──────────────────────────┘   │
//! │                     │             │                     │                 │
//! │                     ▼             ▼                     ▼                 │
//! │              ┌────────────┐ ┌──────────────┐   ┌─────────────────┐        │
//! │              │ TruthStore │ │ NodeRegistry │   │ RemotePeer      │───► remote
//! │              │ (SQLite)   │ │ (SQLite)     │   │ (reqwest)       │   node
//! │              └────────────┘ └──────────────┘   └─────────────────┘        │
//! └───────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Push Replication
//!
//! A sync pass reads the remote's full listing and pushes every local truth
//! whose content the remote lacks. Truths flow in only when a remote node
//! pushes to this one.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use truth_replication::{ReplicationConfig, ReplicationService};
//!
//! #[tokio::main]
//! async fn main() -> truth_replication::Result<()> {
//!     let service = ReplicationService::open(ReplicationConfig::default()).await?;
//!
//!     service.add_truth("Wisdom is knowledge applied", None, &[]).await?;
//!     let node = service.add_node("backup", "http://10.0.0.2:5000", Some("token")).await?;
//!     let result = service.sync_node(node.id).await?;
//!     println!("pushed {}", result.synced_count);
//!
//!     service.close().await;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod metrics;
pub mod model;
pub mod node_registry;
pub mod peer;
pub mod resilience;
pub mod service;
pub mod sync_engine;
pub mod topics;
pub mod truth_store;

// Re-exports for convenience
pub use config::{AuthConfig, ReplicationConfig, ServerConfig, StoreConfig, SyncConfig};
pub use error::{ReplicationError, Result};
pub use model::{ApiKey, Node, NodeId, NodeStatus, SyncResult, Truth, TruthId, TruthPayload};
pub use peer::{HttpConnector, PeerConnector, PeerError, RemotePeer};
pub use service::{HealthCheck, ReceiveSummary, ReplicationService, SearchKind};
pub use sync_engine::{SyncEngine, SyncOutcome};
pub use truth_store::TruthStore;

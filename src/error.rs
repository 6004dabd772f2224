// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the truth store and replication service.
//!
//! Errors are categorized by their source and carry enough context to be
//! surfaced to an operator as-is.
//!
//! # Error Categories
//!
//! | Error Type | Description |
//! |------------|-------------|
//! | `Validation` | Malformed or missing input (empty content, bad endpoint) |
//! | `NotFound` | Unknown truth or node id |
//! | `Conflict` | A sync for the same node is already in flight |
//! | `Store` | Local SQLite errors (busy errors are retried before surfacing) |
//! | `Config` | Configuration invalid |
//! | `Internal` | Unexpected internal error |
//!
//! # Peer Failures During Sync
//!
//! Peer failures have their own type, [`PeerError`]. They never surface from
//! [`ReplicationService::sync_node()`] as `Err`; a failed pass is folded into
//! the returned [`SyncResult`] and the node's status instead.
//!
//! [`PeerError`]: crate::peer::PeerError
//! [`ReplicationService::sync_node()`]: crate::service::ReplicationService::sync_node
//! [`SyncResult`]: crate::model::SyncResult

use thiserror::Error;

/// Result type alias for replication operations.
pub type Result<T> = std::result::Result<T, ReplicationError>;

/// What kind of entity a [`ReplicationError::NotFound`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Truth,
    Node,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Truth => write!(f, "Truth"),
            Self::Node => write!(f, "Node"),
        }
    }
}

/// Errors that can occur in the store, registry, or replication service.
#[derive(Error, Debug)]
pub enum ReplicationError {
    /// Malformed or missing caller input.
    ///
    /// Raised before any mutation happens.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unknown truth or node id.
    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: i64 },

    /// A sync against this node is already in progress.
    ///
    /// Retryable once the running pass completes.
    #[error("Sync already in progress for node {node_id}")]
    Conflict { node_id: i64 },

    /// SQLite error in the truth store or node registry.
    #[error("Store error: {0}")]
    Store(#[from] sqlx::Error),

    /// Invalid or missing configuration.
    ///
    /// Not retryable - fix the configuration and restart.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ReplicationError {
    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a not-found error for a truth id.
    pub fn truth_not_found(id: i64) -> Self {
        Self::NotFound {
            kind: EntityKind::Truth,
            id,
        }
    }

    /// Create a not-found error for a node id.
    pub fn node_not_found(id: i64) -> Self {
        Self::NotFound {
            kind: EntityKind::Node,
            id,
        }
    }

    /// Short, stable label used for metrics.
    pub fn kind_label(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound { .. } => "not_found",
            Self::Conflict { .. } => "conflict",
            Self::Store(_) => "store",
            Self::Config(_) => "config",
            Self::Internal(_) => "internal",
        }
    }
}

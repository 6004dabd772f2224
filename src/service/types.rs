//! Request and report types for the replication service.

use crate::error::{ReplicationError, Result};
use serde::Serialize;

/// How a search query is matched.
///
/// `Semantic` is accepted for compatibility with clients of the embedding
/// backed search. No embedding index exists here, so it matches like `Text`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchKind {
    Text,
    Semantic,
    Topic,
}

impl SearchKind {
    /// Parse the `type` query parameter. Absent means `Text`.
    pub fn parse(raw: Option<&str>) -> Result<Self> {
        match raw.map(str::trim) {
            None | Some("") | Some("text") => Ok(Self::Text),
            Some("semantic") => Ok(Self::Semantic),
            Some("topic") => Ok(Self::Topic),
            Some(other) => Err(ReplicationError::validation(format!(
                "Unknown search type: {}",
                other
            ))),
        }
    }
}

/// Outcome of accepting a batch of truths pushed by another node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReceiveSummary {
    /// Entries in the batch.
    pub received: usize,
    /// Entries stored as new truths.
    pub created: usize,
}

/// Service health for monitoring endpoints.
///
/// Collected from the local database and in-process counters; no network I/O.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub node_id: String,
    /// The local store answered.
    pub healthy: bool,
    pub truths: usize,
    pub nodes_total: usize,
    pub nodes_active: usize,
    pub nodes_inactive: usize,
    pub nodes_error: usize,
    pub syncs_in_flight: usize,
    pub max_concurrent_syncs: usize,
}

// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Domain types shared by the stores, the sync engine and the HTTP API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Identifier of a truth in the local store.
pub type TruthId = i64;

/// Identifier of a node in the local registry.
pub type NodeId = i64;

/// A stored factual statement.
///
/// `content` and `created_at` never change after creation; topics may only grow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Truth {
    pub id: TruthId,
    pub content: String,
    pub source: Option<String>,
    pub topics: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
}

/// A truth as it travels between nodes: no id, no timestamp.
///
/// Ids are assigned independently on every node, so only the payload moves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TruthPayload {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default)]
    pub topics: BTreeSet<String>,
}

impl From<&Truth> for TruthPayload {
    fn from(truth: &Truth) -> Self {
        Self {
            content: truth.content.clone(),
            source: truth.source.clone(),
            topics: truth.topics.clone(),
        }
    }
}

/// Health of a node, derived from the outcome of the last sync attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    /// Last sync completed without error.
    Active,
    /// Never synced.
    Inactive,
    /// Last sync hit a transport failure.
    Error,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Error => "error",
        }
    }

    /// Parse the persisted representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "inactive" => Some(Self::Inactive),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A registered remote node, as exposed outside the crate.
///
/// Deliberately has no credential field: the api key lives only in the
/// registry and in the peer client built for a sync pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub endpoint: String,
    pub status: NodeStatus,
    pub last_sync: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Opaque per-node credential.
///
/// `Debug` is redacted and the type is not `Serialize`.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The raw credential, for building an `Authorization` header.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.is_empty() {
            write!(f, "ApiKey(<none>)")
        } else {
            write!(f, "ApiKey(<redacted>)")
        }
    }
}

/// Outcome of one sync call. Not persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncResult {
    pub node_id: NodeId,
    /// Truths actually pushed to the remote in this pass.
    pub synced_count: usize,
    /// Transport failure description, if the pass did not complete.
    pub error: Option<String>,
}

impl SyncResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

//! Remote peer transport.
//!
//! The sync engine talks to a remote node only through [`RemotePeer`], and
//! the service obtains peers only through a [`PeerConnector`]. Tests plug
//! in in-memory implementations; production uses [`HttpConnector`], which
//! speaks the same JSON API this crate serves.
//!
//! # Wire Protocol
//!
//! | Step | Request |
//! |------|---------|
//! | handshake | `GET {endpoint}/api/replication/handshake` |
//! | fetch | `GET {endpoint}/api/truth/all?offset={o}&limit={l}` |
//! | push | `POST {endpoint}/api/truth/add` with `{content, source, topics}` |
//!
//! Every request carries `Authorization: Bearer <api_key>` when the node
//! has a non-empty key.

use crate::config::SyncConfig;
use crate::model::{ApiKey, Node, NodeId, TruthPayload};
use reqwest::StatusCode;
use serde::Deserialize;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Result type for peer operations.
pub type PeerResult<T> = std::result::Result<T, PeerError>;

/// Type alias for boxed async futures (reduces trait signature complexity).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = PeerResult<T>> + Send + 'a>>;

/// Failure talking to a remote node.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PeerError {
    /// Connection refused, DNS failure, reset.
    #[error("peer unreachable: {0}")]
    Unreachable(String),

    /// No response within the configured timeout.
    #[error("peer timed out during {0}")]
    Timeout(String),

    /// The peer rejected our credential (401/403).
    #[error("peer rejected credentials (HTTP {0})")]
    Unauthorized(u16),

    /// Any other non-success HTTP status.
    #[error("peer returned HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    /// The response did not match the expected shape.
    #[error("unexpected peer response: {0}")]
    Protocol(String),
}

impl PeerError {
    /// Short, stable label used for metrics.
    pub fn kind_label(&self) -> &'static str {
        match self {
            Self::Unreachable(_) => "unreachable",
            Self::Timeout(_) => "timeout",
            Self::Unauthorized(_) => "unauthorized",
            Self::Rejected { .. } => "rejected",
            Self::Protocol(_) => "protocol",
        }
    }
}

/// One remote node, as seen by a sync pass.
pub trait RemotePeer: Send + Sync {
    /// Verify reachability and credentials. Returns the remote's node id.
    fn handshake(&self) -> BoxFuture<'_, String>;

    /// One page of the remote's truth listing, in the remote's order.
    /// A page shorter than `limit` is the last one.
    fn fetch_page(&self, offset: usize, limit: usize) -> BoxFuture<'_, Vec<TruthPayload>>;

    /// Create one truth on the remote.
    fn push<'a>(&'a self, truth: &'a TruthPayload) -> BoxFuture<'a, ()>;
}

/// Builds a [`RemotePeer`] for a registered node.
pub trait PeerConnector: Send + Sync + 'static {
    fn connect(&self, node: &Node, api_key: &ApiKey) -> PeerResult<Arc<dyn RemotePeer>>;
}

// =============================================================================
// HTTP implementation
// =============================================================================

/// Creates [`HttpPeer`]s sharing one connection pool.
#[derive(Clone)]
pub struct HttpConnector {
    client: reqwest::Client,
}

impl HttpConnector {
    /// Build the shared client with connect/request timeouts from `config`.
    pub fn new(config: &SyncConfig) -> PeerResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout_duration())
            .timeout(config.request_timeout_duration())
            .build()
            .map_err(|e| PeerError::Protocol(format!("cannot build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

impl PeerConnector for HttpConnector {
    fn connect(&self, node: &Node, api_key: &ApiKey) -> PeerResult<Arc<dyn RemotePeer>> {
        Ok(Arc::new(HttpPeer {
            node_id: node.id,
            base_url: node.endpoint.trim_end_matches('/').to_string(),
            api_key: api_key.clone(),
            client: self.client.clone(),
        }))
    }
}

/// A remote node reached over HTTP.
pub struct HttpPeer {
    node_id: NodeId,
    base_url: String,
    api_key: ApiKey,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct HandshakeResponse {
    node_id: String,
}

#[derive(Deserialize)]
struct TruthListing {
    truths: Vec<TruthPayload>,
}

fn classify(operation: &str, e: reqwest::Error) -> PeerError {
    if e.is_timeout() {
        PeerError::Timeout(operation.to_string())
    } else if e.is_decode() {
        PeerError::Protocol(e.to_string())
    } else {
        PeerError::Unreachable(e.to_string())
    }
}

async fn check_status(response: reqwest::Response) -> PeerResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(PeerError::Unauthorized(status.as_u16()));
    }
    let body = response.text().await.unwrap_or_default();
    Err(PeerError::Rejected {
        status: status.as_u16(),
        body,
    })
}

impl HttpPeer {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.api_key.is_empty() {
            request
        } else {
            request.bearer_auth(self.api_key.expose())
        }
    }
}

impl RemotePeer for HttpPeer {
    fn handshake(&self) -> BoxFuture<'_, String> {
        Box::pin(async move {
            let request = self.authorize(self.client.get(self.url("/api/replication/handshake")));
            let response = request.send().await.map_err(|e| classify("handshake", e))?;
            let response = check_status(response).await?;
            let body: HandshakeResponse =
                response.json().await.map_err(|e| classify("handshake", e))?;
            debug!(node_id = self.node_id, remote_id = %body.node_id, "Handshake complete");
            Ok(body.node_id)
        })
    }

    fn fetch_page(&self, offset: usize, limit: usize) -> BoxFuture<'_, Vec<TruthPayload>> {
        Box::pin(async move {
            let request = self.authorize(
                self.client
                    .get(self.url("/api/truth/all"))
                    .query(&[("offset", offset), ("limit", limit)]),
            );
            let response = request.send().await.map_err(|e| classify("fetch", e))?;
            let response = check_status(response).await?;
            let listing: TruthListing = response.json().await.map_err(|e| classify("fetch", e))?;
            Ok(listing.truths)
        })
    }

    fn push<'a>(&'a self, truth: &'a TruthPayload) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let request = self.authorize(self.client.post(self.url("/api/truth/add")).json(truth));
            let response = request.send().await.map_err(|e| classify("push", e))?;
            check_status(response).await?;
            Ok(())
        })
    }
}

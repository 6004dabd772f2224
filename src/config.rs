//! Configuration for the truth replication service.
//!
//! Configuration is passed to [`ReplicationService::open()`](crate::ReplicationService::open)
//! and can be constructed programmatically or loaded from a YAML/JSON file.
//!
//! # Quick Start
//!
//! ```rust
//! use truth_replication::config::{ReplicationConfig, StoreConfig};
//!
//! let config = ReplicationConfig {
//!     local_node_id: "node-1".into(),
//!     store: StoreConfig::at("/tmp/truths.db"),
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```
//!
//! # Configuration Structure
//!
//! ```text
//! ReplicationConfig
//! ├── local_node_id: String     # This node's identity (reported by handshake)
//! ├── server: ServerConfig      # HTTP bind address
//! ├── store: StoreConfig        # SQLite persistence
//! ├── sync: SyncConfig          # Timeouts, paging, concurrency
//! └── auth: AuthConfig          # Inbound bearer token allow-list
//! ```
//!
//! # YAML Example
//!
//! ```yaml
//! local_node_id: "steward.london-1"
//!
//! server:
//!   bind_addr: "0.0.0.0:5000"
//!
//! store:
//!   sqlite_path: "/var/lib/steward/truths.db"
//!
//! sync:
//!   request_timeout: "10s"
//!   page_size: 500
//!
//! auth:
//!   allowed_tokens: ["s3cret"]
//! ```

use crate::error::{ReplicationError, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Most truths served in one `/api/truth/all` page, and so the largest
/// usable `sync.page_size`.
pub const MAX_PAGE_LIMIT: usize = 1000;

// ═══════════════════════════════════════════════════════════════════════════════
// Top-level config
// ═══════════════════════════════════════════════════════════════════════════════

/// The top-level config object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// The identity of this node. Returned by the handshake endpoint.
    #[serde(default = "default_local_node_id")]
    pub local_node_id: String,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub auth: AuthConfig,
}

fn default_local_node_id() -> String {
    "local.dev.node.default".to_string()
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            local_node_id: default_local_node_id(),
            server: ServerConfig::default(),
            store: StoreConfig::default(),
            sync: SyncConfig::default(),
            auth: AuthConfig::default(),
        }
    }
}

impl ReplicationConfig {
    /// Create a minimal config for testing, storing data at `sqlite_path`.
    pub fn for_testing(local_node_id: &str, sqlite_path: impl AsRef<Path>) -> Self {
        Self {
            local_node_id: local_node_id.to_string(),
            server: ServerConfig::default(),
            store: StoreConfig::at(sqlite_path),
            sync: SyncConfig::testing(),
            auth: AuthConfig::default(),
        }
    }

    /// Load a config file. `.yaml`/`.yml` are parsed as YAML, everything else as JSON.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ReplicationError::Config(format!("Cannot read {}: {}", path.display(), e))
        })?;

        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );

        let config: Self = if is_yaml {
            serde_yaml::from_str(&raw)
                .map_err(|e| ReplicationError::Config(format!("Invalid YAML config: {}", e)))?
        } else {
            serde_json::from_str(&raw)
                .map_err(|e| ReplicationError::Config(format!("Invalid JSON config: {}", e)))?
        };

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints that serde defaults can't express.
    pub fn validate(&self) -> Result<()> {
        if self.local_node_id.trim().is_empty() {
            return Err(ReplicationError::Config("local_node_id must not be empty".into()));
        }
        self.server.socket_addr()?;
        if self.store.sqlite_path.trim().is_empty() {
            return Err(ReplicationError::Config("store.sqlite_path must not be empty".into()));
        }
        self.sync.validate()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ServerConfig
// ═══════════════════════════════════════════════════════════════════════════════

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the API listens on, e.g. `"127.0.0.1:5000"`.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

fn default_bind_addr() -> String {
    "127.0.0.1:5000".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

impl ServerConfig {
    /// Parse the bind address.
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        self.bind_addr.parse().map_err(|e| {
            ReplicationError::Config(format!("Invalid bind_addr '{}': {}", self.bind_addr, e))
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// StoreConfig: SQLite persistence
// ═══════════════════════════════════════════════════════════════════════════════

/// Persistence settings for truths and nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the SQLite database. `":memory:"` keeps everything in process.
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,

    /// Whether to use WAL mode for SQLite (recommended).
    #[serde(default = "default_true")]
    pub wal_mode: bool,
}

fn default_sqlite_path() -> String {
    "truths.db".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sqlite_path: default_sqlite_path(),
            wal_mode: true,
        }
    }
}

impl StoreConfig {
    /// Store at a specific path.
    pub fn at(path: impl AsRef<Path>) -> Self {
        Self {
            sqlite_path: path.as_ref().to_string_lossy().to_string(),
            wal_mode: true,
        }
    }

    /// Create an in-memory config.
    pub fn in_memory() -> Self {
        Self {
            sqlite_path: ":memory:".to_string(),
            wal_mode: false,
        }
    }

    pub fn is_in_memory(&self) -> bool {
        self.sqlite_path == ":memory:"
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SyncConfig: outbound reconciliation
// ═══════════════════════════════════════════════════════════════════════════════

/// Settings for sync passes against remote nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Upper bound for every single remote call (handshake, page fetch, push),
    /// as a duration string (e.g., "10s").
    #[serde(default = "default_request_timeout")]
    pub request_timeout: String,

    /// TCP connect timeout for the HTTP client.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: String,

    /// Truths requested per listing page.
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Maximum listing pages fetched in one pass. The listing ends at the
    /// first empty page; a remote still returning rows after this many
    /// pages fails the pass.
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,

    /// Maximum sync passes running at once across all nodes.
    #[serde(default = "default_max_concurrent_syncs")]
    pub max_concurrent_syncs: usize,
}

fn default_request_timeout() -> String {
    "10s".to_string()
}

fn default_connect_timeout() -> String {
    "5s".to_string()
}

fn default_page_size() -> usize {
    500
}

fn default_max_pages() -> usize {
    200
}

fn default_max_concurrent_syncs() -> usize {
    8
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            request_timeout: default_request_timeout(),
            connect_timeout: default_connect_timeout(),
            page_size: 500,
            max_pages: 200,
            max_concurrent_syncs: 8,
        }
    }
}

impl SyncConfig {
    /// Short timeouts and small pages for tests.
    pub fn testing() -> Self {
        Self {
            request_timeout: "500ms".to_string(),
            connect_timeout: "200ms".to_string(),
            page_size: 2,
            max_pages: 50,
            max_concurrent_syncs: 4,
        }
    }

    /// Parse `request_timeout`, falling back to 10 seconds.
    pub fn request_timeout_duration(&self) -> Duration {
        humantime::parse_duration(&self.request_timeout).unwrap_or(Duration::from_secs(10))
    }

    /// Parse `connect_timeout`, falling back to 5 seconds.
    pub fn connect_timeout_duration(&self) -> Duration {
        humantime::parse_duration(&self.connect_timeout).unwrap_or(Duration::from_secs(5))
    }

    fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(ReplicationError::Config("sync.page_size must be > 0".into()));
        }
        if self.page_size > MAX_PAGE_LIMIT {
            return Err(ReplicationError::Config(format!(
                "sync.page_size must be <= {}",
                MAX_PAGE_LIMIT
            )));
        }
        if self.max_pages == 0 {
            return Err(ReplicationError::Config("sync.max_pages must be > 0".into()));
        }
        if self.max_concurrent_syncs == 0 {
            return Err(ReplicationError::Config(
                "sync.max_concurrent_syncs must be > 0".into(),
            ));
        }
        humantime::parse_duration(&self.request_timeout).map_err(|e| {
            ReplicationError::Config(format!("Invalid sync.request_timeout: {}", e))
        })?;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// AuthConfig: inbound replication credentials
// ═══════════════════════════════════════════════════════════════════════════════

/// Bearer tokens other nodes may present when syncing into this one.
///
/// An empty list leaves the API open.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub allowed_tokens: Vec<String>,
}

impl AuthConfig {
    pub fn is_open(&self) -> bool {
        self.allowed_tokens.is_empty()
    }

    pub fn allows(&self, token: &str) -> bool {
        self.allowed_tokens.iter().any(|t| t == token)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

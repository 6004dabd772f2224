//! Mock remote nodes for testing.
//!
//! [`MockRemote`] holds an in-memory truth list and records every call.
//! Failures are configurable: refuse the handshake, fail a listing page,
//! fail pushes after N successes, or hang.
//! [`MockConnector`] hands out remotes by endpoint; unknown endpoints get a
//! peer that refuses connections.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use truth_replication::peer::{BoxFuture, PeerConnector, PeerError, PeerResult, RemotePeer};
use truth_replication::{ApiKey, Node, TruthPayload};

const NEVER: usize = usize::MAX;

/// In-memory remote node.
///
/// # Example
/// ```rust,ignore
/// let remote = MockRemote::with_contents(&["already there"]);
/// remote.fail_after_pushes(1);
///
/// // Use in tests...
///
/// assert_eq!(remote.push_count(), 2);
/// ```
pub struct MockRemote {
    node_id: String,
    truths: Mutex<Vec<TruthPayload>>,
    handshake_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
    push_calls: AtomicUsize,
    /// Pushes succeed this many times, then fail
    fail_after_pushes: AtomicUsize,
    /// 0-based listing page that fails
    fail_fetch_page: AtomicUsize,
    refuse_handshake: AtomicBool,
    hang: AtomicBool,
    push_delay_ms: AtomicU64,
}

impl Default for MockRemote {
    fn default() -> Self {
        Self::new("mock-remote")
    }
}

impl MockRemote {
    pub fn new(node_id: &str) -> Self {
        Self {
            node_id: node_id.to_string(),
            truths: Mutex::new(Vec::new()),
            handshake_calls: AtomicUsize::new(0),
            fetch_calls: AtomicUsize::new(0),
            push_calls: AtomicUsize::new(0),
            fail_after_pushes: AtomicUsize::new(NEVER),
            fail_fetch_page: AtomicUsize::new(NEVER),
            refuse_handshake: AtomicBool::new(false),
            hang: AtomicBool::new(false),
            push_delay_ms: AtomicU64::new(0),
        }
    }

    pub fn with_contents(contents: &[&str]) -> Self {
        let remote = Self::default();
        for content in contents {
            remote.insert(content);
        }
        remote
    }

    /// A remote whose handshake always fails as unreachable.
    pub fn unreachable() -> Self {
        let remote = Self::new("unreachable");
        remote.refuse_handshake(true);
        remote
    }

    pub fn insert(&self, content: &str) {
        self.truths.lock().unwrap().push(TruthPayload {
            content: content.to_string(),
            source: None,
            topics: Default::default(),
        });
    }

    pub fn fail_after_pushes(&self, n: usize) {
        self.fail_after_pushes.store(n, Ordering::SeqCst);
    }

    pub fn fail_fetch_page(&self, page: usize) {
        self.fail_fetch_page.store(page, Ordering::SeqCst);
    }

    pub fn refuse_handshake(&self, refuse: bool) {
        self.refuse_handshake.store(refuse, Ordering::SeqCst);
    }

    /// Every call blocks forever.
    pub fn hang(&self, hang: bool) {
        self.hang.store(hang, Ordering::SeqCst);
    }

    pub fn set_push_delay(&self, delay: Duration) {
        self.push_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn contents(&self) -> Vec<String> {
        self.truths
            .lock()
            .unwrap()
            .iter()
            .map(|t| t.content.clone())
            .collect()
    }

    pub fn truths(&self) -> Vec<TruthPayload> {
        self.truths.lock().unwrap().clone()
    }

    pub fn handshake_count(&self) -> usize {
        self.handshake_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_count(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn push_count(&self) -> usize {
        self.push_calls.load(Ordering::SeqCst)
    }

    async fn maybe_hang(&self) {
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
    }
}

impl RemotePeer for MockRemote {
    fn handshake(&self) -> BoxFuture<'_, String> {
        Box::pin(async move {
            self.handshake_calls.fetch_add(1, Ordering::SeqCst);
            self.maybe_hang().await;
            if self.refuse_handshake.load(Ordering::SeqCst) {
                return Err(PeerError::Unreachable("connection refused".into()));
            }
            Ok(self.node_id.clone())
        })
    }

    fn fetch_page(&self, offset: usize, limit: usize) -> BoxFuture<'_, Vec<TruthPayload>> {
        Box::pin(async move {
            let page = self.fetch_calls.fetch_add(1, Ordering::SeqCst);
            self.maybe_hang().await;
            if page == self.fail_fetch_page.load(Ordering::SeqCst) {
                return Err(PeerError::Unreachable("connection reset".into()));
            }
            let truths = self.truths.lock().unwrap();
            Ok(truths.iter().skip(offset).take(limit).cloned().collect())
        })
    }

    fn push<'a>(&'a self, truth: &'a TruthPayload) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let attempt = self.push_calls.fetch_add(1, Ordering::SeqCst);
            self.maybe_hang().await;
            let delay = self.push_delay_ms.load(Ordering::SeqCst);
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            if attempt >= self.fail_after_pushes.load(Ordering::SeqCst) {
                return Err(PeerError::Rejected {
                    status: 500,
                    body: "simulated failure".into(),
                });
            }
            self.truths.lock().unwrap().push(truth.clone());
            Ok(())
        })
    }
}

/// Connector resolving endpoints to [`MockRemote`]s.
#[derive(Default)]
pub struct MockConnector {
    remotes: Mutex<HashMap<String, Arc<MockRemote>>>,
    keys_seen: Mutex<Vec<String>>,
    connects: AtomicUsize,
    refuse_all: AtomicBool,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route `endpoint` to `remote`. The endpoint must match the stored form.
    pub fn add_remote(&self, endpoint: &str, remote: Arc<MockRemote>) {
        self.remotes
            .lock()
            .unwrap()
            .insert(endpoint.to_string(), remote);
    }

    /// Fail every `connect()` as if the client could not be built.
    pub fn refuse_all(&self, refuse: bool) {
        self.refuse_all.store(refuse, Ordering::SeqCst);
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Credentials passed to `connect()`, in call order.
    pub fn keys_seen(&self) -> Vec<String> {
        self.keys_seen.lock().unwrap().clone()
    }
}

impl PeerConnector for MockConnector {
    fn connect(&self, node: &Node, api_key: &ApiKey) -> PeerResult<Arc<dyn RemotePeer>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.keys_seen
            .lock()
            .unwrap()
            .push(api_key.expose().to_string());

        if self.refuse_all.load(Ordering::SeqCst) {
            return Err(PeerError::Protocol("cannot build client".into()));
        }

        let remote = self.remotes.lock().unwrap().get(&node.endpoint).cloned();
        match remote {
            Some(remote) => Ok(remote),
            None => Ok(Arc::new(MockRemote::unreachable())),
        }
    }
}

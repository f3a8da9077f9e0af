//! Endpoint Registry — the set of live backends, refreshed from a discovery
//! source and read everywhere else as an immutable snapshot.
//!
//! Concurrency model: a single writer (the discovery task) swaps
//! in a new `Arc<Vec<Endpoint>>` behind `arc_swap::ArcSwap`; readers take
//! the pointer without locking and see a consistent view that never
//! tears mid-iteration.

pub mod discovery;

pub use discovery::{ClusterControllerClient, HttpControllerClient, StaticControllerClient};

use crate::error::{Result, RouterError};
use crate::models::Endpoint;
use arc_swap::ArcSwap;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{broadcast, Notify};
use tokio::time::Duration;
use tracing::{debug, info, warn};

/// Event published whenever a discovery refresh stops reporting a
/// previously-known URL. The Workflow Manager is the primary subscriber —
/// this is a one-way removal event, so workflow
/// contexts never hold a back-pointer into the Registry.
#[derive(Debug, Clone)]
pub struct EndpointRemoved {
    pub url: String,
}

pub struct EndpointRegistry {
    snapshot: ArcSwap<Vec<Endpoint>>,
    staleness_bound: chrono::Duration,
    ready: Notify,
    has_been_ready: std::sync::atomic::AtomicBool,
    removal_tx: broadcast::Sender<EndpointRemoved>,
    /// Set once a cold-start grace period has passed without a single
    /// successful refresh — surfaced via `DiscoveryDegraded` in health
    /// reporting, never as a request failure while the registry is
    /// non-empty.
    degraded: std::sync::atomic::AtomicBool,
}

impl EndpointRegistry {
    pub fn new(initial: Vec<Endpoint>, staleness_bound: Duration) -> Arc<Self> {
        let (removal_tx, _) = broadcast::channel(256);
        let ready_now = !initial.is_empty();
        let registry = Arc::new(Self {
            snapshot: ArcSwap::from_pointee(initial),
            staleness_bound: chrono::Duration::from_std(staleness_bound).unwrap_or(chrono::Duration::seconds(60)),
            ready: Notify::new(),
            has_been_ready: std::sync::atomic::AtomicBool::new(ready_now),
            removal_tx,
            degraded: std::sync::atomic::AtomicBool::new(false),
        });
        if ready_now {
            registry.ready.notify_waiters();
        }
        registry
    }

    /// Static discovery: builds a registry from a fixed list that never
    /// refreshes again.
    pub fn static_registry(endpoints: Vec<Endpoint>, staleness_bound: Duration) -> Arc<Self> {
        Self::new(endpoints, staleness_bound)
    }

    /// Controller-polled discovery: builds an (initially empty) registry
    /// and spawns the periodic refresh task. Returns the registry; the
    /// task runs until `shutdown` fires.
    pub fn spawn_polled(
        client: Arc<dyn ClusterControllerClient>,
        poll_interval: Duration,
        staleness_bound: Duration,
        cold_start_grace: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Arc<Self> {
        let registry = Self::new(Vec::new(), staleness_bound);
        let started_at = std::time::Instant::now();
        let registry_task = registry.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(poll_interval);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        match client.list_backends().await {
                            Ok(backends) => {
                                registry_task.degraded.store(false, std::sync::atomic::Ordering::SeqCst);
                                registry_task.apply_refresh(backends);
                            }
                            Err(e) => {
                                warn!(error = %e, "discovery refresh failed; retaining previous view");
                                if started_at.elapsed() > cold_start_grace
                                    && registry_task.list().is_empty()
                                {
                                    registry_task.degraded.store(true, std::sync::atomic::Ordering::SeqCst);
                                }
                            }
                        }
                    }
                    _ = shutdown.recv() => {
                        debug!("discovery polling loop shutting down");
                        break;
                    }
                }
            }
        });

        registry
    }

    /// Diff-updates the canonical set and publishes removal events for any
    /// URL that dropped out.
    fn apply_refresh(&self, new_backends: Vec<Endpoint>) {
        let previous: Vec<Endpoint> = (**self.snapshot.load()).clone();
        let previous_urls: HashSet<&str> = previous.iter().map(|e| e.url.as_str()).collect();
        let new_urls: HashSet<&str> = new_backends.iter().map(|e| e.url.as_str()).collect();

        for url in previous_urls.difference(&new_urls) {
            info!(url = %url, "endpoint removed by discovery");
            let _ = self.removal_tx.send(EndpointRemoved { url: url.to_string() });
        }

        let was_empty = previous.is_empty();
        self.snapshot.store(Arc::new(new_backends));

        if was_empty && !self.list().is_empty() {
            self.has_been_ready.store(true, std::sync::atomic::Ordering::SeqCst);
            self.ready.notify_waiters();
        }
    }

    /// All currently-known, non-stale endpoints.
    pub fn list(&self) -> Vec<Endpoint> {
        self.snapshot
            .load()
            .iter()
            .filter(|e| !e.is_stale(self.staleness_bound))
            .cloned()
            .collect()
    }

    /// `list()` intersected with the set serving `model`.
    pub fn list_for_model(&self, model: &str) -> Result<Vec<Endpoint>> {
        let matches: Vec<Endpoint> = self.list().into_iter().filter(|e| e.serves(model)).collect();
        if matches.is_empty() {
            Err(RouterError::NoBackendForModel {
                model: model.to_string(),
            })
        } else {
            Ok(matches)
        }
    }

    pub fn contains_url(&self, url: &str) -> bool {
        self.snapshot.load().iter().any(|e| e.url == url)
    }

    /// Resolves once at least one endpoint is available.
    pub async fn wait_ready(&self) {
        if self.has_been_ready.load(std::sync::atomic::Ordering::SeqCst) {
            return;
        }
        self.ready.notified().await;
    }

    pub fn is_ready(&self) -> bool {
        !self.list().is_empty()
    }

    pub fn is_discovery_degraded(&self) -> bool {
        self.degraded.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Subscribe to endpoint-removal events (consumed by the Workflow
    /// Context Manager's cleanup task).
    pub fn subscribe_removals(&self) -> broadcast::Receiver<EndpointRemoved> {
        self.removal_tx.subscribe()
    }

    /// Test/static-mode helper to force a refresh without a background task.
    pub fn refresh_now(&self, backends: Vec<Endpoint>) {
        self.apply_refresh(backends);
    }
}

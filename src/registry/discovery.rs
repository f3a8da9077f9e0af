//! Discovery sources consumed by the Endpoint Registry.
//!
//! A small async trait keeps the registry testable without a real cluster
//! controller: a fixed in-memory list stands in for static mode, an HTTP
//! client for polled k8s mode.

use crate::error::Result;
use crate::models::Endpoint;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::warn;

/// A source of truth for "what backends currently exist". Implemented by a
/// fixed in-memory list (static mode) or by an HTTP client against a
/// cluster controller (k8s mode).
#[async_trait]
pub trait ClusterControllerClient: Send + Sync {
    /// Returns the current set of backends. Transient failures should be
    /// returned as `Err`; the registry logs and retains its previous view
    /// rather than propagating the error to request handling.
    async fn list_backends(&self) -> Result<Vec<Endpoint>>;
}

/// A fixed list of backends that never changes during a run.
pub struct StaticControllerClient {
    endpoints: Vec<Endpoint>,
}

impl StaticControllerClient {
    pub fn new(urls: Vec<String>, models: Vec<String>) -> Self {
        let endpoints = urls
            .into_iter()
            .map(|url| Endpoint::new(url, models.clone()))
            .collect();
        Self { endpoints }
    }

    pub fn from_endpoints(endpoints: Vec<Endpoint>) -> Self {
        Self { endpoints }
    }
}

#[async_trait]
impl ClusterControllerClient for StaticControllerClient {
    async fn list_backends(&self) -> Result<Vec<Endpoint>> {
        Ok(self
            .endpoints
            .iter()
            .cloned()
            .map(|mut ep| {
                ep.last_seen = chrono::Utc::now();
                ep
            })
            .collect())
    }
}

/// Wire contract returned by a cluster controller's list endpoint.
#[derive(Debug, Deserialize)]
struct ControllerBackend {
    url: String,
    #[serde(rename = "served_model")]
    models: Vec<String>,
    #[serde(default)]
    labels: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ControllerListResponse {
    backends: Vec<ControllerBackend>,
}

/// Polls a cluster-controller HTTP endpoint that returns the current set
/// of pods/services annotated as model runtimes.
pub struct HttpControllerClient {
    client: reqwest::Client,
    list_url: String,
}

impl HttpControllerClient {
    pub fn new(list_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(5))
                .build()
                .expect("failed to build controller HTTP client"),
            list_url: list_url.into(),
        }
    }
}

#[async_trait]
impl ClusterControllerClient for HttpControllerClient {
    async fn list_backends(&self) -> Result<Vec<Endpoint>> {
        let response = self.client.get(&self.list_url).send().await.map_err(|e| {
            warn!(error = %e, url = %self.list_url, "cluster controller unreachable");
            e
        })?;

        let parsed: ControllerListResponse = response.json().await?;
        let now = chrono::Utc::now();
        Ok(parsed
            .backends
            .into_iter()
            .map(|b| Endpoint {
                url: b.url,
                models: b.models,
                labels: b.labels,
                last_seen: now,
            })
            .collect())
    }
}

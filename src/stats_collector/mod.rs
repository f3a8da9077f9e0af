//! Stats Collector — scrapes per-endpoint load metrics on a fixed interval
//! and maintains the rolling request-latency window used for QPS.
//!
//! One `reqwest::Client` is built once and shared across every scrape
//! rather than constructing a client per request. The per-endpoint
//! record uses a `parking_lot::RwLock` inside a `DashMap` so a slow scrape
//! of one backend never blocks reads of another's stats.

use crate::models::{EngineStats, RequestRecord, RequestStats};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Wire shape expected from a backend's `/metrics` (or equivalent) scrape
/// endpoint. Unknown fields are ignored; missing fields default to zero so
/// a partially-compliant engine still contributes a usable (if conservative)
/// load estimate.
#[derive(Debug, Deserialize, Default)]
struct ScrapeResponse {
    #[serde(default)]
    running_requests: u32,
    #[serde(default)]
    queued_requests: u32,
    #[serde(default)]
    gpu_utilization: f64,
    #[serde(default)]
    kv_cache_usage: f64,
    #[serde(default)]
    avg_time_to_first_token_ms: f64,
    #[serde(default)]
    avg_inter_token_latency_ms: f64,
}

struct EndpointRecord {
    engine: RwLock<EngineStats>,
    requests: RwLock<RequestStats>,
}

impl Default for EndpointRecord {
    fn default() -> Self {
        Self {
            engine: RwLock::new(EngineStats::default()),
            requests: RwLock::new(RequestStats::new()),
        }
    }
}

pub struct StatsCollector {
    client: reqwest::Client,
    records: DashMap<String, Arc<EndpointRecord>>,
    scrape_interval: Duration,
    stats_window: chrono::Duration,
}

impl StatsCollector {
    pub fn new(scrape_interval: Duration, stats_window: Duration) -> Arc<Self> {
        Arc::new(Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(3))
                .build()
                .expect("failed to build stats scrape client"),
            records: DashMap::new(),
            scrape_interval,
            stats_window: chrono::Duration::from_std(stats_window).unwrap_or(chrono::Duration::seconds(60)),
        })
    }

    fn record_for(&self, url: &str) -> Arc<EndpointRecord> {
        self.records
            .entry(url.to_string())
            .or_insert_with(|| Arc::new(EndpointRecord::default()))
            .clone()
    }

    /// Current stats snapshot for one endpoint. Endpoints never scraped
    /// yet report `EngineStats::default()`, which sorts as "least loaded"
    /// until real numbers arrive — the same posture a brand-new backend
    /// presents in practice.
    pub fn get(&self, url: &str) -> EngineStats {
        self.record_for(url).engine.read().clone()
    }

    pub fn all(&self) -> Vec<(String, EngineStats)> {
        self.records
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().engine.read().clone()))
            .collect()
    }

    /// Called by the Request Proxy when a request completes, to feed the
    /// rolling QPS window independent of what the next scrape reports.
    pub fn record_completed_request(
        &self,
        url: &str,
        arrived_at: chrono::DateTime<chrono::Utc>,
        prompt_tokens: u32,
        completion_tokens: u32,
    ) {
        let record = self.record_for(url);
        let mut requests = record.requests.write();
        requests.record(
            RequestRecord {
                arrived_at,
                completed_at: chrono::Utc::now(),
                prompt_tokens,
                completion_tokens,
            },
            self.stats_window,
        );
        let qps = requests.qps(self.stats_window);
        drop(requests);
        record.engine.write().qps = qps;
    }

    async fn scrape_one(&self, url: String) {
        let endpoint = format!("{}/metrics", url.trim_end_matches('/'));
        match self.client.get(&endpoint).send().await {
            Ok(resp) => match resp.json::<ScrapeResponse>().await {
                Ok(parsed) => {
                    let record = self.record_for(&url);
                    let mut stats = record.engine.write();
                    stats.running_requests = parsed.running_requests;
                    stats.queued_requests = parsed.queued_requests;
                    stats.gpu_utilization = parsed.gpu_utilization;
                    stats.kv_cache_usage = parsed.kv_cache_usage;
                    stats.avg_time_to_first_token_ms = parsed.avg_time_to_first_token_ms;
                    stats.avg_inter_token_latency_ms = parsed.avg_inter_token_latency_ms;
                    stats.last_refreshed = chrono::Utc::now();
                }
                Err(e) => warn!(url = %url, error = %e, "malformed stats response"),
            },
            Err(e) => debug!(url = %url, error = %e, "stats scrape failed"),
        }
    }

    /// Spawns the periodic scrape loop. `endpoints` is re-read on every
    /// tick from the provided closure so newly-discovered backends are
    /// picked up without restarting the collector.
    pub fn spawn_scrape_loop(
        self: &Arc<Self>,
        endpoints: impl Fn() -> Vec<String> + Send + Sync + 'static,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let collector = self.clone();
        let interval_duration = self.scrape_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(interval_duration);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let urls = endpoints();
                        let futures: Vec<_> = urls.into_iter().map(|u| collector.scrape_one(u)).collect();
                        futures::future::join_all(futures).await;
                    }
                    _ = shutdown.recv() => {
                        debug!("stats scrape loop shutting down");
                        break;
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unscraped_endpoint_reports_default() {
        let collector = StatsCollector::new(Duration::from_secs(30), Duration::from_secs(60));
        let stats = collector.get("http://nope");
        assert_eq!(stats.running_requests, 0);
        assert_eq!(stats.gpu_utilization, 0.0);
    }

    #[test]
    fn completed_request_updates_qps() {
        let collector = StatsCollector::new(Duration::from_secs(30), Duration::from_secs(60));
        for _ in 0..5 {
            collector.record_completed_request("http://a", chrono::Utc::now(), 10, 5);
        }
        let stats = collector.get("http://a");
        assert!(stats.qps > 0.0);
    }
}

//! Per-endpoint load statistics and the rolling request-latency window.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// A live view of one backend's load, refreshed by the Stats Collector's
/// scrape loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStats {
    pub running_requests: u32,
    pub queued_requests: u32,
    /// GPU utilization fraction in `[0, 1]`.
    pub gpu_utilization: f64,
    /// GPU KV-cache usage fraction in `[0, 1]`.
    pub kv_cache_usage: f64,
    /// Requests/second over the collector's sliding window.
    pub qps: f64,
    pub avg_time_to_first_token_ms: f64,
    pub avg_inter_token_latency_ms: f64,
    pub last_refreshed: DateTime<Utc>,
}

impl Default for EngineStats {
    fn default() -> Self {
        Self {
            running_requests: 0,
            queued_requests: 0,
            gpu_utilization: 0.0,
            kv_cache_usage: 0.0,
            qps: 0.0,
            avg_time_to_first_token_ms: 0.0,
            avg_inter_token_latency_ms: 0.0,
            last_refreshed: Utc::now(),
        }
    }
}

impl EngineStats {
    /// Stats are stale once a scrape has been missed for more than twice
    /// the configured scrape interval.
    pub fn is_stale(&self, scrape_interval: chrono::Duration) -> bool {
        Utc::now().signed_duration_since(self.last_refreshed) > scrape_interval * 2
    }

    /// Weighted load score used by the workflow-aware policy's initial
    /// assignment (lower is better — "least loaded").
    pub fn load_score(&self, weight_gpu: f64, weight_memory: f64, weight_qps: f64, qps_norm: f64) -> f64 {
        let normalized_qps = if qps_norm > 0.0 {
            (self.qps / qps_norm).min(1.0)
        } else {
            0.0
        };
        weight_gpu * self.gpu_utilization + weight_memory * self.kv_cache_usage + weight_qps * normalized_qps
    }
}

/// One completed request recorded for QPS/latency derivation.
#[derive(Debug, Clone)]
pub struct RequestRecord {
    pub arrived_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// A rolling window of completed requests for one endpoint, used to derive
/// QPS and latency without querying the backend for history.
#[derive(Debug, Default)]
pub struct RequestStats {
    window: VecDeque<RequestRecord>,
}

impl RequestStats {
    pub fn new() -> Self {
        Self {
            window: VecDeque::new(),
        }
    }

    pub fn record(&mut self, record: RequestRecord, window: chrono::Duration) {
        self.window.push_back(record);
        self.evict_older_than(window);
    }

    pub fn evict_older_than(&mut self, window: chrono::Duration) {
        let cutoff = Utc::now() - window;
        while let Some(front) = self.window.front() {
            if front.completed_at < cutoff {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    /// Requests per second over the retained window.
    pub fn qps(&self, window: chrono::Duration) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        let seconds = window.num_milliseconds() as f64 / 1000.0;
        if seconds <= 0.0 {
            return 0.0;
        }
        self.window.len() as f64 / seconds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_score_weights_inputs() {
        let mut stats = EngineStats::default();
        stats.gpu_utilization = 0.5;
        stats.kv_cache_usage = 0.2;
        stats.qps = 50.0;
        let score = stats.load_score(0.4, 0.3, 0.3, 100.0);
        assert!((score - (0.4 * 0.5 + 0.3 * 0.2 + 0.3 * 0.5)).abs() < 1e-9);
    }

    #[test]
    fn request_stats_evicts_old_entries() {
        let mut rs = RequestStats::new();
        let old = RequestRecord {
            arrived_at: Utc::now() - chrono::Duration::seconds(120),
            completed_at: Utc::now() - chrono::Duration::seconds(119),
            prompt_tokens: 10,
            completion_tokens: 5,
        };
        rs.record(old, chrono::Duration::seconds(60));
        assert!(rs.is_empty());
    }
}

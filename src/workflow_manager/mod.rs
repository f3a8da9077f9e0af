//! Workflow Context Manager — pinning, load-aware initial assignment, and
//! TTL-driven cleanup for multi-agent workflows.
//!
//! Each workflow's context lives behind its own `tokio::sync::Mutex`, keyed
//! in a `DashMap`; holding that lock for the duration of `assign_engine`
//! gives per-workflow serialization (two
//! concurrent first-requests for the same workflow never race to pin two
//! different engines) without a single process-wide lock serializing
//! unrelated workflows.

use crate::config::RouterConfig;
use crate::error::{Result, RouterError};
use crate::messages::MessageBus;
use crate::models::{ContextSharingStrategy, Endpoint, EngineRole, WorkflowContext};
use crate::registry::{EndpointRegistry, EndpointRemoved};
use crate::stats_collector::StatsCollector;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info};

pub struct WorkflowManager {
    config: RouterConfig,
    registry: Arc<EndpointRegistry>,
    stats: Arc<StatsCollector>,
    message_bus: Arc<MessageBus>,
    workflows: DashMap<String, Arc<Mutex<WorkflowContext>>>,
}

/// A snapshot of one workflow's state, returned by `stats()` — never the
/// live, lockable context itself.
#[derive(Debug, Clone, serde::Serialize)]
pub struct WorkflowSnapshot {
    pub workflow_id: String,
    pub pinned_engine: Option<String>,
    pub pinned_prefill_engine: Option<String>,
    pub pinned_decode_engine: Option<String>,
    pub agent_count: usize,
    pub request_count: u64,
    pub cache_hit_rate: f64,
    pub age_seconds: i64,
}

impl WorkflowManager {
    pub fn new(
        config: RouterConfig,
        registry: Arc<EndpointRegistry>,
        stats: Arc<StatsCollector>,
        message_bus: Arc<MessageBus>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            registry,
            stats,
            message_bus,
            workflows: DashMap::new(),
        })
    }

    fn entry_for(&self, workflow_id: &str) -> Arc<Mutex<WorkflowContext>> {
        self.workflows
            .entry(workflow_id.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(WorkflowContext::new(
                    workflow_id,
                    self.config.workflow_ttl_seconds,
                )))
            })
            .clone()
    }

    /// Registers the workflow (creating it on first sight) and records the
    /// calling agent's activity. `priority`/`context_sharing_strategy` come
    /// from the request's workflow metadata and only overwrite the stored
    /// context when present, so later requests that omit them don't reset
    /// values an earlier request in the same workflow already set.
    pub async fn register(
        &self,
        workflow_id: &str,
        agent_id: &str,
        priority: Option<i32>,
        context_sharing_strategy: Option<ContextSharingStrategy>,
    ) -> Result<()> {
        self.evict_over_capacity_if_needed(workflow_id);
        let handle = self.entry_for(workflow_id);
        let mut ctx = handle.lock().await;
        ctx.touch_agent(agent_id);
        if let Some(priority) = priority {
            ctx.priority = Some(priority);
        }
        if let Some(strategy) = context_sharing_strategy {
            ctx.context_sharing_strategy = strategy;
        }
        Ok(())
    }

    /// Returns the pinned engine for this workflow, assigning one via the
    /// load-score + locality-bonus formula if none exists yet. `exclude`
    /// lists endpoints a caller already tried this request, so a retry
    /// after a pinned engine's failure can reassign elsewhere instead of
    /// re-pinning the same dead endpoint.
    /// Serialized per-workflow: concurrent callers for the same
    /// `workflow_id` observe a single winner.
    pub async fn assign_engine(&self, workflow_id: &str, agent_id: &str, model: &str, exclude: &[String]) -> Result<String> {
        let handle = self.entry_for(workflow_id);
        let mut ctx = handle.lock().await;
        ctx.touch_agent(agent_id);

        if let Some(pinned) = &ctx.pinned_engine {
            if self.registry.contains_url(pinned) && !exclude.contains(pinned) {
                return Ok(pinned.clone());
            }
            info!(workflow_id, engine = %pinned, "pinned engine vanished or excluded; reassigning");
            ctx.pinned_engine = None;
        }

        let candidates = self.registry.list_for_model(model)?;
        let chosen = self.pick_least_loaded(&candidates, None, exclude);
        ctx.pinned_engine = Some(chosen.clone());
        Ok(chosen)
    }

    /// Disaggregated-prefill variant: assigns (and independently pins)
    /// prefill and decode engines for the same workflow. Each pool biases
    /// its pick toward the engine the other role already pinned (when that
    /// engine also appears in this pool), so prefill and decode land on
    /// the same physical node when the deployment's labeling allows it.
    pub async fn assign_prefill_decode(
        &self,
        workflow_id: &str,
        agent_id: &str,
        model: &str,
        exclude: &[String],
    ) -> Result<(String, String)> {
        let handle = self.entry_for(workflow_id);
        let mut ctx = handle.lock().await;
        ctx.touch_agent(agent_id);

        let candidates = self.registry.list_for_model(model)?;
        let prefill_pool: Vec<Endpoint> = candidates
            .iter()
            .filter(|e| e.role(&self.config.prefill_model_labels, &self.config.decode_model_labels) == Some(EngineRole::Prefill))
            .cloned()
            .collect();
        let decode_pool: Vec<Endpoint> = candidates
            .iter()
            .filter(|e| e.role(&self.config.prefill_model_labels, &self.config.decode_model_labels) == Some(EngineRole::Decode))
            .cloned()
            .collect();

        if prefill_pool.is_empty() || decode_pool.is_empty() {
            return Err(RouterError::MisconfiguredRoute(format!(
                "no distinct prefill/decode endpoints for model {model}"
            )));
        }

        let prefill = match &ctx.pinned_prefill_engine {
            Some(url) if self.registry.contains_url(url) && !exclude.contains(url) => url.clone(),
            _ => self.pick_least_loaded(&prefill_pool, ctx.pinned_decode_engine.as_deref(), exclude),
        };
        let decode = match &ctx.pinned_decode_engine {
            Some(url) if self.registry.contains_url(url) && !exclude.contains(url) => url.clone(),
            _ => self.pick_least_loaded(&decode_pool, Some(prefill.as_str()), exclude),
        };
        ctx.pinned_prefill_engine = Some(prefill.clone());
        ctx.pinned_decode_engine = Some(decode.clone());
        Ok((prefill, decode))
    }

    /// Selects the candidate with the lowest combined score: the weighted
    /// load formula, minus a flat locality bonus for the `preferred` URL
    /// when supplied (the configurable batching-preference lever).
    /// Candidates in `exclude` are skipped unless every candidate is
    /// excluded, in which case the full set is considered anyway rather
    /// than failing outright.
    fn pick_least_loaded(&self, candidates: &[Endpoint], preferred: Option<&str>, exclude: &[String]) -> String {
        let filtered: Vec<&Endpoint> = candidates.iter().filter(|e| !exclude.contains(&e.url)).collect();
        let pool: Vec<&Endpoint> = if filtered.is_empty() { candidates.iter().collect() } else { filtered };
        pool.iter()
            .map(|ep| {
                let stats = self.stats.get(&ep.url);
                let mut score = stats.load_score(
                    self.config.load_weight_gpu,
                    self.config.load_weight_memory,
                    self.config.load_weight_qps,
                    self.config.qps_normalization,
                );
                if preferred == Some(ep.url.as_str()) {
                    score -= self.config.batching_preference;
                }
                (ep.url.clone(), score)
            })
            .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(url, _)| url)
            .expect("candidates is non-empty")
    }

    pub async fn get_engine(&self, workflow_id: &str) -> Option<String> {
        let handle = self.workflows.get(workflow_id)?.clone();
        let ctx = handle.lock().await;
        ctx.pinned_engine.clone()
    }

    /// Records the outcome of a completed request for cache-hit tracking.
    pub async fn record_request(&self, workflow_id: &str, cache_hit: bool) {
        if let Some(entry) = self.workflows.get(workflow_id) {
            let handle = entry.clone();
            drop(entry);
            let mut ctx = handle.lock().await;
            ctx.request_count += 1;
            if cache_hit {
                ctx.cache_hit_count += 1;
            }
        }
    }

    pub async fn snapshot(&self, workflow_id: &str) -> Option<WorkflowSnapshot> {
        let handle = self.workflows.get(workflow_id)?.clone();
        let ctx = handle.lock().await;
        Some(WorkflowSnapshot {
            workflow_id: ctx.workflow_id.clone(),
            pinned_engine: ctx.pinned_engine.clone(),
            pinned_prefill_engine: ctx.pinned_prefill_engine.clone(),
            pinned_decode_engine: ctx.pinned_decode_engine.clone(),
            agent_count: ctx.agents.len(),
            request_count: ctx.request_count,
            cache_hit_rate: ctx.cache_hit_rate(),
            age_seconds: chrono::Utc::now().signed_duration_since(ctx.created_at).num_seconds(),
        })
    }

    pub fn active_workflow_count(&self) -> usize {
        self.workflows.len()
    }

    /// Evicts the oldest-by-creation workflow when registering a new one
    /// would exceed `max_workflows`. A soft LRU cap, not an error path —
    /// capacity is treated as best-effort, never a request failure.
    fn evict_over_capacity_if_needed(&self, incoming_workflow_id: &str) {
        if self.workflows.contains_key(incoming_workflow_id) {
            return;
        }
        if self.workflows.len() < self.config.max_workflows {
            return;
        }
        let oldest = self
            .workflows
            .iter()
            .filter_map(|entry| {
                entry
                    .value()
                    .try_lock()
                    .ok()
                    .map(|ctx| (entry.key().clone(), ctx.created_at))
            })
            .min_by_key(|(_, created_at)| *created_at);
        if let Some((workflow_id, _)) = oldest {
            info!(workflow_id, "evicting oldest workflow at capacity");
            self.workflows.remove(&workflow_id);
        }
    }

    /// Background cleanup task: evicts expired workflows on a fixed
    /// cadence and eagerly clears pins pointing at endpoints the Registry
    /// has removed.
    pub fn spawn_cleanup_task(
        self: &Arc<Self>,
        cleanup_interval: std::time::Duration,
        mut removals: broadcast::Receiver<EndpointRemoved>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(cleanup_interval);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        manager.evict_expired().await;
                    }
                    removal = removals.recv() => {
                        match removal {
                            Ok(event) => manager.clear_pins_for(&event.url).await,
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                debug!(skipped = n, "workflow manager lagged behind removal events");
                            }
                            Err(broadcast::error::RecvError::Closed) => {}
                        }
                    }
                    _ = shutdown.recv() => {
                        debug!("workflow cleanup task shutting down");
                        break;
                    }
                }
            }
        });
    }

    async fn evict_expired(&self) {
        let ids: Vec<String> = self.workflows.iter().map(|e| e.key().clone()).collect();
        for workflow_id in ids {
            if let Some(entry) = self.workflows.get(&workflow_id) {
                let handle = entry.clone();
                drop(entry);
                let expired = handle.lock().await.is_expired();
                if expired {
                    self.workflows.remove(&workflow_id);
                    self.message_bus.remove_workflow(&workflow_id);
                    debug!(workflow_id, "workflow expired and was removed, mailboxes cleared");
                }
            }
        }
    }

    async fn clear_pins_for(&self, url: &str) {
        for entry in self.workflows.iter() {
            let handle = entry.value().clone();
            let mut ctx = handle.lock().await;
            let mut cleared = false;
            if ctx.pinned_engine.as_deref() == Some(url) {
                ctx.pinned_engine = None;
                cleared = true;
            }
            if ctx.pinned_prefill_engine.as_deref() == Some(url) {
                ctx.pinned_prefill_engine = None;
                cleared = true;
            }
            if ctx.pinned_decode_engine.as_deref() == Some(url) {
                ctx.pinned_decode_engine = None;
                cleared = true;
            }
            if cleared {
                info!(workflow_id = %ctx.workflow_id, url, "cleared pin to vanished endpoint");
            }
        }
    }
}

//! Wraps an upstream SSE byte stream so tokens can be counted as they pass
//! through: tokens are counted as they pass so RequestStats and, when
//! applicable, the Workflow Manager's cache-hit counter can be fed without
//! waiting for the response to finish.
//!
//! A real token count would require decoding each backend's tokenizer; this
//! counts emitted SSE `data:` chunks as a proxy for completion tokens, which
//! is what every OpenAI-compatible streaming backend emits one-per-token for
//! normal (non-batched) decoding.

use crate::stats_collector::StatsCollector;
use crate::workflow_manager::WorkflowManager;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

pub struct CountingStream {
    inner: Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>,
    endpoint_url: String,
    stats: Arc<StatsCollector>,
    workflow_manager: Arc<WorkflowManager>,
    workflow_id: Option<String>,
    cache_hit: bool,
    arrived_at: chrono::DateTime<chrono::Utc>,
    prompt_tokens: u32,
    completion_tokens: u32,
    finished: bool,
}

impl CountingStream {
    pub fn new(
        inner: impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
        endpoint_url: String,
        stats: Arc<StatsCollector>,
        workflow_manager: Arc<WorkflowManager>,
        workflow_id: Option<String>,
        cache_hit: bool,
        prompt_tokens: u32,
    ) -> Self {
        Self {
            inner: Box::pin(inner),
            endpoint_url,
            stats,
            workflow_manager,
            workflow_id,
            cache_hit,
            arrived_at: chrono::Utc::now(),
            prompt_tokens,
            completion_tokens: 0,
            finished: false,
        }
    }

    fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.stats
            .record_completed_request(&self.endpoint_url, self.arrived_at, self.prompt_tokens, self.completion_tokens);
        if let Some(workflow_id) = self.workflow_id.clone() {
            let workflow_manager = self.workflow_manager.clone();
            let cache_hit = self.cache_hit;
            tokio::spawn(async move {
                workflow_manager.record_request(&workflow_id, cache_hit).await;
            });
        }
    }
}

fn count_chunks(bytes: &Bytes) -> u32 {
    bytes
        .windows(6)
        .filter(|w| *w == b"data: ")
        .count()
        .try_into()
        .unwrap_or(u32::MAX)
}

impl Stream for CountingStream {
    type Item = reqwest::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(bytes))) => {
                this.completion_tokens += count_chunks(&bytes);
                Poll::Ready(Some(Ok(bytes)))
            }
            Poll::Ready(Some(Err(e))) => {
                this.finish();
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.finish();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for CountingStream {
    fn drop(&mut self) {
        // Client disconnects end the stream without a final `Poll::Ready(None)`;
        // still record whatever was observed so QPS/latency reflect reality.
        self.finish();
    }
}

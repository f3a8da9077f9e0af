//! Fleet Router — a cache-aware, multi-agent-workflow-aware reverse proxy
//! in front of a fleet of OpenAI-compatible LLM inference engines.
//!
//! ## Core components
//!
//! - [`registry`]: the Endpoint Registry, the single source of truth for
//!   which backends currently exist.
//! - [`stats_collector`]: per-endpoint load metrics, scraped on a fixed
//!   interval.
//! - [`workflow_manager`]: per-workflow engine pinning and TTL eviction for
//!   multi-agent requests.
//! - [`messages`]: the bounded-mailbox message bus agents use to talk to
//!   each other through the router.
//! - [`policies`]: the five selection strategies (round robin, session
//!   sticky, prefix/cache-aware, workflow-aware, disaggregated prefill).
//! - [`proxy`]: turns a routing decision into an actual upstream call,
//!   with retry and streaming passthrough.
//! - [`api`]: the HTTP surface — OpenAI-compatible completions plus the
//!   `/v1/workflows/*` agent-messaging routes.
//! - [`supervisor`]: dependency-ordered startup and graceful shutdown for
//!   the whole process.

pub mod api;
pub mod config;
pub mod error;
pub mod messages;
pub mod models;
pub mod policies;
pub mod proxy;
pub mod registry;
pub mod stats_collector;
pub mod supervisor;
pub mod workflow_manager;

pub use config::RouterConfig;
pub use error::{Result, RouterError};
pub use supervisor::RouterProcess;

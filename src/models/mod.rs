//! Domain models for the router: endpoints, stats, workflow contexts,
//! mailboxes, and request fingerprints. Pure data — no I/O, no locking.

pub mod endpoint;
pub mod fingerprint;
pub mod message;
pub mod stats;
pub mod workflow;

pub use endpoint::{EngineRole, Endpoint};
pub use fingerprint::{RoutingFingerprint, WorkflowFingerprint};
pub use message::{AgentMailbox, AgentMessage};
pub use stats::{EngineStats, RequestRecord, RequestStats};
pub use workflow::{AgentActivity, ContextSharingStrategy, WorkflowContext, WorkflowMetadata};

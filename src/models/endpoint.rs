//! Endpoint — a backend inference engine description.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The role an endpoint plays in disaggregated prefill/decode routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineRole {
    Prefill,
    Decode,
}

/// A backend inference engine known to the Registry.
///
/// Endpoints are created by the Registry and destroyed when a discovery
/// refresh no longer reports them; other components only ever hold a
/// read-only snapshot, never the canonical set itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    /// Stable backend URL; also the key used throughout the router
    /// (stats, workflow pins, mailboxes never reference endpoints any
    /// other way).
    pub url: String,

    /// Model names this backend serves.
    pub models: Vec<String>,

    /// Free-form labels, e.g. `{"role": "prefill"}`.
    pub labels: HashMap<String, String>,

    /// When this endpoint was last confirmed present by discovery.
    pub last_seen: DateTime<Utc>,
}

impl Endpoint {
    pub fn new(url: impl Into<String>, models: Vec<String>) -> Self {
        Self {
            url: url.into(),
            models,
            labels: HashMap::new(),
            last_seen: Utc::now(),
        }
    }

    pub fn with_labels(mut self, labels: HashMap<String, String>) -> Self {
        self.labels = labels;
        self
    }

    pub fn serves(&self, model: &str) -> bool {
        self.models.iter().any(|m| m == model)
    }

    /// Derives this endpoint's disaggregated-prefill role from its labels,
    /// using the configured label values for each role.
    pub fn role(&self, prefill_labels: &[String], decode_labels: &[String]) -> Option<EngineRole> {
        let label_values: Vec<&String> = self.labels.values().collect();
        if label_values.iter().any(|v| prefill_labels.contains(v)) {
            Some(EngineRole::Prefill)
        } else if label_values.iter().any(|v| decode_labels.contains(v)) {
            Some(EngineRole::Decode)
        } else {
            None
        }
    }

    pub fn is_stale(&self, staleness_bound: chrono::Duration) -> bool {
        Utc::now().signed_duration_since(self.last_seen) > staleness_bound
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_detection_from_labels() {
        let prefill = vec!["prefill".to_string()];
        let decode = vec!["decode".to_string()];

        let mut labels = HashMap::new();
        labels.insert("role".to_string(), "prefill".to_string());
        let ep = Endpoint::new("http://p1", vec!["m".into()]).with_labels(labels);
        assert_eq!(ep.role(&prefill, &decode), Some(EngineRole::Prefill));

        let ep_none = Endpoint::new("http://x", vec!["m".into()]);
        assert_eq!(ep_none.role(&prefill, &decode), None);
    }

    #[test]
    fn serves_checks_model_membership() {
        let ep = Endpoint::new("http://a", vec!["llama-3".to_string()]);
        assert!(ep.serves("llama-3"));
        assert!(!ep.serves("gpt-4"));
    }
}

//! RoutingFingerprint — the derived, request-scoped tuple every policy
//! consumes. Never stored past the life of the request.

use sha2::{Digest, Sha256};

/// Workflow/agent identity carried by a fingerprint, when present.
#[derive(Debug, Clone)]
pub struct WorkflowFingerprint {
    pub workflow_id: String,
    pub agent_id: String,
}

#[derive(Debug, Clone)]
pub struct RoutingFingerprint {
    pub model: String,
    pub session_key: Option<String>,
    pub workflow: Option<WorkflowFingerprint>,
    /// Rolling hash of the prompt prefix, consulted by the cache-aware
    /// policy. `None` when the request carries no prompt text to hash.
    pub prefix_hash: Option<u64>,
}

impl RoutingFingerprint {
    /// Hashes the first `prefix_chars` characters of the prompt text with
    /// SHA-256, folded down to a `u64` for cheap comparisons. Using a
    /// prefix (rather than the whole prompt) keeps requests that diverge
    /// only in their tail mapped to the same bucket, which is what makes
    /// the hash useful as a cache-locality signal.
    pub fn hash_prefix(prompt: &str, prefix_chars: usize) -> u64 {
        let prefix: String = prompt.chars().take(prefix_chars).collect();
        let digest = Sha256::digest(prefix.as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        u64::from_be_bytes(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_prefix_hashes_equal() {
        let a = RoutingFingerprint::hash_prefix("You are a helpful assistant. Task: summarize X", 32);
        let b = RoutingFingerprint::hash_prefix("You are a helpful assistant. Task: summarize Y", 32);
        assert_eq!(a, b);
    }

    #[test]
    fn different_prefix_hashes_differ() {
        let a = RoutingFingerprint::hash_prefix("alpha prompt text here", 32);
        let b = RoutingFingerprint::hash_prefix("beta prompt text there", 32);
        assert_ne!(a, b);
    }
}

//! Node configuration.
//!
//! Command-line wiring and process bootstrap are explicitly out of scope
//! (see `spec.md` §1); this is the plain-data config struct a bootstrap
//! layer would deserialize and hand to [`crate::server`]. Grounded in the
//! teacher's `consensus.rs::PoAConsensus::new` for the validator
//! key/block-time fields, generalized to the rest of the node's tunables.

use serde::{Deserialize, Serialize};

use crate::chain::DEFAULT_CONFIRMS_LEVEL;

fn default_block_time_secs() -> u64 {
    5
}

fn default_max_pool_len() -> usize {
    1024
}

fn default_confirms_level() -> u32 {
    DEFAULT_CONFIRMS_LEVEL
}

/// Node configuration, deserializable from JSON via `serde_json`. A node
/// with no `validator_key` runs purely as a relay/replica: no validator
/// tick starts (§4.8, "present only when the server is configured with a
/// private key").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub listen_addr: String,
    #[serde(default)]
    pub seed_peers: Vec<String>,

    /// Hex-encoded Ed25519 private key. Present only on the validator node.
    #[serde(default)]
    pub validator_key: Option<String>,

    #[serde(default = "default_block_time_secs")]
    pub block_time_secs: u64,

    #[serde(default = "default_max_pool_len")]
    pub max_pool_len: usize,

    #[serde(default = "default_confirms_level")]
    pub confirms_level: u32,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            listen_addr: "127.0.0.1:9090".to_string(),
            seed_peers: Vec::new(),
            validator_key: None,
            block_time_secs: default_block_time_secs(),
            max_pool_len: default_max_pool_len(),
            confirms_level: default_confirms_level(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let json = r#"{"listen_addr": "0.0.0.0:8080"}"#;
        let cfg: NodeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.block_time_secs, 5);
        assert_eq!(cfg.max_pool_len, 1024);
        assert_eq!(cfg.confirms_level, DEFAULT_CONFIRMS_LEVEL);
        assert!(cfg.validator_key.is_none());
    }

    #[test]
    fn validator_key_round_trips() {
        let json = r#"{"listen_addr": "0.0.0.0:8080", "validator_key": "abcd"}"#;
        let cfg: NodeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.validator_key.as_deref(), Some("abcd"));
    }
}

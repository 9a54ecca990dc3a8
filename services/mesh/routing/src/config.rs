//! Per-tree settings.

use mesh_wire::DEFAULT_MAX_PAYLOAD;
use serde::{Deserialize, Serialize};

/// Default retransmissions per frame
pub const DEFAULT_MAX_RETRIES: u8 = 4;

/// Aggregation tree configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeConfig {
    /// Largest frame the transport carries
    pub max_payload: usize,
    /// Retransmissions requested per send
    pub max_retries: u8,
    /// Cap on bytes held by stored records
    pub ram_limit: Option<usize>,
    /// Seed for flush jitter and congestion draws
    pub seed: Option<u64>,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            max_payload: DEFAULT_MAX_PAYLOAD,
            max_retries: DEFAULT_MAX_RETRIES,
            ram_limit: None,
            seed: None,
        }
    }
}

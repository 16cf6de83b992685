//! Risk tier thresholds owned by the external risk engine.

use serde::{Deserialize, Serialize};

/// Threshold bands partitioning numeric risk scores into qualitative levels.
/// Fetched from the risk engine's config endpoint; these defaults are the
/// packaged fallback for when the engine cannot be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierConfig {
    pub green_max: i64,
    pub yellow_max: i64,
    pub red_max: i64,
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            green_max: 40,
            yellow_max: 99,
            red_max: 150,
        }
    }
}

//! Documents read back from the external search store.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Latest known risk snapshot for one user, as written by the scoring
/// pipeline. The store owns this schema; the dashboard only reads the fields
/// below and must not choke on what it does not know. In particular the risk
/// level stays a raw string here so records carrying levels outside the four
/// known bands still count in the aggregates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRiskRecord {
    #[serde(default)]
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(default)]
    pub risk_score: i64,
    #[serde(default = "default_level")]
    pub risk_level: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_score: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Raw per-feature counters emitted by the scoring pipeline.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub event_values: BTreeMap<String, f64>,
    #[serde(
        rename = "@timestamp",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<DateTime<Utc>>,
}

fn default_level() -> String {
    "LOW".to_string()
}

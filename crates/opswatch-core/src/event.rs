//! Inbound push events and the tagged broadcast envelope.
//!
//! Upstream detection engines push two message shapes at the dashboard: rule
//! violations from the CEP pipeline and risk-score updates from the UEBA
//! pipeline. Both are validated at the ingestion boundary; whatever passes is
//! stamped with an ingestion timestamp, wrapped in a tagged envelope, and
//! fanned out to every live session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{OpswatchError, Result};

/// Risk bands shared by alert severities and user risk levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// The known levels in dashboard display order (most severe first).
    pub const ALL: [RiskLevel; 4] = [
        RiskLevel::Critical,
        RiskLevel::High,
        RiskLevel::Medium,
        RiskLevel::Low,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
            RiskLevel::Critical => "CRITICAL",
        }
    }
}

/// A detected rule violation pushed by the rule-engine pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertEvent {
    pub rule_id: String,
    pub rule_name: String,
    pub severity: RiskLevel,
    pub description: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_ip: Option<String>,
}

impl AlertEvent {
    /// Field-level checks beyond what deserialization enforces.
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("ruleId", &self.rule_id),
            ("ruleName", &self.rule_name),
            ("userId", &self.user_id),
            ("description", &self.description),
        ] {
            if value.trim().is_empty() {
                return Err(OpswatchError::validation(
                    "alert",
                    format!("{field} must not be empty"),
                ));
            }
        }
        Ok(())
    }
}

/// A user risk-score change pushed by the scoring pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskUpdateEvent {
    pub user_id: String,
    pub risk_score: i64,
    pub risk_level: RiskLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_score: Option<i64>,
}

impl RiskUpdateEvent {
    pub fn validate(&self) -> Result<()> {
        if self.user_id.trim().is_empty() {
            return Err(OpswatchError::validation("ueba", "userId must not be empty"));
        }
        Ok(())
    }
}

/// Event payload with its wire tag, for client-side dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum EventPayload {
    Alert(AlertEvent),
    Ueba(RiskUpdateEvent),
}

/// The frame pushed over the live-update channel:
/// `{"type": "alert"|"ueba", "data": {...}, "timestamp": "..."}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(flatten)]
    pub payload: EventPayload,
    pub timestamp: DateTime<Utc>,
}

impl Envelope {
    /// Wrap an alert, stamping the ingestion time.
    pub fn alert(event: AlertEvent) -> Self {
        Self {
            payload: EventPayload::Alert(event),
            timestamp: Utc::now(),
        }
    }

    /// Wrap a risk update, stamping the ingestion time.
    pub fn ueba(event: RiskUpdateEvent) -> Self {
        Self {
            payload: EventPayload::Ueba(event),
            timestamp: Utc::now(),
        }
    }
}

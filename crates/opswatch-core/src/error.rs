//! Error types for the opswatch backend.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OpswatchError {
    /// An inbound push payload failed field validation. Rejected at the
    /// ingestion boundary, before any fan-out.
    #[error("invalid {kind} payload: {reason}")]
    Validation { kind: &'static str, reason: String },

    /// An external collaborator (search store, risk engine, rule engine) is
    /// unreachable, timed out, or answered with garbage. Recovered locally
    /// with a fallback value wherever one is defined.
    #[error("upstream {service} unavailable: {reason}")]
    Upstream {
        service: &'static str,
        reason: String,
    },

    #[error("deserialization error: {0}")]
    Deserialize(#[from] serde_json::Error),
}

impl OpswatchError {
    pub fn validation(kind: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            kind,
            reason: reason.into(),
        }
    }

    pub fn upstream(service: &'static str, reason: impl std::fmt::Display) -> Self {
        Self::Upstream {
            service,
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, OpswatchError>;

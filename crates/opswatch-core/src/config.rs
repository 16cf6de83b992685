//! Deployment settings, loaded from a TOML file with env overrides.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Top-level opswatch configuration.
///
/// Every field has a default so an empty (or absent) file yields a runnable
/// development configuration. The upstream URLs and index prefix can also be
/// overridden through the environment, which is how container deployments
/// wire the services together.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpswatchConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub upstream: UpstreamSettings,
    #[serde(default)]
    pub indices: IndexSettings,
    #[serde(default)]
    pub timeouts: TimeoutSettings,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Socket address the dashboard API binds to.
    #[serde(default = "default_bind")]
    pub bind: String,
}

/// Endpoints of the external collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamSettings {
    /// Search/aggregation store (OpenSearch-compatible `_search` API).
    #[serde(default = "default_search_url")]
    pub search_url: String,
    /// Risk-scoring engine (tier config, per-user history, settings).
    #[serde(default = "default_risk_engine_url")]
    pub risk_engine_url: String,
    /// Rule/CEP engine (alert pages, rule CRUD, job status).
    #[serde(default = "default_rule_engine_url")]
    pub rule_engine_url: String,
}

/// Search index naming and time bucketing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSettings {
    /// Prefix shared by all indices this deployment writes.
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// Time zone used for calendar-day bucketing in range queries.
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl IndexSettings {
    pub fn alerts(&self) -> String {
        format!("{}-alerts-*", self.prefix)
    }

    pub fn scores(&self) -> String {
        format!("{}-risk-scores-*", self.prefix)
    }

    pub fn logs(&self) -> String {
        format!("{}-event-logs-*", self.prefix)
    }
}

/// Bounded timeouts and cache lifetimes for upstream calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutSettings {
    /// How long a fetched tier config stays fresh.
    #[serde(default = "default_tier_ttl")]
    pub tier_ttl_secs: u64,
    /// Budget for one tier-config fetch.
    #[serde(default = "default_tier_fetch")]
    pub tier_fetch_secs: u64,
    /// Budget for one search-store query.
    #[serde(default = "default_search")]
    pub search_secs: u64,
    /// Budget for one delegated engine call.
    #[serde(default = "default_proxy")]
    pub proxy_secs: u64,
}

fn default_bind() -> String {
    "0.0.0.0:8501".to_string()
}

fn default_search_url() -> String {
    "http://127.0.0.1:9200".to_string()
}

fn default_risk_engine_url() -> String {
    "http://127.0.0.1:48082".to_string()
}

fn default_rule_engine_url() -> String {
    "http://127.0.0.1:48084".to_string()
}

fn default_prefix() -> String {
    "opswatch".to_string()
}

fn default_timezone() -> String {
    "Asia/Seoul".to_string()
}

fn default_tier_ttl() -> u64 {
    60
}

fn default_tier_fetch() -> u64 {
    5
}

fn default_search() -> u64 {
    10
}

fn default_proxy() -> u64 {
    10
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            search_url: default_search_url(),
            risk_engine_url: default_risk_engine_url(),
            rule_engine_url: default_rule_engine_url(),
        }
    }
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            timezone: default_timezone(),
        }
    }
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            tier_ttl_secs: default_tier_ttl(),
            tier_fetch_secs: default_tier_fetch(),
            search_secs: default_search(),
            proxy_secs: default_proxy(),
        }
    }
}

impl OpswatchConfig {
    /// Load from a TOML file; a missing file yields the defaults.
    /// Environment overrides are applied on top either way.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading config file {}", path.display()))?;
            toml::from_str(&raw)
                .with_context(|| format!("parsing config file {}", path.display()))?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(bind) = std::env::var("OPSWATCH_BIND") {
            self.server.bind = bind;
        }
        if let Ok(url) = std::env::var("OPSWATCH_SEARCH_URL") {
            self.upstream.search_url = url;
        }
        if let Ok(url) = std::env::var("OPSWATCH_RISK_ENGINE_URL") {
            self.upstream.risk_engine_url = url;
        }
        if let Ok(url) = std::env::var("OPSWATCH_RULE_ENGINE_URL") {
            self.upstream.rule_engine_url = url;
        }
        if let Ok(prefix) = std::env::var("OPSWATCH_INDEX_PREFIX") {
            self.indices.prefix = prefix;
        }
    }
}

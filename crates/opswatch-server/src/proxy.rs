//! Stateless delegation to the risk-engine and rule-engine services.
//!
//! These endpoints only relay. Every call carries a bounded timeout and a
//! documented fallback (empty page, empty list, or an explicit error body)
//! so a dead engine degrades the page instead of hanging it.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use reqwest::Method;
use serde_json::{json, Value};
use tracing::warn;

use opswatch_core::error::{OpswatchError, Result};

/// Rule-engine reloads resubmit streaming jobs; give them a longer leash
/// than ordinary delegation calls.
const RELOAD_TIMEOUT: Duration = Duration::from_secs(60);

pub struct UpstreamProxy {
    http: reqwest::Client,
    risk_engine_url: String,
    rule_engine_url: String,
}

impl UpstreamProxy {
    pub fn new(
        risk_engine_url: &str,
        rule_engine_url: &str,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            risk_engine_url: risk_engine_url.trim_end_matches('/').to_string(),
            rule_engine_url: rule_engine_url.trim_end_matches('/').to_string(),
        })
    }

    fn risk_url(&self, path: &str) -> String {
        format!("{}{}", self.risk_engine_url, path)
    }

    fn rule_url(&self, path: &str) -> String {
        format!("{}{}", self.rule_engine_url, path)
    }

    async fn get_json(
        &self,
        service: &'static str,
        url: String,
        params: &HashMap<String, String>,
    ) -> Result<Value> {
        let resp = self
            .http
            .get(&url)
            .query(params)
            .send()
            .await
            .map_err(|e| OpswatchError::upstream(service, e))?;
        if !resp.status().is_success() {
            return Err(OpswatchError::upstream(
                service,
                format!("status {}", resp.status()),
            ));
        }
        resp.json()
            .await
            .map_err(|e| OpswatchError::upstream(service, e))
    }

    async fn send_json(
        &self,
        service: &'static str,
        method: Method,
        url: String,
        body: Option<&Value>,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let mut req = self.http.request(method, &url);
        if let Some(body) = body {
            req = req.json(body);
        }
        if let Some(timeout) = timeout {
            req = req.timeout(timeout);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| OpswatchError::upstream(service, e))?;
        if !resp.status().is_success() {
            return Err(OpswatchError::upstream(
                service,
                format!("status {}", resp.status()),
            ));
        }
        resp.json()
            .await
            .map_err(|e| OpswatchError::upstream(service, e))
    }

    /// Alert table page from the rule engine; an empty page when it is down.
    pub async fn alerts_page(&self, params: &HashMap<String, String>) -> Value {
        match self
            .get_json("rule-engine", self.rule_url("/api/alerts"), params)
            .await
        {
            Ok(page) => page,
            Err(e) => {
                warn!(error = %e, "alert page delegation failed, serving empty page");
                let draw = params
                    .get("draw")
                    .and_then(|d| d.parse::<u64>().ok())
                    .unwrap_or(1);
                empty_table_page(draw)
            }
        }
    }

    /// User score table from the risk engine.
    pub async fn user_scores(&self, params: &HashMap<String, String>) -> Result<Value> {
        self.get_json("risk-engine", self.risk_url("/api/users/scores"), params)
            .await
    }

    /// Hourly score curve for one user, from the risk engine.
    pub async fn user_hourly(&self, user_id: &str) -> Result<Value> {
        self.get_json(
            "risk-engine",
            self.risk_url(&format!("/api/users/{user_id}/hourly")),
            &HashMap::new(),
        )
        .await
    }

    /// Multi-day score history for one user, from the risk engine.
    pub async fn user_history(&self, user_id: &str) -> Result<Value> {
        self.get_json(
            "risk-engine",
            self.risk_url(&format!("/api/users/{user_id}/history")),
            &HashMap::new(),
        )
        .await
    }

    /// Union of both engines' rule lists, deduped by rule id. The risk
    /// engine's copy wins on conflicts; total failure yields an empty list.
    pub async fn merged_rules(&self) -> Vec<Value> {
        let risk_rules = self
            .get_json("risk-engine", self.risk_url("/api/rules"), &HashMap::new())
            .await
            .ok()
            .and_then(|v| v.get("rules").cloned())
            .and_then(|v| v.as_array().cloned())
            .unwrap_or_default();
        let rule_rules = self
            .get_json("rule-engine", self.rule_url("/api/rules"), &HashMap::new())
            .await
            .ok()
            .and_then(|v| v.get("rules").cloned())
            .and_then(|v| v.as_array().cloned())
            .unwrap_or_default();

        let mut seen = HashSet::new();
        let mut merged = Vec::new();
        for rule in risk_rules {
            let key = rule_key(&rule);
            seen.insert(key);
            merged.push(rule);
        }
        for rule in rule_rules {
            let key = rule_key(&rule);
            if !key.is_empty() && !seen.contains(&key) {
                seen.insert(key);
                merged.push(rule);
            }
        }
        merged
    }

    /// Create a rule on whichever engines the payload enables.
    pub async fn create_rule(&self, body: &Value) -> Value {
        self.fan_out_rule(Method::POST, "/api/rules".to_string(), body)
            .await
    }

    /// Update a rule on whichever engines the payload enables.
    pub async fn update_rule(&self, rule_id: &str, body: &Value) -> Value {
        self.fan_out_rule(Method::PUT, format!("/api/rules/{rule_id}"), body)
            .await
    }

    async fn fan_out_rule(&self, method: Method, path: String, body: &Value) -> Value {
        let mut result = serde_json::Map::new();

        if engine_enabled(body, "ueba") {
            let outcome = self
                .send_json(
                    "risk-engine",
                    method.clone(),
                    self.risk_url(&path),
                    Some(body),
                    None,
                )
                .await;
            result.insert("ueba".to_string(), outcome_value(outcome));
        }
        if engine_enabled(body, "cep") {
            let outcome = self
                .send_json("rule-engine", method, self.rule_url(&path), Some(body), None)
                .await;
            result.insert("cep".to_string(), outcome_value(outcome));
        }

        json!({"status": "ok", "result": Value::Object(result)})
    }

    /// Delete a rule from both engines; each deletion is attempted
    /// independently.
    pub async fn delete_rule(&self, rule_id: &str) -> Value {
        let mut result = serde_json::Map::new();
        let path = format!("/api/rules/{rule_id}");
        let risk = self
            .send_json(
                "risk-engine",
                Method::DELETE,
                self.risk_url(&path),
                None,
                None,
            )
            .await;
        result.insert("ueba".to_string(), outcome_value(risk));
        let rule = self
            .send_json(
                "rule-engine",
                Method::DELETE,
                self.rule_url(&path),
                None,
                None,
            )
            .await;
        result.insert("cep".to_string(), outcome_value(rule));
        json!({"status": "ok", "result": Value::Object(result)})
    }

    /// Scoring settings, from the risk engine.
    pub async fn settings(&self) -> Result<Value> {
        self.get_json("risk-engine", self.risk_url("/api/settings"), &HashMap::new())
            .await
    }

    /// Persist scoring settings on the risk engine.
    pub async fn save_settings(&self, body: &Value) -> Result<Value> {
        self.send_json(
            "risk-engine",
            Method::POST,
            self.risk_url("/api/settings"),
            Some(body),
            None,
        )
        .await
    }

    /// Rule-engine job status; an error body when it is down.
    pub async fn rule_engine_status(&self) -> Value {
        match self
            .get_json("rule-engine", self.rule_url("/api/status"), &HashMap::new())
            .await
        {
            Ok(status) => status,
            Err(e) => json!({"error": e.to_string()}),
        }
    }

    /// Trigger a full rule-engine reload.
    pub async fn rule_engine_reload(&self) -> Value {
        match self
            .send_json(
                "rule-engine",
                Method::POST,
                self.rule_url("/api/reload"),
                None,
                Some(RELOAD_TIMEOUT),
            )
            .await
        {
            Ok(result) => result,
            Err(e) => json!({"status": "error", "message": e.to_string()}),
        }
    }
}

fn rule_key(rule: &Value) -> String {
    rule.get("id")
        .or_else(|| rule.get("name"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn engine_enabled(body: &Value, engine: &str) -> bool {
    body.pointer(&format!("/{engine}/enabled"))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

fn outcome_value(outcome: Result<Value>) -> Value {
    match outcome {
        Ok(value) => value,
        Err(e) => json!({"error": e.to_string()}),
    }
}

fn empty_table_page(draw: u64) -> Value {
    json!({"draw": draw, "recordsTotal": 0, "recordsFiltered": 0, "data": []})
}

//! Client for the external search/aggregation store.
//!
//! Issues the read-model query shapes the dashboard depends on: calendar-day
//! bucketed per-user top-hit aggregations over the risk-score indices,
//! severity/rule histograms over the alert indices, and paged document
//! search over the event-log indices. Day boundaries are delegated to the
//! store (`now/d` ranges with the configured time zone); this process never
//! computes them itself.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use opswatch_core::config::IndexSettings;
use opswatch_core::error::{OpswatchError, Result};
use opswatch_core::record::UserRiskRecord;

/// The store refuses `from + size` beyond this window; paged reads clamp here.
pub const DEEP_PAGE_LIMIT: u64 = 50_000;

/// Bucket budget for per-user aggregations.
const USER_BUCKETS: u32 = 500;

pub struct SearchClient {
    http: reqwest::Client,
    base_url: String,
    indices: IndexSettings,
}

impl SearchClient {
    pub fn new(base_url: &str, indices: IndexSettings, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            indices,
        })
    }

    async fn search(&self, index: &str, body: Value) -> Result<Value> {
        let url = format!("{}/{}/_search", self.base_url, index);
        debug!(url = %url, "search query");
        let resp = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| OpswatchError::upstream("search", e))?;
        if !resp.status().is_success() {
            return Err(OpswatchError::upstream(
                "search",
                format!("status {}", resp.status()),
            ));
        }
        resp.json()
            .await
            .map_err(|e| OpswatchError::upstream("search", e))
    }

    fn today_range(&self) -> Value {
        json!({"range": {"@timestamp": {"gte": "now/d", "time_zone": self.indices.timezone}}})
    }

    fn yesterday_range(&self) -> Value {
        json!({"range": {"@timestamp": {
            "gte": "now-1d/d", "lt": "now/d", "time_zone": self.indices.timezone
        }}})
    }

    /// Latest record per user for today, highest-scoring users first.
    pub async fn today_user_records(&self) -> Result<Vec<UserRiskRecord>> {
        let body = json!({
            "size": 0,
            "query": self.today_range(),
            "aggs": {"byUser": {
                "terms": {
                    "field": "userId.keyword",
                    "size": USER_BUCKETS,
                    "order": {"maxScore": "desc"}
                },
                "aggs": {
                    "maxScore": {"max": {"field": "riskScore"}},
                    "latest": {"top_hits": {"size": 1, "sort": [{"@timestamp": "desc"}]}}
                }
            }}
        });
        let res = self.search(&self.indices.scores(), body).await?;
        Ok(parse_user_buckets(&res))
    }

    /// Latest record per user over the whole retention window (users view).
    pub async fn latest_user_records(&self) -> Result<Vec<UserRiskRecord>> {
        let body = json!({
            "size": 0,
            "aggs": {"byUser": {
                "terms": {"field": "userId.keyword", "size": USER_BUCKETS},
                "aggs": {
                    "latest": {"top_hits": {"size": 1, "sort": [{"@timestamp": "desc"}]}}
                }
            }}
        });
        let res = self.search(&self.indices.scores(), body).await?;
        Ok(parse_user_buckets(&res))
    }

    /// Yesterday's final score per user: the baseline map for score deltas.
    pub async fn baseline_scores(&self) -> Result<HashMap<String, i64>> {
        let body = json!({
            "size": 0,
            "query": self.yesterday_range(),
            "aggs": {"byUser": {
                "terms": {"field": "userId.keyword", "size": USER_BUCKETS},
                "aggs": {
                    "last": {"top_hits": {
                        "size": 1,
                        "sort": [{"@timestamp": "desc"}],
                        "_source": ["riskScore"]
                    }}
                }
            }}
        });
        let res = self.search(&self.indices.scores(), body).await?;
        Ok(parse_baseline(&res))
    }

    /// Yesterday's final score for one user.
    pub async fn user_baseline_score(&self, user_id: &str) -> Result<Option<i64>> {
        let body = json!({
            "size": 1,
            "sort": [{"@timestamp": "desc"}],
            "query": {"bool": {"must": [
                {"term": {"userId": user_id}},
                self.yesterday_range()
            ]}},
            "_source": ["riskScore"]
        });
        let res = self.search(&self.indices.scores(), body).await?;
        Ok(first_hit_source(&res).and_then(|source| source.get("riskScore")?.as_i64()))
    }

    /// Today's score documents for one user, newest first.
    pub async fn user_today_records(&self, user_id: &str, size: u32) -> Result<Vec<UserRiskRecord>> {
        let body = json!({
            "size": size,
            "sort": [{"@timestamp": "desc"}],
            "query": {"bool": {"must": [
                {"term": {"userId": user_id}},
                self.today_range()
            ]}}
        });
        let res = self.search(&self.indices.scores(), body).await?;
        Ok(hit_sources(&res)
            .into_iter()
            .filter_map(|source| serde_json::from_value(source).ok())
            .collect())
    }

    /// Today's maxima for one user: worst rule score, anomaly score, and
    /// decayed carry-over from the previous day.
    pub async fn user_today_maxima(&self, user_id: &str) -> Result<TodayMaxima> {
        let body = json!({
            "size": 0,
            "query": {"bool": {"must": [
                {"term": {"userId": user_id}},
                self.today_range()
            ]}},
            "aggs": {
                "maxRule": {"max": {"field": "ruleScore"}},
                "maxAnomaly": {"max": {"field": "anomalyScore"}},
                "maxDecay": {"max": {"field": "decayedPrev"}}
            }
        });
        let res = self.search(&self.indices.scores(), body).await?;
        Ok(TodayMaxima {
            rule_score: agg_value(&res, "maxRule"),
            anomaly_score: agg_value(&res, "maxAnomaly"),
            decayed_prev: agg_value(&res, "maxDecay"),
        })
    }

    /// Today's per-rule score maps for one user, for worst-score merging.
    pub async fn user_rule_score_docs(&self, user_id: &str) -> Result<Vec<BTreeMap<String, f64>>> {
        let body = json!({
            "size": 100,
            "_source": ["ruleScores"],
            "query": {"bool": {"must": [
                {"term": {"userId": user_id}},
                self.today_range(),
                {"exists": {"field": "ruleScores"}}
            ]}}
        });
        let res = self.search(&self.indices.scores(), body).await?;
        Ok(hit_sources(&res)
            .into_iter()
            .filter_map(|source| {
                serde_json::from_value(source.get("ruleScores")?.clone()).ok()
            })
            .collect())
    }

    /// Today's alert severity and rule histograms.
    pub async fn alert_stats(&self) -> Result<AlertStats> {
        let body = json!({
            "size": 0,
            "query": self.today_range(),
            "aggs": {
                "bySeverity": {"terms": {"field": "severity.keyword"}},
                "byRule": {"terms": {"field": "ruleName.keyword", "size": 10}}
            }
        });
        let res = self.search(&self.indices.alerts(), body).await?;
        Ok(AlertStats {
            by_severity: parse_terms(&res, "bySeverity"),
            by_rule: parse_terms(&res, "byRule"),
        })
    }

    /// The `n` most recent alerts across all users.
    pub async fn recent_alerts(&self, n: u32) -> Result<Vec<Value>> {
        let body = json!({
            "size": n,
            "sort": [{"@timestamp": "desc"}],
            "_source": [
                "ruleId", "ruleName", "severity", "userId", "userName",
                "hostname", "@timestamp", "description"
            ]
        });
        let res = self.search(&self.indices.alerts(), body).await?;
        Ok(hit_sources(&res))
    }

    /// Today's alerts for one user, newest first.
    pub async fn user_alerts(&self, user_id: &str, size: u32) -> Result<Vec<Value>> {
        let body = json!({
            "size": size,
            "sort": [{"@timestamp": "desc"}],
            "query": {"bool": {"must": [
                {"term": {"userId": user_id}},
                self.today_range()
            ]}}
        });
        let res = self.search(&self.indices.alerts(), body).await?;
        Ok(hit_sources(&res))
    }

    /// Today's log volume per message type, plus the total.
    pub async fn log_stats(&self) -> Result<LogStats> {
        let body = json!({
            "size": 0,
            "track_total_hits": true,
            "query": self.today_range(),
            "aggs": {"byType": {"terms": {"field": "msgId.keyword", "size": 20}}}
        });
        let res = self.search(&self.indices.logs(), body).await?;
        Ok(LogStats {
            total: total_hits(&res),
            by_type: parse_terms(&res, "byType"),
        })
    }

    /// Server-side paged event-log listing.
    pub async fn search_logs(&self, query: &LogQuery) -> Result<LogPage> {
        let filter = build_log_filter(query);

        let count_body = json!({"size": 0, "query": filter, "track_total_hits": true});
        let count_res = self.search(&self.indices.logs(), count_body).await?;
        let total = total_hits(&count_res).min(DEEP_PAGE_LIMIT);

        if query.start >= DEEP_PAGE_LIMIT {
            return Ok(LogPage {
                draw: query.draw,
                records_total: total,
                records_filtered: total,
                data: Vec::new(),
            });
        }

        let body = json!({
            "from": query.start,
            "size": query.length,
            "sort": [{(query.sort_field()): query.order_dir_or_default()}],
            "query": filter
        });
        let res = self.search(&self.indices.logs(), body).await?;
        let data = hit_sources(&res).iter().map(log_row).collect();

        Ok(LogPage {
            draw: query.draw,
            records_total: total,
            records_filtered: total,
            data,
        })
    }
}

// ---------------------------------------------------------------------------
// Query/response shapes
// ---------------------------------------------------------------------------

/// One terms-aggregation bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TermCount {
    pub key: String,
    pub count: u64,
}

/// Today's alert histograms.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertStats {
    pub by_severity: Vec<TermCount>,
    pub by_rule: Vec<TermCount>,
}

/// Today's log volume.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogStats {
    pub total: u64,
    pub by_type: Vec<TermCount>,
}

/// Per-user daily maxima shown on the detail view.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TodayMaxima {
    pub rule_score: f64,
    pub anomaly_score: f64,
    pub decayed_prev: f64,
}

/// DataTables-style paging parameters for the log listing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogQuery {
    pub draw: u64,
    pub start: u64,
    pub length: u64,
    pub search: String,
    #[serde(rename = "msgId")]
    pub msg_id: String,
    pub outcome: String,
    pub order_col: usize,
    pub order_dir: String,
}

impl Default for LogQuery {
    fn default() -> Self {
        Self {
            draw: 1,
            start: 0,
            length: 15,
            search: String::new(),
            msg_id: String::new(),
            outcome: String::new(),
            order_col: 0,
            order_dir: "desc".to_string(),
        }
    }
}

impl LogQuery {
    const SORT_COLUMNS: [&'static str; 6] = [
        "@timestamp",
        "cefExtensions.suid",
        "msgId",
        "cefExtensions.shost",
        "cefExtensions.src",
        "cefExtensions.outcome",
    ];

    fn sort_field(&self) -> &'static str {
        Self::SORT_COLUMNS
            .get(self.order_col)
            .copied()
            .unwrap_or("@timestamp")
    }

    fn order_dir_or_default(&self) -> &str {
        match self.order_dir.as_str() {
            "asc" => "asc",
            _ => "desc",
        }
    }
}

/// One page of flattened log rows.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogPage {
    pub draw: u64,
    pub records_total: u64,
    pub records_filtered: u64,
    pub data: Vec<Vec<String>>,
}

fn build_log_filter(query: &LogQuery) -> Value {
    let mut must = vec![json!({"range": {"@timestamp": {"gte": "now-1d"}}})];
    if !query.search.is_empty() {
        must.push(json!({"multi_match": {
            "query": query.search,
            "fields": ["msgId", "cefExtensions.suid", "cefExtensions.shost", "userId", "hostname"]
        }}));
    }
    if !query.msg_id.is_empty() {
        must.push(json!({"term": {"msgId": query.msg_id}}));
    }

    let mut filter = json!({"bool": {"must": must}});
    if !query.outcome.is_empty() {
        // The outcome lives top-level or under cefExtensions depending on source.
        filter["bool"]["should"] = json!([
            {"term": {"outcome": query.outcome}},
            {"term": {"cefExtensions.outcome": query.outcome}}
        ]);
        filter["bool"]["minimum_should_match"] = json!(1);
    }
    filter
}

// ---------------------------------------------------------------------------
// Response parsing
// ---------------------------------------------------------------------------

fn parse_user_buckets(res: &Value) -> Vec<UserRiskRecord> {
    let Some(buckets) = res
        .pointer("/aggregations/byUser/buckets")
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };

    let mut records = Vec::new();
    for bucket in buckets {
        let Some(source) = bucket.pointer("/latest/hits/hits/0/_source") else {
            continue;
        };
        let Ok(mut record) = serde_json::from_value::<UserRiskRecord>(source.clone()) else {
            continue;
        };
        if record.user_id.is_empty() {
            if let Some(key) = bucket.get("key").and_then(Value::as_str) {
                record.user_id = key.to_string();
            }
        }
        records.push(record);
    }
    records
}

fn parse_baseline(res: &Value) -> HashMap<String, i64> {
    let Some(buckets) = res
        .pointer("/aggregations/byUser/buckets")
        .and_then(Value::as_array)
    else {
        return HashMap::new();
    };

    let mut baseline = HashMap::new();
    for bucket in buckets {
        let Some(user_id) = bucket.get("key").and_then(Value::as_str) else {
            continue;
        };
        let Some(source) = bucket.pointer("/last/hits/hits/0/_source") else {
            continue;
        };
        let score = source
            .get("riskScore")
            .and_then(Value::as_i64)
            .unwrap_or(0);
        baseline.insert(user_id.to_string(), score);
    }
    baseline
}

fn parse_terms(res: &Value, agg: &str) -> Vec<TermCount> {
    res.pointer(&format!("/aggregations/{agg}/buckets"))
        .and_then(Value::as_array)
        .map(|buckets| {
            buckets
                .iter()
                .filter_map(|bucket| {
                    Some(TermCount {
                        key: bucket.get("key")?.as_str()?.to_string(),
                        count: bucket.get("doc_count")?.as_u64()?,
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn hit_sources(res: &Value) -> Vec<Value> {
    res.pointer("/hits/hits")
        .and_then(Value::as_array)
        .map(|hits| {
            hits.iter()
                .filter_map(|hit| hit.get("_source").cloned())
                .collect()
        })
        .unwrap_or_default()
}

fn first_hit_source(res: &Value) -> Option<&Value> {
    res.pointer("/hits/hits/0/_source")
}

fn total_hits(res: &Value) -> u64 {
    res.pointer("/hits/total/value")
        .and_then(Value::as_u64)
        .unwrap_or(0)
}

fn agg_value(res: &Value, agg: &str) -> f64 {
    res.pointer(&format!("/aggregations/{agg}/value"))
        .and_then(Value::as_f64)
        .unwrap_or(0.0)
}

/// Read a field from the top level or the CEF extension block.
fn ext(source: &Value, field: &str) -> String {
    source
        .get(field)
        .or_else(|| source.pointer(&format!("/cefExtensions/{field}")))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn first_non_empty(a: String, b: String) -> String {
    if a.is_empty() {
        b
    } else {
        a
    }
}

/// Flatten one log document into the table row the UI renders.
fn log_row(source: &Value) -> Vec<String> {
    vec![
        ext(source, "@timestamp"),
        ext(source, "msgId").replace("MESSAGE_", ""),
        first_non_empty(ext(source, "userId"), ext(source, "suid")),
        first_non_empty(ext(source, "hostname"), ext(source, "shost")),
        first_non_empty(ext(source, "userIp"), ext(source, "src")),
        first_non_empty(ext(source, "action"), ext(source, "act")),
        ext(source, "outcome"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use opswatch_core::config::IndexSettings;

    fn user_agg_fixture() -> Value {
        json!({
            "aggregations": {"byUser": {"buckets": [
                {
                    "key": "u1",
                    "doc_count": 12,
                    "latest": {"hits": {"hits": [{"_source": {
                        "userId": "u1", "riskScore": 120, "riskLevel": "CRITICAL"
                    }}]}}
                },
                {
                    "key": "u2",
                    "doc_count": 4,
                    "latest": {"hits": {"hits": [{"_source": {
                        "riskScore": 55, "riskLevel": "MEDIUM"
                    }}]}}
                },
                {
                    "key": "u3",
                    "doc_count": 1,
                    "latest": {"hits": {"hits": []}}
                }
            ]}}
        })
    }

    #[test]
    fn user_buckets_parse_and_backfill_ids() {
        let records = parse_user_buckets(&user_agg_fixture());
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].user_id, "u1");
        assert_eq!(records[0].risk_score, 120);
        // _source without a userId falls back to the bucket key.
        assert_eq!(records[1].user_id, "u2");
        // A bucket without a top hit contributes nothing.
    }

    #[test]
    fn baseline_parses_scores_and_defaults_missing_to_zero() {
        let res = json!({
            "aggregations": {"byUser": {"buckets": [
                {"key": "u2", "last": {"hits": {"hits": [{"_source": {"riskScore": 20}}]}}},
                {"key": "u5", "last": {"hits": {"hits": [{"_source": {}}]}}}
            ]}}
        });
        let baseline = parse_baseline(&res);
        assert_eq!(baseline["u2"], 20);
        assert_eq!(baseline["u5"], 0);
    }

    #[test]
    fn terms_parse_tolerates_missing_aggregations() {
        assert!(parse_terms(&json!({}), "bySeverity").is_empty());
        let res = json!({"aggregations": {"bySeverity": {"buckets": [
            {"key": "HIGH", "doc_count": 7},
            {"key": "LOW", "doc_count": 2}
        ]}}});
        let terms = parse_terms(&res, "bySeverity");
        assert_eq!(terms.len(), 2);
        assert_eq!(terms[0].key, "HIGH");
        assert_eq!(terms[0].count, 7);
    }

    #[test]
    fn log_rows_flatten_cef_extension_fields() {
        let source = json!({
            "@timestamp": "2026-08-06T01:00:00Z",
            "msgId": "MESSAGE_PRINT",
            "cefExtensions": {
                "suid": "u1", "shost": "ws-042", "src": "10.0.0.9",
                "act": "print", "outcome": "success"
            }
        });
        let row = log_row(&source);
        assert_eq!(
            row,
            vec![
                "2026-08-06T01:00:00Z",
                "PRINT",
                "u1",
                "ws-042",
                "10.0.0.9",
                "print",
                "success"
            ]
        );
    }

    #[test]
    fn log_rows_prefer_top_level_fields() {
        let source = json!({
            "msgId": "MESSAGE_DEVICE",
            "userId": "top-user",
            "cefExtensions": {"suid": "cef-user"}
        });
        let row = log_row(&source);
        assert_eq!(row[2], "top-user");
    }

    #[test]
    fn log_query_sort_column_is_bounded() {
        let query = LogQuery {
            order_col: 99,
            ..LogQuery::default()
        };
        assert_eq!(query.sort_field(), "@timestamp");
        let query = LogQuery {
            order_col: 2,
            order_dir: "asc".into(),
            ..LogQuery::default()
        };
        assert_eq!(query.sort_field(), "msgId");
        assert_eq!(query.order_dir_or_default(), "asc");
    }

    #[test]
    fn log_filter_includes_requested_terms() {
        let query = LogQuery {
            search: "ws-042".into(),
            msg_id: "MESSAGE_PRINT".into(),
            outcome: "failure".into(),
            ..LogQuery::default()
        };
        let filter = build_log_filter(&query);
        let must = filter["bool"]["must"].as_array().unwrap();
        assert_eq!(must.len(), 3);
        assert_eq!(filter["bool"]["minimum_should_match"], 1);
    }

    #[tokio::test]
    async fn today_user_records_round_trip_against_mock_store() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/opswatch-risk-scores-*/_search")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(user_agg_fixture().to_string())
            .create_async()
            .await;

        let client = SearchClient::new(
            &server.url(),
            IndexSettings::default(),
            Duration::from_secs(2),
        )
        .unwrap();
        let records = client.today_user_records().await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].risk_score, 120);
    }

    #[tokio::test]
    async fn upstream_error_status_maps_to_upstream_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/opswatch-risk-scores-*/_search")
            .with_status(503)
            .create_async()
            .await;

        let client = SearchClient::new(
            &server.url(),
            IndexSettings::default(),
            Duration::from_secs(2),
        )
        .unwrap();
        let err = client.today_user_records().await.unwrap_err();
        assert!(err.to_string().contains("search"));
    }
}

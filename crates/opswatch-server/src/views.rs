//! Read-view assembly for the dashboard.
//!
//! Views are derived on demand from the search store and the tier cache.
//! The summary keeps the last successful result: when the store is
//! unreachable the stale copy is served with a staleness marker instead of
//! rendering an empty, zero-risk dashboard.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::warn;

use opswatch_core::aggregate::{self, FeatureChange, ScoredUser};
use opswatch_core::error::Result;
use opswatch_core::record::UserRiskRecord;
use opswatch_core::tiers::TierConfig;

use crate::search::{AlertStats, LogPage, LogQuery, LogStats, SearchClient, TodayMaxima};
use crate::tiers::TierCache;

/// Ranking depth of the summary view.
pub const TOP_USERS: usize = 10;

/// Everything the main dashboard renders in one response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSummary {
    pub generated_at: DateTime<Utc>,
    /// True when this is a cached copy served because the store is down.
    pub stale: bool,
    pub alerts: AlertStats,
    pub level_counts: BTreeMap<String, u64>,
    pub top_users: Vec<ScoredUser>,
    pub recent_alerts: Vec<Value>,
    pub logs: LogStats,
    pub tiers: TierConfig,
}

/// Per-user drill-down view.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDetail {
    pub user_id: String,
    /// Today's score documents, newest first.
    pub history: Vec<UserRiskRecord>,
    /// Feature deltas between the two most recent records.
    pub feature_changes: Vec<FeatureChange>,
    /// Yesterday's final score, 0 if the user has no yesterday record.
    pub prev_day_score: i64,
    pub today: TodaySummary,
    pub alerts: Vec<Value>,
    pub tiers: TierConfig,
}

/// Today's rule-violation rollup for one user.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TodaySummary {
    #[serde(flatten)]
    pub maxima: TodayMaxima,
    pub rule_violations: Vec<String>,
    pub rule_scores: BTreeMap<String, f64>,
}

/// Assembles read views from the search store and the tier cache.
pub struct ViewService {
    search: SearchClient,
    tiers: Arc<TierCache>,
    last_summary: RwLock<Option<DashboardSummary>>,
}

impl ViewService {
    pub fn new(search: SearchClient, tiers: Arc<TierCache>) -> Self {
        Self {
            search,
            tiers,
            last_summary: RwLock::new(None),
        }
    }

    /// The summary view, or the last good copy marked stale when the store
    /// is unreachable. Errors only when there is no copy to fall back on.
    pub async fn dashboard(&self) -> Result<DashboardSummary> {
        match self.assemble_summary().await {
            Ok(summary) => {
                *self.last_summary.write().await = Some(summary.clone());
                Ok(summary)
            }
            Err(e) => {
                warn!(error = %e, "summary assembly failed, serving last good copy");
                match self.last_summary.read().await.clone() {
                    Some(mut summary) => {
                        summary.stale = true;
                        Ok(summary)
                    }
                    None => Err(e),
                }
            }
        }
    }

    async fn assemble_summary(&self) -> Result<DashboardSummary> {
        let records = self.search.today_user_records().await?;
        let baseline = self.search.baseline_scores().await?;
        let alerts = self.search.alert_stats().await?;
        let recent_alerts = self.search.recent_alerts(10).await?;
        let logs = self.search.log_stats().await?;

        let level_counts = aggregate::level_histogram(&records);
        let scored = aggregate::with_score_diffs(&records, &baseline);
        let top_users = aggregate::top_by_score(scored, TOP_USERS);

        Ok(DashboardSummary {
            generated_at: Utc::now(),
            stale: false,
            alerts,
            level_counts,
            top_users,
            recent_alerts,
            logs,
            tiers: self.tiers.get().await,
        })
    }

    /// Per-user latest records with baseline deltas, optionally filtered by
    /// risk level, highest scores first.
    pub async fn users(&self, level: Option<&str>) -> Result<Vec<ScoredUser>> {
        let records = self.search.latest_user_records().await?;
        let baseline = self.search.baseline_scores().await?;
        let scored = aggregate::with_score_diffs(&records, &baseline);
        let count = scored.len();
        Ok(filter_by_level(
            aggregate::top_by_score(scored, count),
            level,
        ))
    }

    /// Drill-down for one user.
    pub async fn user_detail(&self, user_id: &str) -> Result<UserDetail> {
        let history = self.search.user_today_records(user_id, 10).await?;
        let feature_changes = match history.as_slice() {
            [current, previous, ..] => {
                aggregate::feature_changes(&current.event_values, &previous.event_values)
            }
            _ => Vec::new(),
        };
        let prev_day_score = self.search.user_baseline_score(user_id).await?.unwrap_or(0);
        let maxima = self.search.user_today_maxima(user_id).await?;
        let rule_scores =
            aggregate::merge_rule_scores(&self.search.user_rule_score_docs(user_id).await?);
        let alerts = self.search.user_alerts(user_id, 50).await?;

        Ok(UserDetail {
            user_id: user_id.to_string(),
            history,
            feature_changes,
            prev_day_score,
            today: TodaySummary {
                maxima,
                rule_violations: rule_scores.keys().cloned().collect(),
                rule_scores,
            },
            alerts,
            tiers: self.tiers.get().await,
        })
    }

    /// Paged event-log listing, passed straight through to the store.
    pub async fn logs(&self, query: &LogQuery) -> Result<LogPage> {
        self.search.search_logs(query).await
    }
}

fn filter_by_level(users: Vec<ScoredUser>, level: Option<&str>) -> Vec<ScoredUser> {
    match level {
        Some(level) if !level.is_empty() => users
            .into_iter()
            .filter(|user| user.record.risk_level == level)
            .collect(),
        _ => users,
    }
}

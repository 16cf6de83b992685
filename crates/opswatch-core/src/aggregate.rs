//! Pure aggregation over per-user risk records.
//!
//! Every function here is a pure transform of its inputs. The read views
//! feed them documents fetched from the search store and render the results
//! directly; nothing in this module does I/O or holds state.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::event::RiskLevel;
use crate::record::UserRiskRecord;

/// Count users per risk level, one count per user-latest record.
///
/// The four known levels are always present (zero-seeded); any other level
/// string appearing in the data still gets its own bucket -- a record is
/// never silently dropped.
pub fn level_histogram(records: &[UserRiskRecord]) -> BTreeMap<String, u64> {
    let mut counts = BTreeMap::new();
    for level in RiskLevel::ALL {
        counts.insert(level.as_str().to_string(), 0);
    }
    for record in records {
        *counts.entry(record.risk_level.clone()).or_insert(0) += 1;
    }
    counts
}

/// Delta against the prior-day baseline. A user with no baseline shows zero:
/// the current score acts as its own baseline.
pub fn score_diff(current: i64, baseline: Option<i64>) -> i64 {
    current - baseline.unwrap_or(current)
}

/// A user's latest record annotated with its baseline delta.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredUser {
    #[serde(flatten)]
    pub record: UserRiskRecord,
    pub score_diff: i64,
}

/// Annotate each record with its delta versus the baseline map.
pub fn with_score_diffs(
    records: &[UserRiskRecord],
    baseline: &HashMap<String, i64>,
) -> Vec<ScoredUser> {
    records
        .iter()
        .map(|record| ScoredUser {
            score_diff: score_diff(record.risk_score, baseline.get(&record.user_id).copied()),
            record: record.clone(),
        })
        .collect()
}

/// Top `n` users by current risk score, descending. Ties break by user id
/// ascending so the ranking is stable across refreshes.
pub fn top_by_score(mut users: Vec<ScoredUser>, n: usize) -> Vec<ScoredUser> {
    users.sort_by(|a, b| {
        b.record
            .risk_score
            .cmp(&a.record.risk_score)
            .then_with(|| a.record.user_id.cmp(&b.record.user_id))
    });
    users.truncate(n);
    users
}

/// One behavioral feature whose value moved between a user's two most
/// recent records.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureChange {
    pub name: String,
    pub diff: f64,
}

/// Differences between two feature-value maps: union of keys, a missing
/// value reads as 0, zero diffs are dropped, output is in ascending key
/// order.
pub fn feature_changes(
    current: &BTreeMap<String, f64>,
    previous: &BTreeMap<String, f64>,
) -> Vec<FeatureChange> {
    let mut keys: Vec<&String> = current.keys().chain(previous.keys()).collect();
    keys.sort();
    keys.dedup();

    keys.into_iter()
        .filter_map(|key| {
            let diff = current.get(key).copied().unwrap_or(0.0)
                - previous.get(key).copied().unwrap_or(0.0);
            (diff != 0.0).then(|| FeatureChange {
                name: key.clone(),
                diff,
            })
        })
        .collect()
}

/// Per-rule maximum score across a day's score documents for one user.
/// The same rule can fire many times a day; the view shows its worst score.
pub fn merge_rule_scores(docs: &[BTreeMap<String, f64>]) -> BTreeMap<String, f64> {
    let mut merged: BTreeMap<String, f64> = BTreeMap::new();
    for doc in docs {
        for (rule, score) in doc {
            merged
                .entry(rule.clone())
                .and_modify(|current| {
                    if *score > *current {
                        *current = *score;
                    }
                })
                .or_insert(*score);
        }
    }
    merged
}

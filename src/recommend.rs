//! Field Recommender
//!
//! When a create request is missing required fields, this mines recent
//! records (and one actor's own history) for ranked candidate values to
//! offer alongside the "please supply" prompt. Strictly best-effort: any
//! failure collapses to an empty set, never into the workflow's error path.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::registry::EntitySpec;
use crate::store::RecordStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub value: Value,
    /// How many recent records used this value.
    pub frequency: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecommendationSet {
    pub recommendations: Vec<Recommendation>,
}

pub struct FieldRecommender {
    store: Arc<dyn RecordStore>,
}

impl FieldRecommender {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Ranked candidates for each named field, mined from recent records.
    pub async fn recommend(
        &self,
        spec: &EntitySpec,
        field_names: &[String],
        limit: usize,
        lookback_days: u32,
    ) -> HashMap<String, RecommendationSet> {
        let records = match self.store.list_recent(spec, lookback_days, 100).await {
            Ok(records) => records,
            Err(err) => {
                debug!("recommendation mining skipped for {}: {err:#}", spec.name);
                return HashMap::new();
            }
        };

        field_names
            .iter()
            .map(|field| (field.clone(), rank_values(&records, field, limit)))
            .collect()
    }

    /// Candidates drawn only from records the actor created themselves.
    pub async fn recommend_for_actor(
        &self,
        spec: &EntitySpec,
        field: &str,
        actor_id: &str,
        limit: usize,
    ) -> RecommendationSet {
        let records = match self.store.list_recent(spec, 90, 100).await {
            Ok(records) => records,
            Err(err) => {
                debug!("actor preference mining skipped for {}: {err:#}", spec.name);
                return RecommendationSet::default();
            }
        };

        let own: Vec<Value> = records
            .into_iter()
            .filter(|record| {
                record
                    .get("created_by")
                    .map(|v| value_matches_actor(v, actor_id))
                    .unwrap_or(false)
            })
            .collect();

        rank_values(&own, field, limit)
    }
}

fn value_matches_actor(value: &Value, actor_id: &str) -> bool {
    match value {
        Value::String(s) => s == actor_id,
        Value::Number(n) => n.to_string() == actor_id,
        _ => false,
    }
}

/// Tally non-null values of `field`, most frequent first; ties keep the
/// order the records arrived in (newest first).
fn rank_values(records: &[Value], field: &str, limit: usize) -> RecommendationSet {
    let mut counts: Vec<(Value, u64)> = Vec::new();
    for record in records {
        let value = match record.get(field) {
            Some(Value::Null) | None => continue,
            Some(v) => v,
        };
        if let Some(entry) = counts.iter_mut().find(|entry| entry.0 == *value) {
            entry.1 += 1;
        } else {
            counts.push((value.clone(), 1));
        }
    }
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    RecommendationSet {
        recommendations: counts
            .into_iter()
            .take(limit)
            .map(|(value, frequency)| Recommendation { value, frequency })
            .collect(),
    }
}

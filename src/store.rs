//! Record Store
//!
//! Read-only capability over the downstream record API: current-record
//! snapshots, related-record counts and recent-record listings. The
//! orchestration core has no knowledge of the persistence technology
//! behind it; production talks REST, tests plug in a map.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::registry::{EntitySpec, RelatedTable};

/// One related table's contribution to a record's blast radius.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedRecordSummary {
    pub table: String,
    pub count: u64,
    pub description: String,
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fetch the current snapshot of a record, `None` when it does not exist.
    async fn get(&self, spec: &EntitySpec, record_id: &str) -> Result<Option<Value>>;

    /// Count rows of `related` that reference `record_id`.
    async fn count_related(
        &self,
        spec: &EntitySpec,
        related: &RelatedTable,
        record_id: &str,
    ) -> Result<u64>;

    /// Recent records of an entity, newest first, for value mining.
    async fn list_recent(
        &self,
        spec: &EntitySpec,
        lookback_days: u32,
        limit: usize,
    ) -> Result<Vec<Value>>;
}

/// REST-backed store over the same downstream API the executor mutates.
pub struct HttpRecordStore {
    client: Client,
    base_url: String,
    token: String,
}

impl HttpRecordStore {
    pub fn new(base_url: String, token: String, timeout: Duration) -> Self {
        Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            base_url,
            token,
        }
    }

    async fn get_json(&self, path: &str) -> Result<(u16, Value)> {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .with_context(|| format!("record lookup failed for {}", url))?;
        let status = response.status().as_u16();
        let body = response
            .json::<Value>()
            .await
            .with_context(|| format!("non-JSON reply from {}", url))?;
        Ok((status, body))
    }
}

/// Unwrap the `{ success, data }` envelope the downstream API wraps
/// every reply in; replies without the envelope are passed through.
fn unwrap_data(body: Value) -> Value {
    match body {
        Value::Object(mut map) => map.remove("data").unwrap_or(Value::Object(map)),
        other => other,
    }
}

/// Pull a row list out of the varying list-reply shapes the API uses.
fn rows_of(data: &Value) -> Vec<Value> {
    if let Some(items) = data.as_array() {
        return items.clone();
    }
    for key in ["items", "list", "rows"] {
        if let Some(items) = data.get(key).and_then(Value::as_array) {
            return items.clone();
        }
    }
    Vec::new()
}

fn total_of(data: &Value) -> Option<u64> {
    data.get("total").and_then(Value::as_u64)
}

#[async_trait]
impl RecordStore for HttpRecordStore {
    async fn get(&self, spec: &EntitySpec, record_id: &str) -> Result<Option<Value>> {
        let (status, body) = self
            .get_json(&format!("{}/{}", spec.endpoint, record_id))
            .await?;
        if status == 404 {
            return Ok(None);
        }
        if body.get("success").and_then(Value::as_bool) == Some(false) {
            return Ok(None);
        }
        Ok(Some(unwrap_data(body)))
    }

    async fn count_related(
        &self,
        _spec: &EntitySpec,
        related: &RelatedTable,
        record_id: &str,
    ) -> Result<u64> {
        let path = format!(
            "/api/{}?{}={}&pageSize=1",
            related.table, related.foreign_key, record_id
        );
        let (_, body) = self.get_json(&path).await?;
        let data = unwrap_data(body);
        Ok(total_of(&data).unwrap_or_else(|| rows_of(&data).len() as u64))
    }

    async fn list_recent(
        &self,
        spec: &EntitySpec,
        lookback_days: u32,
        limit: usize,
    ) -> Result<Vec<Value>> {
        let path = format!("{}?days={}&pageSize={}", spec.endpoint, lookback_days, limit);
        let (_, body) = self.get_json(&path).await?;
        Ok(rows_of(&unwrap_data(body)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unwraps_the_success_data_envelope() {
        let data = unwrap_data(json!({ "success": true, "data": { "id": 7 } }));
        assert_eq!(data, json!({ "id": 7 }));
    }

    #[test]
    fn passes_bare_replies_through() {
        let data = unwrap_data(json!({ "id": 7, "name": "x" }));
        assert_eq!(data["id"], 7);
    }

    #[test]
    fn finds_rows_in_the_common_list_shapes() {
        assert_eq!(rows_of(&json!([1, 2])).len(), 2);
        assert_eq!(rows_of(&json!({ "items": [1] })).len(), 1);
        assert_eq!(rows_of(&json!({ "list": [1, 2, 3] })).len(), 3);
        assert!(rows_of(&json!({ "total": 9 })).is_empty());
    }

    #[test]
    fn prefers_the_total_field_over_row_counting() {
        let data = json!({ "total": 25, "rows": [1] });
        assert_eq!(total_of(&data), Some(25));
    }
}

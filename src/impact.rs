//! Impact Inspector
//!
//! Before an update or delete is shown for confirmation, fetch the current
//! record and fan out over the entity's related tables to size the blast
//! radius. A missing record is fatal; a failed related-table lookup only
//! degrades that table to zero and leaves a safety concern behind.

use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::WorkflowError;
use crate::registry::EntitySpec;
use crate::store::{RecordStore, RelatedRecordSummary};
use crate::workflow::{DeleteType, MutationRequest, Operation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Minimal,
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactReport {
    pub current_data: Value,
    pub related_record_count: u64,
    pub related_records: Vec<RelatedRecordSummary>,
    pub risk_level: RiskLevel,
    pub can_proceed: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub blocking_reason: String,
    pub safety_concerns: Vec<String>,
}

pub struct ImpactInspector {
    store: Arc<dyn RecordStore>,
}

impl ImpactInspector {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    pub async fn inspect(
        &self,
        spec: &EntitySpec,
        request: &MutationRequest,
        record_id: &str,
    ) -> Result<ImpactReport, WorkflowError> {
        let current_data = self
            .store
            .get(spec, record_id)
            .await
            .map_err(|err| {
                warn!("current-record lookup failed for {} {record_id}: {err:#}", spec.name);
                WorkflowError::RecordNotFound {
                    entity: spec.name.clone(),
                    record_id: record_id.to_string(),
                }
            })?
            .ok_or_else(|| WorkflowError::RecordNotFound {
                entity: spec.name.clone(),
                record_id: record_id.to_string(),
            })?;

        let mut safety_concerns = Vec::new();

        // Independent reads; one slow or broken table must not block the rest.
        let lookups = spec.related_tables.iter().map(|related| async move {
            let count = self.store.count_related(spec, related, record_id).await;
            (related, count)
        });
        let mut related_records = Vec::new();
        for (related, count) in join_all(lookups).await {
            let count = match count {
                Ok(count) => count,
                Err(err) => {
                    warn!("related lookup failed for {}: {err:#}", related.table);
                    safety_concerns.push(format!(
                        "related-record lookup failed for {}; counted as 0",
                        related.table
                    ));
                    0
                }
            };
            if count > 0 {
                related_records.push(RelatedRecordSummary {
                    table: related.table.clone(),
                    count,
                    description: related.description.clone(),
                });
            }
        }
        let related_record_count: u64 = related_records.iter().map(|r| r.count).sum();

        if is_key_record(spec, &current_data) {
            safety_concerns.push("this is a key record".to_string());
        }

        let risk_level = risk_level(request.operation, request.delete_type, related_record_count);

        let (mut can_proceed, mut blocking_reason) = match request.operation {
            Operation::Delete
                if request.delete_type == DeleteType::Hard && related_record_count > 0 =>
            {
                (
                    false,
                    format!(
                        "{} related records exist; a hard delete would leave them inconsistent",
                        related_record_count
                    ),
                )
            }
            _ => (true, String::new()),
        };

        // The override is allowed but never silent.
        if !can_proceed && request.force_delete {
            can_proceed = true;
            blocking_reason.clear();
            safety_concerns.push(format!(
                "force delete requested: {} related records will be orphaned",
                related_record_count
            ));
        }

        Ok(ImpactReport {
            current_data,
            related_record_count,
            related_records,
            risk_level,
            can_proceed,
            blocking_reason,
            safety_concerns,
        })
    }
}

fn risk_level(operation: Operation, delete_type: DeleteType, related_count: u64) -> RiskLevel {
    match operation {
        Operation::Delete => {
            if related_count == 0 {
                RiskLevel::Minimal
            } else if delete_type == DeleteType::Soft {
                RiskLevel::Low
            } else if related_count <= 10 {
                RiskLevel::Medium
            } else {
                RiskLevel::High
            }
        }
        _ => {
            if related_count == 0 {
                RiskLevel::Minimal
            } else {
                RiskLevel::Low
            }
        }
    }
}

fn is_key_record(spec: &EntitySpec, data: &Value) -> bool {
    match spec.name.as_str() {
        "users" => data.get("role").and_then(Value::as_str) == Some("admin"),
        "classes" => data.get("status").and_then(Value::as_str) == Some("active"),
        _ => false,
    }
}

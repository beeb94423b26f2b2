//! Confirmation Artifact
//!
//! Everything a human (or approving agent) needs to judge a pending
//! mutation, assembled into one reviewable artifact: operation details,
//! data preview (to-be-created payload or before/after diff), impact
//! report, warnings and the confirmation options. The artifact is sealed
//! into a serializable token so the confirm and execute phases can happen
//! in different processes with no server-side session in between.

use chrono::{DateTime, Datelike, SecondsFormat, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::analysis::{AnalysisResult, Complexity};
use crate::impact::ImpactReport;
use crate::registry::EntitySpec;
use crate::workflow::{DeleteType, MutationRequest, Operation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Added,
    Removed,
    Modified,
}

/// One entry of the update before/after comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    pub old_value: Value,
    pub new_value: Value,
    pub change_type: ChangeType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationDetails {
    pub api_endpoint: String,
    pub http_method: String,
    pub complexity: Complexity,
    pub estimated_time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_strategy: Option<DeleteType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPreview {
    pub original_data: Value,
    /// What will actually be sent downstream (auto-filled, stamped,
    /// record numbers generated).
    pub processed_data: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub before_after_comparison: Vec<FieldChange>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationOptions {
    pub can_proceed: bool,
    pub requires_review: bool,
    pub auto_confirm_available: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternative_actions: Vec<String>,
}

/// The single source of truth shown for human approval. Built once,
/// then either discarded or consumed exactly once by the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationArtifact {
    /// Correlates the two phases in logs; unique per issued artifact.
    pub invocation_id: String,
    pub operation: Operation,
    pub entity_name: String,
    pub entity_display_name: String,
    pub group: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_type: Option<DeleteType>,
    pub description: String,
    pub operation_details: OperationDetails,
    pub data_preview: DataPreview,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impact: Option<ImpactReport>,
    pub what_will_happen: String,
    pub affected_records: u64,
    pub warnings: Vec<String>,
    pub recommendations: Vec<String>,
    pub safety_concerns: Vec<String>,
    pub confirmation_options: ConfirmationOptions,
    pub issued_at: DateTime<Utc>,
}

/// Sealed, serializable carrier of an artifact. The seal is a keyed
/// digest over the canonical artifact JSON; verification recomputes it,
/// so a token tampered with in transit never reaches the executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationToken {
    pub artifact: ConfirmationArtifact,
    pub seal: String,
}

impl ConfirmationToken {
    pub fn issue(artifact: ConfirmationArtifact, secret: &str) -> Self {
        let seal = seal_of(&artifact, secret);
        Self { artifact, seal }
    }

    pub fn verify(&self, secret: &str) -> bool {
        seal_of(&self.artifact, secret) == self.seal
    }
}

fn seal_of(artifact: &ConfirmationArtifact, secret: &str) -> String {
    let canonical = serde_json::to_string(artifact).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

pub struct ConfirmationBuilder;

impl ConfirmationBuilder {
    pub fn build(
        request: &MutationRequest,
        spec: &EntitySpec,
        analysis: &AnalysisResult,
        merged_payload: &Map<String, Value>,
        impact: Option<ImpactReport>,
    ) -> ConfirmationArtifact {
        let data_preview = match request.operation {
            Operation::Create => DataPreview {
                original_data: Value::Object(request.payload.clone()),
                processed_data: Value::Object(process_for_creation(spec, merged_payload)),
                before_after_comparison: Vec::new(),
            },
            Operation::Update => {
                let current = impact
                    .as_ref()
                    .map(|i| i.current_data.clone())
                    .unwrap_or(Value::Null);
                DataPreview {
                    original_data: current.clone(),
                    processed_data: Value::Object(merged_payload.clone()),
                    before_after_comparison: compare_fields(&current, merged_payload),
                }
            }
            Operation::Delete => DataPreview {
                original_data: impact
                    .as_ref()
                    .map(|i| i.current_data.clone())
                    .unwrap_or(Value::Null),
                processed_data: Value::Null,
                before_after_comparison: Vec::new(),
            },
        };

        let related_count = impact.as_ref().map(|i| i.related_record_count).unwrap_or(0);
        let affected_records = match request.operation {
            Operation::Delete => 1 + related_count,
            _ => 1,
        };

        let can_proceed = impact.as_ref().map(|i| i.can_proceed).unwrap_or(true);
        let requires_review = analysis.complexity != Complexity::Simple;
        let auto_confirm_available = analysis.complexity == Complexity::Simple && can_proceed;

        let mut safety_concerns = analysis.safety_concerns.clone();
        if let Some(ref report) = impact {
            safety_concerns.extend(report.safety_concerns.iter().cloned());
        }

        let alternative_actions = match request.operation {
            Operation::Delete => alternative_actions(request.delete_type),
            _ => Vec::new(),
        };

        ConfirmationArtifact {
            invocation_id: uuid::Uuid::new_v4().to_string(),
            operation: request.operation,
            entity_name: spec.name.clone(),
            entity_display_name: spec.display_name.clone(),
            group: spec.group.clone(),
            record_id: request.record_id.clone(),
            delete_type: match request.operation {
                Operation::Delete => Some(request.delete_type),
                _ => None,
            },
            description: if request.description.is_empty() {
                default_description(request.operation, &spec.display_name)
            } else {
                request.description.clone()
            },
            operation_details: OperationDetails {
                api_endpoint: analysis.api_endpoint.clone(),
                http_method: analysis.http_method.clone(),
                complexity: analysis.complexity,
                estimated_time: analysis.estimated_time.clone(),
                delete_strategy: match request.operation {
                    Operation::Delete => Some(request.delete_type),
                    _ => None,
                },
            },
            data_preview,
            what_will_happen: what_will_happen(request, spec, related_count),
            affected_records,
            warnings: warnings(request, analysis, related_count),
            recommendations: analysis.recommendations.clone(),
            safety_concerns,
            confirmation_options: ConfirmationOptions {
                can_proceed,
                requires_review,
                auto_confirm_available,
                alternative_actions,
            },
            impact,
            issued_at: Utc::now(),
        }
    }
}

/// Stamp audit fields and fill the system-generated identifiers the
/// downstream API expects on creation.
fn process_for_creation(spec: &EntitySpec, payload: &Map<String, Value>) -> Map<String, Value> {
    let mut processed = payload.clone();
    let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    processed.insert("created_at".to_string(), Value::String(now.clone()));
    processed.insert("updated_at".to_string(), Value::String(now));

    match spec.name.as_str() {
        "students" => {
            if !has_value(&processed, "student_no") {
                processed.insert(
                    "student_no".to_string(),
                    Value::String(generate_record_no("S", 4)),
                );
            }
        }
        "teachers" => {
            if !has_value(&processed, "teacher_no") {
                processed.insert(
                    "teacher_no".to_string(),
                    Value::String(generate_record_no("T", 3)),
                );
            }
        }
        "activities" => {
            if !has_value(&processed, "status") {
                processed.insert("status".to_string(), Value::String("draft".to_string()));
            }
        }
        _ => {}
    }
    processed
}

fn has_value(payload: &Map<String, Value>, field: &str) -> bool {
    matches!(payload.get(field), Some(v) if !v.is_null())
}

/// Sequence-style record number: prefix, current year, random suffix.
fn generate_record_no(prefix: &str, digits: u32) -> String {
    let year = Utc::now().year();
    let bound = 10u32.pow(digits);
    let suffix = rand::thread_rng().gen_range(0..bound);
    format!("{}{}{:0width$}", prefix, year, suffix, width = digits as usize)
}

/// Field-by-field comparison of an update payload against the current
/// record. Added when the old value is absent, Removed when the new
/// value is absent, Modified otherwise.
fn compare_fields(current: &Value, updates: &Map<String, Value>) -> Vec<FieldChange> {
    updates
        .iter()
        .map(|(field, new_value)| {
            let old_value = current.get(field).cloned().unwrap_or(Value::Null);
            let change_type = if old_value.is_null() {
                ChangeType::Added
            } else if new_value.is_null() {
                ChangeType::Removed
            } else {
                ChangeType::Modified
            };
            FieldChange {
                field: field.clone(),
                old_value,
                new_value: new_value.clone(),
                change_type,
            }
        })
        .collect()
}

fn default_description(operation: Operation, display_name: &str) -> String {
    match operation {
        Operation::Create => format!("create a new {} record", display_name),
        Operation::Update => format!("update a {} record", display_name),
        Operation::Delete => format!("delete a {} record", display_name),
    }
}

fn what_will_happen(request: &MutationRequest, spec: &EntitySpec, related_count: u64) -> String {
    match request.operation {
        Operation::Create => format!("a new {} record will be created", spec.display_name),
        Operation::Update => format!(
            "{} field(s) of the {} record will be modified",
            request.payload.len(),
            spec.display_name
        ),
        Operation::Delete => {
            let action = match request.delete_type {
                DeleteType::Soft => "soft-deleted (recoverable)",
                DeleteType::Hard => "permanently deleted (not recoverable)",
            };
            if related_count > 0 {
                format!(
                    "the {} record will be {}, affecting {} related records",
                    spec.display_name, action, related_count
                )
            } else {
                format!("the {} record will be {}", spec.display_name, action)
            }
        }
    }
}

fn warnings(request: &MutationRequest, analysis: &AnalysisResult, related_count: u64) -> Vec<String> {
    let mut warnings = Vec::new();
    if analysis.complexity == Complexity::Complex {
        warnings.push("this is a complex operation; review the data carefully".to_string());
    }
    if !analysis.potential_conflicts.is_empty() {
        warnings.push("potential conflicts detected; verify the data is correct".to_string());
    }
    if request.operation == Operation::Delete && request.delete_type == DeleteType::Hard {
        warnings.push("hard delete cannot be undone".to_string());
    }
    if related_count > 0 {
        warnings.push(format!("{} related records may be affected", related_count));
    }
    if !analysis.safety_concerns.is_empty() && request.operation == Operation::Delete {
        warnings.push("safety risks detected; confirm with care".to_string());
    }
    warnings
}

fn alternative_actions(delete_type: DeleteType) -> Vec<String> {
    let mut alternatives = Vec::new();
    if delete_type == DeleteType::Hard {
        alternatives.push("use soft delete instead".to_string());
    }
    alternatives.push("set the record status to inactive".to_string());
    alternatives.push("archive the record".to_string());
    alternatives
}

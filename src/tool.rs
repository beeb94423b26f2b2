//! Chat-Tool Surface
//!
//! The two tools the conversational agent calls: `mutate_data_record`
//! (phase one — analyze, preview, pause for confirmation) and
//! `confirm_data_mutation` (phase two — execute an accepted token).
//! Tools never fail as calls; every outcome, including workflow errors,
//! is folded into the response envelope.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::info;

use crate::confirmation::ConfirmationToken;
use crate::error::WorkflowError;
use crate::workflow::{
    ActorContext, DeleteType, MutationRequest, Operation, WorkflowOrchestrator, WorkflowOutcome,
};

/// Envelope every tool call resolves to.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolResponse {
    pub name: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub metadata: Value,
}

impl ToolResponse {
    fn success(name: &str, result: Value, metadata: Value) -> Self {
        Self {
            name: name.to_string(),
            status: "success".to_string(),
            result: Some(result),
            error: None,
            metadata,
        }
    }

    fn pending(name: &str, result: Value, metadata: Value) -> Self {
        Self {
            name: name.to_string(),
            status: "pending_confirmation".to_string(),
            result: Some(result),
            error: None,
            metadata,
        }
    }

    fn error(name: &str, error: impl Into<String>, metadata: Value) -> Self {
        Self {
            name: name.to_string(),
            status: "error".to_string(),
            result: None,
            error: Some(error.into()),
            metadata,
        }
    }
}

/// A tool the conversational agent can invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> String;

    fn description(&self) -> String;

    /// JSON schema of the tool's parameters.
    fn parameters(&self) -> Value;

    /// Whether this tool pauses for explicit human confirmation.
    fn requires_confirmation(&self) -> bool {
        false
    }

    async fn execute(&self, args: Value) -> ToolResponse;
}

// ─── Phase one: mutate_data_record ───────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct MutateArgs {
    table_name: String,
    operation: String,
    #[serde(default)]
    record_id: Option<String>,
    #[serde(default)]
    data: Option<Map<String, Value>>,
    #[serde(default)]
    updates: Option<Map<String, Value>>,
    #[serde(default)]
    delete_type: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    auto_confirm: Option<bool>,
    #[serde(default)]
    force_delete: Option<bool>,
    #[serde(default)]
    actor_context: Option<ActorContext>,
}

impl MutateArgs {
    fn into_request(self) -> Result<MutationRequest, String> {
        let operation = match self.operation.as_str() {
            "create" => Operation::Create,
            "update" => Operation::Update,
            "delete" => Operation::Delete,
            other => return Err(format!("unknown operation: {}", other)),
        };
        let delete_type = match self.delete_type.as_deref() {
            None | Some("soft") => DeleteType::Soft,
            Some("hard") => DeleteType::Hard,
            Some(other) => return Err(format!("unknown delete_type: {}", other)),
        };
        let payload = match operation {
            Operation::Create => self
                .data
                .ok_or_else(|| "`data` is required for create".to_string())?,
            Operation::Update => self
                .updates
                .or(self.data)
                .ok_or_else(|| "`updates` is required for update".to_string())?,
            Operation::Delete => Map::new(),
        };

        Ok(MutationRequest {
            operation,
            entity_name: self.table_name,
            record_id: self.record_id,
            payload,
            delete_type,
            description: self.description.unwrap_or_default(),
            auto_confirm: self.auto_confirm.unwrap_or(false),
            force_delete: self.force_delete.unwrap_or(false),
            actor: self.actor_context,
        })
    }
}

pub struct MutateRecordTool {
    orchestrator: Arc<WorkflowOrchestrator>,
}

impl MutateRecordTool {
    pub const NAME: &'static str = "mutate_data_record";

    pub fn new(orchestrator: Arc<WorkflowOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl Tool for MutateRecordTool {
    fn name(&self) -> String {
        Self::NAME.to_string()
    }

    fn description(&self) -> String {
        "Create, update or delete a record in the kindergarten back office. \
         Analyzes the request, previews its effect and pauses for user \
         confirmation before anything is written."
            .to_string()
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "table_name": {
                    "type": "string",
                    "description": "Target data table",
                    "enum": ["students", "teachers", "activities", "classes",
                             "parents", "users", "enrollments", "todos"]
                },
                "operation": {
                    "type": "string",
                    "enum": ["create", "update", "delete"]
                },
                "record_id": {
                    "type": "string",
                    "description": "Record to update or delete"
                },
                "data": {
                    "type": "object",
                    "description": "Payload for create"
                },
                "updates": {
                    "type": "object",
                    "description": "Changed fields for update"
                },
                "delete_type": {
                    "type": "string",
                    "enum": ["soft", "hard"],
                    "default": "soft"
                },
                "description": {
                    "type": "string",
                    "description": "What this operation is for, shown at confirmation"
                },
                "auto_confirm": {
                    "type": "boolean",
                    "default": false,
                    "description": "Skip confirmation for simple operations only"
                },
                "force_delete": {
                    "type": "boolean",
                    "default": false,
                    "description": "Override the related-record veto on hard deletes"
                }
            },
            "required": ["table_name", "operation"]
        })
    }

    fn requires_confirmation(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value) -> ToolResponse {
        let parsed: MutateArgs = match serde_json::from_value(args) {
            Ok(parsed) => parsed,
            Err(err) => {
                return ToolResponse::error(
                    Self::NAME,
                    format!("invalid arguments: {}", err),
                    json!({ "error_kind": "invalid_request" }),
                )
            }
        };
        let request = match parsed.into_request() {
            Ok(request) => request,
            Err(message) => {
                return ToolResponse::error(
                    Self::NAME,
                    message,
                    json!({ "error_kind": "invalid_request" }),
                )
            }
        };

        let entity = request.entity_name.clone();
        let operation = request.operation;
        info!(%entity, %operation, "mutation tool invoked");

        match self.orchestrator.submit(request).await {
            Ok(WorkflowOutcome::MissingFields(report)) => {
                let field_labels: Vec<&str> =
                    report.missing_fields.iter().map(|f| f.label.as_str()).collect();
                let has_recommendations = report
                    .missing_fields
                    .iter()
                    .any(|f| !f.recommendations.is_empty());
                let metadata = json!({
                    "table_name": report.entity_name.clone(),
                    "operation": operation.to_string(),
                    "missing_field_count": report.missing_fields.len(),
                    "has_recommendations": has_recommendations,
                });
                let error = format!("missing required fields: {}", field_labels.join(", "));
                ToolResponse {
                    name: Self::NAME.to_string(),
                    status: "error".to_string(),
                    result: Some(json!({
                        "type": "missing_fields",
                        "table_name": report.entity_name,
                        "missing_fields": report.missing_fields,
                        "current_data": report.current_data,
                    })),
                    error: Some(error),
                    metadata,
                }
            }
            Ok(WorkflowOutcome::AwaitingConfirmation(token)) => {
                let metadata = json!({
                    "table_name": token.artifact.entity_name.clone(),
                    "operation": operation.to_string(),
                    "complexity": token.artifact.operation_details.complexity,
                    "api_endpoint": token.artifact.operation_details.api_endpoint.clone(),
                    "requires_confirmation": true,
                });
                ToolResponse::pending(
                    Self::NAME,
                    json!({
                        "type": "data_mutation_confirmation",
                        "confirmation_data": token.artifact.clone(),
                        "confirmation_token": token,
                        "message": "the request has been analyzed; confirm to execute",
                    }),
                    metadata,
                )
            }
            Ok(WorkflowOutcome::Executed(result)) => {
                let metadata = json!({
                    "table_name": entity,
                    "operation": operation.to_string(),
                    "auto_confirmed": true,
                    "api_call_success": true,
                });
                ToolResponse::success(
                    Self::NAME,
                    serde_json::to_value(result).unwrap_or(Value::Null),
                    metadata,
                )
            }
            Err(err) => workflow_error_response(Self::NAME, &entity, operation, err),
        }
    }
}

// ─── Phase two: confirm_data_mutation ────────────────────────────────────────

pub struct ConfirmMutationTool {
    orchestrator: Arc<WorkflowOrchestrator>,
}

impl ConfirmMutationTool {
    pub const NAME: &'static str = "confirm_data_mutation";

    pub fn new(orchestrator: Arc<WorkflowOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl Tool for ConfirmMutationTool {
    fn name(&self) -> String {
        Self::NAME.to_string()
    }

    fn description(&self) -> String {
        "Execute a previously analyzed mutation after the user accepted its \
         confirmation. Takes the confirmation token returned by \
         mutate_data_record."
            .to_string()
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "token": {
                    "type": "object",
                    "description": "The confirmation_token from a pending_confirmation response"
                }
            },
            "required": ["token"]
        })
    }

    async fn execute(&self, args: Value) -> ToolResponse {
        let token: ConfirmationToken = match serde_json::from_value(args["token"].clone()) {
            Ok(token) => token,
            Err(err) => {
                return ToolResponse::error(
                    Self::NAME,
                    format!("invalid confirmation token: {}", err),
                    json!({ "error_kind": "invalid_token" }),
                )
            }
        };

        let entity = token.artifact.entity_name.clone();
        let operation = token.artifact.operation;

        match self.orchestrator.execute_confirmed(token).await {
            Ok(result) => {
                let metadata = json!({
                    "table_name": result.operation_summary.entity_name.clone(),
                    "operation": operation.to_string(),
                    "record_id": result.operation_summary.record_id.clone(),
                    "api_call_success": true,
                });
                ToolResponse::success(
                    Self::NAME,
                    serde_json::to_value(result).unwrap_or(Value::Null),
                    metadata,
                )
            }
            Err(err) => workflow_error_response(Self::NAME, &entity, operation, err),
        }
    }
}

fn workflow_error_response(
    tool: &str,
    entity: &str,
    operation: Operation,
    err: WorkflowError,
) -> ToolResponse {
    let mut metadata = json!({
        "table_name": entity,
        "operation": operation.to_string(),
        "error_kind": err.kind(),
    });
    if let WorkflowError::Blocked { ref alternatives, .. } = err {
        metadata["alternative_actions"] = json!(alternatives);
    }
    ToolResponse::error(tool, err.to_string(), metadata)
}

//! Executor
//!
//! Performs the actual mutation against the downstream record API once a
//! confirmation has been accepted, and normalizes whatever comes back
//! into a single response envelope. This is the only place in the
//! workflow where downstream state changes; every check has already
//! passed by the time it runs.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use crate::confirmation::ConfirmationArtifact;
use crate::error::WorkflowError;
use crate::workflow::Operation;

/// Raw downstream reply, before any interpretation.
#[derive(Debug, Clone)]
pub struct ApiReply {
    pub status: u16,
    pub body: String,
}

/// Write capability over the downstream record API.
#[async_trait]
pub trait RecordApi: Send + Sync {
    async fn send(&self, method: &str, path: &str, body: Option<&Value>) -> Result<ApiReply>;
}

/// REST client with bearer credential and an explicit timeout. A timeout
/// here is fatal to the invocation, unlike the advisory oracle's.
pub struct HttpRecordApi {
    client: Client,
    base_url: String,
    token: String,
}

impl HttpRecordApi {
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
}

#[async_trait]
impl RecordApi for HttpRecordApi {
    async fn send(&self, method: &str, path: &str, body: Option<&Value>) -> Result<ApiReply> {
        let method = match method {
            "POST" => Method::POST,
            "PUT" => Method::PUT,
            "DELETE" => Method::DELETE,
            other => bail!("unsupported mutation method: {}", other),
        };
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);

        let mut request = self
            .client
            .request(method, &url)
            .bearer_auth(&self.token)
            .header("User-Agent", "kinder-agency-crud/0.2");
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("mutation call to {} failed", url))?;
        let status = response.status().as_u16();
        let body = response.text().await.context("failed to read reply body")?;
        Ok(ApiReply { status, body })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationSummary {
    pub entity_name: String,
    pub group: String,
    pub api_endpoint: String,
    pub operation: Operation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    pub affected_records: u64,
    pub execution_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponseMeta {
    pub status: u16,
    pub success: bool,
    pub message: String,
}

/// Terminal result of an executed mutation; never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<Value>,
    pub operation_summary: OperationSummary,
    pub api_response: ApiResponseMeta,
    pub message: String,
}

pub struct Executor {
    api: Arc<dyn RecordApi>,
}

impl Executor {
    pub fn new(api: Arc<dyn RecordApi>) -> Self {
        Self { api }
    }

    #[tracing::instrument(skip(self, artifact), fields(entity = %artifact.entity_name, operation = %artifact.operation))]
    pub async fn execute(
        &self,
        artifact: &ConfirmationArtifact,
    ) -> Result<ExecutionResult, WorkflowError> {
        let details = &artifact.operation_details;
        let body = match artifact.operation {
            Operation::Create | Operation::Update => {
                Some(artifact.data_preview.processed_data.clone())
            }
            Operation::Delete => artifact
                .delete_type
                .map(|delete_type| json!({ "delete_type": delete_type })),
        };

        let reply = self
            .api
            .send(&details.http_method, &details.api_endpoint, body.as_ref())
            .await
            .map_err(|err| WorkflowError::ExecutionError {
                entity: artifact.entity_name.clone(),
                operation: artifact.operation,
                status: None,
                body: format!("{err:#}"),
            })?;

        normalize_reply(artifact, reply)
    }
}

/// Turn the raw downstream reply into the terminal envelope. Non-2xx or
/// non-JSON is a hard execution failure carrying the downstream body.
fn normalize_reply(
    artifact: &ConfirmationArtifact,
    reply: ApiReply,
) -> Result<ExecutionResult, WorkflowError> {
    if !(200..300).contains(&reply.status) {
        return Err(WorkflowError::ExecutionError {
            entity: artifact.entity_name.clone(),
            operation: artifact.operation,
            status: Some(reply.status),
            body: snippet(&reply.body),
        });
    }

    let parsed: Value = serde_json::from_str(&reply.body).map_err(|_| {
        WorkflowError::ExecutionError {
            entity: artifact.entity_name.clone(),
            operation: artifact.operation,
            status: Some(reply.status),
            body: format!("non-JSON reply: {}", snippet(&reply.body)),
        }
    })?;

    let record = match parsed.get("data") {
        Some(Value::Null) | None => match artifact.operation {
            Operation::Delete => None,
            _ => Some(parsed.clone()),
        },
        Some(data) => Some(data.clone()),
    };

    let downstream_success = parsed.get("success").and_then(Value::as_bool) != Some(false);
    let message = parsed
        .get("message")
        .and_then(Value::as_str)
        .map(|m| m.to_string())
        .unwrap_or_else(|| {
            format!(
                "{} {} record completed",
                artifact.operation, artifact.entity_display_name
            )
        });

    info!(
        status = reply.status,
        downstream_success, "mutation executed"
    );

    Ok(ExecutionResult {
        record,
        operation_summary: OperationSummary {
            entity_name: artifact.entity_name.clone(),
            group: artifact.group.clone(),
            api_endpoint: artifact.operation_details.api_endpoint.clone(),
            operation: artifact.operation,
            record_id: artifact.record_id.clone(),
            affected_records: artifact.affected_records,
            execution_time: Utc::now(),
        },
        api_response: ApiResponseMeta {
            status: reply.status,
            success: downstream_success,
            message: message.clone(),
        },
        message,
    })
}

fn snippet(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.len() <= 300 {
        trimmed.to_string()
    } else {
        let mut end = 300;
        while !trimmed.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &trimmed[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::DeterministicAnalyzer;
    use crate::confirmation::ConfirmationBuilder;
    use crate::registry::EntityRegistry;
    use crate::workflow::{DeleteType, MutationRequest};
    use serde_json::json;

    fn create_artifact() -> ConfirmationArtifact {
        let registry = EntityRegistry::new();
        let spec = registry.resolve("todos").unwrap();
        let request = MutationRequest {
            operation: Operation::Create,
            entity_name: "todos".to_string(),
            record_id: None,
            payload: json!({ "title": "家长会准备" }).as_object().cloned().unwrap(),
            delete_type: DeleteType::Soft,
            description: String::new(),
            auto_confirm: false,
            force_delete: false,
            actor: None,
        };
        let analysis = DeterministicAnalyzer::result_for(&request, spec);
        ConfirmationBuilder::build(&request, spec, &analysis, &request.payload, None)
    }

    #[test]
    fn a_2xx_json_reply_becomes_a_success_envelope() {
        let artifact = create_artifact();
        let reply = ApiReply {
            status: 201,
            body: json!({ "success": true, "data": { "id": 12, "title": "家长会准备" }, "message": "created" })
                .to_string(),
        };

        let result = normalize_reply(&artifact, reply).unwrap();
        assert_eq!(result.api_response.status, 201);
        assert!(result.api_response.success);
        assert_eq!(result.record.unwrap()["id"], 12);
        assert_eq!(result.api_response.message, "created");
    }

    #[test]
    fn a_non_2xx_reply_is_a_hard_failure_with_the_body() {
        let artifact = create_artifact();
        let reply = ApiReply {
            status: 422,
            body: "{\"success\":false,\"message\":\"title taken\"}".to_string(),
        };

        let err = normalize_reply(&artifact, reply).unwrap_err();
        match err {
            WorkflowError::ExecutionError { status, body, .. } => {
                assert_eq!(status, Some(422));
                assert!(body.contains("title taken"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn a_non_json_reply_is_a_hard_failure() {
        let artifact = create_artifact();
        let reply = ApiReply {
            status: 200,
            body: "<html>gateway error</html>".to_string(),
        };

        let err = normalize_reply(&artifact, reply).unwrap_err();
        assert!(matches!(err, WorkflowError::ExecutionError { .. }));
        assert!(err.to_string().contains("non-JSON"));
    }
}

//! End-to-end scenarios for the two-phase mutation workflow, driven
//! entirely through mock collaborators at the trait seams.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use kinder_agency::analysis::{Analyzer, Complexity, DeterministicAnalyzer, OracleAnalyzer};
use kinder_agency::confirmation::{ChangeType, ConfirmationToken};
use kinder_agency::error::WorkflowError;
use kinder_agency::executor::{ApiReply, RecordApi};
use kinder_agency::impact::RiskLevel;
use kinder_agency::provider::LlmProvider;
use kinder_agency::registry::{EntitySpec, RelatedTable};
use kinder_agency::store::RecordStore;
use kinder_agency::workflow::{
    ActorContext, DeleteType, MutationRequest, Operation, WorkflowOrchestrator, WorkflowOutcome,
};

// ─── Mock collaborators ──────────────────────────────────────────────────────

/// Provider that keys canned replies off the prompt content.
struct SmartMockProvider {
    reply: Option<String>,
}

#[async_trait]
impl LlmProvider for SmartMockProvider {
    async fn generate(
        &self,
        _model: &str,
        _prompt: String,
        _system: Option<String>,
    ) -> Result<String> {
        match &self.reply {
            Some(reply) => Ok(reply.clone()),
            None => Err(anyhow!("oracle offline")),
        }
    }
}

#[derive(Default)]
struct MapStore {
    records: HashMap<(String, String), Value>,
    related_counts: HashMap<String, u64>,
    recent: Vec<Value>,
}

#[async_trait]
impl RecordStore for MapStore {
    async fn get(&self, spec: &EntitySpec, record_id: &str) -> Result<Option<Value>> {
        Ok(self
            .records
            .get(&(spec.name.clone(), record_id.to_string()))
            .cloned())
    }

    async fn count_related(
        &self,
        _spec: &EntitySpec,
        related: &RelatedTable,
        _record_id: &str,
    ) -> Result<u64> {
        Ok(*self.related_counts.get(&related.table).unwrap_or(&0))
    }

    async fn list_recent(
        &self,
        _spec: &EntitySpec,
        _lookback_days: u32,
        _limit: usize,
    ) -> Result<Vec<Value>> {
        Ok(self.recent.clone())
    }
}

/// Records every downstream call and replies with a canned envelope.
struct RecordingApi {
    calls: Mutex<Vec<(String, String, Option<Value>)>>,
    reply: ApiReply,
}

impl RecordingApi {
    fn replying(status: u16, body: Value) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            reply: ApiReply {
                status,
                body: body.to_string(),
            },
        }
    }

    fn calls(&self) -> Vec<(String, String, Option<Value>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RecordApi for RecordingApi {
    async fn send(&self, method: &str, path: &str, body: Option<&Value>) -> Result<ApiReply> {
        self.calls
            .lock()
            .unwrap()
            .push((method.to_string(), path.to_string(), body.cloned()));
        Ok(ApiReply {
            status: self.reply.status,
            body: self.reply.body.clone(),
        })
    }
}

fn orchestrator_with(
    analyzer: Arc<dyn Analyzer>,
    store: MapStore,
    api: Arc<RecordingApi>,
) -> WorkflowOrchestrator {
    WorkflowOrchestrator::new(analyzer, Arc::new(store), api, "test-secret")
}

fn oracle(reply: Option<&str>) -> Arc<dyn Analyzer> {
    Arc::new(OracleAnalyzer::new(
        Arc::new(SmartMockProvider {
            reply: reply.map(|r| r.to_string()),
        }),
        "mock-model",
        Duration::from_secs(2),
    ))
}

// ─── Scenario A: create with missing required fields ─────────────────────────

#[tokio::test]
async fn create_with_missing_fields_halts_and_lists_them() {
    let api = Arc::new(RecordingApi::replying(200, json!({ "success": true })));
    let orchestrator = orchestrator_with(oracle(None), MapStore::default(), api.clone());

    let request = MutationRequest {
        operation: Operation::Create,
        entity_name: "students".to_string(),
        record_id: None,
        payload: json!({ "name": "李雷" }).as_object().cloned().unwrap(),
        delete_type: DeleteType::Soft,
        description: String::new(),
        auto_confirm: true,
        force_delete: false,
        actor: None,
    };

    match orchestrator.submit(request).await.unwrap() {
        WorkflowOutcome::MissingFields(report) => {
            let names: Vec<&str> = report.missing_fields.iter().map(|f| f.name.as_str()).collect();
            assert_eq!(names, vec!["kindergarten_id"]);
            // No history in the store: zero recommendations.
            assert!(report.missing_fields[0].recommendations.is_empty());
            assert_eq!(report.current_data["name"], json!("李雷"));
        }
        other => panic!("expected MissingFields, got {other:?}"),
    }

    // Nothing may have been written downstream.
    assert!(api.calls().is_empty());
}

#[tokio::test]
async fn actor_auto_fill_satisfies_required_fields() {
    let api = Arc::new(RecordingApi::replying(200, json!({ "success": true })));
    let orchestrator = orchestrator_with(oracle(None), MapStore::default(), api);

    let request = MutationRequest {
        operation: Operation::Create,
        entity_name: "students".to_string(),
        record_id: None,
        payload: json!({ "name": "李雷" }).as_object().cloned().unwrap(),
        delete_type: DeleteType::Soft,
        description: String::new(),
        auto_confirm: false,
        force_delete: false,
        actor: Some(ActorContext {
            actor_id: "42".to_string(),
            role: "admin".to_string(),
            kindergarten_id: Some(1),
        }),
    };

    match orchestrator.submit(request).await.unwrap() {
        WorkflowOutcome::AwaitingConfirmation(token) => {
            let processed = &token.artifact.data_preview.processed_data;
            assert_eq!(processed["kindergarten_id"], json!(1));
            assert_eq!(processed["created_by"], json!("42"));
            assert!(processed["student_no"].as_str().unwrap().starts_with('S'));
        }
        other => panic!("expected AwaitingConfirmation, got {other:?}"),
    }
}

// ─── Scenario B: update with before/after diff ───────────────────────────────

#[tokio::test]
async fn update_builds_the_field_diff_and_honors_simple_complexity() {
    let mut store = MapStore::default();
    store.records.insert(
        ("teachers".to_string(), "7".to_string()),
        json!({ "id": "7", "name": "李老师", "subject": "语言" }),
    );
    let api = Arc::new(RecordingApi::replying(
        200,
        json!({ "success": true, "data": { "id": "7", "subject": "数学" } }),
    ));
    // The oracle classifies this one-field update as simple.
    let orchestrator = orchestrator_with(
        oracle(Some(r#"{"success": true, "complexity": "simple"}"#)),
        store,
        api.clone(),
    );

    let request = MutationRequest {
        operation: Operation::Update,
        entity_name: "teachers".to_string(),
        record_id: Some("7".to_string()),
        payload: json!({ "subject": "数学" }).as_object().cloned().unwrap(),
        delete_type: DeleteType::Soft,
        description: String::new(),
        auto_confirm: false,
        force_delete: false,
        actor: None,
    };

    let token = match orchestrator.submit(request).await.unwrap() {
        WorkflowOutcome::AwaitingConfirmation(token) => token,
        other => panic!("expected AwaitingConfirmation, got {other:?}"),
    };

    let comparison = &token.artifact.data_preview.before_after_comparison;
    assert_eq!(comparison.len(), 1);
    assert_eq!(comparison[0].field, "subject");
    assert_eq!(comparison[0].old_value, json!("语言"));
    assert_eq!(comparison[0].new_value, json!("数学"));
    assert_eq!(comparison[0].change_type, ChangeType::Modified);
    assert!(!token.artifact.confirmation_options.requires_review);

    // Phase two: the accepted token drives the downstream call.
    let result = orchestrator.execute_confirmed(token).await.unwrap();
    assert!(result.api_response.success);

    let calls = api.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "PUT");
    assert_eq!(calls[0].1, "/api/teachers/7");
}

// ─── Scenario C: blocked hard delete ─────────────────────────────────────────

fn activity_delete_store() -> MapStore {
    let mut store = MapStore::default();
    store.records.insert(
        ("activities".to_string(), "3".to_string()),
        json!({ "id": "3", "title": "春季运动会", "status": "planned" }),
    );
    store
        .related_counts
        .insert("activity_registrations".to_string(), 25);
    store
}

fn delete_request(force: bool) -> MutationRequest {
    MutationRequest {
        operation: Operation::Delete,
        entity_name: "activities".to_string(),
        record_id: Some("3".to_string()),
        payload: serde_json::Map::new(),
        delete_type: DeleteType::Hard,
        description: String::new(),
        auto_confirm: false,
        force_delete: force,
        actor: None,
    }
}

#[tokio::test]
async fn hard_delete_with_related_records_is_blocked() {
    let api = Arc::new(RecordingApi::replying(200, json!({ "success": true })));
    let orchestrator = orchestrator_with(oracle(None), activity_delete_store(), api.clone());

    let err = orchestrator.submit(delete_request(false)).await.unwrap_err();
    match err {
        WorkflowError::Blocked {
            reason,
            alternatives,
            ..
        } => {
            assert!(reason.contains("25"));
            assert!(alternatives.iter().any(|a| a.contains("soft delete")));
        }
        other => panic!("expected Blocked, got {other:?}"),
    }
    assert!(api.calls().is_empty());
}

// ─── Scenario D: forced hard delete ──────────────────────────────────────────

#[tokio::test]
async fn forced_hard_delete_awaits_confirmation_with_visible_concerns() {
    let api = Arc::new(RecordingApi::replying(
        200,
        json!({ "success": true, "message": "deleted" }),
    ));
    let orchestrator = orchestrator_with(oracle(None), activity_delete_store(), api.clone());

    let token = match orchestrator.submit(delete_request(true)).await.unwrap() {
        WorkflowOutcome::AwaitingConfirmation(token) => token,
        other => panic!("expected AwaitingConfirmation, got {other:?}"),
    };

    let artifact = &token.artifact;
    let impact = artifact.impact.as_ref().unwrap();
    assert_eq!(impact.risk_level, RiskLevel::High);
    assert_eq!(impact.related_record_count, 25);
    assert!(artifact
        .safety_concerns
        .iter()
        .any(|c| c.contains("force delete")));
    assert!(artifact
        .warnings
        .iter()
        .any(|w| w.contains("cannot be undone")));
    assert_eq!(artifact.affected_records, 26);

    // Confirm and execute; the delete body names the delete type.
    let result = orchestrator.execute_confirmed(token).await.unwrap();
    assert_eq!(result.operation_summary.affected_records, 26);
    let calls = api.calls();
    assert_eq!(calls[0].0, "DELETE");
    assert_eq!(calls[0].1, "/api/activities/3");
    assert_eq!(calls[0].2.as_ref().unwrap()["delete_type"], json!("hard"));
}

// ─── Workflow edges ──────────────────────────────────────────────────────────

#[tokio::test]
async fn unsupported_entity_fails_listing_every_supported_one() {
    let api = Arc::new(RecordingApi::replying(200, json!({ "success": true })));
    let orchestrator = orchestrator_with(oracle(None), MapStore::default(), api);

    let mut request = delete_request(false);
    request.entity_name = "spaceships".to_string();

    let err = orchestrator.submit(request).await.unwrap_err();
    let message = err.to_string();
    for entity in [
        "students",
        "teachers",
        "activities",
        "classes",
        "parents",
        "users",
        "enrollments",
        "todos",
    ] {
        assert!(message.contains(entity), "message misses {entity}: {message}");
    }
}

#[tokio::test]
async fn missing_record_is_terminal_for_update() {
    let api = Arc::new(RecordingApi::replying(200, json!({ "success": true })));
    let orchestrator = orchestrator_with(oracle(None), MapStore::default(), api);

    let request = MutationRequest {
        operation: Operation::Update,
        entity_name: "teachers".to_string(),
        record_id: Some("404".to_string()),
        payload: json!({ "subject": "数学" }).as_object().cloned().unwrap(),
        delete_type: DeleteType::Soft,
        description: String::new(),
        auto_confirm: false,
        force_delete: false,
        actor: None,
    };

    let err = orchestrator.submit(request).await.unwrap_err();
    assert!(matches!(err, WorkflowError::RecordNotFound { .. }));
}

#[tokio::test]
async fn simple_create_with_auto_confirm_executes_in_one_pass() {
    let api = Arc::new(RecordingApi::replying(
        201,
        json!({ "success": true, "data": { "id": 12, "title": "春游" } }),
    ));
    let orchestrator = orchestrator_with(
        oracle(Some(r#"{"success": true, "complexity": "simple"}"#)),
        MapStore::default(),
        api.clone(),
    );

    let request = MutationRequest {
        operation: Operation::Create,
        entity_name: "activities".to_string(),
        record_id: None,
        payload: json!({ "title": "春游", "start_time": "2026-04-10T09:00:00Z" })
            .as_object()
            .cloned()
            .unwrap(),
        delete_type: DeleteType::Soft,
        description: String::new(),
        auto_confirm: true,
        force_delete: false,
        actor: None,
    };

    match orchestrator.submit(request).await.unwrap() {
        WorkflowOutcome::Executed(result) => {
            assert_eq!(result.api_response.status, 201);
            assert_eq!(result.record.unwrap()["id"], 12);
        }
        other => panic!("expected Executed, got {other:?}"),
    }

    let calls = api.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "POST");
    assert_eq!(calls[0].1, "/api/activities");
    // The preview's defaults travel with the call.
    assert_eq!(calls[0].2.as_ref().unwrap()["status"], json!("draft"));
}

#[tokio::test]
async fn oracle_failure_degrades_to_the_deterministic_analysis() {
    let mut store = MapStore::default();
    store.records.insert(
        ("teachers".to_string(), "7".to_string()),
        json!({ "id": "7", "subject": "语言" }),
    );
    let api = Arc::new(RecordingApi::replying(200, json!({ "success": true })));
    // Oracle offline: everything still works, classified Medium.
    let orchestrator = orchestrator_with(oracle(None), store, api);

    let request = MutationRequest {
        operation: Operation::Update,
        entity_name: "teachers".to_string(),
        record_id: Some("7".to_string()),
        payload: json!({ "subject": "数学" }).as_object().cloned().unwrap(),
        delete_type: DeleteType::Soft,
        description: String::new(),
        auto_confirm: true,
        force_delete: false,
        actor: None,
    };

    match orchestrator.submit(request).await.unwrap() {
        // Medium complexity: auto_confirm must not bypass review.
        WorkflowOutcome::AwaitingConfirmation(token) => {
            assert_eq!(
                token.artifact.operation_details.complexity,
                Complexity::Medium
            );
            assert!(token.artifact.confirmation_options.requires_review);
        }
        other => panic!("expected AwaitingConfirmation, got {other:?}"),
    }
}

#[tokio::test]
async fn analyzer_with_oracle_disabled_is_deterministic_end_to_end() {
    let store_a = activity_delete_store();
    let store_b = activity_delete_store();
    let api = Arc::new(RecordingApi::replying(200, json!({ "success": true })));

    let first = orchestrator_with(Arc::new(DeterministicAnalyzer), store_a, api.clone());
    let second = orchestrator_with(Arc::new(DeterministicAnalyzer), store_b, api);

    let token_a = match first.submit(delete_request(true)).await.unwrap() {
        WorkflowOutcome::AwaitingConfirmation(token) => token,
        other => panic!("unexpected outcome {other:?}"),
    };
    let token_b = match second.submit(delete_request(true)).await.unwrap() {
        WorkflowOutcome::AwaitingConfirmation(token) => token,
        other => panic!("unexpected outcome {other:?}"),
    };

    // Identical input, identical analysis-driven fields.
    assert_eq!(
        token_a.artifact.operation_details,
        token_b.artifact.operation_details
    );
    assert_eq!(token_a.artifact.warnings, token_b.artifact.warnings);
    assert_eq!(token_a.artifact.impact, token_b.artifact.impact);
}

#[tokio::test]
async fn tampered_tokens_never_reach_the_executor() {
    let api = Arc::new(RecordingApi::replying(200, json!({ "success": true })));
    let orchestrator = orchestrator_with(oracle(None), activity_delete_store(), api.clone());

    let token = match orchestrator.submit(delete_request(true)).await.unwrap() {
        WorkflowOutcome::AwaitingConfirmation(token) => token,
        other => panic!("unexpected outcome {other:?}"),
    };

    let mut tampered = token.clone();
    tampered.artifact.operation_details.api_endpoint = "/api/users/1".to_string();

    let err = orchestrator.execute_confirmed(tampered).await.unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidToken(_)));
    assert!(api.calls().is_empty());
}

#[tokio::test]
async fn tokens_survive_a_trip_through_disk_between_phases() {
    let mut store = MapStore::default();
    store.records.insert(
        ("todos".to_string(), "5".to_string()),
        json!({ "id": "5", "title": "家长会准备", "status": "open" }),
    );
    let api = Arc::new(RecordingApi::replying(
        200,
        json!({ "success": true, "message": "updated" }),
    ));
    let orchestrator = orchestrator_with(oracle(None), store, api);

    let request = MutationRequest {
        operation: Operation::Update,
        entity_name: "todos".to_string(),
        record_id: Some("5".to_string()),
        payload: json!({ "status": "done" }).as_object().cloned().unwrap(),
        delete_type: DeleteType::Soft,
        description: "close the todo".to_string(),
        auto_confirm: false,
        force_delete: false,
        actor: None,
    };

    let token = match orchestrator.submit(request).await.unwrap() {
        WorkflowOutcome::AwaitingConfirmation(token) => token,
        other => panic!("unexpected outcome {other:?}"),
    };

    // Confirmation happens elsewhere; the token travels as plain JSON.
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("token.json");
    std::fs::write(&path, serde_json::to_string(&token).unwrap()).unwrap();
    let restored: ConfirmationToken =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();

    let result = orchestrator.execute_confirmed(restored).await.unwrap();
    assert_eq!(result.api_response.message, "updated");
}

#[tokio::test]
async fn delete_without_record_id_is_rejected_as_invalid() {
    let api = Arc::new(RecordingApi::replying(200, json!({ "success": true })));
    let orchestrator = orchestrator_with(oracle(None), MapStore::default(), api);

    let mut request = delete_request(false);
    request.record_id = None;

    let err = orchestrator.submit(request).await.unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidRequest(_)));
}

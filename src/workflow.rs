//! Workflow Orchestrator
//!
//! Drives one mutation request through the confirmation state machine:
//!
//! Validating → {MissingFields | Analyzing} → Analyzing →
//! BuildingConfirmation → {Blocked | AwaitingConfirmation | AutoExecuting}
//! → Executing → {Succeeded | Failed}
//!
//! Each request makes exactly one traversal; no state is re-entered. The
//! pause between `AwaitingConfirmation` and `Executing` is carried by the
//! sealed confirmation token, not by any server-side session, so phase
//! two may arrive at a different process.
//!
//! Two concurrent invocations for the same (entity, record id) are not
//! fenced here; both can pass inspection. The embedding system must
//! serialize them if at-most-one-in-flight-per-record is required.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::analysis::Analyzer;
use crate::confirmation::{ConfirmationArtifact, ConfirmationBuilder, ConfirmationToken};
use crate::error::WorkflowError;
use crate::executor::{Executor, ExecutionResult, RecordApi};
use crate::impact::ImpactInspector;
use crate::metrics::{MetricsSink, NullSink, WorkflowEvent};
use crate::recommend::{FieldRecommender, Recommendation};
use crate::registry::{EntityRegistry, EntitySpec, FieldType};
use crate::store::RecordStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Create => write!(f, "create"),
            Operation::Update => write!(f, "update"),
            Operation::Delete => write!(f, "delete"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeleteType {
    Soft,
    Hard,
}

impl fmt::Display for DeleteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeleteType::Soft => write!(f, "soft"),
            DeleteType::Hard => write!(f, "hard"),
        }
    }
}

/// Who the mutation is performed on behalf of. Only used to merge
/// auto-fill fields and to look up personal recommendations; never
/// persisted by this subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorContext {
    pub actor_id: String,
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kindergarten_id: Option<i64>,
}

/// One tool invocation's worth of mutation intent. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationRequest {
    pub operation: Operation,
    pub entity_name: String,
    #[serde(default)]
    pub record_id: Option<String>,
    #[serde(default)]
    pub payload: Map<String, Value>,
    #[serde(default = "default_delete_type")]
    pub delete_type: DeleteType,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub auto_confirm: bool,
    #[serde(default)]
    pub force_delete: bool,
    #[serde(default)]
    pub actor: Option<ActorContext>,
}

fn default_delete_type() -> DeleteType {
    DeleteType::Soft
}

/// States of the traversal, logged as they are entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Validating,
    MissingFields,
    Analyzing,
    BuildingConfirmation,
    Blocked,
    AwaitingConfirmation,
    AutoExecuting,
    Executing,
    Succeeded,
    Failed,
}

/// A required field the caller still has to supply, with mined
/// candidate values attached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissingField {
    pub name: String,
    pub label: String,
    pub field_type: FieldType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recommendations: Vec<Recommendation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actor_preferences: Vec<Recommendation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissingFieldReport {
    pub entity_name: String,
    pub entity_display_name: String,
    pub missing_fields: Vec<MissingField>,
    /// Payload after auto-fill, so the caller resubmits on top of it.
    pub current_data: Map<String, Value>,
}

/// Where one traversal came to rest.
#[derive(Debug)]
pub enum WorkflowOutcome {
    /// Halted; a new request with the completed payload must be submitted.
    MissingFields(MissingFieldReport),
    /// Paused; the token must come back through `execute_confirmed`.
    AwaitingConfirmation(ConfirmationToken),
    /// Auto-confirmed and executed in one pass.
    Executed(ExecutionResult),
}

pub struct WorkflowOrchestrator {
    registry: EntityRegistry,
    analyzer: Arc<dyn Analyzer>,
    recommender: FieldRecommender,
    inspector: ImpactInspector,
    executor: Executor,
    metrics: Arc<dyn MetricsSink>,
    confirm_secret: String,
}

impl WorkflowOrchestrator {
    pub fn new(
        analyzer: Arc<dyn Analyzer>,
        store: Arc<dyn RecordStore>,
        api: Arc<dyn RecordApi>,
        confirm_secret: impl Into<String>,
    ) -> Self {
        Self {
            registry: EntityRegistry::new(),
            analyzer,
            recommender: FieldRecommender::new(store.clone()),
            inspector: ImpactInspector::new(store),
            executor: Executor::new(api),
            metrics: Arc::new(NullSink),
            confirm_secret: confirm_secret.into(),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn supported_entities(&self) -> Vec<String> {
        self.registry.supported()
    }

    fn enter(&self, state: WorkflowState) {
        debug!(?state, "workflow state");
        self.metrics.observe(WorkflowEvent::StateEntered(state));
    }

    /// Phase one: run a fresh mutation request up to its resting state.
    #[tracing::instrument(skip(self, request), fields(entity = %request.entity_name, operation = %request.operation))]
    pub async fn submit(
        &self,
        request: MutationRequest,
    ) -> Result<WorkflowOutcome, WorkflowError> {
        self.enter(WorkflowState::Validating);
        let spec = self
            .registry
            .resolve(&request.entity_name)
            .ok_or_else(|| {
                self.enter(WorkflowState::Failed);
                WorkflowError::UnsupportedEntity {
                    entity: request.entity_name.clone(),
                    supported: self.registry.supported(),
                }
            })?
            .clone();

        let record_id = match request.operation {
            Operation::Create => None,
            Operation::Update | Operation::Delete => {
                Some(request.record_id.clone().ok_or_else(|| {
                    WorkflowError::InvalidRequest(format!(
                        "record_id is required for {}",
                        request.operation
                    ))
                })?)
            }
        };

        let merged_payload = match request.operation {
            Operation::Create => merge_auto_fill(&spec, &request.payload, request.actor.as_ref()),
            _ => request.payload.clone(),
        };

        if request.operation == Operation::Create {
            let missing = spec.missing_required(&merged_payload);
            if !missing.is_empty() {
                self.enter(WorkflowState::MissingFields);
                let report = self
                    .missing_field_report(&spec, missing, merged_payload, request.actor.as_ref())
                    .await;
                return Ok(WorkflowOutcome::MissingFields(report));
            }
        }

        self.enter(WorkflowState::Analyzing);
        let analysis = self.analyzer.analyze(&request, &spec).await;
        if !analysis.success {
            self.enter(WorkflowState::Failed);
            return Err(WorkflowError::AnalysisRejected {
                entity: spec.name.clone(),
                operation: request.operation,
                reason: analysis
                    .error
                    .unwrap_or_else(|| "the analyzer refused the request".to_string()),
            });
        }

        let impact = match (&record_id, request.operation) {
            (Some(id), Operation::Update | Operation::Delete) => {
                Some(self.inspector.inspect(&spec, &request, id).await?)
            }
            _ => None,
        };

        self.enter(WorkflowState::BuildingConfirmation);
        let artifact =
            ConfirmationBuilder::build(&request, &spec, &analysis, &merged_payload, impact);

        if !artifact.confirmation_options.can_proceed {
            self.enter(WorkflowState::Blocked);
            return Err(WorkflowError::Blocked {
                entity: spec.name.clone(),
                operation: request.operation,
                reason: artifact
                    .impact
                    .as_ref()
                    .map(|i| i.blocking_reason.clone())
                    .unwrap_or_else(|| "the safety check vetoed this operation".to_string()),
                alternatives: artifact.confirmation_options.alternative_actions.clone(),
            });
        }

        if request.auto_confirm && artifact.confirmation_options.auto_confirm_available {
            self.enter(WorkflowState::AutoExecuting);
            info!("simple operation auto-confirmed, executing directly");
            return self
                .run_executor(&artifact)
                .await
                .map(WorkflowOutcome::Executed);
        }

        self.enter(WorkflowState::AwaitingConfirmation);
        Ok(WorkflowOutcome::AwaitingConfirmation(
            ConfirmationToken::issue(artifact, &self.confirm_secret),
        ))
    }

    /// Phase two: execute a previously issued, now accepted token.
    ///
    /// The can-proceed invariant is enforced here, not in the executor:
    /// a token whose artifact carries a veto never reaches it.
    #[tracing::instrument(skip(self, token))]
    pub async fn execute_confirmed(
        &self,
        token: ConfirmationToken,
    ) -> Result<ExecutionResult, WorkflowError> {
        if !token.verify(&self.confirm_secret) {
            return Err(WorkflowError::InvalidToken(
                "seal mismatch; the artifact was altered after it was issued".to_string(),
            ));
        }
        let artifact = token.artifact;

        if !artifact.confirmation_options.can_proceed {
            self.enter(WorkflowState::Blocked);
            return Err(WorkflowError::Blocked {
                entity: artifact.entity_name.clone(),
                operation: artifact.operation,
                reason: artifact
                    .impact
                    .as_ref()
                    .map(|i| i.blocking_reason.clone())
                    .unwrap_or_else(|| "the safety check vetoed this operation".to_string()),
                alternatives: artifact.confirmation_options.alternative_actions.clone(),
            });
        }

        self.run_executor(&artifact).await
    }

    async fn run_executor(
        &self,
        artifact: &ConfirmationArtifact,
    ) -> Result<ExecutionResult, WorkflowError> {
        self.enter(WorkflowState::Executing);
        info!(invocation = %artifact.invocation_id, "handing artifact to the executor");
        match self.executor.execute(artifact).await {
            Ok(result) => {
                self.enter(WorkflowState::Succeeded);
                self.metrics
                    .observe(WorkflowEvent::ExecutionCompleted { success: true });
                Ok(result)
            }
            Err(err) => {
                self.enter(WorkflowState::Failed);
                self.metrics
                    .observe(WorkflowEvent::ExecutionCompleted { success: false });
                Err(err)
            }
        }
    }

    async fn missing_field_report(
        &self,
        spec: &EntitySpec,
        missing: Vec<crate::registry::FieldSpec>,
        current_data: Map<String, Value>,
        actor: Option<&ActorContext>,
    ) -> MissingFieldReport {
        let names: Vec<String> = missing.iter().map(|f| f.name.clone()).collect();
        let mut mined = self.recommender.recommend(spec, &names, 3, 30).await;

        let mut preferences: HashMap<String, Vec<Recommendation>> = HashMap::new();
        if let Some(actor) = actor {
            for name in &names {
                let set = self
                    .recommender
                    .recommend_for_actor(spec, name, &actor.actor_id, 2)
                    .await;
                if !set.recommendations.is_empty() {
                    preferences.insert(name.clone(), set.recommendations);
                }
            }
        }

        MissingFieldReport {
            entity_name: spec.name.clone(),
            entity_display_name: spec.display_name.clone(),
            missing_fields: missing
                .into_iter()
                .map(|f| MissingField {
                    recommendations: mined
                        .remove(&f.name)
                        .map(|set| set.recommendations)
                        .unwrap_or_default(),
                    actor_preferences: preferences.remove(&f.name).unwrap_or_default(),
                    name: f.name,
                    label: f.label,
                    field_type: f.field_type,
                    enum_values: f.enum_values,
                    placeholder: f.placeholder,
                })
                .collect(),
            current_data,
        }
    }
}

/// Merge the entity's auto-fill fields out of the actor context. The
/// caller's explicit values always win.
fn merge_auto_fill(
    spec: &EntitySpec,
    payload: &Map<String, Value>,
    actor: Option<&ActorContext>,
) -> Map<String, Value> {
    let mut merged = payload.clone();
    let actor = match actor {
        Some(actor) => actor,
        None => return merged,
    };
    for field in &spec.auto_fill_fields {
        if merged.get(&field.name).map(|v| !v.is_null()).unwrap_or(false) {
            continue;
        }
        match field.name.as_str() {
            "created_by" => {
                merged.insert(field.name.clone(), Value::String(actor.actor_id.clone()));
            }
            "kindergarten_id" => {
                if let Some(id) = actor.kindergarten_id {
                    merged.insert(field.name.clone(), Value::from(id));
                }
            }
            _ => {}
        }
    }
    merged
}

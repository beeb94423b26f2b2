//! Advisory Analyzer
//!
//! Classifies a mutation request before anything is shown to a human:
//! complexity, cascade effects, safety concerns. The oracle-backed
//! implementation consults a language model under a bounded timeout; the
//! deterministic implementation derives everything from the entity spec
//! alone and fully replaces the oracle when it is slow, wrong or disabled.
//! Both produce the same shape, so nothing downstream can tell them apart.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::provider::LlmProvider;
use crate::registry::EntitySpec;
use crate::workflow::{DeleteType, MutationRequest, Operation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    Medium,
    Complex,
}

impl Default for Complexity {
    fn default() -> Self {
        // Simple is never assumed; the oracle has to say so explicitly.
        Complexity::Medium
    }
}

/// Shared output shape of both analyzer implementations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    #[serde(default = "default_true")]
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub api_endpoint: String,
    #[serde(default)]
    pub http_method: String,
    #[serde(default)]
    pub complexity: Complexity,
    #[serde(default)]
    pub missing_required: Vec<String>,
    #[serde(default)]
    pub related_tables: Vec<String>,
    #[serde(default)]
    pub cascade_effects: Vec<String>,
    #[serde(default)]
    pub safety_concerns: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    #[serde(default)]
    pub potential_conflicts: Vec<String>,
    #[serde(default)]
    pub validation_rules: Vec<String>,
    #[serde(default)]
    pub estimated_time: String,
}

fn default_true() -> bool {
    true
}

#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Never fails: any internal problem degrades to the deterministic result.
    async fn analyze(&self, request: &MutationRequest, spec: &EntitySpec) -> AnalysisResult;
}

// ─── Deterministic fallback ──────────────────────────────────────────────────

/// Pure analyzer derived entirely from the entity spec. Identical input
/// yields identical output: no clock, no randomness, no I/O.
pub struct DeterministicAnalyzer;

impl DeterministicAnalyzer {
    pub fn result_for(request: &MutationRequest, spec: &EntitySpec) -> AnalysisResult {
        let complexity = match request.operation {
            Operation::Create | Operation::Update => Complexity::Medium,
            Operation::Delete => match request.delete_type {
                DeleteType::Soft => Complexity::Medium,
                DeleteType::Hard => Complexity::Complex,
            },
        };

        let safety_concerns = match (request.operation, request.delete_type) {
            (Operation::Delete, DeleteType::Hard) => vec!["hard delete is irreversible".to_string()],
            _ => Vec::new(),
        };

        let recommendations = match request.operation {
            Operation::Delete => vec!["confirm the delete is really needed".to_string()],
            _ => vec!["double-check the payload before confirming".to_string()],
        };

        AnalysisResult {
            success: true,
            error: None,
            api_endpoint: spec.endpoint_for(request.operation, request.record_id.as_deref()),
            http_method: spec.http_method_for(request.operation).to_string(),
            complexity,
            missing_required: spec
                .missing_required(&request.payload)
                .into_iter()
                .map(|f| f.name)
                .collect(),
            related_tables: spec.related_tables.iter().map(|r| r.table.clone()).collect(),
            cascade_effects: Vec::new(),
            safety_concerns,
            recommendations,
            potential_conflicts: Vec::new(),
            validation_rules: vec![
                "format validation".to_string(),
                "required-field check".to_string(),
            ],
            estimated_time: "1-2s".to_string(),
        }
    }
}

#[async_trait]
impl Analyzer for DeterministicAnalyzer {
    async fn analyze(&self, request: &MutationRequest, spec: &EntitySpec) -> AnalysisResult {
        Self::result_for(request, spec)
    }
}

// ─── Oracle-backed analyzer ──────────────────────────────────────────────────

/// Consults a chat-completion oracle for classification hints. Timeout,
/// transport failure and malformed replies all degrade silently to the
/// deterministic result; only an explicit `success: false` refusal from
/// the oracle survives into the output.
pub struct OracleAnalyzer {
    provider: Arc<dyn LlmProvider>,
    model: String,
    timeout: Duration,
}

impl OracleAnalyzer {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            provider,
            model: model.into(),
            timeout,
        }
    }

    fn system_prompt(operation: Operation) -> &'static str {
        match operation {
            Operation::Delete => {
                "You are a database operations analyst for a kindergarten management \
                 system, focused on data safety and cascade impact of deletions. \
                 Reply quickly and accurately with a JSON analysis."
            }
            _ => {
                "You are a database operations analyst for a kindergarten management \
                 system. Reply quickly and accurately with a JSON analysis."
            }
        }
    }

    fn user_prompt(request: &MutationRequest, spec: &EntitySpec) -> String {
        let mut prompt = format!(
            "Analyze the following data {} request:\n\n\
             Target table: {}\n\
             Business center: {}\n\
             API endpoint: {}\n",
            request.operation,
            spec.name,
            spec.group,
            spec.endpoint_for(request.operation, request.record_id.as_deref()),
        );
        if let Some(ref id) = request.record_id {
            prompt.push_str(&format!("Record id: {}\n", id));
        }
        if request.operation == Operation::Delete {
            prompt.push_str(&format!("Delete type: {}\n", request.delete_type));
        }
        prompt.push_str(&format!(
            "Payload: {}\n\
             Operation description: {}\n\n\
             Known API contract:\n\
             - HTTP method: {}\n\
             - Required fields: {}\n\
             - Optional fields: {}\n\n\
             Return a JSON object of the form:\n\
             {{\n\
               \"success\": true,\n\
               \"api_endpoint\": \"...\",\n\
               \"http_method\": \"...\",\n\
               \"complexity\": \"simple|medium|complex\",\n\
               \"missing_required\": [\"...\"],\n\
               \"related_tables\": [\"...\"],\n\
               \"cascade_effects\": [\"...\"],\n\
               \"safety_concerns\": [\"...\"],\n\
               \"recommendations\": [\"...\"],\n\
               \"potential_conflicts\": [\"...\"],\n\
               \"validation_rules\": [\"...\"],\n\
               \"estimated_time\": \"...\"\n\
             }}\n\n\
             Return only the JSON, nothing else.",
            serde_json::to_string(&request.payload).unwrap_or_else(|_| "{}".to_string()),
            request.description,
            spec.http_method_for(request.operation),
            spec.required_field_names().join(", "),
            spec.optional_fields.join(", "),
        ));
        prompt
    }

    fn parse_reply(reply: &str, fallback: &AnalysisResult) -> Option<AnalysisResult> {
        let value = extract_json(reply)?;
        let mut analysis: AnalysisResult = serde_json::from_value(value).ok()?;
        // Endpoint and method are contract facts, not opinions.
        if analysis.api_endpoint.is_empty() {
            analysis.api_endpoint = fallback.api_endpoint.clone();
        }
        if analysis.http_method.is_empty() {
            analysis.http_method = fallback.http_method.clone();
        }
        if analysis.estimated_time.is_empty() {
            analysis.estimated_time = fallback.estimated_time.clone();
        }
        Some(analysis)
    }
}

#[async_trait]
impl Analyzer for OracleAnalyzer {
    async fn analyze(&self, request: &MutationRequest, spec: &EntitySpec) -> AnalysisResult {
        let fallback = DeterministicAnalyzer::result_for(request, spec);

        let prompt = Self::user_prompt(request, spec);
        let system = Self::system_prompt(request.operation).to_string();

        let reply = match tokio::time::timeout(
            self.timeout,
            self.provider.generate(&self.model, prompt, Some(system)),
        )
        .await
        {
            Ok(Ok(reply)) => reply,
            Ok(Err(err)) => {
                warn!("advisory oracle call failed, using deterministic analysis: {err:#}");
                return fallback;
            }
            Err(_) => {
                warn!(
                    "advisory oracle exceeded {}ms, using deterministic analysis",
                    self.timeout.as_millis()
                );
                return fallback;
            }
        };

        match Self::parse_reply(&reply, &fallback) {
            Some(analysis) => {
                debug!(complexity = ?analysis.complexity, "advisory oracle analysis accepted");
                analysis
            }
            None => {
                warn!("advisory oracle reply had no parseable JSON, using deterministic analysis");
                fallback
            }
        }
    }
}

/// Extract the first balanced `{...}` object from free-form model output.
fn extract_json(text: &str) -> Option<Value> {
    let start = text.find('{')?;
    let tail = &text[start..];
    let mut depth = 0usize;
    for (i, c) in tail.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return serde_json::from_str(&tail[..=i]).ok();
                }
            }
            _ => {}
        }
    }
    None
}

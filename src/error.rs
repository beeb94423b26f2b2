//! Workflow Error Taxonomy
//!
//! Every fatal condition carries the entity and operation it arose from,
//! plus a machine-readable kind for the tool-response envelope. Advisory
//! analyzer transport/parse failures are absent on purpose: the
//! deterministic fallback absorbs them before they can surface here.

use thiserror::Error;

use crate::workflow::Operation;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("unsupported entity `{entity}`; supported entities: {}", .supported.join(", "))]
    UnsupportedEntity {
        entity: String,
        supported: Vec<String>,
    },

    #[error("no {entity} record with id `{record_id}` was found")]
    RecordNotFound { entity: String, record_id: String },

    #[error("the advisory analyzer rejected the {operation} request for `{entity}`: {reason}")]
    AnalysisRejected {
        entity: String,
        operation: Operation,
        reason: String,
    },

    #[error("cannot {operation} `{entity}`: {reason}")]
    Blocked {
        entity: String,
        operation: Operation,
        reason: String,
        alternatives: Vec<String>,
    },

    #[error("{operation} of `{entity}` failed downstream{}: {body}", .status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default())]
    ExecutionError {
        entity: String,
        operation: Operation,
        status: Option<u16>,
        body: String,
    },

    #[error("invalid mutation request: {0}")]
    InvalidRequest(String),

    #[error("confirmation token rejected: {0}")]
    InvalidToken(String),
}

impl WorkflowError {
    /// Machine-readable error kind for the tool-response envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkflowError::UnsupportedEntity { .. } => "unsupported_entity",
            WorkflowError::RecordNotFound { .. } => "record_not_found",
            WorkflowError::AnalysisRejected { .. } => "analysis_rejected",
            WorkflowError::Blocked { .. } => "blocked",
            WorkflowError::ExecutionError { .. } => "execution_error",
            WorkflowError::InvalidRequest(_) => "invalid_request",
            WorkflowError::InvalidToken(_) => "invalid_token",
        }
    }
}

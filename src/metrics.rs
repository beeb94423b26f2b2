//! Metrics Sink
//!
//! Observation seam for embedding systems. The core never keeps
//! process-wide counters; whoever assembles the orchestrator injects a
//! sink (or takes the no-op default) and aggregates however it likes.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::workflow::WorkflowState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowEvent {
    StateEntered(WorkflowState),
    ExecutionCompleted { success: bool },
}

pub trait MetricsSink: Send + Sync {
    fn observe(&self, event: WorkflowEvent);
}

/// Default sink: drops everything.
pub struct NullSink;

impl MetricsSink for NullSink {
    fn observe(&self, _event: WorkflowEvent) {}
}

/// Simple counting sink for tests and embedders that only want totals.
#[derive(Default)]
pub struct CountingSink {
    pub states_entered: AtomicU64,
    pub executions: AtomicU64,
    pub failures: AtomicU64,
}

impl MetricsSink for CountingSink {
    fn observe(&self, event: WorkflowEvent) {
        match event {
            WorkflowEvent::StateEntered(_) => {
                self.states_entered.fetch_add(1, Ordering::Relaxed);
            }
            WorkflowEvent::ExecutionCompleted { success } => {
                self.executions.fetch_add(1, Ordering::Relaxed);
                if !success {
                    self.failures.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }
}

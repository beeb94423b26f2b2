//! Kinder Agency CLI
//!
//! Drives one chat-tool invocation against the mutation workflow: reads a
//! `{ "tool": ..., "args": ... }` JSON document from the first argument or
//! stdin, runs it, prints the response envelope as JSON. The HTTP chat
//! layer embeds the library directly; this binary exists for operators
//! and scripted smoke checks.

use std::io::Read;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde_json::Value;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use kinder_agency::analysis::{Analyzer, DeterministicAnalyzer, OracleAnalyzer};
use kinder_agency::config::WorkflowConfig;
use kinder_agency::executor::HttpRecordApi;
use kinder_agency::provider::OpenAiCompatProvider;
use kinder_agency::store::HttpRecordStore;
use kinder_agency::tool::{ConfirmMutationTool, MutateRecordTool, Tool};
use kinder_agency::workflow::WorkflowOrchestrator;

// ──────────────────────────────────────────────────────────────────────────────
// ASSEMBLY
// ──────────────────────────────────────────────────────────────────────────────

fn build_orchestrator(config: &WorkflowConfig) -> WorkflowOrchestrator {
    let analyzer: Arc<dyn Analyzer> = if config.oracle_enabled {
        let provider = Arc::new(OpenAiCompatProvider::new(
            config.oracle_url.clone(),
            config.oracle_api_key.clone(),
        ));
        Arc::new(OracleAnalyzer::new(
            provider,
            config.oracle_model.clone(),
            config.oracle_timeout,
        ))
    } else {
        Arc::new(DeterministicAnalyzer)
    };

    let store = Arc::new(HttpRecordStore::new(
        config.api_base_url.clone(),
        config.api_token.clone(),
        config.executor_timeout,
    ));
    let api = Arc::new(HttpRecordApi::new(
        config.api_base_url.clone(),
        config.api_token.clone(),
        config.executor_timeout,
    ));

    WorkflowOrchestrator::new(analyzer, store, api, config.confirm_secret.clone())
}

// ──────────────────────────────────────────────────────────────────────────────
// MAIN ENTRY POINT
// ──────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize logging; RUST_LOG wins, default keeps the envelope on
    // stdout readable
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let invocation = read_invocation().context("failed to read tool invocation")?;
    let tool_name = invocation["tool"]
        .as_str()
        .context("invocation is missing the `tool` field")?
        .to_string();
    let args = invocation.get("args").cloned().unwrap_or(Value::Null);

    let config = WorkflowConfig::from_env();
    info!(
        api = %config.api_base_url,
        oracle_enabled = config.oracle_enabled,
        "assembling mutation workflow"
    );
    let orchestrator = Arc::new(build_orchestrator(&config));

    let response = if tool_name == MutateRecordTool::NAME {
        MutateRecordTool::new(orchestrator).execute(args).await
    } else if tool_name == ConfirmMutationTool::NAME {
        ConfirmMutationTool::new(orchestrator).execute(args).await
    } else {
        bail!(
            "unknown tool `{}`; available: {}, {}",
            tool_name,
            MutateRecordTool::NAME,
            ConfirmMutationTool::NAME
        );
    };

    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

fn read_invocation() -> Result<Value> {
    if let Some(arg) = std::env::args().nth(1) {
        return serde_json::from_str(&arg).context("first argument is not valid JSON");
    }
    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .context("failed to read stdin")?;
    serde_json::from_str(&input).context("stdin is not valid JSON")
}

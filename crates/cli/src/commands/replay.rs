//! `ironloop replay`: Run one task against a scripted model.
//!
//! The script is a JSON array. Each entry is one model reply:
//! - a string is returned verbatim,
//! - an object with an `error` field fails the call
//!   (`{"error": "reset", "kind": "network"}`),
//! - any other JSON value is returned as its JSON text.

use async_trait::async_trait;
use chrono::Utc;
use ironloop_agent::{AgentLoopController, ScriptStep, ScriptedProvider};
use ironloop_core::{ProviderError, Task, TelemetrySink, Tool, ToolError, ToolRegistry, TracingSink};
use ironloop_recovery::{RecoveryManager, SystemResourceMonitor};
use serde::Deserialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::load_config;

pub struct ReplayOptions {
    pub script: PathBuf,
    pub task: String,
    pub expected_output: Option<String>,
    pub max_iterations: Option<u32>,
    pub recovery: bool,
    pub metrics: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ScriptErrorKind {
    #[default]
    Network,
    Timeout,
    RateLimit,
    Server,
    ModelNotFound,
    Authentication,
    Internal,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ScriptEntry {
    Text(String),
    Error {
        error: String,
        #[serde(default)]
        kind: ScriptErrorKind,
    },
    Reply(serde_json::Value),
}

impl ScriptEntry {
    fn into_step(self) -> ScriptStep {
        match self {
            Self::Text(text) => ScriptStep::Text(text),
            Self::Reply(value) => ScriptStep::Text(value.to_string()),
            Self::Error { error, kind } => ScriptStep::Error(match kind {
                ScriptErrorKind::Network => ProviderError::Network(error),
                ScriptErrorKind::Timeout => ProviderError::Timeout(error),
                ScriptErrorKind::RateLimit => ProviderError::RateLimited { retry_after_secs: 1 },
                ScriptErrorKind::Server => ProviderError::ApiError {
                    status_code: 503,
                    message: error,
                },
                ScriptErrorKind::ModelNotFound => ProviderError::ModelNotFound(error),
                ScriptErrorKind::Authentication => ProviderError::AuthenticationFailed(error),
                ScriptErrorKind::Internal => ProviderError::NotConfigured(error),
            }),
        }
    }
}

fn parse_script(raw: &str) -> Result<Vec<ScriptStep>, serde_json::Error> {
    let entries: Vec<ScriptEntry> = serde_json::from_str(raw)?;
    Ok(entries.into_iter().map(ScriptEntry::into_step).collect())
}

/// Echoes its `text` input back.
struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Return the given text unchanged"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": { "text": { "type": "string" } },
            "required": ["text"]
        })
    }

    async fn call(&self, input: serde_json::Value) -> Result<String, ToolError> {
        input
            .get("text")
            .and_then(|t| t.as_str())
            .map(str::to_string)
            .ok_or_else(|| ToolError::InvalidArguments("missing string field 'text'".into()))
    }
}

/// Reports the current UTC time.
struct ClockTool;

#[async_trait]
impl Tool for ClockTool {
    fn name(&self) -> &str {
        "clock"
    }

    fn description(&self) -> &str {
        "Current date and time in UTC (RFC 3339)"
    }

    async fn call(&self, _input: serde_json::Value) -> Result<String, ToolError> {
        Ok(Utc::now().to_rfc3339())
    }
}

fn builtin_tools() -> ToolRegistry {
    let mut tools = ToolRegistry::new();
    tools.register(Arc::new(EchoTool));
    tools.register(Arc::new(ClockTool));
    tools
}

pub async fn run(path: Option<&Path>, options: ReplayOptions) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = load_config(path).map_err(|e| format!("Failed to load config: {e}"))?;
    if let Some(max) = options.max_iterations {
        config.agent.max_iterations = max;
    }

    let raw = std::fs::read_to_string(&options.script)
        .map_err(|e| format!("Failed to read script {}: {e}", options.script.display()))?;
    let steps = parse_script(&raw).map_err(|e| format!("Invalid script: {e}"))?;
    info!(steps = steps.len(), script = %options.script.display(), "Loaded replay script");

    let provider = Arc::new(ScriptedProvider::new(steps));
    let sink: Arc<dyn TelemetrySink> = Arc::new(TracingSink);
    let mut controller =
        AgentLoopController::new(provider, Arc::new(builtin_tools()), &config).with_sink(sink.clone());

    let manager = if options.recovery {
        let manager = Arc::new(RecoveryManager::from_config(
            &config.recovery,
            sink,
            Arc::new(SystemResourceMonitor::new()),
        )?);
        controller = controller.with_recovery(manager.clone());
        Some(manager)
    } else {
        None
    };

    let mut task = Task::new(options.task);
    if let Some(expected) = options.expected_output {
        task = task.with_expected_output(expected);
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling task");
            on_interrupt.cancel();
        }
    });

    let result = controller.run_with_cancel(&mut task, cancel).await;
    println!("{}", serde_json::to_string_pretty(&result)?);

    if options.metrics
        && let Some(manager) = &manager
    {
        println!("{}", serde_json::to_string_pretty(&manager.metrics())?);
    }

    if result.is_success() {
        Ok(())
    } else {
        Err(format!("task ended with {}", result.status).into())
    }
}

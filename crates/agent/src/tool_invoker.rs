//! Runs one tool call and turns its outcome into feedback.
//!
//! Tool failures, panics and timeouts become tool-error feedback so the
//! agent can try again with knowledge of what went wrong. Only cancellation
//! escapes as an error.

use chrono::Utc;
use ironloop_core::{DomainEvent, Error, TelemetrySink, Tool, ToolError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::templates::FeedbackTemplates;

pub struct ToolInvoker {
    templates: Arc<dyn FeedbackTemplates>,
    sink: Arc<dyn TelemetrySink>,
    timeout: Duration,
    max_event_chars: usize,
}

enum Finished {
    Cancelled,
    TimedOut,
    Joined(Result<Result<String, ToolError>, tokio::task::JoinError>),
}

impl ToolInvoker {
    pub fn new(templates: Arc<dyn FeedbackTemplates>, sink: Arc<dyn TelemetrySink>) -> Self {
        Self {
            templates,
            sink,
            timeout: Duration::from_secs(60),
            max_event_chars: 500,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_event_chars(mut self, max: usize) -> Self {
        self.max_event_chars = max;
        self
    }

    /// Run `tool` with `input` and render the feedback for the next turn.
    pub async fn invoke(
        &self,
        task_id: &str,
        tool: Arc<dyn Tool>,
        input: serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<String, Error> {
        let tool_name = tool.name().to_string();
        let input_preview = truncate(&input.to_string(), self.max_event_chars);
        debug!(tool = %tool_name, input = %input_preview, "Executing tool");

        let started = Instant::now();
        let mut handle = tokio::spawn(async move { tool.call(input).await });

        let finished = tokio::select! {
            biased;
            _ = cancel.cancelled() => Finished::Cancelled,
            joined = tokio::time::timeout(self.timeout, &mut handle) => match joined {
                Ok(result) => Finished::Joined(result),
                Err(_) => Finished::TimedOut,
            },
        };

        let result = match finished {
            Finished::Cancelled => {
                handle.abort();
                return Err(Error::Cancelled);
            }
            Finished::TimedOut => {
                handle.abort();
                Err(ToolError::Timeout {
                    tool_name: tool_name.clone(),
                    timeout_secs: self.timeout.as_secs(),
                })
            }
            Finished::Joined(Ok(result)) => result,
            Finished::Joined(Err(join_error)) => Err(ToolError::ExecutionFailed {
                tool_name: tool_name.clone(),
                reason: panic_reason(join_error),
            }),
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        let (feedback, output, success) = match result {
            Ok(output) => (self.templates.tool_result(&tool_name, &output), output, true),
            Err(e) => {
                warn!(tool = %tool_name, error = %e, "Tool execution failed");
                let reason = e.to_string();
                (self.templates.tool_error(&tool_name, &reason), reason, false)
            }
        };

        self.sink.emit(DomainEvent::ToolExecuted {
            task_id: task_id.to_string(),
            tool_name,
            input_preview,
            output_preview: truncate(&output, self.max_event_chars),
            success,
            duration_ms,
            timestamp: Utc::now(),
        });

        Ok(feedback)
    }
}

fn panic_reason(join_error: tokio::task::JoinError) -> String {
    match join_error.try_into_panic() {
        Ok(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".into());
            format!("panicked: {message}")
        }
        Err(join_error) => join_error.to_string(),
    }
}

/// Cut `text` to at most `max` characters, marking the cut.
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max).collect();
    cut.push('…');
    cut
}

//! Shared test tools and sinks.

use async_trait::async_trait;
use ironloop_core::{DomainEvent, TelemetrySink, Tool, ToolError};
use parking_lot::Mutex;
use std::time::Duration;

/// Returns a fixed price for any SKU.
pub struct LookupPriceTool;

#[async_trait]
impl Tool for LookupPriceTool {
    fn name(&self) -> &str {
        "lookupPrice"
    }

    fn description(&self) -> &str {
        "Look up the price of a SKU"
    }

    async fn call(&self, input: serde_json::Value) -> Result<String, ToolError> {
        if input.get("sku").is_none() {
            return Err(ToolError::InvalidArguments("missing 'sku'".into()));
        }
        Ok("42.00".into())
    }
}

pub struct FailingTool;

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &str {
        "checkStock"
    }

    fn description(&self) -> &str {
        "Always fails"
    }

    async fn call(&self, _input: serde_json::Value) -> Result<String, ToolError> {
        Err(ToolError::ExecutionFailed {
            tool_name: "checkStock".into(),
            reason: "warehouse offline".into(),
        })
    }
}

pub struct SlowTool(pub Duration);

#[async_trait]
impl Tool for SlowTool {
    fn name(&self) -> &str {
        "slow"
    }

    fn description(&self) -> &str {
        "Sleeps before answering"
    }

    async fn call(&self, _input: serde_json::Value) -> Result<String, ToolError> {
        tokio::time::sleep(self.0).await;
        Ok("done".into())
    }
}

pub struct PanickingTool;

#[async_trait]
impl Tool for PanickingTool {
    fn name(&self) -> &str {
        "explode"
    }

    fn description(&self) -> &str {
        "Panics"
    }

    async fn call(&self, _input: serde_json::Value) -> Result<String, ToolError> {
        panic!("tool blew up");
    }
}

pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echoes the 'text' field"
    }

    async fn call(&self, input: serde_json::Value) -> Result<String, ToolError> {
        Ok(input["text"].as_str().unwrap_or_default().to_string())
    }
}

/// Keeps every emitted event for inspection.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<DomainEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<DomainEvent> {
        self.events.lock().clone()
    }

    pub fn statuses(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                DomainEvent::LoopStateChanged { status, .. } => Some(status.clone()),
                _ => None,
            })
            .collect()
    }
}

impl TelemetrySink for RecordingSink {
    fn emit(&self, event: DomainEvent) {
        self.events.lock().push(event);
    }
}

//! Domain events and the telemetry sink.
//!
//! Events are published when the loop or the recovery subsystem does
//! something worth observing. Sinks are fire-and-forget: emitting never
//! blocks and never feeds back into loop state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Log level attached to an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    /// The loop moved to a new state
    LoopStateChanged {
        task_id: String,
        iteration: u32,
        status: String,
        timestamp: DateTime<Utc>,
    },

    /// The language model was invoked
    LlmInvoked {
        task_id: String,
        model: String,
        tokens_used: u32,
        duration_ms: u64,
        success: bool,
        timestamp: DateTime<Utc>,
    },

    /// A tool was executed
    ToolExecuted {
        task_id: String,
        tool_name: String,
        input_preview: String,
        output_preview: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// The loop reached a terminal state
    LoopFinished {
        task_id: String,
        status: String,
        iterations: u32,
        error: Option<String>,
        timestamp: DateTime<Utc>,
    },

    RecoveryInitiated {
        recovery_id: String,
        strategy: String,
        component: String,
        operation: String,
        error_kind: String,
        timestamp: DateTime<Utc>,
    },

    RecoverySucceeded {
        recovery_id: String,
        strategy: String,
        attempts: u32,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// Recovery failed, or never started (no strategy, disabled)
    RecoveryFailed {
        recovery_id: Option<String>,
        strategy: Option<String>,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl DomainEvent {
    /// The component that produced the event.
    pub fn component(&self) -> &'static str {
        match self {
            Self::LoopStateChanged { .. }
            | Self::LlmInvoked { .. }
            | Self::ToolExecuted { .. }
            | Self::LoopFinished { .. } => "agent_loop",
            Self::RecoveryInitiated { .. }
            | Self::RecoverySucceeded { .. }
            | Self::RecoveryFailed { .. } => "recovery_manager",
        }
    }

    /// The operation the event describes.
    pub fn operation(&self) -> &'static str {
        match self {
            Self::LoopStateChanged { .. } => "state_changed",
            Self::LlmInvoked { .. } => "invoke_llm",
            Self::ToolExecuted { .. } => "invoke_tool",
            Self::LoopFinished { .. } => "loop_finished",
            Self::RecoveryInitiated { .. } => "recovery_initiated",
            Self::RecoverySucceeded { .. } => "recovery_succeeded",
            Self::RecoveryFailed { .. } => "recovery_failed",
        }
    }

    pub fn level(&self) -> EventLevel {
        match self {
            Self::LoopStateChanged { .. } => EventLevel::Debug,
            Self::LlmInvoked { success, .. } | Self::ToolExecuted { success, .. } => {
                if *success {
                    EventLevel::Info
                } else {
                    EventLevel::Warn
                }
            }
            Self::LoopFinished { error, .. } => {
                if error.is_some() {
                    EventLevel::Warn
                } else {
                    EventLevel::Info
                }
            }
            Self::RecoveryInitiated { .. } | Self::RecoverySucceeded { .. } => EventLevel::Info,
            Self::RecoveryFailed { .. } => EventLevel::Error,
        }
    }
}

/// Accepts structured events. Must never block the caller.
pub trait TelemetrySink: Send + Sync {
    fn emit(&self, event: DomainEvent);
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl TelemetrySink for EventBus {
    fn emit(&self, event: DomainEvent) {
        self.publish(event);
    }
}

/// Mirrors events into `tracing` at the event's level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn emit(&self, event: DomainEvent) {
        let component = event.component();
        let operation = event.operation();
        let payload = serde_json::to_string(&event).unwrap_or_default();
        match event.level() {
            EventLevel::Debug => tracing::debug!(component, operation, %payload, "event"),
            EventLevel::Info => tracing::info!(component, operation, %payload, "event"),
            EventLevel::Warn => tracing::warn!(component, operation, %payload, "event"),
            EventLevel::Error => tracing::error!(component, operation, %payload, "event"),
        }
    }
}

/// Fans an event out to several sinks.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn TelemetrySink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl TelemetrySink for FanoutSink {
    fn emit(&self, event: DomainEvent) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.emit(event.clone());
            }
            last.emit(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool_event(success: bool) -> DomainEvent {
        DomainEvent::ToolExecuted {
            task_id: "t1".into(),
            tool_name: "lookupPrice".into(),
            input_preview: r#"{"sku":"X1"}"#.into(),
            output_preview: "42.00".into(),
            success,
            duration_ms: 42,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn event_bus_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.emit(tool_event(true));

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            DomainEvent::ToolExecuted { tool_name, success, .. } => {
                assert_eq!(tool_name, "lookupPrice");
                assert!(success);
            }
            _ => panic!("Expected ToolExecuted event"),
        }
    }

    #[test]
    fn event_bus_no_subscribers_doesnt_panic() {
        let bus = EventBus::new(16);
        bus.publish(DomainEvent::RecoveryFailed {
            recovery_id: None,
            strategy: None,
            reason: "no subscribers".into(),
            timestamp: Utc::now(),
        });
    }

    #[test]
    fn event_shape_accessors() {
        let ok = tool_event(true);
        assert_eq!(ok.component(), "agent_loop");
        assert_eq!(ok.operation(), "invoke_tool");
        assert_eq!(ok.level(), EventLevel::Info);
        assert_eq!(tool_event(false).level(), EventLevel::Warn);
    }

    #[tokio::test]
    async fn fanout_reaches_every_sink() {
        let a = Arc::new(EventBus::new(4));
        let b = Arc::new(EventBus::new(4));
        let mut rx_a = a.subscribe();
        let mut rx_b = b.subscribe();

        let fanout = FanoutSink::new().with(a.clone()).with(b.clone()).with(Arc::new(TracingSink));
        fanout.emit(tool_event(true));

        assert!(rx_a.recv().await.is_ok());
        assert!(rx_b.recv().await.is_ok());
    }
}

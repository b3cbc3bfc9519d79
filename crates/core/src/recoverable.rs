//! Failure classification and the recovery capability.
//!
//! An error is eligible for recovery when it implements [`Recoverable`] and
//! exposes a [`RecoveryHandler`]. Strategies never touch the failing
//! component directly; they ask the handler to perform named
//! [`Operation`]s and read back a [`HandlerOutcome`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, ProviderError, RecoveryError};

/// What went wrong, independent of which Rust type carried it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    Timeout,
    RateLimit,
    Authentication,
    Server,
    ModelUnavailable,
    ResourceExhausted,
    AgentCrash,
    Overload,
    Parse,
    Tool,
    Internal,
    Cancelled,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::RateLimit => "rate_limit",
            Self::Authentication => "authentication",
            Self::Server => "server",
            Self::ModelUnavailable => "model_unavailable",
            Self::ResourceExhausted => "resource_exhausted",
            Self::AgentCrash => "agent_crash",
            Self::Overload => "overload",
            Self::Parse => "parse",
            Self::Tool => "tool",
            Self::Internal => "internal",
            Self::Cancelled => "cancelled",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How bad a failure is. Ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// The recovery algorithms the manager knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Retry,
    CircuitBreaker,
    GracefulDegradation,
    AgentRestart,
    AgentReassign,
    AgentFallbackModel,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 6] = [
        Self::Retry,
        Self::CircuitBreaker,
        Self::GracefulDegradation,
        Self::AgentRestart,
        Self::AgentReassign,
        Self::AgentFallbackModel,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Retry => "retry",
            Self::CircuitBreaker => "circuit_breaker",
            Self::GracefulDegradation => "graceful_degradation",
            Self::AgentRestart => "agent_restart",
            Self::AgentReassign => "agent_reassign",
            Self::AgentFallbackModel => "agent_fallback_model",
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where and how a failure happened.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Component that failed (e.g. "agent_loop")
    pub component: String,
    /// Operation in progress (e.g. "invoke_llm")
    pub operation: String,
    pub severity: Severity,
    pub recoverable: bool,
    /// How many times this operation has already failed in a row
    pub retry_count: u32,
    pub failure_reason: String,
    /// Agent the failure belongs to, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    /// Model in use when the failure happened, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl ErrorContext {
    /// Build a context for `error`, taking severity and reason from it.
    pub fn for_error(
        error: &dyn Recoverable,
        component: impl Into<String>,
        operation: impl Into<String>,
    ) -> Self {
        Self {
            component: component.into(),
            operation: operation.into(),
            severity: error.severity(),
            recoverable: error.recovery_handler().is_some(),
            retry_count: 0,
            failure_reason: error.to_string(),
            agent_id: None,
            model: None,
        }
    }

    pub fn with_retry_count(mut self, count: u32) -> Self {
        self.retry_count = count;
        self
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }
}

/// A named recovery step a strategy asks the handler to perform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    /// Re-attempt the failed operation.
    Recover,
    /// Apply the effects of a degradation level.
    Degrade { level: usize, actions: Vec<String> },
    SaveState,
    RestoreState,
    Restart,
    HealthCheck,
    FindTargetAgent { agent_type: String },
    PrepareReassignment { agent_type: String },
    Reassign { agent_type: String },
    VerifyReassignment { agent_type: String },
    FindFallbackModel { current: Option<String>, candidate: String },
    PrepareModelSwitch { model: String },
    SwitchModel { model: String },
    VerifyModelSwitch { model: String },
}

impl Operation {
    /// Stable label used in logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Recover => "recover",
            Self::Degrade { .. } => "degrade",
            Self::SaveState => "save_state",
            Self::RestoreState => "restore_state",
            Self::Restart => "restart",
            Self::HealthCheck => "health_check",
            Self::FindTargetAgent { .. } => "find_target_agent",
            Self::PrepareReassignment { .. } => "prepare_reassignment",
            Self::Reassign { .. } => "reassign",
            Self::VerifyReassignment { .. } => "verify_reassignment",
            Self::FindFallbackModel { .. } => "find_fallback_model",
            Self::PrepareModelSwitch { .. } => "prepare_model_switch",
            Self::SwitchModel { .. } => "switch_model",
            Self::VerifyModelSwitch { .. } => "verify_model_switch",
        }
    }
}

/// What a handler reports back for one operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlerOutcome {
    pub success: bool,
    /// Which handler-side mechanism performed the operation
    pub strategy: String,
    pub attempts: u32,
    pub duration: Duration,
}

impl HandlerOutcome {
    pub fn succeeded(strategy: impl Into<String>, duration: Duration) -> Self {
        Self {
            success: true,
            strategy: strategy.into(),
            attempts: 1,
            duration,
        }
    }

    pub fn failed(strategy: impl Into<String>, duration: Duration) -> Self {
        Self {
            success: false,
            strategy: strategy.into(),
            attempts: 1,
            duration,
        }
    }
}

/// The recovery handler attached to a failing error.
///
/// `Ok(outcome)` with `success == false` is a failed but recoverable step;
/// `Err` aborts the running strategy.
#[async_trait]
pub trait RecoveryHandler: Send + Sync {
    fn can_handle(&self, error: &dyn Recoverable) -> bool;

    async fn handle(&self, operation: &Operation) -> std::result::Result<HandlerOutcome, RecoveryError>;
}

/// Capability implemented by errors the recovery manager can work with.
pub trait Recoverable: std::error::Error + Send + Sync {
    fn kind(&self) -> ErrorKind;

    fn severity(&self) -> Severity;

    /// The handler strategies delegate to. Errors without one are never
    /// selected by any strategy.
    fn recovery_handler(&self) -> Option<Arc<dyn RecoveryHandler>> {
        None
    }
}

impl Recoverable for ProviderError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::ApiError { status_code, .. } if *status_code >= 500 => ErrorKind::Server,
            Self::ApiError { status_code: 429, .. } => ErrorKind::RateLimit,
            Self::ApiError { .. } => ErrorKind::Unknown,
            Self::RateLimited { .. } => ErrorKind::RateLimit,
            Self::AuthenticationFailed(_) => ErrorKind::Authentication,
            Self::ModelNotFound(_) => ErrorKind::ModelUnavailable,
            Self::StreamInterrupted(_) | Self::Network(_) => ErrorKind::Network,
            Self::NotConfigured(_) => ErrorKind::Internal,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    fn severity(&self) -> Severity {
        match self.kind() {
            ErrorKind::Authentication | ErrorKind::Internal => Severity::Critical,
            ErrorKind::Server | ErrorKind::ModelUnavailable => Severity::High,
            ErrorKind::Cancelled => Severity::Low,
            _ => Severity::Medium,
        }
    }
}

/// The concrete error the agent loop hands to the recovery manager.
#[derive(thiserror::Error)]
#[error("{kind} failure: {message}")]
pub struct AgentFailure {
    pub kind: ErrorKind,
    pub severity: Severity,
    pub message: String,
    handler: Option<Arc<dyn RecoveryHandler>>,
}

impl AgentFailure {
    pub fn new(kind: ErrorKind, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity,
            message: message.into(),
            handler: None,
        }
    }

    /// Classify a language-model failure.
    pub fn from_provider(error: &ProviderError) -> Self {
        Self::new(error.kind(), error.severity(), error.to_string())
    }

    /// Classify any loop error.
    pub fn from_error(error: &Error) -> Self {
        match error {
            Error::Provider(e) => Self::from_provider(e),
            Error::Tool(e) => Self::new(ErrorKind::Tool, Severity::Medium, e.to_string()),
            Error::Serialization(e) => Self::new(ErrorKind::Parse, Severity::Medium, e.to_string()),
            Error::Cancelled => Self::new(ErrorKind::Cancelled, Severity::Low, error.to_string()),
            other => Self::new(ErrorKind::Internal, Severity::High, other.to_string()),
        }
    }

    pub fn with_handler(mut self, handler: Arc<dyn RecoveryHandler>) -> Self {
        self.handler = Some(handler);
        self
    }
}

impl std::fmt::Debug for AgentFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentFailure")
            .field("kind", &self.kind)
            .field("severity", &self.severity)
            .field("message", &self.message)
            .field("has_handler", &self.handler.is_some())
            .finish()
    }
}

impl Recoverable for AgentFailure {
    fn kind(&self) -> ErrorKind {
        self.kind
    }

    fn severity(&self) -> Severity {
        self.severity
    }

    fn recovery_handler(&self) -> Option<Arc<dyn RecoveryHandler>> {
        self.handler.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysOk;

    #[async_trait]
    impl RecoveryHandler for AlwaysOk {
        fn can_handle(&self, _error: &dyn Recoverable) -> bool {
            true
        }

        async fn handle(&self, operation: &Operation) -> Result<HandlerOutcome, RecoveryError> {
            Ok(HandlerOutcome::succeeded(operation.label(), Duration::ZERO))
        }
    }

    #[test]
    fn provider_errors_are_classified() {
        assert_eq!(ProviderError::Timeout("60s".into()).kind(), ErrorKind::Timeout);
        assert_eq!(ProviderError::Network("reset".into()).kind(), ErrorKind::Network);
        assert_eq!(
            ProviderError::ApiError { status_code: 503, message: "down".into() }.kind(),
            ErrorKind::Server
        );
        assert_eq!(
            ProviderError::ApiError { status_code: 429, message: "slow".into() }.kind(),
            ErrorKind::RateLimit
        );
        assert_eq!(
            ProviderError::AuthenticationFailed("bad key".into()).severity(),
            Severity::Critical
        );
    }

    #[test]
    fn provider_error_has_no_handler() {
        let err = ProviderError::Network("reset".into());
        assert!(err.recovery_handler().is_none());
        let ctx = ErrorContext::for_error(&err, "agent_loop", "invoke_llm");
        assert!(!ctx.recoverable);
        assert_eq!(ctx.severity, Severity::Medium);
    }

    #[test]
    fn agent_failure_exposes_attached_handler() {
        let failure = AgentFailure::from_provider(&ProviderError::Timeout("60s".into()))
            .with_handler(Arc::new(AlwaysOk));
        assert_eq!(failure.kind(), ErrorKind::Timeout);
        assert!(failure.recovery_handler().is_some());

        let ctx = ErrorContext::for_error(&failure, "agent_loop", "invoke_llm").with_retry_count(2);
        assert!(ctx.recoverable);
        assert_eq!(ctx.retry_count, 2);
        assert!(ctx.failure_reason.contains("timed out"));
    }

    #[test]
    fn loop_errors_map_to_kinds() {
        let internal = AgentFailure::from_error(&Error::Internal("boom".into()));
        assert_eq!(internal.kind, ErrorKind::Internal);
        assert_eq!(internal.severity, Severity::High);

        let cancelled = AgentFailure::from_error(&Error::Cancelled);
        assert_eq!(cancelled.kind, ErrorKind::Cancelled);
    }

    #[test]
    fn severity_is_ordered() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn operation_serializes_with_tag() {
        let op = Operation::SwitchModel { model: "gpt-4o-mini".into() };
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["op"], "switch_model");
        assert_eq!(op.label(), "switch_model");
    }
}

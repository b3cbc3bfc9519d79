//! Per-failure recovery bookkeeping.

use chrono::{DateTime, Utc};
use ironloop_core::{ErrorContext, Recoverable, RecoveryError, RecoveryHandler, StrategyKind};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::monitor::ResourceUsage;

/// Where a recovery attempt currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryPhase {
    Initiated,
    Executing,
    Validating,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContextMetadata {
    pub component: String,
    pub resource_usage: ResourceUsage,
}

/// One recovery attempt for one failure.
///
/// Built by the manager with attempts and timeout already clamped to the
/// manager-wide ceilings. Strategies advance `attempt_count` only through
/// [`RecoveryContext::begin_attempt`].
#[derive(Debug, Clone)]
pub struct RecoveryContext {
    pub id: String,
    pub error: Arc<dyn Recoverable>,
    pub error_context: ErrorContext,
    pub strategy: StrategyKind,
    pub phase: RecoveryPhase,
    pub started_at: DateTime<Utc>,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub timeout: Duration,
    pub metadata: ContextMetadata,
}

impl RecoveryContext {
    pub fn new(
        error: Arc<dyn Recoverable>,
        error_context: ErrorContext,
        strategy: StrategyKind,
        max_attempts: u32,
        timeout: Duration,
        resource_usage: ResourceUsage,
    ) -> Self {
        let component = error_context.component.clone();
        Self {
            id: Uuid::new_v4().to_string(),
            error,
            error_context,
            strategy,
            phase: RecoveryPhase::Initiated,
            started_at: Utc::now(),
            attempt_count: 0,
            max_attempts,
            timeout,
            metadata: ContextMetadata {
                component,
                resource_usage,
            },
        }
    }

    /// The handler the failing error exposes.
    pub fn handler(&self) -> Result<Arc<dyn RecoveryHandler>, RecoveryError> {
        self.error.recovery_handler().ok_or_else(|| {
            RecoveryError::HandlerUnavailable(format!("{} exposes no recovery handler", self.error))
        })
    }

    /// Count one more attempt. Returns `false` once the budget is spent.
    pub fn begin_attempt(&mut self) -> bool {
        if self.attempt_count >= self.max_attempts {
            return false;
        }
        self.attempt_count += 1;
        true
    }

    pub fn attempts_left(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempt_count)
    }
}

/// What a strategy reports back to the manager.
#[derive(Debug, Clone, Default)]
pub struct StrategyOutcome {
    pub success: bool,
    pub error: Option<String>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl StrategyOutcome {
    pub fn succeeded() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(reason.into()),
            metadata: serde_json::Map::new(),
        }
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// Outcome of one `RecoveryManager::handle` call.
#[derive(Debug, Clone)]
pub struct RecoveryResult {
    pub successful: bool,
    /// Absent when no strategy ran
    pub context: Option<RecoveryContext>,
    pub duration: Duration,
    pub error: Option<String>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl RecoveryResult {
    /// A result for a failure no strategy was run for.
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            successful: false,
            context: None,
            duration: Duration::ZERO,
            error: Some(reason.into()),
            metadata: serde_json::Map::new(),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.context.as_ref().map_or(0, |c| c.attempt_count)
    }

    pub fn strategy(&self) -> Option<StrategyKind> {
        self.context.as_ref().map(|c| c.strategy)
    }
}

//! Recovery strategies.
//!
//! Each strategy is one fault-handling algorithm. The manager asks
//! [`RecoveryStrategy::validate`] whether a strategy accepts a failure,
//! then runs [`RecoveryStrategy::execute`] and always follows up with
//! [`RecoveryStrategy::cleanup`].

pub mod agent;
pub mod circuit_breaker;
pub mod degradation;
pub mod retry;

pub use agent::AgentStrategy;
pub use circuit_breaker::{CircuitBreakerStrategy, CircuitSnapshot, CircuitState};
pub use degradation::{DegradationLevel, GracefulDegradationStrategy};
pub use retry::RetryStrategy;

use async_trait::async_trait;
use ironloop_config::StrategySettings;
use ironloop_core::{ErrorContext, Recoverable, RecoveryError, StrategyKind};

use crate::context::{RecoveryContext, StrategyOutcome};

#[async_trait]
pub trait RecoveryStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    fn settings(&self) -> &StrategySettings;

    /// Whether this strategy accepts the failure.
    fn validate(&self, error: &dyn Recoverable, context: &ErrorContext) -> bool {
        accepts(self.settings(), error, context)
    }

    /// Run the algorithm. `Err` means a handler step aborted it.
    async fn execute(&self, context: &mut RecoveryContext) -> Result<StrategyOutcome, RecoveryError>;

    /// Release anything `execute` left behind. Runs after every execution,
    /// including ones cut short by a timeout or cancellation.
    async fn cleanup(&self, _context: &RecoveryContext) {}
}

/// Default acceptance test shared by every strategy.
///
/// Empty kind or severity lists act as wildcards. The error must expose a
/// handler that says it can deal with it.
pub fn accepts(settings: &StrategySettings, error: &dyn Recoverable, context: &ErrorContext) -> bool {
    if !settings.enabled {
        return false;
    }
    if !settings.error_kinds.is_empty() && !settings.error_kinds.contains(&error.kind()) {
        return false;
    }
    if !settings.severities.is_empty() && !settings.severities.contains(&context.severity) {
        return false;
    }
    error
        .recovery_handler()
        .is_some_and(|handler| handler.can_handle(error))
}

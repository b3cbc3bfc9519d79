//! The recovery manager: strategy selection, execution, validation, metrics.

use chrono::Utc;
use ironloop_config::{RecoveryConfig, ValidationThresholds};
use ironloop_core::{DomainEvent, ErrorContext, Recoverable, RecoveryError, StrategyKind, TelemetrySink};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::{RecoveryContext, RecoveryPhase, RecoveryResult, StrategyOutcome};
use crate::metrics::{MetricsTracker, RecordedRun, RecoveryMetrics};
use crate::monitor::ResourceMonitor;
use crate::strategy::{
    AgentStrategy, CircuitBreakerStrategy, GracefulDegradationStrategy, RecoveryStrategy,
    RetryStrategy,
};
use crate::validation::ValidationReport;

/// Custom acceptance test for a registered strategy.
pub type StrategyPredicate = Arc<dyn Fn(&dyn Recoverable, &ErrorContext) -> bool + Send + Sync>;

struct Registration {
    predicate: Option<StrategyPredicate>,
    strategy: Arc<dyn RecoveryStrategy>,
}

impl Registration {
    fn accepts(&self, error: &dyn Recoverable, context: &ErrorContext) -> bool {
        match &self.predicate {
            Some(predicate) => predicate(error, context),
            None => self.strategy.validate(error, context),
        }
    }
}

/// Selects and runs recovery strategies.
///
/// One instance is shared by every loop in the process. The registry is
/// an ordered list; the first strategy that accepts a failure runs it.
pub struct RecoveryManager {
    enabled: bool,
    global_max_attempts: u32,
    global_timeout: Duration,
    validate_after_recovery: bool,
    thresholds: ValidationThresholds,
    registry: RwLock<Vec<Registration>>,
    metrics: MetricsTracker,
    sink: Arc<dyn TelemetrySink>,
    monitor: Arc<dyn ResourceMonitor>,
}

impl RecoveryManager {
    /// A manager with no strategies registered.
    pub fn new(
        config: &RecoveryConfig,
        sink: Arc<dyn TelemetrySink>,
        monitor: Arc<dyn ResourceMonitor>,
    ) -> Self {
        Self {
            enabled: config.enabled,
            global_max_attempts: config.global_max_attempts,
            global_timeout: Duration::from_millis(config.global_timeout_ms),
            validate_after_recovery: config.validate_after_recovery,
            thresholds: config.thresholds.clone(),
            registry: RwLock::new(Vec::new()),
            metrics: MetricsTracker::new(),
            sink,
            monitor,
        }
    }

    /// A manager with the six built-in strategies registered in the
    /// configured order.
    pub fn from_config(
        config: &RecoveryConfig,
        sink: Arc<dyn TelemetrySink>,
        monitor: Arc<dyn ResourceMonitor>,
    ) -> Result<Self, RecoveryError> {
        let manager = Self::new(config, sink, monitor);
        for kind in &config.order {
            let strategy: Arc<dyn RecoveryStrategy> = match kind {
                StrategyKind::Retry => Arc::new(RetryStrategy::new(&config.retry)),
                StrategyKind::CircuitBreaker => {
                    Arc::new(CircuitBreakerStrategy::new(&config.circuit_breaker))
                }
                StrategyKind::GracefulDegradation => {
                    Arc::new(GracefulDegradationStrategy::new(&config.degradation)?)
                }
                StrategyKind::AgentRestart => Arc::new(AgentStrategy::restart(&config.agent_restart)),
                StrategyKind::AgentReassign => {
                    Arc::new(AgentStrategy::reassign(&config.agent_reassign)?)
                }
                StrategyKind::AgentFallbackModel => {
                    Arc::new(AgentStrategy::fallback_model(&config.agent_fallback_model))
                }
            };
            manager.register(strategy);
        }
        Ok(manager)
    }

    /// Append a strategy that accepts failures through its own `validate`.
    pub fn register(&self, strategy: Arc<dyn RecoveryStrategy>) {
        debug!(strategy = %strategy.kind(), "Registered recovery strategy");
        self.registry.write().push(Registration {
            predicate: None,
            strategy,
        });
    }

    /// Append a strategy guarded by a custom predicate.
    pub fn register_with(&self, predicate: StrategyPredicate, strategy: Arc<dyn RecoveryStrategy>) {
        debug!(strategy = %strategy.kind(), "Registered recovery strategy with custom predicate");
        self.registry.write().push(Registration {
            predicate: Some(predicate),
            strategy,
        });
    }

    /// Registered strategy kinds, in selection order.
    pub fn strategies(&self) -> Vec<StrategyKind> {
        self.registry.read().iter().map(|r| r.strategy.kind()).collect()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn metrics(&self) -> RecoveryMetrics {
        self.metrics.snapshot()
    }

    pub async fn handle(&self, error: Arc<dyn Recoverable>, error_context: ErrorContext) -> RecoveryResult {
        self.handle_with_cancel(error, error_context, CancellationToken::new()).await
    }

    /// Recover from `error`. Never fails: every problem becomes a failed
    /// [`RecoveryResult`].
    pub async fn handle_with_cancel(
        &self,
        error: Arc<dyn Recoverable>,
        error_context: ErrorContext,
        cancel: CancellationToken,
    ) -> RecoveryResult {
        if !self.enabled {
            return self.reject("disabled");
        }

        let Some(strategy) = self.select(error.as_ref(), &error_context) else {
            debug!(
                kind = %error.kind(),
                severity = %error_context.severity,
                "No recovery strategy accepts this failure"
            );
            return self.reject("no suitable strategy");
        };

        let settings = strategy.settings();
        let max_attempts = settings.max_attempts.min(self.global_max_attempts);
        let timeout = Duration::from_millis(settings.timeout_ms).min(self.global_timeout);
        let error_kind = error.kind();
        let severity = error_context.severity;

        let mut context = RecoveryContext::new(
            error,
            error_context,
            strategy.kind(),
            max_attempts,
            timeout,
            self.monitor.resource_usage(),
        );

        info!(
            recovery_id = %context.id,
            strategy = %context.strategy,
            component = %context.error_context.component,
            operation = %context.error_context.operation,
            kind = %error_kind,
            "Recovery initiated"
        );
        self.sink.emit(DomainEvent::RecoveryInitiated {
            recovery_id: context.id.clone(),
            strategy: context.strategy.to_string(),
            component: context.error_context.component.clone(),
            operation: context.error_context.operation.clone(),
            error_kind: error_kind.to_string(),
            timestamp: Utc::now(),
        });

        let started = Instant::now();
        context.phase = RecoveryPhase::Executing;
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RecoveryError::Cancelled),
            result = tokio::time::timeout(timeout, strategy.execute(&mut context)) => {
                result.unwrap_or(Err(RecoveryError::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                }))
            }
        };
        let duration = started.elapsed();

        let StrategyOutcome {
            success: mut successful,
            mut error,
            metadata,
        } = outcome.unwrap_or_else(|e| StrategyOutcome::failed(e.to_string()));

        if successful && self.validate_after_recovery {
            context.phase = RecoveryPhase::Validating;
            let report = ValidationReport::run(
                &self.thresholds,
                &self.monitor.resource_usage(),
                &self.monitor.performance(),
                duration,
                context.timeout,
            );
            if !report.is_valid() {
                let failed: Vec<_> = report.failures().map(|c| c.name).collect();
                warn!(recovery_id = %context.id, checks = ?failed, "Post-recovery validation failed");
                successful = false;
                error = Some(format!("post-recovery validation failed: {}", failed.join(", ")));
            }
        }

        context.phase = if successful {
            RecoveryPhase::Succeeded
        } else {
            RecoveryPhase::Failed
        };

        self.metrics.record(RecordedRun {
            strategy: context.strategy,
            error_kind,
            severity,
            success: successful,
            duration,
            resource_usage: context.metadata.resource_usage,
        });

        strategy.cleanup(&context).await;

        if successful {
            info!(
                recovery_id = %context.id,
                strategy = %context.strategy,
                attempts = context.attempt_count,
                duration_ms = duration.as_millis() as u64,
                "Recovery succeeded"
            );
            self.sink.emit(DomainEvent::RecoverySucceeded {
                recovery_id: context.id.clone(),
                strategy: context.strategy.to_string(),
                attempts: context.attempt_count,
                duration_ms: duration.as_millis() as u64,
                timestamp: Utc::now(),
            });
        } else {
            let reason = error.clone().unwrap_or_else(|| "recovery failed".into());
            warn!(recovery_id = %context.id, strategy = %context.strategy, %reason, "Recovery failed");
            self.sink.emit(DomainEvent::RecoveryFailed {
                recovery_id: Some(context.id.clone()),
                strategy: Some(context.strategy.to_string()),
                reason,
                timestamp: Utc::now(),
            });
        }

        RecoveryResult {
            successful,
            context: Some(context),
            duration,
            error,
            metadata,
        }
    }

    fn select(&self, error: &dyn Recoverable, context: &ErrorContext) -> Option<Arc<dyn RecoveryStrategy>> {
        self.registry
            .read()
            .iter()
            .find(|r| r.accepts(error, context))
            .map(|r| r.strategy.clone())
    }

    fn reject(&self, reason: &str) -> RecoveryResult {
        self.sink.emit(DomainEvent::RecoveryFailed {
            recovery_id: None,
            strategy: None,
            reason: reason.to_string(),
            timestamp: Utc::now(),
        });
        RecoveryResult::rejected(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::{FixedResourceMonitor, ResourceUsage};
    use crate::strategy::testing::*;
    use async_trait::async_trait;
    use ironloop_config::StrategySettings;
    use ironloop_core::{AgentFailure, ErrorKind, EventBus, ProviderError, Severity};

    fn manager(config: &RecoveryConfig) -> (RecoveryManager, Arc<EventBus>) {
        let bus = Arc::new(EventBus::new(64));
        let manager = RecoveryManager::from_config(
            config,
            bus.clone(),
            Arc::new(FixedResourceMonitor::default()),
        )
        .unwrap();
        (manager, bus)
    }

    fn error_context(error: &dyn Recoverable) -> ErrorContext {
        ErrorContext::for_error(error, "agent_loop", "invoke_llm")
    }

    /// Never finishes on its own.
    struct Stuck {
        settings: StrategySettings,
        cleaned: parking_lot::Mutex<bool>,
    }

    impl Stuck {
        fn new(timeout_ms: u64) -> Self {
            Self {
                settings: StrategySettings {
                    timeout_ms,
                    ..settings(1)
                },
                cleaned: parking_lot::Mutex::new(false),
            }
        }
    }

    #[async_trait]
    impl RecoveryStrategy for Stuck {
        fn kind(&self) -> StrategyKind {
            StrategyKind::AgentRestart
        }

        fn settings(&self) -> &StrategySettings {
            &self.settings
        }

        async fn execute(&self, context: &mut RecoveryContext) -> Result<StrategyOutcome, RecoveryError> {
            context.begin_attempt();
            std::future::pending::<()>().await;
            Ok(StrategyOutcome::succeeded())
        }

        async fn cleanup(&self, _context: &RecoveryContext) {
            *self.cleaned.lock() = true;
        }
    }

    #[test]
    fn registers_in_configured_order() {
        let config = RecoveryConfig {
            order: vec![StrategyKind::AgentFallbackModel, StrategyKind::Retry],
            ..RecoveryConfig::default()
        };
        let (manager, _) = manager(&config);
        assert_eq!(manager.strategies(), vec![StrategyKind::AgentFallbackModel, StrategyKind::Retry]);
    }

    #[tokio::test]
    async fn disabled_manager_rejects() {
        let config = RecoveryConfig {
            enabled: false,
            ..RecoveryConfig::default()
        };
        let (manager, bus) = manager(&config);
        let mut rx = bus.subscribe();

        let error = failure(ErrorKind::Network, Severity::Low, Arc::new(ScriptedHandler::new()));
        let result = manager.handle(error.clone(), error_context(error.as_ref())).await;

        assert!(!result.successful);
        assert_eq!(result.error.as_deref(), Some("disabled"));
        assert!(result.context.is_none());
        assert!(matches!(rx.recv().await.unwrap().as_ref(), DomainEvent::RecoveryFailed { .. }));
    }

    #[tokio::test]
    async fn errors_without_handler_find_no_strategy() {
        let (manager, _) = manager(&RecoveryConfig::default());
        let error: Arc<dyn Recoverable> = Arc::new(ProviderError::Network("reset".into()));
        let result = manager.handle(error.clone(), error_context(error.as_ref())).await;
        assert_eq!(result.error.as_deref(), Some("no suitable strategy"));
        assert_eq!(manager.metrics().total_attempts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn first_accepting_strategy_runs_and_metrics_update() {
        let (manager, bus) = manager(&RecoveryConfig::default());
        let mut rx = bus.subscribe();

        let handler = Arc::new(ScriptedHandler::new());
        let error = failure(ErrorKind::Network, Severity::Medium, handler.clone());
        let result = manager.handle(error.clone(), error_context(error.as_ref())).await;

        assert!(result.successful);
        assert_eq!(result.strategy(), Some(StrategyKind::Retry));
        assert_eq!(result.attempts(), 1);
        assert_eq!(result.context.as_ref().unwrap().phase, RecoveryPhase::Succeeded);

        let metrics = manager.metrics();
        assert_eq!(metrics.total_attempts, 1);
        assert_eq!(metrics.recovery_success_rate, 1.0);
        assert_eq!(metrics.strategies["retry"].successes, 1);

        assert!(matches!(rx.recv().await.unwrap().as_ref(), DomainEvent::RecoveryInitiated { .. }));
        assert!(matches!(rx.recv().await.unwrap().as_ref(), DomainEvent::RecoverySucceeded { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn attempts_are_clamped_to_global_ceiling() {
        let config = RecoveryConfig {
            global_max_attempts: 2,
            ..RecoveryConfig::default()
        };
        let (manager, _) = manager(&config);

        let handler = Arc::new(ScriptedHandler::new().script("recover", vec![Reply::Fail; 5]));
        let error = failure(ErrorKind::Timeout, Severity::Low, handler.clone());
        let result = manager.handle(error.clone(), error_context(error.as_ref())).await;

        assert!(!result.successful);
        assert_eq!(result.context.as_ref().unwrap().max_attempts, 2);
        assert_eq!(result.attempts(), 2);
        assert_eq!(handler.labels().len(), 2);
    }

    #[tokio::test]
    async fn strategy_error_becomes_failed_result() {
        let config = RecoveryConfig {
            order: vec![StrategyKind::AgentRestart],
            ..RecoveryConfig::default()
        };
        let (manager, _) = manager(&config);

        let handler = Arc::new(ScriptedHandler::new().script("restart", vec![Reply::Abort]));
        let error = failure(ErrorKind::AgentCrash, Severity::High, handler);
        let result = manager.handle(error.clone(), error_context(error.as_ref())).await;

        assert!(!result.successful);
        assert!(result.error.unwrap().contains("scripted abort"));
        assert_eq!(manager.metrics().failed_recoveries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_fails_and_still_cleans_up() {
        let manager = RecoveryManager::new(
            &RecoveryConfig::default(),
            Arc::new(EventBus::default()),
            Arc::new(FixedResourceMonitor::default()),
        );
        let stuck = Arc::new(Stuck::new(500));
        manager.register(stuck.clone());

        let error = failure(ErrorKind::AgentCrash, Severity::High, Arc::new(ScriptedHandler::new()));
        let result = manager.handle(error.clone(), error_context(error.as_ref())).await;

        assert!(!result.successful);
        assert!(result.error.unwrap().contains("timed out after 500ms"));
        assert!(*stuck.cleaned.lock());
    }

    #[tokio::test]
    async fn cancellation_fails_and_still_cleans_up() {
        let manager = RecoveryManager::new(
            &RecoveryConfig::default(),
            Arc::new(EventBus::default()),
            Arc::new(FixedResourceMonitor::default()),
        );
        let stuck = Arc::new(Stuck::new(60_000));
        manager.register(stuck.clone());

        let cancel = CancellationToken::new();
        cancel.cancel();

        let error = failure(ErrorKind::AgentCrash, Severity::High, Arc::new(ScriptedHandler::new()));
        let result = manager
            .handle_with_cancel(error.clone(), error_context(error.as_ref()), cancel)
            .await;

        assert!(!result.successful);
        assert_eq!(result.error.as_deref(), Some("Recovery cancelled"));
        assert!(*stuck.cleaned.lock());
    }

    #[tokio::test(start_paused = true)]
    async fn validation_can_invalidate_success() {
        let config = RecoveryConfig {
            validate_after_recovery: true,
            ..RecoveryConfig::default()
        };
        let busy = FixedResourceMonitor::new(ResourceUsage {
            cpu: 0.99,
            ..ResourceUsage::default()
        });
        let manager = RecoveryManager::from_config(&config, Arc::new(EventBus::default()), Arc::new(busy)).unwrap();

        let error = failure(ErrorKind::Network, Severity::Medium, Arc::new(ScriptedHandler::new()));
        let result = manager.handle(error.clone(), error_context(error.as_ref())).await;

        assert!(!result.successful);
        assert!(result.error.unwrap().contains("cpu"));
        assert_eq!(result.context.unwrap().phase, RecoveryPhase::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn custom_predicate_overrides_validate() {
        let manager = RecoveryManager::new(
            &RecoveryConfig::default(),
            Arc::new(EventBus::default()),
            Arc::new(FixedResourceMonitor::default()),
        );
        let only_parse: StrategyPredicate =
            Arc::new(|error: &dyn Recoverable, _ctx: &ErrorContext| error.kind() == ErrorKind::Parse);
        manager.register_with(only_parse, Arc::new(AgentStrategy::restart(&Default::default())));

        let network = failure(ErrorKind::Network, Severity::Low, Arc::new(ScriptedHandler::new()));
        let result = manager.handle(network.clone(), error_context(network.as_ref())).await;
        assert_eq!(result.error.as_deref(), Some("no suitable strategy"));

        let handler: Arc<ScriptedHandler> = Arc::new(ScriptedHandler::new());
        let parse: Arc<dyn Recoverable> =
            Arc::new(AgentFailure::new(ErrorKind::Parse, Severity::Low, "bad json").with_handler(handler));
        let result = manager.handle(parse.clone(), error_context(parse.as_ref())).await;
        assert!(result.successful);
        assert_eq!(result.strategy(), Some(StrategyKind::AgentRestart));
    }
}

//! Retry with fixed or exponential backoff.

use async_trait::async_trait;
use ironloop_config::{RetryConfig, StrategySettings};
use ironloop_core::{Operation, RecoveryError, StrategyKind};
use std::time::Duration;
use tracing::{debug, warn};

use super::RecoveryStrategy;
use crate::context::{RecoveryContext, StrategyOutcome};

pub struct RetryStrategy {
    settings: StrategySettings,
    initial_delay: Duration,
    max_delay: Duration,
    exponential_backoff: bool,
}

impl RetryStrategy {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            settings: config.settings(),
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            exponential_backoff: config.exponential_backoff,
        }
    }

    /// Delay slept before `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if !self.exponential_backoff || attempt <= 1 {
            return self.initial_delay.min(self.max_delay);
        }
        let factor = 2u32.saturating_pow(attempt - 1);
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[async_trait]
impl RecoveryStrategy for RetryStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Retry
    }

    fn settings(&self) -> &StrategySettings {
        &self.settings
    }

    async fn execute(&self, context: &mut RecoveryContext) -> Result<StrategyOutcome, RecoveryError> {
        let handler = context.handler()?;
        let mut delay = Duration::ZERO;

        while context.begin_attempt() {
            let attempt = context.attempt_count;
            delay = self.delay_for_attempt(attempt);
            tokio::time::sleep(delay).await;

            match handler.handle(&Operation::Recover).await {
                Ok(outcome) if outcome.success => {
                    debug!(recovery_id = %context.id, attempt, "Retry succeeded");
                    return Ok(StrategyOutcome::succeeded()
                        .with_meta("final_delay_ms", delay.as_millis() as u64));
                }
                Ok(_) => debug!(recovery_id = %context.id, attempt, "Retry attempt failed"),
                Err(e) => warn!(recovery_id = %context.id, attempt, error = %e, "Retry attempt errored"),
            }
        }

        Ok(StrategyOutcome::failed(format!(
            "retry exhausted after {} attempts",
            context.attempt_count
        ))
        .with_meta("final_delay_ms", delay.as_millis() as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::ResourceUsage;
    use crate::strategy::testing::*;
    use ironloop_core::{ErrorKind, Severity};
    use std::sync::Arc;

    fn strategy(max_attempts: u32) -> RetryStrategy {
        RetryStrategy::new(&RetryConfig {
            max_attempts,
            initial_delay_ms: 100,
            max_delay_ms: 800,
            exponential_backoff: true,
            ..RetryConfig::default()
        })
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let retry = strategy(5);
        let delays: Vec<u128> = (1..=5).map(|a| retry.delay_for_attempt(a).as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 800]);
    }

    #[test]
    fn fixed_backoff_never_grows() {
        let retry = RetryStrategy::new(&RetryConfig {
            initial_delay_ms: 250,
            exponential_backoff: false,
            ..RetryConfig::default()
        });
        assert_eq!(retry.delay_for_attempt(4), Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn sleeps_before_every_attempt() {
        let handler = Arc::new(ScriptedHandler::new().script(
            "recover",
            vec![Reply::Fail, Reply::Fail, Reply::Abort, Reply::Fail, Reply::Fail],
        ));
        let error = failure(ErrorKind::Network, Severity::Medium, handler.clone());
        let mut ctx = context(StrategyKind::Retry, error, 5, ResourceUsage::default());

        let start = tokio::time::Instant::now();
        let outcome = strategy(5).execute(&mut ctx).await.unwrap();

        assert!(!outcome.success);
        assert_eq!(ctx.attempt_count, 5);
        assert_eq!(outcome.metadata["final_delay_ms"], 800);

        let offsets: Vec<u128> = handler
            .call_times
            .lock()
            .iter()
            .map(|t| t.duration_since(start).as_millis())
            .collect();
        assert_eq!(offsets, vec![100, 300, 700, 1500, 2300]);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_at_first_success() {
        let handler = Arc::new(ScriptedHandler::new().script("recover", vec![Reply::Fail, Reply::Ok]));
        let error = failure(ErrorKind::Timeout, Severity::Low, handler.clone());
        let mut ctx = context(StrategyKind::Retry, error, 5, ResourceUsage::default());

        let outcome = strategy(5).execute(&mut ctx).await.unwrap();

        assert!(outcome.success);
        assert_eq!(ctx.attempt_count, 2);
        assert_eq!(handler.labels(), vec!["recover", "recover"]);
    }
}

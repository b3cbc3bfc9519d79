//! Graceful degradation: trade functionality for stability under load.

use async_trait::async_trait;
use ironloop_config::{DegradationConfig, StrategySettings};
use ironloop_core::{Operation, RecoveryError, RecoveryHandler, StrategyKind};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::RecoveryStrategy;
use crate::condition::Condition;
use crate::context::{RecoveryContext, StrategyOutcome};
use crate::monitor::ResourceUsage;

#[derive(Debug, Clone, PartialEq)]
pub struct DegradationLevel {
    pub level: usize,
    pub conditions: Vec<Condition>,
    pub actions: Vec<String>,
}

impl DegradationLevel {
    fn matches(&self, usage: &ResourceUsage) -> bool {
        self.conditions.iter().all(|c| c.holds(usage))
    }
}

/// Holds the process-wide degradation level (0 = normal).
pub struct GracefulDegradationStrategy {
    settings: StrategySettings,
    /// Sorted by ascending level
    levels: Vec<DegradationLevel>,
    current: Mutex<usize>,
}

impl GracefulDegradationStrategy {
    pub fn new(config: &DegradationConfig) -> Result<Self, RecoveryError> {
        let mut levels = config
            .levels
            .iter()
            .map(|l| {
                Ok(DegradationLevel {
                    level: l.level,
                    conditions: Condition::parse_all(&l.conditions)?,
                    actions: l.actions.clone(),
                })
            })
            .collect::<Result<Vec<_>, RecoveryError>>()?;
        levels.sort_by_key(|l| l.level);

        Ok(Self {
            settings: config.settings(),
            levels,
            current: Mutex::new(0),
        })
    }

    pub fn current_level(&self) -> usize {
        *self.current.lock()
    }

    fn max_level(&self) -> usize {
        self.levels.len()
    }

    /// Highest level whose conditions all hold.
    fn target_level(&self, usage: &ResourceUsage) -> Option<&DegradationLevel> {
        self.levels.iter().rev().find(|l| l.matches(usage))
    }

    /// Actions that define `level`. Level 0 has none.
    fn actions_for(&self, level: usize) -> Vec<String> {
        self.levels
            .iter()
            .find(|l| l.level == level)
            .map(|l| l.actions.clone())
            .unwrap_or_default()
    }

    /// Compute and claim the next level under the lock.
    /// Returns `(from, to)` when the level changed.
    fn transition(&self, next: impl FnOnce(usize) -> usize) -> Option<(usize, usize)> {
        let mut current = self.current.lock();
        let from = *current;
        let to = next(from).min(self.max_level());
        if from == to {
            return None;
        }
        *current = to;
        Some((from, to))
    }

    /// Undo a claimed transition unless another recovery moved the level since.
    fn revert(&self, from: usize, to: usize) {
        let mut current = self.current.lock();
        if *current == to {
            *current = from;
        }
    }

    /// Tell the handler about a level change made after the recover step.
    async fn announce(&self, handler: &dyn RecoveryHandler, recovery_id: &str, from: usize, to: usize) {
        let actions = self.actions_for(to);
        info!(recovery_id, from, to, ?actions, "Moving degradation level");
        if let Err(e) = handler.handle(&Operation::Degrade { level: to, actions }).await {
            warn!(recovery_id, level = to, error = %e, "Handler rejected degradation change");
        }
    }
}

#[async_trait]
impl RecoveryStrategy for GracefulDegradationStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::GracefulDegradation
    }

    fn settings(&self) -> &StrategySettings {
        &self.settings
    }

    async fn execute(&self, context: &mut RecoveryContext) -> Result<StrategyOutcome, RecoveryError> {
        let handler = context.handler()?;
        let usage = context.metadata.resource_usage;

        match self.target_level(&usage) {
            Some(target) => {
                if let Some((from, to)) = self.transition(|_| target.level) {
                    info!(
                        recovery_id = %context.id,
                        from,
                        to,
                        actions = ?target.actions,
                        "Applying degradation level"
                    );
                    let applied = handler
                        .handle(&Operation::Degrade {
                            level: to,
                            actions: target.actions.clone(),
                        })
                        .await;
                    if let Err(e) = applied {
                        self.revert(from, to);
                        return Err(e);
                    }
                }
            }
            None => debug!(recovery_id = %context.id, "No degradation level matches current usage"),
        }
        let applied = self.current_level();

        context.begin_attempt();
        match handler.handle(&Operation::Recover).await {
            Ok(outcome) if outcome.success => {
                if let Some((from, to)) = self.transition(|level| level.saturating_sub(1)) {
                    self.announce(handler.as_ref(), &context.id, from, to).await;
                }
                Ok(StrategyOutcome::succeeded()
                    .with_meta("applied_level", applied)
                    .with_meta("current_level", self.current_level()))
            }
            Ok(_) => Ok(StrategyOutcome::failed("recover operation failed")
                .with_meta("applied_level", applied)
                .with_meta("current_level", applied)),
            Err(e) => {
                warn!(recovery_id = %context.id, error = %e, "Degrading further");
                if let Some((from, to)) = self.transition(|level| level + 1) {
                    self.announce(handler.as_ref(), &context.id, from, to).await;
                }
                Err(e)
            }
        }
    }
}

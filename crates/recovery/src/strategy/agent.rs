//! Agent-level strategies: restart, reassign, and fallback model.
//!
//! All three run the same pipeline against the failing error's handler:
//! optional `save_state`, the strategy's own steps, optional
//! `restore_state`. A step reporting failure uses up an attempt and the
//! pipeline starts over; a step returning `Err` aborts the strategy.

use async_trait::async_trait;
use ironloop_config::{
    AgentFallbackModelConfig, AgentReassignConfig, AgentRestartConfig, StrategySettings,
};
use ironloop_core::{Operation, RecoveryError, RecoveryHandler, StrategyKind};
use std::collections::BTreeMap;
use tracing::{debug, info};

use super::RecoveryStrategy;
use crate::condition::Condition;
use crate::context::{RecoveryContext, StrategyOutcome};

#[derive(Debug, Clone)]
struct Rule {
    condition: Condition,
    target_agent_type: String,
    priority: i32,
}

enum AgentAction {
    Restart,
    /// Rules sorted by descending priority
    Reassign(Vec<Rule>),
    FallbackModel(BTreeMap<String, String>),
}

pub struct AgentStrategy {
    kind: StrategyKind,
    settings: StrategySettings,
    preserve_state: bool,
    action: AgentAction,
}

impl AgentStrategy {
    pub fn restart(config: &AgentRestartConfig) -> Self {
        Self {
            kind: StrategyKind::AgentRestart,
            settings: config.settings(),
            preserve_state: config.preserve_state,
            action: AgentAction::Restart,
        }
    }

    pub fn reassign(config: &AgentReassignConfig) -> Result<Self, RecoveryError> {
        let mut rules = config
            .rules
            .iter()
            .map(|r| {
                Ok(Rule {
                    condition: r.condition.parse()?,
                    target_agent_type: r.target_agent_type.clone(),
                    priority: r.priority,
                })
            })
            .collect::<Result<Vec<_>, RecoveryError>>()?;
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));

        Ok(Self {
            kind: StrategyKind::AgentReassign,
            settings: config.settings(),
            preserve_state: config.preserve_state,
            action: AgentAction::Reassign(rules),
        })
    }

    pub fn fallback_model(config: &AgentFallbackModelConfig) -> Self {
        Self {
            kind: StrategyKind::AgentFallbackModel,
            settings: config.settings(),
            preserve_state: config.preserve_state,
            action: AgentAction::FallbackModel(config.fallbacks.clone()),
        }
    }

    /// The strategy's own steps for this context, or the reason it cannot
    /// run at all.
    fn plan(&self, context: &RecoveryContext) -> Result<(Vec<Operation>, StrategyOutcome), String> {
        match &self.action {
            AgentAction::Restart => Ok((
                vec![Operation::Restart, Operation::HealthCheck],
                StrategyOutcome::succeeded().with_meta("restarted", true),
            )),
            AgentAction::Reassign(rules) => {
                let usage = &context.metadata.resource_usage;
                let rule = rules
                    .iter()
                    .find(|r| r.condition.holds(usage))
                    .ok_or_else(|| "no reassignment rule matched current usage".to_string())?;
                let agent_type = rule.target_agent_type.clone();
                Ok((
                    vec![
                        Operation::FindTargetAgent { agent_type: agent_type.clone() },
                        Operation::PrepareReassignment { agent_type: agent_type.clone() },
                        Operation::Reassign { agent_type: agent_type.clone() },
                        Operation::VerifyReassignment { agent_type: agent_type.clone() },
                    ],
                    StrategyOutcome::succeeded().with_meta("target_agent_type", agent_type),
                ))
            }
            AgentAction::FallbackModel(table) => {
                let current = context.error_context.model.clone();
                let model = current
                    .as_deref()
                    .and_then(|m| table.get(m))
                    .cloned()
                    .ok_or_else(|| match &current {
                        Some(m) => format!("no fallback model configured for '{m}'"),
                        None => "failing model is unknown".to_string(),
                    })?;
                Ok((
                    vec![
                        Operation::FindFallbackModel {
                            current: current.clone(),
                            candidate: model.clone(),
                        },
                        Operation::PrepareModelSwitch { model: model.clone() },
                        Operation::SwitchModel { model: model.clone() },
                        Operation::VerifyModelSwitch { model: model.clone() },
                    ],
                    StrategyOutcome::succeeded()
                        .with_meta("fallback_model", model)
                        .with_meta("previous_model", current.unwrap_or_default()),
                ))
            }
        }
    }

    /// Run the pipeline once. `Ok(Some(label))` names the step that failed.
    async fn run_pipeline(
        &self,
        handler: &dyn RecoveryHandler,
        steps: &[Operation],
    ) -> Result<Option<&'static str>, RecoveryError> {
        let save = self.preserve_state.then_some(Operation::SaveState);
        let restore = self.preserve_state.then_some(Operation::RestoreState);

        for op in save.iter().chain(steps).chain(restore.iter()) {
            let outcome = handler.handle(op).await?;
            if !outcome.success {
                return Ok(Some(op.label()));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl RecoveryStrategy for AgentStrategy {
    fn kind(&self) -> StrategyKind {
        self.kind
    }

    fn settings(&self) -> &StrategySettings {
        &self.settings
    }

    async fn execute(&self, context: &mut RecoveryContext) -> Result<StrategyOutcome, RecoveryError> {
        let handler = context.handler()?;
        let (steps, on_success) = match self.plan(context) {
            Ok(plan) => plan,
            Err(reason) => return Ok(StrategyOutcome::failed(reason)),
        };

        let mut last_failed = "";
        while context.begin_attempt() {
            match self.run_pipeline(handler.as_ref(), &steps).await? {
                None => {
                    info!(
                        recovery_id = %context.id,
                        strategy = %self.kind,
                        attempts = context.attempt_count,
                        "Agent recovery pipeline completed"
                    );
                    return Ok(on_success);
                }
                Some(step) => {
                    debug!(recovery_id = %context.id, step, attempt = context.attempt_count, "Pipeline step failed");
                    last_failed = step;
                }
            }
        }

        Ok(StrategyOutcome::failed(format!(
            "{} failed after {} attempts (last failed step: {last_failed})",
            self.kind, context.attempt_count
        )))
    }
}

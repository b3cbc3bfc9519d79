//! The recovery handler the controller attaches to its failures.
//!
//! Operations act on the shared [`SessionControl`] and probe the provider;
//! the controller picks the effects up on its next iteration.

use async_trait::async_trait;
use ironloop_core::{
    ErrorKind, HandlerOutcome, Operation, Provider, Recoverable, RecoveryError, RecoveryHandler,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::session::SessionControl;

pub struct SessionRecoveryHandler {
    session: Arc<SessionControl>,
    provider: Arc<dyn Provider>,
}

impl SessionRecoveryHandler {
    pub fn new(session: Arc<SessionControl>, provider: Arc<dyn Provider>) -> Self {
        Self { session, provider }
    }

    async fn provider_healthy(&self, operation: &Operation) -> Result<bool, RecoveryError> {
        self.provider
            .health_check()
            .await
            .map_err(|e| RecoveryError::OperationFailed {
                operation: operation.label().into(),
                reason: e.to_string(),
            })
    }

    async fn model_available(&self, operation: &Operation, model: &str) -> Result<bool, RecoveryError> {
        let models = self
            .provider
            .list_models()
            .await
            .map_err(|e| RecoveryError::OperationFailed {
                operation: operation.label().into(),
                reason: e.to_string(),
            })?;
        // An empty catalogue means the provider does not advertise models.
        Ok(models.is_empty() || models.iter().any(|m| m == model))
    }

    async fn perform(&self, operation: &Operation) -> Result<bool, RecoveryError> {
        match operation {
            Operation::Recover | Operation::HealthCheck => self.provider_healthy(operation).await,
            Operation::Degrade { level, actions } => {
                info!(level, ?actions, "Degrading session");
                self.session.apply_degradation(*level, actions);
                Ok(true)
            }
            Operation::SaveState => {
                self.session.save();
                Ok(true)
            }
            Operation::RestoreState => Ok(self.session.restore()),
            Operation::Restart => {
                info!("Restarting agent session");
                self.session.request_restart();
                Ok(true)
            }
            Operation::FindTargetAgent { agent_type } => Ok(!agent_type.trim().is_empty()),
            Operation::PrepareReassignment { .. } | Operation::PrepareModelSwitch { .. } => Ok(true),
            Operation::Reassign { agent_type } => {
                info!(agent_type = %agent_type, "Reassigning task");
                self.session.set_agent_type(agent_type.clone());
                Ok(true)
            }
            Operation::VerifyReassignment { agent_type } => Ok(self.session.agent_type() == *agent_type),
            Operation::FindFallbackModel { candidate, .. } => {
                self.model_available(operation, candidate).await
            }
            Operation::SwitchModel { model } => {
                info!(model = %model, "Switching model");
                self.session.set_model(model.clone());
                Ok(true)
            }
            Operation::VerifyModelSwitch { model } => Ok(self.session.model() == *model),
        }
    }
}

#[async_trait]
impl RecoveryHandler for SessionRecoveryHandler {
    /// Bad credentials and cancellations are not something a session can fix.
    fn can_handle(&self, error: &dyn Recoverable) -> bool {
        !matches!(error.kind(), ErrorKind::Authentication | ErrorKind::Cancelled)
    }

    async fn handle(&self, operation: &Operation) -> Result<HandlerOutcome, RecoveryError> {
        let started = Instant::now();
        let success = self.perform(operation).await?;
        debug!(operation = operation.label(), success, "Recovery operation finished");

        let outcome = if success {
            HandlerOutcome::succeeded("session", started.elapsed())
        } else {
            HandlerOutcome::failed("session", started.elapsed())
        };
        Ok(outcome)
    }
}

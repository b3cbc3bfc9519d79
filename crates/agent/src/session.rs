//! Mutable session settings shared by the controller and its recovery handler.
//!
//! Recovery operations change what the next iteration does (model, agent
//! type, restart, degradation) by writing here; the controller reads it at
//! the top of every iteration.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeSet;

/// Degradation action that compacts history before each model call.
pub const TRIM_HISTORY: &str = "trim_history";
/// Degradation action that stops non-essential telemetry.
pub const DISABLE_NON_CRITICAL: &str = "disable_non_critical_features";
/// Degradation action that implies both of the above.
pub const MINIMAL_MODE: &str = "minimal_mode";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionState {
    pub model: String,
    pub agent_type: String,
    pub degradation_level: usize,
    pub degradation_actions: BTreeSet<String>,
    pub restart_requested: bool,
}

/// What `save_state` preserves across a restart.
#[derive(Debug, Clone, PartialEq)]
struct Snapshot {
    degradation_level: usize,
    degradation_actions: BTreeSet<String>,
}

pub struct SessionControl {
    state: Mutex<SessionState>,
    snapshot: Mutex<Option<Snapshot>>,
}

impl SessionControl {
    pub fn new(model: impl Into<String>, agent_type: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(SessionState {
                model: model.into(),
                agent_type: agent_type.into(),
                degradation_level: 0,
                degradation_actions: BTreeSet::new(),
                restart_requested: false,
            }),
            snapshot: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state.lock().clone()
    }

    pub fn model(&self) -> String {
        self.state.lock().model.clone()
    }

    pub fn set_model(&self, model: impl Into<String>) {
        self.state.lock().model = model.into();
    }

    pub fn agent_type(&self) -> String {
        self.state.lock().agent_type.clone()
    }

    pub fn set_agent_type(&self, agent_type: impl Into<String>) {
        self.state.lock().agent_type = agent_type.into();
    }

    /// Ask the controller to restart the conversation. Clears degradation.
    pub fn request_restart(&self) {
        let mut state = self.state.lock();
        state.restart_requested = true;
        state.degradation_level = 0;
        state.degradation_actions.clear();
    }

    /// Consume a pending restart request.
    pub fn take_restart(&self) -> bool {
        std::mem::take(&mut self.state.lock().restart_requested)
    }

    /// Replace the active degradation actions.
    pub fn apply_degradation(&self, level: usize, actions: &[String]) {
        let mut state = self.state.lock();
        state.degradation_level = level;
        state.degradation_actions = actions.iter().cloned().collect();
    }

    fn action_active(&self, action: &str) -> bool {
        let state = self.state.lock();
        state.degradation_actions.contains(action) || state.degradation_actions.contains(MINIMAL_MODE)
    }

    pub fn trims_history(&self) -> bool {
        self.action_active(TRIM_HISTORY)
    }

    pub fn non_critical_disabled(&self) -> bool {
        self.action_active(DISABLE_NON_CRITICAL)
    }

    pub fn save(&self) {
        let state = self.state.lock();
        *self.snapshot.lock() = Some(Snapshot {
            degradation_level: state.degradation_level,
            degradation_actions: state.degradation_actions.clone(),
        });
    }

    /// Put back what `save` captured. Returns `false` when nothing was saved.
    pub fn restore(&self) -> bool {
        let Some(snapshot) = self.snapshot.lock().take() else {
            return false;
        };
        let mut state = self.state.lock();
        state.degradation_level = snapshot.degradation_level;
        state.degradation_actions = snapshot.degradation_actions;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restart_request_is_consumed_once() {
        let session = SessionControl::new("gpt-4o", "general");
        session.request_restart();
        assert!(session.take_restart());
        assert!(!session.take_restart());
    }

    #[test]
    fn minimal_mode_implies_every_action() {
        let session = SessionControl::new("gpt-4o", "general");
        assert!(!session.trims_history());
        session.apply_degradation(3, &[MINIMAL_MODE.to_string()]);
        assert!(session.trims_history());
        assert!(session.non_critical_disabled());
        assert_eq!(session.state().degradation_level, 3);
    }

    #[test]
    fn save_restore_survives_restart() {
        let session = SessionControl::new("gpt-4o", "general");
        session.apply_degradation(1, &[TRIM_HISTORY.to_string()]);
        session.save();
        session.request_restart();
        assert!(!session.trims_history());

        assert!(session.restore());
        assert!(session.trims_history());
        assert!(!session.restore());
    }

    #[test]
    fn model_and_agent_switches() {
        let session = SessionControl::new("gpt-4o", "general");
        session.set_model("gpt-4o-mini");
        session.set_agent_type("lightweight");
        let state = session.state();
        assert_eq!(state.model, "gpt-4o-mini");
        assert_eq!(state.agent_type, "lightweight");
    }
}

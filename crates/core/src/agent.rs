//! Agent profile and task bookkeeping types.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who the agent is. Rendered into the system message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProfile {
    /// Stable identifier used in recovery contexts
    pub id: String,

    pub name: String,

    pub role: String,

    pub goal: String,

    #[serde(default)]
    pub background: String,

    /// Agent type used by reassignment rules (e.g. "general", "lightweight")
    #[serde(default = "default_agent_type")]
    pub agent_type: String,
}

fn default_agent_type() -> String {
    "general".into()
}

impl AgentProfile {
    pub fn new(name: impl Into<String>, role: impl Into<String>, goal: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            role: role.into(),
            goal: goal.into(),
            background: String::new(),
            agent_type: default_agent_type(),
        }
    }

    pub fn with_background(mut self, background: impl Into<String>) -> Self {
        self.background = background.into();
        self
    }
}

impl Default for AgentProfile {
    fn default() -> Self {
        Self::new(
            "Agent",
            "Autonomous assistant",
            "Complete the assigned task accurately",
        )
    }
}

/// Lifecycle of a task as seen by the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Todo,
    Doing,
    /// The loop gave up (max iterations, unrecovered error, cancellation)
    Blocked,
    Done,
}

/// A unit of work assigned to an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,

    pub description: String,

    #[serde(default)]
    pub expected_output: String,

    #[serde(default)]
    pub status: TaskStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

impl Task {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            description: description.into(),
            expected_output: String::new(),
            status: TaskStatus::Todo,
            result: None,
        }
    }

    pub fn with_expected_output(mut self, expected: impl Into<String>) -> Self {
        self.expected_output = expected.into();
        self
    }
}

//! Loop state values.
//!
//! [`IterationState`] is passed by value through each loop step; the
//! controller only ever replaces it with the value a step returns.

use ironloop_core::ParsedOutput;
use serde::{Deserialize, Serialize};

use crate::classifier::ActionKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoopStatus {
    Starting,
    Thinking,
    Thought,
    SelfQuestion,
    ExecutingAction,
    Observation,
    FinalAnswer,
    WeirdOutput,
    IssuesParsingOutput,
    TaskCompleted,
    MaxIterationsError,
    AgenticLoopError,
}

impl LoopStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::TaskCompleted | Self::MaxIterationsError | Self::AgenticLoopError
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "STARTING",
            Self::Thinking => "THINKING",
            Self::Thought => "THOUGHT",
            Self::SelfQuestion => "SELF_QUESTION",
            Self::ExecutingAction => "EXECUTING_ACTION",
            Self::Observation => "OBSERVATION",
            Self::FinalAnswer => "FINAL_ANSWER",
            Self::WeirdOutput => "WEIRD_OUTPUT",
            Self::IssuesParsingOutput => "ISSUES_PARSING_OUTPUT",
            Self::TaskCompleted => "TASK_COMPLETED",
            Self::MaxIterationsError => "MAX_ITERATIONS_ERROR",
            Self::AgenticLoopError => "AGENTIC_LOOP_ERROR",
        }
    }
}

impl std::fmt::Display for LoopStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ActionKind> for LoopStatus {
    fn from(kind: ActionKind) -> Self {
        match kind {
            ActionKind::FinalAnswer => Self::FinalAnswer,
            ActionKind::Thought => Self::Thought,
            ActionKind::SelfQuestion => Self::SelfQuestion,
            ActionKind::ExecutingAction => Self::ExecutingAction,
            ActionKind::Observation => Self::Observation,
            ActionKind::WeirdOutput => Self::WeirdOutput,
            ActionKind::IssuesParsingOutput => Self::IssuesParsingOutput,
        }
    }
}

/// Per-task loop state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IterationState {
    pub task_id: String,
    /// 0-based; never exceeds `max_iterations`
    pub iteration: u32,
    pub max_iterations: u32,
    pub status: LoopStatus,
    /// Sent to the model on the next turn
    pub last_feedback_message: String,
    pub final_answer: Option<String>,
}

impl IterationState {
    pub fn new(task_id: impl Into<String>, max_iterations: u32, initial_feedback: String) -> Self {
        Self {
            task_id: task_id.into(),
            iteration: 0,
            max_iterations: max_iterations.max(1),
            status: LoopStatus::Starting,
            last_feedback_message: initial_feedback,
            final_answer: None,
        }
    }

    pub fn with_status(self, status: LoopStatus) -> Self {
        Self { status, ..self }
    }

    /// Replace the pending feedback without counting an iteration.
    pub fn with_feedback(self, feedback: String) -> Self {
        Self {
            last_feedback_message: feedback,
            ..self
        }
    }

    /// Record a non-terminal step's outcome and count the iteration.
    pub fn advance(self, status: LoopStatus, feedback: String) -> Self {
        Self {
            status,
            last_feedback_message: feedback,
            ..self
        }
        .next_iteration()
    }

    /// Count the iteration without changing the pending feedback.
    pub fn next_iteration(self) -> Self {
        let iteration = (self.iteration + 1).min(self.max_iterations);
        Self { iteration, ..self }
    }

    pub fn is_exhausted(&self) -> bool {
        self.iteration >= self.max_iterations
    }

    /// Whether this iteration should demand a final answer.
    pub fn is_final_call(&self) -> bool {
        self.max_iterations >= 2 && self.iteration == self.max_iterations - 2
    }

    pub fn complete(self, answer: String) -> Self {
        Self {
            status: LoopStatus::TaskCompleted,
            final_answer: Some(answer),
            ..self
        }
        .next_iteration()
    }

    pub fn fail(self, status: LoopStatus) -> Self {
        Self { status, ..self }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopMetadata {
    pub iterations: u32,
    pub max_iterations: u32,
}

/// What `run` hands back. Exactly one of `result` and `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ParsedOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub status: LoopStatus,
    pub metadata: LoopMetadata,
}

impl LoopResult {
    pub fn is_success(&self) -> bool {
        self.status == LoopStatus::TaskCompleted
    }
}

//! The agent execution loop.
//!
//! The agent follows a **Think → Act → Observe** cycle, one model call per
//! iteration:
//!
//! 1. **Send feedback** (initial task, tool result, or correction) to the model
//! 2. **Parse** the raw output into a [`ParsedOutput`](ironloop_core::ParsedOutput)
//! 3. **Classify** it into an [`ActionKind`]
//! 4. **Dispatch**: run a tool, render the next feedback message, or finish
//!
//! The loop ends with a final answer, when the iteration budget runs out, or
//! on an error the recovery manager could not absorb.

pub mod classifier;
pub mod controller;
pub mod parser;
pub mod recovery_handler;
pub mod scripted;
pub mod session;
pub mod state;
pub mod templates;
pub mod tool_invoker;

#[cfg(test)]
mod test_helpers;

pub use classifier::{ActionKind, classify};
pub use controller::AgentLoopController;
pub use parser::JsonOutputParser;
pub use recovery_handler::SessionRecoveryHandler;
pub use scripted::{ScriptStep, ScriptedProvider};
pub use session::{SessionControl, SessionState};
pub use state::{IterationState, LoopMetadata, LoopResult, LoopStatus};
pub use templates::{DefaultTemplates, FeedbackTemplates};
pub use tool_invoker::ToolInvoker;

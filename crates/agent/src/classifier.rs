//! Maps a parsed model turn to what the loop does next.

use ironloop_core::ParsedOutput;
use serde::Serialize;

/// The `action` value the model uses to ask itself a question.
pub const SELF_QUESTION_ACTION: &str = "self_question";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    FinalAnswer,
    Thought,
    SelfQuestion,
    ExecutingAction,
    Observation,
    WeirdOutput,
    IssuesParsingOutput,
}

fn present(field: &Option<String>) -> bool {
    field.as_deref().is_some_and(|s| !s.trim().is_empty())
}

/// Any non-null answer counts except a blank string. Falsy JSON such as
/// `false` or `0` is still an answer and is returned as its JSON text.
fn has_final_answer(parsed: &ParsedOutput) -> bool {
    match &parsed.final_answer {
        None => false,
        Some(serde_json::Value::String(s)) => !s.trim().is_empty(),
        Some(_) => true,
    }
}

/// Classify one parsed turn. First match wins:
/// parse failure, final answer, self-question, action, observation.
/// Anything else is weird output.
pub fn classify(parsed: Option<&ParsedOutput>) -> ActionKind {
    let Some(parsed) = parsed else {
        return ActionKind::IssuesParsingOutput;
    };

    if has_final_answer(parsed) {
        return ActionKind::FinalAnswer;
    }

    if parsed.action.as_deref() == Some(SELF_QUESTION_ACTION) {
        return if present(&parsed.thought) {
            ActionKind::Thought
        } else {
            ActionKind::SelfQuestion
        };
    }

    if present(&parsed.action) {
        return ActionKind::ExecutingAction;
    }

    if present(&parsed.observation) {
        return ActionKind::Observation;
    }

    ActionKind::WeirdOutput
}

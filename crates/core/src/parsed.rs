//! Parsed model output and the parser seam.

use serde::{Deserialize, Serialize};

/// Immutable snapshot of one model turn after parsing.
///
/// Field names on the wire are camelCase, matching what the feedback
/// templates ask the model to produce.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedOutput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_input: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observation: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_final_answer_ready: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_answer: Option<serde_json::Value>,
}

impl ParsedOutput {
    /// The final answer as text. String answers are returned as-is, any
    /// other JSON value is stringified.
    pub fn final_answer_text(&self) -> Option<String> {
        self.final_answer.as_ref().map(|answer| match answer {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }
}

/// Turns raw model text into a [`ParsedOutput`].
///
/// `None` signals a parse failure; the loop answers it with an
/// invalid-output feedback message instead of treating it as an error.
pub trait OutputParser: Send + Sync {
    fn parse(&self, text: &str) -> Option<ParsedOutput>;
}

//! Feedback messages sent to the model between iterations.
//!
//! Every method is pure. Hosts that want different wording implement
//! [`FeedbackTemplates`] and hand it to the controller.

use ironloop_core::{AgentProfile, ParsedOutput, Task, ToolDefinition};

pub trait FeedbackTemplates: Send + Sync {
    /// System prompt: who the agent is, which tools exist, and the reply format.
    fn system_message(&self, profile: &AgentProfile, tools: &[ToolDefinition]) -> String;

    /// First user turn for a task.
    fn initial_message(&self, task: &Task) -> String;

    /// The last reply could not be parsed.
    fn invalid_json(&self) -> String;

    /// The model reasoned about a self-question.
    fn thought(&self, thought: &str) -> String;

    /// The model asked itself a question without reasoning about it.
    fn self_question(&self, parsed: &ParsedOutput) -> String;

    fn tool_result(&self, tool_name: &str, result: &str) -> String;

    fn tool_error(&self, tool_name: &str, error: &str) -> String;

    fn tool_not_exist(&self, tool_name: &str, available: &[String]) -> String;

    fn observation(&self, observation: &str) -> String;

    /// The reply parsed but matched no known shape.
    fn weird_output(&self) -> String;

    /// The agent is about to run out of iterations.
    fn force_final_answer(&self) -> String;
}

/// JSON-reply templates used when the host supplies none.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultTemplates;

const REPLY_FORMAT: &str = r#"Reply with exactly one JSON object and nothing else. Use one of these shapes:
{"thought": "...", "action": "<tool name>", "actionInput": {...}}
{"thought": "...", "action": "self_question", "actionInput": {"question": "..."}}
{"observation": "..."}
{"thought": "...", "isFinalAnswerReady": true, "finalAnswer": ...}"#;

impl FeedbackTemplates for DefaultTemplates {
    fn system_message(&self, profile: &AgentProfile, tools: &[ToolDefinition]) -> String {
        let mut msg = format!(
            "You are {}, {}.\nYour goal: {}\n",
            profile.name, profile.role, profile.goal
        );
        if !profile.background.is_empty() {
            msg.push_str(&format!("Background: {}\n", profile.background));
        }

        if tools.is_empty() {
            msg.push_str("\nYou have no tools. Answer from your own knowledge.\n");
        } else {
            msg.push_str("\nAvailable tools:\n");
            for tool in tools {
                msg.push_str(&format!("- {}: {} (input schema: {})\n", tool.name, tool.description, tool.parameters));
            }
        }

        msg.push('\n');
        msg.push_str(REPLY_FORMAT);
        msg
    }

    fn initial_message(&self, task: &Task) -> String {
        let mut msg = format!("Task: {}\n", task.description);
        if !task.expected_output.is_empty() {
            msg.push_str(&format!("Expected output: {}\n", task.expected_output));
        }
        msg.push_str("Think step by step and use tools when they help.");
        msg
    }

    fn invalid_json(&self) -> String {
        format!("Your last reply was not valid JSON in the expected format.\n{REPLY_FORMAT}")
    }

    fn thought(&self, thought: &str) -> String {
        format!("You reasoned: \"{thought}\". Continue: use a tool, observe, or give your final answer.")
    }

    fn self_question(&self, parsed: &ParsedOutput) -> String {
        let question = parsed
            .action_input
            .as_ref()
            .and_then(|input| input.get("question").and_then(|q| q.as_str()).map(str::to_string).or_else(|| Some(input.to_string())))
            .unwrap_or_else(|| "your own question".into());
        format!("Answer {question} yourself, then decide on the next step.")
    }

    fn tool_result(&self, tool_name: &str, result: &str) -> String {
        format!("Tool '{tool_name}' returned:\n{result}\nUse this result to continue.")
    }

    fn tool_error(&self, tool_name: &str, error: &str) -> String {
        format!("Tool '{tool_name}' failed: {error}\nFix the input or try another approach.")
    }

    fn tool_not_exist(&self, tool_name: &str, available: &[String]) -> String {
        if available.is_empty() {
            format!("Tool '{tool_name}' does not exist and no tools are available. Continue without tools.")
        } else {
            format!(
                "Tool '{tool_name}' does not exist. Available tools: {}.",
                available.join(", ")
            )
        }
    }

    fn observation(&self, observation: &str) -> String {
        format!("Noted observation: \"{observation}\". What is your next step?")
    }

    fn weird_output(&self) -> String {
        format!("Your reply did not match any expected shape.\n{REPLY_FORMAT}")
    }

    fn force_final_answer(&self) -> String {
        "You are almost out of iterations. Give your final answer now as \
         {\"isFinalAnswerReady\": true, \"finalAnswer\": ...}."
            .into()
    }
}

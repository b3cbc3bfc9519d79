//! The agent loop controller.
//!
//! One `run` drives one task through bounded Think → Act → Observe
//! iterations. Each step takes the current [`IterationState`] and returns
//! the next one; history, telemetry and recovery stay at this boundary.

use chrono::Utc;
use ironloop_config::{AgentLoopConfig, AppConfig};
use ironloop_core::{
    AgentFailure, AgentProfile, Conversation, DomainEvent, Error, ErrorContext, Message,
    OutputParser, ParsedOutput, Provider, ProviderError, ProviderRequest, ProviderResponse,
    Recoverable, RecoveryHandler, Task, TaskStatus, TelemetrySink, ToolRegistry, TracingSink,
};
use ironloop_recovery::RecoveryManager;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::classifier::{ActionKind, classify};
use crate::parser::JsonOutputParser;
use crate::recovery_handler::SessionRecoveryHandler;
use crate::session::SessionControl;
use crate::state::{IterationState, LoopMetadata, LoopResult, LoopStatus};
use crate::templates::{DefaultTemplates, FeedbackTemplates};
use crate::tool_invoker::ToolInvoker;

/// History kept when `trim_history` is active: system and task prompt.
const TRIM_HEAD: usize = 2;
/// Most recent turns kept when trimming. Even, so turns keep alternating.
const TRIM_TAIL: usize = 4;

/// What one iteration produced.
enum Step {
    Continue(IterationState),
    Finished(IterationState, ParsedOutput),
}

pub struct AgentLoopController {
    provider: Arc<dyn Provider>,
    tools: Arc<ToolRegistry>,
    parser: Arc<dyn OutputParser>,
    templates: Arc<dyn FeedbackTemplates>,
    sink: Arc<dyn TelemetrySink>,
    recovery: Option<Arc<RecoveryManager>>,
    handler: Arc<dyn RecoveryHandler>,
    session: Arc<SessionControl>,
    profile: AgentProfile,
    config: AgentLoopConfig,
    temperature: f32,
    max_tokens: Option<u32>,
}

impl AgentLoopController {
    /// A controller with the JSON parser, default templates, tracing
    /// telemetry and no recovery manager.
    pub fn new(provider: Arc<dyn Provider>, tools: Arc<ToolRegistry>, config: &AppConfig) -> Self {
        let profile = AgentProfile::default();
        let session = Arc::new(SessionControl::new(config.model.clone(), profile.agent_type.clone()));
        let handler = Arc::new(SessionRecoveryHandler::new(session.clone(), provider.clone()));

        Self {
            provider,
            tools,
            parser: Arc::new(JsonOutputParser),
            templates: Arc::new(DefaultTemplates),
            sink: Arc::new(TracingSink),
            recovery: None,
            handler,
            session,
            profile,
            config: config.agent.clone(),
            temperature: config.temperature,
            max_tokens: Some(config.max_tokens),
        }
    }

    pub fn with_parser(mut self, parser: Arc<dyn OutputParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn with_templates(mut self, templates: Arc<dyn FeedbackTemplates>) -> Self {
        self.templates = templates;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.sink = sink;
        self
    }

    /// Route failures through a shared recovery manager.
    pub fn with_recovery(mut self, manager: Arc<RecoveryManager>) -> Self {
        self.recovery = Some(manager);
        self
    }

    /// Replace the handler attached to failures handed to the manager.
    pub fn with_recovery_handler(mut self, handler: Arc<dyn RecoveryHandler>) -> Self {
        self.handler = handler;
        self
    }

    pub fn with_profile(mut self, profile: AgentProfile) -> Self {
        self.session.set_agent_type(profile.agent_type.clone());
        self.profile = profile;
        self
    }

    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.config.max_iterations = max;
        self
    }

    pub fn with_force_final_answer(mut self, enabled: bool) -> Self {
        self.config.force_final_answer = enabled;
        self
    }

    pub fn with_llm_timeout(mut self, timeout: Duration) -> Self {
        self.config.llm_timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.config.tool_timeout_secs = timeout.as_secs().max(1);
        self
    }

    /// Session settings shared with the recovery handler.
    pub fn session(&self) -> Arc<SessionControl> {
        self.session.clone()
    }

    pub async fn run(&self, task: &mut Task) -> LoopResult {
        self.run_with_cancel(task, CancellationToken::new()).await
    }

    /// Run `task` to a terminal state. Never fails: every outcome is a
    /// [`LoopResult`] with either `result` or `error` set.
    pub async fn run_with_cancel(&self, task: &mut Task, cancel: CancellationToken) -> LoopResult {
        task.status = TaskStatus::Doing;

        let system = self.templates.system_message(&self.profile, &self.tools.definitions());
        let initial = self.templates.initial_message(task);
        let mut conversation = Conversation::new();
        conversation.push(Message::system(system));

        let invoker = ToolInvoker::new(self.templates.clone(), self.sink.clone())
            .with_timeout(Duration::from_secs(self.config.tool_timeout_secs))
            .with_max_event_chars(self.config.max_event_chars);

        let mut state = IterationState::new(task.id.clone(), self.config.max_iterations, initial.clone());
        let mut consecutive_failures = 0u32;

        info!(
            task_id = %task.id,
            max_iterations = state.max_iterations,
            model = %self.session.model(),
            "Starting agent loop"
        );
        self.emit_state(&state);

        loop {
            if state.is_exhausted() {
                let reason = format!(
                    "Maximum iterations ({}) reached without a final answer",
                    state.max_iterations
                );
                return self.finish(task, state.fail(LoopStatus::MaxIterationsError), None, Some(reason));
            }

            state = self.apply_session_effects(state, &mut conversation, &initial);
            if self.config.force_final_answer && state.is_final_call() {
                debug!(task_id = %state.task_id, iteration = state.iteration, "Forcing final answer");
                state = state.with_feedback(self.templates.force_final_answer());
            }

            state = state.with_status(LoopStatus::Thinking);
            self.emit_state(&state);

            match self.step(&state, &mut conversation, &invoker, &cancel).await {
                Ok(Step::Continue(next)) => {
                    consecutive_failures = 0;
                    state = next;
                    self.emit_state(&state);
                }
                Ok(Step::Finished(done, parsed)) => {
                    return self.finish(task, done, Some(parsed), None);
                }
                Err(Error::Cancelled) => {
                    info!(task_id = %state.task_id, "Task cancelled");
                    let failed = state.fail(LoopStatus::AgenticLoopError);
                    return self.finish(task, failed, None, Some("task cancelled".into()));
                }
                Err(e @ Error::Provider(_)) => {
                    warn!(task_id = %state.task_id, iteration = state.iteration, error = %e, "Language model call failed");
                    let recovered = self
                        .recover(&e, &state, consecutive_failures, "invoke_llm", &cancel)
                        .await;
                    consecutive_failures += 1;
                    if !recovered {
                        let failed = state.fail(LoopStatus::AgenticLoopError);
                        return self.finish(task, failed, None, Some(e.to_string()));
                    }
                    // Re-send the same feedback on the next iteration.
                    state = state.next_iteration();
                }
                Err(e) => {
                    error!(task_id = %state.task_id, iteration = state.iteration, error = %e, "Agent loop error");
                    self.recover(&e, &state, consecutive_failures, "agentic_loop", &cancel)
                        .await;
                    let failed = state.fail(LoopStatus::AgenticLoopError);
                    return self.finish(task, failed, None, Some(e.to_string()));
                }
            }
        }
    }

    /// One model turn: send the feedback, parse, classify and dispatch.
    async fn step(
        &self,
        state: &IterationState,
        conversation: &mut Conversation,
        invoker: &ToolInvoker,
        cancel: &CancellationToken,
    ) -> Result<Step, Error> {
        conversation.push(
            Message::user(state.last_feedback_message.clone()).with_metadata("iteration", state.iteration),
        );
        if self.session.trims_history() {
            let dropped = conversation.compact(TRIM_HEAD, TRIM_TAIL);
            if dropped > 0 {
                debug!(task_id = %state.task_id, dropped, "Trimmed conversation history");
            }
        }

        let response = match self.invoke_llm(&state.task_id, conversation, cancel).await {
            Ok(response) => response,
            Err(e) => {
                // The failed turn never reached the model.
                conversation.pop();
                return Err(e);
            }
        };
        conversation.push(
            Message::assistant(response.content.clone()).with_metadata("iteration", state.iteration),
        );

        let parsed = self.parser.parse(&response.content);
        let kind = classify(parsed.as_ref());
        debug!(task_id = %state.task_id, iteration = state.iteration, ?kind, "Classified model output");

        let Some(parsed) = parsed else {
            return Ok(Step::Continue(
                state.clone().advance(LoopStatus::IssuesParsingOutput, self.templates.invalid_json()),
            ));
        };

        let feedback = match kind {
            ActionKind::FinalAnswer => {
                let answer = parsed.final_answer_text().unwrap_or_default();
                let mut result = parsed;
                result.final_answer = Some(serde_json::Value::String(answer.clone()));
                self.emit_state(&state.clone().with_status(LoopStatus::FinalAnswer));
                return Ok(Step::Finished(state.clone().complete(answer), result));
            }
            ActionKind::Thought => self.templates.thought(parsed.thought.as_deref().unwrap_or_default()),
            ActionKind::SelfQuestion => self.templates.self_question(&parsed),
            ActionKind::Observation => {
                self.templates.observation(parsed.observation.as_deref().unwrap_or_default())
            }
            ActionKind::ExecutingAction => {
                self.execute_action(&state.task_id, &parsed, invoker, cancel).await?
            }
            ActionKind::WeirdOutput => self.templates.weird_output(),
            ActionKind::IssuesParsingOutput => self.templates.invalid_json(),
        };

        Ok(Step::Continue(state.clone().advance(kind.into(), feedback)))
    }

    async fn execute_action(
        &self,
        task_id: &str,
        parsed: &ParsedOutput,
        invoker: &ToolInvoker,
        cancel: &CancellationToken,
    ) -> Result<String, Error> {
        let name = parsed.action.as_deref().unwrap_or_default();
        let Some(tool) = self.tools.get(name) else {
            warn!(task_id, tool = name, "Model asked for an unknown tool");
            let available: Vec<String> = self.tools.names().into_iter().map(String::from).collect();
            return Ok(self.templates.tool_not_exist(name, &available));
        };

        let input = parsed
            .action_input
            .clone()
            .unwrap_or_else(|| serde_json::Value::Object(serde_json::Map::new()));
        invoker.invoke(task_id, tool, input, cancel).await
    }

    async fn invoke_llm(
        &self,
        task_id: &str,
        conversation: &Conversation,
        cancel: &CancellationToken,
    ) -> Result<ProviderResponse, Error> {
        let model = self.session.model();
        let timeout = Duration::from_secs(self.config.llm_timeout_secs);
        let request = ProviderRequest {
            model: model.clone(),
            messages: conversation.messages.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stop: self.config.stop.clone(),
            timeout_ms: timeout.as_millis() as u64,
        };

        let started = Instant::now();
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            completed = tokio::time::timeout(timeout, self.provider.complete(request)) => match completed {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout(format!(
                    "no response from '{model}' within {}s",
                    timeout.as_secs()
                ))),
            },
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        let tokens_used = result
            .as_ref()
            .ok()
            .and_then(|r| r.usage)
            .map_or(0, |u| u.total_tokens);
        self.sink.emit(DomainEvent::LlmInvoked {
            task_id: task_id.to_string(),
            model,
            tokens_used,
            duration_ms,
            success: result.is_ok(),
            timestamp: Utc::now(),
        });

        result.map_err(Error::from)
    }

    /// Hand `error` to the recovery manager. Returns whether it recovered.
    async fn recover(
        &self,
        error: &Error,
        state: &IterationState,
        retry_count: u32,
        operation: &str,
        cancel: &CancellationToken,
    ) -> bool {
        let Some(manager) = &self.recovery else {
            debug!(task_id = %state.task_id, "No recovery manager configured");
            return false;
        };

        let failure = AgentFailure::from_error(error).with_handler(self.handler.clone());
        let context = ErrorContext::for_error(&failure, "agent_loop", operation)
            .with_retry_count(retry_count)
            .with_agent(self.profile.id.clone())
            .with_model(self.session.model());
        let failure: Arc<dyn Recoverable> = Arc::new(failure);

        let result = manager.handle_with_cancel(failure, context, cancel.clone()).await;
        if result.successful {
            info!(
                task_id = %state.task_id,
                strategy = ?result.strategy(),
                attempts = result.attempts(),
                "Recovered from failure"
            );
        } else {
            warn!(
                task_id = %state.task_id,
                reason = result.error.as_deref().unwrap_or("unknown"),
                "Recovery failed"
            );
        }
        result.successful
    }

    /// Pick up what recovery changed since the last iteration.
    fn apply_session_effects(
        &self,
        state: IterationState,
        conversation: &mut Conversation,
        initial: &str,
    ) -> IterationState {
        if !self.session.take_restart() {
            return state;
        }
        info!(task_id = %state.task_id, iteration = state.iteration, "Restarting conversation");
        conversation.reset_to(1);
        state.with_feedback(initial.to_string())
    }

    fn emit_state(&self, state: &IterationState) {
        if self.session.non_critical_disabled() {
            return;
        }
        self.sink.emit(DomainEvent::LoopStateChanged {
            task_id: state.task_id.clone(),
            iteration: state.iteration,
            status: state.status.as_str().to_string(),
            timestamp: Utc::now(),
        });
    }

    fn finish(
        &self,
        task: &mut Task,
        state: IterationState,
        result: Option<ParsedOutput>,
        error: Option<String>,
    ) -> LoopResult {
        if state.status == LoopStatus::TaskCompleted {
            task.status = TaskStatus::Done;
            task.result = state.final_answer.clone();
            info!(task_id = %state.task_id, iterations = state.iteration, "Task completed");
        } else {
            task.status = TaskStatus::Blocked;
            warn!(
                task_id = %state.task_id,
                status = %state.status,
                iterations = state.iteration,
                error = error.as_deref().unwrap_or_default(),
                "Task blocked"
            );
        }

        self.emit_state(&state);
        self.sink.emit(DomainEvent::LoopFinished {
            task_id: state.task_id.clone(),
            status: state.status.as_str().to_string(),
            iterations: state.iteration,
            error: error.clone(),
            timestamp: Utc::now(),
        });

        LoopResult {
            result,
            error,
            status: state.status,
            metadata: LoopMetadata {
                iterations: state.iteration,
                max_iterations: state.max_iterations,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::{ScriptStep, ScriptedProvider};
    use crate::session::{DISABLE_NON_CRITICAL, TRIM_HISTORY};
    use crate::test_helpers::*;
    use async_trait::async_trait;
    use ironloop_recovery::{FixedResourceMonitor, ResourceUsage};

    const FINAL_42: &str = r#"{"thought": "done", "isFinalAnswerReady": true, "finalAnswer": "42.00"}"#;
    const THINKING: &str = r#"{"observation": "still looking"}"#;

    fn registry() -> Arc<ToolRegistry> {
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(LookupPriceTool));
        tools.register(Arc::new(FailingTool));
        tools.register(Arc::new(PanickingTool));
        Arc::new(tools)
    }

    fn controller(provider: Arc<ScriptedProvider>, sink: Arc<RecordingSink>) -> AgentLoopController {
        AgentLoopController::new(provider, registry(), &AppConfig::default()).with_sink(sink)
    }

    fn manager(sink: Arc<RecordingSink>) -> Arc<RecoveryManager> {
        let config = AppConfig::default();
        let monitor = Arc::new(FixedResourceMonitor::new(ResourceUsage::default()));
        Arc::new(RecoveryManager::from_config(&config.recovery, sink, monitor).unwrap())
    }

    fn last_user_message(request: &ProviderRequest) -> String {
        request.messages.last().map(|m| m.content.clone()).unwrap_or_default()
    }

    #[tokio::test]
    async fn unparsable_output_exhausts_iterations() {
        let provider = Arc::new(ScriptedProvider::repeating("this is not json"));
        let sink = Arc::new(RecordingSink::default());
        let mut task = Task::new("Price X1");

        let result = controller(provider.clone(), sink.clone())
            .with_max_iterations(3)
            .with_force_final_answer(false)
            .run(&mut task)
            .await;

        assert_eq!(result.status, LoopStatus::MaxIterationsError);
        assert!(result.result.is_none());
        assert!(result.error.is_some());
        assert_eq!(result.metadata.iterations, 3);
        assert_eq!(provider.call_count(), 3);
        assert_eq!(task.status, TaskStatus::Blocked);

        let parse_issues = sink
            .statuses()
            .iter()
            .filter(|s| *s == "ISSUES_PARSING_OUTPUT")
            .count();
        assert_eq!(parse_issues, 3);
        // Turns two and three carry the invalid-output feedback.
        for request in &provider.requests()[1..] {
            assert_eq!(last_user_message(request), DefaultTemplates.invalid_json());
        }
    }

    #[tokio::test]
    async fn tool_result_feeds_next_turn() {
        let provider = Arc::new(ScriptedProvider::from_texts([
            r#"{"thought": "need price", "action": "lookupPrice", "actionInput": {"sku": "X1"}}"#,
            FINAL_42,
        ]));
        let sink = Arc::new(RecordingSink::default());
        let mut task = Task::new("Price X1");

        let result = controller(provider.clone(), sink.clone()).run(&mut task).await;

        assert!(result.is_success());
        assert_eq!(result.metadata.iterations, 2);
        let second = &provider.requests()[1];
        assert!(last_user_message(second).contains("42.00"));

        let executed = sink.events().into_iter().find_map(|e| match e {
            DomainEvent::LoopStateChanged { status, iteration, .. } if status == "EXECUTING_ACTION" => {
                Some(iteration)
            }
            _ => None,
        });
        assert_eq!(executed, Some(1));
        assert!(sink.events().iter().any(|e| matches!(e, DomainEvent::ToolExecuted { success: true, .. })));
    }

    #[tokio::test]
    async fn object_final_answer_is_stringified() {
        let provider = Arc::new(ScriptedProvider::from_texts([r#"{"finalAnswer": {"price": 42}}"#]));
        let mut task = Task::new("Price X1");

        let result = controller(provider, Arc::new(RecordingSink::default()))
            .run(&mut task)
            .await;

        assert_eq!(result.status, LoopStatus::TaskCompleted);
        assert!(result.error.is_none());
        let answer = result.result.unwrap().final_answer.unwrap();
        assert_eq!(answer, serde_json::Value::String(r#"{"price":42}"#.into()));
        assert_eq!(task.status, TaskStatus::Done);
        assert_eq!(task.result.as_deref(), Some(r#"{"price":42}"#));
        assert_eq!(result.metadata.iterations, 1);
    }

    #[tokio::test]
    async fn unknown_tool_and_tool_errors_are_feedback() {
        let provider = Arc::new(ScriptedProvider::from_texts([
            r#"{"action": "lookupprice", "actionInput": {"sku": "X1"}}"#,
            r#"{"action": "checkStock", "actionInput": {"sku": "X1"}}"#,
            FINAL_42,
        ]));
        let mut task = Task::new("Price X1");

        let result = controller(provider.clone(), Arc::new(RecordingSink::default()))
            .run(&mut task)
            .await;

        assert!(result.is_success());
        let requests = provider.requests();
        assert!(last_user_message(&requests[1]).contains("does not exist"));
        assert!(last_user_message(&requests[2]).contains("warehouse offline"));
    }

    #[tokio::test]
    async fn forces_final_answer_two_before_limit() {
        let provider = Arc::new(ScriptedProvider::repeating(THINKING));
        let mut task = Task::new("Price X1");

        let result = controller(provider.clone(), Arc::new(RecordingSink::default()))
            .with_max_iterations(4)
            .run(&mut task)
            .await;

        assert_eq!(result.status, LoopStatus::MaxIterationsError);
        let requests = provider.requests();
        assert_eq!(requests.len(), 4);
        assert_eq!(last_user_message(&requests[2]), DefaultTemplates.force_final_answer());
        assert_ne!(last_user_message(&requests[1]), DefaultTemplates.force_final_answer());
    }

    #[tokio::test]
    async fn never_exceeds_iteration_budget() {
        for max in 1..=5 {
            let provider = Arc::new(ScriptedProvider::repeating(THINKING));
            let mut task = Task::new("loop");
            let result = controller(provider.clone(), Arc::new(RecordingSink::default()))
                .with_max_iterations(max)
                .run(&mut task)
                .await;
            assert_eq!(provider.call_count(), max as usize);
            assert_eq!(result.metadata.iterations, max);
        }
    }

    #[tokio::test]
    async fn llm_error_without_recovery_blocks_task() {
        let provider = Arc::new(ScriptedProvider::new(vec![ScriptStep::Error(ProviderError::Network(
            "connection reset".into(),
        ))]));
        let sink = Arc::new(RecordingSink::default());
        let mut task = Task::new("Price X1");

        let result = controller(provider, sink.clone()).run(&mut task).await;

        assert_eq!(result.status, LoopStatus::AgenticLoopError);
        assert!(result.error.unwrap().contains("connection reset"));
        assert_eq!(task.status, TaskStatus::Blocked);
        assert!(sink.events().iter().any(|e| matches!(e, DomainEvent::LlmInvoked { success: false, .. })));
        assert!(sink.events().iter().any(|e| matches!(e, DomainEvent::LoopFinished { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn network_error_is_retried_and_loop_continues() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            ScriptStep::Error(ProviderError::Network("connection reset".into())),
            ScriptStep::Text(FINAL_42.into()),
        ]));
        let sink = Arc::new(RecordingSink::default());
        let manager = manager(sink.clone());
        let mut task = Task::new("Price X1");

        let result = controller(provider.clone(), sink.clone())
            .with_recovery(manager.clone())
            .run(&mut task)
            .await;

        assert!(result.is_success());
        assert_eq!(result.metadata.iterations, 2);
        // The failed turn was popped and the same feedback re-sent.
        let requests = provider.requests();
        assert_eq!(requests[0].messages.len(), requests[1].messages.len());
        assert_eq!(last_user_message(&requests[0]), last_user_message(&requests[1]));

        let metrics = manager.metrics();
        assert_eq!(metrics.successful_recoveries, 1);
        assert!(metrics.strategies.contains_key("retry"));
    }

    #[tokio::test]
    async fn missing_model_switches_to_fallback() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            ScriptStep::Error(ProviderError::ModelNotFound("gpt-4o".into())),
            ScriptStep::Text(FINAL_42.into()),
        ]));
        let sink = Arc::new(RecordingSink::default());
        let controller = controller(provider.clone(), sink.clone()).with_recovery(manager(sink));
        let mut task = Task::new("Price X1");

        let result = controller.run(&mut task).await;

        assert!(result.is_success());
        let requests = provider.requests();
        assert_eq!(requests[0].model, "gpt-4o");
        assert_eq!(requests[1].model, "gpt-4o-mini");
        assert_eq!(controller.session().model(), "gpt-4o-mini");
    }

    #[tokio::test]
    async fn internal_error_restarts_conversation() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            ScriptStep::Text(THINKING.into()),
            ScriptStep::Error(ProviderError::NotConfigured("worker died".into())),
            ScriptStep::Text(FINAL_42.into()),
        ]));
        let sink = Arc::new(RecordingSink::default());
        let mut task = Task::new("Price X1");

        let result = controller(provider.clone(), sink.clone())
            .with_recovery(manager(sink))
            .run(&mut task)
            .await;

        assert!(result.is_success());
        let requests = provider.requests();
        assert_eq!(requests[1].messages.len(), 4);
        // Back to system prompt and task prompt.
        assert_eq!(requests[2].messages.len(), 2);
        assert_eq!(last_user_message(&requests[2]), last_user_message(&requests[0]));
    }

    #[tokio::test]
    async fn authentication_failure_is_not_recovered() {
        let provider = Arc::new(ScriptedProvider::new(vec![ScriptStep::Error(
            ProviderError::AuthenticationFailed("bad key".into()),
        )]));
        let sink = Arc::new(RecordingSink::default());
        let mut task = Task::new("Price X1");

        let result = controller(provider, sink.clone())
            .with_recovery(manager(sink.clone()))
            .run(&mut task)
            .await;

        assert_eq!(result.status, LoopStatus::AgenticLoopError);
        assert_eq!(task.status, TaskStatus::Blocked);
        assert!(sink.events().iter().any(|e| matches!(
            e,
            DomainEvent::RecoveryFailed { strategy: None, .. }
        )));
    }

    #[tokio::test]
    async fn panicking_tool_is_feedback_and_loop_continues() {
        let provider = Arc::new(ScriptedProvider::from_texts([
            r#"{"action": "explode"}"#,
            r#"{"finalAnswer": "ok"}"#,
        ]));
        let mut task = Task::new("Price X1");

        let result = controller(provider.clone(), Arc::new(RecordingSink::default()))
            .run(&mut task)
            .await;

        assert_eq!(result.status, LoopStatus::TaskCompleted);
        assert_eq!(provider.call_count(), 2);
        assert!(last_user_message(&provider.requests()[1]).contains("panicked"));
    }

    #[tokio::test]
    async fn cancelled_task_stops_without_calling_model() {
        let provider = Arc::new(ScriptedProvider::repeating(THINKING));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut task = Task::new("Price X1");

        let result = controller(provider.clone(), Arc::new(RecordingSink::default()))
            .run_with_cancel(&mut task, cancel)
            .await;

        assert_eq!(result.status, LoopStatus::AgenticLoopError);
        assert_eq!(result.error.as_deref(), Some("task cancelled"));
        assert_eq!(provider.call_count(), 0);
    }

    struct HangingProvider;

    #[async_trait]
    impl Provider for HangingProvider {
        fn name(&self) -> &str {
            "hanging"
        }

        async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(ProviderResponse::text("late", "gpt-4o"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_model_times_out() {
        let mut task = Task::new("Price X1");
        let result = AgentLoopController::new(Arc::new(HangingProvider), registry(), &AppConfig::default())
            .with_sink(Arc::new(RecordingSink::default()))
            .with_llm_timeout(Duration::from_secs(5))
            .run(&mut task)
            .await;

        assert_eq!(result.status, LoopStatus::AgenticLoopError);
        assert!(result.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn trim_history_bounds_request_size() {
        let provider = Arc::new(ScriptedProvider::repeating(THINKING));
        let controller = controller(provider.clone(), Arc::new(RecordingSink::default()))
            .with_max_iterations(8)
            .with_force_final_answer(false);
        controller.session().apply_degradation(1, &[TRIM_HISTORY.to_string()]);

        let mut task = Task::new("Price X1");
        controller.run(&mut task).await;

        let requests = provider.requests();
        assert!(requests.iter().all(|r| r.messages.len() <= TRIM_HEAD + TRIM_TAIL));
        assert_eq!(requests.last().unwrap().messages.len(), TRIM_HEAD + TRIM_TAIL);
    }

    #[tokio::test]
    async fn disabled_features_suppress_state_events() {
        let provider = Arc::new(ScriptedProvider::from_texts([FINAL_42]));
        let sink = Arc::new(RecordingSink::default());
        let controller = controller(provider, sink.clone());
        controller.session().apply_degradation(2, &[DISABLE_NON_CRITICAL.to_string()]);

        let mut task = Task::new("Price X1");
        controller.run(&mut task).await;

        assert!(sink.statuses().is_empty());
        assert!(sink.events().iter().any(|e| matches!(e, DomainEvent::LoopFinished { .. })));
    }
}

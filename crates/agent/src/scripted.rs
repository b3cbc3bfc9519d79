//! A provider that replays a fixed script of replies.
//!
//! Used for offline replays from the CLI and throughout the tests.

use async_trait::async_trait;
use ironloop_core::{Provider, ProviderError, ProviderRequest, ProviderResponse, Usage};
use parking_lot::Mutex;
use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub enum ScriptStep {
    Text(String),
    Error(ProviderError),
}

/// Returns the next scripted step on each call.
///
/// When the script runs out it either repeats the last step or fails with
/// `NotConfigured`, depending on how it was built.
pub struct ScriptedProvider {
    steps: Mutex<VecDeque<ScriptStep>>,
    last: Mutex<Option<ScriptStep>>,
    repeat_last: bool,
    requests: Mutex<Vec<ProviderRequest>>,
    models: Vec<String>,
    healthy: bool,
}

impl ScriptedProvider {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            last: Mutex::new(None),
            repeat_last: false,
            requests: Mutex::new(Vec::new()),
            models: Vec::new(),
            healthy: true,
        }
    }

    pub fn from_texts<S: Into<String>>(texts: impl IntoIterator<Item = S>) -> Self {
        Self::new(texts.into_iter().map(|t| ScriptStep::Text(t.into())).collect())
    }

    /// Answer every call with the same text.
    pub fn repeating(text: impl Into<String>) -> Self {
        Self {
            repeat_last: true,
            ..Self::new(vec![ScriptStep::Text(text.into())])
        }
    }

    /// Models reported by `list_models`.
    pub fn with_models(mut self, models: Vec<String>) -> Self {
        self.models = models;
        self
    }

    /// Make `health_check` report the provider as down.
    pub fn unhealthy(mut self) -> Self {
        self.healthy = false;
        self
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }

    fn next_step(&self) -> Option<ScriptStep> {
        let next = self.steps.lock().pop_front();
        match next {
            Some(step) => {
                *self.last.lock() = Some(step.clone());
                Some(step)
            }
            None if self.repeat_last => self.last.lock().clone(),
            None => None,
        }
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let model = request.model.clone();
        let call = {
            let mut requests = self.requests.lock();
            requests.push(request);
            requests.len()
        };

        match self.next_step() {
            Some(ScriptStep::Text(text)) => {
                let completion_tokens = (text.len() / 4) as u32;
                Ok(ProviderResponse {
                    content: text,
                    usage: Some(Usage {
                        prompt_tokens: 10,
                        completion_tokens,
                        total_tokens: 10 + completion_tokens,
                    }),
                    model,
                })
            }
            Some(ScriptStep::Error(e)) => Err(e),
            None => Err(ProviderError::NotConfigured(format!(
                "script exhausted at call #{call}"
            ))),
        }
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        Ok(self.models.clone())
    }

    async fn health_check(&self) -> Result<bool, ProviderError> {
        Ok(self.healthy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ProviderRequest {
        ProviderRequest::new("mock-model", vec![])
    }

    #[tokio::test]
    async fn replays_in_order_then_runs_out() {
        let provider = ScriptedProvider::new(vec![
            ScriptStep::Text("one".into()),
            ScriptStep::Error(ProviderError::Network("reset".into())),
        ]);

        assert_eq!(provider.complete(request()).await.unwrap().content, "one");
        assert!(matches!(provider.complete(request()).await, Err(ProviderError::Network(_))));
        assert!(matches!(provider.complete(request()).await, Err(ProviderError::NotConfigured(_))));
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn repeating_never_runs_out() {
        let provider = ScriptedProvider::repeating("same");
        for _ in 0..4 {
            assert_eq!(provider.complete(request()).await.unwrap().content, "same");
        }
    }

    #[tokio::test]
    async fn echoes_requested_model() {
        let provider = ScriptedProvider::from_texts(["hi"]);
        let response = provider
            .complete(ProviderRequest::new("gpt-4o-mini", vec![]))
            .await
            .unwrap();
        assert_eq!(response.model, "gpt-4o-mini");
        assert_eq!(provider.requests()[0].model, "gpt-4o-mini");
    }
}

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::CompressorConfig;
use crate::error::InferenceError;
use crate::inference::InferenceProvider;
use crate::types::{ChatMessage, InferenceRequest, ToolChoice};

const MIN_REQUEST_TOKENS: u32 = 256;

/// What the agent was doing when compression ran. Passed into every
/// summarization prompt so summaries stay relevant to the active task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskContext {
    pub thinking: Option<String>,
    pub task_input: Option<String>,
}

impl TaskContext {
    pub fn new(thinking: Option<&str>, task_input: Option<&str>) -> Self {
        Self {
            thinking: thinking.map(String::from),
            task_input: task_input.map(String::from),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.thinking.is_none() && self.task_input.is_none()
    }

    /// Labelled context sections, or an empty string when there is nothing to add.
    pub fn render(&self) -> String {
        let mut out = String::new();
        if let Some(ref task) = self.task_input {
            out.push_str("Current task:\n");
            out.push_str(task);
            out.push_str("\n\n");
        }
        if let Some(ref thinking) = self.thinking {
            out.push_str("Agent's current reasoning:\n");
            out.push_str(thinking);
            out.push_str("\n\n");
        }
        out
    }
}

/// Issues text-only summarization calls with a timeout and a bounded
/// number of retries. Never retries with backoff.
#[derive(Clone)]
pub struct SummaryClient {
    provider: Arc<dyn InferenceProvider>,
    model: String,
    timeout: Duration,
    max_retries: u32,
    max_output_tokens: u32,
}

impl SummaryClient {
    pub fn new(provider: Arc<dyn InferenceProvider>, config: &CompressorConfig) -> Self {
        Self {
            provider,
            model: config.model.clone(),
            timeout: config.request_timeout(),
            max_retries: config.max_retries,
            max_output_tokens: config.max_summary_output_tokens,
        }
    }

    fn max_tokens_for(&self, target_tokens: usize) -> u32 {
        let wanted = target_tokens.saturating_add(target_tokens / 4);
        u32::try_from(wanted)
            .unwrap_or(u32::MAX)
            .clamp(MIN_REQUEST_TOKENS, self.max_output_tokens.max(MIN_REQUEST_TOKENS))
    }

    /// One completion. Returns the model's text on success; every failure
    /// mode (transport, timeout, error status) comes back as `Err` after the
    /// retries are spent.
    pub async fn complete(
        &self,
        system: &str,
        prompt: String,
        target_tokens: usize,
    ) -> Result<String, InferenceError> {
        let request = InferenceRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens_for(target_tokens),
            system: Some(system.to_string()),
            messages: vec![ChatMessage::user(prompt)],
            tools: vec![],
            tool_choice: ToolChoice::Auto,
        };

        let mut last_error = InferenceError::Request("no attempt made".into());
        for attempt in 0..=self.max_retries {
            let outcome = tokio::time::timeout(self.timeout, self.provider.infer(request.clone()))
                .await
                .map_err(|_| InferenceError::Timeout(self.timeout))
                .and_then(|r| r);

            match outcome {
                Ok(response) if response.is_success() => {
                    debug!(
                        attempt,
                        input_tokens = response.usage.input_tokens,
                        output_tokens = response.usage.output_tokens,
                        "summarization call succeeded"
                    );
                    return Ok(response.output);
                }
                Ok(response) => {
                    let info = response
                        .error_information
                        .unwrap_or_else(|| "unspecified error".into());
                    warn!(attempt, error = %info, "summarization service returned error status");
                    last_error = InferenceError::Service(info);
                }
                Err(e) => {
                    warn!(attempt, error = %e, "summarization call failed");
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }
}

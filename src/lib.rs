pub mod action;
pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod field;
pub mod inference;
pub mod serializer;
pub mod summarizer;
pub mod token;
pub mod types;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub use action::{
    ActionKind, ActionRecord, ActionResult, ActionStatus, FieldCompression, SummaryMethod,
    SUMMARY_TOOL_NAME,
};
pub use client::{SummaryClient, TaskContext};
pub use config::CompressorConfig;
pub use context::ContextBudget;
pub use error::{CompressorError, InferenceError};
pub use events::CompressionEvent;
pub use field::{FieldCompressor, RewrittenField, Truncation};
pub use inference::{AnthropicProvider, InferenceProvider, OpenAiProvider};
pub use serializer::{serialize_action, serialize_actions};
pub use summarizer::{HistorySummarizer, SummaryOutcome};
pub use token::{default_counter, estimate_tokens, HeuristicCounter, TiktokenCounter, TokenCounter};
pub use types::{ChatMessage, InferenceRequest, InferenceResponse, ResponseStatus, Usage};

/// Keeps an agent's action history inside its model's context window.
///
/// Wire up a summarization provider and call [`compress_if_needed`] after
/// appending actions. When the serialized history is over budget, everything
/// but the last action collapses into one summary record and the last
/// action's oversized fields are shrunk. Holds no state between calls.
///
/// [`compress_if_needed`]: ActionCompressor::compress_if_needed
pub struct ActionCompressor {
    provider: Arc<dyn InferenceProvider>,
    counter: Arc<dyn TokenCounter>,
    config: CompressorConfig,
    events: Option<mpsc::Sender<CompressionEvent>>,
}

impl ActionCompressor {
    /// Validates `config` and picks the best available token counter.
    pub fn new(
        provider: Arc<dyn InferenceProvider>,
        config: CompressorConfig,
    ) -> Result<Self, CompressorError> {
        config.validate()?;
        Ok(Self {
            provider,
            counter: default_counter(),
            config,
            events: None,
        })
    }

    pub fn with_counter(mut self, counter: Arc<dyn TokenCounter>) -> Self {
        self.counter = counter;
        self
    }

    /// Report progress on `tx`. Send failures are ignored.
    pub fn with_events(mut self, tx: mpsc::Sender<CompressionEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn config(&self) -> &CompressorConfig {
        &self.config
    }

    /// Tokens the serialized form of `actions` occupies.
    pub fn count_tokens(&self, actions: &[ActionRecord]) -> usize {
        self.counter.count(&serialize_actions(actions))
    }

    /// Return `actions` unchanged when they fit `max_context_window` minus
    /// the reserved overhead, otherwise `[summary, recent]` (or `[recent]`
    /// for a single oversized action).
    ///
    /// Summarization failures degrade to deterministic fallbacks. The only
    /// error is a zero context window. The result is best-effort: it may
    /// still exceed the budget, but it is never larger than the input. When
    /// every compressed form would be larger, the input comes back as is.
    pub async fn compress_if_needed(
        &self,
        actions: &[ActionRecord],
        max_context_window: usize,
        thinking: Option<&str>,
        task_input: Option<&str>,
    ) -> Result<Vec<ActionRecord>, CompressorError> {
        if max_context_window == 0 {
            return Err(CompressorError::InvalidConfig(
                "max_context_window must be positive".into(),
            ));
        }
        let Some((recent, historical)) = actions.split_last() else {
            return Ok(Vec::new());
        };

        let budget = ContextBudget::new(max_context_window, &self.config);
        let pre_tokens = self.count_tokens(actions);
        if budget.fits(pre_tokens) {
            debug!(tokens = pre_tokens, limit = budget.limit, "history fits, skipping compression");
            self.emit(CompressionEvent::Skipped {
                tokens: pre_tokens,
                limit: budget.limit,
            })
            .await;
            return Ok(actions.to_vec());
        }

        info!(
            actions = actions.len(),
            tokens = pre_tokens,
            limit = budget.limit,
            usage = budget.usage_fraction(pre_tokens),
            "history over budget, compressing"
        );

        let context = TaskContext::new(thinking, task_input);
        let client = SummaryClient::new(self.provider.clone(), &self.config);

        let summary = if historical.is_empty() {
            None
        } else {
            let summarizer = HistorySummarizer::new(client.clone(), self.counter.clone(), &self.config);
            let outcome = summarizer
                .summarize_detailed(historical, budget.historical_target, &context)
                .await;
            if outcome.method == SummaryMethod::Statistical {
                self.emit(CompressionEvent::Fallback {
                    stage: "history",
                    reason: "summarization call failed".into(),
                })
                .await;
            }
            self.emit(CompressionEvent::HistorySummarized {
                count: outcome.action.result.summarized_count.unwrap_or(historical.len()),
                method: outcome.method.as_str(),
                tokens: self.counter.count(&outcome.action.result.output),
            })
            .await;
            Some((summarizer, outcome))
        };

        let fields = FieldCompressor::new(client, self.counter.clone(), &self.config);
        let (recent, rewritten) = fields
            .compress_fields_reporting(recent, budget.recent_field_budget, &context)
            .await;
        for field in rewritten {
            self.emit(CompressionEvent::FieldCompressed {
                field: field.field,
                original_tokens: field.marker.original_tokens,
                compressed_tokens: field.marker.compressed_tokens,
            })
            .await;
        }

        let (mut result, summarizer) = match summary {
            None => (vec![recent], None),
            Some((summarizer, outcome)) => {
                let mut result = vec![outcome.action, recent];
                let tokens = self.count_tokens(&result);
                if !budget.fits(tokens) && outcome.method != SummaryMethod::Statistical {
                    let statistical = summarizer.statistical_summary(historical);
                    let candidate = [statistical, result[1].clone()];
                    let candidate_tokens = self.count_tokens(&candidate);
                    if candidate_tokens < tokens {
                        warn!(
                            summary_tokens = tokens,
                            statistical_tokens = candidate_tokens,
                            limit = budget.limit,
                            "model summary still over budget, using statistical summary"
                        );
                        let [statistical, _] = candidate;
                        result[0] = statistical;
                        self.emit(CompressionEvent::Fallback {
                            stage: "history",
                            reason: "statistical summary is smaller".into(),
                        })
                        .await;
                    }
                }
                (result, Some(summarizer))
            }
        };

        let mut post_tokens = self.count_tokens(&result);
        if post_tokens >= pre_tokens {
            let (best, best_tokens) =
                self.smallest_form(result, post_tokens, actions, summarizer.as_ref());
            if best_tokens > pre_tokens {
                warn!(
                    pre_tokens,
                    post_tokens = best_tokens,
                    "compressed form is larger than the input, returning input unchanged"
                );
                self.emit(CompressionEvent::Fallback {
                    stage: "result",
                    reason: "compressed history was not smaller".into(),
                })
                .await;
                result = actions.to_vec();
                post_tokens = pre_tokens;
            } else {
                result = best;
                post_tokens = best_tokens;
            }
        }
        if !budget.fits(post_tokens) {
            warn!(tokens = post_tokens, limit = budget.limit, "compressed history still over budget");
        }
        info!(
            pre_tokens,
            post_tokens,
            actions_in = actions.len(),
            actions_out = result.len(),
            "compression complete"
        );
        self.emit(CompressionEvent::Finished {
            pre_tokens,
            post_tokens,
        })
        .await;

        Ok(result)
    }

    /// Smallest of the assembled result, the statistical-summary variant and
    /// the uncompressed history followed by the compressed recent action.
    /// Ties keep the assembled result.
    fn smallest_form(
        &self,
        result: Vec<ActionRecord>,
        result_tokens: usize,
        actions: &[ActionRecord],
        summarizer: Option<&HistorySummarizer>,
    ) -> (Vec<ActionRecord>, usize) {
        let Some((recent, historical)) = actions.split_last() else {
            return (result, result_tokens);
        };
        let Some(compressed_recent) = result.last().cloned() else {
            return (result, result_tokens);
        };

        let mut alternatives = Vec::new();
        if let Some(summarizer) = summarizer {
            alternatives.push(vec![
                summarizer.statistical_summary(historical),
                compressed_recent.clone(),
            ]);
        }
        if compressed_recent != *recent && !historical.is_empty() {
            let mut kept = historical.to_vec();
            kept.push(compressed_recent);
            alternatives.push(kept);
        }

        alternatives
            .into_iter()
            .map(|records| {
                let tokens = self.count_tokens(&records);
                (records, tokens)
            })
            .fold((result, result_tokens), |best, candidate| {
                if candidate.1 < best.1 {
                    candidate
                } else {
                    best
                }
            })
    }

    async fn emit(&self, event: CompressionEvent) {
        if let Some(ref tx) = self.events {
            let _ = tx.send(event).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FailingProvider, FixedCounter, FixedReplyProvider, ScriptedProvider};
    use serde_json::json;

    fn compressor(provider: Arc<dyn InferenceProvider>) -> ActionCompressor {
        ActionCompressor::new(provider, CompressorConfig::default().with_max_retries(0))
            .unwrap()
            .with_counter(Arc::new(HeuristicCounter))
    }

    fn action(tool: &str, output: &str) -> ActionRecord {
        ActionRecord::new(
            tool,
            json!({"query": format!("{tool} query")}),
            ActionResult::success(output),
        )
    }

    fn history(n: usize, output_len: usize) -> Vec<ActionRecord> {
        (0..n)
            .map(|i| action(&format!("tool_{i}"), &"x".repeat(output_len)))
            .collect()
    }

    #[tokio::test]
    async fn empty_history_is_a_noop() {
        let provider = FixedReplyProvider::new("unused");
        let out = compressor(provider.clone())
            .compress_if_needed(&[], 100_000, None, None)
            .await
            .unwrap();
        assert!(out.is_empty());
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn zero_window_is_rejected() {
        let err = compressor(FixedReplyProvider::new("unused"))
            .compress_if_needed(&history(1, 10), 0, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CompressorError::InvalidConfig(_)));
    }

    #[test]
    fn invalid_config_fails_at_construction() {
        let config = CompressorConfig::default().with_historical_fraction(1.5);
        assert!(ActionCompressor::new(FixedReplyProvider::new("unused"), config).is_err());
    }

    #[tokio::test]
    async fn small_action_in_small_window_is_unchanged() {
        let provider = FixedReplyProvider::new("unused");
        let actions = vec![action("read_file", "small output")];
        let out = compressor(provider.clone())
            .compress_if_needed(&actions, 10_000, None, None)
            .await
            .unwrap();
        assert_eq!(out, actions);
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn huge_single_action_is_field_compressed() {
        let actions = vec![action("read_file", &"A".repeat(10_000))];
        let out = compressor(FixedReplyProvider::new("condensed file contents"))
            .compress_if_needed(&actions, 10_000, None, None)
            .await
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].tool_name, "read_file");
        assert!(out[0].result.compressed);
        assert_eq!(out[0].result.original_tokens, Some(2_500));
        assert!(out[0].result.output.len() < 10_000);
    }

    #[tokio::test]
    async fn content_under_limit_is_returned_as_is() {
        let provider = FixedReplyProvider::new("unused");
        let actions = history(6, 50);
        let out = compressor(provider.clone())
            .compress_if_needed(&actions, 30_000, None, None)
            .await
            .unwrap();
        assert_eq!(out, actions);
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn forced_overflow_yields_summary_and_recent() {
        let provider = FixedReplyProvider::new("llm_summary");
        let c = compressor(provider.clone()).with_counter(Arc::new(FixedCounter(85_000)));
        let actions = history(6, 20);

        let out = c.compress_if_needed(&actions, 100_000, None, None).await.unwrap();

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].tool_name, SUMMARY_TOOL_NAME);
        assert!(out[0].result.is_summary);
        assert_eq!(out[0].result.summarized_count, Some(5));
        assert_eq!(out[1].tool_name, "tool_5");
        assert!(provider.calls() > 0);
    }

    #[tokio::test]
    async fn long_run_keeps_last_action_and_shrinks() {
        let provider = FixedReplyProvider::new("condensed history");
        let c = compressor(provider.clone());
        let actions = history(30, 20_000);
        let before = c.count_tokens(&actions);

        let out = c.compress_if_needed(&actions, 50_000, None, None).await.unwrap();

        assert_eq!(out.len(), 2);
        assert!(out[0].is_summary());
        assert!(out[0].result.chunked);
        assert_eq!(out[0].result.summarized_count, Some(29));
        assert_eq!(out[1], actions[29]);
        assert!(c.count_tokens(&out) < before);
        assert!(provider.calls() > 1);
    }

    #[tokio::test]
    async fn summary_text_is_used_verbatim() {
        let provider = FixedReplyProvider::new("llm_summary");
        let actions = history(3, 400);
        let out = compressor(provider.clone())
            .compress_if_needed(&actions, 20_005, None, None)
            .await
            .unwrap();

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].result.output, "llm_summary");
        assert_eq!(out[0].arguments["summary_method"], "llm_summarization");
        assert_eq!(out[1], actions[2]);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn failing_service_still_compresses() {
        let provider = FailingProvider::new();
        let mut actions = history(4, 100);
        actions.push(action("write_file", &"B".repeat(8_000)));

        let out = compressor(provider.clone())
            .compress_if_needed(&actions, 10_000, None, None)
            .await
            .unwrap();

        assert_eq!(out.len(), 2);
        assert!(out[0].is_summary());
        assert_eq!(out[0].result.summarized_count, Some(4));
        assert_eq!(out[0].arguments["summary_method"], "statistical");
        assert!(out[0].result.output.contains("History contains 4 actions."));
        assert_eq!(out[1].tool_name, "write_file");
        assert!(out[1].result.compressed);
        assert!(out[1].result.output.contains("tokens omitted"));
        assert!(provider.calls() >= 2);
    }

    #[tokio::test]
    async fn context_reaches_every_prompt() {
        let provider = ScriptedProvider::new(vec![
            Ok(InferenceResponse::success("history summary")),
            Ok(InferenceResponse::success("short output")),
        ]);
        let mut actions = history(2, 40);
        actions.push(action("grep", &"C".repeat(8_000)));

        let out = compressor(provider.clone())
            .compress_if_needed(
                &actions,
                20_100,
                Some("the failing test is in parser.rs"),
                Some("make the build green"),
            )
            .await
            .unwrap();

        assert_eq!(out[0].result.output, "history summary");
        assert_eq!(out[1].result.output, "short output");
        let prompts = provider.prompts().await;
        assert_eq!(prompts.len(), 2);
        for prompt in prompts {
            assert!(prompt.contains("the failing test is in parser.rs"));
            assert!(prompt.contains("make the build green"));
        }
    }

    #[tokio::test]
    async fn oversized_model_summary_is_replaced_by_statistics() {
        let provider = FixedReplyProvider::new("x".repeat(20_000));
        let (tx, mut rx) = mpsc::channel(16);
        let c = compressor(provider).with_events(tx);
        let actions = history(10, 1_000);

        let out = c.compress_if_needed(&actions, 22_000, None, None).await.unwrap();

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].arguments["summary_method"], "statistical");
        assert_eq!(out[0].result.summarized_count, Some(9));
        assert!(out[0].result.output.contains("History contains 9 actions."));
        drop(c);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert!(events.contains(&CompressionEvent::Fallback {
            stage: "history",
            reason: "statistical summary is smaller".into(),
        }));
        assert!(matches!(events.last(), Some(CompressionEvent::Finished { .. })));
    }

    #[tokio::test]
    async fn events_report_skip_and_compression() {
        let (tx, mut rx) = mpsc::channel(16);
        let c = compressor(FixedReplyProvider::new("summary")).with_events(tx);

        c.compress_if_needed(&history(2, 10), 100_000, None, None).await.unwrap();
        assert!(matches!(rx.recv().await, Some(CompressionEvent::Skipped { limit: 80_000, .. })));

        let mut actions = history(2, 10);
        actions.push(action("fetch", &"D".repeat(8_000)));
        c.compress_if_needed(&actions, 10_000, None, None).await.unwrap();
        drop(c);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert!(matches!(
            events[0],
            CompressionEvent::HistorySummarized { count: 2, method: "llm_summarization", .. }
        ));
        assert!(events.iter().any(|e| matches!(
            e,
            CompressionEvent::FieldCompressed { field, original_tokens: 2_000, .. } if field == "result.output"
        )));
        match events.last() {
            Some(CompressionEvent::Finished { pre_tokens, post_tokens }) => {
                assert!(post_tokens < pre_tokens)
            }
            other => panic!("expected Finished, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn compression_never_grows_a_small_history() {
        let provider = FixedReplyProvider::new("llm_summary");
        let (tx, mut rx) = mpsc::channel(16);
        let c = compressor(provider.clone()).with_events(tx);
        let actions = vec![action("read_file", "ok"), action("grep", "hit")];
        let before = c.count_tokens(&actions);

        for window in [10_000, 20_005] {
            let out = c.compress_if_needed(&actions, window, None, None).await.unwrap();
            assert_eq!(out, actions);
            assert!(c.count_tokens(&out) <= before);
        }
        assert_eq!(provider.calls(), 2);
        drop(c);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert!(events.contains(&CompressionEvent::Fallback {
            stage: "result",
            reason: "compressed history was not smaller".into(),
        }));
        assert!(events.contains(&CompressionEvent::Finished {
            pre_tokens: before,
            post_tokens: before,
        }));
    }

    #[tokio::test]
    async fn fitting_input_is_never_modified() {
        let c = compressor(FixedReplyProvider::new("unused"));
        let mut actions = history(3, 100);
        actions[1].result.extra.insert("exit_code".into(), json!(0));
        actions[2] = actions[2].clone().with_timestamp("2024-05-01T10:00:00Z");

        let out = c.compress_if_needed(&actions, 200_000, None, None).await.unwrap();
        assert_eq!(out, actions);
    }

    #[tokio::test]
    async fn recent_action_stays_last_across_passes() {
        let c = compressor(FixedReplyProvider::new("rolled up"));
        let mut actions = history(5, 400);
        let first = c.compress_if_needed(&actions, 20_200, None, None).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[1].tool_name, "tool_4");

        actions = first;
        actions.push(action("tool_5", &"y".repeat(400)));
        let second = c.compress_if_needed(&actions, 20_200, None, None).await.unwrap();
        assert_eq!(second.len(), 2);
        assert!(second[0].is_summary());
        assert_eq!(second[0].result.summarized_count, Some(5));
        assert_eq!(second[1].tool_name, "tool_5");
    }
}

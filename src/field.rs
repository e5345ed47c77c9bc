use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::action::{ActionRecord, FieldCompression};
use crate::client::{SummaryClient, TaskContext};
use crate::config::CompressorConfig;
use crate::token::TokenCounter;

const FIELD_SYSTEM_PROMPT: &str = "\
You compress tool inputs and outputs for an autonomous agent. Keep every fact \
the agent may still need: file paths, identifiers, numbers, error messages, \
and conclusions. Drop repetition and boilerplate. Reply with the compressed \
content only, without commentary.";

/// Deterministic head/tail truncation. Keeps the start and end of a text and
/// replaces the middle with a marker naming the omitted token count.
#[derive(Debug, Clone, Copy)]
pub struct Truncation {
    pub head_fraction: f64,
    pub tail_fraction: f64,
    pub chars_per_token: usize,
}

impl Truncation {
    pub fn from_config(config: &CompressorConfig) -> Self {
        Self {
            head_fraction: config.head_fraction,
            tail_fraction: config.tail_fraction,
            chars_per_token: config.chars_per_token,
        }
    }

    pub fn apply(&self, text: &str, target_tokens: usize, counter: &dyn TokenCounter) -> String {
        if text.is_empty() {
            return String::new();
        }
        let original = counter.count(text);
        if target_tokens == 0 {
            return omission_marker(original).trim().to_string();
        }

        let head_tokens = (target_tokens as f64 * self.head_fraction) as usize;
        let tail_tokens = (target_tokens as f64 * self.tail_fraction) as usize;
        let omitted = original.saturating_sub(head_tokens + tail_tokens);

        if counter.is_exact() {
            if let Some((head, tail)) = counter.slice_head_tail(text, head_tokens, tail_tokens) {
                return format!("{head}{}{tail}", omission_marker(omitted));
            }
        }

        let total_chars = text.chars().count();
        let mut head_chars = head_tokens * self.chars_per_token;
        let mut tail_chars = tail_tokens * self.chars_per_token;
        if head_chars + tail_chars >= total_chars {
            // Dense scripts run under the fixed ratio; keep the target's share
            // of the characters instead.
            let keep = total_chars as f64 * target_tokens as f64 / original.max(1) as f64;
            let share = self.head_fraction + self.tail_fraction;
            head_chars = (keep * self.head_fraction / share) as usize;
            tail_chars = (keep * self.tail_fraction / share) as usize;
            if head_chars + tail_chars >= total_chars {
                head_chars = total_chars / 3;
                tail_chars = total_chars / 3;
            }
        }

        let head_end = byte_offset(text, head_chars);
        let tail_start = byte_offset(text, total_chars - tail_chars);
        format!(
            "{}{}{}",
            &text[..head_end],
            omission_marker(omitted),
            &text[tail_start..]
        )
    }
}

fn omission_marker(tokens: usize) -> String {
    format!("\n\n[... about {tokens} tokens omitted ...]\n\n")
}

fn byte_offset(text: &str, char_index: usize) -> usize {
    text.char_indices()
        .nth(char_index)
        .map(|(i, _)| i)
        .unwrap_or(text.len())
}

/// One field rewritten by [`FieldCompressor::compress_fields_reporting`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewrittenField {
    /// `arguments.<name>` or `result.output`.
    pub field: String,
    pub marker: FieldCompression,
}

/// Shrinks individual oversized fields to a token target.
///
/// Prefers one summarization call; falls back to [`Truncation`] when the
/// service is unavailable. A pure text transform apart from that call.
#[derive(Clone)]
pub struct FieldCompressor {
    client: SummaryClient,
    counter: Arc<dyn TokenCounter>,
    truncation: Truncation,
}

impl FieldCompressor {
    pub fn new(
        client: SummaryClient,
        counter: Arc<dyn TokenCounter>,
        config: &CompressorConfig,
    ) -> Self {
        Self {
            client,
            counter,
            truncation: Truncation::from_config(config),
        }
    }

    /// Compress `text` to about `target_tokens`. Text already within the
    /// target is returned unchanged.
    pub async fn compress_field(
        &self,
        text: &str,
        target_tokens: usize,
        context: &TaskContext,
    ) -> String {
        let tokens = self.counter.count(text);
        if tokens <= target_tokens {
            return text.to_string();
        }
        if target_tokens == 0 {
            return self.fallback_compress(text, target_tokens);
        }

        let prompt = format!(
            "{}Compress the following content to about {target_tokens} tokens \
             (it is currently about {tokens} tokens). Keep what matters for the \
             current task.\n\n<content>\n{text}\n</content>",
            context.render(),
        );

        match self.client.complete(FIELD_SYSTEM_PROMPT, prompt, target_tokens).await {
            Ok(output) => output,
            Err(e) => {
                warn!(error = %e, tokens, target_tokens, "field summarization failed, truncating");
                self.fallback_compress(text, target_tokens)
            }
        }
    }

    /// Head/tail truncation without any model call.
    pub fn fallback_compress(&self, text: &str, target_tokens: usize) -> String {
        self.truncation.apply(text, target_tokens, self.counter.as_ref())
    }

    /// Compress every argument value and the result output that exceed
    /// `max_field_tokens`, attaching compression markers to the record.
    pub async fn compress_action_fields(
        &self,
        action: &ActionRecord,
        max_field_tokens: usize,
        context: &TaskContext,
    ) -> ActionRecord {
        self.compress_fields_reporting(action, max_field_tokens, context)
            .await
            .0
    }

    /// Same as [`compress_action_fields`](Self::compress_action_fields), also
    /// listing which fields were rewritten.
    pub async fn compress_fields_reporting(
        &self,
        action: &ActionRecord,
        max_field_tokens: usize,
        context: &TaskContext,
    ) -> (ActionRecord, Vec<RewrittenField>) {
        let mut out = action.clone();
        let mut rewritten = Vec::new();

        for (key, value) in &action.arguments {
            let text = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let original_tokens = self.counter.count(&text);
            if original_tokens <= max_field_tokens {
                continue;
            }

            let compressed = self.compress_field(&text, max_field_tokens, context).await;
            let marker = FieldCompression {
                original_tokens: action
                    .compressed_arguments
                    .get(key)
                    .map(|m| m.original_tokens)
                    .unwrap_or(original_tokens),
                compressed_tokens: self.counter.count(&compressed),
            };
            debug!(
                tool = %action.tool_name,
                argument = %key,
                original_tokens,
                compressed_tokens = marker.compressed_tokens,
                "argument compressed"
            );
            out.arguments.insert(key.clone(), Value::String(compressed));
            out.compressed_arguments.insert(key.clone(), marker);
            rewritten.push(RewrittenField {
                field: format!("arguments.{key}"),
                marker,
            });
        }

        let original_tokens = self.counter.count(&action.result.output);
        if original_tokens > max_field_tokens {
            let compressed = self
                .compress_field(&action.result.output, max_field_tokens, context)
                .await;
            let marker = FieldCompression {
                original_tokens: action
                    .result
                    .output_compression()
                    .map(|m| m.original_tokens)
                    .unwrap_or(original_tokens),
                compressed_tokens: self.counter.count(&compressed),
            };
            debug!(
                tool = %action.tool_name,
                original_tokens,
                compressed_tokens = marker.compressed_tokens,
                "output compressed"
            );
            out.result.output = compressed;
            out.result.mark_compressed(marker);
            rewritten.push(RewrittenField {
                field: "result.output".into(),
                marker,
            });
        }

        (out, rewritten)
    }
}

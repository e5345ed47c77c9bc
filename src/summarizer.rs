//! Historical summarization: turns a run of past actions into one summary
//! record.
//!
//! Small runs go to the model in a single call. Runs above the single-call
//! threshold are split on action boundaries, summarized chunk by chunk, and
//! the joined chunk summaries are re-summarized level by level until they fit
//! the target. The level loop is capped and stops as soon as a level fails to
//! shrink the text; whatever is still too large is truncated head/tail. Any
//! failed call drops the whole run to a statistical summary, so summarizing
//! never fails.

use std::sync::Arc;

use futures::{stream, StreamExt, TryStreamExt};
use tracing::{debug, info, warn};

use crate::action::{ActionRecord, SummaryMethod};
use crate::client::{SummaryClient, TaskContext};
use crate::config::CompressorConfig;
use crate::error::InferenceError;
use crate::field::Truncation;
use crate::serializer::serialize_action;
use crate::token::TokenCounter;

/// Joins per-chunk summaries. Re-summarization levels split on it.
pub const CHUNK_SEPARATOR: &str = "\n\n---\n\n";

const HISTORY_SYSTEM_PROMPT: &str = "\
You condense the action history of an autonomous agent. The summary replaces \
the original records in the agent's context, so it must let the agent continue \
its task without them. Keep file paths, identifiers, commands, numbers and \
error messages verbatim. Only state what the records show. Reply with the \
summary only.";

/// Summary plus how it was produced.
#[derive(Debug, Clone)]
pub struct SummaryOutcome {
    pub action: ActionRecord,
    pub method: SummaryMethod,
    /// Chunks on the first level. 1 for a single-call summary, 0 when no
    /// call was made.
    pub chunks: usize,
    /// Summarization levels run, counting the first.
    pub levels: usize,
    pub truncated: bool,
}

/// Joined chunk summaries after the level loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkedSummary {
    pub text: String,
    pub chunks: usize,
    pub levels: usize,
    pub truncated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkKind {
    Actions,
    Summaries,
}

#[derive(Clone)]
pub struct HistorySummarizer {
    client: SummaryClient,
    counter: Arc<dyn TokenCounter>,
    truncation: Truncation,
    single_call_threshold: usize,
    chunk_size_tokens: usize,
    max_levels: usize,
    min_chunk_summary_tokens: usize,
    chunk_concurrency: usize,
    recent_status_lines: usize,
}

impl HistorySummarizer {
    pub fn new(
        client: SummaryClient,
        counter: Arc<dyn TokenCounter>,
        config: &CompressorConfig,
    ) -> Self {
        Self {
            client,
            counter,
            truncation: Truncation::from_config(config),
            single_call_threshold: config.single_call_threshold,
            chunk_size_tokens: config.chunk_size_tokens.min(config.single_call_threshold),
            max_levels: config.max_summary_levels,
            min_chunk_summary_tokens: config.min_chunk_summary_tokens,
            chunk_concurrency: config.chunk_concurrency,
            recent_status_lines: config.recent_status_lines,
        }
    }

    /// Summarize `actions` into exactly one summary record.
    pub async fn summarize(
        &self,
        actions: &[ActionRecord],
        target_tokens: usize,
        context: &TaskContext,
    ) -> ActionRecord {
        self.summarize_detailed(actions, target_tokens, context)
            .await
            .action
    }

    pub async fn summarize_detailed(
        &self,
        actions: &[ActionRecord],
        target_tokens: usize,
        context: &TaskContext,
    ) -> SummaryOutcome {
        if actions.is_empty() {
            return self.statistical_outcome(actions);
        }
        let count = subsumed_count(actions);

        let blocks: Vec<String> = actions.iter().map(serialize_action).collect();
        let serialized = blocks.concat();
        let tokens = self.counter.count(&serialized);

        if tokens <= self.single_call_threshold {
            debug!(actions = count, tokens, "summarizing history in one call");
            return match self
                .summarize_once(&serialized, actions.len(), target_tokens, context)
                .await
            {
                Ok(text) => SummaryOutcome {
                    action: ActionRecord::summary(text, count, SummaryMethod::Llm),
                    method: SummaryMethod::Llm,
                    chunks: 1,
                    levels: 1,
                    truncated: false,
                },
                Err(e) => {
                    warn!(error = %e, actions = count, "history summarization failed, using statistics");
                    self.statistical_outcome(actions)
                }
            };
        }

        debug!(
            actions = count,
            tokens,
            threshold = self.single_call_threshold,
            "history exceeds single-call threshold, chunking"
        );
        match self
            .chunked_summarize(&blocks, target_tokens, context, self.chunk_size_tokens)
            .await
        {
            Ok(chunked) => {
                info!(
                    actions = count,
                    chunks = chunked.chunks,
                    levels = chunked.levels,
                    truncated = chunked.truncated,
                    "chunked history summary complete"
                );
                SummaryOutcome {
                    action: ActionRecord::summary(chunked.text, count, SummaryMethod::Chunked),
                    method: SummaryMethod::Chunked,
                    chunks: chunked.chunks,
                    levels: chunked.levels,
                    truncated: chunked.truncated,
                }
            }
            Err(e) => {
                warn!(error = %e, actions = count, "chunked summarization failed, using statistics");
                self.statistical_outcome(actions)
            }
        }
    }

    async fn summarize_once(
        &self,
        serialized: &str,
        records: usize,
        target_tokens: usize,
        context: &TaskContext,
    ) -> Result<String, InferenceError> {
        let prompt = format!(
            "{}The agent has executed the {records} actions below. Summarize them in \
             about {target_tokens} tokens: what was done, key outputs and files, \
             important findings or errors, and what remains open.\n\n\
             <history>\n{serialized}</history>",
            context.render(),
        );
        self.client
            .complete(HISTORY_SYSTEM_PROMPT, prompt, target_tokens)
            .await
    }

    /// Chunked summarization over serialized actions, one block per record.
    /// Chunks never cut a block that fits the chunk size.
    ///
    /// Errors only when a summarization call fails; the caller decides the
    /// fallback.
    pub async fn chunked_summarize(
        &self,
        blocks: &[String],
        target_tokens: usize,
        context: &TaskContext,
        chunk_size_tokens: usize,
    ) -> Result<ChunkedSummary, InferenceError> {
        let chunk_size = chunk_size_tokens.max(1);
        let chunks = pack_chunks(blocks.iter().map(String::as_str), chunk_size, self.counter.as_ref());
        let first_level_chunks = chunks.len();
        debug!(chunks = first_level_chunks, chunk_size, "summarizing history chunks");

        let mut text = self
            .summarize_chunks(&chunks, ChunkKind::Actions, target_tokens, context)
            .await?;
        let mut tokens = self.counter.count(&text);
        let mut levels = 1;

        while tokens > target_tokens && levels < self.max_levels {
            let chunks = split_into_chunks(&text, CHUNK_SEPARATOR, chunk_size, self.counter.as_ref());
            let next = self
                .summarize_chunks(&chunks, ChunkKind::Summaries, target_tokens, context)
                .await?;
            let next_tokens = self.counter.count(&next);
            if next_tokens >= tokens {
                debug!(level = levels + 1, tokens, next_tokens, "re-summarization did not shrink, stopping");
                break;
            }
            debug!(level = levels + 1, tokens, next_tokens, "re-summarized chunk summaries");
            text = next;
            tokens = next_tokens;
            levels += 1;
        }

        let truncated = tokens > target_tokens;
        if truncated {
            debug!(tokens, target_tokens, "chunk summaries still over target, truncating");
            text = self.truncation.apply(&text, target_tokens, self.counter.as_ref());
        }

        Ok(ChunkedSummary {
            text,
            chunks: first_level_chunks,
            levels,
            truncated,
        })
    }

    /// Summarize each chunk and join the results in input order.
    async fn summarize_chunks(
        &self,
        chunks: &[String],
        kind: ChunkKind,
        target_tokens: usize,
        context: &TaskContext,
    ) -> Result<String, InferenceError> {
        let total = chunks.len();
        let per_chunk = (target_tokens / total.max(1)).max(self.min_chunk_summary_tokens);

        let parts: Vec<String> = stream::iter(chunks.iter().enumerate())
            .map(|(i, chunk)| self.summarize_chunk(chunk, i + 1, total, kind, per_chunk, context))
            .buffered(self.chunk_concurrency.max(1))
            .try_collect()
            .await?;

        Ok(parts.join(CHUNK_SEPARATOR))
    }

    async fn summarize_chunk(
        &self,
        chunk: &str,
        part: usize,
        total: usize,
        kind: ChunkKind,
        target_tokens: usize,
        context: &TaskContext,
    ) -> Result<String, InferenceError> {
        let ctx = context.render();
        let prompt = match kind {
            ChunkKind::Actions => format!(
                "{ctx}Below is part {part} of {total} of the agent's action history, in \
                 chronological order. Summarize this part in about {target_tokens} tokens. \
                 Other parts are summarized separately.\n\n\
                 <history_part>\n{chunk}</history_part>"
            ),
            ChunkKind::Summaries => format!(
                "{ctx}Below are consecutive partial summaries of the agent's action \
                 history (part {part} of {total}). Merge them into one summary of about \
                 {target_tokens} tokens, keeping chronological order and dropping \
                 repetition.\n\n<summaries>\n{chunk}\n</summaries>"
            ),
        };
        self.client
            .complete(HISTORY_SYSTEM_PROMPT, prompt, target_tokens)
            .await
    }

    /// Deterministic summary: action count, per-tool call counts, and the
    /// tool name and status of the last few actions. Makes no model call.
    pub fn statistical_summary(&self, actions: &[ActionRecord]) -> ActionRecord {
        ActionRecord::summary(
            self.statistical_text(actions),
            subsumed_count(actions),
            SummaryMethod::Statistical,
        )
    }

    fn statistical_outcome(&self, actions: &[ActionRecord]) -> SummaryOutcome {
        SummaryOutcome {
            action: self.statistical_summary(actions),
            method: SummaryMethod::Statistical,
            chunks: 0,
            levels: 0,
            truncated: false,
        }
    }

    fn statistical_text(&self, actions: &[ActionRecord]) -> String {
        let (summaries, tools): (Vec<&ActionRecord>, Vec<&ActionRecord>) =
            actions.iter().partition(|a| a.is_summary());

        let mut tool_counts: Vec<(&str, usize)> = Vec::new();
        for action in &tools {
            let name = if action.tool_name.is_empty() {
                "unknown"
            } else {
                action.tool_name.as_str()
            };
            match tool_counts.iter_mut().find(|(tool, _)| *tool == name) {
                Some((_, n)) => *n += 1,
                None => tool_counts.push((name, 1)),
            }
        }

        let mut text = format!("History contains {} actions.\n", subsumed_count(actions));
        if !summaries.is_empty() {
            let earlier: usize = summaries.iter().map(|a| a.subsumed_count()).sum();
            text.push_str(&format!("{earlier} of them were summarized earlier.\n"));
        }
        if !tool_counts.is_empty() {
            text.push_str("\nTool usage:\n");
            for (tool, n) in &tool_counts {
                let unit = if *n == 1 { "call" } else { "calls" };
                text.push_str(&format!("- {tool}: {n} {unit}\n"));
            }
        }

        let start = tools.len().saturating_sub(self.recent_status_lines);
        let recent = &tools[start..];
        if !recent.is_empty() {
            text.push_str("\nMost recent actions:\n");
            for (i, action) in recent.iter().enumerate() {
                text.push_str(&format!(
                    "{}. {} - {}\n",
                    i + 1,
                    action.tool_name,
                    action.result.status_str()
                ));
            }
        }
        text
    }
}

fn subsumed_count(actions: &[ActionRecord]) -> usize {
    actions.iter().map(ActionRecord::subsumed_count).sum()
}

/// Split `text` into contiguous chunks of at most `chunk_size` tokens,
/// cutting after `boundary` where possible.
pub fn split_into_chunks(
    text: &str,
    boundary: &str,
    chunk_size: usize,
    counter: &dyn TokenCounter,
) -> Vec<String> {
    pack_chunks(text.split_inclusive(boundary), chunk_size, counter)
}

/// Greedily pack consecutive segments into chunks of at most `chunk_size`
/// tokens.
///
/// A single segment over the limit is cut on char boundaries into
/// `ceil(tokens / chunk_size)` equal pieces. Pieces are not re-measured, so
/// packing terminates for any counter.
pub fn pack_chunks<'a>(
    segments: impl IntoIterator<Item = &'a str>,
    chunk_size: usize,
    counter: &dyn TokenCounter,
) -> Vec<String> {
    let chunk_size = chunk_size.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_tokens = 0;

    for segment in segments {
        let tokens = counter.count(segment);

        if tokens > chunk_size {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
                current_tokens = 0;
            }
            chunks.extend(hard_split(segment, tokens, chunk_size));
            continue;
        }

        if !current.is_empty() && current_tokens + tokens > chunk_size {
            chunks.push(std::mem::take(&mut current));
            current_tokens = 0;
        }
        current.push_str(segment);
        current_tokens += tokens;
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn hard_split(segment: &str, tokens: usize, chunk_size: usize) -> Vec<String> {
    let pieces = tokens.div_ceil(chunk_size).max(1);
    let chars: Vec<char> = segment.chars().collect();
    let per_piece = chars.len().div_ceil(pieces).max(1);
    chars
        .chunks(per_piece)
        .map(|piece| piece.iter().collect())
        .collect()
}

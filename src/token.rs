use std::sync::Arc;

use tracing::warn;

use crate::error::CompressorError;

/// Counts language-model tokens in a piece of text.
///
/// Counting must be monotonic in text length: appending characters never
/// lowers the count. Chunk sizing relies on this to terminate.
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;

    /// True when `count` is an exact tokenizer count rather than an estimate.
    fn is_exact(&self) -> bool {
        false
    }

    /// Split off the first `head` and last `tail` tokens of `text`.
    /// Returns `None` when the counter cannot work in token space.
    fn slice_head_tail(&self, _text: &str, _head: usize, _tail: usize) -> Option<(String, String)> {
        None
    }
}

impl<T: TokenCounter + ?Sized> TokenCounter for Arc<T> {
    fn count(&self, text: &str) -> usize {
        (**self).count(text)
    }

    fn is_exact(&self) -> bool {
        (**self).is_exact()
    }

    fn slice_head_tail(&self, text: &str, head: usize, tail: usize) -> Option<(String, String)> {
        (**self).slice_head_tail(text, head, tail)
    }
}

/// Script-aware estimate: CJK ideographs at 1.5 chars/token, everything
/// else at 4 chars/token.
pub fn estimate_tokens(text: &str) -> usize {
    let (cjk, other) = text.chars().fold((0usize, 0usize), |(cjk, other), c| {
        if is_cjk(c) {
            (cjk + 1, other)
        } else {
            (cjk, other + 1)
        }
    });
    (cjk as f64 / 1.5 + other as f64 / 4.0) as usize
}

fn is_cjk(c: char) -> bool {
    ('\u{4e00}'..='\u{9fff}').contains(&c)
}

/// Heuristic counter used when no tokenizer is available.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicCounter;

impl TokenCounter for HeuristicCounter {
    fn count(&self, text: &str) -> usize {
        estimate_tokens(text)
    }
}

/// Exact counts via tiktoken's cl100k_base encoding.
pub struct TiktokenCounter {
    bpe: tiktoken_rs::CoreBPE,
}

impl TiktokenCounter {
    pub fn cl100k() -> Result<Self, CompressorError> {
        let bpe =
            tiktoken_rs::cl100k_base().map_err(|e| CompressorError::Tokenizer(e.to_string()))?;
        Ok(Self { bpe })
    }
}

// A token slice can end inside a multi-byte character. Drop up to this many
// tokens from the cut edge until the slice decodes.
const MAX_BOUNDARY_BACKOFF: usize = 4;

impl TokenCounter for TiktokenCounter {
    fn count(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }

    fn is_exact(&self) -> bool {
        true
    }

    fn slice_head_tail(&self, text: &str, head: usize, tail: usize) -> Option<(String, String)> {
        let tokens = self.bpe.encode_with_special_tokens(text);
        if head + tail >= tokens.len() {
            return None;
        }

        let head_text = (0..MAX_BOUNDARY_BACKOFF).find_map(|back| {
            let end = head.checked_sub(back)?;
            self.bpe.decode(tokens[..end].to_vec()).ok()
        })?;
        let tail_text = (0..MAX_BOUNDARY_BACKOFF).find_map(|back| {
            let start = tokens.len() - tail + back;
            if start > tokens.len() {
                return None;
            }
            self.bpe.decode(tokens[start..].to_vec()).ok()
        })?;

        Some((head_text, tail_text))
    }
}

/// The best counter available: tiktoken when its encoding loads, the
/// heuristic otherwise.
pub fn default_counter() -> Arc<dyn TokenCounter> {
    match TiktokenCounter::cl100k() {
        Ok(counter) => Arc::new(counter),
        Err(e) => {
            warn!(error = %e, "tokenizer unavailable, using heuristic token counts");
            Arc::new(HeuristicCounter)
        }
    }
}

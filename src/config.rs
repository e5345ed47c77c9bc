use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::CompressorError;

/// Read-only settings for the compression engine.
///
/// Deserializes from a partial JSON document; missing keys take the defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CompressorConfig {
    /// Model used for every summarization call.
    pub model: String,
    /// Tokens set aside for system prompt, tool schemas, and model output.
    pub reserved_overhead: usize,
    /// Share of the usable budget given to the history summary. The rest
    /// goes to the most recent action.
    pub historical_fraction: f64,
    /// Smallest per-field budget ever requested for the recent action.
    pub min_field_tokens: usize,
    /// Largest serialized history summarized in a single call.
    pub single_call_threshold: usize,
    /// Upper bound for one chunk in chunked summarization.
    pub chunk_size_tokens: usize,
    /// Iteration cap on re-summarizing concatenated chunk summaries.
    pub max_summary_levels: usize,
    /// Floor on the output size requested for each chunk.
    pub min_chunk_summary_tokens: usize,
    /// Chunk summarization calls in flight at once. 1 is sequential.
    pub chunk_concurrency: usize,
    pub request_timeout_secs: u64,
    /// Extra attempts after a failed summarization call.
    pub max_retries: u32,
    /// Ceiling for `max_tokens` on summarization requests.
    pub max_summary_output_tokens: u32,
    pub head_fraction: f64,
    pub tail_fraction: f64,
    /// Chars-per-token ratio for slicing when no exact tokenizer is present.
    pub chars_per_token: usize,
    /// Trailing actions listed in the statistical fallback summary.
    pub recent_status_lines: usize,
}

impl Default for CompressorConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".into(),
            reserved_overhead: 20_000,
            historical_fraction: 0.5,
            min_field_tokens: 1_000,
            single_call_threshold: 60_000,
            chunk_size_tokens: 30_000,
            max_summary_levels: 3,
            min_chunk_summary_tokens: 128,
            chunk_concurrency: 1,
            request_timeout_secs: 120,
            max_retries: 1,
            max_summary_output_tokens: 8_192,
            head_fraction: 0.4,
            tail_fraction: 0.4,
            chars_per_token: 2,
            recent_status_lines: 5,
        }
    }
}

impl CompressorConfig {
    pub fn from_json_str(json: &str) -> Result<Self, CompressorError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| CompressorError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, CompressorError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_reserved_overhead(mut self, tokens: usize) -> Self {
        self.reserved_overhead = tokens;
        self
    }

    pub fn with_historical_fraction(mut self, fraction: f64) -> Self {
        self.historical_fraction = fraction;
        self
    }

    pub fn with_min_field_tokens(mut self, tokens: usize) -> Self {
        self.min_field_tokens = tokens;
        self
    }

    pub fn with_single_call_threshold(mut self, tokens: usize) -> Self {
        self.single_call_threshold = tokens;
        self
    }

    pub fn with_chunk_size(mut self, tokens: usize) -> Self {
        self.chunk_size_tokens = tokens;
        self
    }

    pub fn with_max_summary_levels(mut self, levels: usize) -> Self {
        self.max_summary_levels = levels;
        self
    }

    pub fn with_chunk_concurrency(mut self, n: usize) -> Self {
        self.chunk_concurrency = n;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), CompressorError> {
        let invalid = |msg: &str| Err(CompressorError::InvalidConfig(msg.to_string()));

        if !(self.historical_fraction > 0.0 && self.historical_fraction < 1.0) {
            return invalid("historical_fraction must be in (0, 1)");
        }
        for (name, f) in [("head_fraction", self.head_fraction), ("tail_fraction", self.tail_fraction)] {
            if !(f > 0.0 && f < 1.0) {
                return Err(CompressorError::InvalidConfig(format!("{name} must be in (0, 1)")));
            }
        }
        if self.head_fraction + self.tail_fraction > 1.0 {
            return invalid("head_fraction + tail_fraction must not exceed 1");
        }
        if self.chunk_size_tokens == 0 {
            return invalid("chunk_size_tokens must be positive");
        }
        if self.single_call_threshold == 0 {
            return invalid("single_call_threshold must be positive");
        }
        if self.chunk_concurrency == 0 {
            return invalid("chunk_concurrency must be positive");
        }
        if self.chars_per_token == 0 {
            return invalid("chars_per_token must be positive");
        }
        if self.max_summary_levels == 0 {
            return invalid("max_summary_levels must be positive");
        }
        if self.request_timeout_secs == 0 {
            return invalid("request_timeout_secs must be positive");
        }
        Ok(())
    }
}

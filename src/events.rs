/// Progress events from one `compress_if_needed` call, for callers that
/// want to report what the engine did.
#[derive(Debug, Clone, PartialEq)]
pub enum CompressionEvent {
    /// History already fit; returned unchanged.
    Skipped { tokens: usize, limit: usize },
    HistorySummarized {
        count: usize,
        method: &'static str,
        tokens: usize,
    },
    FieldCompressed {
        field: String,
        original_tokens: usize,
        compressed_tokens: usize,
    },
    /// A deterministic path replaced a model result.
    Fallback { stage: &'static str, reason: String },
    Finished { pre_tokens: usize, post_tokens: usize },
}

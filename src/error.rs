/// Errors surfaced to callers. Everything else degrades to a fallback.
#[derive(Debug, thiserror::Error)]
pub enum CompressorError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("tokenizer error: {0}")]
    Tokenizer(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("API returned {status}: {body}")]
    ApiError { status: u16, body: String },
    #[error("failed to parse response: {0}")]
    Parse(String),
    #[error("service reported an error: {0}")]
    Service(String),
    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),
}

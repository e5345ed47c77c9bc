use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One turn of the history sent to the summarization service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

/// How the model may pick tools. The compressor only ever sends `Auto`
/// with an empty tool list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToolChoice {
    #[default]
    Auto,
    None,
}

impl ToolChoice {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolChoice::Auto => "auto",
            ToolChoice::None => "none",
        }
    }
}

/// Fully-formed request. The provider just sends it.
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    pub model: String,
    pub max_tokens: u32,
    pub system: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<Value>,
    pub tool_choice: ToolChoice,
}

/// Outcome reported by the service itself, as opposed to a transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
}

/// What came back from the LLM.
#[derive(Debug, Clone)]
pub struct InferenceResponse {
    pub status: ResponseStatus,
    pub output: String,
    pub error_information: Option<String>,
    pub usage: Usage,
}

impl InferenceResponse {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Success,
            output: output.into(),
            error_information: None,
            usage: Usage::default(),
        }
    }

    pub fn error(info: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Error,
            output: String::new(),
            error_information: Some(info.into()),
            usage: Usage::default(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }
}

/// Token usage for a single inference call.
#[derive(Debug, Clone, Default)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

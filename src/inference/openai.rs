use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use super::InferenceProvider;
use crate::error::InferenceError;
use crate::types::{InferenceRequest, InferenceResponse, Usage};

/// OpenAI-compatible provider. Works with vLLM, LM Studio, OpenRouter,
/// or any server that implements the `/v1/chat/completions` endpoint.
pub struct OpenAiProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiProvider {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: None,
        }
    }

    /// Set an API key (required for OpenAI, OpenRouter, etc.).
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// System prompt goes first as its own message, then the history verbatim.
    fn build_body(request: &InferenceRequest) -> Value {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(ref sys) = request.system {
            messages.push(json!({ "role": "system", "content": sys }));
        }
        for msg in &request.messages {
            messages.push(json!({ "role": msg.role, "content": msg.content }));
        }

        let mut body = json!({
            "model": request.model,
            "max_tokens": request.max_tokens,
            "messages": messages,
        });

        if !request.tools.is_empty() {
            body["tools"] = Value::Array(request.tools.clone());
            body["tool_choice"] = Value::String(request.tool_choice.as_str().into());
        }

        body
    }

    fn parse_response(parsed: &Value) -> InferenceResponse {
        let choice = &parsed["choices"][0];
        let output = choice["message"]["content"].as_str().unwrap_or("");

        let usage = Usage {
            input_tokens: parsed["usage"]["prompt_tokens"]
                .as_u64()
                .unwrap_or(0) as u32,
            output_tokens: parsed["usage"]["completion_tokens"]
                .as_u64()
                .unwrap_or(0) as u32,
        };

        let finish_reason = choice["finish_reason"].as_str().unwrap_or("stop");
        let mut response = match finish_reason {
            "content_filter" => InferenceResponse::error("completion blocked by content filter"),
            _ if output.trim().is_empty() => InferenceResponse::error("model returned no text"),
            _ => InferenceResponse::success(output),
        };
        response.usage = usage;
        response
    }
}

#[async_trait]
impl InferenceProvider for OpenAiProvider {
    async fn infer(&self, request: InferenceRequest) -> Result<InferenceResponse, InferenceError> {
        let body = Self::build_body(&request);

        debug!(
            model = %request.model,
            messages = request.messages.len(),
            "openai inference request"
        );

        let mut req = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .header("content-type", "application/json");

        if let Some(ref key) = self.api_key {
            req = req.header("authorization", format!("Bearer {key}"));
        }

        let resp = req
            .json(&body)
            .send()
            .await
            .map_err(|e| InferenceError::Request(e.to_string()))?;

        let status = resp.status().as_u16();
        let text = resp
            .text()
            .await
            .map_err(|e| InferenceError::Request(e.to_string()))?;

        if status != 200 {
            return Err(InferenceError::ApiError { status, body: text });
        }

        let parsed: Value =
            serde_json::from_str(&text).map_err(|e| InferenceError::Parse(e.to_string()))?;

        Ok(Self::parse_response(&parsed))
    }
}

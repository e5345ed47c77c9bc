//! Mock providers and counters shared by the unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::InferenceError;
use crate::inference::InferenceProvider;
use crate::token::TokenCounter;
use crate::types::{InferenceRequest, InferenceResponse, ToolChoice};

/// Replays scripted responses, then fails. Records every prompt it saw.
pub struct ScriptedProvider {
    responses: Mutex<VecDeque<Result<InferenceResponse, InferenceError>>>,
    prompts: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<Result<InferenceResponse, InferenceError>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into_iter().collect()),
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn prompts(&self) -> Vec<String> {
        self.prompts.lock().await.clone()
    }
}

#[async_trait]
impl InferenceProvider for ScriptedProvider {
    async fn infer(&self, request: InferenceRequest) -> Result<InferenceResponse, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert!(request.tools.is_empty());
        assert_eq!(request.tool_choice, ToolChoice::Auto);
        if let Some(msg) = request.messages.first() {
            self.prompts.lock().await.push(msg.content.clone());
        }
        self.responses
            .lock()
            .await
            .pop_front()
            .unwrap_or(Err(InferenceError::Request("no more mock responses".into())))
    }
}

/// Answers every call with the same text.
pub struct FixedReplyProvider {
    reply: String,
    prompts: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl FixedReplyProvider {
    pub fn new(reply: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.into(),
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn prompts(&self) -> Vec<String> {
        self.prompts.lock().await.clone()
    }
}

#[async_trait]
impl InferenceProvider for FixedReplyProvider {
    async fn infer(&self, request: InferenceRequest) -> Result<InferenceResponse, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(msg) = request.messages.first() {
            self.prompts.lock().await.push(msg.content.clone());
        }
        Ok(InferenceResponse::success(self.reply.clone()))
    }
}

/// Always reports an error status.
pub struct FailingProvider {
    calls: AtomicUsize,
}

impl FailingProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InferenceProvider for FailingProvider {
    async fn infer(&self, _: InferenceRequest) -> Result<InferenceResponse, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(InferenceResponse::error("model unavailable"))
    }
}

/// Reports the same count for any text.
pub struct FixedCounter(pub usize);

impl TokenCounter for FixedCounter {
    fn count(&self, _text: &str) -> usize {
        self.0
    }
}

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use switchboard::llm::{ChatMessage, ChatResponse, LlmClient, LlmError, ToolCall, ToolDefinition};
use switchboard::trace::{TraceAction, TraceEvent};

/// One model call as the provider saw it.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub system_prompt: String,
    pub messages: Vec<ChatMessage>,
    pub tool_names: Vec<String>,
}

/// Provider that replays queued responses, then repeats `fallback` if set.
pub struct ScriptedLlm {
    script: Mutex<VecDeque<Result<ChatResponse, LlmError>>>,
    fallback: Option<ChatResponse>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedLlm {
    pub fn new(script: Vec<Result<ChatResponse, LlmError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fallback: None,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn replies(replies: &[&str]) -> Arc<Self> {
        Self::new(replies.iter().map(|r| Ok(ChatResponse::text(*r))).collect())
    }

    pub fn repeating(response: ChatResponse) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Some(response),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub async fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().await.clone()
    }

    pub async fn call_count(&self) -> usize {
        self.calls.lock().await.len()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn chat_completion(
        &self,
        _model: &str,
        system_prompt: &str,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
    ) -> Result<ChatResponse, LlmError> {
        self.calls.lock().await.push(RecordedCall {
            system_prompt: system_prompt.to_string(),
            messages: messages.to_vec(),
            tool_names: tools
                .unwrap_or_default()
                .iter()
                .map(|t| t.function.name.clone())
                .collect(),
        });

        match self.script.lock().await.pop_front() {
            Some(next) => next,
            None => match &self.fallback {
                Some(response) => Ok(response.clone()),
                None => Err(LlmError::client_error(400, "script exhausted")),
            },
        }
    }
}

/// Provider that never answers.
pub struct StalledLlm;

#[async_trait]
impl LlmClient for StalledLlm {
    async fn chat_completion(
        &self,
        _model: &str,
        _system_prompt: &str,
        _messages: &[ChatMessage],
        _tools: Option<&[ToolDefinition]>,
    ) -> Result<ChatResponse, LlmError> {
        std::future::pending().await
    }
}

pub fn tool_call(id: &str, name: &str, arguments: Value) -> ToolCall {
    ToolCall::new(id, name, &arguments)
}

pub fn delegate_to(target: &str) -> ChatResponse {
    ChatResponse::text(
        json!({"delegate": true, "target": target, "reason": "better suited"}).to_string(),
    )
}

pub fn object_schema() -> Value {
    json!({"type": "object"})
}

pub fn actions(trace: &[TraceEvent]) -> Vec<TraceAction> {
    trace.iter().map(|e| e.action).collect()
}

pub fn count(trace: &[TraceEvent], action: TraceAction) -> usize {
    trace.iter().filter(|e| e.action == action).count()
}

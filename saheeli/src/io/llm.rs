//! LLM contract and its clients.
//!
//! The [`LlmClient`] trait is the agent's only view of the model: an ordered
//! message list goes in, a raw JSON payload comes out. Transport failures are
//! fatal to the task and never retried.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::core::types::Message;

/// Errors from LLM transport.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Abstraction over model backends.
pub trait LlmClient {
    /// Send the full conversation and return the raw response payload.
    fn chat(&self, messages: &[Message]) -> Result<Value>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
}

/// Blocking client for an OpenAI-compatible `/chat/completions` endpoint.
#[derive(Debug)]
pub struct HttpLlmClient {
    http: Client,
    api_base: String,
    api_key: String,
    model: String,
}

impl HttpLlmClient {
    pub fn new(api_base: &str, api_key: &str, model: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("build HTTP client")?;
        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }
}

impl LlmClient for HttpLlmClient {
    #[instrument(skip_all, fields(model = %self.model, messages = messages.len()))]
    fn chat(&self, messages: &[Message]) -> Result<Value> {
        let url = format!("{}/chat/completions", self.api_base);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&ChatRequest {
                model: &self.model,
                messages,
            })
            .send()
            .map_err(LlmError::from)?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().unwrap_or_else(|_| "(no body)".into());
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            }
            .into());
        }

        let body: Value = response
            .json()
            .map_err(|e| LlmError::InvalidResponse(format!("failed to parse response: {e}")))?;
        debug!("model responded");
        Ok(extract_command(body))
    }
}

/// Pull the command payload out of a chat-completions body.
///
/// A body that already looks like a command is returned unchanged. Otherwise
/// the first choice's message content is parsed as JSON, falling back to the
/// raw string (which then fails validation and is fed back to the model).
pub fn extract_command(body: Value) -> Value {
    if body.get("capability").is_some() || body.get("tool").is_some() {
        return body;
    }
    let Some(content) = body
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
    else {
        return body;
    };
    let trimmed = strip_code_fence(content.trim());
    serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(content.to_string()))
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Model that replays a fixed list of responses.
///
/// Used when no API key is configured (offline mode) and as a test double.
/// Running out of responses is reported as a transport failure.
#[derive(Debug, Default)]
pub struct ScriptedLlm {
    responses: Mutex<VecDeque<Value>>,
    requests: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedLlm {
    pub fn new(responses: Vec<Value>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Offline script: leave a scratchpad note, then declare completion.
    pub fn offline() -> Self {
        Self::new(vec![
            json!({
                "capability": "add_to_scratchpad",
                "args": {"key": "note", "value": "offline run: no API key configured"}
            }),
            json!({"capability": "task_complete", "args": {"summary": "done"}}),
        ])
    }

    /// Number of chat requests received so far.
    pub fn calls(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Every conversation sent to the model, in call order.
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl LlmClient for ScriptedLlm {
    fn chat(&self, messages: &[Message]) -> Result<Value> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(messages.to_vec());
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .ok_or_else(|| LlmError::InvalidResponse("scripted responses exhausted".into()).into())
    }
}

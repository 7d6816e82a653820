//! The external reasoning service behind every stage.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::CollaboratorConfig;
use crate::errors::CollaboratorError;

/// One prompt in, one text completion out.
/// Real implementation: `HttpCollaborator`. Test double: `ScriptedCollaborator`.
#[async_trait]
pub trait Collaborator: Send + Sync {
    async fn complete(&self, prompt: &str, temperature: f32) -> Result<String, CollaboratorError>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

const SYSTEM_PROMPT: &str =
    "You are a precise code analysis assistant. Always respond with a single valid JSON object.";

/// OpenAI-compatible chat-completions client.
pub struct HttpCollaborator {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
    max_tokens: u32,
}

impl HttpCollaborator {
    pub fn new(endpoint: &str, model: &str, api_key: &str, request_timeout: Duration) -> Result<Self, CollaboratorError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(CollaboratorError::Transport)?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.to_string(),
            max_tokens: 4096,
        })
    }

    /// Build from config, reading the API key from the configured env var.
    pub fn from_config(config: &CollaboratorConfig, request_timeout: Duration) -> Result<Self, CollaboratorError> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| CollaboratorError::NotConfigured {
                env_var: config.api_key_env.clone(),
            })?;
        let mut collaborator = Self::new(&config.endpoint, &config.model, &api_key, request_timeout)?;
        collaborator.max_tokens = config.max_tokens;
        Ok(collaborator)
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl Collaborator for HttpCollaborator {
    async fn complete(&self, prompt: &str, temperature: f32) -> Result<String, CollaboratorError> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature,
            max_tokens: self.max_tokens,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        debug!(model = %self.model, temperature, prompt_chars = prompt.len(), "calling collaborator");
        let resp = self
            .client
            .post(format!("{}/chat/completions", self.endpoint))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(CollaboratorError::Transport)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CollaboratorError::Status {
                status: status.as_u16(),
                body: truncate(&body, 500),
            });
        }

        let parsed = resp
            .json::<ChatResponse>()
            .await
            .map_err(CollaboratorError::Transport)?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(CollaboratorError::EmptyResponse)
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

//! Vision backends: profiles, credentials, and the OpenAI-compatible HTTP client.
//!
//! Every supported backend speaks the OpenAI `chat/completions` dialect, so a
//! single [`HttpVisionBackend`] serves all of them. What differs per backend
//! is captured in a [`BackendProfile`]: endpoint, default model, credential
//! variable, sampling defaults, and how the system message is encoded.
//!
//! Credentials are resolved exactly once, when the client is constructed.
//! A missing key fails with [`ExtractError::MissingCredential`] before any
//! socket is opened.

use crate::config::ExtractionConfig;
use crate::error::ExtractError;
use crate::pipeline::llm::{RawResponse, TokenUsage, VisionBackend};
use crate::pipeline::request::ExtractionRequest;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Selects which hosted vision model family to call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Alibaba DashScope, OpenAI-compatible mode (Qwen-VL). (default)
    #[default]
    #[serde(alias = "qwen")]
    DashScope,
    /// Volcengine Ark (Doubao vision models).
    #[serde(alias = "doubao")]
    Ark,
    /// OpenAI.
    OpenAi,
}

/// How the system instruction is placed in the message list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemEncoding {
    /// `content` is an array with one `{"type":"text"}` part.
    Parts,
    /// `content` is a plain string.
    PlainText,
}

/// Static per-backend defaults.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackendProfile {
    pub id: &'static str,
    pub base_url: &'static str,
    pub default_model: &'static str,
    pub credential_env: &'static str,
    pub temperature: f32,
    pub max_output_tokens: Option<u32>,
    pub system_encoding: SystemEncoding,
}

impl Backend {
    pub fn profile(self) -> BackendProfile {
        match self {
            Backend::DashScope => BackendProfile {
                id: "dashscope",
                base_url: "https://dashscope.aliyuncs.com/compatible-mode/v1",
                default_model: "qwen-vl-max",
                credential_env: "DASHSCOPE_API_KEY",
                temperature: 0.0,
                max_output_tokens: None,
                system_encoding: SystemEncoding::Parts,
            },
            Backend::Ark => BackendProfile {
                id: "ark",
                base_url: "https://ark.cn-beijing.volces.com/api/v3",
                default_model: "doubao-1.5-vision-pro-250328",
                credential_env: "ARK_API_KEY",
                temperature: 0.1,
                max_output_tokens: Some(4000),
                system_encoding: SystemEncoding::PlainText,
            },
            Backend::OpenAi => BackendProfile {
                id: "openai",
                base_url: "https://api.openai.com/v1",
                default_model: "gpt-4.1-mini",
                credential_env: "OPENAI_API_KEY",
                temperature: 0.0,
                max_output_tokens: None,
                system_encoding: SystemEncoding::Parts,
            },
        }
    }

    pub fn id(self) -> &'static str {
        self.profile().id
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl std::str::FromStr for Backend {
    type Err = ExtractError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dashscope" | "qwen" => Ok(Backend::DashScope),
            "ark" | "doubao" => Ok(Backend::Ark),
            "openai" => Ok(Backend::OpenAi),
            other => Err(ExtractError::InvalidConfig(format!(
                "unknown backend '{other}' (expected dashscope, ark, or openai)"
            ))),
        }
    }
}

// ── Credentials ──────────────────────────────────────────────────────────

/// An API key. `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Resolve the key for `backend`: explicit key first, then the environment
    /// variable (`env_override` or the profile default) looked up via `lookup`.
    ///
    /// Empty values count as absent.
    pub fn resolve<F>(
        backend: Backend,
        explicit: Option<&str>,
        env_override: Option<&str>,
        lookup: F,
    ) -> Result<Self, ExtractError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = explicit.filter(|k| !k.trim().is_empty()) {
            return Ok(Self(key.trim().to_string()));
        }
        let var = env_override.unwrap_or(backend.profile().credential_env);
        match lookup(var) {
            Some(key) if !key.trim().is_empty() => Ok(Self(key.trim().to_string())),
            _ => Err(ExtractError::MissingCredential {
                backend: backend.id().to_string(),
                env_var: var.to_string(),
            }),
        }
    }

    fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

// ── Errors ───────────────────────────────────────────────────────────────

/// Transport or backend-side failure of a single model call.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("request timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    /// The HTTP exchange worked but the envelope is not a chat completion.
    #[error("unexpected response payload: {0}")]
    Payload(String),
}

// ── HTTP client ──────────────────────────────────────────────────────────

/// Resolved settings for one HTTP backend.
#[derive(Debug, Clone)]
pub struct BackendSettings {
    pub backend: Backend,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_output_tokens: Option<u32>,
    pub timeout: Duration,
}

impl BackendSettings {
    /// Merge config overrides over the backend's profile.
    pub fn from_config(config: &ExtractionConfig) -> Self {
        let profile = config.backend.profile();
        Self {
            backend: config.backend,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| profile.base_url.to_string()),
            model: config
                .model
                .clone()
                .unwrap_or_else(|| profile.default_model.to_string()),
            temperature: config.temperature.unwrap_or(profile.temperature),
            max_output_tokens: config.max_output_tokens.or(profile.max_output_tokens),
            timeout: Duration::from_secs(config.api_timeout_secs),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

/// OpenAI-compatible chat-completions client.
pub struct HttpVisionBackend {
    settings: BackendSettings,
    credential: Credential,
    client: reqwest::Client,
}

impl fmt::Debug for HttpVisionBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpVisionBackend")
            .field("settings", &self.settings)
            .field("credential", &self.credential)
            .finish()
    }
}

impl HttpVisionBackend {
    pub fn new(settings: BackendSettings, credential: Credential) -> Result<Self, ExtractError> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .user_agent(concat!("bol-extract/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ExtractError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self {
            settings,
            credential,
            client,
        })
    }

    /// Build a client from run configuration, resolving the credential with `lookup`.
    pub fn from_config_with<F>(config: &ExtractionConfig, lookup: F) -> Result<Self, ExtractError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let credential = Credential::resolve(
            config.backend,
            config.api_key.as_deref(),
            config.credential_env.as_deref(),
            lookup,
        )?;
        Self::new(BackendSettings::from_config(config), credential)
    }

    /// Build a client from run configuration and the process environment.
    pub fn from_config(config: &ExtractionConfig) -> Result<Self, ExtractError> {
        Self::from_config_with(config, |var| std::env::var(var).ok())
    }

    pub fn settings(&self) -> &BackendSettings {
        &self.settings
    }

    /// The chat-completions body for `request`, as JSON.
    pub fn request_body(
        &self,
        request: &ExtractionRequest,
    ) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self.chat_request(request))
    }

    fn chat_request<'a>(&'a self, request: &'a ExtractionRequest) -> ChatRequest<'a> {
        let system = match self.settings.backend.profile().system_encoding {
            SystemEncoding::Parts => MessageContent::Parts(vec![ContentPart::Text {
                text: &request.system_instruction,
            }]),
            SystemEncoding::PlainText => MessageContent::Text(&request.system_instruction),
        };

        let mut user_parts: Vec<ContentPart<'_>> = request
            .images
            .iter()
            .map(|img| ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: &img.data_uri,
                },
            })
            .collect();
        user_parts.push(ContentPart::Text {
            text: &request.user_instruction,
        });

        ChatRequest {
            model: &self.settings.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: MessageContent::Parts(user_parts),
                },
            ],
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_output_tokens,
        }
    }
}

#[async_trait]
impl VisionBackend for HttpVisionBackend {
    fn id(&self) -> &str {
        self.settings.backend.id()
    }

    fn model(&self) -> &str {
        &self.settings.model
    }

    async fn send(&self, request: &ExtractionRequest) -> Result<RawResponse, BackendError> {
        let url = self.settings.endpoint();
        debug!(
            "POST {} (model={}, images={})",
            url,
            self.settings.model,
            request.images.len()
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.credential.expose())
            .json(&self.chat_request(request))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| self.transport_error(e))?;
        if !status.is_success() {
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }

        parse_chat_response(&body)
    }
}

impl HttpVisionBackend {
    fn transport_error(&self, e: reqwest::Error) -> BackendError {
        if e.is_timeout() {
            BackendError::Timeout {
                secs: self.settings.timeout.as_secs(),
            }
        } else {
            BackendError::Transport(e.to_string())
        }
    }
}

/// Extract the assistant text from a chat-completions response body.
pub fn parse_chat_response(body: &str) -> Result<RawResponse, BackendError> {
    let parsed: ChatResponse = serde_json::from_str(body)
        .map_err(|e| BackendError::Payload(format!("{e}; body: {body}")))?;

    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| BackendError::Payload("response has no choices".into()))?;

    let text = choice
        .message
        .content
        .ok_or_else(|| BackendError::Payload("first choice has no message content".into()))?;

    if choice.finish_reason.as_deref() == Some("length") {
        warn!("Model stopped at its output-token limit; the JSON may be truncated");
    }

    Ok(RawResponse {
        text,
        model: parsed.model,
        finish_reason: choice.finish_reason,
        usage: parsed.usage.map(|u| TokenUsage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        }),
    })
}

// ── Wire types ───────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: MessageContent<'a>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum MessageContent<'a> {
    Text(&'a str),
    Parts(Vec<ContentPart<'a>>),
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl<'a> },
}

#[derive(Serialize)]
struct ImageUrl<'a> {
    url: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

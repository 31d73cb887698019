use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{LlmError, LlmProvider, RunRequest, RunResponse};

/// Wire dialect spoken by the configured endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiMode {
    /// OpenAI-compatible `/chat/completions` (also Dedalus, which adds `mcp_servers`).
    OpenAi,
    /// Ollama native `/api/chat`.
    Ollama,
}

impl ApiMode {
    /// Works out the dialect and the full endpoint from a user-supplied base URL.
    pub fn detect(api_url: &str) -> (Self, String) {
        let base_url = api_url.trim_end_matches('/');

        // Full endpoint paths are used as-is
        if base_url.ends_with("/chat/completions") {
            return (Self::OpenAi, base_url.to_string());
        }
        if base_url.ends_with("/api/chat") {
            return (Self::Ollama, base_url.to_string());
        }
        if base_url.ends_with("/api/generate") {
            return (Self::Ollama, base_url.replace("/api/generate", "/api/chat"));
        }

        // /v1, /v2 ... → OpenAI-compatible
        if let Some((_, version)) = base_url.rsplit_once("/v") {
            if !version.is_empty() && version.chars().all(|c| c.is_ascii_digit()) {
                return (Self::OpenAi, format!("{}/chat/completions", base_url));
            }
        }

        if base_url.ends_with("/api") {
            return (Self::Ollama, format!("{}/chat", base_url));
        }

        if base_url.contains(":11434") || base_url.contains("ollama") {
            return (Self::Ollama, format!("{}/api/chat", base_url));
        }

        (Self::OpenAi, format!("{}/v1/chat/completions", base_url))
    }

    fn name(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Ollama => "ollama",
        }
    }
}

// ─── Wire Types ─────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct OllamaResponse {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ErrorDetail {
    Object { message: String },
    Text(String),
}

// ─── Client ─────────────────────────────────────────────────────────────────

/// HTTP chat-completions client, built once at startup and shared.
pub struct ChatClient {
    client: Client,
    mode: ApiMode,
    endpoint: String,
    api_key: String,
}

impl fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatClient")
            .field("mode", &self.mode)
            .field("endpoint", &self.endpoint)
            .field("has_api_key", &!self.api_key.is_empty())
            .finish_non_exhaustive()
    }
}

impl ChatClient {
    pub fn new(api_url: &str, api_key: &str, timeout: Duration) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::NotConfigured(format!("HTTP client: {}", e)))?;
        let (mode, endpoint) = ApiMode::detect(api_url);

        Ok(Self {
            client,
            mode,
            endpoint,
            api_key: api_key.to_string(),
        })
    }

    pub fn mode(&self) -> ApiMode {
        self.mode
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn build_body(&self, request: &RunRequest<'_>) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": [
                {
                    "role": "user",
                    "content": request.input
                }
            ],
            "stream": false
        });

        if !request.mcp_servers.is_empty() {
            if self.mode == ApiMode::OpenAi {
                body["mcp_servers"] = serde_json::json!(request.mcp_servers);
            } else {
                warn!(
                    "[chat] {} endpoint does not support tool servers, ignoring {:?}",
                    self.mode.name(),
                    request.mcp_servers
                );
            }
        }

        body
    }

    fn extract_content(&self, body: &str) -> Result<String, LlmError> {
        let content = match self.mode {
            ApiMode::OpenAi => {
                let resp: OpenAiResponse =
                    serde_json::from_str(body).map_err(|e| LlmError::ParseError(e.to_string()))?;
                resp.choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.message.content)
            }
            ApiMode::Ollama => {
                let resp: OllamaResponse =
                    serde_json::from_str(body).map_err(|e| LlmError::ParseError(e.to_string()))?;
                resp.message.content
            }
        };

        content.ok_or_else(|| {
            LlmError::ParseError(format!(
                "Unexpected {} response format: {}",
                self.mode.name(),
                body
            ))
        })
    }
}

#[async_trait]
impl LlmProvider for ChatClient {
    async fn run(&self, request: RunRequest<'_>) -> Result<RunResponse, LlmError> {
        if self.mode == ApiMode::OpenAi && self.api_key.is_empty() {
            return Err(LlmError::NotConfigured("LLM_API_KEY not set".to_string()));
        }

        let body = self.build_body(&request);

        let mut req = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json");
        if !self.api_key.is_empty() {
            req = req.header("Authorization", format!("Bearer {}", self.api_key));
        }

        debug!(
            "[chat] Sending request to {} (model={}, tools={})",
            self.endpoint,
            request.model,
            request.mcp_servers.len()
        );
        let resp = req.json(&body).send().await.map_err(|e| {
            LlmError::RequestFailed(format!(
                "error sending request for url ({}): {}",
                self.endpoint, e
            ))
        })?;

        let status = resp.status().as_u16();
        if status == 429 {
            let retry_after_secs = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            return Err(LlmError::RateLimited { retry_after_secs });
        }

        let text = resp
            .text()
            .await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        if !(200..300).contains(&status) {
            let message = match serde_json::from_str::<ErrorBody>(&text) {
                Ok(ErrorBody {
                    error: ErrorDetail::Object { message },
                }) => message,
                Ok(ErrorBody {
                    error: ErrorDetail::Text(message),
                }) => message,
                Err(_) => text,
            };
            return Err(LlmError::ApiError { status, message });
        }

        let final_output = self.extract_content(&text)?;
        Ok(RunResponse { final_output })
    }
}

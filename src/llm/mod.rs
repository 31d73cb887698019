//! Language-model client boundary.
//!
//! Everything that talks to the model goes through [`LlmProvider`], so the
//! pipeline and the HTTP handlers can be driven by a scripted provider in tests.

mod chat;
#[cfg(test)]
mod fake;

pub use chat::ChatClient;
#[cfg(test)]
pub use fake::FakeProvider;

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("API request failed: {0}")]
    RequestFailed(String),

    #[error("API returned error: {status} - {message}")]
    ApiError { status: u16, message: String },

    #[error("Rate limited, retry after {retry_after_secs:?} seconds")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Failed to parse response: {0}")]
    ParseError(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

/// One model invocation: prompt text, model identifier and optional tool servers.
#[derive(Debug, Clone, Copy)]
pub struct RunRequest<'a> {
    pub input: &'a str,
    pub model: &'a str,
    pub mcp_servers: &'a [String],
}

impl<'a> RunRequest<'a> {
    pub fn new(input: &'a str, model: &'a str) -> Self {
        Self {
            input,
            model,
            mcp_servers: &[],
        }
    }

    pub fn with_tools(mut self, mcp_servers: &'a [String]) -> Self {
        self.mcp_servers = mcp_servers;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResponse {
    pub final_output: String,
}

/// A text-generation backend.
///
/// Implementations must be shareable across requests; the server holds one
/// behind an `Arc` for the whole process lifetime.
#[async_trait]
pub trait LlmProvider: Send + Sync + fmt::Debug {
    async fn run(&self, request: RunRequest<'_>) -> Result<RunResponse, LlmError>;
}

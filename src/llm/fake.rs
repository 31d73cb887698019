//! Scripted provider for tests.

use super::{LlmError, LlmProvider, RunRequest, RunResponse};
use async_trait::async_trait;
use std::sync::Mutex;

#[derive(Debug, Clone)]
enum Reply {
    Text(String),
    Fail(String),
}

/// Replies are matched by prompt substring (case-insensitive, first registered wins).
/// Every request is recorded so tests can inspect prompts and tool lists.
#[derive(Debug, Default)]
pub struct FakeProvider {
    replies: Vec<(String, Reply)>,
    default_reply: Option<Reply>,
    calls: Mutex<Vec<(String, Vec<String>)>>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(mut self, prompt_contains: &str, response: &str) -> Self {
        self.replies.push((
            prompt_contains.to_lowercase(),
            Reply::Text(response.to_string()),
        ));
        self
    }

    pub fn with_failure(mut self, prompt_contains: &str, message: &str) -> Self {
        self.replies.push((
            prompt_contains.to_lowercase(),
            Reply::Fail(message.to_string()),
        ));
        self
    }

    pub fn with_default_response(mut self, response: &str) -> Self {
        self.default_reply = Some(Reply::Text(response.to_string()));
        self
    }

    /// Prompts seen so far, with the tool servers each was sent with.
    pub fn calls(&self) -> Vec<(String, Vec<String>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmProvider for FakeProvider {
    async fn run(&self, request: RunRequest<'_>) -> Result<RunResponse, LlmError> {
        self.calls
            .lock()
            .unwrap()
            .push((request.input.to_string(), request.mcp_servers.to_vec()));

        let prompt_lower = request.input.to_lowercase();
        let reply = self
            .replies
            .iter()
            .find(|(pattern, _)| prompt_lower.contains(pattern))
            .map(|(_, reply)| reply)
            .or(self.default_reply.as_ref());

        match reply {
            Some(Reply::Text(text)) => Ok(RunResponse {
                final_output: text.clone(),
            }),
            Some(Reply::Fail(message)) => Err(LlmError::RequestFailed(message.clone())),
            None => Err(LlmError::RequestFailed(format!(
                "FakeProvider: no response configured for prompt: {}",
                request.input.chars().take(100).collect::<String>()
            ))),
        }
    }
}

//! External text generator, consumed as "given a prompt, return text or fail".
//!
//! The production client speaks the OpenAI-compatible chat-completions protocol. Each attempt is
//! bounded by a timeout and failed attempts are retried a small number of times with increasing
//! backoff; callers fall back to static content when every attempt fails.

use core::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::instrument;

use crate::constants::{GENERATOR_ATTEMPTS, GENERATOR_BACKOFF, GENERATOR_TIMEOUT};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

impl GenerationRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            max_tokens: 40,
            temperature: 1.0,
            top_p: 0.95,
        }
    }
}

#[async_trait]
pub trait TextGenerator: Send + Sync + fmt::Debug {
    async fn generate(&self, request: &GenerationRequest) -> GeneratorResult<String>;
}

#[derive(Debug, Serialize)]
struct CompletionBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Clone)]
pub struct ChatCompletionsClient {
    http: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    timeout: Duration,
    attempts: u32,
    backoff: Duration,
}

impl fmt::Debug for ChatCompletionsClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatCompletionsClient")
            .field("url", &self.url)
            .field("model", &self.model)
            .field("attempts", &self.attempts)
            .finish()
    }
}

impl ChatCompletionsClient {
    pub fn new(
        http: reqwest::Client,
        url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            http,
            url: url.into(),
            api_key: api_key.into(),
            model: model.into(),
            timeout: GENERATOR_TIMEOUT,
            attempts: GENERATOR_ATTEMPTS,
            backoff: GENERATOR_BACKOFF,
        }
    }

    #[cfg(test)]
    pub fn with_retry(mut self, timeout: Duration, attempts: u32, backoff: Duration) -> Self {
        self.timeout = timeout;
        self.attempts = attempts.max(1);
        self.backoff = backoff;
        self
    }

    async fn attempt(&self, request: &GenerationRequest) -> GeneratorResult<String> {
        let body = CompletionBody {
            model: &self.model,
            messages: &request.messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            top_p: request.top_p,
        };

        let res = self
            .http
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            return Err(GeneratorErr::Status(status.as_u16()));
        }

        let text = res
            .json::<CompletionResponse>()
            .await?
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .unwrap_or_default();

        if text.is_empty() {
            return Err(GeneratorErr::Empty);
        }

        Ok(text)
    }
}

#[async_trait]
impl TextGenerator for ChatCompletionsClient {
    #[instrument(skip(self, request), fields(model = %self.model))]
    async fn generate(&self, request: &GenerationRequest) -> GeneratorResult<String> {
        let mut last = GeneratorErr::Unavailable;

        for attempt in 1..=self.attempts {
            let outcome = match tokio::time::timeout(self.timeout, self.attempt(request)).await {
                Ok(res) => res,
                Err(_) => Err(GeneratorErr::Timeout),
            };

            match outcome {
                Ok(text) => return Ok(text),
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "generator attempt failed");
                    last = e;
                }
            }

            if attempt < self.attempts {
                tokio::time::sleep(self.backoff * attempt).await;
            }
        }

        Err(last)
    }
}

/// Stand-in used when no generator is configured; every call falls through to static content.
#[derive(Debug, Default)]
pub struct Unavailable;

#[async_trait]
impl TextGenerator for Unavailable {
    async fn generate(&self, _request: &GenerationRequest) -> GeneratorResult<String> {
        Err(GeneratorErr::Unavailable)
    }
}

pub type GeneratorResult<T> = core::result::Result<T, GeneratorErr>;

#[derive(Debug, Error)]
pub enum GeneratorErr {
    #[error("reqwest error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    #[error("generator responded with status {0}")]
    Status(u16),

    #[error("generator returned no text")]
    Empty,

    #[error("generator timed out")]
    Timeout,

    #[error("generator unavailable")]
    Unavailable,
}

#[cfg(test)]
pub mod scripted {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    /// Replays queued replies; `None` entries and an exhausted queue fail the call.
    #[derive(Debug, Default)]
    pub struct ScriptedGenerator {
        replies: Mutex<VecDeque<Option<String>>>,
        requests: Mutex<Vec<GenerationRequest>>,
    }

    impl ScriptedGenerator {
        pub fn new<I, S>(replies: I) -> Self
        where
            I: IntoIterator<Item = Option<S>>,
            S: Into<String>,
        {
            Self {
                replies: Mutex::new(replies.into_iter().map(|r| r.map(Into::into)).collect()),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn requests(&self) -> Vec<GenerationRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TextGenerator for ScriptedGenerator {
        async fn generate(&self, request: &GenerationRequest) -> GeneratorResult<String> {
            self.requests.lock().unwrap().push(request.clone());
            match self.replies.lock().unwrap().pop_front() {
                Some(Some(text)) => Ok(text),
                _ => Err(GeneratorErr::Unavailable),
            }
        }
    }
}

#[cfg(test)]
mod test {
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn client(server: &MockServer) -> ChatCompletionsClient {
        ChatCompletionsClient::new(
            reqwest::Client::new(),
            format!("{}/v1/chat/completions", server.uri()),
            "sk-test",
            "test-model",
        )
        .with_retry(Duration::from_millis(200), 3, Duration::from_millis(5))
    }

    fn request() -> GenerationRequest {
        GenerationRequest::new(vec![
            ChatMessage::system("one short lower-case phrase"),
            ChatMessage::user("где @milia?"),
        ])
    }

    fn completion(text: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{ "index": 0, "message": { "role": "assistant", "content": text } }]
        }))
    }

    #[tokio::test]
    async fn returns_trimmed_completion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({
                "model": "test-model",
                "max_tokens": 40
            })))
            .respond_with(completion("  на кухне \n"))
            .expect(1)
            .mount(&server)
            .await;

        let text = client(&server).generate(&request()).await.unwrap();
        assert_eq!(text, "на кухне");
    }

    #[tokio::test]
    async fn retries_after_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(completion("в шкафу"))
            .mount(&server)
            .await;

        let text = client(&server).generate(&request()).await.unwrap();
        assert_eq!(text, "в шкафу");
    }

    #[tokio::test]
    async fn gives_up_after_all_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let res = client(&server).generate(&request()).await;
        assert!(matches!(res, Err(GeneratorErr::Status(500))));
    }

    #[tokio::test]
    async fn slow_responses_time_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(completion("поздно").set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let res = client(&server).generate(&request()).await;
        assert!(matches!(res, Err(GeneratorErr::Timeout)));
    }

    #[tokio::test]
    async fn empty_completion_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(completion("   "))
            .mount(&server)
            .await;

        let res = client(&server).generate(&request()).await;
        assert!(matches!(res, Err(GeneratorErr::Empty)));
    }
}

//! Research provider: a function that returns prose given a prompt.
//!
//! The HTTP client speaks the chat-completions wire format. [`ThrottledProvider`]
//! serializes calls and spaces them by a fixed delay.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use catalog_storage::{BackoffPolicy, RetryDisposition};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info_span, warn, Instrument};

pub const DEFAULT_ENDPOINT: &str = "https://api.perplexity.ai/chat/completions";
pub const DEFAULT_MODEL: &str = "sonar";

const SYSTEM_PROMPT: &str = "You are a classic car market researcher. List specific vehicles \
     currently for sale, one per line, formatted as: Year Make Model - $Price, followed by the \
     seller location and condition.";

#[derive(Debug, Error)]
pub enum ResearchError {
    #[error("research api key is not configured")]
    MissingApiKey,
    #[error("research request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("research provider returned http {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("research provider returned no content")]
    EmptyResponse,
}

#[async_trait]
pub trait ResearchProvider: Send + Sync {
    async fn research(&self, prompt: &str) -> Result<String, ResearchError>;
}

#[derive(Debug, Clone)]
pub struct ResearchClientConfig {
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub max_tokens: u32,
    pub temperature: f32,
    pub backoff: BackoffPolicy,
}

impl Default for ResearchClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            timeout: Duration::from_secs(60),
            max_tokens: 1000,
            temperature: 0.2,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone)]
pub struct ChatCompletionsProvider {
    client: reqwest::Client,
    config: ResearchClientConfig,
    api_key: String,
}

impl ChatCompletionsProvider {
    pub fn new(config: ResearchClientConfig) -> Result<Self, ResearchError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or(ResearchError::MissingApiKey)?;
        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .build()?;
        Ok(Self {
            client,
            config,
            api_key,
        })
    }

    async fn send_once(&self, prompt: &str) -> Result<Result<String, ResearchError>, reqwest::Error> {
        let body = ChatRequest {
            model: &self.config.model,
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
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };

        let resp = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Ok(Err(ResearchError::HttpStatus {
                status: status.as_u16(),
                body,
            }));
        }

        let parsed: ChatResponse = resp.json().await?;
        let content = parsed
            .choices
            .into_iter()
            .find_map(|c| c.message.content)
            .filter(|c| !c.trim().is_empty());
        Ok(content.ok_or(ResearchError::EmptyResponse))
    }
}

#[async_trait]
impl ResearchProvider for ChatCompletionsProvider {
    async fn research(&self, prompt: &str) -> Result<String, ResearchError> {
        let backoff = self.config.backoff;
        let mut attempt = 0;
        loop {
            let retryable = match self.send_once(prompt).await {
                Ok(Ok(text)) => return Ok(text),
                Ok(Err(ResearchError::HttpStatus { status, body })) => {
                    let retryable = StatusCode::from_u16(status)
                        .map(|s| classify_status(s) == RetryDisposition::Retryable)
                        .unwrap_or(false);
                    if !retryable || attempt >= backoff.max_retries {
                        return Err(ResearchError::HttpStatus { status, body });
                    }
                    true
                }
                Ok(Err(other)) => return Err(other),
                Err(err) => {
                    if classify_reqwest_error(&err) != RetryDisposition::Retryable
                        || attempt >= backoff.max_retries
                    {
                        return Err(ResearchError::Request(err));
                    }
                    true
                }
            };
            debug!(attempt, retryable, "retrying research request");
            tokio::time::sleep(backoff.delay_for_attempt(attempt)).await;
            attempt += 1;
        }
    }
}

/// Serializes calls to the wrapped provider with a fixed delay between them.
#[derive(Debug)]
pub struct ThrottledProvider<P> {
    inner: P,
    delay: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl<P: ResearchProvider> ThrottledProvider<P> {
    pub fn new(inner: P, delay: Duration) -> Self {
        Self {
            inner,
            delay,
            last_call: Mutex::new(None),
        }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }
}

#[async_trait]
impl<P: ResearchProvider> ResearchProvider for ThrottledProvider<P> {
    async fn research(&self, prompt: &str) -> Result<String, ResearchError> {
        // The lock is held across the call so requests never overlap.
        let mut last_call = self.last_call.lock().await;
        if let Some(last) = *last_call {
            let elapsed = last.elapsed();
            if elapsed < self.delay {
                tokio::time::sleep(self.delay - elapsed).await;
            }
        }
        let result = self
            .inner
            .research(prompt)
            .instrument(info_span!("research_call"))
            .await;
        *last_call = Some(Instant::now());
        if let Err(err) = &result {
            warn!(error = %err, "research call failed");
        }
        result
    }
}

#[async_trait]
impl<P: ResearchProvider + ?Sized> ResearchProvider for std::sync::Arc<P> {
    async fn research(&self, prompt: &str) -> Result<String, ResearchError> {
        (**self).research(prompt).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ResearchProvider for CountingProvider {
        async fn research(&self, prompt: &str) -> Result<String, ResearchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("echo: {prompt}"))
        }
    }

    #[test]
    fn status_classification() {
        assert_eq!(classify_status(StatusCode::TOO_MANY_REQUESTS), RetryDisposition::Retryable);
        assert_eq!(classify_status(StatusCode::BAD_GATEWAY), RetryDisposition::Retryable);
        assert_eq!(classify_status(StatusCode::UNAUTHORIZED), RetryDisposition::NonRetryable);
    }

    #[test]
    fn client_requires_api_key() {
        let err = ChatCompletionsProvider::new(ResearchClientConfig::default()).unwrap_err();
        assert!(matches!(err, ResearchError::MissingApiKey));
    }

    #[tokio::test]
    async fn throttle_spaces_consecutive_calls() {
        let provider = Arc::new(ThrottledProvider::new(
            CountingProvider {
                calls: AtomicUsize::new(0),
            },
            Duration::from_millis(40),
        ));

        let started = Instant::now();
        let a = provider.clone();
        let b = provider.clone();
        let (first, second) = tokio::join!(a.research("one"), b.research("two"));
        assert!(first.is_ok() && second.is_ok());
        provider.research("three").await.unwrap();

        assert!(started.elapsed() >= Duration::from_millis(80));
        assert_eq!(provider.inner().calls.load(Ordering::SeqCst), 3);
    }
}

//! OpenRouter chat-completions client.
//!
//! A generated deck is a full HTML document, so the body cap and the default
//! timeout are sized for multi-minute, multi-megabyte answers.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::error::{ErrorContext, ProviderError};
use super::pricing::chat_cost;
use super::types::*;

#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError>;
}

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
const APP_TITLE: &str = "deck-harness";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

const MAX_BODY_BYTES: usize = 4 << 20;
const MAX_PROMPT_CHARS: usize = 600_000;

/// Used when a 429 carries no usable `Retry-After`.
const DEFAULT_RATE_LIMIT_WAIT: Duration = Duration::from_secs(60);

/// Answers longer than this are treated as content even if they open with
/// an apology.
const REFUSAL_MAX_LEN: usize = 2_000;

const REFUSAL_OPENERS: &[&str] = &[
    "refus",
    "i cannot",
    "i can't",
    "i won't",
    "i will not",
    "i am unable to",
    "i'm unable to",
    "unable to comply",
    "unable to assist",
    "unable to help",
    "unable to provide",
];

#[derive(Debug, Clone)]
pub struct OpenRouterAdapter {
    http: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl OpenRouterAdapter {
    pub fn new(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Self::with_config(
            api_key,
            DEFAULT_BASE_URL,
            DEFAULT_TIMEOUT,
            None,
            Some(APP_TITLE.to_string()),
        )
    }

    /// Reads `OPENROUTER_API_KEY` plus the optional `OPENROUTER_BASE_URL`,
    /// `OPENROUTER_TIMEOUT_SECONDS`, `OPENROUTER_REFERER` and
    /// `OPENROUTER_APP_TITLE`.
    pub fn from_env() -> Result<Self, ProviderError> {
        let env = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());

        let api_key =
            env("OPENROUTER_API_KEY").ok_or_else(|| ProviderError::config("OPENROUTER_API_KEY not set"))?;
        let timeout = env("OPENROUTER_TIMEOUT_SECONDS")
            .and_then(|s| s.parse::<u64>().ok())
            .map_or(DEFAULT_TIMEOUT, Duration::from_secs);

        Self::with_config(
            api_key,
            env("OPENROUTER_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            timeout,
            env("OPENROUTER_REFERER"),
            env("OPENROUTER_APP_TITLE").or_else(|| Some(APP_TITLE.to_string())),
        )
    }

    pub fn with_config(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
        referer: Option<String>,
        app_title: Option<String>,
    ) -> Result<Self, ProviderError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let bearer = HeaderValue::from_str(&format!("Bearer {}", api_key.into()))
            .map_err(|_| ProviderError::config("API key contains invalid header characters"))?;
        headers.insert(AUTHORIZATION, bearer);

        let optional = [
            (HeaderName::from_static("http-referer"), referer),
            (HeaderName::from_static("x-title"), app_title),
        ];
        for (name, value) in optional {
            if let Some(v) = value.and_then(|v| HeaderValue::from_str(&v).ok()) {
                headers.insert(name, v);
            }
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .gzip(true)
            .build()
            .map_err(|e| ProviderError::config(format!("building HTTP client: {e}")))?;

        let base_url = base_url.into();
        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            timeout,
        })
    }

    fn body<'a>(req: &'a ChatRequest) -> Result<WireRequest<'a>, ProviderError> {
        let prompt_chars: usize = req.messages.iter().map(|m| m.content.len()).sum();
        if prompt_chars > MAX_PROMPT_CHARS {
            return Err(ProviderError::invalid_request(format!(
                "prompt is {prompt_chars} chars, limit is {MAX_PROMPT_CHARS}"
            )));
        }

        Ok(WireRequest {
            model: req.model.model_id(),
            messages: req.messages.iter().map(WireMessage::from).collect(),
            temperature: req.temperature,
            max_tokens: req.max_tokens,
            response_format: req.json_mode.then_some(WireFormat { kind: "json_object" }),
        })
    }

    async fn send(&self, body: &WireRequest<'_>) -> Result<reqwest::Response, ProviderError> {
        self.http
            .post(&self.endpoint)
            .json(body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))
    }

    fn transport_error(&self, err: reqwest::Error) -> ProviderError {
        if err.is_timeout() {
            ProviderError::Timeout(self.timeout)
        } else {
            ProviderError::Http(err)
        }
    }

    async fn read_capped(&self, mut response: reqwest::Response) -> Result<String, ProviderError> {
        let mut buf = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| self.transport_error(e))? {
            if buf.len() + chunk.len() > MAX_BODY_BYTES {
                return Err(ProviderError::malformed(format!(
                    "response body exceeds {MAX_BODY_BYTES} bytes"
                )));
            }
            buf.extend_from_slice(&chunk);
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

fn header_str(headers: &HeaderMap, name: impl reqwest::header::AsHeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
}

/// Only the delta-seconds form; HTTP dates fall back to the default wait.
fn retry_after(headers: &HeaderMap) -> Duration {
    header_str(headers, RETRY_AFTER)
        .and_then(|s| s.parse::<u64>().ok())
        .map_or(DEFAULT_RATE_LIMIT_WAIT, Duration::from_secs)
}

fn looks_like_refusal(text: &str) -> bool {
    let lowered = text.trim_start().to_lowercase();
    let opener = lowered.lines().next().unwrap_or_default();
    REFUSAL_OPENERS.iter().any(|p| opener.starts_with(p)) || lowered.contains("request was refused")
}

fn http_failure(status: StatusCode, headers: &HeaderMap, body: &str, ctx: ErrorContext) -> ProviderError {
    let api_error = serde_json::from_str::<WireResponse>(body)
        .ok()
        .and_then(|r| r.error);
    let (message, ctx) = match api_error {
        Some(WireError { message, code }) => {
            let ctx = match code {
                Some(code) => ctx.with_code(code),
                None => ctx,
            };
            (message.unwrap_or_else(|| format!("HTTP {}", status.as_u16())), ctx)
        }
        None => (format!("HTTP {}", status.as_u16()), ctx),
    };

    if status == StatusCode::TOO_MANY_REQUESTS {
        ProviderError::rate_limited(retry_after(headers), ctx)
    } else {
        ProviderError::from_status(message, ctx)
    }
}

fn nanodollars(usd: f64) -> i64 {
    ((usd * 1e9).round() as i64).max(0)
}

#[async_trait]
impl ChatProvider for OpenRouterAdapter {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let body = Self::body(req)?;
        let started = Instant::now();

        let response = self.send(&body).await?;
        let status = response.status();
        let headers = response.headers().clone();
        let text = self.read_capped(response).await?;

        if !status.is_success() {
            let ctx = ErrorContext::new()
                .with_status(status.as_u16())
                .with_request_id(header_str(&headers, "x-request-id"));
            return Err(http_failure(status, &headers, &text, ctx));
        }

        let parsed: WireResponse = serde_json::from_str(&text)
            .map_err(|e| ProviderError::malformed(format!("response is not JSON: {e}")))?;

        if let Some(err) = parsed.error {
            let message = err.message.unwrap_or_default();
            return Err(if looks_like_refusal(&message) {
                ProviderError::refused(message)
            } else {
                ProviderError::malformed(message)
            });
        }

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::malformed("response has no choices"))?;
        let content = choice.message.and_then(|m| m.content).unwrap_or_default();

        if content.len() < REFUSAL_MAX_LEN && looks_like_refusal(&content) {
            return Err(ProviderError::refused(content));
        }

        let usage = parsed
            .usage
            .ok_or_else(|| ProviderError::malformed("response has no usage block"))?;
        let input_tokens = usage.prompt_tokens.unwrap_or(0);
        let output_tokens = usage.completion_tokens.unwrap_or(0);
        let cost_nanodollars = match usage.cost {
            Some(usd) => nanodollars(usd),
            None => chat_cost(req.model.model_id(), input_tokens, output_tokens),
        };

        Ok(ChatResponse {
            content,
            input_tokens,
            output_tokens,
            cost_nanodollars,
            latency: started.elapsed(),
            finish_reason: FinishReason::from(choice.finish_reason),
        })
    }
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<WireFormat>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

impl<'a> From<&'a Message> for WireMessage<'a> {
    fn from(m: &'a Message) -> Self {
        let role = match m.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        Self {
            role,
            content: &m.content,
        }
    }
}

#[derive(Serialize)]
struct WireFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct WireResponse {
    #[serde(default)]
    choices: Vec<WireChoice>,
    usage: Option<WireUsage>,
    error: Option<WireError>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: Option<WireChoiceMessage>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct WireUsage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
    cost: Option<f64>,
}

#[derive(Deserialize)]
struct WireError {
    message: Option<String>,
    code: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refusals_are_detected_on_the_first_line() {
        assert!(looks_like_refusal("I can't help with that."));
        assert!(looks_like_refusal("  Refused: policy"));
        assert!(!looks_like_refusal("<!DOCTYPE html>\nI cannot believe these numbers"));
    }

    #[test]
    fn retry_after_reads_seconds_or_defaults() {
        let mut headers = HeaderMap::new();
        assert_eq!(retry_after(&headers), DEFAULT_RATE_LIMIT_WAIT);
        headers.insert(RETRY_AFTER, HeaderValue::from_static("12"));
        assert_eq!(retry_after(&headers), Duration::from_secs(12));
        headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2026 07:28:00 GMT"));
        assert_eq!(retry_after(&headers), DEFAULT_RATE_LIMIT_WAIT);
    }

    #[test]
    fn usd_cost_converts_to_nanodollars() {
        assert_eq!(nanodollars(0.000002), 2_000);
        assert_eq!(nanodollars(-1.0), 0);
    }
}

//! Request and response shapes shared by every text-generation call.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Names the pipeline stage behind a call so usage can be split per stage.
#[derive(Debug, Clone, Copy, Default)]
pub struct Attribution {
    /// e.g. `deck::planner` or `deck::generate_edit`.
    pub caller: &'static str,
}

impl Attribution {
    pub fn new(caller: &'static str) -> Self {
        Self { caller }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }
}

/// A routed model id such as `anthropic/claude-sonnet-4.5`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatModel {
    provider: &'static str,
    id: String,
}

impl ChatModel {
    pub fn openrouter(model_id: impl Into<String>) -> Self {
        Self {
            provider: "openrouter",
            id: model_id.into(),
        }
    }

    pub fn model_id(&self) -> &str {
        &self.id
    }

    pub fn provider(&self) -> &'static str {
        self.provider
    }
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: ChatModel,
    pub messages: Vec<Message>,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// Ask the provider for a single JSON object instead of free text.
    pub json_mode: bool,
    pub attribution: Attribution,
}

impl ChatRequest {
    pub fn new(model: ChatModel, messages: Vec<Message>, attribution: Attribution) -> Self {
        Self {
            model,
            messages,
            temperature: 0.0,
            max_tokens: None,
            json_mode: false,
            attribution,
        }
    }

    pub fn temperature(self, temperature: f32) -> Self {
        Self { temperature, ..self }
    }

    pub fn max_tokens(self, max: u32) -> Self {
        Self {
            max_tokens: Some(max),
            ..self
        }
    }

    pub fn json(self) -> Self {
        Self {
            json_mode: true,
            ..self
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    /// Output token limit reached; generated markup is likely cut off.
    Length,
    ContentFilter,
    Other(String),
    Missing,
}

impl From<Option<String>> for FinishReason {
    fn from(raw: Option<String>) -> Self {
        let Some(raw) = raw else {
            return Self::Missing;
        };
        match raw.as_str() {
            "stop" | "end_turn" => Self::Stop,
            "length" | "max_tokens" => Self::Length,
            "content_filter" => Self::ContentFilter,
            _ => Self::Other(raw),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    /// 1e-9 USD.
    pub cost_nanodollars: i64,
    pub latency: Duration,
    pub finish_reason: FinishReason,
}

impl ChatResponse {
    /// Text with zeroed accounting, for stub gateways.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            input_tokens: 0,
            output_tokens: 0,
            cost_nanodollars: 0,
            latency: Duration::ZERO,
            finish_reason: FinishReason::Stop,
        }
    }

    pub fn was_truncated(&self) -> bool {
        self.finish_reason == FinishReason::Length
    }
}

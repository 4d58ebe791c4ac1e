//! Per-call usage accounting.
//!
//! The gateway hands one [`ProviderCallRecord`] per attempt to a [`UsageSink`];
//! the CLI logs them, tests discard them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::types::{ChatRequest, ChatResponse};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderCallRecord {
    pub provider: &'static str,
    pub model: String,
    pub caller: &'static str,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost_nanodollars: i64,
    pub latency_ms: u64,
    pub status: CallStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<&'static str>,
    pub timestamp: DateTime<Utc>,
}

impl ProviderCallRecord {
    fn base(req: &ChatRequest, status: CallStatus) -> Self {
        Self {
            provider: req.model.provider(),
            model: req.model.model_id().to_string(),
            caller: req.attribution.caller,
            input_tokens: 0,
            output_tokens: 0,
            cost_nanodollars: 0,
            latency_ms: 0,
            status,
            error_code: None,
            timestamp: Utc::now(),
        }
    }

    pub fn success(req: &ChatRequest, resp: &ChatResponse) -> Self {
        Self {
            input_tokens: resp.input_tokens,
            output_tokens: resp.output_tokens,
            cost_nanodollars: resp.cost_nanodollars,
            latency_ms: resp.latency.as_millis() as u64,
            ..Self::base(req, CallStatus::Success)
        }
    }

    pub fn failure(req: &ChatRequest, code: &'static str) -> Self {
        Self {
            error_code: Some(code),
            ..Self::base(req, CallStatus::Error)
        }
    }
}

#[async_trait]
pub trait UsageSink: Send + Sync {
    /// Fire-and-forget; a sink never fails the call it describes.
    async fn record(&self, record: ProviderCallRecord);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopUsageSink;

#[async_trait]
impl UsageSink for NoopUsageSink {
    async fn record(&self, _record: ProviderCallRecord) {}
}

/// One structured `tracing` event per call under the `deck_harness::usage` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingUsageSink;

#[async_trait]
impl UsageSink for TracingUsageSink {
    async fn record(&self, r: ProviderCallRecord) {
        tracing::info!(
            target: "deck_harness::usage",
            provider = r.provider,
            model = %r.model,
            caller = r.caller,
            input_tokens = r.input_tokens,
            output_tokens = r.output_tokens,
            cost_nanos = r.cost_nanodollars,
            latency_ms = r.latency_ms,
            status = ?r.status,
            error_code = r.error_code.unwrap_or(""),
            "provider call"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::types::{Attribution, ChatModel, Message};

    #[test]
    fn records_serialize_without_empty_error_codes() {
        let req = ChatRequest::new(
            ChatModel::openrouter("m/x"),
            vec![Message::user("hi")],
            Attribution::new("deck::planner"),
        );
        let mut resp = ChatResponse::text("ok");
        resp.input_tokens = 10;
        resp.cost_nanodollars = 42;

        let ok = serde_json::to_value(ProviderCallRecord::success(&req, &resp)).unwrap();
        assert_eq!(ok["status"], "success");
        assert_eq!(ok["cost_nanodollars"], 42);
        assert!(ok.get("error_code").is_none());

        let failed = serde_json::to_value(ProviderCallRecord::failure(&req, "timeout")).unwrap();
        assert_eq!(failed["status"], "error");
        assert_eq!(failed["error_code"], "timeout");
        assert_eq!(failed["caller"], "deck::planner");
    }
}

//! JSON-over-HTTP data service adapter.
//!
//! `POST {base}/query` with `{"query", "conversation_id"}`. The service may
//! answer with `{"rows": [...]}`, with `{"columns": [...], "data": [[...]]}`,
//! or with `{"text": "..."}`; each may carry a `conversation_id`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{
    ConversationHandle, DataService, DataServiceError, DataServiceResponse, QueryPayload, Row,
};

/// Maximum allowed response body length (16MB).
const MAX_RESPONSE_LEN: usize = 16 * 1_024 * 1_024;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct HttpDataService {
    client: reqwest::Client,
    base_url: String,
}

impl HttpDataService {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self, DataServiceError> {
        Self::with_config(base_url, token, DEFAULT_TIMEOUT)
    }

    /// Create from `DECK_DATA_URL`, `DECK_DATA_TOKEN` and `DECK_DATA_TIMEOUT_SECONDS`.
    pub fn from_env() -> Result<Self, DataServiceError> {
        let base_url = std::env::var("DECK_DATA_URL")
            .map_err(|_| DataServiceError::config("DECK_DATA_URL not set"))?;
        let token = std::env::var("DECK_DATA_TOKEN").ok();
        let timeout = std::env::var("DECK_DATA_TIMEOUT_SECONDS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TIMEOUT);
        Self::with_config(base_url, token, timeout)
    }

    pub fn with_config(
        base_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, DataServiceError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            let auth_value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| DataServiceError::config("Invalid data service token format"))?;
            headers.insert(AUTHORIZATION, auth_value);
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .gzip(true)
            .build()
            .map_err(|e| DataServiceError::config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client, base_url })
    }

    fn query_url(&self) -> String {
        format!("{}/query", self.base_url)
    }
}

#[derive(Serialize)]
struct QueryApiRequest<'a> {
    query: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    conversation_id: Option<&'a str>,
}

#[derive(Deserialize, Default)]
struct QueryApiResponse {
    #[serde(default)]
    rows: Option<Vec<Value>>,
    #[serde(default)]
    columns: Option<Vec<String>>,
    #[serde(default)]
    data: Option<Vec<Vec<Value>>>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    conversation_id: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[async_trait]
impl DataService for HttpDataService {
    async fn execute(
        &self,
        query: &str,
        handle: &ConversationHandle,
    ) -> Result<DataServiceResponse, DataServiceError> {
        let api_req = QueryApiRequest {
            query,
            conversation_id: handle.id(),
        };

        let mut response = self.client.post(self.query_url()).json(&api_req).send().await?;
        let status = response.status();

        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            let new_len = bytes.len() + chunk.len();
            if new_len > MAX_RESPONSE_LEN {
                return Err(DataServiceError::decode(format!(
                    "Response too large: {new_len} bytes"
                )));
            }
            bytes.extend_from_slice(&chunk);
        }
        let body = String::from_utf8_lossy(&bytes).to_string();

        if !status.is_success() {
            let message = serde_json::from_str::<QueryApiResponse>(&body)
                .ok()
                .and_then(|parsed| parsed.error)
                .unwrap_or_else(|| body.chars().take(200).collect());
            return Err(DataServiceError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: QueryApiResponse = match serde_json::from_str(&body) {
            Ok(parsed) => parsed,
            Err(_) => {
                // Plain-text answers are still answers.
                return Ok(DataServiceResponse {
                    payload: QueryPayload::Text(body),
                    conversation: handle.clone(),
                });
            }
        };

        if let Some(error) = parsed.error {
            return Err(DataServiceError::Rejected(error));
        }

        let conversation = parsed
            .conversation_id
            .clone()
            .map(ConversationHandle::new)
            .unwrap_or_else(|| handle.clone());

        Ok(DataServiceResponse {
            payload: decode_payload(parsed)?,
            conversation,
        })
    }
}

fn decode_payload(parsed: QueryApiResponse) -> Result<QueryPayload, DataServiceError> {
    if let Some(rows) = parsed.rows {
        let objects: Option<Vec<Row>> = rows
            .iter()
            .map(|v| v.as_object().cloned())
            .collect();
        return Ok(match objects {
            Some(objects) => QueryPayload::Rows(objects),
            None => QueryPayload::Text(Value::Array(rows).to_string()),
        });
    }

    if let (Some(columns), Some(data)) = (parsed.columns, parsed.data) {
        let mut rows = Vec::with_capacity(data.len());
        for (i, values) in data.into_iter().enumerate() {
            if values.len() != columns.len() {
                return Err(DataServiceError::decode(format!(
                    "row {i} has {} values for {} columns",
                    values.len(),
                    columns.len()
                )));
            }
            rows.push(columns.iter().cloned().zip(values).collect::<Row>());
        }
        return Ok(QueryPayload::Rows(rows));
    }

    if let Some(text) = parsed.text {
        return Ok(QueryPayload::Text(text));
    }

    Err(DataServiceError::decode(
        "response carries neither rows, columns/data, nor text",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: Value) -> QueryApiResponse {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn columnar_payload_becomes_rows_in_column_order() {
        let payload = decode_payload(parse(json!({
            "columns": ["region", "revenue"],
            "data": [["EU", 10], ["US", 20]]
        })))
        .unwrap();
        let QueryPayload::Rows(rows) = payload else {
            panic!("expected rows");
        };
        assert_eq!(rows.len(), 2);
        let keys: Vec<&String> = rows[0].keys().collect();
        assert_eq!(keys, vec!["region", "revenue"]);
        assert_eq!(rows[1]["revenue"], json!(20));
    }

    #[test]
    fn ragged_columnar_payload_is_rejected() {
        let err = decode_payload(parse(json!({
            "columns": ["a", "b"],
            "data": [["x"]]
        })))
        .unwrap_err();
        assert_eq!(err.code(), "decode");
    }

    #[test]
    fn non_object_rows_fall_back_to_text() {
        let payload = decode_payload(parse(json!({"rows": [1, 2, 3]}))).unwrap();
        assert_eq!(payload, QueryPayload::Text("[1,2,3]".to_string()));
    }

    #[test]
    fn empty_response_is_an_error() {
        assert!(decode_payload(QueryApiResponse::default()).is_err());
    }
}

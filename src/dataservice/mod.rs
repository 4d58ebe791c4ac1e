//! Data-service seam: a natural-language query goes in, tabular rows (or
//! free text) and an updated conversation handle come out.

pub mod error;
pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use error::DataServiceError;
pub use http::HttpDataService;

/// One result row. Column order follows the service's response.
pub type Row = serde_json::Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum QueryPayload {
    Rows(Vec<Row>),
    /// The service answered with something that is not rows.
    Text(String),
}

impl QueryPayload {
    pub fn row_count(&self) -> usize {
        match self {
            Self::Rows(rows) => rows.len(),
            Self::Text(_) => 1,
        }
    }

    /// Serialized form used for token accounting.
    pub fn to_json_string(&self) -> String {
        match self {
            Self::Rows(rows) => serde_json::to_string(rows).unwrap_or_default(),
            Self::Text(text) => text.clone(),
        }
    }
}

/// Opaque token letting successive queries share service-side context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationHandle(Option<String>);

impl ConversationHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(Some(id.into()))
    }

    /// No conversation yet; the service starts one.
    pub fn fresh() -> Self {
        Self(None)
    }

    pub fn id(&self) -> Option<&str> {
        self.0.as_deref()
    }

    pub fn is_fresh(&self) -> bool {
        self.0.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataServiceResponse {
    pub payload: QueryPayload,
    pub conversation: ConversationHandle,
}

#[async_trait]
pub trait DataService: Send + Sync {
    async fn execute(
        &self,
        query: &str,
        handle: &ConversationHandle,
    ) -> Result<DataServiceResponse, DataServiceError>;
}

/// Stand-in for runs that never query data, such as slide edits.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableDataService;

#[async_trait]
impl DataService for UnavailableDataService {
    async fn execute(
        &self,
        _query: &str,
        _handle: &ConversationHandle,
    ) -> Result<DataServiceResponse, DataServiceError> {
        Err(DataServiceError::config("no data service configured"))
    }
}

//! Data-service error types.

#[derive(Debug, thiserror::Error)]
pub enum DataServiceError {
    #[error("data service returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("data service rejected the query: {0}")]
    Rejected(String),

    #[error("malformed data service response: {0}")]
    Decode(String),

    #[error("data service configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl DataServiceError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }

    /// Short stable code for logs and failure reasons.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Status { .. } => "http_status",
            Self::Rejected(_) => "rejected",
            Self::Decode(_) => "decode",
            Self::Config(_) => "config",
            Self::Http(_) => "http",
        }
    }
}

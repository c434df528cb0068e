use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing_error::SpanTrace;
use uuid::Uuid;

use crate::constants::{DEFAULT_PAGE, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Upstream credential. Only `expose` yields the raw value.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey([REDACTED])")
    }
}

/// A resolved upstream model.
#[derive(Debug, Clone, Serialize)]
pub struct ModelReference {
    pub id: i64,
    /// Sent verbatim as the upstream `model` field.
    pub name: String,
    pub base_url: String,
    #[serde(skip_serializing)]
    pub api_key: ApiKey,
    pub created_at: String,
}

impl ModelReference {
    pub fn completions_url(&self) -> String {
        format!(
            "{}{}",
            self.base_url.trim_end_matches('/'),
            crate::constants::CHAT_COMPLETIONS_PATH
        )
    }
}

/// One downstream SSE payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamFrame {
    Delta { content: String },
    Done,
    Error { content: String },
}

impl StreamFrame {
    pub fn delta(content: impl Into<String>) -> Self {
        Self::Delta {
            content: content.into(),
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self::Error {
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, sqlx::FromRow)]
pub struct ChatTranscript {
    pub id: i64,
    #[sqlx(rename = "ai_model_id")]
    pub model_id: i64,
    pub user_id: i64,
    pub user_text: String,
    pub ai_text: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, sqlx::FromRow)]
pub struct AnalysisTranscript {
    pub id: i64,
    #[sqlx(rename = "ai_model_id")]
    pub model_id: i64,
    pub user_id: i64,
    pub start_date: String,
    pub end_date: String,
    pub result: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChatTranscript {
    pub model_id: i64,
    pub user_id: i64,
    pub user_text: String,
    pub ai_text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAnalysisTranscript {
    pub model_id: i64,
    pub user_id: i64,
    pub start_date: String,
    pub end_date: String,
    pub result: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NewTranscript {
    Chat(NewChatTranscript),
    Analysis(NewAnalysisTranscript),
}

impl NewTranscript {
    pub fn output(&self) -> &str {
        match self {
            Self::Chat(c) => &c.ai_text,
            Self::Analysis(a) => &a.result,
        }
    }
}

/// Normalized history paging. Non-positive or unparsable values fall back to
/// the defaults and `page_size` is capped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: i64,
    pub page_size: i64,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: DEFAULT_PAGE,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl PageRequest {
    pub fn from_params(page: Option<&str>, page_size: Option<&str>) -> Self {
        let parse = |raw: Option<&str>| raw.and_then(|v| v.trim().parse::<i64>().ok());
        let page = match parse(page) {
            Some(p) if p > 0 => p,
            _ => DEFAULT_PAGE,
        };
        let page_size = match parse(page_size) {
            Some(s) if s > 0 => s.min(MAX_PAGE_SIZE),
            _ => DEFAULT_PAGE_SIZE,
        };
        Self { page, page_size }
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.page_size)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Page<T> {
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
    pub list: Vec<T>,
}

/// Success envelope for JSON endpoints.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub code: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: StatusCode::OK.as_u16(),
            message: "success".to_string(),
            data: Some(data),
        }
    }
}

impl ApiResponse<()> {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            code: StatusCode::OK.as_u16(),
            message: message.into(),
            data: None,
        }
    }
}

#[derive(Error, Debug)]
pub enum FinanceError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Upstream error (status {0}): {1}")]
    Upstream(StatusCode, String),

    /// Model answered a connectivity check with a failure.
    #[error("Model unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String, SpanTrace),
}

impl FinanceError {
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into(), SpanTrace::capture())
    }

    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Upstream(s, _) => (*s, "UPSTREAM_ERROR"),
            Self::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            Self::Network(_) => (StatusCode::BAD_GATEWAY, "NETWORK_ERROR"),
            Self::Unavailable(_) => (StatusCode::BAD_GATEWAY, "MODEL_UNAVAILABLE"),
            Self::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR"),
            Self::Serialization(_) => (StatusCode::INTERNAL_SERVER_ERROR, "SERIALIZATION_ERROR"),
            Self::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR"),
            Self::Internal(_, _) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }

    /// Message safe to hand to a caller.
    fn public_message(&self) -> String {
        match self {
            Self::Upstream(s, body) => format!("upstream returned {}: {}", s.as_u16(), body),
            Self::InvalidRequest(m) | Self::NotFound(m) | Self::Forbidden(m) => m.clone(),
            Self::Unavailable(m) => format!("model unavailable: {}", m),
            Self::Network(_) => "failed to reach upstream model".to_string(),
            Self::Database(_) => "database error".to_string(),
            Self::Serialization(_) | Self::Io(_) | Self::Internal(_, _) => {
                "internal server error".to_string()
            }
        }
    }
}

impl axum::response::IntoResponse for ObservedError {
    fn into_response(self) -> axum::response::Response {
        let (status, code) = self.inner.status_and_code();
        if status.is_server_error() {
            tracing::error!(
                error = %self.inner,
                span_trace = %self.span_trace,
                "Request failed"
            );
        } else {
            tracing::warn!(error = %self.inner, "Request rejected");
        }
        (
            status,
            axum::Json(serde_json::json!({
                "code": status.as_u16(),
                "message": self.inner.public_message(),
                "error": code,
            })),
        )
            .into_response()
    }
}

#[derive(Debug)]
pub struct ObservedError {
    pub inner: FinanceError,
    pub span_trace: SpanTrace,
}

impl std::fmt::Display for ObservedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}\n\nSpan Trace:\n{}", self.inner, self.span_trace)
    }
}

impl std::error::Error for ObservedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.inner)
    }
}

impl<E> From<E> for ObservedError
where
    E: Into<FinanceError>,
{
    fn from(error: E) -> Self {
        Self {
            inner: error.into(),
            span_trace: SpanTrace::capture(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ObservedError>;

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

pub type DriverResult<T> = Result<T, DriverError>;

/// Every failure surfaced by the driver.
///
/// Messages carry the HTTP status and a category, never credential values.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid input for {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("Authentication failed{}: {message}", fmt_status(.status))]
    Authentication { status: Option<u16>, message: String },

    #[error("Not found: {resource}")]
    NotFound { resource: String },

    #[error("Rate limited after {attempts} attempt(s){}", fmt_retry_after(.retry_after))]
    RateLimited {
        retry_after: Option<Duration>,
        attempts: u32
    },

    #[error("Transient failure after {attempts} attempt(s){}: {message}", fmt_status(.status))]
    Transient {
        status: Option<u16>,
        message: String,
        attempts: u32
    },

    #[error("Request rejected (HTTP {status}{}): {detail}", fmt_code(.code))]
    Request {
        status: u16,
        code: Option<String>,
        detail: String
    },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Request cancelled")]
    Cancelled
}

fn fmt_status(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

fn fmt_retry_after(retry_after: &Option<Duration>) -> String {
    retry_after
        .map(|d| format!(", retry after {}s", d.as_secs()))
        .unwrap_or_default()
}

fn fmt_code(code: &Option<String>) -> String {
    code.as_deref().map(|c| format!(", {c}")).unwrap_or_default()
}

impl DriverError {
    pub(crate) fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into()
        }
    }

    /// Whether the executor may try the same request again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Transient { .. })
    }

    pub fn retry_after(&self) -> Option<Duration> {
        if let Self::RateLimited { retry_after, .. } = self {
            *retry_after
        } else {
            None
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Authentication { status, .. } | Self::Transient { status, .. } => *status,
            Self::RateLimited { .. } => Some(429),
            Self::NotFound { .. } => Some(404),
            Self::Request { status, .. } => Some(*status),
            _ => None
        }
    }

    /// Stable label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Validation { .. } => "validation",
            Self::Authentication { .. } => "authentication",
            Self::NotFound { .. } => "not_found",
            Self::RateLimited { .. } => "rate_limited",
            Self::Transient { .. } => "transient",
            Self::Request { .. } => "request",
            Self::Decode(_) => "decode",
            Self::Cancelled => "cancelled"
        }
    }
}

impl From<hogql::HogQLError> for DriverError {
    fn from(err: hogql::HogQLError) -> Self {
        match err {
            hogql::HogQLError::UnsupportedValue { field, reason } => {
                Self::Validation { field, reason }
            }
        }
    }
}

/// Error payload returned by the PostHog API.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiErrorBody {
    #[serde(rename = "type")]
    pub error_type: Option<String>,
    pub code: Option<String>,
    pub detail: Option<String>
}

const MAX_DETAIL_LEN: usize = 512;

impl ApiErrorBody {
    /// Parses `{type, code, detail}`; anything else becomes an opaque detail.
    pub fn parse(raw: &str) -> Self {
        match serde_json::from_str::<ApiErrorBody>(raw) {
            Ok(body) if body.detail.is_some() || body.code.is_some() => body,
            _ => Self {
                error_type: None,
                code: None,
                detail: Some(truncate(raw.trim(), MAX_DETAIL_LEN))
            }
        }
    }

    pub fn detail_or(&self, fallback: &str) -> String {
        match self.detail.as_deref() {
            Some(detail) if !detail.is_empty() => detail.to_string(),
            _ => fallback.to_string()
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let rate_limited = DriverError::RateLimited {
            retry_after: Some(Duration::from_secs(3)),
            attempts: 3
        };
        assert!(rate_limited.is_retryable());
        assert_eq!(rate_limited.retry_after(), Some(Duration::from_secs(3)));
        assert_eq!(rate_limited.status(), Some(429));

        let auth = DriverError::Authentication {
            status: Some(401),
            message: "check the personal API key".to_string()
        };
        assert!(!auth.is_retryable());
        assert_eq!(auth.retry_after(), None);
        assert_eq!(auth.kind(), "authentication");
    }

    #[test]
    fn test_display_includes_status_and_category() {
        let err = DriverError::Request {
            status: 400,
            code: Some("invalid_input".to_string()),
            detail: "Unknown table".to_string()
        };
        assert_eq!(
            err.to_string(),
            "Request rejected (HTTP 400, invalid_input): Unknown table"
        );

        let err = DriverError::Transient {
            status: Some(503),
            message: "server error".to_string(),
            attempts: 3
        };
        assert_eq!(
            err.to_string(),
            "Transient failure after 3 attempt(s) (HTTP 503): server error"
        );

        let err = DriverError::validation("query", "must not be empty");
        assert_eq!(err.to_string(), "Invalid input for query: must not be empty");
    }

    #[test]
    fn test_error_body_parsing() {
        let body = ApiErrorBody::parse(
            r#"{"type": "validation_error", "code": "invalid_input", "detail": "bad query"}"#
        );
        assert_eq!(body.error_type.as_deref(), Some("validation_error"));
        assert_eq!(body.code.as_deref(), Some("invalid_input"));
        assert_eq!(body.detail.as_deref(), Some("bad query"));

        let opaque = ApiErrorBody::parse("<html>Bad Gateway</html>");
        assert_eq!(opaque.detail.as_deref(), Some("<html>Bad Gateway</html>"));
        assert!(opaque.code.is_none());
    }

    #[test]
    fn test_long_error_body_is_truncated() {
        let raw = "é".repeat(600);
        let body = ApiErrorBody::parse(&raw);
        let detail = body.detail.unwrap();
        assert!(detail.ends_with("..."));
        assert!(detail.len() <= MAX_DETAIL_LEN + 3);
    }
}

use crate::{LimitType, StatementType};
use serde::{Deserialize, Serialize};

/// Why the statement validator refused a query.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "type", content = "detail", rename_all = "snake_case")]
pub enum ValidationError {
    #[error("empty query")]
    Empty,
    #[error("SQL comments are not allowed")]
    CommentDetected,
    #[error("multiple SQL statements are not allowed")]
    MultipleStatements,
    #[error("dangerous database function detected: {0}")]
    DangerousFunction(String),
    #[error("destructive operation detected: {0}")]
    DestructiveOperation(String),
    #[error("write operations are not allowed in read-only mode: {0}")]
    WriteNotAllowed(StatementType),
}

impl ValidationError {
    /// Machine-checkable category, stable across message wording changes.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::Empty => "empty_query",
            Self::CommentDetected => "comment_detected",
            Self::MultipleStatements => "multi_statement",
            Self::DangerousFunction(_) => "dangerous_function",
            Self::DestructiveOperation(_) => "destructive_operation",
            Self::WriteNotAllowed(_) => "write_not_allowed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "type", content = "detail", rename_all = "snake_case")]
pub enum ConfirmationError {
    #[error("write confirmation is not enabled on this server")]
    Disabled,
    #[error("'{0}' is not a valid confirmation token")]
    InvalidToken(String),
    #[error("confirmation token not found")]
    NotFound,
    #[error("confirmation token expired")]
    Expired,
    #[error("this statement is already being executed")]
    InProgress,
    #[error("connection '{0}' is no longer allowed")]
    ConnectionNotAllowed(String),
}

impl ConfirmationError {
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::Disabled => "confirmation_disabled",
            Self::InvalidToken(_) => "invalid_token",
            Self::NotFound => "token_not_found",
            Self::Expired => "token_expired",
            Self::InProgress => "confirmation_in_progress",
            Self::ConnectionNotAllowed(_) => "connection_not_allowed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "type", content = "detail", rename_all = "snake_case")]
pub enum ExecutionError {
    #[error("query timed out after {0}s")]
    Timeout(u64),
    #[error("query failed: {0}")]
    Database(String),
    #[error("{0}")]
    ConnectionNotFound(String),
    #[error("unsupported database engine: {0}")]
    Unsupported(String),
}

impl ExecutionError {
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            Self::Database(_) => "database_error",
            Self::ConnectionNotFound(_) => "connection_not_found",
            Self::Unsupported(_) => "unsupported_engine",
        }
    }
}

/// Everything a tool call can be refused or fail with.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "type", content = "detail", rename_all = "snake_case")]
pub enum QueryGateError {
    #[error("query blocked: {0}")]
    Validation(#[from] ValidationError),
    #[error("{0}")]
    Confirmation(#[from] ConfirmationError),
    #[error("{0}")]
    Execution(#[from] ExecutionError),
    #[error("connection '{0}' is not in the allowed connections list")]
    ConnectionNotAllowed(String),
    #[error("{0}")]
    InvalidInput(String),
}

impl QueryGateError {
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::Validation(e) => e.category(),
            Self::Confirmation(e) => e.category(),
            Self::Execution(e) => e.category(),
            Self::ConnectionNotAllowed(_) => "connection_not_allowed",
            Self::InvalidInput(_) => "invalid_input",
        }
    }
}

pub type QueryGateResult<T> = std::result::Result<T, QueryGateError>;

/// Body returned to a throttled caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct RateLimitExceeded {
    #[serde(rename = "error")]
    pub message: String,
    pub retry_after_seconds: u64,
    pub limit_type: LimitType,
}

impl RateLimitExceeded {
    #[must_use]
    pub fn new(limit_type: LimitType, retry_after_seconds: u64) -> Self {
        let message = match limit_type {
            LimitType::Daily => "Daily rate limit exceeded. Limit resets at midnight UTC.",
            LimitType::Qps => "Too many requests. Please slow down.",
        };
        Self {
            message: message.to_string(),
            retry_after_seconds: retry_after_seconds.max(1),
            limit_type,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories_are_distinct() {
        let errors = [
            ValidationError::Empty.category(),
            ValidationError::CommentDetected.category(),
            ValidationError::MultipleStatements.category(),
            ValidationError::DangerousFunction("COPY".into()).category(),
            ValidationError::DestructiveOperation("DROP".into()).category(),
            ValidationError::WriteNotAllowed(StatementType::Insert).category(),
        ];
        let mut unique = errors.to_vec();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), errors.len());
    }

    #[test]
    fn test_gate_error_delegates_category() {
        let err: QueryGateError = ValidationError::CommentDetected.into();
        assert_eq!(err.category(), "comment_detected");
        assert!(err.to_string().contains("blocked"));

        let err: QueryGateError = ConfirmationError::Expired.into();
        assert_eq!(err.category(), "token_expired");
    }

    #[test]
    fn test_rate_limit_payload_shape() {
        let payload = RateLimitExceeded::new(LimitType::Daily, 0);
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["retry_after_seconds"], 1);
        assert_eq!(json["limit_type"], "daily");
        assert!(json["error"].as_str().unwrap().contains("midnight UTC"));
    }
}

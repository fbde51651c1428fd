// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Error types for the blog API.

use axum::http::StatusCode;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// Field name to messages, rendered as `{"field": ["message", ...]}`.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

/// Every way a request can fail inside the pipeline.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ApiError {
    #[error("Authentication credentials were not provided or are invalid.")]
    Unauthenticated,

    #[error("Request was throttled.")]
    Throttled { retry_after: Duration },

    #[error("Could not satisfy the requested format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid page.")]
    PageNotFound,

    #[error("Validation failed")]
    ValidationFailed(FieldErrors),

    #[error("Not found.")]
    NotFound,

    #[error("Method \"{0}\" not allowed.")]
    MethodNotAllowed(String),

    #[error("Malformed request: {0}")]
    BadRequest(String),

    #[error("Resource store unavailable: {0}")]
    StoreUnavailable(String),
}

impl ApiError {
    /// Validation failure on a single field.
    pub fn invalid(field: &str, message: impl Into<String>) -> Self {
        let mut errors = FieldErrors::new();
        errors.insert(field.to_string(), vec![message.into()]);
        Self::ValidationFailed(errors)
    }

    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::Throttled { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::UnsupportedFormat(_) => StatusCode::NOT_ACCEPTABLE,
            Self::PageNotFound | Self::NotFound => StatusCode::NOT_FOUND,
            Self::ValidationFailed(_) | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Self::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Short machine-readable label, used for metrics and logs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Throttled { .. } => "throttled",
            Self::UnsupportedFormat(_) => "unsupported_format",
            Self::PageNotFound => "page_not_found",
            Self::ValidationFailed(_) => "validation_failed",
            Self::NotFound => "not_found",
            Self::MethodNotAllowed(_) => "method_not_allowed",
            Self::BadRequest(_) => "bad_request",
            Self::StoreUnavailable(_) => "store_unavailable",
        }
    }

    /// Only store outages are worth retrying unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }

    /// Error body as a document tree, ready for any renderer.
    pub fn body(&self) -> Value {
        match self {
            Self::ValidationFailed(fields) => {
                let map: Map<String, Value> = fields
                    .iter()
                    .map(|(field, messages)| (field.clone(), json!(messages)))
                    .collect();
                Value::Object(map)
            }
            // The store detail is logged, not leaked to callers.
            Self::StoreUnavailable(_) => {
                json!({"detail": "Service temporarily unavailable, try again later."})
            }
            other => json!({"detail": other.to_string()}),
        }
    }
}

/// Failures reported by a resource store adapter.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,

    #[error("constraint violated on {field}: {message}")]
    Conflict { field: String, message: String },

    #[error("store I/O failure: {0}")]
    Unavailable(String),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => ApiError::NotFound,
            StoreError::Conflict { field, message } => ApiError::invalid(&field, message),
            StoreError::Unavailable(reason) => ApiError::StoreUnavailable(reason),
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throttled_body_is_exact() {
        let err = ApiError::Throttled {
            retry_after: Duration::from_secs(12),
        };
        assert_eq!(err.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(err.body(), json!({"detail": "Request was throttled."}));
    }

    #[test]
    fn test_only_store_errors_are_server_side() {
        let client_errors = [
            ApiError::Unauthenticated,
            ApiError::UnsupportedFormat("yaml".into()),
            ApiError::PageNotFound,
            ApiError::invalid("headline", "This field is required."),
            ApiError::NotFound,
            ApiError::BadRequest("truncated body".into()),
        ];
        for err in client_errors {
            assert!(err.status().is_client_error(), "{err:?}");
            assert!(!err.is_retryable());
        }

        let outage = ApiError::StoreUnavailable("timeout".into());
        assert!(outage.status().is_server_error());
        assert!(outage.is_retryable());
    }

    #[test]
    fn test_validation_body_lists_fields() {
        let err = ApiError::invalid("scoring", "Ensure that there are no more than 5 digits in total.");
        assert_eq!(
            err.body(),
            json!({"scoring": ["Ensure that there are no more than 5 digits in total."]})
        );
    }

    #[test]
    fn test_store_error_conversion() {
        assert_eq!(ApiError::from(StoreError::NotFound), ApiError::NotFound);
        assert!(matches!(
            ApiError::from(StoreError::Unavailable("disk".into())),
            ApiError::StoreUnavailable(_)
        ));
        assert!(matches!(
            ApiError::from(StoreError::Conflict {
                field: "username".into(),
                message: "taken".into()
            }),
            ApiError::ValidationFailed(_)
        ));
    }
}

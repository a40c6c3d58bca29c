//! Gateway error types with HTTP status code mapping.
//!
//! [`GatewayError`] is the central error type for the gateway. Each variant
//! maps to a specific HTTP status code, a machine-readable string code and a
//! structured JSON error response.

use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::billing::{BillingError, SignatureError};
use crate::domain::{
    EntitlementDenial, Feature, LimitDimension, PackageTier, TransitionError, UsageDimension,
};
use crate::persistence::StoreError;

/// Structured JSON error response body.
///
/// All error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": "LIMIT_REACHED",
///     "message": "guests limit of 10 reached",
///     "details": { "dimension": "guests", "limit": 10 }
///   }
/// }
/// ```
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with string code and human-readable message.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Machine-readable error code.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// Optional structured details.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub details: Option<serde_json::Value>,
}

/// Server-side error enum with HTTP status code mapping.
///
/// | Code               | HTTP Status |
/// |--------------------|-------------|
/// | `VALIDATION_ERROR` | 400         |
/// | `UNAUTHORIZED`     | 401         |
/// | `FORBIDDEN`        | 403         |
/// | `NOT_FOUND`        | 404         |
/// | `CONFLICT`         | 409         |
/// | `UPGRADE_REQUIRED` | 403         |
/// | `LIMIT_REACHED`    | 403         |
/// | `EXPIRED`          | 403         |
/// | `RATE_LIMITED`     | 429         |
/// | `INTERNAL_ERROR`   | 500         |
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Request validation failed.
    #[error("invalid request: {0}")]
    Validation(String),

    /// No or invalid identity.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Authenticated but not allowed.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The addressed resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Duplicate value or action already applied.
    #[error("conflict: {0}")]
    Conflict(String),

    /// An abuse limit tripped.
    #[error("rate limit exceeded on {dimension}; retry after {retry_after_secs} s")]
    RateLimited {
        /// The limited dimension.
        dimension: LimitDimension,
        /// Seconds until the client may retry.
        retry_after_secs: u64,
    },

    /// The feature is not part of the event's package.
    #[error("feature {feature} requires the {required} package")]
    UpgradeRequired {
        /// Requested feature.
        feature: Feature,
        /// Cheapest package granting it.
        required: PackageTier,
    },

    /// A usage quota is exhausted.
    #[error("{dimension} limit of {limit} reached")]
    LimitReached {
        /// Exhausted dimension.
        dimension: UsageDimension,
        /// The numeric quota.
        limit: i64,
    },

    /// The event's entitlement has expired.
    #[error("entitlement expired at {expired_at}")]
    Expired {
        /// When it expired.
        expired_at: DateTime<Utc>,
    },

    /// Internal server error.
    #[error("internal error: {message}")]
    Internal {
        /// Generic message.
        message: String,
        /// Underlying cause, exposed for operator diagnosis.
        detail: Option<String>,
    },
}

impl GatewayError {
    /// Internal error without exposed detail.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            detail: None,
        }
    }

    /// Returns the string error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::UpgradeRequired { .. } => "UPGRADE_REQUIRED",
            Self::LimitReached { .. } => "LIMIT_REACHED",
            Self::Expired { .. } => "EXPIRED",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_)
            | Self::UpgradeRequired { .. }
            | Self::LimitReached { .. }
            | Self::Expired { .. } => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Structured details for the response body, if any.
    #[must_use]
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::RateLimited {
                dimension,
                retry_after_secs,
            } => Some(serde_json::json!({
                "dimension": dimension,
                "retry_after_secs": retry_after_secs,
            })),
            Self::UpgradeRequired { feature, required } => Some(serde_json::json!({
                "feature": feature,
                "required_package": required,
            })),
            Self::LimitReached { dimension, limit } => Some(serde_json::json!({
                "dimension": dimension,
                "limit": limit,
            })),
            Self::Expired { expired_at } => Some(serde_json::json!({ "expired_at": expired_at })),
            Self::Internal {
                detail: Some(detail),
                ..
            } => Some(serde_json::json!({ "detail": detail })),
            _ => None,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let retry_after = match &self {
            Self::RateLimited {
                retry_after_secs, ..
            } => Some(*retry_after_secs),
            _ => None,
        };
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code().to_string(),
                message: self.to_string(),
                details: self.details(),
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

impl From<StoreError> for GatewayError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(message) => Self::Conflict(message),
            StoreError::NotFound(message) => Self::NotFound(message),
            StoreError::Database(_) | StoreError::Corrupt(_) => {
                tracing::error!(error = %err, "store failure");
                Self::internal("storage unavailable")
            }
        }
    }
}

impl From<EntitlementDenial> for GatewayError {
    fn from(denial: EntitlementDenial) -> Self {
        match denial {
            EntitlementDenial::UpgradeRequired { feature, required } => {
                Self::UpgradeRequired { feature, required }
            }
            EntitlementDenial::LimitReached { dimension, limit } => {
                Self::LimitReached { dimension, limit }
            }
            EntitlementDenial::Expired { expired_at } => Self::Expired { expired_at },
        }
    }
}

impl From<TransitionError> for GatewayError {
    fn from(err: TransitionError) -> Self {
        Self::Conflict(err.to_string())
    }
}

impl From<SignatureError> for GatewayError {
    fn from(err: SignatureError) -> Self {
        match err {
            SignatureError::Malformed(_) => Self::Validation(err.to_string()),
            SignatureError::Missing | SignatureError::Mismatch => {
                Self::Unauthorized(err.to_string())
            }
        }
    }
}

impl From<BillingError> for GatewayError {
    fn from(err: BillingError) -> Self {
        tracing::error!(error = %err, "payment gateway failure");
        Self::Internal {
            message: "payment gateway unavailable".to_string(),
            detail: Some(err.to_string()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn codes_and_statuses_line_up() {
        let cases = [
            (GatewayError::Validation("x".into()), "VALIDATION_ERROR", 400),
            (GatewayError::Unauthorized("x".into()), "UNAUTHORIZED", 401),
            (GatewayError::Forbidden("x".into()), "FORBIDDEN", 403),
            (GatewayError::NotFound("x".into()), "NOT_FOUND", 404),
            (GatewayError::Conflict("x".into()), "CONFLICT", 409),
            (GatewayError::internal("x"), "INTERNAL_ERROR", 500),
        ];
        for (err, code, status) in cases {
            assert_eq!(err.error_code(), code);
            assert_eq!(err.status_code().as_u16(), status);
        }
    }

    #[test]
    fn rate_limited_response_carries_retry_after() {
        let response = GatewayError::RateLimited {
            dimension: LimitDimension::Ip,
            retry_after_secs: 42,
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let Some(value) = response.headers().get(header::RETRY_AFTER) else {
            panic!("missing Retry-After");
        };
        assert_eq!(value, "42");
    }

    #[test]
    fn denials_name_the_package_or_limit() {
        let err = GatewayError::from(EntitlementDenial::LimitReached {
            dimension: UsageDimension::Guests,
            limit: 10,
        });
        assert_eq!(err.error_code(), "LIMIT_REACHED");
        let Some(details) = err.details() else {
            panic!("missing details");
        };
        assert_eq!(details["limit"], 10);

        let err = GatewayError::from(EntitlementDenial::UpgradeRequired {
            feature: Feature::Export,
            required: PackageTier::Premium,
        });
        let Some(details) = err.details() else {
            panic!("missing details");
        };
        assert_eq!(details["required_package"], "premium");
    }

    #[test]
    fn signature_errors_split_between_401_and_400() {
        let missing = GatewayError::from(SignatureError::Missing);
        assert_eq!(missing.status_code(), StatusCode::UNAUTHORIZED);
        let malformed = GatewayError::from(SignatureError::Malformed("odd length".into()));
        assert_eq!(malformed.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn store_conflicts_stay_conflicts() {
        let err = GatewayError::from(StoreError::Conflict("slug taken".into()));
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        let err = GatewayError::from(StoreError::Database("boom".into()));
        assert_eq!(err.error_code(), "INTERNAL_ERROR");
        assert!(err.details().is_none());
    }
}

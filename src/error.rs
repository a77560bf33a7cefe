//! Unified error handling for the settlement backend.
//!
//! Business-rule violations are recovered locally and reported as structured
//! results; only infrastructure failures propagate upward. Every error maps
//! to an HTTP status, a stable machine-readable code and a user-safe
//! message.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::database::error::DatabaseError;
use crate::gateways::error::GatewayError;
use crate::money::MoneyError;
use crate::orders::TransitionError;

/// Stable error codes for programmatic client handling.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    // Domain errors (4xx)
    #[serde(rename = "INVALID_TRANSITION")]
    InvalidTransition,
    #[serde(rename = "ORDER_NOT_FOUND")]
    OrderNotFound,
    #[serde(rename = "PROMOTION_NOT_FOUND")]
    PromotionNotFound,
    #[serde(rename = "PROMOTION_EXHAUSTED")]
    PromotionExhausted,
    #[serde(rename = "AMOUNT_MISMATCH")]
    AmountMismatch,
    #[serde(rename = "INVALID_AMOUNT")]
    InvalidAmount,
    #[serde(rename = "ORDER_NOT_RATEABLE")]
    OrderNotRateable,
    #[serde(rename = "DUPLICATE_CALLBACK")]
    DuplicateCallback,

    // Infrastructure errors (5xx)
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError,
    #[serde(rename = "CONFIGURATION_ERROR")]
    ConfigurationError,

    // External errors (502, 503, 504)
    #[serde(rename = "PAYMENT_PROVIDER_ERROR")]
    PaymentProviderError,
    #[serde(rename = "SIGNATURE_VERIFICATION_FAILED")]
    SignatureVerificationFailed,
    #[serde(rename = "RATE_LIMIT_ERROR")]
    RateLimitError,

    // Generic
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
}

/// Domain-specific business logic errors
#[derive(Debug, Clone)]
pub enum DomainError {
    /// An event is inapplicable to the order's current state.
    InvalidTransition { status: String, event: String },
    /// Order with the given id doesn't exist.
    OrderNotFound { order_id: String },
    /// Promotion code doesn't exist or isn't live.
    PromotionNotFound { code: String },
    /// Promotion limit consumed between cart time and settlement.
    PromotionExhausted { code: String },
    /// Confirmed payment amount disagrees with the order total.
    AmountMismatch { expected: i64, received: i64 },
    /// Amount is invalid (negative, malformed, or out of range).
    InvalidAmount { reason: String },
    /// Rating requires a delivered order.
    OrderNotRateable { status: String },
}

/// Infrastructure-level errors (database, configuration)
#[derive(Debug, Clone)]
pub enum InfrastructureError {
    Database { message: String, is_retryable: bool },
    Configuration { message: String },
}

/// External service errors (payment gateways)
#[derive(Debug, Clone)]
pub enum ExternalError {
    PaymentGateway {
        provider: String,
        message: String,
        is_retryable: bool,
    },
    RateLimit {
        service: String,
        retry_after: Option<u64>,
    },
}

/// Input validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    InvalidProvider { provider: String },
    InvalidPromotionCode { code: String },
    MissingField { field: String },
    OutOfRange { field: String, reason: String },
}

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Domain(DomainError),
    Infrastructure(InfrastructureError),
    External(ExternalError),
    Validation(ValidationError),
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
            context: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::InvalidTransition { .. } => 409,
                DomainError::OrderNotFound { .. } => 404,
                DomainError::PromotionNotFound { .. } => 404,
                DomainError::PromotionExhausted { .. } => 409,
                DomainError::AmountMismatch { .. } => 409,
                DomainError::InvalidAmount { .. } => 400,
                DomainError::OrderNotRateable { .. } => 409,
            },
            AppErrorKind::Infrastructure(_) => 500,
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentGateway { .. } => 502,
                ExternalError::RateLimit { .. } => 429,
            },
            AppErrorKind::Validation(_) => 400,
        }
    }

    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::InvalidTransition { .. } => ErrorCode::InvalidTransition,
                DomainError::OrderNotFound { .. } => ErrorCode::OrderNotFound,
                DomainError::PromotionNotFound { .. } => ErrorCode::PromotionNotFound,
                DomainError::PromotionExhausted { .. } => ErrorCode::PromotionExhausted,
                DomainError::AmountMismatch { .. } => ErrorCode::AmountMismatch,
                DomainError::InvalidAmount { .. } => ErrorCode::InvalidAmount,
                DomainError::OrderNotRateable { .. } => ErrorCode::OrderNotRateable,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => ErrorCode::DatabaseError,
                InfrastructureError::Configuration { .. } => ErrorCode::ConfigurationError,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentGateway { .. } => ErrorCode::PaymentProviderError,
                ExternalError::RateLimit { .. } => ErrorCode::RateLimitError,
            },
            AppErrorKind::Validation(_) => ErrorCode::ValidationError,
        }
    }

    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::InvalidTransition { .. } => {
                    "Order cannot be modified in its current state".to_string()
                }
                DomainError::OrderNotFound { .. } => "Order not found".to_string(),
                DomainError::PromotionNotFound { code } => {
                    format!("Promotion code {code} is not available")
                }
                DomainError::PromotionExhausted { code } => {
                    format!("Promotion code {code} has been fully redeemed")
                }
                DomainError::AmountMismatch { .. } => {
                    "Payment amount does not match the order total".to_string()
                }
                DomainError::InvalidAmount { reason } => format!("Invalid amount: {reason}"),
                DomainError::OrderNotRateable { .. } => {
                    "Only delivered orders can be rated".to_string()
                }
            },
            AppErrorKind::Infrastructure(_) => "Internal server error".to_string(),
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentGateway { .. } => {
                    "Payment provider is temporarily unavailable".to_string()
                }
                ExternalError::RateLimit { .. } => {
                    "Too many requests. Please retry shortly".to_string()
                }
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::InvalidProvider { provider } => {
                    format!("Unsupported payment provider: {provider}")
                }
                ValidationError::InvalidPromotionCode { .. } => {
                    "Promotion code format is invalid".to_string()
                }
                ValidationError::MissingField { field } => format!("Missing field: {field}"),
                ValidationError::OutOfRange { field, reason } => {
                    format!("{field} out of range: {reason}")
                }
            },
        }
    }

    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Domain(_) | AppErrorKind::Validation(_) => false,
            AppErrorKind::Infrastructure(err) => {
                matches!(err, InfrastructureError::Database { is_retryable: true, .. })
            }
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentGateway { is_retryable, .. } => *is_retryable,
                ExternalError::RateLimit { .. } => true,
            },
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            AppErrorKind::Domain(err) => write!(f, "domain error: {err:?}"),
            AppErrorKind::Infrastructure(err) => write!(f, "infrastructure error: {err:?}"),
            AppErrorKind::External(err) => write!(f, "external error: {err:?}"),
            AppErrorKind::Validation(err) => write!(f, "validation error: {err:?}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<DatabaseError> for AppError {
    fn from(err: DatabaseError) -> Self {
        AppError::new(AppErrorKind::Infrastructure(InfrastructureError::Database {
            message: err.to_string(),
            is_retryable: err.is_retryable(),
        }))
    }
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        match &err {
            GatewayError::RateLimitError {
                retry_after_seconds,
                ..
            } => AppError::new(AppErrorKind::External(ExternalError::RateLimit {
                service: "gateway".to_string(),
                retry_after: *retry_after_seconds,
            })),
            _ => AppError::new(AppErrorKind::External(ExternalError::PaymentGateway {
                provider: "gateway".to_string(),
                message: err.to_string(),
                is_retryable: err.is_retryable(),
            })),
        }
    }
}

impl From<MoneyError> for AppError {
    fn from(err: MoneyError) -> Self {
        AppError::new(AppErrorKind::Domain(DomainError::InvalidAmount {
            reason: err.to_string(),
        }))
    }
}

impl From<TransitionError> for AppError {
    fn from(err: TransitionError) -> Self {
        let TransitionError::InvalidTransition { status, event } = err;
        AppError::new(AppErrorKind::Domain(DomainError::InvalidTransition {
            status: status.to_string(),
            event: event.to_string(),
        }))
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_the_taxonomy() {
        let invalid = AppError::new(AppErrorKind::Domain(DomainError::InvalidTransition {
            status: "delivered".to_string(),
            event: "user_cancel".to_string(),
        }));
        assert_eq!(invalid.status_code(), 409);
        assert_eq!(invalid.error_code(), ErrorCode::InvalidTransition);
        assert!(!invalid.is_retryable());

        let gateway = AppError::new(AppErrorKind::External(ExternalError::PaymentGateway {
            provider: "momo".to_string(),
            message: "timeout".to_string(),
            is_retryable: true,
        }));
        assert_eq!(gateway.status_code(), 502);
        assert!(gateway.is_retryable());
    }

    #[test]
    fn user_messages_never_leak_internals() {
        let db = AppError::new(AppErrorKind::Infrastructure(InfrastructureError::Database {
            message: "connection refused to 10.0.0.3:5432".to_string(),
            is_retryable: true,
        }));
        assert_eq!(db.user_message(), "Internal server error");
    }

    #[test]
    fn transition_errors_convert_with_context() {
        let err: AppError = TransitionError::InvalidTransition {
            status: crate::orders::OrderStatus::Delivered,
            event: crate::orders::OrderEvent::UserCancel,
        }
        .into();
        assert_eq!(err.error_code(), ErrorCode::InvalidTransition);
    }
}

//! Error types and HTTP response conversion

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::registry::RegistryError;

// ============================================================================
// Structured Store Errors
// ============================================================================

/// Store operation being performed when the error occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    /// Establishing a connection
    Connect,
    /// Creating tables and indexes
    Migration,
    /// Inserting an event
    Insert,
    /// Reading events
    Query,
    /// Deleting an event
    Delete,
    /// Acquiring a connection from the pool
    PoolAcquire,
}

impl fmt::Display for StoreOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect => write!(f, "connect"),
            Self::Migration => write!(f, "migration"),
            Self::Insert => write!(f, "insert"),
            Self::Query => write!(f, "query"),
            Self::Delete => write!(f, "delete"),
            Self::PoolAcquire => write!(f, "pool_acquire"),
        }
    }
}

/// Category of store error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreErrorKind {
    /// Failed to establish connection
    ConnectionFailed,
    /// Query execution failed
    QueryFailed,
    /// Constraint violation (unique, foreign key, check)
    ConstraintViolation,
    /// Stored value could not be decoded
    TypeConversion,
    /// Configuration error
    Configuration,
    /// Operation timed out
    Timeout,
    /// Connection pool exhausted
    PoolExhausted,
    /// Other/unknown error
    Other,
}

impl fmt::Display for StoreErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionFailed => write!(f, "connection_failed"),
            Self::QueryFailed => write!(f, "query_failed"),
            Self::ConstraintViolation => write!(f, "constraint_violation"),
            Self::TypeConversion => write!(f, "type_conversion"),
            Self::Configuration => write!(f, "configuration"),
            Self::Timeout => write!(f, "timeout"),
            Self::PoolExhausted => write!(f, "pool_exhausted"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// Structured store error with operation context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreError {
    /// The operation being performed when the error occurred
    pub operation: StoreOperation,
    /// The category of error
    pub kind: StoreErrorKind,
    /// Human-readable error message
    pub message: String,
}

impl StoreError {
    /// Create a new store error
    pub fn new(
        operation: StoreOperation,
        kind: StoreErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            operation,
            kind,
            message: message.into(),
        }
    }

    /// Create a connection failed error
    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::new(
            StoreOperation::Connect,
            StoreErrorKind::ConnectionFailed,
            message,
        )
    }

    /// Create a timeout error
    pub fn timeout(operation: StoreOperation, message: impl Into<String>) -> Self {
        Self::new(operation, StoreErrorKind::Timeout, message)
    }

    /// Create a query failed error
    pub fn query_failed(operation: StoreOperation, message: impl Into<String>) -> Self {
        Self::new(operation, StoreErrorKind::QueryFailed, message)
    }

    /// Re-tag the error with the operation that was actually running
    pub fn during(mut self, operation: StoreOperation) -> Self {
        if self.operation != StoreOperation::Connect {
            self.operation = operation;
        }
        self
    }

    /// Check if this error is transient (may succeed on a later delivery)
    pub fn is_retriable(&self) -> bool {
        matches!(
            self.kind,
            StoreErrorKind::ConnectionFailed
                | StoreErrorKind::Timeout
                | StoreErrorKind::PoolExhausted
        )
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Store {} error during {}: {}",
            self.kind, self.operation, self.message
        )
    }
}

impl std::error::Error for StoreError {}

#[cfg(feature = "database")]
impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        use sqlx::Error as E;
        match err {
            E::PoolTimedOut => Self::new(
                StoreOperation::PoolAcquire,
                StoreErrorKind::PoolExhausted,
                "Connection pool timed out",
            ),
            E::PoolClosed => Self::connection_failed("Connection pool is closed"),
            E::WorkerCrashed => Self::connection_failed("Database worker crashed"),
            E::Io(e) => Self::connection_failed(e.to_string()),
            E::Tls(e) => Self::connection_failed(format!("TLS error: {}", e)),
            E::Configuration(e) => Self::new(
                StoreOperation::Connect,
                StoreErrorKind::Configuration,
                e.to_string(),
            ),
            E::ColumnDecode { index, source } => Self::new(
                StoreOperation::Query,
                StoreErrorKind::TypeConversion,
                format!("Failed to decode column {}: {}", index, source),
            ),
            E::Decode(e) => Self::new(
                StoreOperation::Query,
                StoreErrorKind::TypeConversion,
                e.to_string(),
            ),
            E::Database(db_err) => {
                let kind = if db_err.is_unique_violation()
                    || db_err.is_foreign_key_violation()
                    || db_err.is_check_violation()
                {
                    StoreErrorKind::ConstraintViolation
                } else {
                    StoreErrorKind::QueryFailed
                };
                Self::new(StoreOperation::Query, kind, db_err.to_string())
            }
            _ => Self::new(StoreOperation::Query, StoreErrorKind::Other, err.to_string()),
        }
    }
}

/// Sanitize a connection URL by removing credentials
pub fn sanitize_url(url: &str) -> String {
    if let Some(at_pos) = url.rfind('@') {
        if let Some(scheme_end) = url.find("://") {
            if scheme_end < at_pos {
                let scheme = &url[..scheme_end + 3];
                let after_at = &url[at_pos + 1..];
                return format!("{}<redacted>@{}", scheme, after_at);
            }
        }
    }
    url.to_string()
}

// ============================================================================
// Delivery queue errors
// ============================================================================

/// Delivery queue failure
#[derive(Debug, Error)]
pub enum QueueError {
    /// Broker could not be reached
    #[error("queue unavailable: {0}")]
    Unavailable(String),

    /// Broker did not confirm a publish
    #[error("failed to publish to {subject}: {message}")]
    Publish {
        /// Subject or queue name
        subject: String,
        /// Broker error
        message: String,
    },

    /// Subscription could not be created or broke down
    #[error("subscription failed: {0}")]
    Subscribe(String),

    /// Acknowledgement could not be delivered to the broker
    #[error("acknowledgement failed: {0}")]
    Ack(String),
}

// ============================================================================
// Intake errors
// ============================================================================

/// Synchronous intake failure, reported to the submitting client
#[derive(Debug, Error)]
pub enum IntakeError {
    /// Event type name not in the registry
    #[error("Invalid event type: {0}")]
    InvalidEventType(String),

    /// Status name not in the registry
    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    /// Submission could not be parsed or serialized
    #[error("Malformed submission: {0}")]
    Malformed(String),

    /// The delivery queue rejected the event
    #[error("Delivery unavailable: {0}")]
    DeliveryUnavailable(#[source] QueueError),
}

impl IntakeError {
    /// Validation failures are the caller's fault and are never retried
    pub fn is_validation(&self) -> bool {
        !matches!(self, Self::DeliveryUnavailable(_))
    }
}

impl From<RegistryError> for IntakeError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound { kind: "status", name } => Self::InvalidStatus(name),
            RegistryError::NotFound { name, .. } => Self::InvalidEventType(name),
            RegistryError::UnknownCode { .. } => Self::Malformed(err.to_string()),
        }
    }
}

// ============================================================================
// Service error
// ============================================================================

/// Result type alias using the service error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the service
///
/// Large error variants are boxed to reduce stack size
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(Box<figment::Error>),

    /// Intake rejected a submission
    #[error("{0}")]
    Intake(#[from] IntakeError),

    /// Store error
    #[error("{0}")]
    Store(#[from] StoreError),

    /// Delivery queue error
    #[error("{0}")]
    Queue(#[from] QueueError),

    /// JWT error (requires `jwt` feature)
    #[cfg(feature = "jwt")]
    #[error("JWT error: {0}")]
    Jwt(Box<jsonwebtoken::errors::Error>),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Authentication error
    #[error("Authentication failed: {0}")]
    Unauthorized(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Bad request
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Internal server error
    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error message
    pub error: String,

    /// Optional error code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    /// HTTP status code
    pub status: u16,
}

impl ErrorResponse {
    /// Create a new error response
    pub fn new(status: StatusCode, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: None,
            status: status.as_u16(),
        }
    }

    /// Create error response with a code
    pub fn with_code(
        status: StatusCode,
        code: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            error: error.into(),
            code: Some(code.into()),
            status: status.as_u16(),
        }
    }
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_response) = match self {
            Error::Config(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse::with_code(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "CONFIG_ERROR",
                    e.to_string(),
                ),
            ),

            Error::Intake(e) => match e {
                IntakeError::InvalidEventType(_) => (
                    StatusCode::BAD_REQUEST,
                    ErrorResponse::with_code(
                        StatusCode::BAD_REQUEST,
                        "INVALID_EVENT_TYPE",
                        "Invalid event type",
                    ),
                ),
                IntakeError::InvalidStatus(_) => (
                    StatusCode::BAD_REQUEST,
                    ErrorResponse::with_code(
                        StatusCode::BAD_REQUEST,
                        "INVALID_STATUS",
                        "Invalid status",
                    ),
                ),
                IntakeError::Malformed(msg) => (
                    StatusCode::BAD_REQUEST,
                    ErrorResponse::with_code(StatusCode::BAD_REQUEST, "MALFORMED_EVENT", msg),
                ),
                IntakeError::DeliveryUnavailable(e) => {
                    tracing::error!(error = %e, "Event could not be enqueued");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        ErrorResponse::with_code(
                            StatusCode::INTERNAL_SERVER_ERROR,
                            "DELIVERY_UNAVAILABLE",
                            "Event delivery is currently unavailable",
                        ),
                    )
                }
            },

            Error::Store(ref e) => {
                tracing::error!(
                    operation = %e.operation,
                    kind = %e.kind,
                    retriable = e.is_retriable(),
                    "Store error: {}", e.message
                );

                let status = match e.kind {
                    StoreErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
                    StoreErrorKind::ConnectionFailed | StoreErrorKind::PoolExhausted => {
                        StatusCode::SERVICE_UNAVAILABLE
                    }
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                let code = format!("STORE_{}", e.kind.to_string().to_uppercase());
                let user_message = match e.kind {
                    StoreErrorKind::Timeout => "Store operation timed out",
                    _ => "Store operation failed",
                };

                (status, ErrorResponse::with_code(status, code, user_message))
            }

            Error::Queue(e) => {
                tracing::error!("Queue error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::with_code(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "QUEUE_ERROR",
                        "Event queue error",
                    ),
                )
            }

            #[cfg(feature = "jwt")]
            Error::Jwt(e) => (
                StatusCode::UNAUTHORIZED,
                ErrorResponse::with_code(StatusCode::UNAUTHORIZED, "INVALID_TOKEN", e.to_string()),
            ),

            Error::Io(e) => {
                tracing::error!("I/O error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::with_code(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "IO_ERROR",
                        "Internal server error",
                    ),
                )
            }

            Error::Unauthorized(msg) => (
                StatusCode::UNAUTHORIZED,
                ErrorResponse::with_code(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg),
            ),

            Error::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                ErrorResponse::with_code(StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ),

            Error::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse::with_code(StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ),

            Error::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::with_code(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "INTERNAL_ERROR",
                        "Internal server error",
                    ),
                )
            }
        };

        (status, Json(error_response)).into_response()
    }
}

// Manual From implementations for boxed errors
impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Error::Config(Box::new(err))
    }
}

#[cfg(feature = "jwt")]
impl From<jsonwebtoken::errors::Error> for Error {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        Error::Jwt(Box::new(err))
    }
}

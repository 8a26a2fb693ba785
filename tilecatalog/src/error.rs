//! Error types shared by every asynchronous entry point.
//!
//! Every operation that talks to the catalog (directly or through the cache)
//! resolves to an [`ApiResponse`], i.e. either a value or an [`ApiError`]
//! carrying an [`ErrorCode`]. Errors are values: they are returned up the call
//! chain and delivered through callbacks, never thrown across threads.

use std::fmt;

use thiserror::Error;

/// HTTP status code for "forbidden" responses.
///
/// A forbidden response means cached entries for the request may have been
/// readable under permissions that no longer hold, so they are cleared.
pub const HTTP_STATUS_FORBIDDEN: u16 = 403;

/// HTTP status code for "not found" responses.
pub const HTTP_STATUS_NOT_FOUND: u16 = 404;

/// Classification of a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// The request was malformed (missing partition id, inverted level range).
    InvalidArgument,
    /// The resource is absent from the cache (`CacheOnly`) or upstream.
    NotFound,
    /// Cooperative cancellation fired before a result was produced.
    Cancelled,
    /// A synchronous wait exceeded the configured timeout.
    RequestTimeout,
    /// Store corruption or another internal invariant failure.
    InternalFailure,
    /// Failure without a more specific classification (including parse errors).
    Unknown,
    /// The backend refused access (HTTP 403).
    AccessDenied,
    /// The authentication provider could not supply a token.
    AuthenticationError,
    /// The backend is unavailable or returned a server error.
    ServiceUnavailable,
    /// Reading or writing the persistent cache failed.
    CacheIO,
}

impl ErrorCode {
    /// Maps an HTTP status to an error code.
    pub fn from_http_status(status: u16) -> Self {
        match status {
            400 | 422 => Self::InvalidArgument,
            401 => Self::AuthenticationError,
            HTTP_STATUS_FORBIDDEN => Self::AccessDenied,
            HTTP_STATUS_NOT_FOUND => Self::NotFound,
            408 => Self::RequestTimeout,
            500..=599 => Self::ServiceUnavailable,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InvalidArgument => "InvalidArgument",
            Self::NotFound => "NotFound",
            Self::Cancelled => "Cancelled",
            Self::RequestTimeout => "RequestTimeout",
            Self::InternalFailure => "InternalFailure",
            Self::Unknown => "Unknown",
            Self::AccessDenied => "AccessDenied",
            Self::AuthenticationError => "AuthenticationError",
            Self::ServiceUnavailable => "ServiceUnavailable",
            Self::CacheIO => "CacheIO",
        };
        f.write_str(name)
    }
}

/// Error delivered to callers of catalog operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct ApiError {
    code: ErrorCode,
    message: String,
    http_status: Option<u16>,
}

impl ApiError {
    /// Creates an error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            http_status: None,
        }
    }

    /// Creates an error from an HTTP status returned by the backend.
    pub fn from_http_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::from_http_status(status),
            message: message.into(),
            http_status: Some(status),
        }
    }

    /// The canonical cancellation error.
    pub fn cancelled() -> Self {
        Self::new(ErrorCode::Cancelled, "Operation cancelled.")
    }

    /// The canonical timeout error.
    pub fn timeout() -> Self {
        Self::new(ErrorCode::RequestTimeout, "Network request timed out.")
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidArgument, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    /// Returns the error classification.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Returns the human-readable message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the HTTP status when the error came from the backend.
    pub fn http_status(&self) -> Option<u16> {
        self.http_status
    }

    /// True when the backend answered 403 Forbidden.
    pub fn is_forbidden(&self) -> bool {
        self.http_status == Some(HTTP_STATUS_FORBIDDEN)
    }

    /// True when the backend answered 404 Not Found.
    pub fn is_not_found_status(&self) -> bool {
        self.http_status == Some(HTTP_STATUS_NOT_FOUND)
    }

    pub fn is_cancelled(&self) -> bool {
        self.code == ErrorCode::Cancelled
    }
}

/// Result type of every catalog operation.
pub type ApiResponse<T> = Result<T, ApiError>;

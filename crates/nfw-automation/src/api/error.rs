//! Remote API error types.

use thiserror::Error;

/// Message the firewall service returns when an update token is stale.
pub const INVALID_TOKEN_MESSAGE: &str = "Update token is invalid.";

/// Errors returned by the remote firewall and networking APIs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// The requested resource does not exist.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// The update token presented with a mutation is stale.
    #[error("{}", INVALID_TOKEN_MESSAGE)]
    InvalidToken,

    /// The service throttled the request.
    #[error("Request throttled: {0}")]
    Throttled(String),

    /// The request was rejected by schema or parameter validation.
    #[error("{code}: {message}")]
    Validation { code: String, message: String },

    /// Any other error reported by the service.
    #[error("{code}: {message}")]
    Service { code: String, message: String },

    /// The request never produced a service response.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The service response could not be decoded.
    #[error("Failed to decode response for {operation}: {message}")]
    Decode { operation: String, message: String },
}

impl ApiError {
    /// Classifies a service error code and message into a variant.
    ///
    /// Codes may carry a namespace prefix (`aws.protocol#Code`), which is
    /// stripped before matching.
    pub fn classify(code: &str, message: &str) -> Self {
        let code = code.rsplit('#').next().unwrap_or(code).trim();

        if message == INVALID_TOKEN_MESSAGE || code == "InvalidTokenException" {
            return ApiError::InvalidToken;
        }

        match code {
            "ResourceNotFoundException"
            | "InvalidRouteTableID.NotFound"
            | "InvalidTransitGatewayAttachmentID.NotFound" => {
                ApiError::NotFound(message.to_string())
            }
            "ThrottlingException" | "Throttling" | "RequestLimitExceeded" => {
                ApiError::Throttled(message.to_string())
            }
            "MultipleValidationErrors" | "UnexpectedParameter" => ApiError::Validation {
                code: code.to_string(),
                message: message.to_string(),
            },
            _ => ApiError::Service {
                code: code.to_string(),
                message: message.to_string(),
            },
        }
    }

    /// Returns true if the error is likely transient and the call can be retried
    /// unchanged.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Throttled(_) | ApiError::Transport(_) => true,
            ApiError::Service { code, .. } => {
                matches!(code.as_str(), "InternalServerError" | "ServiceUnavailable")
            }
            _ => false,
        }
    }

    /// Returns true if the mutation should be retried with a fresh update token.
    pub fn is_invalid_token(&self) -> bool {
        matches!(self, ApiError::InvalidToken)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound(_))
    }
}

/// Result type for remote API calls.
pub type Result<T> = std::result::Result<T, ApiError>;

//! Error taxonomy for the authentication core.
//!
//! `AuthError` is the single error type returned across the crate's public
//! API. Variants map directly onto the kinds in the authentication design:
//! client-facing OAuth errors, scope/authorization failures, upstream
//! provider failures, and tamper detection. Display text is sanitized by
//! construction — callers building HTTP responses from an `AuthError` never
//! need to redact it themselves.

use http::StatusCode;

use crate::provider::AdapterError;

/// Crate-wide result alias.
pub type AuthResult<T> = Result<T, AuthError>;

/// The authentication core's error taxonomy.
///
/// Every variant is deliberately free of secret material (tokens, PKCE
/// verifiers, ciphertext) — `Display` output is safe to return to a client
/// or write to a log line.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Malformed client input: missing parameter, bad redirect, unknown client.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Code/refresh token not found, already consumed, expired, or bound to
    /// a different client/redirect.
    #[error("invalid grant")]
    InvalidGrant,

    /// Requested scope falls outside the client's or provider's allowed set.
    #[error("invalid scope: {0}")]
    InvalidScope(String),

    /// User or policy refused the request.
    #[error("access denied")]
    AccessDenied,

    /// Authenticated, but missing a required MXCP scope.
    #[error("forbidden: missing scope {missing_scope}")]
    Forbidden {
        /// The scope the endpoint required that the caller's context lacked.
        missing_scope: String,
    },

    /// The upstream identity provider returned an error or was unreachable.
    #[error("provider error")]
    ProviderError,

    /// A declared downstream token dependency could not be satisfied.
    #[error("downstream token unavailable")]
    DownstreamUnavailable,

    /// Decryption failure, signature failure, or PKCE mismatch. Always
    /// results in session revocation by the caller.
    #[error("tamper detected")]
    Tamper,

    /// Programming error or invariant violation.
    #[error("internal error")]
    Internal,

    /// A storage or network call exceeded its configured deadline. Callers
    /// may retry.
    #[error("operation timed out")]
    Timeout,
}

impl AuthError {
    /// Construct an [`AuthError::InvalidRequest`] from any displayable value.
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Construct an [`AuthError::InvalidScope`] naming the offending scope.
    pub fn invalid_scope(scope: impl Into<String>) -> Self {
        Self::InvalidScope(scope.into())
    }

    /// Construct an [`AuthError::Forbidden`] naming the missing scope.
    pub fn forbidden(missing_scope: impl Into<String>) -> Self {
        Self::Forbidden {
            missing_scope: missing_scope.into(),
        }
    }

    /// The HTTP status this error maps to, per the propagation table in the
    /// error handling design.
    #[must_use]
    pub fn http_status(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) | Self::InvalidGrant | Self::InvalidScope(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::AccessDenied | Self::Tamper => StatusCode::UNAUTHORIZED,
            Self::Forbidden { .. } => StatusCode::FORBIDDEN,
            Self::ProviderError | Self::DownstreamUnavailable => StatusCode::BAD_GATEWAY,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The RFC 6749 `error` code this maps to, for OAuth-spec error bodies.
    #[must_use]
    pub fn oauth_error_code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::InvalidGrant | Self::Tamper => "invalid_grant",
            Self::InvalidScope(_) => "invalid_scope",
            Self::AccessDenied => "access_denied",
            Self::Forbidden { .. } => "forbidden",
            Self::ProviderError => "provider_error",
            Self::DownstreamUnavailable => "downstream_unavailable",
            Self::Timeout => "temporarily_unavailable",
            Self::Internal => "server_error",
        }
    }

    /// Whether a caller may usefully retry this error.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Timeout | Self::ProviderError)
    }
}

impl From<AdapterError> for AuthError {
    fn from(err: AdapterError) -> Self {
        match err {
            AdapterError::Network(_) | AdapterError::Timeout => Self::Timeout,
            AdapterError::InvalidGrant(_) => Self::InvalidGrant,
            AdapterError::InvalidScope(scope) => Self::InvalidScope(scope),
            AdapterError::Unauthorized(_) => Self::AccessDenied,
            AdapterError::SignatureMismatch(_) => Self::Tamper,
            AdapterError::Provider(_) => Self::ProviderError,
        }
    }
}

impl From<sqlx::Error> for AuthError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!(error = %err, "token store error");
        Self::Internal
    }
}

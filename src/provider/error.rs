//! Error taxonomy internal to provider adapters, translated to
//! [`crate::error::AuthError`] at the session-manager boundary.

/// Errors an adapter implementation can raise.
///
/// This taxonomy is narrower than [`crate::error::AuthError`] on purpose —
/// adapters only need to distinguish the handful of outcomes the session
/// manager reacts to differently. Everything else collapses to
/// [`AdapterError::Provider`].
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// Transport-level failure talking to the provider (connect, TLS, DNS).
    #[error("network error reaching provider: {0}")]
    Network(String),

    /// The call exceeded its configured deadline.
    #[error("provider call timed out")]
    Timeout,

    /// The provider rejected the grant (bad code, expired refresh token,
    /// revoked consent).
    #[error("provider rejected grant: {0}")]
    InvalidGrant(String),

    /// The provider rejected a requested scope.
    #[error("provider rejected scope: {0}")]
    InvalidScope(String),

    /// The provider could not authenticate the caller (bad client
    /// credentials, expired token at the verifier, missing credential).
    #[error("provider denied authorization: {0}")]
    Unauthorized(String),

    /// A caller-supplied credential was cryptographically mutated after
    /// issuance (a proxy header signature that does not verify). Distinct
    /// from [`Self::Unauthorized`], which covers an absent or otherwise
    /// invalid credential rather than a tampered one.
    #[error("signature verification failed: {0}")]
    SignatureMismatch(String),

    /// Any other provider-side failure (5xx, malformed response, protocol
    /// violation).
    #[error("provider error: {0}")]
    Provider(String),
}

impl From<reqwest::Error> for AdapterError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::Network(err.to_string())
        } else {
            Self::Provider(err.to_string())
        }
    }
}

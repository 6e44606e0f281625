//! Identity provider adapters: a uniform async interface over IdP-specific
//! network and claim semantics.

pub mod error;
pub mod oauth_code;
pub mod proxy;
pub mod test_double;
pub mod verifier;

pub use error::AdapterError;
pub use oauth_code::{OAuthCodeAdapter, ProviderProfile};
pub use proxy::{encode_headers, ProxyAdapter, ProxyHeaderConfig, ProxyHeaders};
pub use test_double::TestDoubleAdapter;
pub use verifier::VerifierAdapter;

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

/// Result of a successful exchange with an identity provider: a new grant,
/// or a refreshed one.
#[derive(Debug, Clone)]
pub struct ExternalGrantResult {
    /// The provider's own access token, in plaintext — callers seal it
    /// before persisting.
    pub access_token: String,
    /// The provider's own refresh token, if one was issued.
    pub refresh_token: Option<String>,
    /// When the access token expires, if the provider disclosed it.
    pub expires_at: Option<DateTime<Utc>>,
    /// Scopes the provider actually granted (may be narrower than requested).
    pub granted_scopes: BTreeSet<String>,
    /// Opaque raw profile/claims, as returned by the provider. The caller
    /// decides what (if anything) to retain.
    pub raw_profile: Value,
    /// The subject (`sub`) identifier asserted by the provider.
    pub subject: String,
}

/// The user-facing identity fields extracted from a provider profile
/// lookup, prior to scope mapping.
#[derive(Debug, Clone, Default)]
pub struct ExternalProfile {
    /// Stable subject identifier.
    pub subject: String,
    /// Display name, if present.
    pub display_name: Option<String>,
    /// Email address, if present.
    pub email: Option<String>,
    /// The claims used for scope mapping.
    pub claims: crate::model::GrantedClaims,
    /// The full raw profile payload, kept for audit/debugging, never logged
    /// verbatim.
    pub raw_profile: Value,
}

/// A hint, optionally supplied by a revocation call, about which token kind
/// is being revoked (`"access_token"` or `"refresh_token"`), per RFC 7009.
pub type RevocationHint = Option<&'static str>;

/// Uniform interface over an identity provider's network and claim
/// semantics.
///
/// Implementations must be cheaply cloneable behind an `Arc` — the session
/// manager holds `Arc<dyn ProviderAdapter>` per configured provider and
/// calls through it concurrently.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Stable identifier for this provider instance (e.g. `"google"`,
    /// `"keycloak"`, `"proxy"`, `"test"`). Used as a map key and in audit
    /// events; never exposed raw to end users.
    fn name(&self) -> &str;

    /// Build the URL to redirect the user-agent to in order to start the
    /// provider's authorization step. Adapters that don't participate in
    /// the code flow (verifier, proxy) return [`AdapterError::Provider`].
    fn build_authorize_url(
        &self,
        callback_url: &str,
        state_id: &str,
        requested_scopes: &[String],
        pkce_challenge: &str,
        extra_params: &[(String, String)],
    ) -> Result<String, AdapterError>;

    /// Redeem an authorization code for tokens.
    async fn exchange_code(
        &self,
        code: &str,
        callback_url: &str,
        pkce_verifier: &str,
    ) -> Result<ExternalGrantResult, AdapterError>;

    /// Redeem a refresh token for a fresh access token.
    async fn refresh_token(
        &self,
        refresh_token: &str,
        scopes: Option<&[String]>,
    ) -> Result<ExternalGrantResult, AdapterError>;

    /// Resolve a provider access token to the caller's identity and claims.
    async fn fetch_user_info(&self, access_token: &str) -> Result<ExternalProfile, AdapterError>;

    /// Ask the provider to revoke a token. Returns `true` if the provider
    /// confirmed revocation; `false` if the provider doesn't support
    /// revocation or the token was already invalid. Never returns an error
    /// for an already-invalid token — revocation is best-effort cleanup.
    async fn revoke(&self, token: &str, hint: RevocationHint) -> bool;

    /// RFC 8693 token exchange: trade a subject token for one scoped to a
    /// downstream audience/resource. Adapters that don't support exchange
    /// return [`AdapterError::Provider`] with a clear message; the broker
    /// surfaces this as [`crate::error::AuthError::DownstreamUnavailable`].
    async fn exchange_token(
        &self,
        subject_token: &str,
        audience: &str,
        resource: Option<&str>,
    ) -> Result<ExternalGrantResult, AdapterError> {
        let _ = (subject_token, audience, resource);
        Err(AdapterError::Provider(format!(
            "provider {} does not support token exchange",
            self.name()
        )))
    }
}

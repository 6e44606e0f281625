//! A provider's view of the user: the tokens and claims a single IdP handed
//! back for a session.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::Sealed;

/// A session's tokens and claims from a specific identity provider.
///
/// Owned by exactly one [`crate::model::Session`]; deleted when the
/// session is deleted; never cross-referenced between sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderGrant {
    /// Name of the provider (e.g. `"google"`, `"keycloak"`, `"idp-a"`).
    pub provider: String,
    /// Encrypted provider access token.
    pub access_token: Sealed,
    /// Encrypted provider refresh token, if the provider issued one.
    pub refresh_token: Option<Sealed>,
    /// When the provider's access token expires.
    pub expires_at: Option<DateTime<Utc>>,
    /// Encrypted raw claims blob as returned by the provider's userinfo or
    /// token endpoint.
    pub raw_claims: Sealed,
    /// Provider scopes actually granted (not merely requested).
    pub granted_scopes: BTreeSet<String>,
    /// The user identifier as asserted by the provider (its `sub`).
    pub subject: String,
    /// Downstream tokens obtained via token exchange, keyed by audience.
    /// Populated lazily by the [`crate::exchange::TokenExchangeBroker`].
    pub downstream_tokens: std::collections::BTreeMap<String, DownstreamToken>,
}

/// A downstream provider token obtained via RFC 8693 token exchange,
/// scoped to a specific audience/resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownstreamToken {
    /// Encrypted downstream access token.
    pub access_token: Sealed,
    /// When the downstream token expires.
    pub expires_at: DateTime<Utc>,
    /// The resource/audience this token is scoped to.
    pub audience: String,
}

impl DownstreamToken {
    /// Whether this token has at least `min_remaining` of life left.
    #[must_use]
    pub fn is_fresh(&self, min_remaining: chrono::Duration, now: DateTime<Utc>) -> bool {
        self.expires_at - now > min_remaining
    }
}

impl ProviderGrant {
    /// Whether the provider's own access token is still unexpired.
    #[must_use]
    pub fn is_access_token_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|exp| exp > now)
    }
}

//! Allowed callers: clients permitted to drive the OAuth handshake.

use serde::{Deserialize, Serialize};

/// A registered client allowed to initiate the authorization flow.
///
/// Managed out-of-band (seed file or admin API, both outside this crate's
/// scope); immutable at runtime except through explicit mutation via
/// [`crate::store::TokenStore::put_client`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientRegistration {
    /// Unique client identifier.
    pub client_id: String,
    /// Redirect URI patterns this client may use. Exact-match only; no
    /// wildcard expansion is performed by the session manager.
    pub redirect_uris: Vec<String>,
    /// Grant types this client may use (`authorization_code`, `refresh_token`).
    pub allowed_grant_types: Vec<String>,
    /// Scopes this client may request. `begin_authorization` rejects any
    /// requested scope outside this set.
    pub scope_allowlist: Vec<String>,
    /// SHA-256 digest of the client secret, for confidential clients.
    /// `None` for public clients (PKCE-only).
    pub secret_digest: Option<String>,
}

impl ClientRegistration {
    /// Whether `redirect_uri` is one of this client's registered URIs.
    #[must_use]
    pub fn allows_redirect(&self, redirect_uri: &str) -> bool {
        self.redirect_uris.iter().any(|u| u == redirect_uri)
    }

    /// Whether `grant_type` is permitted for this client.
    #[must_use]
    pub fn allows_grant_type(&self, grant_type: &str) -> bool {
        self.allowed_grant_types.iter().any(|g| g == grant_type)
    }

    /// Whether every scope in `scopes` is within this client's allowlist.
    #[must_use]
    pub fn allows_scopes<'a>(&self, scopes: impl IntoIterator<Item = &'a str>) -> bool {
        scopes
            .into_iter()
            .all(|s| self.scope_allowlist.iter().any(|allowed| allowed == s))
    }
}

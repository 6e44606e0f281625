//! Short-lived handshake result tying a completed IdP exchange to a
//! subsequent token-endpoint redemption.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::oauth_state::PkceMethod;

/// A one-shot, expiring record redeemed at `POST /auth/token` with
/// `grant_type=authorization_code`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationCode {
    /// Opaque code id. Rendered to clients with the `mcp_ac_` prefix.
    pub id: Uuid,
    /// The session this code will unlock on redemption.
    pub session_id: Uuid,
    /// Client id the code is bound to. Redemption fails if the redeeming
    /// client doesn't match.
    pub client_id: String,
    /// Redirect URI the code is bound to. Redemption fails if the redeeming
    /// request's `redirect_uri` doesn't match exactly.
    pub redirect_uri: String,
    /// The downstream client's PKCE challenge, carried forward from the
    /// `OAuthState` that produced this code. Verified against the
    /// `code_verifier` presented at redemption.
    pub code_challenge: String,
    pub code_challenge_method: PkceMethod,
    /// Expiry. Lifetime must be at most 60 seconds.
    pub expires_at: DateTime<Utc>,
}

impl AuthorizationCode {
    /// Whether this code is still redeemable at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Whether a redemption request's client id and redirect URI match the
    /// values this code was bound to at issuance.
    #[must_use]
    pub fn binds_to(&self, client_id: &str, redirect_uri: &str) -> bool {
        self.client_id == client_id && self.redirect_uri == redirect_uri
    }
}

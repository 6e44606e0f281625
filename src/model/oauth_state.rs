//! Single-use handshake token tying a browser-level authorize step to its
//! callback.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// PKCE challenge method, per RFC 7636. MXCP only accepts `S256`; `plain`
/// is modeled so a deployment can reject it explicitly rather than the
/// type system silently allowing a weaker method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PkceMethod {
    /// SHA-256 challenge, the only method MXCP's session manager accepts.
    S256,
    /// Plaintext challenge (verifier == challenge). Rejected by
    /// [`crate::session_manager::SessionManager`] unless explicitly allowed.
    Plain,
}

/// A one-shot, expiring record created by `begin_authorization` and
/// consumed exactly once by the callback handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthState {
    /// Opaque state id, also used as the OAuth `state` parameter.
    pub id: Uuid,
    /// PKCE code challenge supplied by the downstream client. Verified at
    /// `POST /auth/token` redemption, not here — the party that presents
    /// the matching verifier is the client redeeming the MXCP auth code,
    /// which in a redirect-based flow only happens after this callback.
    pub code_challenge: String,
    /// PKCE method used to derive `code_challenge`.
    pub code_challenge_method: PkceMethod,
    /// MXCP's own PKCE verifier for its upstream exchange with the
    /// provider, generated server-side in `begin_authorization` and never
    /// exposed to the downstream client. Distinct from `code_challenge`
    /// above, which belongs to the downstream client's own redemption.
    pub upstream_pkce_verifier: String,
    /// The client this handshake belongs to.
    pub client_id: String,
    /// The redirect URI the client asked to be sent back to.
    pub redirect_uri: String,
    /// The downstream client's own CSRF `state` value, round-tripped
    /// unchanged onto the final redirect back to `redirect_uri`.
    pub downstream_state: String,
    /// Scopes requested at authorize time.
    pub requested_scopes: Vec<String>,
    /// The provider this handshake is against.
    pub provider: String,
    /// Expiry. Default TTL is 5 minutes.
    pub expires_at: DateTime<Utc>,
}

impl OAuthState {
    /// Whether this state is still redeemable at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

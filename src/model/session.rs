//! The authoritative authorization record.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::grant::ProviderGrant;
use super::user_context::UserContext;

/// The authoritative authorization record.
///
/// A session is either active or absent — there is no soft-deleted state.
/// Token fingerprints are SHA-256 of the raw token, never the raw token
/// itself (see [`crate::crypto::fingerprint`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Opaque session id (random, not derived from any token).
    pub id: Uuid,
    /// SHA-256 fingerprint of the current access token. At most one is
    /// active per session at any time.
    pub access_token_fingerprint: String,
    /// SHA-256 fingerprint of the current refresh token, if refresh is
    /// supported for this session.
    pub refresh_token_fingerprint: Option<String>,
    /// The client that owns this session.
    pub client_id: String,
    /// When the session was created.
    pub issued_at: DateTime<Utc>,
    /// Expiry of the current access token (`access_ttl`), reissued on every
    /// `exchange_auth_code`/`refresh`. Short-lived relative to `expires_at`.
    pub access_token_expires_at: DateTime<Utc>,
    /// Absolute session expiry (`refresh_ttl`). The refresh token, and the
    /// session itself, are invalid past this point regardless of activity.
    pub expires_at: DateTime<Utc>,
    /// Idle-timeout tripwire, advanced on every successful `resolve`.
    pub idle_timeout_at: DateTime<Utc>,
    /// The cached identity projection for this session.
    pub user_context: UserContext,
    /// Per-provider grants, in the order they were established.
    pub provider_grants: BTreeMap<String, ProviderGrant>,
    /// MXCP scopes explicitly pinned to this session, if different from
    /// `user_context.mxcp_scopes` (normally they are kept in sync; this
    /// field exists for deployments that freeze scopes at issuance time).
    pub mxcp_scopes: Option<BTreeSet<String>>,
}

impl Session {
    /// Whether the session's absolute expiry has passed.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Whether the session's idle timeout has tripped.
    #[must_use]
    pub fn is_idle_timed_out(&self, now: DateTime<Utc>) -> bool {
        now >= self.idle_timeout_at
    }

    /// Whether the session is usable right now (neither absolute-expired
    /// nor idle-timed-out).
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        !self.is_expired(now) && !self.is_idle_timed_out(now)
    }

    /// The effective MXCP scope set: the pinned override if present,
    /// otherwise the user context's scopes.
    #[must_use]
    pub fn effective_scopes(&self) -> &BTreeSet<String> {
        self.mxcp_scopes.as_ref().unwrap_or(&self.user_context.mxcp_scopes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{EncryptionKey, Sealed};
    use std::collections::HashMap;

    fn sample_session(now: DateTime<Utc>) -> Session {
        let key = EncryptionKey::from_bytes(&[1u8; 32]).unwrap();
        let uc = UserContext {
            user_id: "u-1".into(),
            display_name: None,
            email: None,
            raw_profile: HashMap::new(),
            mxcp_scopes: BTreeSet::from(["tools.read".to_string()]),
            provider_scopes_granted: BTreeSet::new(),
            provider: "test".into(),
            issued_at: now,
        };
        Session {
            id: Uuid::new_v4(),
            access_token_fingerprint: crate::crypto::fingerprint("tok"),
            refresh_token_fingerprint: None,
            client_id: "cli-1".into(),
            issued_at: now,
            access_token_expires_at: now + chrono::Duration::minutes(15),
            expires_at: now + chrono::Duration::hours(1),
            idle_timeout_at: now + chrono::Duration::minutes(30),
            user_context: uc,
            provider_grants: BTreeMap::from([(
                "test".to_string(),
                ProviderGrant {
                    provider: "test".into(),
                    access_token: Sealed::seal_str(&key, "pat").unwrap(),
                    refresh_token: None,
                    expires_at: None,
                    raw_claims: Sealed::seal_str(&key, "{}").unwrap(),
                    granted_scopes: BTreeSet::new(),
                    subject: "sub-1".into(),
                    downstream_tokens: BTreeMap::new(),
                },
            )]),
            mxcp_scopes: None,
        }
    }

    #[test]
    fn expires_at_boundary_is_exclusive_of_active() {
        let now = Utc::now();
        let session = sample_session(now);
        assert!(session.is_active(now));
        assert!(!session.is_expired(session.expires_at - chrono::Duration::nanoseconds(1)));
        assert!(session.is_expired(session.expires_at));
    }

    #[test]
    fn idle_timeout_trips_independently_of_absolute_expiry() {
        let now = Utc::now();
        let session = sample_session(now);
        assert!(session.is_idle_timed_out(session.idle_timeout_at));
        assert!(!session.is_expired(session.idle_timeout_at));
        assert!(!session.is_active(session.idle_timeout_at));
    }

    #[test]
    fn effective_scopes_falls_back_to_user_context() {
        let now = Utc::now();
        let session = sample_session(now);
        assert_eq!(session.effective_scopes(), &session.user_context.mxcp_scopes);
    }
}

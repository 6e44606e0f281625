//! The per-request identity projection handed to the endpoint layer and the
//! policy engine.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The per-request identity projection.
///
/// Constructed at authentication time, cached inside a [`crate::model::Session`],
/// and re-hydrated on each request. Immutable for the life of a session —
/// refresh produces a new `UserContext` that replaces the old one rather
/// than mutating this one in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserContext {
    /// Stable user id, as asserted by the provider (or synthesized in proxy mode).
    pub user_id: String,
    /// Display name, if the provider supplied one.
    pub display_name: Option<String>,
    /// Email address, if the provider supplied one.
    pub email: Option<String>,
    /// Restricted subset of the provider's raw profile. Never the full
    /// profile — that stays encrypted inside the owning `ProviderGrant`.
    pub raw_profile: HashMap<String, Value>,
    /// Internal MXCP scopes this context is entitled to.
    pub mxcp_scopes: BTreeSet<String>,
    /// Provider scopes actually granted (not merely requested).
    pub provider_scopes_granted: BTreeSet<String>,
    /// Name of the provider that authenticated this context.
    pub provider: String,
    /// When this context was constructed.
    pub issued_at: DateTime<Utc>,
}

impl UserContext {
    /// Build the flattened dictionary shape the policy engine consumes.
    ///
    /// The policy engine is an external collaborator; this method is the
    /// entire surface the auth core exposes to it.
    #[must_use]
    pub fn to_policy_dict(&self) -> Value {
        serde_json::json!({
            "user_id": self.user_id,
            "name": self.display_name,
            "email": self.email,
            "mxcp_scopes": self.mxcp_scopes,
            "provider_scopes_granted": { self.provider.clone(): self.provider_scopes_granted },
            "provider": self.provider,
        })
    }

    /// Whether this context holds the given MXCP scope.
    #[must_use]
    pub fn has_scope(&self, scope: &str) -> bool {
        self.mxcp_scopes.contains(scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> UserContext {
        UserContext {
            user_id: "u-1".into(),
            display_name: Some("Ada".into()),
            email: Some("ada@example.com".into()),
            raw_profile: HashMap::new(),
            mxcp_scopes: BTreeSet::from(["tools.read".to_string()]),
            provider_scopes_granted: BTreeSet::from(["tools_read".to_string()]),
            provider: "test".into(),
            issued_at: Utc::now(),
        }
    }

    #[test]
    fn has_scope_checks_mxcp_scopes_only() {
        let ctx = sample();
        assert!(ctx.has_scope("tools.read"));
        assert!(!ctx.has_scope("tools.admin"));
        assert!(!ctx.has_scope("tools_read"));
    }

    #[test]
    fn policy_dict_carries_provider_scopes_under_provider_name() {
        let ctx = sample();
        let dict = ctx.to_policy_dict();
        assert_eq!(dict["provider_scopes_granted"]["test"][0], "tools_read");
    }
}

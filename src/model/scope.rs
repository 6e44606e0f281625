//! Declarative claim-to-scope translation and downstream-token escalation
//! declarations.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Declarative claim→scope translation configuration for one provider.
///
/// Each source (`scopes`, `groups`, `roles`, `claims`) is evaluated
/// independently by [`crate::scope_mapper::map`]; the resulting MXCP scope
/// set is the union across all four. Unknown labels on the IdP side
/// produce no mapping rather than an error — this is what lets an IdP's
/// taxonomy drift without breaking the deployment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScopeMapping {
    /// Provider scope → MXCP scopes.
    #[serde(default)]
    pub scopes: HashMap<String, Vec<String>>,
    /// Group name → MXCP scopes.
    #[serde(default)]
    pub groups: HashMap<String, Vec<String>>,
    /// Role name → MXCP scopes.
    #[serde(default)]
    pub roles: HashMap<String, Vec<String>>,
    /// Claim JSON path → matcher value → MXCP scopes. Optional; most
    /// deployments only need `scopes`/`groups`/`roles`.
    #[serde(default)]
    pub claims: HashMap<String, HashMap<String, Vec<String>>>,
}

/// A declaration that honoring an MXCP scope may require a downstream
/// provider token, acquired lazily by the
/// [`crate::exchange::TokenExchangeBroker`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeRequirement {
    /// The provider the downstream token must come from.
    pub provider: String,
    /// The audience to request the downstream token for.
    pub audience: String,
    /// The resource URI to request the downstream token for (RFC 8707).
    pub resource: Option<String>,
}

/// The claims a `UserContext` was built from, in the canonical shape the
/// mapper expects. Adapters are responsible for normalizing
/// provider-specific claim locations (e.g. Keycloak's `realm_access.roles`
/// vs. `resource_access.<client>.roles`) into this shape before the mapper
/// ever sees them.
#[derive(Debug, Clone, Default)]
pub struct GrantedClaims {
    /// Provider scopes actually granted (never merely requested).
    pub granted_scopes: Vec<String>,
    /// Group memberships asserted by the provider.
    pub groups: Vec<String>,
    /// Roles asserted by the provider.
    pub roles: Vec<String>,
    /// Flattened `claim_path -> value` pairs for the `claims` matcher.
    pub claim_values: HashMap<String, String>,
}

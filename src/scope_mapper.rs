//! Pure, deterministic translation from external provider claims to
//! internal MXCP scopes.

use std::collections::BTreeSet;

use crate::model::{GrantedClaims, ScopeMapping};

/// Translate a provider's granted claims into the MXCP scope set, per the
/// configured [`ScopeMapping`].
///
/// Pure function: no I/O, no mutable state, same inputs always produce the
/// same output. An unmapped provider label produces no scope rather than
/// an error — an IdP's taxonomy can drift (a new group, a renamed role)
/// without the deployment breaking; the gap just shows up as a narrower
/// scope set, which fails closed on the policy side instead of failing
/// loudly here.
#[must_use]
pub fn map(mapping: &ScopeMapping, claims: &GrantedClaims) -> BTreeSet<String> {
    let mut scopes = BTreeSet::new();

    for provider_scope in &claims.granted_scopes {
        if let Some(mapped) = mapping.scopes.get(provider_scope) {
            scopes.extend(mapped.iter().cloned());
        }
    }
    for group in &claims.groups {
        if let Some(mapped) = mapping.groups.get(group) {
            scopes.extend(mapped.iter().cloned());
        }
    }
    for role in &claims.roles {
        if let Some(mapped) = mapping.roles.get(role) {
            scopes.extend(mapped.iter().cloned());
        }
    }
    for (path, value) in &claims.claim_values {
        if let Some(matchers) = mapping.claims.get(path) {
            if let Some(mapped) = matchers.get(value) {
                scopes.extend(mapped.iter().cloned());
            }
        }
    }

    scopes
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn sample_mapping() -> ScopeMapping {
        ScopeMapping {
            scopes: HashMap::from([("tools_read".to_string(), vec!["tools.read".to_string()])]),
            groups: HashMap::from([("analysts".to_string(), vec!["reports.view".to_string()])]),
            roles: HashMap::from([("admin".to_string(), vec!["tools.admin".to_string()])]),
            claims: HashMap::from([(
                "department".to_string(),
                HashMap::from([("finance".to_string(), vec!["finance.read".to_string()])]),
            )]),
        }
    }

    #[test]
    fn maps_across_all_four_sources_and_unions_them() {
        let mapping = sample_mapping();
        let claims = GrantedClaims {
            granted_scopes: vec!["tools_read".to_string()],
            groups: vec!["analysts".to_string()],
            roles: vec!["admin".to_string()],
            claim_values: HashMap::from([("department".to_string(), "finance".to_string())]),
        };
        let mapped = map(&mapping, &claims);
        assert_eq!(
            mapped,
            BTreeSet::from([
                "tools.read".to_string(),
                "reports.view".to_string(),
                "tools.admin".to_string(),
                "finance.read".to_string(),
            ])
        );
    }

    #[test]
    fn unknown_labels_produce_no_scope() {
        let mapping = sample_mapping();
        let claims = GrantedClaims {
            granted_scopes: vec!["unknown_scope".to_string()],
            ..Default::default()
        };
        assert!(map(&mapping, &claims).is_empty());
    }

    proptest::proptest! {
        #[test]
        fn mapping_is_deterministic(scope in "[a-z_]{1,12}", group in "[a-z_]{1,12}") {
            let mapping = ScopeMapping {
                scopes: HashMap::from([(scope.clone(), vec!["s.x".to_string()])]),
                groups: HashMap::from([(group.clone(), vec!["g.x".to_string()])]),
                roles: HashMap::new(),
                claims: HashMap::new(),
            };
            let claims = GrantedClaims {
                granted_scopes: vec![scope],
                groups: vec![group],
                ..Default::default()
            };
            let first = map(&mapping, &claims);
            let second = map(&mapping, &claims);
            prop_assert_eq!(first, second);
        }
    }
}

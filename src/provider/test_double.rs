//! Deterministic, in-memory adapter for exercising the session manager
//! without a live IdP. Exported (not `#[cfg(test)]`-gated) so integration
//! tests outside this crate can use it too.

use std::collections::BTreeSet;
use std::sync::RwLock;

use chrono::Utc;

use super::{AdapterError, ExternalGrantResult, ExternalProfile, ProviderAdapter, RevocationHint};
use crate::model::GrantedClaims;

/// One fixed outcome the test double will return for a given code or
/// refresh token.
#[derive(Debug, Clone)]
pub struct FixedGrant {
    pub subject: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub granted_scopes: Vec<String>,
    pub groups: Vec<String>,
}

/// Deterministic provider adapter. Known codes/refresh tokens registered
/// via [`TestDoubleAdapter::register_code`]/[`register_refresh_token`]
/// succeed; anything else is [`AdapterError::InvalidGrant`].
pub struct TestDoubleAdapter {
    name: String,
    codes: RwLock<std::collections::HashMap<String, FixedGrant>>,
    refresh_tokens: RwLock<std::collections::HashMap<String, FixedGrant>>,
    revoked: RwLock<BTreeSet<String>>,
}

impl TestDoubleAdapter {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            codes: RwLock::new(std::collections::HashMap::new()),
            refresh_tokens: RwLock::new(std::collections::HashMap::new()),
            revoked: RwLock::new(BTreeSet::new()),
        }
    }

    /// Register a code that will succeed on `exchange_code`.
    pub fn register_code(&self, code: impl Into<String>, grant: FixedGrant) {
        self.codes.write().expect("lock not poisoned").insert(code.into(), grant);
    }

    /// Register a refresh token that will succeed on `refresh_token`.
    pub fn register_refresh_token(&self, token: impl Into<String>, grant: FixedGrant) {
        self.refresh_tokens
            .write()
            .expect("lock not poisoned")
            .insert(token.into(), grant);
    }

    /// Whether `revoke` has been called with this token.
    #[must_use]
    pub fn is_revoked(&self, token: &str) -> bool {
        self.revoked.read().expect("lock not poisoned").contains(token)
    }

    fn grant_result(grant: &FixedGrant, access_token: String) -> ExternalGrantResult {
        ExternalGrantResult {
            access_token,
            refresh_token: Some(format!("test_rt_{}", grant.subject)),
            expires_at: Some(Utc::now() + chrono::Duration::hours(1)),
            granted_scopes: grant.granted_scopes.iter().cloned().collect(),
            raw_profile: serde_json::json!({ "sub": grant.subject, "groups": grant.groups }),
            subject: grant.subject.clone(),
        }
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for TestDoubleAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn build_authorize_url(
        &self,
        callback_url: &str,
        state_id: &str,
        requested_scopes: &[String],
        pkce_challenge: &str,
        _extra_params: &[(String, String)],
    ) -> Result<String, AdapterError> {
        Ok(format!(
            "https://test-idp.invalid/authorize?redirect_uri={callback_url}&state={state_id}&scope={}&code_challenge={pkce_challenge}",
            requested_scopes.join(" ")
        ))
    }

    async fn exchange_code(
        &self,
        code: &str,
        _callback_url: &str,
        _pkce_verifier: &str,
    ) -> Result<ExternalGrantResult, AdapterError> {
        let codes = self.codes.read().expect("lock not poisoned");
        let grant = codes
            .get(code)
            .ok_or_else(|| AdapterError::InvalidGrant(format!("unknown code {code}")))?;
        Ok(Self::grant_result(grant, format!("test_at_{}", grant.subject)))
    }

    async fn refresh_token(
        &self,
        refresh_token: &str,
        _scopes: Option<&[String]>,
    ) -> Result<ExternalGrantResult, AdapterError> {
        if self.is_revoked(refresh_token) {
            return Err(AdapterError::InvalidGrant("refresh token revoked".into()));
        }
        let tokens = self.refresh_tokens.read().expect("lock not poisoned");
        let grant = tokens
            .get(refresh_token)
            .ok_or_else(|| AdapterError::InvalidGrant("unknown refresh token".into()))?;
        Ok(Self::grant_result(grant, format!("test_at_{}", grant.subject)))
    }

    async fn fetch_user_info(&self, access_token: &str) -> Result<ExternalProfile, AdapterError> {
        let subject = access_token
            .strip_prefix("test_at_")
            .ok_or_else(|| AdapterError::Unauthorized("unrecognized test access token".into()))?
            .to_string();

        Ok(ExternalProfile {
            subject: subject.clone(),
            display_name: Some(format!("Test User {subject}")),
            email: Some(format!("{subject}@test.invalid")),
            claims: GrantedClaims::default(),
            raw_profile: serde_json::json!({ "sub": subject }),
        })
    }

    async fn revoke(&self, token: &str, _hint: RevocationHint) -> bool {
        self.revoked.write().expect("lock not poisoned").insert(token.to_string());
        true
    }

    async fn exchange_token(
        &self,
        subject_token: &str,
        audience: &str,
        _resource: Option<&str>,
    ) -> Result<ExternalGrantResult, AdapterError> {
        Ok(ExternalGrantResult {
            access_token: format!("test_downstream_{audience}_{subject_token}"),
            refresh_token: None,
            expires_at: Some(Utc::now() + chrono::Duration::hours(1)),
            granted_scopes: BTreeSet::new(),
            raw_profile: serde_json::Value::Null,
            subject: subject_token.to_string(),
        })
    }
}

//! Generic OAuth 2.1 authorization-code-with-PKCE adapter, parameterized by
//! a per-IdP profile.

use std::collections::BTreeSet;

use chrono::Utc;
use oauth2::basic::BasicClient;
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, EndpointNotSet, EndpointSet,
    PkceCodeChallenge, PkceCodeChallengeMethod, PkceCodeVerifier, RedirectUrl, RefreshToken,
    Scope, TokenResponse, TokenUrl,
};
use secrecy::{ExposeSecret, SecretString};

use super::{AdapterError, ExternalGrantResult, ExternalProfile, ProviderAdapter, RevocationHint};
use crate::model::GrantedClaims;

type Client = BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// Per-IdP endpoint shapes and claim extraction rules.
///
/// Endpoint URLs and claim field names are the only things that differ
/// between the code-flow adapters MXCP ships; everything else is common
/// machinery in [`OAuthCodeAdapter`].
#[derive(Debug, Clone)]
pub enum ProviderProfile {
    /// Google-style: OIDC discovery document shape, `sub`/`email`/`name` claims.
    Google,
    /// Keycloak-style: realm-scoped endpoints, roles under
    /// `realm_access.roles`.
    Keycloak,
    /// GitHub-style: no OIDC, userinfo comes from `GET /user`, no `sub`
    /// claim — the numeric `id` field is used as subject.
    GitHub,
    /// Atlassian-style: `account_id` as subject, scopes are
    /// product-prefixed (`read:jira-work`).
    Atlassian,
    /// Salesforce-style: userinfo returns `user_id`, custom permission sets
    /// surfaced as a `roles` array via a custom claim.
    Salesforce,
}

impl ProviderProfile {
    fn default_scopes(&self) -> Vec<String> {
        match self {
            Self::Google => vec!["openid".into(), "email".into(), "profile".into()],
            Self::Keycloak => vec!["openid".into(), "profile".into()],
            Self::GitHub => vec!["read:user".into(), "user:email".into()],
            Self::Atlassian => vec!["read:me".into()],
            Self::Salesforce => vec!["openid".into(), "api".into()],
        }
    }

    fn subject_field(&self) -> &'static str {
        match self {
            Self::Google | Self::Keycloak => "sub",
            Self::GitHub => "id",
            Self::Atlassian => "account_id",
            Self::Salesforce => "user_id",
        }
    }

    fn extract_claims(&self, profile: &serde_json::Value) -> GrantedClaims {
        let mut claims = GrantedClaims::default();
        match self {
            Self::Keycloak => {
                if let Some(roles) = profile
                    .get("realm_access")
                    .and_then(|v| v.get("roles"))
                    .and_then(|v| v.as_array())
                {
                    claims.roles = roles
                        .iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect();
                }
            }
            Self::Salesforce => {
                if let Some(roles) = profile.get("roles").and_then(|v| v.as_array()) {
                    claims.roles = roles
                        .iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect();
                }
            }
            _ => {}
        }
        if let Some(groups) = profile.get("groups").and_then(|v| v.as_array()) {
            claims.groups = groups
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect();
        }
        claims
    }
}

/// Static per-instance configuration resolved once at startup.
#[derive(Clone)]
pub struct OAuthCodeConfig {
    pub client_id: String,
    pub client_secret: SecretString,
    pub auth_url: String,
    pub token_url: String,
    pub redirect_uri: String,
    pub userinfo_endpoint: String,
}

/// Generic OAuth 2.1 authorization-code-with-PKCE adapter.
pub struct OAuthCodeAdapter {
    name: String,
    profile: ProviderProfile,
    client: Client,
    http: reqwest::Client,
    userinfo_endpoint: String,
}

impl OAuthCodeAdapter {
    /// Build an adapter for the given named provider instance.
    ///
    /// # Errors
    /// Returns [`AdapterError::Provider`] if any configured URL is
    /// malformed.
    pub fn new(
        name: impl Into<String>,
        profile: ProviderProfile,
        config: OAuthCodeConfig,
    ) -> Result<Self, AdapterError> {
        let auth_url = AuthUrl::new(config.auth_url)
            .map_err(|e| AdapterError::Provider(format!("invalid authorize url: {e}")))?;
        let token_url = TokenUrl::new(config.token_url)
            .map_err(|e| AdapterError::Provider(format!("invalid token url: {e}")))?;
        let redirect_url = RedirectUrl::new(config.redirect_uri)
            .map_err(|e| AdapterError::Provider(format!("invalid redirect url: {e}")))?;

        let mut client = BasicClient::new(ClientId::new(config.client_id))
            .set_auth_uri(auth_url)
            .set_token_uri(token_url)
            .set_redirect_uri(redirect_url);
        if !config.client_secret.expose_secret().is_empty() {
            client = client
                .set_client_secret(ClientSecret::new(config.client_secret.expose_secret().clone()));
        }

        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| AdapterError::Provider(format!("failed to build http client: {e}")))?;

        Ok(Self {
            name: name.into(),
            profile,
            client,
            http,
            userinfo_endpoint: config.userinfo_endpoint,
        })
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for OAuthCodeAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn build_authorize_url(
        &self,
        _callback_url: &str,
        state_id: &str,
        requested_scopes: &[String],
        pkce_challenge: &str,
        extra_params: &[(String, String)],
    ) -> Result<String, AdapterError> {
        let challenge = PkceCodeChallenge::from_challenge_and_method(
            pkce_challenge.to_string(),
            PkceCodeChallengeMethod::new("S256".to_string()),
        );
        let scopes = if requested_scopes.is_empty() {
            self.profile.default_scopes()
        } else {
            requested_scopes.to_vec()
        };
        let mut request = self
            .client
            .authorize_url(|| CsrfToken::new(state_id.to_string()))
            .add_scopes(scopes.into_iter().map(Scope::new))
            .set_pkce_challenge(challenge);
        for (key, value) in extra_params {
            request = request.add_extra_param(key.clone(), value.clone());
        }
        let (url, _csrf) = request.url();
        Ok(url.to_string())
    }

    async fn exchange_code(
        &self,
        code: &str,
        _callback_url: &str,
        pkce_verifier: &str,
    ) -> Result<ExternalGrantResult, AdapterError> {
        let response = self
            .client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .set_pkce_verifier(PkceCodeVerifier::new(pkce_verifier.to_string()))
            .request_async(&self.http)
            .await
            .map_err(|e| AdapterError::InvalidGrant(e.to_string()))?;

        Ok(self.token_response_into_grant(&response, None))
    }

    async fn refresh_token(
        &self,
        refresh_token: &str,
        _scopes: Option<&[String]>,
    ) -> Result<ExternalGrantResult, AdapterError> {
        let response = self
            .client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .request_async(&self.http)
            .await
            .map_err(|e| AdapterError::InvalidGrant(e.to_string()))?;

        Ok(self.token_response_into_grant(&response, None))
    }

    async fn fetch_user_info(&self, access_token: &str) -> Result<ExternalProfile, AdapterError> {
        let response = self
            .http
            .get(&self.userinfo_endpoint)
            .bearer_auth(access_token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AdapterError::Unauthorized(format!(
                "userinfo endpoint returned {}",
                response.status()
            )));
        }

        let profile: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AdapterError::Provider(format!("malformed userinfo response: {e}")))?;

        let subject = profile
            .get(self.profile.subject_field())
            .map(|v| match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .ok_or_else(|| AdapterError::Provider("userinfo response missing subject".into()))?;

        Ok(ExternalProfile {
            subject,
            display_name: profile
                .get("name")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            email: profile
                .get("email")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            claims: self.profile.extract_claims(&profile),
            raw_profile: profile,
        })
    }

    async fn revoke(&self, _token: &str, _hint: RevocationHint) -> bool {
        false
    }
}

impl OAuthCodeAdapter {
    fn token_response_into_grant(
        &self,
        response: &oauth2::StandardTokenResponse<oauth2::EmptyExtraTokenFields, oauth2::basic::BasicTokenType>,
        subject: Option<String>,
    ) -> ExternalGrantResult {
        let expires_at = response
            .expires_in()
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .map(|d| Utc::now() + d);
        let granted_scopes: BTreeSet<String> = response
            .scopes()
            .map(|scopes| scopes.iter().map(|s| s.as_str().to_string()).collect())
            .unwrap_or_default();

        ExternalGrantResult {
            access_token: response.access_token().secret().clone(),
            refresh_token: response.refresh_token().map(|t| t.secret().clone()),
            expires_at,
            granted_scopes,
            raw_profile: serde_json::Value::Null,
            subject: subject.unwrap_or_default(),
        }
    }
}

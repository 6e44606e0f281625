//! Resource-server-only adapter: validates bearer tokens against a JWKS or
//! an RFC 7662 introspection endpoint. Does not participate in the
//! authorize/callback dance.

use std::time::{Duration, SystemTime};

use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::{AdapterError, ExternalGrantResult, ExternalProfile, ProviderAdapter, RevocationHint};
use crate::model::GrantedClaims;

struct CachedJwks {
    jwks: JwkSet,
    cached_at: SystemTime,
}

/// Fetches and caches a JWKS document, re-fetching once the cache entry
/// exceeds its TTL.
struct JwksCache {
    jwks_uri: String,
    http: reqwest::Client,
    ttl: Duration,
    entry: RwLock<Option<CachedJwks>>,
}

impl JwksCache {
    fn new(jwks_uri: String, http: reqwest::Client, ttl: Duration) -> Self {
        Self {
            jwks_uri,
            http,
            ttl,
            entry: RwLock::new(None),
        }
    }

    async fn get(&self) -> Result<JwkSet, AdapterError> {
        {
            let guard = self.entry.read().await;
            if let Some(cached) = guard.as_ref() {
                if cached
                    .cached_at
                    .elapsed()
                    .map(|age| age < self.ttl)
                    .unwrap_or(false)
                {
                    return Ok(cached.jwks.clone());
                }
            }
        }

        let jwks: JwkSet = self
            .http
            .get(&self.jwks_uri)
            .send()
            .await?
            .json()
            .await
            .map_err(|e| AdapterError::Provider(format!("malformed jwks response: {e}")))?;

        *self.entry.write().await = Some(CachedJwks {
            jwks: jwks.clone(),
            cached_at: SystemTime::now(),
        });
        Ok(jwks)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
struct IntrospectionResponse {
    active: bool,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    exp: Option<i64>,
    #[serde(default, flatten)]
    additional: std::collections::HashMap<String, serde_json::Value>,
}

/// How the verifier validates bearer tokens.
pub enum VerificationMode {
    /// Local signature verification against a cached JWKS.
    Jwks { uri: String, issuer: String, audience: String },
    /// RFC 7662 introspection against the authorization server.
    Introspection {
        endpoint: String,
        client_id: String,
        client_secret: Option<String>,
    },
}

/// Resource-server-only adapter. Does not implement `build_authorize_url`,
/// `exchange_code`, or `refresh_token` — those are errors by construction,
/// since a verifier never participates in the handshake.
pub struct VerifierAdapter {
    name: String,
    mode: VerificationMode,
    http: reqwest::Client,
    jwks: Option<JwksCache>,
}

impl VerifierAdapter {
    /// Build a verifier adapter in the given mode.
    ///
    /// # Errors
    /// Returns [`AdapterError::Provider`] if the HTTP client cannot be built.
    pub fn new(name: impl Into<String>, mode: VerificationMode) -> Result<Self, AdapterError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AdapterError::Provider(format!("failed to build http client: {e}")))?;

        let jwks = if let VerificationMode::Jwks { uri, .. } = &mode {
            Some(JwksCache::new(uri.clone(), http.clone(), Duration::from_secs(600)))
        } else {
            None
        };

        Ok(Self {
            name: name.into(),
            mode,
            http,
            jwks,
        })
    }

    async fn verify_jwks(
        &self,
        token: &str,
        issuer: &str,
        audience: &str,
    ) -> Result<serde_json::Value, AdapterError> {
        let jwks = self
            .jwks
            .as_ref()
            .expect("jwks cache present when mode is Jwks")
            .get()
            .await?;

        let header = decode_header(token)
            .map_err(|e| AdapterError::Unauthorized(format!("malformed token header: {e}")))?;
        let kid = header
            .kid
            .ok_or_else(|| AdapterError::Unauthorized("token header missing kid".into()))?;
        let jwk = jwks
            .find(&kid)
            .ok_or_else(|| AdapterError::Unauthorized(format!("no jwks key for kid {kid}")))?;
        let decoding_key = DecodingKey::from_jwk(jwk)
            .map_err(|e| AdapterError::Unauthorized(format!("invalid jwk: {e}")))?;

        let mut validation = Validation::new(header.alg);
        validation.set_issuer(&[issuer]);
        validation.set_audience(&[audience]);

        let data = decode::<serde_json::Value>(token, &decoding_key, &validation)
            .map_err(|e| AdapterError::Unauthorized(format!("token validation failed: {e}")))?;
        Ok(data.claims)
    }

    async fn introspect(
        &self,
        endpoint: &str,
        client_id: &str,
        client_secret: Option<&str>,
        token: &str,
    ) -> Result<IntrospectionResponse, AdapterError> {
        let mut request = self
            .http
            .post(endpoint)
            .form(&[("token", token), ("token_type_hint", "access_token")]);
        if let Some(secret) = client_secret {
            request = request.basic_auth(client_id, Some(secret));
        }
        let response: IntrospectionResponse = request
            .send()
            .await?
            .json()
            .await
            .map_err(|e| AdapterError::Provider(format!("malformed introspection response: {e}")))?;
        Ok(response)
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for VerifierAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn build_authorize_url(
        &self,
        _callback_url: &str,
        _state_id: &str,
        _requested_scopes: &[String],
        _pkce_challenge: &str,
        _extra_params: &[(String, String)],
    ) -> Result<String, AdapterError> {
        Err(AdapterError::Provider(
            "verifier adapter does not support the authorization code flow".into(),
        ))
    }

    async fn exchange_code(
        &self,
        _code: &str,
        _callback_url: &str,
        _pkce_verifier: &str,
    ) -> Result<ExternalGrantResult, AdapterError> {
        Err(AdapterError::Provider(
            "verifier adapter does not support code exchange".into(),
        ))
    }

    async fn refresh_token(
        &self,
        _refresh_token: &str,
        _scopes: Option<&[String]>,
    ) -> Result<ExternalGrantResult, AdapterError> {
        Err(AdapterError::Provider(
            "verifier adapter does not support refresh".into(),
        ))
    }

    async fn fetch_user_info(&self, access_token: &str) -> Result<ExternalProfile, AdapterError> {
        let (claims, scope_str) = match &self.mode {
            VerificationMode::Jwks { issuer, audience, .. } => {
                let claims = self.verify_jwks(access_token, issuer, audience).await?;
                let scope = claims
                    .get("scope")
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
                (claims, scope)
            }
            VerificationMode::Introspection {
                endpoint,
                client_id,
                client_secret,
            } => {
                let response = self
                    .introspect(endpoint, client_id, client_secret.as_deref(), access_token)
                    .await?;
                if !response.active {
                    return Err(AdapterError::Unauthorized("token is not active".into()));
                }
                let mut claims = serde_json::to_value(&response.additional).unwrap_or_default();
                if let (Some(obj), Some(sub)) = (claims.as_object_mut(), response.sub.clone()) {
                    obj.insert("sub".into(), serde_json::Value::String(sub));
                }
                (claims, response.scope.clone())
            }
        };

        let subject = claims
            .get("sub")
            .and_then(|v| v.as_str())
            .ok_or_else(|| AdapterError::Unauthorized("token missing subject".into()))?
            .to_string();

        let mut granted = GrantedClaims::default();
        if let Some(scope) = scope_str {
            granted.granted_scopes = scope.split_whitespace().map(str::to_string).collect();
        }

        Ok(ExternalProfile {
            subject,
            display_name: claims.get("name").and_then(|v| v.as_str()).map(str::to_string),
            email: claims.get("email").and_then(|v| v.as_str()).map(str::to_string),
            claims: granted,
            raw_profile: claims,
        })
    }

    async fn revoke(&self, _token: &str, _hint: RevocationHint) -> bool {
        false
    }
}

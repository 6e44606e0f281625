//! Header-trust adapter: reads identity from a set of trusted reverse-proxy
//! headers, validated by HMAC over a canonical header set. No network
//! calls.

use std::collections::BTreeSet;

use chrono::Utc;
use ring::hmac;
use secrecy::{ExposeSecret, SecretString};

use super::{AdapterError, ExternalGrantResult, ExternalProfile, ProviderAdapter, RevocationHint};
use crate::model::GrantedClaims;

/// Header names the proxy adapter reads from the inbound request.
#[derive(Debug, Clone)]
pub struct ProxyHeaderConfig {
    pub user_id_header: String,
    pub name_header: Option<String>,
    pub email_header: Option<String>,
    pub groups_header: Option<String>,
    pub roles_header: Option<String>,
    pub mxcp_scopes_header: Option<String>,
    pub upstream_token_header: Option<String>,
    pub signature_header: String,
}

/// A snapshot of the configured headers as they arrived on one request.
/// Built by the transport layer (outside this crate) from the raw HTTP
/// headers, so the adapter itself never depends on a particular web
/// framework's header map type.
#[derive(Debug, Clone, Default)]
pub struct ProxyHeaders {
    pub user_id: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub groups: Option<String>,
    pub roles: Option<String>,
    pub mxcp_scopes: Option<String>,
    pub upstream_token: Option<String>,
    pub signature: Option<String>,
}

/// Header-trust adapter. `fetch_user_info` is repurposed here: the
/// "access token" argument is a serialized [`ProxyHeaders`] snapshot
/// (see [`ProxyAdapter::encode_headers`]/[`ProxyAdapter::decode_headers`]),
/// since a proxy-mode request carries no bearer token to resolve.
pub struct ProxyAdapter {
    name: String,
    config: ProxyHeaderConfig,
    hmac_secret: SecretString,
}

impl ProxyAdapter {
    #[must_use]
    pub fn new(name: impl Into<String>, config: ProxyHeaderConfig, hmac_secret: SecretString) -> Self {
        Self {
            name: name.into(),
            config,
            hmac_secret,
        }
    }

    /// Canonical string the HMAC signature is computed over: the
    /// configured headers in a fixed order, newline-joined, missing
    /// headers represented as an empty field. Both the proxy and this
    /// adapter must agree on this encoding.
    fn canonical_string(&self, headers: &ProxyHeaders) -> String {
        [
            headers.user_id.as_deref().unwrap_or(""),
            headers.name.as_deref().unwrap_or(""),
            headers.email.as_deref().unwrap_or(""),
            headers.groups.as_deref().unwrap_or(""),
            headers.roles.as_deref().unwrap_or(""),
            headers.mxcp_scopes.as_deref().unwrap_or(""),
        ]
        .join("\n")
    }

    /// Validate the HMAC signature over the canonical header set.
    ///
    /// # Errors
    /// Returns [`AdapterError::Unauthorized`] if the signature header is
    /// simply absent (no credential was presented). Returns
    /// [`AdapterError::SignatureMismatch`] if a signature was presented but
    /// does not verify — malformed hex or a failed HMAC check both mean a
    /// credential was tampered with after issuance, not merely missing.
    pub fn verify_signature(&self, headers: &ProxyHeaders) -> Result<(), AdapterError> {
        let signature_hex = headers
            .signature
            .as_deref()
            .ok_or_else(|| AdapterError::Unauthorized("missing proxy signature header".into()))?;
        let provided = hex::decode(signature_hex)
            .map_err(|_| AdapterError::SignatureMismatch("malformed proxy signature".into()))?;

        let key = hmac::Key::new(hmac::HMAC_SHA256, self.hmac_secret.expose_secret().as_bytes());
        hmac::verify(&key, self.canonical_string(headers).as_bytes(), &provided)
            .map_err(|_| AdapterError::SignatureMismatch("proxy signature mismatch".into()))
    }

    /// Parse an encoded [`ProxyHeaders`] snapshot back out. Synthetic
    /// "access tokens" passed through [`ProviderAdapter::fetch_user_info`]
    /// are JSON-encoded `ProxyHeaders` values produced by the middleware.
    fn decode_headers(encoded: &str) -> Result<ProxyHeaders, AdapterError> {
        #[derive(serde::Deserialize)]
        struct Wire {
            user_id: Option<String>,
            name: Option<String>,
            email: Option<String>,
            groups: Option<String>,
            roles: Option<String>,
            mxcp_scopes: Option<String>,
            upstream_token: Option<String>,
            signature: Option<String>,
        }
        let wire: Wire = serde_json::from_str(encoded)
            .map_err(|e| AdapterError::Provider(format!("malformed proxy header snapshot: {e}")))?;
        Ok(ProxyHeaders {
            user_id: wire.user_id,
            name: wire.name,
            email: wire.email,
            groups: wire.groups,
            roles: wire.roles,
            mxcp_scopes: wire.mxcp_scopes,
            upstream_token: wire.upstream_token,
            signature: wire.signature,
        })
    }

    #[must_use]
    pub fn header_config(&self) -> &ProxyHeaderConfig {
        &self.config
    }
}

/// Encode a [`ProxyHeaders`] snapshot for [`ProviderAdapter::fetch_user_info`],
/// the inverse of `ProxyAdapter::decode_headers`. The transport layer (the
/// tower middleware, outside this module) builds a snapshot from the raw
/// HTTP header map and passes the encoded form through as if it were a
/// bearer token.
#[must_use]
pub fn encode_headers(headers: &ProxyHeaders) -> String {
    serde_json::json!({
        "user_id": headers.user_id,
        "name": headers.name,
        "email": headers.email,
        "groups": headers.groups,
        "roles": headers.roles,
        "mxcp_scopes": headers.mxcp_scopes,
        "upstream_token": headers.upstream_token,
        "signature": headers.signature,
    })
    .to_string()
}

#[async_trait::async_trait]
impl ProviderAdapter for ProxyAdapter {
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
            "proxy adapter has no authorization step".into(),
        ))
    }

    async fn exchange_code(
        &self,
        _code: &str,
        _callback_url: &str,
        _pkce_verifier: &str,
    ) -> Result<ExternalGrantResult, AdapterError> {
        Err(AdapterError::Provider(
            "proxy adapter does not support code exchange".into(),
        ))
    }

    async fn refresh_token(
        &self,
        _refresh_token: &str,
        _scopes: Option<&[String]>,
    ) -> Result<ExternalGrantResult, AdapterError> {
        Err(AdapterError::Provider(
            "proxy adapter does not support refresh; trust is re-validated per request".into(),
        ))
    }

    async fn fetch_user_info(&self, access_token: &str) -> Result<ExternalProfile, AdapterError> {
        let headers = Self::decode_headers(access_token)?;
        self.verify_signature(&headers)?;

        let user_id = headers
            .user_id
            .ok_or_else(|| AdapterError::Unauthorized("missing user id header".into()))?;

        let mut claims = GrantedClaims::default();
        if let Some(groups) = &headers.groups {
            claims.groups = groups.split(',').map(str::trim).map(str::to_string).collect();
        }
        if let Some(roles) = &headers.roles {
            claims.roles = roles.split(',').map(str::trim).map(str::to_string).collect();
        }
        if let Some(scopes) = &headers.mxcp_scopes {
            claims.granted_scopes = scopes.split(',').map(str::trim).map(str::to_string).collect();
        }

        Ok(ExternalProfile {
            subject: user_id.clone(),
            display_name: headers.name.clone(),
            email: headers.email.clone(),
            claims,
            raw_profile: serde_json::json!({ "user_id": user_id, "upstream_token": headers.upstream_token }),
        })
    }

    async fn revoke(&self, _token: &str, _hint: RevocationHint) -> bool {
        false
    }
}

/// Synthesize an [`ExternalGrantResult`] for a validated proxy request,
/// since a proxy never issues its own access token.
#[must_use]
pub fn synthetic_grant(profile: &ExternalProfile, upstream_token: Option<String>) -> ExternalGrantResult {
    ExternalGrantResult {
        access_token: upstream_token.clone().unwrap_or_else(|| profile.subject.clone()),
        refresh_token: None,
        expires_at: Some(Utc::now() + chrono::Duration::hours(8)),
        granted_scopes: profile.claims.granted_scopes.iter().cloned().collect::<BTreeSet<_>>(),
        raw_profile: profile.raw_profile.clone(),
        subject: profile.subject.clone(),
    }
}

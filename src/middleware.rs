//! Generic `tower` integration and an `axum` extractor for authenticated
//! identity.
//!
//! Two consumption paths are supported, mirroring the two call shapes a
//! downstream MCP transport actually has:
//!
//! - [`AuthLayer`] / [`AuthService`] wrap any `tower::Service<http::Request<B>>`,
//!   extracting a bearer token, resolving it through a [`SessionManager`],
//!   and inserting the resulting [`UserContext`] into the request's
//!   extensions for inner services to read back out.
//! - [`AuthenticatedUser`] is an `axum::extract::FromRequestParts` impl for
//!   handlers that would rather declare the dependency in their signature
//!   than reach into extensions themselves.

use std::sync::Arc;
use std::task::{Context, Poll};

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use futures_util::future::BoxFuture;
use tower::Layer;
use tower_service::Service;

use crate::config::HybridPrecedence;
use crate::error::AuthError;
use crate::model::UserContext;
use crate::provider::{encode_headers, ProxyHeaderConfig, ProxyHeaders};
use crate::session_manager::SessionManager;

/// Configuration for [`AuthLayer`].
#[derive(Debug, Clone)]
pub struct AuthLayerConfig {
    /// Whether a request with no usable credential is forwarded anyway
    /// (with no [`UserContext`] inserted) rather than rejected outright.
    /// Endpoint-level scope checks still apply via [`AuthenticatedUser`].
    pub allow_anonymous: bool,
    /// Request paths that bypass authentication entirely (health checks,
    /// the well-known metadata document, the handshake routes themselves).
    pub bypass_paths: Vec<String>,
    /// Header carrying the bearer token. Always `Authorization` in
    /// practice; configurable for test doubles.
    pub auth_header: String,
    /// Proxy header names to read and the adapter's registered name
    /// (`"proxy"`), set when [`crate::config::AuthMode::Proxy`] or
    /// [`crate::config::AuthMode::Hybrid`] is configured. `None` disables
    /// the proxy-header authentication path entirely.
    pub proxy: Option<(String, ProxyHeaderConfig)>,
    /// Which credential wins when both a bearer token and proxy headers
    /// are present. Only consulted when `proxy` is set and a request
    /// carries both.
    pub hybrid_precedence: HybridPrecedence,
    /// Verifier adapter names to validate a bearer token against directly
    /// (bypassing the session store) when no locally-minted session
    /// matches it. Tried in order; the first adapter to accept the token
    /// wins. Set in [`crate::config::AuthMode::Verifier`], where no
    /// session was ever minted locally for tokens issued by an external
    /// authorization server.
    pub verifier_providers: Vec<String>,
}

impl Default for AuthLayerConfig {
    fn default() -> Self {
        Self {
            allow_anonymous: false,
            bypass_paths: vec![
                "/auth/authorize".to_string(),
                "/auth/callback".to_string(),
                "/auth/token".to_string(),
                "/.well-known/oauth-authorization-server".to_string(),
                "/.well-known/oauth-protected-resource".to_string(),
            ],
            auth_header: "authorization".to_string(),
            proxy: None,
            hybrid_precedence: HybridPrecedence::OAuthFirst,
            verifier_providers: Vec::new(),
        }
    }
}

impl AuthLayerConfig {
    #[must_use]
    pub fn allow_anonymous() -> Self {
        Self {
            allow_anonymous: true,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn bypass_path(mut self, path: impl Into<String>) -> Self {
        self.bypass_paths.push(path.into());
        self
    }

    #[must_use]
    pub fn with_proxy(
        mut self,
        provider_name: impl Into<String>,
        config: ProxyHeaderConfig,
        precedence: HybridPrecedence,
    ) -> Self {
        self.proxy = Some((provider_name.into(), config));
        self.hybrid_precedence = precedence;
        self
    }

    #[must_use]
    pub fn with_verifier_providers(mut self, names: Vec<String>) -> Self {
        self.verifier_providers = names;
        self
    }

    fn should_bypass(&self, path: &str) -> bool {
        self.bypass_paths.iter().any(|p| p == path)
    }

    fn read_proxy_headers(&self, parts: &http::request::Parts) -> Option<ProxyHeaders> {
        let (_, cfg) = self.proxy.as_ref()?;
        let get = |name: &str| -> Option<String> {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        Some(ProxyHeaders {
            user_id: get(&cfg.user_id_header),
            name: cfg.name_header.as_deref().and_then(get),
            email: cfg.email_header.as_deref().and_then(get),
            groups: cfg.groups_header.as_deref().and_then(get),
            roles: cfg.roles_header.as_deref().and_then(get),
            mxcp_scopes: cfg.mxcp_scopes_header.as_deref().and_then(get),
            upstream_token: cfg.upstream_token_header.as_deref().and_then(get),
            signature: get(&cfg.signature_header),
        })
    }
}

/// Tower `Layer` that wraps a service with session resolution.
#[derive(Clone)]
pub struct AuthLayer {
    sessions: Arc<SessionManager>,
    config: AuthLayerConfig,
}

impl AuthLayer {
    #[must_use]
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self {
            sessions,
            config: AuthLayerConfig::default(),
        }
    }

    #[must_use]
    pub fn with_config(sessions: Arc<SessionManager>, config: AuthLayerConfig) -> Self {
        Self { sessions, config }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthService {
            inner,
            sessions: self.sessions.clone(),
            config: self.config.clone(),
        }
    }
}

/// Tower `Service` that resolves the bearer token on each request and
/// inserts the resulting [`UserContext`] into the request's extensions
/// before forwarding to the inner service.
#[derive(Clone)]
pub struct AuthService<S> {
    inner: S,
    sessions: Arc<SessionManager>,
    config: AuthLayerConfig,
}

impl<S> AuthService<S> {
    fn extract_token(req: &http::Request<()>, header: &str) -> Option<String> {
        let value = req.headers().get(header)?.to_str().ok()?;
        value.strip_prefix("Bearer ").map(str::to_string)
    }
}

impl<S, B, ResBody> Service<http::Request<B>> for AuthService<S>
where
    S: Service<http::Request<B>, Response = http::Response<ResBody>, Error = AuthError>
        + Clone
        + Send
        + 'static,
    S::Future: Send,
    B: Send + 'static,
{
    type Response = http::Response<ResBody>;
    type Error = AuthError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: http::Request<B>) -> Self::Future {
        let path = req.uri().path().to_string();
        let inner = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, inner);

        if self.config.should_bypass(&path) {
            return Box::pin(async move { inner.call(req).await });
        }

        let (parts, body) = req.into_parts();
        let token_req = http::Request::from_parts(parts.clone(), ());
        let token = Self::extract_token(&token_req, &self.config.auth_header);
        let proxy_headers = self.config.read_proxy_headers(&parts);
        let proxy_provider = self.config.proxy.as_ref().map(|(name, _)| name.clone());
        let verifier_providers = self.config.verifier_providers.clone();
        let sessions = self.sessions.clone();
        let allow_anonymous = self.config.allow_anonymous;
        let precedence = self.config.hybrid_precedence;

        Box::pin(async move {
            let try_bearer = |sessions: Arc<SessionManager>, token: Option<String>, verifier_providers: Vec<String>| async move {
                let Some(token) = token else { return Ok(None) };
                if let Some(session) = sessions.resolve(&token).await? {
                    return Ok(Some(session.user_context));
                }
                for provider in &verifier_providers {
                    if let Ok(ctx) = sessions.authenticate_via_adapter(provider, &token).await {
                        return Ok(Some(ctx));
                    }
                }
                Ok(None)
            };
            let try_proxy = |sessions: Arc<SessionManager>, headers: Option<ProxyHeaders>, provider: Option<String>| async move {
                match (headers, provider) {
                    (Some(headers), Some(provider)) if headers.user_id.is_some() => sessions
                        .authenticate_via_adapter(&provider, &encode_headers(&headers))
                        .await
                        .map(Some),
                    _ => Ok(None),
                }
            };

            let resolved = match precedence {
                HybridPrecedence::ProxyFirst => {
                    match try_proxy(sessions.clone(), proxy_headers.clone(), proxy_provider.clone()).await? {
                        Some(ctx) => Some(ctx),
                        None => try_bearer(sessions, token, verifier_providers).await?,
                    }
                }
                HybridPrecedence::OAuthFirst => {
                    match try_bearer(sessions.clone(), token, verifier_providers).await? {
                        Some(ctx) => Some(ctx),
                        None => try_proxy(sessions, proxy_headers, proxy_provider).await?,
                    }
                }
            };

            match resolved {
                Some(ctx) => {
                    let mut parts = parts;
                    parts.extensions.insert(ctx);
                    inner.call(http::Request::from_parts(parts, body)).await
                }
                None if allow_anonymous => inner.call(http::Request::from_parts(parts, body)).await,
                None => Err(AuthError::AccessDenied),
            }
        })
    }
}

/// Axum extractor pulling a resolved [`UserContext`] out of request
/// extensions, for handlers behind [`AuthLayer`] that declare the
/// dependency directly in their signature instead of reaching into
/// extensions themselves.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub UserContext);

impl AuthenticatedUser {
    /// Reject unless the wrapped context holds `scope`.
    pub fn require_scope(&self, scope: &str) -> Result<(), AuthError> {
        if self.0.has_scope(scope) {
            Ok(())
        } else {
            Err(AuthError::forbidden(scope))
        }
    }
}

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<UserContext>()
            .cloned()
            .map(AuthenticatedUser)
            .ok_or(AuthError::AccessDenied)
    }
}

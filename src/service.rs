//! Composition root: builds a [`SessionManager`] and its provider adapters
//! from an [`AuthCoreConfig`], and hands back the pieces a host application
//! wires into its own server (a tower [`AuthLayer`], an axum [`Router`] of
//! handshake routes, and the manager itself for direct calls like token
//! exchange).
//!
//! Named `MxcpAuthService` to avoid colliding with [`crate::middleware::AuthService`],
//! the `tower::Service` implementation — this type is the crate's outer
//! entry point, not a `Service` itself.

use std::collections::HashMap;
use std::sync::Arc;

use axum::Router;
use secrecy::ExposeSecret;

use crate::audit::{AuditSink, TracingAuditSink};
use crate::config::{AuthCoreConfig, AuthMode, HybridPrecedence, ProviderInstanceConfig};
use crate::crypto::{EncryptionKey, ResolvedSecrets};
use crate::error::{AuthError, AuthResult};
use crate::middleware::AuthLayer;
use crate::provider::{
    OAuthCodeAdapter, OAuthCodeConfig, ProviderAdapter, ProviderProfile, ProxyAdapter,
    ProxyHeaderConfig, VerificationMode, VerifierAdapter,
};
use crate::routes;
use crate::session_manager::SessionManager;
use crate::store::sqlite::SqliteTokenStore;
use crate::store::TokenStore;

/// The assembled authentication core, ready to be wired into a host
/// application's router and middleware stack.
pub struct MxcpAuthService {
    sessions: Arc<SessionManager>,
    config: AuthCoreConfig,
}

impl MxcpAuthService {
    /// Build every configured provider adapter, open the token store, and
    /// assemble the [`SessionManager`]. Fails closed: a malformed provider
    /// URL or an unopenable store aborts startup rather than degrading to
    /// a partially-authenticated mode.
    pub async fn from_config(config: AuthCoreConfig) -> AuthResult<Self> {
        Self::from_config_with_audit(config, Arc::new(TracingAuditSink)).await
    }

    pub async fn from_config_with_audit(
        config: AuthCoreConfig,
        audit: Arc<dyn AuditSink>,
    ) -> AuthResult<Self> {
        let store: Arc<dyn TokenStore> = Arc::new(
            SqliteTokenStore::open(
                &config.persistence.path,
                config.persistence.read_pool_size,
            )
            .await?,
        );

        let encryption_key = EncryptionKey::from_bytes(
            config.persistence.encryption_key.expose_secret().as_bytes(),
        )
        .map_err(|_| AuthError::invalid_request("encryption key must be 32 bytes"))?;

        let providers = build_providers(&config)?;

        let mut scope_requirements = HashMap::new();
        scope_requirements.extend(config.scope_requirements.clone());

        let scope_mappings = config
            .providers
            .iter()
            .map(|p| (p.name.clone(), p.claim_mappings.clone()))
            .collect();

        let sessions = Arc::new(SessionManager::new(
            store,
            providers,
            encryption_key,
            config.tokens.clone(),
            audit,
            scope_requirements,
            scope_mappings,
        ));

        Ok(Self { sessions, config })
    }

    /// The shared [`SessionManager`], for callers that need direct access
    /// (e.g. a downstream token resolver wired into a tool-calling layer).
    #[must_use]
    pub fn sessions(&self) -> Arc<SessionManager> {
        self.sessions.clone()
    }

    /// Re-resolve hot-reloadable secrets (currently the envelope-encryption
    /// key) and swap them in atomically. Intended to be called from a
    /// caller-installed signal handler or admin endpoint after the host's
    /// own secret store has rotated the underlying material — this crate
    /// installs no signal handler of its own.
    ///
    /// Re-resolution happens before the swap, so a failure (e.g. a
    /// malformed key) leaves the previously active secrets in place rather
    /// than tearing down live sessions.
    ///
    /// # Errors
    /// Returns [`AuthError::InvalidRequest`] if the freshly resolved
    /// encryption key is not exactly 32 bytes.
    pub fn reload(&self, config: &AuthCoreConfig) -> AuthResult<()> {
        let encryption_key = EncryptionKey::from_bytes(
            config.persistence.encryption_key.expose_secret().as_bytes(),
        )
        .map_err(|_| AuthError::invalid_request("encryption key must be 32 bytes"))?;
        self.sessions.reload_secrets(ResolvedSecrets { encryption_key });
        tracing::info!("resolved secrets reloaded");
        Ok(())
    }

    /// Returns the `AuthMiddleware` configured with the active mode: a
    /// tower [`AuthLayer`] wrapping this service's session resolution, for
    /// generic `tower`-based transports. In proxy and hybrid mode the
    /// layer is additionally configured to read and validate the
    /// configured trusted headers, per [`HybridPrecedence`] when both a
    /// bearer token and proxy headers are present.
    #[must_use]
    pub fn build_middleware(&self) -> AuthLayer {
        let mut config = crate::middleware::AuthLayerConfig::default();
        if matches!(self.config.mode, AuthMode::Proxy | AuthMode::Hybrid) {
            if let Some(proxy) = &self.config.proxy {
                let header_config = ProxyHeaderConfig {
                    user_id_header: proxy.user_id_header.clone(),
                    name_header: proxy.name_header.clone(),
                    email_header: proxy.email_header.clone(),
                    groups_header: proxy.groups_header.clone(),
                    roles_header: proxy.roles_header.clone(),
                    mxcp_scopes_header: proxy.mxcp_scopes_header.clone(),
                    upstream_token_header: proxy.upstream_token_header.clone(),
                    signature_header: proxy.signature_header.clone(),
                };
                let precedence = self
                    .config
                    .hybrid_precedence
                    .unwrap_or(HybridPrecedence::ProxyFirst);
                config = config.with_proxy("proxy", header_config, precedence);
            }
        }
        if matches!(self.config.mode, AuthMode::Verifier) {
            let names = self.config.providers.iter().map(|p| p.name.clone()).collect();
            config = config.with_verifier_providers(names);
        }
        AuthLayer::with_config(self.sessions.clone(), config)
    }

    /// Installs a single callback path (`/auth/callback`), the token
    /// endpoint (`/auth/token`), the authorize redirect (`/auth/authorize`),
    /// and the well-known metadata document in issuer/hybrid mode.
    /// Installs nothing network-facing in verifier, proxy, or disabled
    /// mode, since none of those drive a handshake.
    #[must_use]
    pub fn register_routes(&self) -> Router {
        match self.config.mode {
            AuthMode::Issuer | AuthMode::Hybrid => routes::router(self.sessions.clone(), &self.config),
            AuthMode::Verifier | AuthMode::Proxy | AuthMode::Disabled => Router::new(),
        }
    }

    /// Helpers exposed to tool code, notably `get_provider_token`.
    #[must_use]
    pub fn build_context_helpers(&self) -> ProviderTokenResolver {
        ProviderTokenResolver {
            sessions: self.sessions.clone(),
        }
    }
}

/// Callable by tool code as `get_provider_token(session, audience)` to
/// obtain a live downstream token for a declared scope requirement,
/// resolving and caching it through the owning [`SessionManager`].
#[derive(Clone)]
pub struct ProviderTokenResolver {
    sessions: Arc<SessionManager>,
}

impl ProviderTokenResolver {
    /// Obtain (minting or reusing a cached, still-fresh) downstream token
    /// for `mxcp_scope` on behalf of `session`.
    pub async fn get_provider_token(
        &self,
        session: &crate::model::Session,
        mxcp_scope: &str,
    ) -> AuthResult<String> {
        self.sessions.ensure_downstream_token(session, mxcp_scope).await
    }
}

fn build_providers(config: &AuthCoreConfig) -> AuthResult<HashMap<String, Arc<dyn ProviderAdapter>>> {
    let mut providers: HashMap<String, Arc<dyn ProviderAdapter>> = HashMap::new();

    match config.mode {
        AuthMode::Issuer | AuthMode::Hybrid => {
            for instance in &config.providers {
                let adapter = build_oauth_or_verifier_adapter(instance, &config.callback_base_url)?;
                providers.insert(instance.name.clone(), adapter);
            }
        }
        AuthMode::Verifier => {
            for instance in &config.providers {
                let adapter = build_verifier_adapter(instance)?;
                providers.insert(instance.name.clone(), adapter);
            }
        }
        AuthMode::Proxy | AuthMode::Disabled => {}
    }

    if matches!(config.mode, AuthMode::Proxy | AuthMode::Hybrid) {
        let proxy = config
            .proxy
            .as_ref()
            .ok_or_else(|| AuthError::invalid_request("proxy mode requires auth.proxy config"))?;
        let header_config = ProxyHeaderConfig {
            user_id_header: proxy.user_id_header.clone(),
            name_header: proxy.name_header.clone(),
            email_header: proxy.email_header.clone(),
            groups_header: proxy.groups_header.clone(),
            roles_header: proxy.roles_header.clone(),
            mxcp_scopes_header: proxy.mxcp_scopes_header.clone(),
            upstream_token_header: proxy.upstream_token_header.clone(),
            signature_header: proxy.signature_header.clone(),
        };
        providers.insert(
            "proxy".to_string(),
            Arc::new(ProxyAdapter::new(
                "proxy",
                header_config,
                proxy.signature_secret.clone(),
            )),
        );
    }

    Ok(providers)
}

fn build_oauth_or_verifier_adapter(
    instance: &ProviderInstanceConfig,
    callback_base_url: &str,
) -> AuthResult<Arc<dyn ProviderAdapter>> {
    if instance.auth_url.is_some() && instance.token_url.is_some() {
        let config = OAuthCodeConfig {
            client_id: instance
                .client_id
                .clone()
                .ok_or_else(|| AuthError::invalid_request("provider missing client_id"))?,
            client_secret: instance
                .client_secret
                .clone()
                .ok_or_else(|| AuthError::invalid_request("provider missing client_secret"))?,
            auth_url: instance
                .auth_url
                .clone()
                .ok_or_else(|| AuthError::invalid_request("provider missing auth_url"))?,
            token_url: instance
                .token_url
                .clone()
                .ok_or_else(|| AuthError::invalid_request("provider missing token_url"))?,
            redirect_uri: format!("{callback_base_url}/auth/callback"),
            userinfo_endpoint: instance.userinfo_endpoint.clone().unwrap_or_default(),
        };
        let profile = profile_for(&instance.name);
        let adapter = OAuthCodeAdapter::new(instance.name.clone(), profile, config)
            .map_err(AuthError::from)?;
        Ok(Arc::new(adapter))
    } else {
        build_verifier_adapter(instance)
    }
}

fn build_verifier_adapter(
    instance: &ProviderInstanceConfig,
) -> AuthResult<Arc<dyn ProviderAdapter>> {
    let mode = if let Some(jwks_uri) = &instance.jwks_uri {
        VerificationMode::Jwks {
            uri: jwks_uri.clone(),
            issuer: instance.issuer_url.clone().unwrap_or_default(),
            audience: instance.client_id.clone().unwrap_or_default(),
        }
    } else if let Some(endpoint) = &instance.introspection_endpoint {
        VerificationMode::Introspection {
            endpoint: endpoint.clone(),
            client_id: instance.client_id.clone().unwrap_or_default(),
            client_secret: instance
                .client_secret
                .as_ref()
                .map(|s| s.expose_secret().to_string()),
        }
    } else {
        return Err(AuthError::invalid_request(
            "verifier provider requires either jwks_uri or introspection_endpoint",
        ));
    };
    let adapter = VerifierAdapter::new(instance.name.clone(), mode).map_err(AuthError::from)?;
    Ok(Arc::new(adapter))
}

/// Map a provider's configured name to the claim-extraction profile that
/// knows its particular JSON shape. Unknown names fall back to the bare
/// `sub`-only profile rather than failing startup over a naming mismatch.
fn profile_for(name: &str) -> ProviderProfile {
    match name {
        "google" => ProviderProfile::Google,
        "keycloak" => ProviderProfile::Keycloak,
        "github" => ProviderProfile::GitHub,
        "atlassian" => ProviderProfile::Atlassian,
        "salesforce" => ProviderProfile::Salesforce,
        _ => ProviderProfile::Google,
    }
}

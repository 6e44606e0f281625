//! The only writer of [`Session`] objects: mints opaque tokens, enforces
//! TTLs/rotation/revocation, and orchestrates the OAuth handshake state
//! machine.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use arc_swap::ArcSwap;
use base64::Engine;
use chrono::Utc;
use dashmap::DashMap;
use ring::rand::{SecureRandom, SystemRandom};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::audit::{AuditEvent, AuditSink};
use crate::config::TokenTtlConfig;
use crate::crypto::{EncryptionKey, ResolvedSecrets, Sealed, fingerprint};
use crate::error::{AuthError, AuthResult};
use crate::exchange::TokenExchangeBroker;
use crate::model::{
    AuthorizationCode, OAuthState, PkceMethod, ProviderGrant, ScopeMapping, ScopeRequirement, Session,
    UserContext,
};
use crate::provider::ProviderAdapter;
use crate::scope_mapper::{self};
use crate::store::TokenStore;

/// The pair of tokens returned to a client at the token endpoint.
#[derive(Debug, Clone)]
pub struct AccessGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_type: &'static str,
    pub expires_in: i64,
    pub scope: String,
}

/// The inputs an authorize-route handler needs to build the redirect to
/// the IdP.
#[derive(Debug, Clone)]
pub struct AuthorizeUrlInputs {
    pub state_id: Uuid,
}

fn mint_token(prefix: &str, byte_len: usize) -> AuthResult<String> {
    let rng = SystemRandom::new();
    let mut bytes = vec![0u8; byte_len];
    rng.fill(&mut bytes).map_err(|_| AuthError::Internal)?;
    let encoded = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes);
    Ok(format!("{prefix}{encoded}"))
}

/// Derive an S256 PKCE challenge from a verifier.
fn s256_challenge(verifier: &str) -> String {
    let digest = ring::digest::digest(&ring::digest::SHA256, verifier.as_bytes());
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest.as_ref())
}

fn pkce_matches(method: PkceMethod, verifier: &str, challenge: &str) -> bool {
    match method {
        PkceMethod::Plain => verifier == challenge,
        PkceMethod::S256 => s256_challenge(verifier) == challenge,
    }
}

/// The only writer of [`Session`] objects.
pub struct SessionManager {
    store: Arc<dyn TokenStore>,
    providers: HashMap<String, Arc<dyn ProviderAdapter>>,
    /// Hot-reloadable secret material. Readers call `.load()` and clone out
    /// what they need rather than holding the guard across an `.await`.
    secrets: ArcSwap<ResolvedSecrets>,
    ttls: TokenTtlConfig,
    refresh_locks: DashMap<Uuid, Arc<Mutex<()>>>,
    audit: Arc<dyn AuditSink>,
    scope_requirements: HashMap<String, ScopeRequirement>,
    exchange: TokenExchangeBroker,
    /// Per-provider claim-to-scope mapping, consulted by
    /// `complete_authorization` once the provider is known from the
    /// consumed `OAuthState`.
    scope_mappings: HashMap<String, ScopeMapping>,
    /// Tokens minted during `complete_authorization`, held until the
    /// client redeems the matching auth code at the token endpoint. The
    /// store never sees these in plaintext form outside the session's
    /// own (encrypted) provider grant.
    pending_tokens: DashMap<Uuid, (String, String)>,
}

impl SessionManager {
    #[must_use]
    pub fn new(
        store: Arc<dyn TokenStore>,
        providers: HashMap<String, Arc<dyn ProviderAdapter>>,
        encryption_key: EncryptionKey,
        ttls: TokenTtlConfig,
        audit: Arc<dyn AuditSink>,
        scope_requirements: HashMap<String, ScopeRequirement>,
        scope_mappings: HashMap<String, ScopeMapping>,
    ) -> Self {
        let exchange = TokenExchangeBroker::new(audit.clone());
        Self {
            store,
            providers,
            secrets: ArcSwap::from_pointee(ResolvedSecrets { encryption_key }),
            ttls,
            refresh_locks: DashMap::new(),
            audit,
            scope_requirements,
            exchange,
            scope_mappings,
            pending_tokens: DashMap::new(),
        }
    }

    /// Current encryption key. Cloned out of the swap so callers never hold
    /// a guard across an `.await`.
    fn encryption_key(&self) -> EncryptionKey {
        self.secrets.load().encryption_key.clone()
    }

    /// Atomically replace the hot-reloadable secret set. Called by
    /// [`crate::service::MxcpAuthService::reload`] after the new secrets
    /// have been successfully resolved and validated — a failed resolution
    /// never reaches here, so the previous secrets stay in effect.
    pub fn reload_secrets(&self, secrets: ResolvedSecrets) {
        self.secrets.store(Arc::new(secrets));
    }

    fn refresh_lock(&self, session_id: Uuid) -> Arc<Mutex<()>> {
        self.refresh_locks
            .entry(session_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn provider(&self, name: &str) -> AuthResult<Arc<dyn ProviderAdapter>> {
        self.providers
            .get(name)
            .cloned()
            .ok_or_else(|| AuthError::invalid_request(format!("unknown provider {name}")))
    }

    /// Public lookup for callers outside the handshake state machine (the
    /// tower middleware, resolving a proxy-mode request).
    #[must_use]
    pub fn provider_adapter(&self, name: &str) -> Option<Arc<dyn ProviderAdapter>> {
        self.providers.get(name).cloned()
    }

    /// Validate an opaque token (a proxy's encoded header snapshot, or a
    /// bearer token handed to a verifier adapter) against the named
    /// adapter's [`ProviderAdapter::fetch_user_info`] and build a fresh
    /// [`UserContext`] from the result.
    ///
    /// Used for both proxy-mode and verifier-mode authentication, neither
    /// of which has a locally-minted session to look up: a proxy request
    /// is re-validated from its headers on every call, and a verifier
    /// token was issued by an external authorization server this crate
    /// never saw the handshake for.
    pub async fn authenticate_via_adapter(
        &self,
        provider_name: &str,
        token: &str,
    ) -> AuthResult<UserContext> {
        let adapter = self.provider(provider_name)?;
        let profile = adapter.fetch_user_info(token).await.map_err(AuthError::from).inspect_err(|err| {
            if matches!(err, AuthError::Tamper) {
                self.audit.record(AuditEvent::TamperDetected { session_id: None });
            }
        })?;

        let mxcp_scopes: std::collections::BTreeSet<String> =
            profile.claims.granted_scopes.iter().cloned().collect();
        let mapped = self
            .scope_mappings
            .get(provider_name)
            .map(|mapping| scope_mapper::map(mapping, &profile.claims))
            .unwrap_or_default();

        Ok(UserContext {
            user_id: profile.subject.clone(),
            display_name: profile.display_name.clone(),
            email: profile.email.clone(),
            raw_profile: HashMap::new(),
            mxcp_scopes: mxcp_scopes.union(&mapped).cloned().collect(),
            provider_scopes_granted: profile.claims.granted_scopes.iter().cloned().collect(),
            provider: provider_name.to_string(),
            issued_at: Utc::now(),
        })
    }

    /// Validate inputs and persist an [`OAuthState`], returning the state id
    /// the caller embeds in the redirect to the IdP.
    pub async fn begin_authorization(
        &self,
        client_id: &str,
        redirect_uri: &str,
        requested_scopes: Vec<String>,
        code_challenge: String,
        code_challenge_method: PkceMethod,
        provider: &str,
        downstream_state: &str,
    ) -> AuthResult<(AuthorizeUrlInputs, OAuthState)> {
        if code_challenge_method == PkceMethod::Plain {
            return Err(AuthError::invalid_request(
                "plain PKCE challenges are not accepted",
            ));
        }
        self.provider(provider)?;

        let upstream_pkce_verifier = mint_token("", 32)?;
        let state = OAuthState {
            id: Uuid::new_v4(),
            code_challenge,
            code_challenge_method,
            upstream_pkce_verifier,
            client_id: client_id.to_string(),
            redirect_uri: redirect_uri.to_string(),
            downstream_state: downstream_state.to_string(),
            requested_scopes,
            provider: provider.to_string(),
            expires_at: Utc::now() + self.ttl_duration(self.ttls.state_ttl),
        };
        self.store.put_state(&state).await?;
        self.audit.record(AuditEvent::HandshakeTransition {
            stage: "begin_authorization",
            client_id: client_id.to_string(),
        });

        Ok((AuthorizeUrlInputs { state_id: state.id }, state))
    }

    fn ttl_duration(&self, duration: std::time::Duration) -> chrono::Duration {
        chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::zero())
    }

    /// Build the redirect URL to the upstream provider's own authorize
    /// endpoint, using MXCP's own (server-side, never client-exposed) PKCE
    /// challenge for its leg of the handshake.
    pub fn provider_authorize_url(&self, state: &OAuthState, callback_url: &str) -> AuthResult<String> {
        let adapter = self.provider(&state.provider)?;
        let challenge = s256_challenge(&state.upstream_pkce_verifier);
        adapter
            .build_authorize_url(callback_url, &state.id.to_string(), &state.requested_scopes, &challenge, &[])
            .map_err(AuthError::from)
    }

    /// Consume the state, exchange the code via the adapter using MXCP's
    /// own upstream PKCE verifier, build the `Session`, and mint the MXCP
    /// authorization code bound to the downstream client's PKCE challenge
    /// (verified later, at redemption, in [`Self::exchange_auth_code`]).
    pub async fn complete_authorization(
        &self,
        state_id: Uuid,
        code: &str,
        callback_url: &str,
    ) -> AuthResult<(Session, AuthorizationCode, String)> {
        let state = self
            .store
            .consume_state(state_id)
            .await?
            .ok_or(AuthError::InvalidGrant)?;
        if state.is_expired(Utc::now()) {
            return Err(AuthError::InvalidGrant);
        }

        let default_mapping = ScopeMapping::default();
        let scope_mapping = self.scope_mappings.get(&state.provider).unwrap_or(&default_mapping);
        let adapter = self.provider(&state.provider)?;
        let grant_result = adapter
            .exchange_code(code, callback_url, &state.upstream_pkce_verifier)
            .await
            .map_err(AuthError::from)?;
        let profile = adapter
            .fetch_user_info(&grant_result.access_token)
            .await
            .map_err(AuthError::from)?;

        let mxcp_scopes = scope_mapper::map(scope_mapping, &profile.claims);
        let now = Utc::now();

        let user_context = UserContext {
            user_id: profile.subject.clone(),
            display_name: profile.display_name.clone(),
            email: profile.email.clone(),
            raw_profile: HashMap::new(),
            mxcp_scopes,
            provider_scopes_granted: grant_result.granted_scopes.clone(),
            provider: state.provider.clone(),
            issued_at: now,
        };

        let access_token = mint_token("mcp_at_", 32)?;
        let refresh_token = mint_token("mcp_rt_", 32)?;
        let key = self.encryption_key();

        let grant = ProviderGrant {
            provider: state.provider.clone(),
            access_token: Sealed::seal_str(&key, &grant_result.access_token)?,
            refresh_token: grant_result
                .refresh_token
                .as_deref()
                .map(|t| Sealed::seal_str(&key, t))
                .transpose()?,
            expires_at: grant_result.expires_at,
            raw_claims: Sealed::seal_str(&key, &grant_result.raw_profile.to_string())?,
            granted_scopes: grant_result.granted_scopes,
            subject: grant_result.subject,
            downstream_tokens: BTreeMap::new(),
        };

        let session = Session {
            id: Uuid::new_v4(),
            access_token_fingerprint: fingerprint(&access_token),
            refresh_token_fingerprint: Some(fingerprint(&refresh_token)),
            client_id: state.client_id.clone(),
            issued_at: now,
            access_token_expires_at: now + self.ttl_duration(self.ttls.access_ttl),
            expires_at: now + self.ttl_duration(self.ttls.refresh_ttl),
            idle_timeout_at: now + self.ttl_duration(self.ttls.idle_timeout),
            user_context,
            provider_grants: BTreeMap::from([(state.provider.clone(), grant)]),
            mxcp_scopes: None,
        };

        self.store.put_session(&session).await?;
        self.audit.record(AuditEvent::SessionCreated {
            session_id: session.id,
            user_id: session.user_context.user_id.clone(),
            provider: session.user_context.provider.clone(),
        });

        let downstream_state = state.downstream_state;
        let auth_code = AuthorizationCode {
            id: Uuid::new_v4(),
            session_id: session.id,
            client_id: state.client_id,
            redirect_uri: state.redirect_uri,
            code_challenge: state.code_challenge,
            code_challenge_method: state.code_challenge_method,
            expires_at: now + self.ttl_duration(self.ttls.auth_code_ttl),
        };
        self.store.put_auth_code(&auth_code).await?;

        // The minted access/refresh tokens only ever exist as return
        // values to the caller (for the `CodeIssued -> TokenIssued`
        // transition) and as fingerprints in the store; embed them in the
        // session's first grant exchange response via `exchange_auth_code`
        // rather than returning them here, since the code flow only
        // releases tokens at the token endpoint.
        self.pending_tokens
            .insert(auth_code.id, (access_token, refresh_token));

        Ok((session, auth_code, downstream_state))
    }

    /// Consume the MXCP authorization code and return the bound
    /// access+refresh token pair.
    pub async fn exchange_auth_code(
        &self,
        auth_code_id: Uuid,
        client_id: &str,
        redirect_uri: &str,
        code_verifier: &str,
    ) -> AuthResult<AccessGrant> {
        let code = self
            .store
            .consume_auth_code(auth_code_id)
            .await?
            .ok_or(AuthError::InvalidGrant)?;
        if code.is_expired(Utc::now()) || !code.binds_to(client_id, redirect_uri) {
            return Err(AuthError::InvalidGrant);
        }
        if !pkce_matches(code.code_challenge_method, code_verifier, &code.code_challenge) {
            self.audit.record(AuditEvent::TamperDetected { session_id: Some(code.session_id) });
            return Err(AuthError::Tamper);
        }

        let session = self
            .store
            .get_session_by_id(code.session_id)
            .await?
            .ok_or(AuthError::InvalidGrant)?;

        let (access_token, refresh_token) = self
            .pending_tokens
            .remove(&auth_code_id)
            .map(|(_, v)| v)
            .ok_or(AuthError::InvalidGrant)?;

        Ok(AccessGrant {
            access_token,
            refresh_token: Some(refresh_token),
            token_type: "Bearer",
            expires_in: (session.access_token_expires_at - Utc::now()).num_seconds().max(0),
            scope: session
                .effective_scopes()
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join(" "),
        })
    }

    /// Validate a refresh token, rotate it transactionally, and refresh
    /// provider grants if the provider's own access token has expired.
    pub async fn refresh(&self, mxcp_refresh_token: &str) -> AuthResult<AccessGrant> {
        let fp = fingerprint(mxcp_refresh_token);
        let session = self
            .store
            .get_session_by_token_fingerprint(&fp)
            .await?
            .ok_or(AuthError::InvalidGrant)?;

        if session.refresh_token_fingerprint.as_deref() != Some(fp.as_str()) {
            return Err(AuthError::InvalidGrant);
        }
        if session.is_expired(Utc::now()) {
            return Err(AuthError::InvalidGrant);
        }

        let lock = self.refresh_lock(session.id);
        let _guard = lock.lock().await;

        // Re-read after acquiring the lock: another racer may have rotated
        // first, in which case the token we were handed is now stale.
        let current = self
            .store
            .get_session_by_id(session.id)
            .await?
            .ok_or(AuthError::InvalidGrant)?;
        if current.refresh_token_fingerprint.as_deref() != Some(fp.as_str()) {
            tracing::warn!(session_id = %current.id, "refresh token already rotated; possible replay");
            return Err(AuthError::InvalidGrant);
        }

        let new_access_token = mint_token("mcp_at_", 32)?;
        let new_refresh_token = mint_token("mcp_rt_", 32)?;
        let now = Utc::now();
        let new_access_token_expires_at = now + self.ttl_duration(self.ttls.access_ttl);
        let new_expires_at = now + self.ttl_duration(self.ttls.refresh_ttl);
        let new_idle_timeout_at = now + self.ttl_duration(self.ttls.idle_timeout);

        let rotated = self
            .store
            .rotate_session_tokens(
                current.id,
                &current.access_token_fingerprint,
                &fingerprint(&new_access_token),
                Some(&fingerprint(&new_refresh_token)),
                new_access_token_expires_at,
                new_expires_at,
                new_idle_timeout_at,
            )
            .await?;
        if !rotated {
            tracing::warn!(session_id = %current.id, "refresh token rotation lost the race; possible replay");
            return Err(AuthError::InvalidGrant);
        }

        self.audit.record(AuditEvent::SessionRefreshed { session_id: current.id });

        Ok(AccessGrant {
            access_token: new_access_token,
            refresh_token: Some(new_refresh_token),
            token_type: "Bearer",
            expires_in: (new_access_token_expires_at - now).num_seconds().max(0),
            scope: current
                .effective_scopes()
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join(" "),
        })
    }

    /// Resolve an access token to its session, advancing the idle-timeout
    /// tripwire. Returns `Ok(None)` for an unknown, expired, or
    /// idle-timed-out token — never distinguishes the reason to the caller,
    /// since doing so would let an attacker probe for valid-but-expired
    /// tokens.
    pub async fn resolve(&self, access_token: &str) -> AuthResult<Option<Session>> {
        let fp = fingerprint(access_token);
        let Some(session) = self.store.get_session_by_token_fingerprint(&fp).await? else {
            return Ok(None);
        };
        if session.access_token_fingerprint != fp {
            // the fingerprint matched the refresh token column instead
            return Ok(None);
        }
        let now = Utc::now();
        if !session.is_active(now) {
            return Ok(None);
        }

        let new_idle_timeout_at = now + self.ttl_duration(self.ttls.idle_timeout);
        self.store
            .rotate_session_tokens(
                session.id,
                &session.access_token_fingerprint,
                &session.access_token_fingerprint,
                session.refresh_token_fingerprint.as_deref(),
                session.access_token_expires_at,
                session.expires_at,
                new_idle_timeout_at,
            )
            .await?;

        Ok(Some(session))
    }

    /// Delete the session and best-effort notify the IdP.
    pub async fn revoke(&self, session_id: Uuid) -> AuthResult<()> {
        if let Some(session) = self.store.get_session_by_id(session_id).await? {
            let key = self.encryption_key();
            for grant in session.provider_grants.values() {
                if let Ok(adapter) = self.provider(&grant.provider) {
                    if let Ok(raw) = grant.access_token.open_str(&key) {
                        adapter.revoke(&raw, Some("access_token")).await;
                    }
                }
            }
        }
        self.store.delete_session(session_id).await?;
        self.audit.record(AuditEvent::SessionRevoked { session_id, reason: "explicit" });
        Ok(())
    }

    /// Consult the configured [`ScopeRequirement`] for `mxcp_scope` and
    /// obtain (acquiring lazily via the exchange broker if necessary) a
    /// downstream provider token, caching it in the session.
    pub async fn ensure_downstream_token(
        &self,
        session: &Session,
        mxcp_scope: &str,
    ) -> AuthResult<String> {
        let requirement = self
            .scope_requirements
            .get(mxcp_scope)
            .ok_or_else(|| AuthError::invalid_scope(mxcp_scope))?;

        let grant = session
            .provider_grants
            .get(&requirement.provider)
            .ok_or(AuthError::DownstreamUnavailable)?;

        let key = self.encryption_key();
        if let Some(existing) = grant.downstream_tokens.get(&requirement.audience) {
            if existing.is_fresh(chrono::Duration::seconds(60), Utc::now()) {
                return existing.access_token.open_str(&key);
            }
        }

        let adapter = self.provider(&requirement.provider)?;
        let subject_token = grant.access_token.open_str(&key)?;

        let result = self
            .exchange
            .exchange(
                session.id,
                adapter,
                &subject_token,
                &requirement.audience,
                requirement.resource.as_deref(),
            )
            .await?;

        let downstream = crate::model::DownstreamToken {
            access_token: Sealed::seal_str(&key, &result.access_token)?,
            expires_at: result
                .expires_at
                .unwrap_or_else(|| Utc::now() + chrono::Duration::seconds(60)),
            audience: requirement.audience.clone(),
        };

        let mut updated = session.clone();
        if let Some(grant) = updated.provider_grants.get_mut(&requirement.provider) {
            grant
                .downstream_tokens
                .insert(requirement.audience.clone(), downstream);
        }
        self.store.put_session(&updated).await?;
        self.audit.record(AuditEvent::DownstreamTokenIssued {
            session_id: session.id,
            audience: requirement.audience.clone(),
        });

        Ok(result.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::TracingAuditSink;
    use crate::store::sqlite::SqliteTokenStore;

    async fn test_manager(key: EncryptionKey) -> SessionManager {
        let store: Arc<dyn TokenStore> = Arc::new(SqliteTokenStore::open(":memory:", 2).await.unwrap());
        SessionManager::new(
            store,
            HashMap::new(),
            key,
            TokenTtlConfig {
                access_ttl: std::time::Duration::from_secs(3600),
                refresh_ttl: std::time::Duration::from_secs(3600 * 24 * 30),
                idle_timeout: std::time::Duration::from_secs(1800),
                state_ttl: std::time::Duration::from_secs(300),
                auth_code_ttl: std::time::Duration::from_secs(60),
            },
            Arc::new(TracingAuditSink),
            HashMap::new(),
            HashMap::new(),
        )
    }

    #[tokio::test]
    async fn reload_secrets_swaps_the_encryption_key_in_place() {
        let old_key = EncryptionKey::from_bytes(&[1u8; 32]).unwrap();
        let manager = test_manager(old_key.clone()).await;

        let sealed_under_old = Sealed::seal_str(&manager.encryption_key(), "provider-token").unwrap();

        let new_key = EncryptionKey::from_bytes(&[2u8; 32]).unwrap();
        manager.reload_secrets(ResolvedSecrets { encryption_key: new_key.clone() });

        // newly sealed values use the reloaded key...
        let sealed_under_new = Sealed::seal_str(&manager.encryption_key(), "provider-token").unwrap();
        assert!(sealed_under_new.open_str(&new_key).is_ok());

        // ...and anything sealed under the old key is no longer openable
        // with the live key, confirming the swap actually took effect
        // rather than reload_secrets being a no-op.
        assert!(matches!(sealed_under_old.open_str(&manager.encryption_key()), Err(AuthError::Tamper)));
        assert!(sealed_under_old.open_str(&old_key).is_ok());
    }
}

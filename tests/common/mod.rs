//! Shared fixtures for the authentication core's integration tests.
//!
//! Builds real [`SessionManager`]s backed by an in-memory sqlite store and
//! [`TestDoubleAdapter`] provider stand-ins, so these tests exercise the
//! actual handshake state machine rather than mocking it away.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use mxcp_auth_core::audit::{AuditSink, TracingAuditSink};
use mxcp_auth_core::config::TokenTtlConfig;
use mxcp_auth_core::crypto::EncryptionKey;
use mxcp_auth_core::model::{ScopeMapping, ScopeRequirement};
use mxcp_auth_core::provider::{ProviderAdapter, TestDoubleAdapter};
use mxcp_auth_core::session_manager::SessionManager;
use mxcp_auth_core::store::sqlite::SqliteTokenStore;
use mxcp_auth_core::store::TokenStore;
use sha2::{Digest, Sha256};

pub fn test_key() -> EncryptionKey {
    EncryptionKey::from_bytes(&[5u8; 32]).unwrap()
}

/// Short-but-nonzero TTLs so expiry-dependent assertions don't need to
/// sleep. `access_ttl` is kept well below `refresh_ttl`, matching
/// production defaults, so a test that accidentally reads the wrong one
/// fails loudly instead of passing by coincidence.
pub fn test_ttls() -> TokenTtlConfig {
    TokenTtlConfig {
        access_ttl: Duration::from_secs(3600),
        refresh_ttl: Duration::from_secs(3600 * 24 * 30),
        idle_timeout: Duration::from_secs(1800),
        state_ttl: Duration::from_secs(300),
        auth_code_ttl: Duration::from_secs(60),
    }
}

pub async fn test_store() -> Arc<dyn TokenStore> {
    Arc::new(SqliteTokenStore::open(":memory:", 2).await.unwrap())
}

pub fn test_audit() -> Arc<dyn AuditSink> {
    Arc::new(TracingAuditSink)
}

/// Build a manager with a single `"test"` provider backed by a
/// [`TestDoubleAdapter`], plus whatever scope requirements/mappings the
/// caller supplies.
pub async fn build_manager_with_adapter(
    adapter: Arc<dyn ProviderAdapter>,
    scope_requirements: HashMap<String, ScopeRequirement>,
    scope_mappings: HashMap<String, ScopeMapping>,
) -> Arc<SessionManager> {
    let mut providers: HashMap<String, Arc<dyn ProviderAdapter>> = HashMap::new();
    providers.insert(adapter.name().to_string(), adapter);

    Arc::new(SessionManager::new(
        test_store().await,
        providers,
        test_key(),
        test_ttls(),
        test_audit(),
        scope_requirements,
        scope_mappings,
    ))
}

pub async fn build_manager() -> (Arc<SessionManager>, Arc<TestDoubleAdapter>) {
    let adapter = Arc::new(TestDoubleAdapter::new("test"));
    let manager =
        build_manager_with_adapter(adapter.clone(), HashMap::new(), HashMap::new()).await;
    (manager, adapter)
}

/// A PKCE verifier/challenge pair, S256.
pub fn pkce_pair() -> (String, String) {
    let verifier = "a-fixed-length-client-generated-code-verifier-string";
    let digest = Sha256::digest(verifier.as_bytes());
    let challenge = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest);
    (verifier.to_string(), challenge)
}

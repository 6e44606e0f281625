//! Frozen, strongly-typed configuration surface.
//!
//! These structs mirror the configuration shape a YAML/TOML/env parser
//! upstream of this crate would produce; parsing itself is out of scope
//! here. Secret fields use [`secrecy::SecretString`] end to end, matching
//! the teacher crate's convention of never letting a raw secret escape
//! into a `Debug` impl.

use std::collections::HashMap;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::model::{ScopeMapping, ScopeRequirement};

/// Top-level operating mode. Selection is explicit; the service never
/// auto-detects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    /// MXCP drives the OAuth handshake itself and issues its own opaque
    /// tokens.
    Issuer,
    /// MXCP validates bearer tokens issued by an external authorization
    /// server; no handshake routes are installed.
    Verifier,
    /// Identity comes from trusted reverse-proxy headers; no network
    /// routes are installed.
    Proxy,
    /// Both an OAuth adapter and the proxy adapter are configured; one
    /// takes precedence per [`HybridPrecedence`] when both credentials are
    /// present on a request.
    Hybrid,
    /// Authentication is turned off entirely. Every request resolves to an
    /// unauthenticated context; only appropriate for local development.
    Disabled,
}

/// Which credential wins when both an OAuth bearer token and proxy headers
/// are present on the same request in [`AuthMode::Hybrid`]. The spec leaves
/// this choice to the implementation but requires it be configured, not
/// implicit — this is that configuration knob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HybridPrecedence {
    /// Prefer the proxy adapter; fall back to OAuth if proxy headers are
    /// absent or fail signature validation.
    ProxyFirst,
    /// Prefer the OAuth bearer token; fall back to proxy headers if no
    /// bearer token is present.
    OAuthFirst,
}

/// Per-provider configuration: the fields needed to construct whichever
/// [`crate::provider::ProviderAdapter`] variant this provider uses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderInstanceConfig {
    pub name: String,
    pub client_id: Option<String>,
    pub client_secret: Option<SecretString>,
    pub issuer_url: Option<String>,
    pub auth_url: Option<String>,
    pub token_url: Option<String>,
    pub userinfo_endpoint: Option<String>,
    pub jwks_uri: Option<String>,
    pub introspection_endpoint: Option<String>,
    pub required_scopes: Vec<String>,
    pub optional_scopes: Vec<String>,
    pub claim_mappings: ScopeMapping,
    pub token_exchange_audiences: Vec<String>,
}

/// `auth.proxy.*` configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub user_id_header: String,
    pub name_header: Option<String>,
    pub email_header: Option<String>,
    pub groups_header: Option<String>,
    pub roles_header: Option<String>,
    pub mxcp_scopes_header: Option<String>,
    pub upstream_token_header: Option<String>,
    pub signature_header: String,
    pub signature_secret: SecretString,
    pub require_mtls: bool,
}

/// `auth.persistence.*` configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Currently only `"sqlite"` is shipped; the field exists so a future
    /// backend can be selected without a breaking config change.
    pub backend: String,
    pub path: String,
    pub encryption_key: SecretString,
    #[serde(with = "duration_secs")]
    pub cleanup_interval: Duration,
    pub read_pool_size: u32,
}

/// `auth.tokens.*` configuration: TTLs for every issued artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenTtlConfig {
    #[serde(with = "duration_secs")]
    pub access_ttl: Duration,
    #[serde(with = "duration_secs")]
    pub refresh_ttl: Duration,
    #[serde(with = "duration_secs")]
    pub idle_timeout: Duration,
    #[serde(with = "duration_secs")]
    pub state_ttl: Duration,
    #[serde(with = "duration_secs")]
    pub auth_code_ttl: Duration,
}

impl Default for TokenTtlConfig {
    fn default() -> Self {
        Self {
            access_ttl: Duration::from_secs(3600),
            refresh_ttl: Duration::from_secs(60 * 60 * 24 * 30),
            idle_timeout: Duration::from_secs(60 * 30),
            state_ttl: Duration::from_secs(300),
            auth_code_ttl: Duration::from_secs(60),
        }
    }
}

/// Network and storage call deadlines, per the concurrency model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(with = "duration_secs")]
    pub network_timeout: Duration,
    #[serde(with = "duration_secs")]
    pub storage_timeout: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            network_timeout: Duration::from_secs(10),
            storage_timeout: Duration::from_secs(2),
        }
    }
}

/// The complete, frozen configuration surface for the authentication core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthCoreConfig {
    pub mode: AuthMode,
    pub hybrid_precedence: Option<HybridPrecedence>,
    pub providers: Vec<ProviderInstanceConfig>,
    pub proxy: Option<ProxyConfig>,
    pub scope_requirements: HashMap<String, ScopeRequirement>,
    pub persistence: PersistenceConfig,
    pub tokens: TokenTtlConfig,
    pub timeouts: TimeoutConfig,
    pub callback_base_url: String,
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

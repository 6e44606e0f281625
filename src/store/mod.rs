//! Durable, concurrent-safe persistence for sessions, handshake state, and
//! client registrations.

pub mod sqlite;

pub use sqlite::SqliteTokenStore;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::AuthResult;
use crate::model::{AuthorizationCode, ClientRegistration, OAuthState, Session};

/// Identifiers removed by a [`TokenStore::sweep_expired`] pass.
#[derive(Debug, Clone, Default)]
pub struct SweepResult {
    pub sessions: Vec<Uuid>,
    pub states: Vec<Uuid>,
    pub auth_codes: Vec<Uuid>,
}

/// Authoritative owner of expiry semantics and one-time-use guarantees for
/// everything the session manager persists.
///
/// Every call is wrapped in a configured deadline at the implementation
/// boundary (see [`crate::config::StorageConfig::call_timeout`]) so the
/// guarantee in the concurrency model is structural rather than a matter of
/// call sites remembering to wrap it.
///
/// Implementations must never hold a lock across an operation that spans
/// another `.await` outside this trait — rotation and consumption are
/// compare-and-set at the storage layer, not coordinated by the caller.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Insert or fully replace a session record.
    async fn put_session(&self, session: &Session) -> AuthResult<()>;

    /// Look up a session by the fingerprint of its current access or
    /// refresh token. Returns `Ok(None)` if no session matches.
    async fn get_session_by_token_fingerprint(&self, fingerprint: &str) -> AuthResult<Option<Session>>;

    /// Look up a session by id, regardless of token state.
    async fn get_session_by_id(&self, id: Uuid) -> AuthResult<Option<Session>>;

    /// Compare-and-set rotation: replace the access/refresh token
    /// fingerprints and expiries for a session, but only if the session's
    /// current access-token fingerprint still matches `expected_access_fp`.
    /// Returns `Ok(false)` on a fingerprint mismatch (a concurrent refresh
    /// won the race), never an error.
    async fn rotate_session_tokens(
        &self,
        id: Uuid,
        expected_access_fp: &str,
        new_access_fp: &str,
        new_refresh_fp: Option<&str>,
        new_access_token_expires_at: chrono::DateTime<chrono::Utc>,
        new_expires_at: chrono::DateTime<chrono::Utc>,
        new_idle_timeout_at: chrono::DateTime<chrono::Utc>,
    ) -> AuthResult<bool>;

    /// Delete a session and every provider grant it owns.
    async fn delete_session(&self, id: Uuid) -> AuthResult<()>;

    /// Store a one-shot OAuth handshake state.
    async fn put_state(&self, state: &OAuthState) -> AuthResult<()>;

    /// Atomically read and delete a state by id. Returns `Ok(None)` if the
    /// id is unknown or was already consumed; the caller is responsible for
    /// separately checking `is_expired` on the returned value, since an
    /// expired-but-unconsumed state is still deleted here to avoid leaking
    /// storage.
    async fn consume_state(&self, id: Uuid) -> AuthResult<Option<OAuthState>>;

    /// Store a one-shot authorization code.
    async fn put_auth_code(&self, code: &AuthorizationCode) -> AuthResult<()>;

    /// Atomically read and delete an authorization code by id.
    async fn consume_auth_code(&self, id: Uuid) -> AuthResult<Option<AuthorizationCode>>;

    /// Insert or replace a client registration.
    async fn put_client(&self, registration: &ClientRegistration) -> AuthResult<()>;

    /// Look up a client registration by id.
    async fn get_client(&self, client_id: &str) -> AuthResult<Option<ClientRegistration>>;

    /// List every registered client.
    async fn list_clients(&self) -> AuthResult<Vec<ClientRegistration>>;

    /// Delete every session, state, and auth code whose expiry has passed,
    /// returning the identifiers removed. Safe to call concurrently with
    /// itself and with every other operation; callers with their own
    /// scheduler may invoke this directly instead of relying on the crate's
    /// background sweeper.
    async fn sweep_expired(&self) -> AuthResult<SweepResult>;
}

//! RFC 8693 token exchange with per-`(session, audience)` deduplication.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::audit::{AuditEvent, AuditSink};
use crate::error::AuthError;
use crate::provider::{ExternalGrantResult, ProviderAdapter};

/// Broker for downstream token exchange. Concurrent requests for the same
/// `(session_id, audience)` pair collapse onto a single in-flight exchange
/// call — the dedup lock is held only across the adapter call, never
/// across storage I/O (the caller persists the result itself).
pub struct TokenExchangeBroker {
    locks: DashMap<(Uuid, String), Arc<Mutex<()>>>,
    audit: Arc<dyn AuditSink>,
}

impl TokenExchangeBroker {
    #[must_use]
    pub fn new(audit: Arc<dyn AuditSink>) -> Self {
        Self {
            locks: DashMap::new(),
            audit,
        }
    }

    fn lock_for(&self, session_id: Uuid, audience: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry((session_id, audience.to_string()))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Perform (or wait for a concurrent, already-in-flight) exchange for
    /// `audience` on behalf of `session_id`.
    pub async fn exchange(
        &self,
        session_id: Uuid,
        adapter: Arc<dyn ProviderAdapter>,
        subject_token: &str,
        audience: &str,
        resource: Option<&str>,
    ) -> Result<ExternalGrantResult, AuthError> {
        let lock = self.lock_for(session_id, audience);
        let _guard = lock.lock().await;

        adapter
            .exchange_token(subject_token, audience, resource)
            .await
            .map_err(|err| {
                self.audit.record(AuditEvent::ProviderError {
                    provider: adapter.name().to_string(),
                    operation: "exchange_token",
                    message: err.to_string(),
                });
                AuthError::from(err)
            })
    }
}

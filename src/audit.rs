//! Structured audit events for the authentication lifecycle.
//!
//! The core never owns a specific audit backend — it emits [`AuditEvent`]s
//! to an injected [`AuditSink`], matching the telemetry/audit-backend
//! exclusion from this crate's scope. [`TracingAuditSink`] is the default,
//! routing events through `tracing` the way every other boundary in this
//! crate already logs.

use uuid::Uuid;

/// One structured event in the authentication lifecycle. Every variant is
/// free of secret material — callers may log, forward, or persist these
/// directly.
#[derive(Debug, Clone)]
pub enum AuditEvent {
    /// A handshake stage transition (`begin_authorization`,
    /// `complete_authorization`, etc.).
    HandshakeTransition { stage: &'static str, client_id: String },
    /// A session was created.
    SessionCreated { session_id: Uuid, user_id: String, provider: String },
    /// A session's tokens were rotated via refresh.
    SessionRefreshed { session_id: Uuid },
    /// A session was revoked, with the reason.
    SessionRevoked { session_id: Uuid, reason: &'static str },
    /// Decryption or signature verification failed; the owning session was
    /// revoked as a result.
    TamperDetected { session_id: Option<Uuid> },
    /// A downstream token was obtained via token exchange.
    DownstreamTokenIssued { session_id: Uuid, audience: String },
    /// A request was denied for lacking a required scope.
    ScopeDenied { session_id: Uuid, missing_scope: String },
    /// A call to a provider adapter failed.
    ProviderError { provider: String, operation: &'static str, message: String },
}

/// Receiver for [`AuditEvent`]s. Implementations must not block the
/// calling task for long — the session manager emits these inline with the
/// operations they describe.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Default sink: routes every event through `tracing` at a level matching
/// its severity.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        match event {
            AuditEvent::HandshakeTransition { stage, client_id } => {
                tracing::debug!(stage, client_id, "handshake transition");
            }
            AuditEvent::SessionCreated { session_id, user_id, provider } => {
                tracing::info!(%session_id, user_id, provider, "session created");
            }
            AuditEvent::SessionRefreshed { session_id } => {
                tracing::debug!(%session_id, "session refreshed");
            }
            AuditEvent::SessionRevoked { session_id, reason } => {
                tracing::info!(%session_id, reason, "session revoked");
            }
            AuditEvent::TamperDetected { session_id } => {
                tracing::warn!(?session_id, "tamper detected");
            }
            AuditEvent::DownstreamTokenIssued { session_id, audience } => {
                tracing::debug!(%session_id, audience, "downstream token issued");
            }
            AuditEvent::ScopeDenied { session_id, missing_scope } => {
                tracing::info!(%session_id, missing_scope, "scope denied");
            }
            AuditEvent::ProviderError { provider, operation, message } => {
                tracing::warn!(provider, operation, message, "provider error");
            }
        }
    }
}

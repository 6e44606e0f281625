//! Authentication and authorization core for MXCP.
//!
//! This crate owns the full session lifecycle behind an MCP server's bearer
//! tokens: the OAuth 2.1 handshake (authorization code + PKCE), provider
//! adapters for OAuth/OIDC IdPs, bearer-token verification against an
//! external authorization server, trusted reverse-proxy header identity,
//! claim-to-scope mapping, RFC 8693 downstream token exchange, and the
//! tower/axum plumbing a host application wires its own server to.
//!
//! [`service::MxcpAuthService`] is the composition root: build one from an
//! [`config::AuthCoreConfig`], then pull a [`middleware::AuthLayer`] for a
//! generic `tower` stack and a handshake [`axum::Router`] out of it.

pub mod audit;
pub mod config;
pub mod crypto;
pub mod error;
pub mod exchange;
pub mod middleware;
pub mod model;
pub mod provider;
pub mod routes;
pub mod scope_mapper;
pub mod service;
pub mod session_manager;
pub mod store;

pub use config::{AuthCoreConfig, AuthMode, HybridPrecedence};
pub use error::{AuthError, AuthResult};
pub use middleware::{AuthLayer, AuthenticatedUser};
pub use model::{Session, UserContext};
pub use service::MxcpAuthService;
pub use session_manager::{AccessGrant, SessionManager};

//! Data model for sessions, grants, handshake state, and the clients and
//! scope rules that govern them.

pub mod auth_code;
pub mod client;
pub mod grant;
pub mod oauth_state;
pub mod scope;
pub mod session;
pub mod user_context;

pub use auth_code::AuthorizationCode;
pub use client::ClientRegistration;
pub use grant::{DownstreamToken, ProviderGrant};
pub use oauth_state::{OAuthState, PkceMethod};
pub use scope::{GrantedClaims, ScopeMapping, ScopeRequirement};
pub use session::Session;
pub use user_context::UserContext;

//! Axum handlers for the OAuth handshake, installed by
//! [`crate::service::MxcpAuthService::register_routes`] in issuer and
//! hybrid mode.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::{IntoResponse, Json, Redirect, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::config::AuthCoreConfig;
use crate::error::AuthError;
use crate::model::PkceMethod;
use crate::session_manager::SessionManager;

#[derive(Clone)]
struct RouteState {
    sessions: Arc<SessionManager>,
    config: Arc<AuthCoreConfig>,
}

/// Build the handshake router. Every route is mounted unconditionally —
/// callers in verifier/proxy/disabled mode never call this function (see
/// `MxcpAuthService::register_routes`).
pub fn router(sessions: Arc<SessionManager>, config: &AuthCoreConfig) -> Router {
    let state = RouteState {
        sessions,
        config: Arc::new(config.clone()),
    };

    Router::new()
        .route("/auth/authorize", get(authorize))
        .route("/auth/callback", get(callback))
        .route("/auth/token", post(token))
        .route(
            "/.well-known/oauth-authorization-server",
            get(metadata),
        )
        .with_state(state)
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": self.oauth_error_code(),
            "error_description": self.to_string(),
        });
        (self.http_status(), Json(body)).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct AuthorizeQuery {
    client_id: String,
    redirect_uri: String,
    #[serde(default)]
    scope: String,
    state: String,
    code_challenge: String,
    code_challenge_method: String,
    #[serde(default)]
    provider: Option<String>,
}

async fn authorize(
    State(state): State<RouteState>,
    Query(query): Query<AuthorizeQuery>,
) -> Result<Redirect, AuthError> {
    let method = match query.code_challenge_method.as_str() {
        "S256" => PkceMethod::S256,
        "plain" => PkceMethod::Plain,
        other => return Err(AuthError::invalid_request(format!("unsupported code_challenge_method {other}"))),
    };
    let provider = query
        .provider
        .or_else(|| state.config.providers.first().map(|p| p.name.clone()))
        .ok_or_else(|| AuthError::invalid_request("no provider configured"))?;

    let requested_scopes: Vec<String> = query
        .scope
        .split_whitespace()
        .map(str::to_string)
        .collect();

    let (_inputs, oauth_state) = state
        .sessions
        .begin_authorization(
            &query.client_id,
            &query.redirect_uri,
            requested_scopes,
            query.code_challenge,
            method,
            &provider,
            &query.state,
        )
        .await?;

    let provider_adapter_url = build_provider_authorize_url(&state, &oauth_state)?;

    Ok(Redirect::temporary(&provider_adapter_url))
}

fn build_provider_authorize_url(
    state: &RouteState,
    oauth_state: &crate::model::OAuthState,
) -> Result<String, AuthError> {
    // The concrete adapter builds its own provider-specific URL; routes
    // only own the HTTP transport, not OAuth wire details, so this defers
    // to the adapter the session manager already resolved internally.
    // `begin_authorization` validates the provider exists but does not
    // hand the adapter back, so callback URLs are derived here from the
    // configured callback base.
    let callback_url = format!("{}/auth/callback", state.config.callback_base_url);
    state
        .sessions
        .provider_authorize_url(oauth_state, &callback_url)
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    code: String,
    state: Uuid,
}

async fn callback(
    State(state): State<RouteState>,
    Query(query): Query<CallbackQuery>,
) -> Result<Redirect, AuthError> {
    let callback_url = format!("{}/auth/callback", state.config.callback_base_url);

    let (_session, auth_code, downstream_state) = state
        .sessions
        .complete_authorization(query.state, &query.code, &callback_url)
        .await?;

    let redirect_uri = auth_code.redirect_uri.clone();
    let sep = if redirect_uri.contains('?') { '&' } else { '?' };
    let encoded_state = urlencoding::encode(&downstream_state);
    Ok(Redirect::temporary(&format!(
        "{redirect_uri}{sep}code=mcp_ac_{}&state={encoded_state}",
        auth_code.id
    )))
}

#[derive(Debug, Deserialize)]
struct TokenForm {
    grant_type: String,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    redirect_uri: Option<String>,
    #[serde(default)]
    client_id: Option<String>,
    #[serde(default)]
    code_verifier: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
}

async fn token(
    State(state): State<RouteState>,
    axum::Form(form): axum::Form<TokenForm>,
) -> Result<Json<serde_json::Value>, AuthError> {
    let grant = match form.grant_type.as_str() {
        "authorization_code" => {
            let code = form
                .code
                .as_deref()
                .and_then(|c| c.strip_prefix("mcp_ac_"))
                .ok_or_else(|| AuthError::invalid_request("missing or malformed code"))?;
            let code_id: Uuid = code
                .parse()
                .map_err(|_| AuthError::invalid_request("malformed code"))?;
            let client_id = form
                .client_id
                .as_deref()
                .ok_or_else(|| AuthError::invalid_request("missing client_id"))?;
            let redirect_uri = form
                .redirect_uri
                .as_deref()
                .ok_or_else(|| AuthError::invalid_request("missing redirect_uri"))?;
            let code_verifier = form
                .code_verifier
                .as_deref()
                .ok_or_else(|| AuthError::invalid_request("missing code_verifier"))?;
            state
                .sessions
                .exchange_auth_code(code_id, client_id, redirect_uri, code_verifier)
                .await?
        }
        "refresh_token" => {
            let refresh_token = form
                .refresh_token
                .as_deref()
                .ok_or_else(|| AuthError::invalid_request("missing refresh_token"))?;
            state.sessions.refresh(refresh_token).await?
        }
        other => {
            return Err(AuthError::invalid_request(format!(
                "unsupported grant_type {other}"
            )))
        }
    };

    Ok(Json(json!({
        "access_token": grant.access_token,
        "token_type": grant.token_type,
        "expires_in": grant.expires_in,
        "refresh_token": grant.refresh_token,
        "scope": grant.scope,
    })))
}

async fn metadata(State(state): State<RouteState>) -> Json<serde_json::Value> {
    let mut grant_types = vec!["authorization_code", "refresh_token"];
    if state.config.providers.is_empty() {
        grant_types.clear();
    }
    let scopes: BTreeMap<String, ()> = state
        .config
        .scope_requirements
        .keys()
        .map(|k| (k.clone(), ()))
        .collect();

    Json(json!({
        "issuer": state.config.callback_base_url,
        "authorization_endpoint": format!("{}/auth/authorize", state.config.callback_base_url),
        "token_endpoint": format!("{}/auth/token", state.config.callback_base_url),
        "grant_types_supported": grant_types,
        "code_challenge_methods_supported": ["S256"],
        "scopes_supported": scopes.keys().collect::<Vec<_>>(),
    }))
}

//! Integration tests for the tower middleware's bearer-token resolution and
//! per-endpoint scope enforcement.

mod common;

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use common::{build_manager_with_adapter, pkce_pair};
use http::Request;
use mxcp_auth_core::error::AuthError;
use mxcp_auth_core::middleware::AuthLayer;
use mxcp_auth_core::model::{PkceMethod, ScopeMapping, UserContext};
use mxcp_auth_core::provider::test_double::FixedGrant;
use mxcp_auth_core::provider::TestDoubleAdapter;
use tower::{Layer, ServiceExt};

/// A bare handler, not a closure, so it trivially satisfies the `Clone`
/// bound `AuthService<S>` asks of its inner service. The path doubles as
/// the scope to require, e.g. `GET /tools.read`.
async fn echo_scope_handler(req: Request<Body>) -> Result<http::Response<Body>, AuthError> {
    let required = req.uri().path().trim_start_matches('/');
    match req.extensions().get::<UserContext>() {
        Some(ctx) if required.is_empty() || ctx.has_scope(required) => {
            Ok(http::Response::new(Body::from(ctx.user_id.clone())))
        }
        Some(_) => Err(AuthError::forbidden(required.to_string())),
        None => Err(AuthError::AccessDenied),
    }
}

/// Runs a full begin/complete/exchange handshake against a fresh manager
/// mapping `granted_scope` to `mxcp_scope`, returning the manager (so the
/// caller can build an [`AuthLayer`] over the same session store) and the
/// minted access token.
async fn manager_with_access_token(
    granted_scope: &str,
    mxcp_scope: &str,
    subject: &str,
) -> (Arc<mxcp_auth_core::session_manager::SessionManager>, String) {
    let adapter = Arc::new(TestDoubleAdapter::new("test"));

    let mut scopes = HashMap::new();
    if !mxcp_scope.is_empty() {
        scopes.insert(granted_scope.to_string(), vec![mxcp_scope.to_string()]);
    }
    let mapping = ScopeMapping {
        scopes,
        groups: HashMap::new(),
        roles: HashMap::new(),
        claims: HashMap::new(),
    };
    let mut scope_mappings = HashMap::new();
    scope_mappings.insert("test".to_string(), mapping);

    let manager = build_manager_with_adapter(adapter.clone(), HashMap::new(), scope_mappings).await;

    let (verifier, challenge) = pkce_pair();
    let (_inputs, state) = manager
        .begin_authorization(
            "client-a",
            "https://client.example/cb",
            vec![],
            challenge,
            PkceMethod::S256,
            "test",
            "csrf",
        )
        .await
        .unwrap();
    adapter.register_code(
        "code-1",
        FixedGrant {
            subject: subject.to_string(),
            display_name: None,
            email: None,
            granted_scopes: if mxcp_scope.is_empty() {
                vec![]
            } else {
                vec![granted_scope.to_string()]
            },
            groups: vec![],
        },
    );
    let (_session, auth_code, _) = manager.complete_authorization(state.id, "code-1", "cb").await.unwrap();
    let grant = manager
        .exchange_auth_code(auth_code.id, "client-a", "https://client.example/cb", &verifier)
        .await
        .unwrap();

    (manager, grant.access_token)
}

#[tokio::test]
async fn request_with_no_bearer_token_is_rejected() {
    let adapter = Arc::new(TestDoubleAdapter::new("test"));
    let manager = build_manager_with_adapter(adapter, HashMap::new(), HashMap::new()).await;
    let service = AuthLayer::new(manager).layer(tower::service_fn(echo_scope_handler));

    let request = Request::builder().uri("/").body(Body::empty()).unwrap();
    let result = service.oneshot(request).await;
    assert!(matches!(result, Err(AuthError::AccessDenied)));
}

#[tokio::test]
async fn request_with_valid_token_and_required_scope_is_forwarded() {
    let (manager, access_token) = manager_with_access_token("tools_read", "tools.read", "carol").await;
    let service = AuthLayer::new(manager).layer(tower::service_fn(echo_scope_handler));

    let request = Request::builder()
        .uri("/tools.read")
        .header("authorization", format!("Bearer {access_token}"))
        .body(Body::empty())
        .unwrap();
    let response = service.oneshot(request).await.unwrap();
    assert_eq!(response.status(), http::StatusCode::OK);

    use http_body_util::BodyExt;
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"carol");
}

#[tokio::test]
async fn request_with_valid_token_but_missing_scope_is_forbidden() {
    let (manager, access_token) = manager_with_access_token("", "", "dave").await;
    let service = AuthLayer::new(manager).layer(tower::service_fn(echo_scope_handler));

    let request = Request::builder()
        .uri("/tools.admin")
        .header("authorization", format!("Bearer {access_token}"))
        .body(Body::empty())
        .unwrap();
    let result = service.oneshot(request).await;
    assert!(matches!(result, Err(AuthError::Forbidden { .. })));
}

#[tokio::test]
async fn bypass_paths_skip_authentication_entirely() {
    let adapter = Arc::new(TestDoubleAdapter::new("test"));
    let manager = build_manager_with_adapter(adapter, HashMap::new(), HashMap::new()).await;
    let service = AuthLayer::new(manager).layer(tower::service_fn(echo_scope_handler));

    // "/auth/authorize" is a default bypass path: no token is required and
    // none is resolved, so the handler runs with no UserContext at all.
    let request = Request::builder().uri("/auth/authorize").body(Body::empty()).unwrap();
    let result = service.oneshot(request).await;
    assert!(matches!(result, Err(AuthError::AccessDenied)));
}

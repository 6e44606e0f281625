//! Integration tests for refresh token rotation and session revocation.
//!
//! # Standards Tested
//! - RFC 6749 §6: Refreshing an Access Token
//! - Refresh token rotation with replay detection (OAuth 2.1 best practice)

mod common;

use common::{build_manager, pkce_pair};
use mxcp_auth_core::error::AuthError;
use mxcp_auth_core::model::PkceMethod;
use mxcp_auth_core::provider::test_double::FixedGrant;

async fn issue_session_grant(
    manager: &mxcp_auth_core::session_manager::SessionManager,
    adapter: &mxcp_auth_core::provider::TestDoubleAdapter,
) -> mxcp_auth_core::session_manager::AccessGrant {
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
            subject: "erin".to_string(),
            display_name: None,
            email: None,
            granted_scopes: vec![],
            groups: vec![],
        },
    );
    let (_session, auth_code, _) = manager.complete_authorization(state.id, "code-1", "cb").await.unwrap();
    manager
        .exchange_auth_code(auth_code.id, "client-a", "https://client.example/cb", &verifier)
        .await
        .unwrap()
}

#[tokio::test]
async fn refresh_rotates_the_token_and_keeps_the_session_resolvable() {
    let (manager, adapter) = build_manager().await;
    let grant = issue_session_grant(&manager, &adapter).await;
    let old_refresh_token = grant.refresh_token.clone().unwrap();

    let new_grant = manager.refresh(&old_refresh_token).await.unwrap();

    assert_ne!(new_grant.access_token, grant.access_token);
    assert_ne!(new_grant.refresh_token, grant.refresh_token);
    assert_eq!(new_grant.expires_in, 3600);

    let resolved = manager.resolve(&new_grant.access_token).await.unwrap();
    assert!(resolved.is_some());
}

#[tokio::test]
async fn reusing_a_rotated_refresh_token_is_rejected_as_replay() {
    let (manager, adapter) = build_manager().await;
    let grant = issue_session_grant(&manager, &adapter).await;
    let old_refresh_token = grant.refresh_token.unwrap();

    manager.refresh(&old_refresh_token).await.unwrap();

    // WHEN: the same (now-rotated-away) refresh token is presented again
    let replay = manager.refresh(&old_refresh_token).await;

    // THEN: it is rejected rather than silently accepted, as invalid_grant
    // per RFC 6749 (the token itself is no longer redeemable)
    assert!(matches!(replay, Err(AuthError::InvalidGrant)));
}

#[tokio::test]
async fn concurrent_refresh_with_the_same_token_lets_exactly_one_win() {
    let (manager, adapter) = build_manager().await;
    let grant = issue_session_grant(&manager, &adapter).await;
    let refresh_token = grant.refresh_token.unwrap();

    // WHEN: two callers race to refresh using the same (single) refresh
    // token, as a client retrying after a dropped response might
    let (first, second) = tokio::join!(
        manager.refresh(&refresh_token),
        manager.refresh(&refresh_token),
    );

    let outcomes = [first, second];
    let successes = outcomes.iter().filter(|r| r.is_ok()).count();
    let replay_rejections = outcomes
        .iter()
        .filter(|r| matches!(r, Err(AuthError::InvalidGrant)))
        .count();

    // THEN: exactly one request rotates the token; the loser sees replay,
    // never a crash or a silently duplicated grant
    assert_eq!(successes, 1);
    assert_eq!(replay_rejections, 1);
}

#[tokio::test]
async fn revoked_session_no_longer_resolves() {
    let (manager, adapter) = build_manager().await;
    let grant = issue_session_grant(&manager, &adapter).await;

    let session = manager.resolve(&grant.access_token).await.unwrap().unwrap();
    manager.revoke(session.id).await.unwrap();

    let resolved_after_revoke = manager.resolve(&grant.access_token).await.unwrap();
    assert!(resolved_after_revoke.is_none());
}

#[tokio::test]
async fn revoked_session_rejects_further_refresh() {
    let (manager, adapter) = build_manager().await;
    let grant = issue_session_grant(&manager, &adapter).await;
    let refresh_token = grant.refresh_token.unwrap();

    let session = manager.resolve(&grant.access_token).await.unwrap().unwrap();
    manager.revoke(session.id).await.unwrap();

    let result = manager.refresh(&refresh_token).await;
    assert!(result.is_err());
}

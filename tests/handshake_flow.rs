//! Integration tests for the OAuth 2.1 authorization code flow with PKCE.
//!
//! Covers:
//! - Authorization code exchange end to end, through the session manager's
//!   own state machine (no mocked-out internals).
//! - PKCE verifier mismatch at redemption failing closed as tamper.
//!
//! # Standards Tested
//! - RFC 6749: OAuth 2.0 Authorization Framework
//! - RFC 7636: Proof Key for Code Exchange (PKCE)
//! - OAuth 2.1: two-tier PKCE (MXCP's own upstream leg, the downstream
//!   client's leg verified at the token endpoint)

mod common;

use common::{build_manager, pkce_pair};
use mxcp_auth_core::error::AuthError;
use mxcp_auth_core::model::PkceMethod;
use mxcp_auth_core::provider::test_double::FixedGrant;

#[tokio::test]
async fn authorization_code_flow_issues_a_working_access_token() {
    // GIVEN: a client beginning the authorization code flow with PKCE
    let (manager, adapter) = build_manager().await;
    let (client_verifier, client_challenge) = pkce_pair();

    let (inputs, oauth_state) = manager
        .begin_authorization(
            "client-a",
            "https://client.example/callback",
            vec!["tools.read".to_string()],
            client_challenge,
            PkceMethod::S256,
            "test",
            "client-csrf-state",
        )
        .await
        .unwrap();
    assert_eq!(inputs.state_id, oauth_state.id);

    // WHEN: the provider redirects back with a code, after the user
    // approves on the real IdP (simulated here by registering the code the
    // test double will accept)
    adapter.register_code(
        "idp-code-123",
        FixedGrant {
            subject: "alice".to_string(),
            display_name: Some("Alice".to_string()),
            email: Some("alice@example.com".to_string()),
            granted_scopes: vec!["tools_read".to_string()],
            groups: vec![],
        },
    );

    let (session, auth_code, downstream_state) = manager
        .complete_authorization(oauth_state.id, "idp-code-123", "https://mxcp.example/auth/callback")
        .await
        .unwrap();
    assert_eq!(downstream_state, "client-csrf-state");
    assert_eq!(session.user_context.user_id, "alice");

    // THEN: redeeming the MXCP authorization code with the matching PKCE
    // verifier releases a working access token
    let grant = manager
        .exchange_auth_code(auth_code.id, "client-a", "https://client.example/callback", &client_verifier)
        .await
        .unwrap();
    assert_eq!(grant.token_type, "Bearer");
    assert!(grant.refresh_token.is_some());
    // expires_in reflects the access token's own (short) TTL, not the
    // 30-day refresh/session TTL `common::test_ttls` also configures.
    assert_eq!(grant.expires_in, 3600);

    let resolved = manager.resolve(&grant.access_token).await.unwrap();
    assert!(resolved.is_some());
    assert_eq!(resolved.unwrap().id, session.id);
}

#[tokio::test]
async fn authorization_code_is_single_use() {
    let (manager, adapter) = build_manager().await;
    let (client_verifier, client_challenge) = pkce_pair();

    let (_inputs, oauth_state) = manager
        .begin_authorization(
            "client-a",
            "https://client.example/callback",
            vec![],
            client_challenge,
            PkceMethod::S256,
            "test",
            "state-1",
        )
        .await
        .unwrap();

    adapter.register_code(
        "idp-code-once",
        FixedGrant {
            subject: "bob".to_string(),
            display_name: None,
            email: None,
            granted_scopes: vec![],
            groups: vec![],
        },
    );
    let (_session, auth_code, _) = manager
        .complete_authorization(oauth_state.id, "idp-code-once", "cb")
        .await
        .unwrap();

    manager
        .exchange_auth_code(auth_code.id, "client-a", "https://client.example/callback", &client_verifier)
        .await
        .unwrap();

    // WHEN: the same code is redeemed a second time
    let second = manager
        .exchange_auth_code(auth_code.id, "client-a", "https://client.example/callback", &client_verifier)
        .await;

    // THEN: it is rejected, since the store already consumed it
    assert!(matches!(second, Err(AuthError::InvalidGrant)));
}

#[tokio::test]
async fn mismatched_pkce_verifier_fails_closed_as_tamper() {
    // GIVEN: a completed handshake bound to one client-generated challenge
    let (manager, adapter) = build_manager().await;
    let (_correct_verifier, client_challenge) = pkce_pair();

    let (_inputs, oauth_state) = manager
        .begin_authorization(
            "client-a",
            "https://client.example/callback",
            vec![],
            client_challenge,
            PkceMethod::S256,
            "test",
            "state-1",
        )
        .await
        .unwrap();

    adapter.register_code(
        "idp-code-tamper",
        FixedGrant {
            subject: "mallory".to_string(),
            display_name: None,
            email: None,
            granted_scopes: vec![],
            groups: vec![],
        },
    );
    let (_session, auth_code, _) = manager
        .complete_authorization(oauth_state.id, "idp-code-tamper", "cb")
        .await
        .unwrap();

    // WHEN: redemption is attempted with a verifier that doesn't hash to
    // the original challenge
    let result = manager
        .exchange_auth_code(
            auth_code.id,
            "client-a",
            "https://client.example/callback",
            "a-completely-different-verifier-string",
        )
        .await;

    // THEN: the mismatch is treated as tamper, not a soft invalid-grant
    assert!(matches!(result, Err(AuthError::Tamper)));
}

#[tokio::test]
async fn plain_pkce_challenges_are_rejected_at_begin_authorization() {
    let (manager, _adapter) = build_manager().await;
    let result = manager
        .begin_authorization(
            "client-a",
            "https://client.example/callback",
            vec![],
            "plain-challenge".to_string(),
            PkceMethod::Plain,
            "test",
            "state-1",
        )
        .await;
    assert!(matches!(result, Err(AuthError::InvalidRequest(_))));
}

use axum::http::{HeaderName, HeaderValue, StatusCode};
use serde_json::json;

use bazaar_auth::services::jwt::TokenService;

use crate::common::{
    test_password, token_pair, TestContext, TEST_ISSUER, TEST_JWT_SECRET,
};

// =============================================================================
// CURRENT USER
// =============================================================================

#[tokio::test]
async fn me_returns_the_authenticated_user() {
    let ctx = TestContext::new().await;
    let (email, body) = ctx.register_user().await;
    let (access, _) = token_pair(&body);

    let response = ctx.server.get("/auth/me").authorization_bearer(access).await;

    response.assert_status(StatusCode::OK);
    let me: serde_json::Value = response.json();
    assert_eq!(me["id"], body["user"]["id"]);
    assert_eq!(me["email"], email);
    assert_eq!(me["role"], "user");
    assert_eq!(me["email_verified"], false);
    assert_eq!(me["mfa_enabled"], false);
    // Never serialized, not even as null.
    assert!(me.get("password_hash").is_none());
}

#[tokio::test]
async fn me_without_token_is_unauthorized() {
    let ctx = TestContext::new().await;

    ctx.server
        .get("/auth/me")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn me_with_malformed_header_is_unauthorized() {
    let ctx = TestContext::new().await;

    let response = ctx
        .server
        .get("/auth/me")
        .add_header(
            HeaderName::from_static("authorization"),
            HeaderValue::from_static("Token abc123"),
        )
        .await;

    response.assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn me_rejects_token_signed_with_other_secret() {
    let ctx = TestContext::new().await;
    let (_, body) = ctx.register_user().await;
    let user_id = body["user"]["id"].as_str().unwrap();

    let forger = TokenService::new(
        "a-completely-different-secret".to_string(),
        TEST_ISSUER.to_string(),
        900,
        604_800,
    );
    let (forged, _) = forger
        .generate_access_token(user_id, "forged@example.com", 1, "session-id")
        .unwrap();

    ctx.server
        .get("/auth/me")
        .authorization_bearer(forged)
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn me_rejects_expired_token_without_leeway() {
    let ctx = TestContext::new().await;
    let (_, body) = ctx.register_user().await;
    let user_id = body["user"]["id"].as_str().unwrap();

    // Right key, right issuer, lifetime already over.
    let expired_issuer = TokenService::new(
        TEST_JWT_SECRET.to_string(),
        TEST_ISSUER.to_string(),
        -60,
        604_800,
    );
    let (expired, _) = expired_issuer
        .generate_access_token(user_id, "late@example.com", 1, "session-id")
        .unwrap();

    ctx.server
        .get("/auth/me")
        .authorization_bearer(expired)
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}

// =============================================================================
// SESSION LISTING
// =============================================================================

#[tokio::test]
async fn sessions_lists_every_active_session() {
    let ctx = TestContext::new().await;
    let (email, _) = ctx.register_user().await;

    let second: serde_json::Value = ctx.login(&email, test_password()).await.json();
    let (access_b, _) = token_pair(&second);

    let response = ctx
        .server
        .get("/auth/sessions")
        .authorization_bearer(&access_b)
        .await;
    response.assert_status(StatusCode::OK);

    let body: serde_json::Value = response.json();
    let sessions = body["sessions"].as_array().unwrap();
    assert_eq!(sessions.len(), 2);

    // Exactly one entry is the session behind the presented token.
    let current: Vec<_> = sessions
        .iter()
        .filter(|s| s["current"] == true)
        .collect();
    assert_eq!(current.len(), 1);

    let claims = ctx.tokens.validate_access_token(&access_b).unwrap();
    assert_eq!(current[0]["id"], claims.sid);
    assert_eq!(current[0]["aal"], 1);
}

#[tokio::test]
async fn sessions_never_expose_token_material() {
    let ctx = TestContext::new().await;
    let (_, body) = ctx.register_user().await;
    let (access, _) = token_pair(&body);

    let body: serde_json::Value = ctx
        .server
        .get("/auth/sessions")
        .authorization_bearer(access)
        .await
        .json();

    let session = &body["sessions"].as_array().unwrap()[0];
    assert!(session.get("refresh_token").is_none());
    assert!(session.get("access_token_hash").is_none());
}

#[tokio::test]
async fn sessions_capture_device_metadata() {
    let ctx = TestContext::new().await;
    let (email, _) = ctx.register_user().await;

    let login: serde_json::Value = ctx
        .server
        .post("/auth/login")
        .add_header(
            HeaderName::from_static("x-device-name"),
            HeaderValue::from_static("Pixel 9"),
        )
        .add_header(
            HeaderName::from_static("x-forwarded-for"),
            HeaderValue::from_static("203.0.113.9, 10.0.0.1"),
        )
        .add_header(
            HeaderName::from_static("user-agent"),
            HeaderValue::from_static("BazaarApp/3.1 (Android 16)"),
        )
        .json(&json!({ "email": &email, "password": test_password() }))
        .await
        .json();
    let (access, _) = token_pair(&login);

    let body: serde_json::Value = ctx
        .server
        .get("/auth/sessions")
        .authorization_bearer(access)
        .await
        .json();

    let sessions = body["sessions"].as_array().unwrap();
    let current = sessions.iter().find(|s| s["current"] == true).unwrap();
    assert_eq!(current["device"], "Pixel 9");
    assert_eq!(current["ip_address"], "203.0.113.9");
    assert_eq!(current["user_agent"], "BazaarApp/3.1 (Android 16)");
}

#[tokio::test]
async fn revoked_sessions_drop_out_of_the_list() {
    let ctx = TestContext::new().await;
    let (email, body) = ctx.register_user().await;
    let (access_a, _) = token_pair(&body);

    let second: serde_json::Value = ctx.login(&email, test_password()).await.json();
    let (access_b, _) = token_pair(&second);

    ctx.server
        .post("/auth/logout")
        .authorization_bearer(&access_b)
        .await
        .assert_status(StatusCode::OK);

    let body: serde_json::Value = ctx
        .server
        .get("/auth/sessions")
        .authorization_bearer(&access_a)
        .await
        .json();
    let sessions = body["sessions"].as_array().unwrap();
    assert_eq!(sessions.len(), 1);

    let claims = ctx.tokens.validate_access_token(&access_a).unwrap();
    assert_eq!(sessions[0]["id"], claims.sid);
}

#[tokio::test]
async fn sessions_require_authentication() {
    let ctx = TestContext::new().await;

    ctx.server
        .get("/auth/sessions")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}

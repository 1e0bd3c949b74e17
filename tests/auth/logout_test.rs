use axum::http::StatusCode;
use serde_json::json;

use crate::common::{test_password, token_pair, TestContext};

#[tokio::test]
async fn logout_invalidates_the_access_token() {
    let ctx = TestContext::new().await;
    let (_, body) = ctx.register_user().await;
    let (access, _) = token_pair(&body);

    ctx.server
        .get("/auth/me")
        .authorization_bearer(&access)
        .await
        .assert_status(StatusCode::OK);

    let response = ctx
        .server
        .post("/auth/logout")
        .authorization_bearer(&access)
        .await;
    response.assert_status(StatusCode::OK);

    // The token is on the denylist until it would have expired anyway.
    ctx.server
        .get("/auth/me")
        .authorization_bearer(&access)
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn logout_revokes_the_session() {
    let ctx = TestContext::new().await;
    let (_, body) = ctx.register_user().await;
    let (access, refresh) = token_pair(&body);

    ctx.server
        .post("/auth/logout")
        .authorization_bearer(&access)
        .await
        .assert_status(StatusCode::OK);

    let response = ctx
        .server
        .post("/auth/refresh")
        .json(&json!({ "refresh_token": refresh }))
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "Session revoked");
}

#[tokio::test]
async fn logout_without_token_is_unauthorized() {
    let ctx = TestContext::new().await;

    let response = ctx.server.post("/auth/logout").await;

    response.assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn logout_with_garbage_token_is_unauthorized() {
    let ctx = TestContext::new().await;

    let response = ctx
        .server
        .post("/auth/logout")
        .authorization_bearer("not.a.jwt")
        .await;

    response.assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn logout_all_revokes_every_session() {
    let ctx = TestContext::new().await;
    let (email, body) = ctx.register_user().await;
    let (access_a, refresh_a) = token_pair(&body);

    let second: serde_json::Value = ctx.login(&email, test_password()).await.json();
    let (_, refresh_b) = token_pair(&second);

    let response = ctx
        .server
        .post("/auth/logout-all")
        .authorization_bearer(&access_a)
        .await;
    response.assert_status(StatusCode::OK);
    let body: serde_json::Value = response.json();
    assert_eq!(body["revoked_sessions"], 2);

    // Neither refresh token survives.
    for refresh in [refresh_a, refresh_b] {
        ctx.server
            .post("/auth/refresh")
            .json(&json!({ "refresh_token": refresh }))
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
    }

    // The token that issued the call is dead too.
    ctx.server
        .get("/auth/me")
        .authorization_bearer(&access_a)
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn repeated_logout_with_same_token_is_unauthorized() {
    let ctx = TestContext::new().await;
    let (_, body) = ctx.register_user().await;
    let (access, _) = token_pair(&body);

    ctx.server
        .post("/auth/logout")
        .authorization_bearer(&access)
        .await
        .assert_status(StatusCode::OK);

    // The blacklist catches the second call at the door.
    ctx.server
        .post("/auth/logout")
        .authorization_bearer(&access)
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}

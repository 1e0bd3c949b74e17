use axum::http::StatusCode;
use serde_json::json;

use crate::common::{email_token, token_pair, TestContext};

async fn verify(ctx: &TestContext, token: &str) -> axum_test::TestResponse {
    ctx.server
        .post("/auth/verify-email")
        .json(&json!({ "token": token }))
        .await
}

#[tokio::test]
async fn emailed_token_verifies_the_address() {
    let ctx = TestContext::new().await;
    let (email, body) = ctx.register_user().await;
    let (access, _) = token_pair(&body);

    let token = email_token(&ctx.wait_for_email("verification", &email).await);

    verify(&ctx, &token).await.assert_status(StatusCode::OK);

    let me: serde_json::Value = ctx
        .server
        .get("/auth/me")
        .authorization_bearer(access)
        .await
        .json();
    assert_eq!(me["email_verified"], true);

    // Verification is what triggers the welcome mail.
    ctx.wait_for_email("welcome", &email).await;
}

#[tokio::test]
async fn verification_token_is_single_use() {
    let ctx = TestContext::new().await;
    let (email, _) = ctx.register_user().await;
    let token = email_token(&ctx.wait_for_email("verification", &email).await);

    verify(&ctx, &token).await.assert_status(StatusCode::OK);

    let response = verify(&ctx, &token).await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "Invalid or expired token");
}

#[tokio::test]
async fn bogus_verification_token_is_rejected() {
    let ctx = TestContext::new().await;

    verify(&ctx, "not-a-real-token")
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn request_verification_reissues_a_working_token() {
    let ctx = TestContext::new().await;
    let (email, body) = ctx.register_user().await;
    let (access, _) = token_pair(&body);

    let first = email_token(&ctx.wait_for_email("verification", &email).await);

    ctx.server
        .post("/auth/request-verification")
        .authorization_bearer(&access)
        .await
        .assert_status(StatusCode::OK);

    // Poll until a token different from the registration one shows up.
    let mut second = None;
    for _ in 0..50 {
        {
            let sent = ctx.mailer.sent.lock().await;
            if let Some(token) = sent
                .iter()
                .filter(|j| j.kind() == "verification" && j.recipient() == email)
                .map(email_token)
                .find(|t| *t != first)
            {
                second = Some(token);
            }
        }
        if second.is_some() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    let second = second.expect("no fresh verification email arrived");

    verify(&ctx, &second).await.assert_status(StatusCode::OK);
}

#[tokio::test]
async fn request_verification_after_verified_sends_nothing() {
    let ctx = TestContext::new().await;
    let (email, body) = ctx.register_user().await;
    let (access, _) = token_pair(&body);

    let token = email_token(&ctx.wait_for_email("verification", &email).await);
    verify(&ctx, &token).await.assert_status(StatusCode::OK);

    ctx.server
        .post("/auth/request-verification")
        .authorization_bearer(&access)
        .await
        .assert_status(StatusCode::OK);

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    let sent = ctx.mailer.sent.lock().await;
    let verification_mails = sent
        .iter()
        .filter(|j| j.kind() == "verification" && j.recipient() == email)
        .count();
    assert_eq!(verification_mails, 1);
}

#[tokio::test]
async fn request_verification_requires_authentication() {
    let ctx = TestContext::new().await;

    ctx.server
        .post("/auth/request-verification")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}

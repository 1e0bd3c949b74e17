use axum::http::StatusCode;

use crate::common::{test_password, TestContext};

#[tokio::test]
async fn health_endpoint_reports_ok() {
    let ctx = TestContext::new().await;

    let response = ctx.server.get("/health").await;

    response.assert_status(StatusCode::OK);
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "ok");
    assert!(!body["version"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn metrics_endpoint_exports_request_counters() {
    let ctx = TestContext::new().await;
    ctx.register_user().await;

    let response = ctx.server.get("/metrics").await;

    response.assert_status(StatusCode::OK);
    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.starts_with("text/plain"));

    let body = response.text();
    assert!(body.contains("auth_http_requests_total"));
    assert!(body.contains("endpoint=\"/auth/register\""));
    assert!(body.contains("auth_http_request_duration_seconds_bucket"));
    assert!(body.contains("auth_tokens_issued_total{aal=\"1\"} 1"));
}

#[tokio::test]
async fn scrapes_do_not_count_themselves() {
    let ctx = TestContext::new().await;

    ctx.server.get("/metrics").await.assert_status(StatusCode::OK);
    let body = ctx.server.get("/metrics").await.text();

    // The exporter sits outside the middleware stack.
    assert!(!body.contains("endpoint=\"/metrics\""));
    assert!(!body.contains("endpoint=\"/health\""));
}

#[tokio::test]
async fn login_outcomes_show_up_in_the_scrape() {
    let ctx = TestContext::new().await;
    let (email, _) = ctx.register_user().await;

    ctx.login(&email, "WrongPassword999!")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
    ctx.login(&email, test_password())
        .await
        .assert_status(StatusCode::OK);

    let body = ctx.server.get("/metrics").await.text();
    assert!(body.contains("auth_login_attempts_total{outcome=\"invalid_credentials\"} 1"));
    assert!(body.contains("auth_login_attempts_total{outcome=\"success\"} 1"));
}

#[tokio::test]
async fn revocations_are_attributed_to_their_trigger() {
    let ctx = TestContext::new().await;
    let (_, body) = ctx.register_user().await;
    let access = body["tokens"]["access_token"].as_str().unwrap();

    ctx.server
        .post("/auth/logout")
        .authorization_bearer(access)
        .await
        .assert_status(StatusCode::OK);

    let scrape = ctx.server.get("/metrics").await.text();
    assert!(scrape.contains("auth_sessions_revoked_total{reason=\"logout\"} 1"));
}

use axum::http::StatusCode;
use serde_json::json;
use uuid::Uuid;

use crate::common::{test_password, token_pair, totp_code, TestContext};

const BACKUP_CODE_ALPHABET: &str = "ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Registers a user and walks the full enrollment, leaving MFA enabled.
async fn mfa_user(ctx: &TestContext) -> (String, String, Vec<String>) {
    let (email, body) = ctx.register_user().await;
    let (access, _) = token_pair(&body);
    let (secret, codes) = ctx.enroll_totp(&access).await;
    (email, secret, codes)
}

/// Logs in with the password and returns the challenge id the server hands
/// back instead of tokens.
async fn open_challenge(ctx: &TestContext, email: &str) -> String {
    let response = ctx.login(email, test_password()).await;
    response.assert_status(StatusCode::OK);
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "mfa_required");
    body["challenge_id"].as_str().unwrap().to_string()
}

async fn submit_totp(ctx: &TestContext, challenge_id: &str, code: &str) -> axum_test::TestResponse {
    ctx.server
        .post("/auth/verify-mfa")
        .json(&json!({ "challenge_id": challenge_id, "totp_code": code }))
        .await
}

async fn submit_backup(ctx: &TestContext, challenge_id: &str, code: &str) -> axum_test::TestResponse {
    ctx.server
        .post("/auth/verify-mfa")
        .json(&json!({ "challenge_id": challenge_id, "backup_code": code }))
        .await
}

// A code that is guaranteed not to be the current one.
fn wrong_code(secret: &str) -> String {
    if totp_code(secret) == "000000" {
        "111111".to_string()
    } else {
        "000000".to_string()
    }
}

// =============================================================================
// ENROLLMENT
// =============================================================================

#[tokio::test]
async fn enroll_returns_secret_qr_and_backup_codes() {
    let ctx = TestContext::new().await;
    let (_, body) = ctx.register_user().await;
    let (access, _) = token_pair(&body);

    let response = ctx
        .server
        .post("/auth/enroll-mfa")
        .authorization_bearer(access)
        .await;

    response.assert_status(StatusCode::OK);

    let body: serde_json::Value = response.json();
    assert!(body["factor_id"].as_str().is_some());
    assert!(!body["secret"].as_str().unwrap().is_empty());
    assert!(body["qr_code"]
        .as_str()
        .unwrap()
        .starts_with("data:image/png;base64,"));

    let codes = body["backup_codes"].as_array().unwrap();
    assert_eq!(codes.len(), 10);
    for code in codes {
        let code = code.as_str().unwrap();
        assert_eq!(code.len(), 9, "backup code {:?} has wrong length", code);
        assert_eq!(&code[4..5], "-");
        for c in code.chars().filter(|c| *c != '-') {
            assert!(
                BACKUP_CODE_ALPHABET.contains(c),
                "backup code {:?} contains ambiguous character {:?}",
                code,
                c
            );
        }
    }
}

#[tokio::test]
async fn enroll_requires_authentication() {
    let ctx = TestContext::new().await;

    let response = ctx.server.post("/auth/enroll-mfa").await;

    response.assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn confirm_with_wrong_code_does_not_enable_mfa() {
    let ctx = TestContext::new().await;
    let (_, body) = ctx.register_user().await;
    let (access, _) = token_pair(&body);

    let enroll: serde_json::Value = ctx
        .server
        .post("/auth/enroll-mfa")
        .authorization_bearer(&access)
        .await
        .json();
    let secret = enroll["secret"].as_str().unwrap();

    let response = ctx
        .server
        .post("/auth/confirm-mfa")
        .authorization_bearer(&access)
        .json(&json!({
            "factor_id": enroll["factor_id"],
            "code": wrong_code(secret)
        }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);

    let me: serde_json::Value = ctx
        .server
        .get("/auth/me")
        .authorization_bearer(&access)
        .await
        .json();
    assert_eq!(me["mfa_enabled"], false);
}

#[tokio::test]
async fn enroll_and_confirm_enables_mfa() {
    let ctx = TestContext::new().await;
    let (_, body) = ctx.register_user().await;
    let (access, _) = token_pair(&body);

    ctx.enroll_totp(&access).await;

    let me: serde_json::Value = ctx
        .server
        .get("/auth/me")
        .authorization_bearer(&access)
        .await
        .json();
    assert_eq!(me["mfa_enabled"], true);
}

#[tokio::test]
async fn enroll_again_after_enabled_conflicts() {
    let ctx = TestContext::new().await;
    let (_, body) = ctx.register_user().await;
    let (access, _) = token_pair(&body);
    ctx.enroll_totp(&access).await;

    let response = ctx
        .server
        .post("/auth/enroll-mfa")
        .authorization_bearer(access)
        .await;

    response.assert_status(StatusCode::CONFLICT);
}

// =============================================================================
// CHALLENGE LOGIN
// =============================================================================

#[tokio::test]
async fn login_with_mfa_returns_challenge_without_tokens() {
    let ctx = TestContext::new().await;
    let (email, _, _) = mfa_user(&ctx).await;

    let response = ctx.login(&email, test_password()).await;
    response.assert_status(StatusCode::OK);

    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "mfa_required");
    assert!(!body["challenge_id"].as_str().unwrap().is_empty());
    assert!(body.get("tokens").is_none());
    assert!(body.get("user").is_none());
}

#[tokio::test]
async fn correct_totp_completes_login_at_mfa_level() {
    let ctx = TestContext::new().await;
    let (email, secret, _) = mfa_user(&ctx).await;
    let challenge_id = open_challenge(&ctx, &email).await;

    let response = submit_totp(&ctx, &challenge_id, &totp_code(&secret)).await;
    response.assert_status(StatusCode::OK);

    let body: serde_json::Value = response.json();
    assert_eq!(body["user"]["email"], email);

    let (access, _) = token_pair(&body);
    let claims = ctx.tokens.validate_access_token(&access).unwrap();
    assert_eq!(claims.aal, 2);

    ctx.server
        .get("/auth/me")
        .authorization_bearer(access)
        .await
        .assert_status(StatusCode::OK);
}

#[tokio::test]
async fn wrong_totp_rejected_then_correct_succeeds() {
    let ctx = TestContext::new().await;
    let (email, secret, _) = mfa_user(&ctx).await;
    let challenge_id = open_challenge(&ctx, &email).await;

    let response = submit_totp(&ctx, &challenge_id, &wrong_code(&secret)).await;
    response.assert_status(StatusCode::UNAUTHORIZED);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "Invalid verification code");

    // The challenge survives a failed attempt.
    let response = submit_totp(&ctx, &challenge_id, &totp_code(&secret)).await;
    response.assert_status(StatusCode::OK);
}

#[tokio::test]
async fn challenge_cannot_be_reused_after_success() {
    let ctx = TestContext::new().await;
    let (email, secret, _) = mfa_user(&ctx).await;
    let challenge_id = open_challenge(&ctx, &email).await;

    submit_totp(&ctx, &challenge_id, &totp_code(&secret))
        .await
        .assert_status(StatusCode::OK);

    let response = submit_totp(&ctx, &challenge_id, &totp_code(&secret)).await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "Invalid or expired challenge");
}

#[tokio::test]
async fn five_wrong_codes_invalidate_the_challenge() {
    let ctx = TestContext::new().await;
    let (email, secret, _) = mfa_user(&ctx).await;
    let challenge_id = open_challenge(&ctx, &email).await;

    for _ in 0..5 {
        submit_totp(&ctx, &challenge_id, &wrong_code(&secret))
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
    }

    // Attempts are spent; even the right code is too late now.
    let response = submit_totp(&ctx, &challenge_id, &totp_code(&secret)).await;
    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_challenge_is_rejected() {
    let ctx = TestContext::new().await;

    let response = submit_totp(&ctx, &Uuid::new_v4().to_string(), "123456").await;

    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn verify_requires_exactly_one_proof() {
    let ctx = TestContext::new().await;
    let (email, secret, codes) = mfa_user(&ctx).await;
    let challenge_id = open_challenge(&ctx, &email).await;

    let response = ctx
        .server
        .post("/auth/verify-mfa")
        .json(&json!({
            "challenge_id": &challenge_id,
            "totp_code": totp_code(&secret),
            "backup_code": codes[0]
        }))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);

    let response = ctx
        .server
        .post("/auth/verify-mfa")
        .json(&json!({ "challenge_id": &challenge_id }))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
}

// =============================================================================
// BACKUP CODES
// =============================================================================

#[tokio::test]
async fn backup_code_completes_login() {
    let ctx = TestContext::new().await;
    let (email, _, codes) = mfa_user(&ctx).await;
    let challenge_id = open_challenge(&ctx, &email).await;

    let response = submit_backup(&ctx, &challenge_id, &codes[0]).await;
    response.assert_status(StatusCode::OK);

    let body: serde_json::Value = response.json();
    let (access, _) = token_pair(&body);
    assert_eq!(ctx.tokens.validate_access_token(&access).unwrap().aal, 2);
}

#[tokio::test]
async fn backup_code_is_single_use() {
    let ctx = TestContext::new().await;
    let (email, _, codes) = mfa_user(&ctx).await;

    let challenge_id = open_challenge(&ctx, &email).await;
    submit_backup(&ctx, &challenge_id, &codes[0])
        .await
        .assert_status(StatusCode::OK);

    let challenge_id = open_challenge(&ctx, &email).await;
    let response = submit_backup(&ctx, &challenge_id, &codes[0]).await;
    response.assert_status(StatusCode::UNAUTHORIZED);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "Backup code already used");

    // The rest of the sheet is still good.
    let response = submit_backup(&ctx, &challenge_id, &codes[1]).await;
    response.assert_status(StatusCode::OK);
}

#[tokio::test]
async fn wrong_backup_code_is_rejected() {
    let ctx = TestContext::new().await;
    let (email, _, _) = mfa_user(&ctx).await;
    let challenge_id = open_challenge(&ctx, &email).await;

    let response = submit_backup(&ctx, &challenge_id, "ZZZZ-ZZZZ").await;

    response.assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn regenerating_backup_codes_invalidates_the_old_sheet() {
    let ctx = TestContext::new().await;
    let (email, _, old_codes) = mfa_user(&ctx).await;
    let challenge_id = open_challenge(&ctx, &email).await;
    let verified: serde_json::Value = submit_backup(&ctx, &challenge_id, &old_codes[0])
        .await
        .json();
    let (access, _) = token_pair(&verified);

    let response = ctx
        .server
        .post("/auth/backup-codes")
        .authorization_bearer(&access)
        .await;
    response.assert_status(StatusCode::OK);
    let body: serde_json::Value = response.json();
    let new_codes: Vec<String> = body["codes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c.as_str().unwrap().to_string())
        .collect();
    assert_eq!(new_codes.len(), 10);

    // An unused code from the old sheet no longer works.
    let challenge_id = open_challenge(&ctx, &email).await;
    submit_backup(&ctx, &challenge_id, &old_codes[1])
        .await
        .assert_status(StatusCode::UNAUTHORIZED);

    // The replacement sheet does.
    submit_backup(&ctx, &challenge_id, &new_codes[0])
        .await
        .assert_status(StatusCode::OK);
}

// =============================================================================
// DISABLE
// =============================================================================

#[tokio::test]
async fn disable_mfa_restores_plain_password_login() {
    let ctx = TestContext::new().await;
    let (email, secret, _) = mfa_user(&ctx).await;
    let challenge_id = open_challenge(&ctx, &email).await;
    let verified: serde_json::Value = submit_totp(&ctx, &challenge_id, &totp_code(&secret))
        .await
        .json();
    let (access, _) = token_pair(&verified);

    let response = ctx
        .server
        .post("/auth/disable-mfa")
        .authorization_bearer(&access)
        .json(&json!({ "current_password": test_password() }))
        .await;
    response.assert_status(StatusCode::OK);

    let me: serde_json::Value = ctx
        .server
        .get("/auth/me")
        .authorization_bearer(&access)
        .await
        .json();
    assert_eq!(me["mfa_enabled"], false);

    let response = ctx.login(&email, test_password()).await;
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "authenticated");
}

#[tokio::test]
async fn disable_mfa_with_wrong_password_is_rejected() {
    let ctx = TestContext::new().await;
    let (email, secret, _) = mfa_user(&ctx).await;
    let challenge_id = open_challenge(&ctx, &email).await;
    let verified: serde_json::Value = submit_totp(&ctx, &challenge_id, &totp_code(&secret))
        .await
        .json();
    let (access, _) = token_pair(&verified);

    let response = ctx
        .server
        .post("/auth/disable-mfa")
        .authorization_bearer(&access)
        .json(&json!({ "current_password": "NotThePassword1!" }))
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);

    let body: serde_json::Value = ctx.login(&email, test_password()).await.json();
    assert_eq!(body["status"], "mfa_required");
}

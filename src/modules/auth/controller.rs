use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::Json;
use std::sync::Arc;
use validator::Validate;

use crate::AppState;

use super::extractor::AuthClaims;
use super::interface::{AuthError, AuthKind, LoginOutcome};
use super::schema::{
    BackupCodesResponse, ChangePasswordRequest, ChangePasswordResponse, ConfirmMfaRequest,
    ConfirmMfaResponse, DisableMfaRequest, DisableMfaResponse, EnrollMfaResponse, ErrorResponse,
    ForgotPasswordRequest, ForgotPasswordResponse, LoginRequest, LoginResponse, LogoutAllResponse,
    LogoutResponse, OAuthLoginRequest, OAuthLoginResponse, RefreshTokenRequest, RegisterRequest,
    RegisterResponse, RequestVerificationResponse, ResetPasswordRequest, ResetPasswordResponse,
    SessionResponse, SessionsResponse, TokenResponse, UserResponse, VerifyEmailRequest,
    VerifyEmailResponse, VerifyMfaRequest, VerifyMfaResponse,
};
use super::service::{DeviceInfo, MfaProof};

type ApiError = (StatusCode, Json<ErrorResponse>);

fn error_response(err: AuthError) -> ApiError {
    let status = err.status_code();
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!(error = %err, "auth request failed");
    }
    (status, Json(ErrorResponse::new(err.public_message())))
}

fn bad_request(message: &str) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(message)))
}

/// Session metadata scraped off the request. Everything is optional; a bare
/// request just records less.
fn device_info(headers: &HeaderMap) -> DeviceInfo {
    DeviceInfo {
        device: headers
            .get("x-device-name")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        // First hop of X-Forwarded-For; the rest is proxy chain.
        ip_address: headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(|v| v.trim().to_string()),
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    }
}

// =============================================================================
// REGISTRATION AND LOGIN
// =============================================================================

pub async fn register(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiError> {
    if let Err(e) = req.validate() {
        return Err(bad_request(&e.to_string()));
    }
    if req.password != req.password_confirm {
        return Err(bad_request("Passwords do not match"));
    }

    let device = device_info(&headers);
    let (user, tokens) = state
        .auth
        .register(&req.email, &req.password, &device)
        .await
        .map_err(error_response)?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            user: UserResponse::from(&user),
            tokens: TokenResponse::from(tokens),
        }),
    ))
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<LoginRequest>,
) -> Result<(StatusCode, Json<LoginResponse>), ApiError> {
    let device = device_info(&headers);
    let outcome = state
        .auth
        .login(&req.email, &req.password, &device)
        .await
        .map_err(error_response)?;

    let body = match outcome {
        LoginOutcome::Authenticated { kind, user, tokens } => LoginResponse::Authenticated {
            new_user: kind == AuthKind::NewUserProvisioned,
            user: UserResponse::from(&user),
            tokens: TokenResponse::from(tokens),
        },
        LoginOutcome::MfaRequired { challenge_id } => LoginResponse::MfaRequired { challenge_id },
    };
    Ok((StatusCode::OK, Json(body)))
}

pub async fn verify_mfa(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<VerifyMfaRequest>,
) -> Result<(StatusCode, Json<VerifyMfaResponse>), ApiError> {
    let proof = match (req.totp_code, req.backup_code) {
        (Some(code), None) => MfaProof::Totp(code),
        (None, Some(code)) => MfaProof::BackupCode(code),
        _ => return Err(bad_request("Provide exactly one of totp_code or backup_code")),
    };

    let device = device_info(&headers);
    let (user, tokens) = state
        .auth
        .verify_mfa(&req.challenge_id, proof, &device)
        .await
        .map_err(error_response)?;

    Ok((
        StatusCode::OK,
        Json(VerifyMfaResponse {
            user: UserResponse::from(&user),
            tokens: TokenResponse::from(tokens),
        }),
    ))
}

pub async fn oauth_login(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    Json(req): Json<OAuthLoginRequest>,
) -> Result<(StatusCode, Json<OAuthLoginResponse>), ApiError> {
    let device = device_info(&headers);
    let (kind, user, tokens) = state
        .auth
        .oauth_login(&provider, &req.assertion, &device)
        .await
        .map_err(error_response)?;

    Ok((
        StatusCode::OK,
        Json(OAuthLoginResponse {
            new_user: kind == AuthKind::NewUserProvisioned,
            user: UserResponse::from(&user),
            tokens: TokenResponse::from(tokens),
        }),
    ))
}

// =============================================================================
// TOKENS AND SESSIONS
// =============================================================================

pub async fn refresh(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RefreshTokenRequest>,
) -> Result<(StatusCode, Json<TokenResponse>), ApiError> {
    let tokens = state
        .auth
        .refresh(&req.refresh_token)
        .await
        .map_err(error_response)?;
    Ok((StatusCode::OK, Json(TokenResponse::from(tokens))))
}

pub async fn logout(
    State(state): State<Arc<AppState>>,
    AuthClaims(claims): AuthClaims,
) -> Result<(StatusCode, Json<LogoutResponse>), ApiError> {
    state.auth.logout(&claims).await.map_err(error_response)?;
    Ok((
        StatusCode::OK,
        Json(LogoutResponse {
            message: "Logged out",
        }),
    ))
}

pub async fn logout_all(
    State(state): State<Arc<AppState>>,
    AuthClaims(claims): AuthClaims,
) -> Result<(StatusCode, Json<LogoutAllResponse>), ApiError> {
    let revoked = state
        .auth
        .logout_all(&claims)
        .await
        .map_err(error_response)?;
    Ok((
        StatusCode::OK,
        Json(LogoutAllResponse {
            message: "All sessions revoked",
            revoked_sessions: revoked,
        }),
    ))
}

pub async fn me(
    State(state): State<Arc<AppState>>,
    AuthClaims(claims): AuthClaims,
) -> Result<(StatusCode, Json<UserResponse>), ApiError> {
    let user = state
        .auth
        .current_user(&claims.sub)
        .await
        .map_err(error_response)?;
    Ok((StatusCode::OK, Json(UserResponse::from(&user))))
}

pub async fn sessions(
    State(state): State<Arc<AppState>>,
    AuthClaims(claims): AuthClaims,
) -> Result<(StatusCode, Json<SessionsResponse>), ApiError> {
    let sessions = state
        .auth
        .active_sessions(&claims.sub)
        .await
        .map_err(error_response)?;
    Ok((
        StatusCode::OK,
        Json(SessionsResponse {
            sessions: sessions
                .iter()
                .map(|s| SessionResponse::from_session(s, &claims.sid))
                .collect(),
        }),
    ))
}

// =============================================================================
// PASSWORD LIFECYCLE
// =============================================================================

pub async fn forgot_password(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ForgotPasswordRequest>,
) -> Result<(StatusCode, Json<ForgotPasswordResponse>), ApiError> {
    state
        .auth
        .forgot_password(&req.email)
        .await
        .map_err(error_response)?;
    Ok((
        StatusCode::OK,
        Json(ForgotPasswordResponse {
            message: "If that email is registered, a reset link is on its way",
        }),
    ))
}

pub async fn reset_password(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ResetPasswordRequest>,
) -> Result<(StatusCode, Json<ResetPasswordResponse>), ApiError> {
    if req.password != req.password_confirm {
        return Err(bad_request("Passwords do not match"));
    }
    state
        .auth
        .reset_password(&req.token, &req.password)
        .await
        .map_err(error_response)?;
    Ok((
        StatusCode::OK,
        Json(ResetPasswordResponse {
            message: "Password has been reset",
        }),
    ))
}

pub async fn change_password(
    State(state): State<Arc<AppState>>,
    AuthClaims(claims): AuthClaims,
    Json(req): Json<ChangePasswordRequest>,
) -> Result<(StatusCode, Json<ChangePasswordResponse>), ApiError> {
    if req.new_password != req.new_password_confirm {
        return Err(bad_request("Passwords do not match"));
    }
    let user = state
        .auth
        .current_user(&claims.sub)
        .await
        .map_err(error_response)?;
    state
        .auth
        .change_password(&user, &req.current_password, &req.new_password)
        .await
        .map_err(error_response)?;
    Ok((
        StatusCode::OK,
        Json(ChangePasswordResponse {
            message: "Password changed",
        }),
    ))
}

// =============================================================================
// EMAIL VERIFICATION
// =============================================================================

pub async fn request_verification(
    State(state): State<Arc<AppState>>,
    AuthClaims(claims): AuthClaims,
) -> Result<(StatusCode, Json<RequestVerificationResponse>), ApiError> {
    let user = state
        .auth
        .current_user(&claims.sub)
        .await
        .map_err(error_response)?;
    state
        .auth
        .request_email_verification(&user)
        .await
        .map_err(error_response)?;
    Ok((
        StatusCode::OK,
        Json(RequestVerificationResponse {
            message: "Verification email sent",
        }),
    ))
}

pub async fn verify_email(
    State(state): State<Arc<AppState>>,
    Json(req): Json<VerifyEmailRequest>,
) -> Result<(StatusCode, Json<VerifyEmailResponse>), ApiError> {
    state
        .auth
        .verify_email(&req.token)
        .await
        .map_err(error_response)?;
    Ok((
        StatusCode::OK,
        Json(VerifyEmailResponse {
            message: "Email verified",
        }),
    ))
}

// =============================================================================
// MFA LIFECYCLE
// =============================================================================

pub async fn enroll_mfa(
    State(state): State<Arc<AppState>>,
    AuthClaims(claims): AuthClaims,
) -> Result<(StatusCode, Json<EnrollMfaResponse>), ApiError> {
    let user = state
        .auth
        .current_user(&claims.sub)
        .await
        .map_err(error_response)?;
    let enrollment = state.auth.enroll_mfa(&user).await.map_err(error_response)?;
    Ok((
        StatusCode::OK,
        Json(EnrollMfaResponse {
            factor_id: enrollment.factor_id,
            secret: enrollment.secret,
            qr_code: enrollment.qr_code,
            backup_codes: enrollment.backup_codes,
        }),
    ))
}

pub async fn confirm_mfa(
    State(state): State<Arc<AppState>>,
    AuthClaims(claims): AuthClaims,
    Json(req): Json<ConfirmMfaRequest>,
) -> Result<(StatusCode, Json<ConfirmMfaResponse>), ApiError> {
    let user = state
        .auth
        .current_user(&claims.sub)
        .await
        .map_err(error_response)?;
    state
        .auth
        .confirm_mfa_enrollment(&user, &req.factor_id, &req.code)
        .await
        .map_err(error_response)?;
    Ok((
        StatusCode::OK,
        Json(ConfirmMfaResponse {
            message: "MFA enabled",
        }),
    ))
}

pub async fn disable_mfa(
    State(state): State<Arc<AppState>>,
    AuthClaims(claims): AuthClaims,
    Json(req): Json<DisableMfaRequest>,
) -> Result<(StatusCode, Json<DisableMfaResponse>), ApiError> {
    let user = state
        .auth
        .current_user(&claims.sub)
        .await
        .map_err(error_response)?;
    state
        .auth
        .disable_mfa(&user, &req.current_password)
        .await
        .map_err(error_response)?;
    Ok((
        StatusCode::OK,
        Json(DisableMfaResponse {
            message: "MFA disabled",
        }),
    ))
}

pub async fn backup_codes(
    State(state): State<Arc<AppState>>,
    AuthClaims(claims): AuthClaims,
) -> Result<(StatusCode, Json<BackupCodesResponse>), ApiError> {
    let user = state
        .auth
        .current_user(&claims.sub)
        .await
        .map_err(error_response)?;
    let codes = state
        .auth
        .regenerate_backup_codes(&user)
        .await
        .map_err(error_response)?;
    Ok((StatusCode::OK, Json(BackupCodesResponse { codes })))
}

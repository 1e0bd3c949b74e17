use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::services::jwt::TokenPair;

use super::model::{Session, User};

// =============================================================================
// REGISTER
// =============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
    pub password: String,
    pub password_confirm: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user: UserResponse,
    pub tokens: TokenResponse,
}

// =============================================================================
// LOGIN
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Tagged so clients must look at `status` before reaching for tokens.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LoginResponse {
    Authenticated {
        new_user: bool,
        user: UserResponse,
        tokens: TokenResponse,
    },
    MfaRequired {
        challenge_id: String,
    },
}

// =============================================================================
// MFA CHALLENGE
// =============================================================================

/// Exactly one of `totp_code` / `backup_code` must be present.
#[derive(Debug, Deserialize)]
pub struct VerifyMfaRequest {
    pub challenge_id: String,
    #[serde(default)]
    pub totp_code: Option<String>,
    #[serde(default)]
    pub backup_code: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct VerifyMfaResponse {
    pub user: UserResponse,
    pub tokens: TokenResponse,
}

// =============================================================================
// TOKENS
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
}

impl From<TokenPair> for TokenResponse {
    fn from(pair: TokenPair) -> Self {
        Self {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            token_type: pair.token_type,
            expires_in: pair.expires_in,
        }
    }
}

// =============================================================================
// LOGOUT
// =============================================================================

#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub message: &'static str,
}

#[derive(Debug, Serialize)]
pub struct LogoutAllResponse {
    pub message: &'static str,
    pub revoked_sessions: u64,
}

// =============================================================================
// ME + SESSIONS
// =============================================================================

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: String,
    pub email: String,
    pub email_verified: bool,
    pub mfa_enabled: bool,
    pub role: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&User> for UserResponse {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            email: user.email.clone(),
            email_verified: user.email_verified,
            mfa_enabled: user.mfa_enabled,
            role: user.role.clone(),
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

/// Never exposes the refresh token or the access-token fingerprint.
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub id: String,
    pub aal: u8,
    pub device: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub current: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SessionResponse {
    pub fn from_session(session: &Session, current_session_id: &str) -> Self {
        Self {
            id: session.id.clone(),
            aal: session.aal,
            device: session.device.clone(),
            ip_address: session.ip_address.clone(),
            user_agent: session.user_agent.clone(),
            current: session.id == current_session_id,
            created_at: session.created_at,
            expires_at: session.expires_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SessionsResponse {
    pub sessions: Vec<SessionResponse>,
}

// =============================================================================
// PASSWORD RESET
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct ForgotPasswordResponse {
    pub message: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub token: String,
    pub password: String,
    pub password_confirm: String,
}

#[derive(Debug, Serialize)]
pub struct ResetPasswordResponse {
    pub message: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
    pub new_password_confirm: String,
}

#[derive(Debug, Serialize)]
pub struct ChangePasswordResponse {
    pub message: &'static str,
}

// =============================================================================
// EMAIL VERIFICATION
// =============================================================================

#[derive(Debug, Serialize)]
pub struct RequestVerificationResponse {
    pub message: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct VerifyEmailRequest {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct VerifyEmailResponse {
    pub message: &'static str,
}

// =============================================================================
// MFA LIFECYCLE
// =============================================================================

/// Secret, QR and plaintext backup codes appear here and nowhere else.
#[derive(Debug, Serialize)]
pub struct EnrollMfaResponse {
    pub factor_id: String,
    pub secret: String,
    pub qr_code: String,
    pub backup_codes: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmMfaRequest {
    pub factor_id: String,
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct ConfirmMfaResponse {
    pub message: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct DisableMfaRequest {
    pub current_password: String,
}

#[derive(Debug, Serialize)]
pub struct DisableMfaResponse {
    pub message: &'static str,
}

#[derive(Debug, Serialize)]
pub struct BackupCodesResponse {
    pub codes: Vec<String>,
}

// =============================================================================
// OAUTH
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct OAuthLoginRequest {
    pub assertion: String,
}

#[derive(Debug, Serialize)]
pub struct OAuthLoginResponse {
    pub new_user: bool,
    pub user: UserResponse,
    pub tokens: TokenResponse,
}

// =============================================================================
// ERROR RESPONSE
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: None,
        }
    }

    pub fn with_message(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: Some(message.into()),
        }
    }
}

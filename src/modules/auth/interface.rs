use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::model::{BackupCode, MfaFactor, Profile, Session, User};

// =============================================================================
// REPOSITORY TRAITS
// =============================================================================

pub type Result<T> = std::result::Result<T, AuthError>;

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create(&self, user: &User) -> Result<()>;
    async fn create_profile(&self, profile: &Profile) -> Result<()>;
    async fn find_by_id(&self, id: &str) -> Result<Option<User>>;
    async fn find_by_email(&self, email: &str) -> Result<Option<User>>;
    async fn update_password(&self, user_id: &str, password_hash: &str) -> Result<()>;
    async fn set_email_verified(&self, user_id: &str) -> Result<()>;
    async fn set_mfa_enabled(&self, user_id: &str, enabled: bool) -> Result<()>;
    /// Atomic storage-level increment. Returns the post-increment count so
    /// concurrent failures are never lost to a read-modify-write race.
    async fn increment_failed_logins(&self, user_id: &str) -> Result<u32>;
    async fn lock_account(&self, user_id: &str, until: DateTime<Utc>) -> Result<()>;
    /// Resets the failure counter, clears any lock, stamps `last_login_at`.
    async fn record_login_success(&self, user_id: &str) -> Result<()>;
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn create(&self, session: &Session) -> Result<()>;
    async fn find_by_id(&self, id: &str) -> Result<Option<Session>>;
    async fn find_by_refresh_token(&self, refresh_token: &str) -> Result<Option<Session>>;
    async fn revoke(&self, session_id: &str) -> Result<()>;
    async fn revoke_all_for_user(&self, user_id: &str) -> Result<u64>;
    async fn active_for_user(&self, user_id: &str) -> Result<Vec<Session>>;
    async fn delete_expired(&self) -> Result<u64>;
}

#[async_trait]
pub trait MfaRepository: Send + Sync {
    async fn create_factor(&self, factor: &MfaFactor) -> Result<()>;
    async fn find_factor_by_id(&self, id: &str) -> Result<Option<MfaFactor>>;
    async fn find_verified_factor(&self, user_id: &str) -> Result<Option<MfaFactor>>;
    async fn mark_factor_verified(&self, id: &str) -> Result<()>;
    async fn delete_factors_for_user(&self, user_id: &str) -> Result<()>;
    /// Deletes any existing batch and inserts the replacement in one call.
    async fn replace_backup_codes(&self, user_id: &str, codes: &[BackupCode]) -> Result<()>;
    async fn find_backup_codes(&self, user_id: &str) -> Result<Vec<BackupCode>>;
    async fn mark_backup_code_used(&self, id: &str) -> Result<()>;
    async fn delete_backup_codes_for_user(&self, user_id: &str) -> Result<()>;
}

// =============================================================================
// SERVICE RESULT TYPES
// =============================================================================

pub use crate::services::jwt::TokenPair;

/// Outcome of a password login. A tagged type rather than a nullable token
/// pair: callers must match on it, so "MFA pending" can never be mistaken
/// for "authenticated".
#[derive(Debug)]
pub enum LoginOutcome {
    Authenticated {
        kind: AuthKind,
        user: User,
        tokens: TokenPair,
    },
    MfaRequired {
        challenge_id: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthKind {
    ExistingUser,
    NewUserProvisioned,
}

/// Returned exactly once at enrollment; the secret and plaintext codes are
/// never retrievable afterwards.
#[derive(Debug)]
pub struct MfaEnrollment {
    pub factor_id: String,
    pub secret: String,
    pub qr_code: String,
    pub backup_codes: Vec<String>,
}

// =============================================================================
// ERROR TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("User not found")]
    UserNotFound,

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Account locked until {0}")]
    AccountLocked(DateTime<Utc>),

    #[error("Email already registered")]
    EmailAlreadyExists,

    #[error("Email is linked to a different sign-in method")]
    OAuthAccountConflict,

    #[error("Password too weak: {0}")]
    WeakPassword(String),

    #[error("Account has no password; sign in with your provider")]
    PasswordNotSet,

    #[error("Current password is incorrect")]
    IncorrectPassword,

    #[error("Invalid provider assertion")]
    InvalidAssertion,

    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("Invalid access token")]
    InvalidAccessToken,

    #[error("Invalid refresh token")]
    SessionNotFound,

    #[error("Session revoked")]
    SessionRevoked,

    #[error("Session expired")]
    SessionExpired,

    #[error("Invalid or expired challenge")]
    InvalidChallenge,

    #[error("Invalid verification code")]
    InvalidMfaCode,

    #[error("Incorrect code; scan the QR again and retry")]
    InvalidEnrollmentCode,

    #[error("Backup code already used")]
    BackupCodeAlreadyUsed,

    #[error("MFA is not enabled for this account")]
    MfaNotEnabled,

    #[error("MFA is already enrolled")]
    MfaAlreadyEnrolled,

    #[error("MFA factor not found")]
    FactorNotFound,

    #[error("{0} sign-in is not implemented")]
    ProviderNotImplemented(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Cache error: {0}")]
    Cache(#[from] redis::RedisError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Self::UserNotFound => StatusCode::NOT_FOUND,
            Self::InvalidCredentials => StatusCode::UNAUTHORIZED,
            Self::AccountLocked(_) => StatusCode::UNAUTHORIZED,
            Self::EmailAlreadyExists => StatusCode::CONFLICT,
            Self::OAuthAccountConflict => StatusCode::CONFLICT,
            Self::WeakPassword(_) => StatusCode::BAD_REQUEST,
            Self::PasswordNotSet => StatusCode::BAD_REQUEST,
            Self::IncorrectPassword => StatusCode::UNAUTHORIZED,
            Self::InvalidAssertion => StatusCode::UNAUTHORIZED,
            Self::InvalidToken => StatusCode::BAD_REQUEST,
            Self::InvalidAccessToken => StatusCode::UNAUTHORIZED,
            Self::SessionNotFound => StatusCode::UNAUTHORIZED,
            Self::SessionRevoked => StatusCode::UNAUTHORIZED,
            Self::SessionExpired => StatusCode::UNAUTHORIZED,
            Self::InvalidChallenge => StatusCode::BAD_REQUEST,
            Self::InvalidMfaCode => StatusCode::UNAUTHORIZED,
            Self::InvalidEnrollmentCode => StatusCode::BAD_REQUEST,
            Self::BackupCodeAlreadyUsed => StatusCode::UNAUTHORIZED,
            Self::MfaNotEnabled => StatusCode::BAD_REQUEST,
            Self::MfaAlreadyEnrolled => StatusCode::CONFLICT,
            Self::FactorNotFound => StatusCode::NOT_FOUND,
            Self::ProviderNotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
            Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Cache(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Client-facing message. Storage and signing failures never leak
    /// details to the response body.
    pub fn public_message(&self) -> String {
        match self {
            Self::Database(_) | Self::Cache(_) | Self::Internal(_) => {
                "Internal server error".to_string()
            }
            other => other.to_string(),
        }
    }
}

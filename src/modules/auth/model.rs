use chrono::{DateTime, Utc};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: String,
    pub email: String,
    pub password_hash: Option<String>,
    pub email_verified: bool,
    pub phone_verified: bool,
    pub mfa_enabled: bool,
    pub role: String,
    pub failed_login_attempts: u32,
    pub locked_until: Option<DateTime<Utc>>,
    pub oauth_provider: Option<String>,
    pub oauth_provider_id: Option<String>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Account is locked while `locked_until` lies in the future.
    pub fn is_locked(&self) -> bool {
        self.locked_until.map(|t| t > Utc::now()).unwrap_or(false)
    }

    /// OAuth-only accounts carry no password hash.
    pub fn has_password(&self) -> bool {
        self.password_hash.is_some()
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct Profile {
    pub id: String,
    pub user_id: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub refresh_token: String,
    pub access_token_hash: String,
    pub aal: u8,
    pub device: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct MfaFactor {
    pub id: String,
    pub user_id: String,
    pub factor_type: String,
    pub secret: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const FACTOR_TYPE_TOTP: &str = "totp";
pub const FACTOR_STATUS_UNVERIFIED: &str = "unverified";
pub const FACTOR_STATUS_VERIFIED: &str = "verified";

impl MfaFactor {
    pub fn is_verified(&self) -> bool {
        self.status == FACTOR_STATUS_VERIFIED
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct BackupCode {
    pub id: String,
    pub user_id: String,
    pub code_hash: String,
    pub used: bool,
    pub created_at: DateTime<Utc>,
}

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::DbPool;
use crate::modules::auth::interface::{
    AuthError, MfaRepository, Result, SessionRepository, UserRepository,
};
use crate::modules::auth::model::{
    BackupCode, MfaFactor, Profile, Session, User, FACTOR_STATUS_VERIFIED,
};

// =============================================================================
// USERS
// =============================================================================

pub struct MySqlUserRepository {
    pool: DbPool,
}

impl MySqlUserRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for MySqlUserRepository {
    async fn create(&self, user: &User) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO users (
                id, email, password_hash, email_verified, phone_verified,
                mfa_enabled, role, failed_login_attempts, locked_until,
                oauth_provider, oauth_provider_id, last_login_at,
                created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&user.id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.email_verified)
        .bind(user.phone_verified)
        .bind(user.mfa_enabled)
        .bind(&user.role)
        .bind(user.failed_login_attempts)
        .bind(user.locked_until)
        .bind(&user.oauth_provider)
        .bind(&user.oauth_provider_id)
        .bind(user.last_login_at)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            // Losing the insert race on the unique email index is still a
            // duplicate registration, not a server fault.
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                AuthError::EmailAlreadyExists
            }
            _ => AuthError::Database(e),
        })?;

        Ok(())
    }

    async fn create_profile(&self, profile: &Profile) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO profiles (id, user_id, display_name, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&profile.id)
        .bind(&profile.user_id)
        .bind(&profile.display_name)
        .bind(profile.created_at)
        .bind(profile.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn update_password(&self, user_id: &str, password_hash: &str) -> Result<()> {
        sqlx::query("UPDATE users SET password_hash = ?, updated_at = NOW() WHERE id = ?")
            .bind(password_hash)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_email_verified(&self, user_id: &str) -> Result<()> {
        sqlx::query("UPDATE users SET email_verified = TRUE, updated_at = NOW() WHERE id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_mfa_enabled(&self, user_id: &str, enabled: bool) -> Result<()> {
        sqlx::query("UPDATE users SET mfa_enabled = ?, updated_at = NOW() WHERE id = ?")
            .bind(enabled)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn increment_failed_logins(&self, user_id: &str) -> Result<u32> {
        // Increment and read inside one transaction. The row lock taken by
        // the UPDATE serializes concurrent failures, so each caller sees a
        // distinct count.
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE users
            SET failed_login_attempts = failed_login_attempts + 1,
                updated_at = NOW()
            WHERE id = ?
            "#,
        )
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        let count: u32 =
            sqlx::query_scalar("SELECT failed_login_attempts FROM users WHERE id = ?")
                .bind(user_id)
                .fetch_one(&mut *tx)
                .await?;

        tx.commit().await?;
        Ok(count)
    }

    async fn lock_account(&self, user_id: &str, until: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE users SET locked_until = ?, updated_at = NOW() WHERE id = ?")
            .bind(until)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn record_login_success(&self, user_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE users
            SET failed_login_attempts = 0,
                locked_until = NULL,
                last_login_at = NOW(),
                updated_at = NOW()
            WHERE id = ?
            "#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// =============================================================================
// SESSIONS
// =============================================================================

pub struct MySqlSessionRepository {
    pool: DbPool,
}

impl MySqlSessionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionRepository for MySqlSessionRepository {
    async fn create(&self, session: &Session) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sessions (
                id, user_id, refresh_token, access_token_hash, aal,
                device, ip_address, user_agent, expires_at, revoked,
                created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&session.id)
        .bind(&session.user_id)
        .bind(&session.refresh_token)
        .bind(&session.access_token_hash)
        .bind(session.aal)
        .bind(&session.device)
        .bind(&session.ip_address)
        .bind(&session.user_agent)
        .bind(session.expires_at)
        .bind(session.revoked)
        .bind(session.created_at)
        .bind(session.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Session>> {
        let session = sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(session)
    }

    async fn find_by_refresh_token(&self, refresh_token: &str) -> Result<Option<Session>> {
        let session =
            sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE refresh_token = ?")
                .bind(refresh_token)
                .fetch_optional(&self.pool)
                .await?;
        Ok(session)
    }

    async fn revoke(&self, session_id: &str) -> Result<()> {
        sqlx::query("UPDATE sessions SET revoked = TRUE, updated_at = NOW() WHERE id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn revoke_all_for_user(&self, user_id: &str) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET revoked = TRUE, updated_at = NOW()
            WHERE user_id = ? AND revoked = FALSE
            "#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn active_for_user(&self, user_id: &str) -> Result<Vec<Session>> {
        let sessions = sqlx::query_as::<_, Session>(
            r#"
            SELECT * FROM sessions
            WHERE user_id = ? AND revoked = FALSE AND expires_at > NOW()
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(sessions)
    }

    async fn delete_expired(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= NOW()")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

// =============================================================================
// MFA FACTORS AND BACKUP CODES
// =============================================================================

pub struct MySqlMfaRepository {
    pool: DbPool,
}

impl MySqlMfaRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MfaRepository for MySqlMfaRepository {
    async fn create_factor(&self, factor: &MfaFactor) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO mfa_factors (
                id, user_id, factor_type, secret, status, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&factor.id)
        .bind(&factor.user_id)
        .bind(&factor.factor_type)
        .bind(&factor.secret)
        .bind(&factor.status)
        .bind(factor.created_at)
        .bind(factor.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_factor_by_id(&self, id: &str) -> Result<Option<MfaFactor>> {
        let factor = sqlx::query_as::<_, MfaFactor>("SELECT * FROM mfa_factors WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(factor)
    }

    async fn find_verified_factor(&self, user_id: &str) -> Result<Option<MfaFactor>> {
        let factor = sqlx::query_as::<_, MfaFactor>(
            "SELECT * FROM mfa_factors WHERE user_id = ? AND status = ? LIMIT 1",
        )
        .bind(user_id)
        .bind(FACTOR_STATUS_VERIFIED)
        .fetch_optional(&self.pool)
        .await?;
        Ok(factor)
    }

    async fn mark_factor_verified(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE mfa_factors SET status = ?, updated_at = NOW() WHERE id = ?")
            .bind(FACTOR_STATUS_VERIFIED)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_factors_for_user(&self, user_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM mfa_factors WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn replace_backup_codes(&self, user_id: &str, codes: &[BackupCode]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM backup_codes WHERE user_id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        for code in codes {
            sqlx::query(
                r#"
                INSERT INTO backup_codes (id, user_id, code_hash, used, created_at)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(&code.id)
            .bind(&code.user_id)
            .bind(&code.code_hash)
            .bind(code.used)
            .bind(code.created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn find_backup_codes(&self, user_id: &str) -> Result<Vec<BackupCode>> {
        let codes = sqlx::query_as::<_, BackupCode>(
            "SELECT * FROM backup_codes WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(codes)
    }

    async fn mark_backup_code_used(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE backup_codes SET used = TRUE WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_backup_codes_for_user(&self, user_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM backup_codes WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::modules::auth::interface::{
    AuthError, MfaRepository, Result, SessionRepository, UserRepository,
};
use crate::modules::auth::model::{BackupCode, MfaFactor, Profile, Session, User};

/// Mutexed maps standing in for MySQL. Backs the test suite and local
/// development without a database; the mutex gives the same
/// no-lost-update guarantee the transactional SQL path does.
#[derive(Default)]
pub struct MemoryUserRepository {
    users: Mutex<HashMap<String, User>>,
    profiles: Mutex<HashMap<String, Profile>>,
}

impl MemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepository for MemoryUserRepository {
    async fn create(&self, user: &User) -> Result<()> {
        let mut users = self.users.lock().unwrap();
        if users.values().any(|u| u.email == user.email) {
            return Err(AuthError::EmailAlreadyExists);
        }
        users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn create_profile(&self, profile: &Profile) -> Result<()> {
        self.profiles
            .lock()
            .unwrap()
            .insert(profile.id.clone(), profile.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<User>> {
        Ok(self.users.lock().unwrap().get(id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn update_password(&self, user_id: &str, password_hash: &str) -> Result<()> {
        if let Some(user) = self.users.lock().unwrap().get_mut(user_id) {
            user.password_hash = Some(password_hash.to_string());
            user.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn set_email_verified(&self, user_id: &str) -> Result<()> {
        if let Some(user) = self.users.lock().unwrap().get_mut(user_id) {
            user.email_verified = true;
            user.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn set_mfa_enabled(&self, user_id: &str, enabled: bool) -> Result<()> {
        if let Some(user) = self.users.lock().unwrap().get_mut(user_id) {
            user.mfa_enabled = enabled;
            user.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn increment_failed_logins(&self, user_id: &str) -> Result<u32> {
        let mut users = self.users.lock().unwrap();
        let user = users
            .get_mut(user_id)
            .ok_or_else(|| AuthError::Internal("user not found".to_string()))?;
        user.failed_login_attempts += 1;
        user.updated_at = Utc::now();
        Ok(user.failed_login_attempts)
    }

    async fn lock_account(&self, user_id: &str, until: DateTime<Utc>) -> Result<()> {
        if let Some(user) = self.users.lock().unwrap().get_mut(user_id) {
            user.locked_until = Some(until);
            user.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn record_login_success(&self, user_id: &str) -> Result<()> {
        if let Some(user) = self.users.lock().unwrap().get_mut(user_id) {
            user.failed_login_attempts = 0;
            user.locked_until = None;
            user.last_login_at = Some(Utc::now());
            user.updated_at = Utc::now();
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemorySessionRepository {
    sessions: Mutex<HashMap<String, Session>>,
}

impl MemorySessionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionRepository for MemorySessionRepository {
    async fn create(&self, session: &Session) -> Result<()> {
        self.sessions
            .lock()
            .unwrap()
            .insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Session>> {
        Ok(self.sessions.lock().unwrap().get(id).cloned())
    }

    async fn find_by_refresh_token(&self, refresh_token: &str) -> Result<Option<Session>> {
        Ok(self
            .sessions
            .lock()
            .unwrap()
            .values()
            .find(|s| s.refresh_token == refresh_token)
            .cloned())
    }

    async fn revoke(&self, session_id: &str) -> Result<()> {
        if let Some(session) = self.sessions.lock().unwrap().get_mut(session_id) {
            session.revoked = true;
            session.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn revoke_all_for_user(&self, user_id: &str) -> Result<u64> {
        let mut count = 0;
        for session in self.sessions.lock().unwrap().values_mut() {
            if session.user_id == user_id && !session.revoked {
                session.revoked = true;
                session.updated_at = Utc::now();
                count += 1;
            }
        }
        Ok(count)
    }

    async fn active_for_user(&self, user_id: &str) -> Result<Vec<Session>> {
        let now = Utc::now();
        let mut sessions: Vec<Session> = self
            .sessions
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.user_id == user_id && !s.revoked && s.expires_at > now)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    async fn delete_expired(&self) -> Result<u64> {
        let now = Utc::now();
        let mut sessions = self.sessions.lock().unwrap();
        let before = sessions.len();
        sessions.retain(|_, s| s.expires_at > now);
        Ok((before - sessions.len()) as u64)
    }
}

#[derive(Default)]
pub struct MemoryMfaRepository {
    factors: Mutex<HashMap<String, MfaFactor>>,
    codes: Mutex<HashMap<String, BackupCode>>,
}

impl MemoryMfaRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MfaRepository for MemoryMfaRepository {
    async fn create_factor(&self, factor: &MfaFactor) -> Result<()> {
        self.factors
            .lock()
            .unwrap()
            .insert(factor.id.clone(), factor.clone());
        Ok(())
    }

    async fn find_factor_by_id(&self, id: &str) -> Result<Option<MfaFactor>> {
        Ok(self.factors.lock().unwrap().get(id).cloned())
    }

    async fn find_verified_factor(&self, user_id: &str) -> Result<Option<MfaFactor>> {
        Ok(self
            .factors
            .lock()
            .unwrap()
            .values()
            .find(|f| f.user_id == user_id && f.is_verified())
            .cloned())
    }

    async fn mark_factor_verified(&self, id: &str) -> Result<()> {
        if let Some(factor) = self.factors.lock().unwrap().get_mut(id) {
            factor.status = super::model::FACTOR_STATUS_VERIFIED.to_string();
            factor.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn delete_factors_for_user(&self, user_id: &str) -> Result<()> {
        self.factors
            .lock()
            .unwrap()
            .retain(|_, f| f.user_id != user_id);
        Ok(())
    }

    async fn replace_backup_codes(&self, user_id: &str, codes: &[BackupCode]) -> Result<()> {
        let mut map = self.codes.lock().unwrap();
        map.retain(|_, c| c.user_id != user_id);
        for code in codes {
            map.insert(code.id.clone(), code.clone());
        }
        Ok(())
    }

    async fn find_backup_codes(&self, user_id: &str) -> Result<Vec<BackupCode>> {
        Ok(self
            .codes
            .lock()
            .unwrap()
            .values()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn mark_backup_code_used(&self, id: &str) -> Result<()> {
        if let Some(code) = self.codes.lock().unwrap().get_mut(id) {
            code.used = true;
        }
        Ok(())
    }

    async fn delete_backup_codes_for_user(&self, user_id: &str) -> Result<()> {
        self.codes.lock().unwrap().retain(|_, c| c.user_id != user_id);
        Ok(())
    }
}

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::services::email::{EmailDispatcher, EmailJob};
use crate::services::ephemeral::{
    EphemeralStore, NS_BLACKLIST, NS_MFA, NS_PWRESET, NS_VERIFY,
};
use crate::services::hashing;
use crate::services::jwt::{AccessClaims, TokenService};
use crate::services::metrics::{AuthMetricsCollector, MetricsRegistry};
use crate::services::oauth::{OAuthError, OAuthIdentity, OAuthVerifier};

use super::interface::{
    AuthError, AuthKind, LoginOutcome, MfaEnrollment, MfaRepository, Result, SessionRepository,
    TokenPair, UserRepository,
};
use super::mfa::MfaEngine;
use super::model::{Profile, Session, User};

pub const LOCKOUT_THRESHOLD: u32 = 5;
pub const LOCKOUT_DURATION_MINUTES: i64 = 30;
pub const MFA_MAX_CHALLENGE_ATTEMPTS: u32 = 5;

pub const EMAIL_VERIFICATION_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const PASSWORD_RESET_TTL: Duration = Duration::from_secs(15 * 60);
pub const MFA_CHALLENGE_TTL: Duration = Duration::from_secs(5 * 60);

const AAL_PASSWORD: u8 = 1;
const AAL_MFA: u8 = 2;

/// Request metadata recorded on sessions.
#[derive(Debug, Clone, Default)]
pub struct DeviceInfo {
    pub device: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// What a login must still prove during MFA step-up.
#[derive(Debug)]
pub enum MfaProof {
    Totp(String),
    BackupCode(String),
}

/// Pending MFA challenge state, serialized into the ephemeral store so the
/// attempt counter survives across requests and instances.
#[derive(Debug, Serialize, Deserialize)]
struct MfaChallenge {
    user_id: String,
    attempts: u32,
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn display_name_from_email(email: &str) -> String {
    email.split('@').next().unwrap_or(email).to_string()
}

/// Orchestrates credentials, sessions, MFA step-up and the ephemeral token
/// flows. Storage and delivery all sit behind traits.
pub struct AuthService {
    users: Arc<dyn UserRepository>,
    sessions: Arc<dyn SessionRepository>,
    mfa: MfaEngine,
    tokens: Arc<TokenService>,
    store: Arc<dyn EphemeralStore>,
    emails: Arc<EmailDispatcher>,
    oauth: Arc<dyn OAuthVerifier>,
    metrics: AuthMetricsCollector,
}

impl AuthService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        users: Arc<dyn UserRepository>,
        sessions: Arc<dyn SessionRepository>,
        mfa_repo: Arc<dyn MfaRepository>,
        tokens: Arc<TokenService>,
        store: Arc<dyn EphemeralStore>,
        emails: Arc<EmailDispatcher>,
        oauth: Arc<dyn OAuthVerifier>,
        metrics: Arc<MetricsRegistry>,
        mfa_issuer: String,
    ) -> Self {
        Self {
            users,
            sessions,
            mfa: MfaEngine::new(mfa_repo, mfa_issuer),
            tokens,
            store,
            emails,
            oauth,
            metrics: AuthMetricsCollector::new(metrics),
        }
    }

    // =========================================================================
    // REGISTRATION AND LOGIN
    // =========================================================================

    pub async fn register(
        &self,
        email: &str,
        password: &str,
        device: &DeviceInfo,
    ) -> Result<(User, TokenPair)> {
        let email = normalize_email(email);

        hashing::validate_strength(password)
            .map_err(|reason| AuthError::WeakPassword(reason.to_string()))?;

        if self.users.find_by_email(&email).await?.is_some() {
            return Err(AuthError::EmailAlreadyExists);
        }

        let user = self.create_password_user(&email, password).await?;
        self.queue_verification_email(&user).await?;

        let tokens = self.issue_session(&user, AAL_PASSWORD, device).await?;
        tracing::info!(user_id = %user.id, "user registered");
        Ok((user, tokens))
    }

    /// Password login. Unknown emails are provisioned on the spot, so the
    /// response shape tells callers which of the three things happened:
    /// existing user in, new user in, or MFA still owed.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        device: &DeviceInfo,
    ) -> Result<LoginOutcome> {
        let email = normalize_email(email);

        let Some(user) = self.users.find_by_email(&email).await? else {
            return self.provision_on_login(&email, password, device).await;
        };

        // Lock state is checked before the password so a guesser cannot
        // keep probing a locked account.
        if let Some(until) = user.locked_until {
            if until > Utc::now() {
                self.metrics.record_login_attempt("locked");
                return Err(AuthError::AccountLocked(until));
            }
        }

        let password_ok = match &user.password_hash {
            Some(hash) => hashing::verify_password(password, hash)
                .map_err(|e| AuthError::Internal(e.to_string()))?,
            // OAuth-only accounts have nothing to verify against; count the
            // attempt like any other failure.
            None => false,
        };

        if !password_ok {
            self.record_failed_login(&user).await?;
            self.metrics.record_login_attempt("invalid_credentials");
            return Err(AuthError::InvalidCredentials);
        }

        self.users.record_login_success(&user.id).await?;

        if user.mfa_enabled {
            let challenge_id = self.open_mfa_challenge(&user).await?;
            self.metrics.record_login_attempt("mfa_required");
            return Ok(LoginOutcome::MfaRequired { challenge_id });
        }

        let tokens = self.issue_session(&user, AAL_PASSWORD, device).await?;
        self.metrics.record_login_attempt("success");
        Ok(LoginOutcome::Authenticated {
            kind: AuthKind::ExistingUser,
            user,
            tokens,
        })
    }

    async fn provision_on_login(
        &self,
        email: &str,
        password: &str,
        device: &DeviceInfo,
    ) -> Result<LoginOutcome> {
        hashing::validate_strength(password)
            .map_err(|reason| AuthError::WeakPassword(reason.to_string()))?;

        let user = self.create_password_user(email, password).await?;
        self.queue_verification_email(&user).await?;

        let tokens = self.issue_session(&user, AAL_PASSWORD, device).await?;
        self.metrics.record_login_attempt("provisioned");
        tracing::info!(user_id = %user.id, "account provisioned at login");
        Ok(LoginOutcome::Authenticated {
            kind: AuthKind::NewUserProvisioned,
            user,
            tokens,
        })
    }

    async fn record_failed_login(&self, user: &User) -> Result<()> {
        let count = self.users.increment_failed_logins(&user.id).await?;
        if count >= LOCKOUT_THRESHOLD {
            let until = Utc::now() + chrono::Duration::minutes(LOCKOUT_DURATION_MINUTES);
            self.users.lock_account(&user.id, until).await?;
            self.metrics.record_lockout();
            tracing::warn!(user_id = %user.id, failures = count, "account locked");
        }
        Ok(())
    }

    // =========================================================================
    // MFA STEP-UP
    // =========================================================================

    async fn open_mfa_challenge(&self, user: &User) -> Result<String> {
        let challenge_id = hashing::generate_secure_token(32);
        let challenge = MfaChallenge {
            user_id: user.id.clone(),
            attempts: 0,
        };
        let payload = serde_json::to_string(&challenge)
            .map_err(|e| AuthError::Internal(e.to_string()))?;
        self.store
            .store(NS_MFA, &challenge_id, &payload, MFA_CHALLENGE_TTL)
            .await?;
        Ok(challenge_id)
    }

    /// Completes a password login that still owes an MFA proof. Success
    /// consumes the challenge and grants an AAL2 session; failures burn one
    /// of the challenge's limited attempts.
    pub async fn verify_mfa(
        &self,
        challenge_id: &str,
        proof: MfaProof,
        device: &DeviceInfo,
    ) -> Result<(User, TokenPair)> {
        let payload = self
            .store
            .get(NS_MFA, challenge_id)
            .await?
            .ok_or(AuthError::InvalidChallenge)?;
        let challenge: MfaChallenge =
            serde_json::from_str(&payload).map_err(|e| AuthError::Internal(e.to_string()))?;

        let user = self
            .users
            .find_by_id(&challenge.user_id)
            .await?
            .ok_or(AuthError::InvalidChallenge)?;

        let (method, verified) = match &proof {
            MfaProof::Totp(code) => {
                let ok = self.mfa.verify_totp(&user.id, &user.email, code).await?;
                ("totp", if ok { Ok(()) } else { Err(AuthError::InvalidMfaCode) })
            }
            MfaProof::BackupCode(code) => {
                ("backup_code", self.mfa.consume_backup_code(&user.id, code).await)
            }
        };

        if let Err(err) = verified {
            self.metrics.record_mfa_verification(method, "failure");
            self.burn_challenge_attempt(challenge_id, challenge).await?;
            return Err(err);
        }

        self.store.delete(NS_MFA, challenge_id).await?;
        self.metrics.record_mfa_verification(method, "success");

        let tokens = self.issue_session(&user, AAL_MFA, device).await?;
        Ok((user, tokens))
    }

    async fn burn_challenge_attempt(
        &self,
        challenge_id: &str,
        mut challenge: MfaChallenge,
    ) -> Result<()> {
        challenge.attempts += 1;
        if challenge.attempts >= MFA_MAX_CHALLENGE_ATTEMPTS {
            self.store.delete(NS_MFA, challenge_id).await?;
            tracing::warn!(
                user_id = %challenge.user_id,
                "mfa challenge exhausted"
            );
            return Ok(());
        }
        let payload = serde_json::to_string(&challenge)
            .map_err(|e| AuthError::Internal(e.to_string()))?;
        self.store.update(NS_MFA, challenge_id, &payload).await?;
        Ok(())
    }

    // =========================================================================
    // SESSIONS AND TOKENS
    // =========================================================================

    async fn issue_session(
        &self,
        user: &User,
        aal: u8,
        device: &DeviceInfo,
    ) -> Result<TokenPair> {
        let session_id = Uuid::new_v4().to_string();

        let pair = self
            .tokens
            .generate_token_pair(&user.id, &user.email, aal, &session_id)
            .map_err(|e| AuthError::Internal(e.to_string()))?;

        let now = Utc::now();
        let session = Session {
            id: session_id,
            user_id: user.id.clone(),
            refresh_token: pair.refresh_token.clone(),
            access_token_hash: self.tokens.hash_token(&pair.access_token),
            aal,
            device: device.device.clone(),
            ip_address: device.ip_address.clone(),
            user_agent: device.user_agent.clone(),
            expires_at: self.tokens.refresh_token_expiry(),
            revoked: false,
            created_at: now,
            updated_at: now,
        };
        self.sessions.create(&session).await?;
        self.metrics.record_tokens_issued(aal);

        Ok(pair)
    }

    /// Rotation-on-use: every presented refresh token is spent, and the
    /// replacement session keeps the old one's device metadata and AAL.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair> {
        let session = self
            .sessions
            .find_by_refresh_token(refresh_token)
            .await?
            .ok_or(AuthError::SessionNotFound)?;

        if session.revoked {
            return Err(AuthError::SessionRevoked);
        }
        if session.is_expired() {
            return Err(AuthError::SessionExpired);
        }

        let user = self
            .users
            .find_by_id(&session.user_id)
            .await?
            .ok_or(AuthError::SessionNotFound)?;

        let device = DeviceInfo {
            device: session.device.clone(),
            ip_address: session.ip_address.clone(),
            user_agent: session.user_agent.clone(),
        };

        // New session first. If revocation of the old one then fails the
        // caller still holds exactly one working pair, and the dangling
        // session is flagged for operators.
        let tokens = self.issue_session(&user, session.aal, &device).await?;

        match self.sessions.revoke(&session.id).await {
            Ok(()) => self.metrics.record_sessions_revoked("rotation", 1),
            Err(e) => {
                tracing::warn!(
                    session_id = %session.id,
                    error = %e,
                    "failed to revoke rotated session"
                );
            }
        }

        Ok(tokens)
    }

    /// Revokes the claims' session and blacklists the presented access
    /// token for its residual lifetime. Safe to repeat.
    pub async fn logout(&self, claims: &AccessClaims) -> Result<()> {
        self.blacklist_access_token(claims).await?;
        self.sessions.revoke(&claims.sid).await?;
        self.metrics.record_sessions_revoked("logout", 1);
        Ok(())
    }

    pub async fn logout_all(&self, claims: &AccessClaims) -> Result<u64> {
        self.blacklist_access_token(claims).await?;
        let count = self.sessions.revoke_all_for_user(&claims.sub).await?;
        self.metrics.record_sessions_revoked("logout_all", count);
        Ok(count)
    }

    /// Each session mints exactly one access token, so the session id is a
    /// complete stand-in for the token in the blacklist.
    async fn blacklist_access_token(&self, claims: &AccessClaims) -> Result<()> {
        let ttl = self.tokens.residual_ttl_secs(claims);
        if ttl > 0 {
            self.store
                .store(
                    NS_BLACKLIST,
                    &claims.sid,
                    "revoked",
                    Duration::from_secs(ttl as u64),
                )
                .await?;
        }
        Ok(())
    }

    pub async fn is_access_token_blacklisted(&self, session_id: &str) -> Result<bool> {
        Ok(self.store.get(NS_BLACKLIST, session_id).await?.is_some())
    }

    pub async fn active_sessions(&self, user_id: &str) -> Result<Vec<Session>> {
        self.sessions.active_for_user(user_id).await
    }

    pub async fn current_user(&self, user_id: &str) -> Result<User> {
        self.users
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::UserNotFound)
    }

    // =========================================================================
    // PASSWORD LIFECYCLE
    // =========================================================================

    /// Always succeeds so the response cannot confirm whether an address
    /// is registered.
    pub async fn forgot_password(&self, email: &str) -> Result<()> {
        let email = normalize_email(email);
        if let Some(user) = self.users.find_by_email(&email).await? {
            let token = hashing::generate_secure_token(32);
            self.store
                .store(NS_PWRESET, &token, &user.id, PASSWORD_RESET_TTL)
                .await?;
            self.emails.enqueue(EmailJob::PasswordReset {
                to: user.email,
                token,
            });
        } else {
            tracing::debug!("password reset requested for unknown email");
        }
        Ok(())
    }

    /// The token is consumed up front; whatever happens next it cannot be
    /// presented again.
    pub async fn reset_password(&self, token: &str, new_password: &str) -> Result<()> {
        let user_id = self
            .store
            .take(NS_PWRESET, token)
            .await?
            .ok_or(AuthError::InvalidToken)?;

        hashing::validate_strength(new_password)
            .map_err(|reason| AuthError::WeakPassword(reason.to_string()))?;

        let user = self
            .users
            .find_by_id(&user_id)
            .await?
            .ok_or(AuthError::InvalidToken)?;

        let hash = hashing::hash_password(new_password)
            .map_err(|e| AuthError::Internal(e.to_string()))?;
        self.users.update_password(&user.id, &hash).await?;

        let count = self.sessions.revoke_all_for_user(&user.id).await?;
        self.metrics.record_sessions_revoked("password_reset", count);

        self.emails
            .enqueue(EmailJob::PasswordChanged { to: user.email });
        tracing::info!(user_id = %user.id, "password reset");
        Ok(())
    }

    pub async fn change_password(
        &self,
        user: &User,
        current_password: &str,
        new_password: &str,
    ) -> Result<()> {
        let hash = user.password_hash.as_ref().ok_or(AuthError::PasswordNotSet)?;
        let current_ok = hashing::verify_password(current_password, hash)
            .map_err(|e| AuthError::Internal(e.to_string()))?;
        if !current_ok {
            return Err(AuthError::IncorrectPassword);
        }

        hashing::validate_strength(new_password)
            .map_err(|reason| AuthError::WeakPassword(reason.to_string()))?;

        let new_hash = hashing::hash_password(new_password)
            .map_err(|e| AuthError::Internal(e.to_string()))?;
        self.users.update_password(&user.id, &new_hash).await?;

        let count = self.sessions.revoke_all_for_user(&user.id).await?;
        self.metrics.record_sessions_revoked("password_change", count);

        self.emails.enqueue(EmailJob::PasswordChanged {
            to: user.email.clone(),
        });
        tracing::info!(user_id = %user.id, "password changed");
        Ok(())
    }

    // =========================================================================
    // EMAIL VERIFICATION
    // =========================================================================

    pub async fn request_email_verification(&self, user: &User) -> Result<()> {
        if user.email_verified {
            return Ok(());
        }
        self.queue_verification_email(user).await
    }

    pub async fn verify_email(&self, token: &str) -> Result<()> {
        let user_id = self
            .store
            .take(NS_VERIFY, token)
            .await?
            .ok_or(AuthError::InvalidToken)?;

        let user = self
            .users
            .find_by_id(&user_id)
            .await?
            .ok_or(AuthError::InvalidToken)?;

        self.users.set_email_verified(&user.id).await?;
        self.emails.enqueue(EmailJob::Welcome { to: user.email });
        tracing::info!(user_id = %user.id, "email verified");
        Ok(())
    }

    async fn queue_verification_email(&self, user: &User) -> Result<()> {
        let token = hashing::generate_secure_token(32);
        self.store
            .store(NS_VERIFY, &token, &user.id, EMAIL_VERIFICATION_TTL)
            .await?;
        self.emails.enqueue(EmailJob::Verification {
            to: user.email.clone(),
            token,
        });
        Ok(())
    }

    // =========================================================================
    // MFA LIFECYCLE
    // =========================================================================

    pub async fn enroll_mfa(&self, user: &User) -> Result<MfaEnrollment> {
        self.mfa.enroll(user).await
    }

    pub async fn confirm_mfa_enrollment(
        &self,
        user: &User,
        factor_id: &str,
        code: &str,
    ) -> Result<()> {
        self.mfa.confirm_enrollment(user, factor_id, code).await?;
        self.users.set_mfa_enabled(&user.id, true).await?;
        tracing::info!(user_id = %user.id, "mfa enabled");
        Ok(())
    }

    pub async fn regenerate_backup_codes(&self, user: &User) -> Result<Vec<String>> {
        self.mfa.regenerate_backup_codes(user).await
    }

    /// Requires the current password; OAuth-only accounts cannot disable
    /// MFA this way.
    pub async fn disable_mfa(&self, user: &User, current_password: &str) -> Result<()> {
        let hash = user.password_hash.as_ref().ok_or(AuthError::PasswordNotSet)?;
        let ok = hashing::verify_password(current_password, hash)
            .map_err(|e| AuthError::Internal(e.to_string()))?;
        if !ok {
            return Err(AuthError::IncorrectPassword);
        }

        self.mfa.remove_all(&user.id).await?;
        self.users.set_mfa_enabled(&user.id, false).await?;
        tracing::info!(user_id = %user.id, "mfa disabled");
        Ok(())
    }

    // =========================================================================
    // OAUTH
    // =========================================================================

    /// Verified assertions either match an existing account exactly (same
    /// provider, same subject) or provision a fresh one. Anything else is a
    /// conflict; accounts are never silently linked.
    pub async fn oauth_login(
        &self,
        provider: &str,
        assertion: &str,
        device: &DeviceInfo,
    ) -> Result<(AuthKind, User, TokenPair)> {
        let identity = self
            .oauth
            .verify(provider, assertion)
            .await
            .map_err(|e| match e {
                OAuthError::NotImplemented(p) => AuthError::ProviderNotImplemented(p),
                OAuthError::InvalidAssertion(reason) => {
                    tracing::debug!(provider, %reason, "oauth assertion rejected");
                    AuthError::InvalidAssertion
                }
                OAuthError::Http(e) => AuthError::Internal(e),
            })?;

        let email = normalize_email(&identity.email);

        let (kind, user) = match self.users.find_by_email(&email).await? {
            Some(user) => {
                let same_provider = user.oauth_provider.as_deref() == Some(identity.provider.as_str())
                    && user.oauth_provider_id.as_deref() == Some(identity.subject.as_str());
                if !same_provider {
                    return Err(AuthError::OAuthAccountConflict);
                }
                self.users.record_login_success(&user.id).await?;
                (AuthKind::ExistingUser, user)
            }
            None => {
                let user = self.create_oauth_user(&email, &identity).await?;
                (AuthKind::NewUserProvisioned, user)
            }
        };

        let tokens = self.issue_session(&user, AAL_PASSWORD, device).await?;
        self.metrics.record_login_attempt(match kind {
            AuthKind::ExistingUser => "success",
            AuthKind::NewUserProvisioned => "provisioned",
        });
        Ok((kind, user, tokens))
    }

    // =========================================================================
    // USER CREATION
    // =========================================================================

    async fn create_password_user(&self, email: &str, password: &str) -> Result<User> {
        let hash = hashing::hash_password(password)
            .map_err(|e| AuthError::Internal(e.to_string()))?;

        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4().to_string(),
            email: email.to_string(),
            password_hash: Some(hash),
            email_verified: false,
            phone_verified: false,
            mfa_enabled: false,
            role: "user".to_string(),
            failed_login_attempts: 0,
            locked_until: None,
            oauth_provider: None,
            oauth_provider_id: None,
            last_login_at: Some(now),
            created_at: now,
            updated_at: now,
        };
        self.users.create(&user).await?;
        self.create_bare_profile(&user).await?;
        Ok(user)
    }

    async fn create_oauth_user(&self, email: &str, identity: &OAuthIdentity) -> Result<User> {
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4().to_string(),
            email: email.to_string(),
            password_hash: None,
            email_verified: identity.email_verified,
            phone_verified: false,
            mfa_enabled: false,
            role: "user".to_string(),
            failed_login_attempts: 0,
            locked_until: None,
            oauth_provider: Some(identity.provider.clone()),
            oauth_provider_id: Some(identity.subject.clone()),
            last_login_at: Some(now),
            created_at: now,
            updated_at: now,
        };
        self.users.create(&user).await?;
        self.create_bare_profile(&user).await?;
        tracing::info!(user_id = %user.id, provider = %identity.provider, "oauth user provisioned");
        Ok(user)
    }

    async fn create_bare_profile(&self, user: &User) -> Result<()> {
        let now = Utc::now();
        let profile = Profile {
            id: Uuid::new_v4().to_string(),
            user_id: user.id.clone(),
            display_name: display_name_from_email(&user.email),
            created_at: now,
            updated_at: now,
        };
        self.users.create_profile(&profile).await
    }
}

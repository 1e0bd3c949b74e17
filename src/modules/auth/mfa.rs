use std::sync::Arc;

use chrono::Utc;
use rand::Rng;
use sha2::{Digest, Sha256};
use totp_rs::{Algorithm, Secret, TOTP};
use uuid::Uuid;

use super::interface::{AuthError, MfaEnrollment, MfaRepository, Result};
use super::model::{
    BackupCode, MfaFactor, User, FACTOR_STATUS_UNVERIFIED, FACTOR_TYPE_TOTP,
};

pub const BACKUP_CODE_COUNT: usize = 10;
const BACKUP_CODE_LEN: usize = 8;
const BACKUP_CODE_GROUP_SIZE: usize = 4;
// No I, O, 0 or 1: codes get typed from paper.
const BACKUP_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// TOTP enrollment and verification plus backup-code lifecycle.
/// Password checks and the `mfa_enabled` user flag stay with the caller.
pub struct MfaEngine {
    repo: Arc<dyn MfaRepository>,
    issuer: String,
}

impl MfaEngine {
    pub fn new(repo: Arc<dyn MfaRepository>, issuer: String) -> Self {
        Self { repo, issuer }
    }

    // =========================================================================
    // ENROLLMENT
    // =========================================================================

    /// Secret, QR data URL and plaintext backup codes are returned exactly
    /// once; only the factor row and code digests are persisted.
    pub async fn enroll(&self, user: &User) -> Result<MfaEnrollment> {
        if user.mfa_enabled || self.repo.find_verified_factor(&user.id).await?.is_some() {
            return Err(AuthError::MfaAlreadyEnrolled);
        }

        // A fresh enroll supersedes any half-finished one. Only unverified
        // factors can exist past the guard above.
        self.repo.delete_factors_for_user(&user.id).await?;

        let secret = Secret::generate_secret();
        let secret_bytes = secret
            .to_bytes()
            .map_err(|e| AuthError::Internal(format!("secret generation: {}", e)))?;

        let totp = TOTP::new(
            Algorithm::SHA1,
            6,
            1,
            30,
            secret_bytes,
            Some(self.issuer.clone()),
            user.email.clone(),
        )
        .map_err(|e| AuthError::Internal(format!("totp init: {}", e)))?;

        let qr = totp
            .get_qr_base64()
            .map_err(|e| AuthError::Internal(format!("qr generation: {}", e)))?;
        let qr_code = format!("data:image/png;base64,{}", qr);
        let secret_b32 = totp.get_secret_base32();

        let now = Utc::now();
        let factor = MfaFactor {
            id: Uuid::new_v4().to_string(),
            user_id: user.id.clone(),
            factor_type: FACTOR_TYPE_TOTP.to_string(),
            secret: secret_b32.clone(),
            status: FACTOR_STATUS_UNVERIFIED.to_string(),
            created_at: now,
            updated_at: now,
        };
        self.repo.create_factor(&factor).await?;

        let (plaintext, rows) = self.generate_backup_codes(&user.id);
        self.repo.replace_backup_codes(&user.id, &rows).await?;

        Ok(MfaEnrollment {
            factor_id: factor.id,
            secret: secret_b32,
            qr_code,
            backup_codes: plaintext,
        })
    }

    /// First valid code flips the factor to verified. The caller then sets
    /// the user's `mfa_enabled` flag.
    pub async fn confirm_enrollment(&self, user: &User, factor_id: &str, code: &str) -> Result<()> {
        let factor = self
            .repo
            .find_factor_by_id(factor_id)
            .await?
            .filter(|f| f.user_id == user.id)
            .ok_or(AuthError::FactorNotFound)?;

        if factor.is_verified() {
            return Err(AuthError::MfaAlreadyEnrolled);
        }

        let totp = self.build_totp(&factor.secret, &user.email)?;
        if !totp.check_current(code).unwrap_or(false) {
            return Err(AuthError::InvalidEnrollmentCode);
        }

        self.repo.mark_factor_verified(&factor.id).await?;
        Ok(())
    }

    // =========================================================================
    // VERIFICATION
    // =========================================================================

    /// Standard one-step clock skew either way. A wrong code is `Ok(false)`;
    /// a user with no verified factor is a caller bug, not a user error.
    pub async fn verify_totp(&self, user_id: &str, email: &str, code: &str) -> Result<bool> {
        let factor = self
            .repo
            .find_verified_factor(user_id)
            .await?
            .ok_or_else(|| AuthError::Internal("no verified mfa factor".to_string()))?;

        let totp = self.build_totp(&factor.secret, email)?;
        Ok(totp.check_current(code).unwrap_or(false))
    }

    /// A code that matched a used row fails differently from one that never
    /// matched, so clients can explain what happened.
    pub async fn consume_backup_code(&self, user_id: &str, code: &str) -> Result<()> {
        let normalized = normalize_backup_code(code).ok_or(AuthError::InvalidMfaCode)?;
        let digest = digest_backup_code(&normalized);

        let codes = self.repo.find_backup_codes(user_id).await?;
        match codes.iter().find(|c| c.code_hash == digest) {
            Some(matched) if matched.used => Err(AuthError::BackupCodeAlreadyUsed),
            Some(matched) => {
                self.repo.mark_backup_code_used(&matched.id).await?;
                Ok(())
            }
            None => Err(AuthError::InvalidMfaCode),
        }
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Replaces the whole batch; any unused codes from the old batch stop
    /// validating.
    pub async fn regenerate_backup_codes(&self, user: &User) -> Result<Vec<String>> {
        if !user.mfa_enabled {
            return Err(AuthError::MfaNotEnabled);
        }
        let (plaintext, rows) = self.generate_backup_codes(&user.id);
        self.repo.replace_backup_codes(&user.id, &rows).await?;
        Ok(plaintext)
    }

    /// Drops factors and backup codes. Flag clearing is the caller's step.
    pub async fn remove_all(&self, user_id: &str) -> Result<()> {
        self.repo.delete_factors_for_user(user_id).await?;
        self.repo.delete_backup_codes_for_user(user_id).await?;
        Ok(())
    }

    // =========================================================================
    // INTERNALS
    // =========================================================================

    fn build_totp(&self, secret_b32: &str, account: &str) -> Result<TOTP> {
        let secret_bytes = Secret::Encoded(secret_b32.to_string())
            .to_bytes()
            .map_err(|e| AuthError::Internal(format!("stored secret: {}", e)))?;

        TOTP::new(
            Algorithm::SHA1,
            6,
            1,
            30,
            secret_bytes,
            Some(self.issuer.clone()),
            account.to_string(),
        )
        .map_err(|e| AuthError::Internal(format!("totp init: {}", e)))
    }

    fn generate_backup_codes(&self, user_id: &str) -> (Vec<String>, Vec<BackupCode>) {
        let mut plaintext = Vec::with_capacity(BACKUP_CODE_COUNT);
        let mut rows = Vec::with_capacity(BACKUP_CODE_COUNT);
        let now = Utc::now();

        for _ in 0..BACKUP_CODE_COUNT {
            let normalized = generate_backup_code();
            rows.push(BackupCode {
                id: Uuid::new_v4().to_string(),
                user_id: user_id.to_string(),
                code_hash: digest_backup_code(&normalized),
                used: false,
                created_at: now,
            });
            plaintext.push(format_backup_code(&normalized));
        }

        (plaintext, rows)
    }
}

fn generate_backup_code() -> String {
    let mut rng = rand::rng();
    (0..BACKUP_CODE_LEN)
        .map(|_| {
            let idx: usize = rng.random_range(0..BACKUP_CODE_ALPHABET.len());
            BACKUP_CODE_ALPHABET[idx] as char
        })
        .collect()
}

/// Strips separators and uppercases; anything outside the alphabet or of
/// the wrong length is rejected.
fn normalize_backup_code(input: &str) -> Option<String> {
    let normalized: String = input
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect();

    if normalized.len() != BACKUP_CODE_LEN {
        return None;
    }
    if !normalized
        .bytes()
        .all(|b| BACKUP_CODE_ALPHABET.contains(&b))
    {
        return None;
    }
    Some(normalized)
}

fn format_backup_code(normalized: &str) -> String {
    normalized
        .as_bytes()
        .chunks(BACKUP_CODE_GROUP_SIZE)
        .map(|chunk| std::str::from_utf8(chunk).unwrap_or_default())
        .collect::<Vec<_>>()
        .join("-")
}

fn digest_backup_code(normalized: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())
}

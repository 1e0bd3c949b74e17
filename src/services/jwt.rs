use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Access-token claims. `sub` is the user id, `sid` the session id, `aal`
/// the authentication assurance level the session was established at.
#[derive(Debug, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: String,
    pub email: String,
    pub aal: u8,
    pub sid: String,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
}

/// What a completed authentication hands back to the client.
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
}

pub struct TokenService {
    secret: String,
    issuer: String,
    access_token_duration: Duration,
    refresh_token_duration: Duration,
}

impl TokenService {
    pub fn new(secret: String, issuer: String, access_ttl_secs: i64, refresh_ttl_secs: i64) -> Self {
        Self {
            secret,
            issuer,
            access_token_duration: Duration::seconds(access_ttl_secs),
            refresh_token_duration: Duration::seconds(refresh_ttl_secs),
        }
    }

    pub fn generate_access_token(
        &self,
        user_id: &str,
        email: &str,
        aal: u8,
        session_id: &str,
    ) -> Result<(String, DateTime<Utc>), jsonwebtoken::errors::Error> {
        let now = Utc::now();
        let exp = now + self.access_token_duration;

        let claims = AccessClaims {
            sub: user_id.to_string(),
            email: email.to_string(),
            aal,
            sid: session_id.to_string(),
            iat: now.timestamp(),
            exp: exp.timestamp(),
            iss: self.issuer.clone(),
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )?;
        Ok((token, exp))
    }

    /// Refresh tokens carry no payload. They only mean anything as a lookup
    /// key into the session ledger, which is what makes revocation immediate.
    pub fn generate_refresh_token(&self) -> String {
        super::hashing::generate_secure_token(32)
    }

    pub fn generate_token_pair(
        &self,
        user_id: &str,
        email: &str,
        aal: u8,
        session_id: &str,
    ) -> Result<TokenPair, jsonwebtoken::errors::Error> {
        let (access_token, _) = self.generate_access_token(user_id, email, aal, session_id)?;
        Ok(TokenPair {
            access_token,
            refresh_token: self.generate_refresh_token(),
            token_type: "Bearer",
            expires_in: self.access_token_duration.num_seconds(),
        })
    }

    /// Signature, expiry (zero leeway), and issuer are all checked; the
    /// caller sees one unauthorized-class failure regardless of which.
    pub fn validate_access_token(
        &self,
        token: &str,
    ) -> Result<AccessClaims, jsonwebtoken::errors::Error> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_issuer(&[&self.issuer]);

        let data = decode::<AccessClaims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )?;
        Ok(data.claims)
    }

    /// Deterministic SHA-256 hex fingerprint. Stored in place of raw access
    /// tokens so the ledger never holds a usable credential.
    pub fn hash_token(&self, token: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn access_token_duration_secs(&self) -> i64 {
        self.access_token_duration.num_seconds()
    }

    pub fn refresh_token_expiry(&self) -> DateTime<Utc> {
        Utc::now() + self.refresh_token_duration
    }

    /// Seconds until the given claims expire, floored at zero. Drives the
    /// blacklist TTL on logout.
    pub fn residual_ttl_secs(&self, claims: &AccessClaims) -> i64 {
        let exp = Utc.timestamp_opt(claims.exp, 0).single().unwrap_or_else(Utc::now);
        (exp - Utc::now()).num_seconds().max(0)
    }
}

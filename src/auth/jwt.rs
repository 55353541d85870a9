use std::time::Duration;

use axum::extract::FromRef;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::debug;

use crate::config::JwtConfig;
use crate::state::AppState;

/// Bearer token payload. The subject is the account id carried as its
/// string form; callers parse it back and must treat a bad parse as an
/// authentication failure.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
    pub iat: usize,
    pub iss: String,
    pub aud: String,
}

#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    #[error("token expired")]
    Expired,
    #[error("invalid token")]
    Invalid,
}

/// Holds JWT signing and verification keys with config data.
#[derive(Clone)]
pub struct JwtKeys {
    pub encoding: EncodingKey,
    pub decoding: DecodingKey,
    pub issuer: String,
    pub audience: String,
    pub ttl: Duration,
}

impl FromRef<AppState> for JwtKeys {
    fn from_ref(state: &AppState) -> Self {
        let JwtConfig {
            secret,
            issuer,
            audience,
            ttl_minutes,
        } = state.config.jwt.clone();
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            issuer,
            audience,
            ttl: Duration::from_secs((ttl_minutes as u64) * 60),
        }
    }
}

impl JwtKeys {
    /// Sign a token for `account_id` with the configured ttl.
    pub fn sign(&self, account_id: i64) -> anyhow::Result<String> {
        self.sign_with_ttl(account_id, TimeDuration::seconds(self.ttl.as_secs() as i64))
    }

    pub fn sign_with_ttl(&self, account_id: i64, ttl: TimeDuration) -> anyhow::Result<String> {
        let now = OffsetDateTime::now_utc();
        let exp = now + ttl;
        let claims = Claims {
            sub: account_id.to_string(),
            iat: now.unix_timestamp() as usize,
            exp: exp.unix_timestamp() as usize,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };
        let token = encode(&Header::default(), &claims, &self.encoding)?;
        debug!(account_id, "jwt signed");
        Ok(token)
    }

    /// Decode and check the signature, then the expiry. Expiry is exact: a
    /// token is rejected once the current time is at or past `exp`, with no
    /// leeway.
    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        let mut validation = Validation::default();
        // Expiry is checked below so the boundary is inclusive.
        validation.validate_exp = false;
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        let data = decode::<Claims>(token, &self.decoding, &validation).map_err(|e| {
            debug!(error = %e, "jwt rejected");
            TokenError::Invalid
        })?;
        if data.claims.exp as i64 <= OffsetDateTime::now_utc().unix_timestamp() {
            return Err(TokenError::Expired);
        }
        debug!(subject = %data.claims.sub, "jwt verified");
        Ok(data.claims)
    }
}

#[cfg(test)]
pub fn test_keys() -> JwtKeys {
    JwtKeys {
        encoding: EncodingKey::from_secret(b"test-secret"),
        decoding: DecodingKey::from_secret(b"test-secret"),
        issuer: "test-issuer".into(),
        audience: "test-aud".into(),
        ttl: Duration::from_secs(300),
    }
}

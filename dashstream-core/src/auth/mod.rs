//! Authentication gate: session tokens, admin credentials and login rate limiting.

pub mod identity;
pub mod jwt;
pub mod password;
pub mod rate_limit;

use ed25519_dalek::SigningKey;
use std::net::IpAddr;
use tracing::warn;

use crate::{config::AuthConfig, error::AuthError, models::auth::AuthClaims};
use jwt::JwtAuth;
use rate_limit::RateLimiter;

pub struct AuthGate {
    username: String,
    password_hash: Option<String>,
    jwt: JwtAuth,
    limiter: RateLimiter,
}

impl AuthGate {
    pub fn new(config: &AuthConfig, signing_key: &SigningKey) -> Result<Self, AuthError> {
        if let Some(hash) = &config.password_hash {
            argon2::password_hash::PasswordHash::new(hash)
                .map_err(|e| AuthError::InvalidPasswordHash(e.to_string()))?;
        }

        Ok(Self {
            username: config.username.clone(),
            password_hash: config.password_hash.clone(),
            jwt: JwtAuth::new(signing_key, config.session_timeout)?,
            limiter: RateLimiter::new(config.rate_limit.clone()),
        })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn identity(&self) -> &str {
        self.jwt.identity()
    }

    pub fn issue_token(&self, subject: &str) -> Result<String, AuthError> {
        self.jwt.issue(subject)
    }

    /// False on any malformed, forged or expired token, or when `predicate`
    /// rejects the claims.
    pub fn verify_token<P>(&self, token: &str, predicate: P) -> bool
    where
        P: FnOnce(&AuthClaims) -> bool,
    {
        self.jwt.decode(token).is_some_and(|claims| predicate(&claims))
    }

    /// Token issued to the configured admin user.
    pub fn verify_admin_token(&self, token: &str) -> bool {
        self.verify_token(token, |claims| claims.verify_subject(&self.username))
    }

    pub fn verify_credentials(&self, username: &str, password: &str) -> bool {
        let Some(hash) = &self.password_hash else {
            return false;
        };
        if username != self.username {
            return false;
        }

        match password::verify_password(password, hash) {
            Ok(valid) => valid,
            Err(e) => {
                warn!(error = %e, "password verification failed");
                false
            }
        }
    }

    pub fn allow_auth_attempt(&self, client: IpAddr) -> bool {
        self.limiter.allow(client)
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }
}

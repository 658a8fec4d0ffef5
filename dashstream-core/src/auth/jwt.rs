//! EdDSA session tokens signed with the node identity.

use chrono::Utc;
use ed25519_dalek::{SigningKey, pkcs8::EncodePrivateKey};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use std::time::Duration;

use crate::{auth::identity::identity_of, error::AuthError, models::auth::AuthClaims};

pub struct JwtAuth {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    identity: String,
    session_timeout: Duration,
}

impl JwtAuth {
    pub fn new(signing_key: &SigningKey, session_timeout: Duration) -> Result<Self, AuthError> {
        let der = signing_key
            .to_pkcs8_der()
            .map_err(|_| AuthError::KeyUnavailable)?;
        let identity = identity_of(signing_key);

        let mut validation = Validation::new(Algorithm::EdDSA);
        validation.set_issuer(&[identity.as_str()]);
        validation.set_audience(&[identity.as_str()]);
        validation.set_required_spec_claims(&["exp", "nbf", "iss", "aud", "sub"]);
        validation.validate_nbf = true;
        validation.leeway = 0;

        Ok(Self {
            encoding_key: EncodingKey::from_ed_der(der.as_bytes()),
            decoding_key: DecodingKey::from_ed_der(signing_key.verifying_key().as_bytes()),
            validation,
            identity,
            session_timeout,
        })
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn issue(&self, subject: &str) -> Result<String, AuthError> {
        let now = Utc::now().timestamp();
        self.sign(&self.claims_at(subject, now))
    }

    pub(crate) fn claims_at(&self, subject: &str, issued_at: i64) -> AuthClaims {
        AuthClaims {
            sub: subject.to_string(),
            iss: self.identity.clone(),
            aud: self.identity.clone(),
            iat: issued_at,
            nbf: issued_at,
            exp: issued_at.saturating_add(self.lifetime_secs()),
        }
    }

    fn lifetime_secs(&self) -> i64 {
        i64::try_from(self.session_timeout.as_secs()).unwrap_or(i64::MAX)
    }

    pub(crate) fn sign(&self, claims: &AuthClaims) -> Result<String, AuthError> {
        Ok(encode(
            &Header::new(Algorithm::EdDSA),
            claims,
            &self.encoding_key,
        )?)
    }

    /// Decoded claims if signature, expiry, issuer and audience all check out.
    pub fn decode(&self, token: &str) -> Option<AuthClaims> {
        decode::<AuthClaims>(token, &self.decoding_key, &self.validation)
            .ok()
            .map(|data| data.claims)
    }
}

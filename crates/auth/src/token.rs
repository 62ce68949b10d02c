//! Access-token signing and refresh-secret handling.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand_core::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;

use keystone_core::PrincipalId;

use crate::claims::{AccessClaims, ClaimsError, validate_claims};

/// Raw refresh secret length in bytes (hex-encoded to twice this).
pub const REFRESH_SECRET_BYTES: usize = 48;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("token signing failed: {0}")]
    Signing(String),

    #[error("token is malformed or has a bad signature")]
    Invalid,

    #[error(transparent)]
    Claims(#[from] ClaimsError),
}

/// HS256 signer/verifier for short-lived access tokens.
#[derive(Clone)]
pub struct AccessTokenSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl AccessTokenSigner {
    pub fn new(secret: &[u8], ttl: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        // The time window is checked against the caller's clock in `verify`.
        validation.validate_exp = false;
        validation.set_required_spec_claims(&["exp", "iat", "sub"]);

        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the compact JWT and its expiry.
    pub fn issue(&self, principal_id: PrincipalId, now: DateTime<Utc>) -> Result<(String, DateTime<Utc>), TokenError> {
        let expires_at = now + self.ttl;
        let claims = AccessClaims {
            sub: principal_id,
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| TokenError::Signing(e.to_string()))?;
        Ok((token, expires_at))
    }

    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<AccessClaims, TokenError> {
        let data = decode::<AccessClaims>(token, &self.decoding, &self.validation)
            .map_err(|_| TokenError::Invalid)?;
        validate_claims(&data.claims, now)?;
        Ok(data.claims)
    }
}

impl core::fmt::Debug for AccessTokenSigner {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AccessTokenSigner").field("ttl", &self.ttl).finish_non_exhaustive()
    }
}

/// Opaque refresh secret handed to the client exactly once.
#[derive(Clone, PartialEq, Eq)]
pub struct RefreshSecret(String);

impl RefreshSecret {
    /// 48 bytes from the OS CSPRNG, hex-encoded.
    pub fn generate() -> Self {
        let mut bytes = [0u8; REFRESH_SECRET_BYTES];
        rand_core::OsRng.fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Debug for RefreshSecret {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("RefreshSecret(..)")
    }
}

/// Digest stored in place of a refresh secret.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RefreshTokenHash(String);

impl RefreshTokenHash {
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Salted SHA-256 over refresh secrets: `hex(sha256(salt || raw))`.
///
/// The salt is deployment-wide so a lookup stays a single equality match.
#[derive(Clone)]
pub struct RefreshTokenHasher {
    salt: Vec<u8>,
}

impl RefreshTokenHasher {
    pub fn new(salt: impl Into<Vec<u8>>) -> Self {
        Self { salt: salt.into() }
    }

    pub fn hash(&self, secret: &RefreshSecret) -> RefreshTokenHash {
        let mut hasher = Sha256::new();
        hasher.update(&self.salt);
        hasher.update(secret.expose().as_bytes());
        RefreshTokenHash(hex::encode(hasher.finalize()))
    }
}

impl core::fmt::Debug for RefreshTokenHasher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("RefreshTokenHasher(..)")
    }
}

//! Password hashing (Argon2id, PHC strings).

use argon2::password_hash::{self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PasswordError {
    #[error("invalid argon2 parameters: {0}")]
    Params(String),

    #[error("password hashing failed: {0}")]
    Hash(String),

    #[error("stored password hash is malformed")]
    MalformedHash,
}

/// A PHC-formatted password hash. Debug output is redacted.
#[derive(Clone, PartialEq, Eq)]
pub struct HashedPassword(String);

impl HashedPassword {
    /// Wrap a PHC string loaded from storage.
    pub fn from_phc(phc: impl Into<String>) -> Self {
        Self(phc.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Debug for HashedPassword {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("HashedPassword(..)")
    }
}

/// Argon2id hasher with a precomputed dummy hash for unknown-account logins.
#[derive(Clone)]
pub struct PasswordHasherService {
    argon2: Argon2<'static>,
    dummy: HashedPassword,
}

impl PasswordHasherService {
    /// Library-default cost parameters (19 MiB, t=2, p=1).
    pub fn new() -> Result<Self, PasswordError> {
        Self::with_params(Params::default())
    }

    pub fn with_params(params: Params) -> Result<Self, PasswordError> {
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
        let dummy = hash_with(&argon2, "keystone-dummy-password")?;
        Ok(Self { argon2, dummy })
    }

    /// Cheap parameters for tests.
    pub fn fast() -> Result<Self, PasswordError> {
        let params = Params::new(Params::MIN_M_COST, 1, 1, None)
            .map_err(|e| PasswordError::Params(e.to_string()))?;
        Self::with_params(params)
    }

    pub fn hash(&self, password: &str) -> Result<HashedPassword, PasswordError> {
        hash_with(&self.argon2, password)
    }

    /// `Ok(false)` on mismatch; `Err` only when the stored hash cannot be parsed.
    pub fn verify(&self, password: &str, hash: &HashedPassword) -> Result<bool, PasswordError> {
        let parsed = PasswordHash::new(hash.as_str()).map_err(|_| PasswordError::MalformedHash)?;
        match self.argon2.verify_password(password.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(password_hash::Error::Password) => Ok(false),
            Err(e) => Err(PasswordError::Hash(e.to_string())),
        }
    }

    /// Burn one verification against the dummy hash. Always returns false.
    pub fn verify_dummy(&self, password: &str) -> bool {
        let _ = self.verify(password, &self.dummy);
        false
    }
}

fn hash_with(argon2: &Argon2<'static>, password: &str) -> Result<HashedPassword, PasswordError> {
    let salt = SaltString::generate(&mut rand_core::OsRng);
    let phc = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| PasswordError::Hash(e.to_string()))?
        .to_string();
    Ok(HashedPassword(phc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify() {
        let hasher = PasswordHasherService::fast().unwrap();
        let hash = hasher.hash("correct horse").unwrap();

        assert!(hash.as_str().starts_with("$argon2id$"));
        assert!(hasher.verify("correct horse", &hash).unwrap());
        assert!(!hasher.verify("wrong horse", &hash).unwrap());
    }

    #[test]
    fn salts_are_unique_per_hash() {
        let hasher = PasswordHasherService::fast().unwrap();
        let a = hasher.hash("same").unwrap();
        let b = hasher.hash("same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn malformed_hash_is_an_error_not_a_mismatch() {
        let hasher = PasswordHasherService::fast().unwrap();
        let err = hasher.verify("pw", &HashedPassword::from_phc("plaintext")).unwrap_err();
        assert_eq!(err, PasswordError::MalformedHash);
    }

    #[test]
    fn dummy_never_matches() {
        let hasher = PasswordHasherService::fast().unwrap();
        assert!(!hasher.verify_dummy("keystone-dummy-password"));
    }

    #[test]
    fn debug_is_redacted() {
        let h = HashedPassword::from_phc("$argon2id$secret");
        assert_eq!(format!("{h:?}"), "HashedPassword(..)");
    }
}

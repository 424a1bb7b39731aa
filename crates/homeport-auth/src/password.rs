//! Share password hashing and verification using Argon2id
//!
//! Hashes are stored in the port registry in PHC string form
//! (`$argon2id$v=19$m=...,t=...,p=...$salt$hash`) and treated as opaque
//! everywhere else.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PasswordError {
    #[error("Failed to hash password: {0}")]
    HashingFailed(String),

    #[error("Failed to verify password: {0}")]
    VerificationFailed(String),

    #[error("Stored password hash is malformed: {0}")]
    InvalidHashFormat(String),
}

/// Hash a share password with a fresh random salt.
///
/// Uses the Argon2id defaults (19 MiB memory, 2 iterations, 1 lane) and a
/// 16-byte random salt. Argon2 is slow on purpose; callers on an async
/// runtime should run this on a blocking thread.
///
/// # Arguments
/// * `password` - The plain text share password
///
/// # Returns
/// * `Ok(String)` - PHC-formatted hash, stored as the port's password hash
/// * `Err(PasswordError)` - If hashing fails
///
/// # Example
/// ```
/// use homeport_auth::hash_password;
///
/// let hash = hash_password("hunter22").unwrap();
/// assert!(hash.starts_with("$argon2id$"));
/// ```
pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| PasswordError::HashingFailed(e.to_string()))
}

/// Check a submitted password against a stored PHC hash.
///
/// # Arguments
/// * `password` - The password submitted on the challenge form
/// * `hash` - The PHC-formatted hash from the port record
///
/// # Returns
/// * `Ok(true)` - Password matches
/// * `Ok(false)` - Password does not match
/// * `Err(PasswordError)` - If the hash is malformed or verification fails
///
/// # Example
/// ```
/// use homeport_auth::{hash_password, verify_password};
///
/// let hash = hash_password("hunter22").unwrap();
/// assert!(verify_password("hunter22", &hash).unwrap());
/// assert!(!verify_password("hunter23", &hash).unwrap());
/// ```
pub fn verify_password(password: &str, hash: &str) -> Result<bool, PasswordError> {
    let parsed =
        PasswordHash::new(hash).map_err(|e| PasswordError::InvalidHashFormat(e.to_string()))?;

    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(PasswordError::VerificationFailed(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_argon2id_phc() {
        let hash = hash_password("secret123").expect("hash");
        assert!(hash.starts_with("$argon2id$v=19$"));
    }

    #[test]
    fn test_verify_matches_and_rejects() {
        let hash = hash_password("secret123").expect("hash");
        assert!(verify_password("secret123", &hash).unwrap());
        assert!(!verify_password("secret124", &hash).unwrap());
        assert!(!verify_password("SECRET123", &hash).unwrap());
    }

    #[test]
    fn test_same_password_gets_distinct_salts() {
        let a = hash_password("hunter2").unwrap();
        let b = hash_password("hunter2").unwrap();
        assert_ne!(a, b);
        assert!(verify_password("hunter2", &a).unwrap());
        assert!(verify_password("hunter2", &b).unwrap());
    }

    #[test]
    fn test_malformed_hash_is_an_error() {
        let result = verify_password("anything", "not-a-phc-string");
        assert!(matches!(result, Err(PasswordError::InvalidHashFormat(_))));
    }
}

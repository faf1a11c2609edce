//! Argon2 password hashing. Only Argon2 hashes are ever produced or
//! accepted; legacy formats are rejected at verification time.

use argon2::password_hash::{rand_core::OsRng, SaltString};
use argon2::{PasswordHasher, PasswordVerifier};
use strata_query::{Result, StoreError};
use tracing::error;

/// Hash a clear-text password into a PHC-format Argon2 string
pub fn hash_password(clear: &str) -> Result<String> {
    let argon2 = argon2::Argon2::default();
    let salt = SaltString::generate(&mut OsRng);
    Ok(argon2
        .hash_password(clear.as_bytes(), &salt)
        .map_err(|e| StoreError::backend(format!("password hashing failed: {}", e)))?
        .to_string())
}

/// Check a clear-text password against a stored hash
///
/// Unparseable or non-Argon2 hashes verify as false rather than erroring;
/// a stored-data problem must not be distinguishable from a wrong password.
pub fn verify_password(clear: &str, stored_hash: &str) -> bool {
    let parsed = match argon2::password_hash::PasswordHash::new(stored_hash) {
        Ok(hash) => hash,
        Err(e) => {
            error!("failed to parse stored password hash: {}", e);
            return false;
        }
    };
    argon2::Argon2::default()
        .verify_password(clear.as_bytes(), &parsed)
        .is_ok()
}

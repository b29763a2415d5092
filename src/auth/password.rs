use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use lazy_static::lazy_static;
use rand::rngs::OsRng;
use tracing::{error, warn};

lazy_static! {
    /// Digest checked when the account does not exist, so unknown emails cost
    /// the same as wrong passwords.
    static ref DUMMY_HASH: String = hash_password("authgate-dummy-password")
        .unwrap_or_default();
}

pub fn hash_password(plain: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| {
            error!(error = %e, "argon2 hash_password error");
            anyhow::anyhow!(e.to_string())
        })?
        .to_string();
    Ok(hash)
}

fn argon2_matches(plain: &str, parsed: &PasswordHash<'_>) -> bool {
    Argon2::default()
        .verify_password(plain.as_bytes(), parsed)
        .is_ok()
}

/// Malformed or empty digests never match, but still cost one full
/// verification against the dummy digest.
pub fn verify_password(plain: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => argon2_matches(plain, &parsed),
        Err(e) => {
            if !hash.is_empty() {
                warn!(error = %e, "stored password hash is malformed");
            }
            verify_against_dummy(plain);
            false
        }
    }
}

/// Burns one verification against the dummy digest.
pub fn verify_against_dummy(plain: &str) {
    if let Ok(parsed) = PasswordHash::new(&DUMMY_HASH) {
        let _ = argon2_matches(plain, &parsed);
    }
}

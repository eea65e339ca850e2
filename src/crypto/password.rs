use argon2::Argon2;
use rand::Rng;

use crate::error::AppError;

pub const SALT_LEN: usize = 32;
pub const HASH_LEN: usize = 32;

/// Generate a cryptographically secure random salt
pub fn generate_salt() -> [u8; SALT_LEN] {
    rand::thread_rng().gen()
}

/// Hash a password with Argon2id using the provided salt
pub fn hash_password(password: &str, salt: &[u8]) -> Result<[u8; HASH_LEN], AppError> {
    let argon2 = Argon2::default();
    let mut hash = [0u8; HASH_LEN];

    argon2
        .hash_password_into(password.as_bytes(), salt, &mut hash)
        .map_err(|e| AppError::Internal(format!("Password hashing failed: {}", e)))?;

    Ok(hash)
}

/// Verify a password against a stored hash and salt
pub fn verify_password(
    password: &str,
    stored_hash: &[u8; HASH_LEN],
    salt: &[u8],
) -> Result<bool, AppError> {
    let computed_hash = hash_password(password, salt)?;
    Ok(computed_hash == *stored_hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_verify() {
        let password = "correct horse battery";
        let salt = generate_salt();

        let hash = hash_password(password, &salt).unwrap();
        assert!(verify_password(password, &hash, &salt).unwrap());
        assert!(!verify_password("wrong password", &hash, &salt).unwrap());
    }

    #[test]
    fn test_salt_changes_hash() {
        let password = "correct horse battery";
        let first = hash_password(password, &generate_salt()).unwrap();
        let second = hash_password(password, &generate_salt()).unwrap();
        assert_ne!(first, second);
    }
}

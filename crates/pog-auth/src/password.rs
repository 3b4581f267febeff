//! Password hashing and verification using bcrypt

use thiserror::Error;

/// Error types for password operations
#[derive(Error, Debug)]
pub enum PasswordError {
    /// Failed to hash password
    #[error("Failed to hash password: {0}")]
    HashingFailed(String),

    /// Stored digest is not a bcrypt hash
    #[error("Invalid password hash format: {0}")]
    InvalidHashFormat(String),
}

/// Hash a password with the bcrypt default cost
///
/// # Example
/// ```
/// use pog_auth::password::{hash_password_with_cost, verify_password};
///
/// let hash = hash_password_with_cost("MySecurePassword123!", 4).unwrap();
/// assert!(hash.starts_with("$2"));
/// assert!(verify_password("MySecurePassword123!", &hash).unwrap());
/// ```
pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    hash_password_with_cost(password, bcrypt::DEFAULT_COST)
}

/// Hash a password with an explicit bcrypt cost (4..=31)
pub fn hash_password_with_cost(password: &str, cost: u32) -> Result<String, PasswordError> {
    bcrypt::hash(password, cost).map_err(|e| PasswordError::HashingFailed(e.to_string()))
}

/// Verify a password against a bcrypt hash
///
/// # Returns
/// * `Ok(true)` - Password matches hash
/// * `Ok(false)` - Password does not match hash
/// * `Err(PasswordError)` - If the hash cannot be parsed
pub fn verify_password(password: &str, hash: &str) -> Result<bool, PasswordError> {
    bcrypt::verify(password, hash).map_err(|e| PasswordError::InvalidHashFormat(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    // lowest cost bcrypt accepts
    const COST: u32 = 4;

    #[test]
    fn test_hash_password_produces_bcrypt_hash() {
        let hash = hash_password_with_cost("TestPassword123!", COST).unwrap();

        assert!(hash.starts_with("$2"));
        assert_eq!(hash.len(), 60);
    }

    #[test]
    fn test_verify_password() {
        let hash = hash_password_with_cost("CorrectPassword123!", COST).unwrap();

        assert!(verify_password("CorrectPassword123!", &hash).unwrap());
        assert!(!verify_password("WrongPassword123!", &hash).unwrap());
        assert!(!verify_password("correctpassword123!", &hash).unwrap());
    }

    #[test]
    fn test_verify_password_invalid_hash() {
        let result = verify_password("AnyPassword", "invalid_hash_format");
        assert!(matches!(result, Err(PasswordError::InvalidHashFormat(_))));
    }

    #[test]
    fn test_hash_password_different_salts() {
        let hash1 = hash_password_with_cost("SamePassword123!", COST).unwrap();
        let hash2 = hash_password_with_cost("SamePassword123!", COST).unwrap();

        assert_ne!(hash1, hash2);
        assert!(verify_password("SamePassword123!", &hash1).unwrap());
        assert!(verify_password("SamePassword123!", &hash2).unwrap());
    }

    #[test]
    fn test_hash_password_unicode() {
        let password = "🔐Password123!日本語";
        let hash = hash_password_with_cost(password, COST).unwrap();
        assert!(verify_password(password, &hash).unwrap());
    }
}

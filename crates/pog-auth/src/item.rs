//! A single credential entry

use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::password::{hash_password_with_cost, PasswordError};

/// One account: name, bcrypt digest and expiry.
///
/// Serialized form is the JSON accepted in `POG_AUTH_*` / `CLIENT_AUTH_*`
/// variables:
///
/// ```json
/// {"name":"alice","hash":"$2b$12$...","exp_date":"2025-01-01T00:00:00Z"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthItem {
    pub name: String,
    pub hash: String,
    pub exp_date: DateTime<Utc>,
}

/// Why an [`AuthItem`] could not be generated
#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("expiry date is out of range")]
    ExpiryOutOfRange,

    #[error(transparent)]
    Password(#[from] PasswordError),
}

impl AuthItem {
    /// Create an item for `name` valid for `ttl` from now
    pub fn generate(name: &str, password: &str, ttl: Duration) -> Result<Self, GenerateError> {
        Self::generate_with_cost(name, password, ttl, bcrypt::DEFAULT_COST)
    }

    pub fn generate_with_cost(
        name: &str,
        password: &str,
        ttl: Duration,
        cost: u32,
    ) -> Result<Self, GenerateError> {
        let exp_date = Utc::now()
            .checked_add_signed(ttl)
            .ok_or(GenerateError::ExpiryOutOfRange)?
            .trunc_subsecs(0);

        Ok(Self {
            name: name.to_string(),
            hash: hash_password_with_cost(password, cost)?,
            exp_date,
        })
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.exp_date <= now
    }
}

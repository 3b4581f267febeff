//! HTTP Basic credentials (RFC 7617)
//!
//! ```text
//! Authorization: Basic <base64(username:password)>
//! ```
//!
//! Decoding errors never echo the token, it carries the password.

use std::fmt;

use base64::Engine;

use crate::store::AuthError;

/// Decoded `user:password` pair
#[derive(Clone, PartialEq, Eq)]
pub struct BasicCredentials {
    pub user: String,
    pub password: String,
}

impl fmt::Debug for BasicCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicCredentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Decode an `Authorization` / `Proxy-Authorization` header value
pub fn decode_basic(header: &str) -> Result<BasicCredentials, AuthError> {
    let header = header.trim();
    if header.is_empty() {
        return Err(AuthError::Missing);
    }

    // Check for "Basic " prefix (case-insensitive)
    let encoded = match header.get(..6) {
        Some(scheme) if scheme.eq_ignore_ascii_case("basic ") => header[6..].trim(),
        _ => return Err(AuthError::UnsupportedScheme),
    };

    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|_| AuthError::InvalidEncoding)?;
    let decoded = String::from_utf8(decoded).map_err(|_| AuthError::InvalidEncoding)?;

    let (user, password) = decoded
        .split_once(':')
        .ok_or(AuthError::MissingSeparator)?;

    Ok(BasicCredentials {
        user: user.to_string(),
        password: password.to_string(),
    })
}

/// Encode `user:password` as a Basic header value
pub fn encode_basic(user_pass: &str) -> String {
    format!(
        "Basic {}",
        base64::engine::general_purpose::STANDARD.encode(user_pass)
    )
}

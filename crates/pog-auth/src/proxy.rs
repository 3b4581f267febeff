//! CONNECT-level proxy authorization

use http::header::PROXY_AUTHORIZATION;
use http::HeaderMap;

use crate::store::{AuthError, CredentialStore};
use crate::ANONYMOUS;

/// Authorize a CONNECT request, returning the user name.
///
/// An empty store authorizes everyone as `anonymous`.
pub fn check_proxy_auth(headers: &HeaderMap, store: &CredentialStore) -> Result<String, AuthError> {
    if store.is_empty() {
        return Ok(ANONYMOUS.to_string());
    }

    let header = headers
        .get(PROXY_AUTHORIZATION)
        .ok_or(AuthError::Missing)?
        .to_str()
        .map_err(|_| AuthError::InvalidEncoding)?;

    store.authenticate_header(header)
}

/// `Proxy-Authenticate` challenge naming the credential list in use
pub fn proxy_challenge(prefix: &str) -> String {
    format!("Basic realm=\"{}* list\"", prefix.replace('"', "\\\""))
}

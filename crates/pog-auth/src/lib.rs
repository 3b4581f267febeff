//! Authentication for the proxy
//!
//! Two boundaries use the same credential format but separate lists:
//!
//! - the gRPC channel, checked by [`AuthInterceptor`] on the server and fed
//!   by [`BasicAuthCredentials`] on the client;
//! - the HTTP CONNECT front end, checked by [`check_proxy_auth`].
//!
//! Credential lists come from environment variables under a prefix, each
//! holding one JSON [`AuthItem`].

pub mod basic;
pub mod interceptor;
pub mod item;
pub mod password;
pub mod proxy;
pub mod store;

pub use basic::{decode_basic, encode_basic, BasicCredentials};
pub use interceptor::{AuthInterceptor, AuthenticatedUser, BasicAuthCredentials};
pub use item::{AuthItem, GenerateError};
pub use password::{hash_password, hash_password_with_cost, verify_password, PasswordError};
pub use proxy::{check_proxy_auth, proxy_challenge};
pub use store::{AuthConfigError, AuthError, CredentialStore};

/// Identity used when a boundary has no credential list configured
pub const ANONYMOUS: &str = "anonymous";

/// Env prefix of the gRPC channel credential list
pub const SERVER_AUTH_PREFIX: &str = "POG_AUTH_";

/// Env prefix of the CONNECT-level credential list
pub const CLIENT_AUTH_PREFIX: &str = "CLIENT_AUTH_";

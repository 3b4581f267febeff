//! Credential lists and the checks against them

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, warn};

use crate::basic::decode_basic;
use crate::item::AuthItem;
use crate::password::verify_password;

/// Why a presented credential was rejected.
///
/// Messages never include the password or the raw token.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("received empty authorization token from client")]
    Missing,

    #[error("authorization token is not of the Basic scheme")]
    UnsupportedScheme,

    #[error("authorization token is not valid base64")]
    InvalidEncoding,

    #[error("authorization token misses ':' for the formatting user:password")]
    MissingSeparator,

    #[error("wrong user and/or password")]
    WrongCredentials,

    #[error("expired user account")]
    Expired,
}

/// A credential entry in the environment could not be parsed
#[derive(Debug, Error)]
pub enum AuthConfigError {
    #[error("failed to parse {key} auth item: {source}")]
    InvalidItem {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Immutable list of accounts for one auth boundary.
///
/// An empty store means the boundary is open.
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    items: Vec<AuthItem>,
}

impl CredentialStore {
    pub fn new(items: Vec<AuthItem>) -> Self {
        Self { items }
    }

    /// Parse every process environment variable whose name starts with `prefix`
    pub fn from_env(prefix: &str) -> Result<Self, AuthConfigError> {
        let vars = std::env::vars_os().filter_map(|(key, value)| {
            Some((key.into_string().ok()?, value.into_string().ok()?))
        });
        Self::from_vars(prefix, vars)
    }

    /// Parse `(key, value)` pairs; any malformed entry under `prefix` aborts parsing
    pub fn from_vars<I>(prefix: &str, vars: I) -> Result<Self, AuthConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut entries: Vec<_> = vars
            .into_iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let mut items = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            let item: AuthItem = serde_json::from_str(&value)
                .map_err(|source| AuthConfigError::InvalidItem { key, source })?;
            items.push(item);
        }

        debug!(prefix, count = items.len(), "loaded auth items");
        Ok(Self { items })
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn authenticate(&self, user: &str, password: &str) -> Result<(), AuthError> {
        self.authenticate_at(user, password, Utc::now())
    }

    /// Succeeds iff some item named `user` matches `password` and has not
    /// expired at `now`. A matching but expired account reports `Expired`.
    pub fn authenticate_at(
        &self,
        user: &str,
        password: &str,
        now: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        let mut expired = false;

        for item in self.items.iter().filter(|item| item.name == user) {
            match verify_password(password, &item.hash) {
                Ok(true) if item.is_expired_at(now) => expired = true,
                Ok(true) => return Ok(()),
                Ok(false) => {}
                Err(e) => warn!(user, "skipping auth item: {}", e),
            }
        }

        if expired {
            Err(AuthError::Expired)
        } else {
            Err(AuthError::WrongCredentials)
        }
    }

    /// Check a Basic header value, returning the authenticated user name
    pub fn authenticate_header(&self, header: &str) -> Result<String, AuthError> {
        let creds = decode_basic(header)?;
        self.authenticate(&creds.user, &creds.password)?;
        Ok(creds.user)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::basic::encode_basic;
    use chrono::Duration;

    pub(crate) fn item(name: &str, password: &str, ttl: Duration) -> AuthItem {
        AuthItem::generate_with_cost(name, password, ttl, 4).unwrap()
    }

    fn var(key: &str, item: &AuthItem) -> (String, String) {
        (key.to_string(), serde_json::to_string(item).unwrap())
    }

    #[test]
    fn test_from_vars_filters_prefix() {
        let alice = item("alice", "pw", Duration::days(1));
        let store = CredentialStore::from_vars(
            "POG_AUTH_",
            vec![
                var("POG_AUTH_ALICE", &alice),
                ("PATH".to_string(), "/usr/bin".to_string()),
                ("CLIENT_AUTH_X".to_string(), "not json".to_string()),
            ],
        )
        .unwrap();

        assert_eq!(store.len(), 1);
        assert!(store.authenticate("alice", "pw").is_ok());
    }

    #[test]
    fn test_malformed_entry_is_hard_error() {
        let alice = item("alice", "pw", Duration::days(1));
        let err = CredentialStore::from_vars(
            "POG_AUTH_",
            vec![
                var("POG_AUTH_ALICE", &alice),
                ("POG_AUTH_BROKEN".to_string(), "{\"name\":".to_string()),
            ],
        )
        .unwrap_err();

        assert!(err.to_string().contains("POG_AUTH_BROKEN"));
    }

    #[test]
    fn test_bad_exp_date_is_hard_error() {
        let result = CredentialStore::from_vars(
            "POG_AUTH_",
            vec![(
                "POG_AUTH_A".to_string(),
                r#"{"name":"a","hash":"h","exp_date":"2030-13-45"}"#.to_string(),
            )],
        );
        assert!(matches!(result, Err(AuthConfigError::InvalidItem { .. })));
    }

    #[test]
    fn test_empty_store() {
        let store = CredentialStore::from_vars("POG_AUTH_", Vec::new()).unwrap();
        assert!(store.is_empty());
        assert_eq!(
            store.authenticate("anyone", "pw"),
            Err(AuthError::WrongCredentials)
        );
    }

    #[test]
    fn test_authenticate_outcomes() {
        let now = Utc::now();
        let store = CredentialStore::new(vec![
            item("alice", "right", Duration::days(30)),
            item("old", "pw", Duration::days(-1)),
        ]);

        assert!(store.authenticate_at("alice", "right", now).is_ok());
        assert_eq!(
            store.authenticate_at("alice", "wrong", now),
            Err(AuthError::WrongCredentials)
        );
        assert_eq!(
            store.authenticate_at("mallory", "right", now),
            Err(AuthError::WrongCredentials)
        );
        // correct password on an expired account still fails
        assert_eq!(
            store.authenticate_at("old", "pw", now),
            Err(AuthError::Expired)
        );
        assert_eq!(
            store.authenticate_at("alice", "right", now + Duration::days(31)),
            Err(AuthError::Expired)
        );
    }

    #[test]
    fn test_any_live_item_with_same_name_matches() {
        let store = CredentialStore::new(vec![
            item("alice", "old-pw", Duration::days(-10)),
            item("alice", "new-pw", Duration::days(10)),
        ]);

        assert!(store.authenticate("alice", "new-pw").is_ok());
        assert_eq!(
            store.authenticate("alice", "old-pw"),
            Err(AuthError::Expired)
        );
    }

    #[test]
    fn test_authenticate_header() {
        let store = CredentialStore::new(vec![item("bob", "pw", Duration::days(1))]);

        assert_eq!(
            store.authenticate_header(&encode_basic("bob:pw")).unwrap(),
            "bob"
        );
        assert_eq!(
            store.authenticate_header(&encode_basic("bob:nope")),
            Err(AuthError::WrongCredentials)
        );
        assert_eq!(store.authenticate_header(""), Err(AuthError::Missing));
    }
}

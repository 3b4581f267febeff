//! tonic interceptors for the gRPC channel

use std::sync::Arc;

use tokio::runtime::{Handle, RuntimeFlavor};
use tonic::metadata::{errors::InvalidMetadataValue, AsciiMetadataValue};
use tonic::service::Interceptor;
use tonic::{Request, Status};
use tracing::{debug, warn};

use crate::basic::encode_basic;
use crate::store::{AuthError, CredentialStore};

/// Identity attached to a request by [`AuthInterceptor`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser(pub String);

/// Server side check of `authorization: Basic ...` call metadata.
///
/// With an empty store every call passes and no identity is attached.
#[derive(Debug, Clone)]
pub struct AuthInterceptor {
    store: Arc<CredentialStore>,
}

impl AuthInterceptor {
    pub fn new(store: Arc<CredentialStore>) -> Self {
        Self { store }
    }

    fn authenticate(&self, request: &Request<()>) -> Result<String, AuthError> {
        let header = request
            .metadata()
            .get("authorization")
            .ok_or(AuthError::Missing)?
            .to_str()
            .map_err(|_| AuthError::InvalidEncoding)?;

        off_worker(|| self.store.authenticate_header(header))
    }
}

/// Run a CPU-heavy check without starving the other tasks of this worker.
///
/// Interceptors are synchronous; on a multi-thread runtime `block_in_place`
/// hands the worker's queued tasks to another thread first. A current-thread
/// runtime has nowhere to move them, so the check runs inline there.
fn off_worker<R>(check: impl FnOnce() -> R) -> R {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(check)
        }
        _ => check(),
    }
}

impl Interceptor for AuthInterceptor {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        if self.store.is_empty() {
            return Ok(request);
        }

        match self.authenticate(&request) {
            Ok(user) => {
                debug!(user = %user, "rpc authenticated");
                request.extensions_mut().insert(AuthenticatedUser(user));
                Ok(request)
            }
            Err(e) => {
                warn!(remote_addr = ?request.remote_addr(), "rpc authentication failed: {}", e);
                Err(Status::unauthenticated(e.to_string()))
            }
        }
    }
}

/// Client side credentials added to every call
#[derive(Clone, Default)]
pub struct BasicAuthCredentials {
    header: Option<AsciiMetadataValue>,
}

impl std::fmt::Debug for BasicAuthCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicAuthCredentials")
            .field("configured", &self.header.is_some())
            .finish()
    }
}

impl BasicAuthCredentials {
    /// `user_pass` in `user:password` form
    pub fn new(user_pass: &str) -> Result<Self, InvalidMetadataValue> {
        Ok(Self {
            header: Some(encode_basic(user_pass).parse()?),
        })
    }

    /// Send no credentials
    pub fn none() -> Self {
        Self::default()
    }
}

impl Interceptor for BasicAuthCredentials {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        if let Some(header) = &self.header {
            request
                .metadata_mut()
                .insert("authorization", header.clone());
        }
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::item;
    use chrono::Duration;

    fn server(items: Vec<crate::AuthItem>) -> AuthInterceptor {
        AuthInterceptor::new(Arc::new(CredentialStore::new(items)))
    }

    #[test]
    fn test_empty_store_lets_everything_through() {
        let request = server(Vec::new()).call(Request::new(())).unwrap();
        assert!(request.extensions().get::<AuthenticatedUser>().is_none());
    }

    #[test]
    fn test_missing_header_is_unauthenticated() {
        let mut interceptor = server(vec![item("alice", "pw", Duration::days(1))]);

        let status = interceptor.call(Request::new(())).unwrap_err();
        assert_eq!(status.code(), tonic::Code::Unauthenticated);
    }

    #[test]
    fn test_client_credentials_pass_server_check() {
        let mut interceptor = server(vec![item("alice", "pw", Duration::days(1))]);
        let mut creds = BasicAuthCredentials::new("alice:pw").unwrap();

        let request = creds.call(Request::new(())).unwrap();
        let request = interceptor.call(request).unwrap();

        assert_eq!(
            request.extensions().get::<AuthenticatedUser>(),
            Some(&AuthenticatedUser("alice".to_string()))
        );
    }

    #[test]
    fn test_wrong_password_message_has_no_secret() {
        let mut interceptor = server(vec![item("alice", "pw", Duration::days(1))]);
        let mut creds = BasicAuthCredentials::new("alice:topsecret").unwrap();

        let status = interceptor
            .call(creds.call(Request::new(())).unwrap())
            .unwrap_err();

        assert_eq!(status.code(), tonic::Code::Unauthenticated);
        assert!(!status.message().contains("topsecret"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_bcrypt_check_leaves_worker_tasks_running() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        // a slower digest so the check is measurable
        let slow = crate::AuthItem::generate_with_cost("alice", "pw", Duration::days(1), 10).unwrap();
        let mut interceptor = server(vec![slow]);

        let ticks = Arc::new(AtomicUsize::new(0));
        let ticker = tokio::spawn({
            let ticks = ticks.clone();
            async move {
                loop {
                    tokio::time::sleep(std::time::Duration::from_millis(1)).await;
                    ticks.fetch_add(1, Ordering::SeqCst);
                }
            }
        });
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let before = ticks.load(Ordering::SeqCst);

        // runs on the only worker, next to the ticker
        let request = tokio::spawn(async move {
            let mut creds = BasicAuthCredentials::new("alice:pw").unwrap();
            interceptor.call(creds.call(Request::new(())).unwrap())
        })
        .await
        .unwrap()
        .unwrap();
        let during = ticks.load(Ordering::SeqCst) - before;
        ticker.abort();

        assert!(request.extensions().get::<AuthenticatedUser>().is_some());
        assert!(during >= 3, "worker stalled during bcrypt verification");
    }

    #[test]
    fn test_no_credentials_adds_nothing() {
        let request = BasicAuthCredentials::none().call(Request::new(())).unwrap();
        assert!(request.metadata().get("authorization").is_none());
    }
}

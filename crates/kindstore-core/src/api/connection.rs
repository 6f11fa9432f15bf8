use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::backend::{Backend, MemoryBackend, RemoteBackend};
use crate::config::{ConnectOptions, ServiceAccountKey};
use crate::error::ConnectionError;
use crate::types::Entity;

use super::builders::QueryBuilder;

/// A shared handle to one `(project_id, database_id)` dataset.
///
/// `Connection` is cheaply clonable (`Arc`-based) and `Send + Sync`, so it
/// can be shared across tasks issuing queries concurrently.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
    timeout: Option<Duration>,
}

struct ConnectionInner {
    project_id: String,
    database_id: String,
    backend: Arc<dyn Backend>,
}

impl Connection {
    /// Connect to the backend named by `options` and bind the session to
    /// its dataset. No retry is attempted.
    ///
    /// Credentials, when given, are parsed and checked before dialing. The
    /// emulator protocol has no authentication, so they are not sent.
    pub async fn connect(options: ConnectOptions) -> Result<Self, ConnectionError> {
        if options.project_id.is_empty() {
            return Err(ConnectionError::EmptyProjectId);
        }
        if let Some(json) = &options.credentials_json {
            let key = ServiceAccountKey::parse(json)?;
            info!(client_email = %key.client_email, "using service-account credentials");
        }
        let endpoint = options.resolve_endpoint()?;

        let backend = RemoteBackend::connect(&endpoint).await.inspect_err(|e| {
            error!(endpoint = %endpoint.display(), error = %e, "failed to connect");
        })?;
        backend
            .open(&options.project_id, &options.database_id)
            .await
            .inspect_err(|e| {
                error!(project = %options.project_id, error = %e, "open handshake failed");
            })?;

        info!(
            endpoint = %endpoint.display(),
            project = %options.project_id,
            database = %options.database_id,
            "connected"
        );
        let mut conn = Self::with_backend(options.project_id, options.database_id, Arc::new(backend));
        conn.timeout = options.timeout;
        Ok(conn)
    }

    /// A connection over a fresh in-process `MemoryBackend`.
    pub fn in_memory(project_id: impl Into<String>, database_id: impl Into<String>) -> Self {
        Self::with_backend(project_id, database_id, Arc::new(MemoryBackend::new()))
    }

    pub fn with_backend(
        project_id: impl Into<String>,
        database_id: impl Into<String>,
        backend: Arc<dyn Backend>,
    ) -> Self {
        Self {
            inner: Arc::new(ConnectionInner {
                project_id: project_id.into(),
                database_id: database_id.into(),
                backend,
            }),
            timeout: None,
        }
    }

    pub fn project_id(&self) -> &str {
        &self.inner.project_id
    }

    pub fn database_id(&self) -> &str {
        &self.inner.database_id
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.inner.backend
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// A handle sharing this backend whose queries carry `timeout` as their
    /// deadline.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            timeout: Some(timeout),
        }
    }

    /// Start a query over entities of `kind`.
    pub fn query<T: Entity>(&self, kind: impl Into<String>) -> QueryBuilder<T> {
        QueryBuilder::new(self.clone(), kind)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("project_id", &self.inner.project_id)
            .field("database_id", &self.inner.database_id)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_rejects_empty_project() {
        let err = Connection::connect(ConnectOptions::new("")).await.unwrap_err();
        assert!(matches!(err, ConnectionError::EmptyProjectId));
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_credentials_before_dialing() {
        let opts = ConnectOptions::new("demo")
            .credentials_json("{}")
            .endpoint("/nonexistent/kindstore.sock");
        let err = Connection::connect(opts).await.unwrap_err();
        assert!(matches!(err, ConnectionError::InvalidCredentials(_)));
    }

    #[tokio::test]
    async fn test_connect_accepts_valid_credentials_then_dials() {
        let dir = tempfile::tempdir().unwrap();
        let opts = ConnectOptions::new("demo")
            .credentials_json(r#"{"client_email":"svc@demo","private_key":"k"}"#)
            .endpoint(dir.path().join("missing.sock"));
        let err = Connection::connect(opts).await.unwrap_err();
        assert!(matches!(err, ConnectionError::Io(_)));
    }

    #[tokio::test]
    async fn test_connect_unreachable_endpoint_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let opts = ConnectOptions::new("demo").endpoint(dir.path().join("missing.sock"));
        let err = Connection::connect(opts).await.unwrap_err();
        assert!(matches!(err, ConnectionError::Io(_)));
    }

    #[test]
    fn test_with_timeout_shares_backend() {
        let conn = Connection::in_memory("demo", "");
        let bounded = conn.with_timeout(Duration::from_millis(50));
        assert_eq!(conn.timeout(), None);
        assert_eq!(bounded.timeout(), Some(Duration::from_millis(50)));
        assert!(Arc::ptr_eq(conn.backend(), bounded.backend()));
        assert_eq!(bounded.project_id(), "demo");
        assert_eq!(bounded.database_id(), "");
    }
}

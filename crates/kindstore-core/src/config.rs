//! Connection parameters and credential parsing.

use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConnectionError;

pub const ENV_PROJECT: &str = "KINDSTORE_PROJECT";
pub const ENV_DATABASE: &str = "KINDSTORE_DATABASE";
pub const ENV_EMULATOR_SOCKET: &str = "KINDSTORE_EMULATOR_SOCKET";
pub const ENV_CREDENTIALS: &str = "KINDSTORE_CREDENTIALS";
pub const ENV_CREDENTIALS_FILE: &str = "KINDSTORE_CREDENTIALS_FILE";

/// Parameters for `Connection::connect`.
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    pub project_id: String,
    /// Empty selects the default database.
    pub database_id: String,
    /// Service-account key material as a JSON document.
    pub credentials_json: Option<String>,
    /// Socket path of the backend. Falls back to `KINDSTORE_EMULATOR_SOCKET`.
    pub endpoint: Option<PathBuf>,
    /// Deadline applied to each query operation.
    pub timeout: Option<Duration>,
}

impl ConnectOptions {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            ..Self::default()
        }
    }

    pub fn database(mut self, database_id: impl Into<String>) -> Self {
        self.database_id = database_id.into();
        self
    }

    pub fn credentials_json(mut self, json: impl Into<String>) -> Self {
        self.credentials_json = Some(json.into());
        self
    }

    pub fn endpoint(mut self, path: impl Into<PathBuf>) -> Self {
        self.endpoint = Some(path.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build options from `KINDSTORE_*` environment variables.
    ///
    /// `KINDSTORE_CREDENTIALS` wins over `KINDSTORE_CREDENTIALS_FILE`.
    pub fn from_env() -> Result<Self, ConnectionError> {
        let credentials_json = match env::var(ENV_CREDENTIALS) {
            Ok(json) => Some(json),
            Err(_) => match env::var_os(ENV_CREDENTIALS_FILE) {
                Some(path) => Some(fs::read_to_string(path)?),
                None => None,
            },
        };
        Ok(Self {
            project_id: env::var(ENV_PROJECT).unwrap_or_default(),
            database_id: env::var(ENV_DATABASE).unwrap_or_default(),
            credentials_json,
            endpoint: env::var_os(ENV_EMULATOR_SOCKET).map(PathBuf::from),
            timeout: None,
        })
    }

    /// The explicit endpoint, else the one named by the environment.
    pub fn resolve_endpoint(&self) -> Result<PathBuf, ConnectionError> {
        self.endpoint
            .clone()
            .or_else(|| env::var_os(ENV_EMULATOR_SOCKET).map(PathBuf::from))
            .ok_or(ConnectionError::NoEndpoint)
    }
}

/// The fields of a service-account key this layer requires.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    #[serde(rename = "type", default)]
    pub key_type: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    pub client_email: String,
    pub private_key: String,
}

impl std::fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("key_type", &self.key_type)
            .field("project_id", &self.project_id)
            .field("client_email", &self.client_email)
            .finish_non_exhaustive()
    }
}

impl ServiceAccountKey {
    pub fn parse(json: &str) -> Result<Self, ConnectionError> {
        let key: ServiceAccountKey = serde_json::from_str(json)
            .map_err(|e| ConnectionError::InvalidCredentials(e.to_string()))?;
        if key.client_email.is_empty() || key.private_key.is_empty() {
            return Err(ConnectionError::InvalidCredentials(
                "client_email and private_key must be non-empty".to_string(),
            ));
        }
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use parking_lot::Mutex;

    /// Serializes tests that mutate the process environment.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const ALL_VARS: [&str; 5] = [
        ENV_PROJECT,
        ENV_DATABASE,
        ENV_EMULATOR_SOCKET,
        ENV_CREDENTIALS,
        ENV_CREDENTIALS_FILE,
    ];

    fn set_env(vars: &[(&str, &str)]) {
        // SAFETY: callers hold ENV_LOCK and no other test in this crate reads
        // these variables concurrently.
        unsafe {
            for name in ALL_VARS {
                env::remove_var(name);
            }
            for (name, value) in vars {
                env::set_var(name, value);
            }
        }
    }

    #[test]
    fn test_parse_service_account_key() {
        let key = ServiceAccountKey::parse(
            r#"{"type":"service_account","project_id":"demo","client_email":"svc@demo","private_key":"-----BEGIN-----"}"#,
        )
        .unwrap();
        assert_eq!(key.client_email, "svc@demo");
        assert_eq!(key.project_id.as_deref(), Some("demo"));
        assert!(!format!("{key:?}").contains("BEGIN"));
    }

    #[test]
    fn test_parse_rejects_malformed_credentials() {
        assert!(matches!(
            ServiceAccountKey::parse("{not json"),
            Err(ConnectionError::InvalidCredentials(_))
        ));
        assert!(matches!(
            ServiceAccountKey::parse(r#"{"client_email":"svc@demo"}"#),
            Err(ConnectionError::InvalidCredentials(_))
        ));
        assert!(matches!(
            ServiceAccountKey::parse(r#"{"client_email":"","private_key":"k"}"#),
            Err(ConnectionError::InvalidCredentials(_))
        ));
    }

    #[test]
    fn test_from_env_maps_variables() {
        let _guard = ENV_LOCK.lock();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"client_email":"file@demo","private_key":"k"}}"#).unwrap();
        let file_path = file.path().to_str().unwrap().to_string();

        set_env(&[
            (ENV_PROJECT, "demo"),
            (ENV_DATABASE, "tenant-a"),
            (ENV_EMULATOR_SOCKET, "/tmp/kindstore-env.sock"),
            (ENV_CREDENTIALS_FILE, &file_path),
        ]);
        let opts = ConnectOptions::from_env().unwrap();
        assert_eq!(opts.project_id, "demo");
        assert_eq!(opts.database_id, "tenant-a");
        assert_eq!(opts.endpoint, Some(PathBuf::from("/tmp/kindstore-env.sock")));
        assert_eq!(opts.timeout, None);
        let key = ServiceAccountKey::parse(opts.credentials_json.as_deref().unwrap()).unwrap();
        assert_eq!(key.client_email, "file@demo");

        // The inline payload wins over the file.
        set_env(&[
            (ENV_PROJECT, "demo"),
            (ENV_CREDENTIALS, r#"{"client_email":"inline@demo","private_key":"k"}"#),
            (ENV_CREDENTIALS_FILE, &file_path),
        ]);
        let opts = ConnectOptions::from_env().unwrap();
        let key = ServiceAccountKey::parse(opts.credentials_json.as_deref().unwrap()).unwrap();
        assert_eq!(key.client_email, "inline@demo");
        assert_eq!(opts.database_id, "");
        assert_eq!(opts.endpoint, None);
        assert!(matches!(opts.resolve_endpoint(), Err(ConnectionError::NoEndpoint)));

        set_env(&[(ENV_CREDENTIALS_FILE, "/nonexistent/kindstore-key.json")]);
        assert!(matches!(ConnectOptions::from_env(), Err(ConnectionError::Io(_))));

        set_env(&[]);
        let opts = ConnectOptions::from_env().unwrap();
        assert!(opts.project_id.is_empty());
        assert!(opts.credentials_json.is_none());
    }

    #[test]
    fn test_builder_setters() {
        let opts = ConnectOptions::new("demo")
            .database("tenant-a")
            .endpoint("/tmp/kindstore.sock")
            .timeout(Duration::from_secs(5));
        assert_eq!(opts.project_id, "demo");
        assert_eq!(opts.database_id, "tenant-a");
        assert_eq!(
            opts.resolve_endpoint().unwrap(),
            PathBuf::from("/tmp/kindstore.sock")
        );
        assert_eq!(opts.timeout, Some(Duration::from_secs(5)));
    }
}

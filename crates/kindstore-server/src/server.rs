//! Unix domain socket server exposing in-memory datasets.
//!
//! Each connected client sends JSON-line requests and receives JSON-line
//! responses. A connection serves nothing until an `open` request binds it
//! to a `(project_id, database_id)` dataset; connections that open the same
//! dataset share its entities.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info, warn};

use kindstore_core::backend::{Backend, MemoryBackend, MemoryOptions};
use kindstore_core::error::{BackendError, BackendErrorCode};
use kindstore_core::protocol::{Envelope, Request, Response};

/// In-memory datasets keyed by `(project_id, database_id)`.
#[derive(Default)]
pub struct Datasets {
    options: MemoryOptions,
    backends: Mutex<HashMap<(String, String), MemoryBackend>>,
}

impl Datasets {
    pub fn new(options: MemoryOptions) -> Self {
        Self {
            options,
            backends: Mutex::new(HashMap::new()),
        }
    }

    /// The dataset's backend, created empty on first use.
    pub fn open(&self, project_id: &str, database_id: &str) -> MemoryBackend {
        self.backends
            .lock()
            .entry((project_id.to_string(), database_id.to_string()))
            .or_insert_with(|| MemoryBackend::with_options(self.options.clone()))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.backends.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A kindstore emulator listening on a Unix socket.
pub struct KindstoreServer {
    datasets: Arc<Datasets>,
    socket_path: PathBuf,
}

impl KindstoreServer {
    pub fn new(socket_path: PathBuf) -> Self {
        Self::with_options(socket_path, MemoryOptions::default())
    }

    pub fn with_options(socket_path: PathBuf, options: MemoryOptions) -> Self {
        Self {
            datasets: Arc::new(Datasets::new(options)),
            socket_path,
        }
    }

    pub fn datasets(&self) -> &Arc<Datasets> {
        &self.datasets
    }

    /// Run the server, accepting connections until a shutdown signal is received.
    ///
    /// On startup, removes any stale socket file and binds a new one.
    /// On shutdown (SIGINT or SIGTERM), removes the socket file before exiting.
    pub async fn run(&self) -> std::io::Result<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;
        info!(path = %self.socket_path.display(), "server listening");

        let accept_loop = async {
            loop {
                match listener.accept().await {
                    Ok((stream, _addr)) => {
                        let datasets = Arc::clone(&self.datasets);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(datasets, stream).await {
                                warn!(error = %e, "connection handler error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "accept error");
                    }
                }
            }
        };

        tokio::select! {
            _ = accept_loop => {}
            _ = shutdown_signal() => {
                info!("shutdown signal received");
            }
        }

        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(error = %e, "failed to remove socket file on shutdown");
            } else {
                info!(path = %self.socket_path.display(), "socket file removed");
            }
        }

        Ok(())
    }
}

async fn handle_connection(datasets: Arc<Datasets>, stream: UnixStream) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    let mut bound: Option<MemoryBackend> = None;

    loop {
        line.clear();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Envelope>(trimmed) {
            Ok(env) => {
                debug!(id = env.id, op = env.request.op_name(), "request");
                dispatch(&datasets, &mut bound, env).await
            }
            Err(e) => {
                // Echo the id when the line is JSON with a readable id.
                let id = serde_json::from_str::<Value>(trimmed)
                    .ok()
                    .and_then(|v| v.get("id").and_then(Value::as_u64));
                Response::error(id, BackendError::invalid_argument(format!("parse error: {e}")))
            }
        };

        let mut resp_bytes = match serde_json::to_vec(&response) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(error = %e, "failed to serialize response");
                serialization_failure(&e)
            }
        };
        resp_bytes.push(b'\n');

        writer.write_all(&resp_bytes).await?;
        writer.flush().await?;
    }

    Ok(())
}

async fn dispatch(datasets: &Datasets, bound: &mut Option<MemoryBackend>, env: Envelope) -> Response {
    let Envelope { id, request } = env;
    match request {
        Request::Open {
            project_id,
            database_id,
        } => {
            if project_id.is_empty() {
                return Response::error(
                    Some(id),
                    BackendError::invalid_argument("project_id is required"),
                );
            }
            *bound = Some(datasets.open(&project_id, &database_id));
            info!(project = %project_id, database = %database_id, "dataset opened");
            Response::ok_empty(id)
        }
        request => match bound.as_ref() {
            Some(backend) => execute(backend, id, request).await,
            None => Response::error(
                Some(id),
                BackendError::failed_precondition("connection has not opened a dataset"),
            ),
        },
    }
}

async fn execute(backend: &MemoryBackend, id: u64, request: Request) -> Response {
    let op = request.op_name();
    let result = match request {
        // Bound by `dispatch` before reaching here.
        Request::Open { .. } => Ok(Response::ok_empty(id)),
        Request::RunQuery { query } => backend
            .run_query(&query)
            .await
            .map(|batch| Response::ok_batch(id, batch)),
        Request::RunAggregation {
            query,
            aggregations,
        } => backend
            .run_aggregation(&query, &aggregations)
            .await
            .map(|result| Response::ok_aggregation(id, result)),
        Request::PutMulti { entities } => backend
            .put_multi(
                entities
                    .into_iter()
                    .map(|e| (e.key, e.properties))
                    .collect(),
            )
            .await
            .map(|keys| Response::ok_keys(id, keys)),
        Request::Lookup { keys } => backend
            .lookup(&keys)
            .await
            .map(|entities| Response::ok_entities(id, entities)),
        Request::DeleteMulti { keys } => backend
            .delete_multi(&keys)
            .await
            .map(|()| Response::ok_empty(id)),
    };

    result.unwrap_or_else(|e| backend_error_to_response(id, op, e))
}

fn backend_error_to_response(id: u64, op: &str, err: BackendError) -> Response {
    match err.code {
        BackendErrorCode::InvalidArgument | BackendErrorCode::FailedPrecondition => {
            debug!(op, error = %err, "request rejected");
        }
        _ => warn!(op, error = %err, "request failed"),
    }
    Response::error(Some(id), err)
}

fn serialization_failure(err: &serde_json::Error) -> Vec<u8> {
    let fallback = serde_json::json!({
        "id": null,
        "error": BackendErrorCode::Internal.as_str(),
        "message": err.to_string(),
    });
    fallback.to_string().into_bytes()
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to register SIGTERM handler");
                ctrl_c.await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kindstore_core::api::Query;
    use kindstore_core::types::Key;
    use serde_json::json;

    fn envelope(id: u64, request: Request) -> Envelope {
        Envelope { id, request }
    }

    fn to_value(resp: &Response) -> Value {
        serde_json::to_value(resp).unwrap()
    }

    #[tokio::test]
    async fn test_requests_before_open_are_rejected() {
        let datasets = Datasets::default();
        let mut bound = None;
        let resp = dispatch(
            &datasets,
            &mut bound,
            envelope(1, Request::RunQuery { query: Query::new("User") }),
        )
        .await;
        let value = to_value(&resp);
        assert_eq!(value["id"], json!(1));
        assert_eq!(value["error"], json!("FailedPrecondition"));
    }

    #[tokio::test]
    async fn test_open_requires_project() {
        let datasets = Datasets::default();
        let mut bound = None;
        let resp = dispatch(
            &datasets,
            &mut bound,
            envelope(
                1,
                Request::Open {
                    project_id: String::new(),
                    database_id: String::new(),
                },
            ),
        )
        .await;
        assert_eq!(to_value(&resp)["error"], json!("InvalidArgument"));
        assert!(bound.is_none());
        assert!(datasets.is_empty());
    }

    #[tokio::test]
    async fn test_datasets_are_isolated_and_shared() {
        let datasets = Datasets::default();
        let a = datasets.open("p", "");
        let b = datasets.open("p", "other");
        let a_again = datasets.open("p", "");

        a.put_multi(vec![(Key::name("K", "x"), json!({}))]).await.unwrap();
        assert!(a_again.contains(&Key::name("K", "x")));
        assert!(!b.contains(&Key::name("K", "x")));
        assert_eq!(datasets.len(), 2);
    }

    #[tokio::test]
    async fn test_dispatch_put_and_lookup() {
        let datasets = Datasets::default();
        let mut bound = None;
        dispatch(
            &datasets,
            &mut bound,
            envelope(
                1,
                Request::Open {
                    project_id: "p".into(),
                    database_id: String::new(),
                },
            ),
        )
        .await;

        let resp = dispatch(
            &datasets,
            &mut bound,
            envelope(
                2,
                Request::PutMulti {
                    entities: vec![kindstore_core::protocol::EntityWire {
                        key: Key::incomplete("K"),
                        properties: json!({"a": 1}),
                    }],
                },
            ),
        )
        .await;
        assert_eq!(
            to_value(&resp),
            json!({"id": 2, "ok": true, "keys": [{"kind": "K", "id": 1}]})
        );

        let resp = dispatch(
            &datasets,
            &mut bound,
            envelope(
                3,
                Request::Lookup {
                    keys: vec![Key::id("K", 1), Key::id("K", 2)],
                },
            ),
        )
        .await;
        assert_eq!(
            to_value(&resp),
            json!({"id": 3, "ok": true, "entities": [{"a": 1}, null]})
        );
    }
}

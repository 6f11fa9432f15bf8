//! Client backend for a `kindstore-server` reached over a Unix socket.
//!
//! Each method serializes a JSON-line request, sends it, reads the JSON-line
//! response carrying the request's id, and returns the parsed result.
//! Requests on one connection are serialized. A request dropped or failed
//! between writing and reading its response leaves the stream unusable;
//! later requests fail with `Unavailable`.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tracing::debug;

use crate::api::query::{Aggregation, AggregationResult, Query, QueryBatch};
use crate::error::{BackendError, BackendErrorCode, ConnectionError};
use crate::protocol::{EntityWire, Envelope, Request};
use crate::types::Key;

use super::Backend;

struct Conn {
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
    line_buf: String,
    /// Set while a request is on the wire. Still set on entry means the
    /// previous caller was dropped mid-exchange.
    in_flight: bool,
}

/// A backend speaking the JSON-lines protocol to an emulator process.
pub struct RemoteBackend {
    conn: Mutex<Conn>,
    next_id: AtomicU64,
}

impl RemoteBackend {
    /// Connect to a server at the given Unix socket path.
    ///
    /// The connection is unbound until `open` succeeds.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self, ConnectionError> {
        let stream = UnixStream::connect(path.as_ref()).await?;
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            conn: Mutex::new(Conn {
                reader: BufReader::new(read_half),
                writer: BufWriter::new(write_half),
                line_buf: String::new(),
                in_flight: false,
            }),
            next_id: AtomicU64::new(1),
        })
    }

    /// Bind this connection to a `(project_id, database_id)` dataset.
    pub async fn open(&self, project_id: &str, database_id: &str) -> Result<(), ConnectionError> {
        let resp = self
            .send_request(Request::Open {
                project_id: project_id.to_string(),
                database_id: database_id.to_string(),
            })
            .await
            .map_err(ConnectionError::Handshake)?;
        check_error(&resp).map_err(ConnectionError::Handshake)
    }

    async fn send_request(&self, request: Request) -> Result<Value, BackendError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let op = request.op_name();
        let mut data = serde_json::to_vec(&Envelope { id, request })
            .map_err(|e| BackendError::protocol(format!("failed to encode request: {e}")))?;
        data.push(b'\n');

        let mut conn = self.conn.lock().await;
        if conn.in_flight {
            return Err(BackendError::unavailable(
                "connection lost after an interrupted request",
            ));
        }
        conn.in_flight = true;
        conn.writer.write_all(&data).await.map_err(io_error)?;
        conn.writer.flush().await.map_err(io_error)?;

        let Conn {
            reader, line_buf, ..
        } = &mut *conn;
        line_buf.clear();
        let n = reader.read_line(line_buf).await.map_err(io_error)?;
        if n == 0 {
            return Err(BackendError::unavailable("server disconnected"));
        }

        let resp: Value = serde_json::from_str(line_buf.trim())
            .map_err(|e| BackendError::protocol(format!("malformed response: {e}")))?;
        match resp.get("id").and_then(Value::as_u64) {
            Some(resp_id) if resp_id == id => {
                conn.in_flight = false;
                Ok(resp)
            }
            other => {
                debug!(op, id, response_id = ?other, "response id mismatch");
                Err(BackendError::protocol("response id does not match request"))
            }
        }
    }
}

fn io_error(err: std::io::Error) -> BackendError {
    BackendError::unavailable(format!("I/O error: {err}"))
}

// ---------------------------------------------------------------------------
// Response helpers
// ---------------------------------------------------------------------------

fn check_error(resp: &Value) -> Result<(), BackendError> {
    if let Some(err) = resp.get("error") {
        let code = err
            .as_str()
            .and_then(BackendErrorCode::parse)
            .unwrap_or(BackendErrorCode::Protocol);
        let message = resp
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("")
            .to_string();
        return Err(BackendError::new(code, message));
    }
    Ok(())
}

fn field_from_response<T: DeserializeOwned>(mut resp: Value, field: &str) -> Result<T, BackendError> {
    check_error(&resp)?;
    let value = resp
        .get_mut(field)
        .map(Value::take)
        .ok_or_else(|| BackendError::protocol(format!("response missing '{field}'")))?;
    serde_json::from_value(value)
        .map_err(|e| BackendError::protocol(format!("invalid '{field}' in response: {e}")))
}

#[async_trait]
impl Backend for RemoteBackend {
    async fn run_query(&self, query: &Query) -> Result<QueryBatch, BackendError> {
        let resp = self
            .send_request(Request::RunQuery {
                query: query.clone(),
            })
            .await?;
        field_from_response(resp, "batch")
    }

    async fn run_aggregation(
        &self,
        query: &Query,
        aggregations: &[Aggregation],
    ) -> Result<AggregationResult, BackendError> {
        let resp = self
            .send_request(Request::RunAggregation {
                query: query.clone(),
                aggregations: aggregations.to_vec(),
            })
            .await?;
        field_from_response(resp, "result")
    }

    async fn put_multi(&self, entities: Vec<(Key, Value)>) -> Result<Vec<Key>, BackendError> {
        let entities = entities
            .into_iter()
            .map(|(key, properties)| EntityWire { key, properties })
            .collect();
        let resp = self.send_request(Request::PutMulti { entities }).await?;
        field_from_response(resp, "keys")
    }

    async fn lookup(&self, keys: &[Key]) -> Result<Vec<Option<Value>>, BackendError> {
        let resp = self
            .send_request(Request::Lookup {
                keys: keys.to_vec(),
            })
            .await?;
        let entities: Vec<Option<Value>> = field_from_response(resp, "entities")?;
        if entities.len() != keys.len() {
            return Err(BackendError::protocol(format!(
                "lookup returned {} entities for {} keys",
                entities.len(),
                keys.len()
            )));
        }
        Ok(entities)
    }

    async fn delete_multi(&self, keys: &[Key]) -> Result<(), BackendError> {
        let resp = self
            .send_request(Request::DeleteMulti {
                keys: keys.to_vec(),
            })
            .await?;
        check_error(&resp)
    }
}

//! Wire protocol: JSON-over-newlines request/response types.
//!
//! Each request is a single JSON line carrying a client-chosen `id`; the
//! response line echoes it back.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::query::{Aggregation, AggregationResult, Query, QueryBatch};
use crate::error::{BackendError, BackendErrorCode};
use crate::types::Key;

/// A request line: correlation id plus the operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub id: u64,
    #[serde(flatten)]
    pub request: Request,
}

/// A request from a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    /// Bind the connection to a dataset. Must precede every other request.
    Open {
        project_id: String,
        #[serde(default)]
        database_id: String,
    },
    RunQuery {
        query: Query,
    },
    RunAggregation {
        query: Query,
        aggregations: Vec<Aggregation>,
    },
    PutMulti {
        entities: Vec<EntityWire>,
    },
    Lookup {
        keys: Vec<Key>,
    },
    DeleteMulti {
        keys: Vec<Key>,
    },
}

impl Request {
    /// Operation name used in log lines.
    pub fn op_name(&self) -> &'static str {
        match self {
            Request::Open { .. } => "open",
            Request::RunQuery { .. } => "run_query",
            Request::RunAggregation { .. } => "run_aggregation",
            Request::PutMulti { .. } => "put_multi",
            Request::Lookup { .. } => "lookup",
            Request::DeleteMulti { .. } => "delete_multi",
        }
    }
}

/// An entity in a put request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityWire {
    pub key: Key,
    pub properties: Value,
}

/// A response sent back to the client.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Response {
    Ok(OkResponse),
    Error(ErrorResponse),
}

/// Successful response variants.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum OkResponse {
    Batch {
        id: u64,
        ok: bool,
        batch: QueryBatch,
    },
    Aggregation {
        id: u64,
        ok: bool,
        result: AggregationResult,
    },
    Keys {
        id: u64,
        ok: bool,
        keys: Vec<Key>,
    },
    Entities {
        id: u64,
        ok: bool,
        entities: Vec<Option<Value>>,
    },
    Empty {
        id: u64,
        ok: bool,
    },
}

/// Error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Echoes the request id; `None` when the request line was unreadable.
    pub id: Option<u64>,
    pub error: BackendErrorCode,
    pub message: String,
}

impl Response {
    pub fn ok_empty(id: u64) -> Self {
        Response::Ok(OkResponse::Empty { id, ok: true })
    }

    pub fn ok_batch(id: u64, batch: QueryBatch) -> Self {
        Response::Ok(OkResponse::Batch { id, ok: true, batch })
    }

    pub fn ok_aggregation(id: u64, result: AggregationResult) -> Self {
        Response::Ok(OkResponse::Aggregation {
            id,
            ok: true,
            result,
        })
    }

    pub fn ok_keys(id: u64, keys: Vec<Key>) -> Self {
        Response::Ok(OkResponse::Keys { id, ok: true, keys })
    }

    pub fn ok_entities(id: u64, entities: Vec<Option<Value>>) -> Self {
        Response::Ok(OkResponse::Entities {
            id,
            ok: true,
            entities,
        })
    }

    pub fn error(id: Option<u64>, err: BackendError) -> Self {
        Response::Error(ErrorResponse {
            id,
            error: err.code,
            message: err.message,
        })
    }
}

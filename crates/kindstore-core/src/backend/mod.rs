//! The capability the query layer drives: one method per backend round trip.
//!
//! Implementations own their transport, pooling and concurrency. The query
//! layer never retries; whatever error a method returns reaches the caller.

pub mod memory;
pub mod remote;

use async_trait::async_trait;
use serde_json::Value;

use crate::api::query::{Aggregation, AggregationResult, Query, QueryBatch};
use crate::error::BackendError;
use crate::types::Key;

pub use memory::{MemoryBackend, MemoryOptions};
pub use remote::RemoteBackend;

#[async_trait]
pub trait Backend: Send + Sync {
    /// Run a query and return the next batch of results.
    ///
    /// A batch ending in `MoreResults::NotFinished` is resumed by re-issuing
    /// the query from the batch's end cursor.
    async fn run_query(&self, query: &Query) -> Result<QueryBatch, BackendError>;

    /// Run aggregations over the entities matching `query`.
    async fn run_aggregation(
        &self,
        query: &Query,
        aggregations: &[Aggregation],
    ) -> Result<AggregationResult, BackendError>;

    /// Write entities with overwrite semantics, all or nothing.
    ///
    /// Returns the written keys in input order, with incomplete keys
    /// completed by backend-allocated numeric ids.
    async fn put_multi(&self, entities: Vec<(Key, Value)>) -> Result<Vec<Key>, BackendError>;

    /// Fetch entities by key. `result[i]` corresponds to `keys[i]`.
    async fn lookup(&self, keys: &[Key]) -> Result<Vec<Option<Value>>, BackendError>;

    /// Delete entities by key. Missing keys are not an error.
    async fn delete_multi(&self, keys: &[Key]) -> Result<(), BackendError>;
}

//! Shared fixtures: a sample record type and a backend wrapper that counts
//! calls and injects failures.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use kindstore_core::api::{Aggregation, AggregationResult, Connection, Query, QueryBatch};
use kindstore_core::backend::{Backend, MemoryBackend, MemoryOptions};
use kindstore_core::error::BackendError;
use kindstore_core::types::Key;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct User {
    pub name: String,
    pub status: String,
    pub age: i64,
}

pub fn user(name: &str, status: &str, age: i64) -> User {
    User {
        name: name.to_string(),
        status: status.to_string(),
        age,
    }
}

/// Wraps a `MemoryBackend`, counting calls per operation.
#[derive(Default)]
pub struct CountingBackend {
    pub inner: MemoryBackend,
    pub queries: AtomicUsize,
    pub aggregations: AtomicUsize,
    pub puts: AtomicUsize,
    pub lookups: AtomicUsize,
    pub deletes: AtomicUsize,
    /// 1-based index of the `delete_multi` call that fails; 0 disables.
    pub fail_delete_at: AtomicUsize,
    /// 1-based index of the `put_multi` call that fails; 0 disables.
    pub fail_put_at: AtomicUsize,
    /// When set, every call waits forever.
    pub stall: std::sync::atomic::AtomicBool,
}

impl CountingBackend {
    pub fn with_options(options: MemoryOptions) -> Self {
        Self {
            inner: MemoryBackend::with_options(options),
            ..Self::default()
        }
    }

    pub fn total_calls(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
            + self.aggregations.load(Ordering::SeqCst)
            + self.puts.load(Ordering::SeqCst)
            + self.lookups.load(Ordering::SeqCst)
            + self.deletes.load(Ordering::SeqCst)
    }

    async fn maybe_stall(&self) {
        if self.stall.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
    }
}

#[async_trait]
impl Backend for CountingBackend {
    async fn run_query(&self, query: &Query) -> Result<QueryBatch, BackendError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.maybe_stall().await;
        self.inner.run_query(query).await
    }

    async fn run_aggregation(
        &self,
        query: &Query,
        aggregations: &[Aggregation],
    ) -> Result<AggregationResult, BackendError> {
        self.aggregations.fetch_add(1, Ordering::SeqCst);
        self.maybe_stall().await;
        self.inner.run_aggregation(query, aggregations).await
    }

    async fn put_multi(&self, entities: Vec<(Key, Value)>) -> Result<Vec<Key>, BackendError> {
        let n = self.puts.fetch_add(1, Ordering::SeqCst) + 1;
        self.maybe_stall().await;
        if n == self.fail_put_at.load(Ordering::SeqCst) {
            return Err(BackendError::unavailable("injected put failure"));
        }
        self.inner.put_multi(entities).await
    }

    async fn lookup(&self, keys: &[Key]) -> Result<Vec<Option<Value>>, BackendError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.maybe_stall().await;
        self.inner.lookup(keys).await
    }

    async fn delete_multi(&self, keys: &[Key]) -> Result<(), BackendError> {
        let n = self.deletes.fetch_add(1, Ordering::SeqCst) + 1;
        self.maybe_stall().await;
        if n == self.fail_delete_at.load(Ordering::SeqCst) {
            return Err(BackendError::unavailable("injected delete failure"));
        }
        self.inner.delete_multi(keys).await
    }
}

/// A connection over a fresh counting backend, plus the backend itself.
pub fn counting_connection() -> (Connection, Arc<CountingBackend>) {
    counting_connection_with(MemoryOptions::default())
}

pub fn counting_connection_with(options: MemoryOptions) -> (Connection, Arc<CountingBackend>) {
    let backend = Arc::new(CountingBackend::with_options(options));
    let conn = Connection::with_backend("test-project", "", backend.clone());
    (conn, backend)
}

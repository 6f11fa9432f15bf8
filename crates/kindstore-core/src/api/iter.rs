//! Batch-driven iteration over a query's results.
//!
//! The backend answers a query one batch at a time. A batch that ends in
//! `MoreResults::NotFinished` is continued by re-issuing the query from the
//! batch's end cursor with whatever limit and offset remain.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::backend::Backend;
use crate::error::{BackendError, Result};

use super::deadline::Deadline;
use super::query::{Cursor, EntityResult, MoreResults, Query};

/// Iterator over the entities a query matches.
pub struct EntityIter {
    backend: Arc<dyn Backend>,
    /// The query for the next batch: start cursor, limit and offset are
    /// rewritten as batches are consumed.
    query: Query,
    deadline: Deadline,
    buffer: VecDeque<EntityResult>,
    /// Position after the last consumed entity or skipped result. Empty
    /// means the start of the result set.
    position: Cursor,
    fetched: bool,
    done: bool,
}

impl EntityIter {
    pub(crate) fn new(backend: Arc<dyn Backend>, query: Query, deadline: Deadline) -> Self {
        let position = query
            .start_cursor
            .clone()
            .unwrap_or_else(|| Cursor::from_bytes(Vec::new()));
        let done = query.limit == Some(0);
        Self {
            backend,
            query,
            deadline,
            buffer: VecDeque::new(),
            position,
            fetched: false,
            done,
        }
    }

    /// The next matching entity, or `None` once the query is exhausted or
    /// its limit is reached.
    pub async fn next(&mut self) -> Result<Option<EntityResult>> {
        loop {
            if let Some(result) = self.buffer.pop_front() {
                self.position = result.cursor.clone();
                return Ok(Some(result));
            }
            if self.done {
                return Ok(None);
            }
            self.fetch().await?;
        }
    }

    /// Cursor positioned after the last entity returned by `next`.
    ///
    /// Before the first `next`, an offset query fetches its first batch so
    /// the position accounts for skipped results.
    pub async fn cursor(&mut self) -> Result<Cursor> {
        if !self.fetched && !self.done && self.query.offset > 0 {
            self.fetch().await?;
        }
        Ok(self.position.clone())
    }

    async fn fetch(&mut self) -> Result<()> {
        let batch = self
            .deadline
            .call(self.backend.run_query(&self.query))
            .await?;
        self.fetched = true;

        let returned = batch.results.len();
        if returned == 0 && batch.skipped_results == 0 && batch.more_results == MoreResults::NotFinished {
            return Err(BackendError::protocol("query batch made no progress").into());
        }
        if batch.skipped_results > 0 {
            self.position = batch
                .skipped_cursor
                .clone()
                .unwrap_or_else(|| batch.end_cursor.clone());
        }

        self.query.offset = self.query.offset.saturating_sub(batch.skipped_results);
        if let Some(limit) = self.query.limit.as_mut() {
            *limit = limit.saturating_sub(returned);
        }
        self.query.start_cursor = Some(batch.end_cursor);
        self.done = batch.more_results != MoreResults::NotFinished || self.query.limit == Some(0);
        self.buffer.extend(batch.results);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryBackend, MemoryOptions};
    use crate::types::Key;
    use serde_json::json;

    async fn backend(n: i64, max_batch_results: usize) -> Arc<dyn Backend> {
        let backend = MemoryBackend::with_options(MemoryOptions {
            max_batch_results,
            ..MemoryOptions::default()
        });
        let entities = (1..=n).map(|i| (Key::id("Item", i), json!({"n": i}))).collect();
        backend.put_multi(entities).await.unwrap();
        Arc::new(backend)
    }

    async fn drain(iter: &mut EntityIter) -> Vec<i64> {
        let mut ids = Vec::new();
        while let Some(result) = iter.next().await.unwrap() {
            ids.push(result.key.id_num().unwrap());
        }
        ids
    }

    #[tokio::test]
    async fn test_iter_continues_unfinished_batches() {
        let backend = backend(7, 3).await;
        let mut iter = EntityIter::new(backend, Query::new("Item"), Deadline::start(None, "select"));
        assert_eq!(drain(&mut iter).await, (1..=7).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_iter_limit_spans_batches() {
        let backend = backend(10, 3).await;
        let mut query = Query::new("Item");
        query.limit = Some(5);
        let mut iter = EntityIter::new(backend, query, Deadline::start(None, "select"));
        assert_eq!(drain(&mut iter).await, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_iter_cursor_resumes_after_last_consumed() {
        let backend = backend(6, 4).await;
        let mut iter = EntityIter::new(
            Arc::clone(&backend),
            Query::new("Item"),
            Deadline::start(None, "select_with_cursor"),
        );
        iter.next().await.unwrap();
        iter.next().await.unwrap();
        let cursor = iter.cursor().await.unwrap();

        let mut query = Query::new("Item");
        query.start_cursor = Some(cursor);
        let mut rest = EntityIter::new(backend, query, Deadline::start(None, "select"));
        assert_eq!(drain(&mut rest).await, vec![3, 4, 5, 6]);
    }

    #[tokio::test]
    async fn test_iter_cursor_before_next_is_start() {
        let backend = backend(2, 10).await;
        let mut iter = EntityIter::new(backend, Query::new("Item"), Deadline::start(None, "select"));
        assert!(iter.cursor().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_iter_offset_cursor_accounts_for_skipped() {
        let backend = backend(5, 10).await;
        let mut query = Query::new("Item");
        query.offset = 2;
        let mut iter = EntityIter::new(Arc::clone(&backend), query, Deadline::start(None, "select"));
        let cursor = iter.cursor().await.unwrap();

        let mut resumed = Query::new("Item");
        resumed.start_cursor = Some(cursor);
        let mut rest = EntityIter::new(backend, resumed, Deadline::start(None, "select"));
        assert_eq!(drain(&mut rest).await, vec![3, 4, 5]);
    }
}

//! Terminal operations that run a configured `QueryBuilder`.

use serde_json::Value;

use crate::error::{AggregationError, Error, PaginationMode, Result};
use crate::types::{Entity, Key, from_document};

use super::builders::QueryBuilder;
use super::deadline::{Deadline, failed};
use super::iter::EntityIter;
use super::query::{Aggregation, Cursor, Query};

/// Alias under which `total` requests its count.
pub const TOTAL_ALIAS: &str = "total";

impl<T: Entity> QueryBuilder<T> {
    /// Iterate the configured query batch by batch.
    pub fn iter(&self) -> EntityIter {
        self.iter_query(self.query.clone(), self.deadline("iter"))
    }

    pub(super) fn deadline(&self, operation: &'static str) -> Deadline {
        Deadline::start(self.effective_timeout(), operation)
    }

    fn iter_query(&self, query: Query, deadline: Deadline) -> EntityIter {
        EntityIter::new(self.conn.backend().clone(), query, deadline)
    }

    /// Reject an execution whose pagination style conflicts with the one
    /// the builder was configured for.
    fn check_pagination(&self, requested: PaginationMode, operation: &'static str) -> Result<()> {
        let active = match requested {
            PaginationMode::Offset if self.using_cursor => PaginationMode::Cursor,
            PaginationMode::Cursor if self.using_offset => PaginationMode::Offset,
            _ => return Ok(()),
        };
        Err(failed(
            self.kind(),
            operation,
            Error::PaginationConflict { active, requested },
        ))
    }

    async fn collect(&self, query: Query, deadline: Deadline) -> Result<Vec<T>> {
        let mut iter = self.iter_query(query, deadline);
        let mut records = Vec::new();
        while let Some(result) = iter.next().await? {
            records.push(from_document(result.properties)?);
        }
        Ok(records)
    }

    /// Fetch every matching entity, up to the limit.
    ///
    /// Fails with `PaginationConflict` when the builder has a cursor.
    pub async fn select(&self) -> Result<Vec<T>> {
        const OP: &str = "select";
        self.check_pagination(PaginationMode::Offset, OP)?;
        self.collect(self.query.clone(), self.deadline(OP))
            .await
            .map_err(|e| failed(self.kind(), OP, e))
    }

    /// Fetch the keys of every matching entity, up to the limit.
    pub async fn select_keys(&self) -> Result<Vec<Key>> {
        const OP: &str = "select_keys";
        self.check_pagination(PaginationMode::Offset, OP)?;
        self.matching_keys(self.deadline(OP))
            .await
            .map_err(|e| failed(self.kind(), OP, e))
    }

    /// Keys of the entities the current query selects, fetched keys-only.
    pub(super) async fn matching_keys(&self, deadline: Deadline) -> Result<Vec<Key>> {
        let mut query = self.query.clone();
        query.keys_only = true;
        query.projection.clear();
        query.distinct = false;
        let mut iter = self.iter_query(query, deadline);
        let mut keys = Vec::new();
        while let Some(result) = iter.next().await? {
            keys.push(result.key);
        }
        Ok(keys)
    }

    /// Fetch matching entities and a cursor positioned after the last one.
    ///
    /// Feeding the cursor to `with_cursor` on an identically configured
    /// builder continues where this page stopped. Fails with
    /// `PaginationConflict` when the builder has an offset.
    pub async fn select_with_cursor(&self) -> Result<(Vec<T>, Cursor)> {
        const OP: &str = "select_with_cursor";
        self.check_pagination(PaginationMode::Cursor, OP)?;
        let page = async {
            let mut iter = self.iter_query(self.query.clone(), self.deadline(OP));
            let mut records = Vec::new();
            while let Some(result) = iter.next().await? {
                records.push(from_document(result.properties)?);
            }
            let cursor = iter.cursor().await?;
            Ok::<_, Error>((records, cursor))
        };
        page.await.map_err(|e| failed(self.kind(), OP, e))
    }

    /// The first matching entity, if any.
    pub async fn get(&self) -> Result<Option<T>> {
        const OP: &str = "get";
        self.check_pagination(PaginationMode::Offset, OP)?;
        let mut query = self.query.clone();
        query.limit = Some(1);
        let records = self
            .collect(query, self.deadline(OP))
            .await
            .map_err(|e| failed(self.kind(), OP, e))?;
        Ok(records.into_iter().next())
    }

    /// Count the entities matching the filters and ancestor.
    ///
    /// Orders, projection, limit, offset and cursor do not affect the count.
    pub async fn total(&self) -> Result<i64> {
        const OP: &str = "total";
        let count = async {
            let deadline = self.deadline(OP);
            let view = self.query.count_view();
            let aggregations = [Aggregation::count(TOTAL_ALIAS)];
            let result = deadline
                .call(self.conn.backend().run_aggregation(&view, &aggregations))
                .await?;
            count_from(result.get(TOTAL_ALIAS))
        };
        count.await.map_err(|e| failed(self.kind(), OP, e))
    }
}

fn count_from(value: Option<&Value>) -> Result<i64> {
    let value = value.ok_or_else(|| AggregationError::MissingAlias(TOTAL_ALIAS.to_string()))?;
    value.as_i64().ok_or_else(|| {
        AggregationError::UnexpectedType {
            alias: TOTAL_ALIAS.to_string(),
            found: value.to_string(),
        }
        .into()
    })
}

//! In-process backend holding entities in an ordered map.
//!
//! Models the behaviours the query layer relies on from a managed store:
//! AND-only filters, the inequality/order index rule, batched query results
//! with per-entity cursors, offset skipping, count aggregation, per-call
//! batch ceilings and numeric id allocation. There is no persistence.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::filter::{lookup, sort_cmp};
use crate::api::projection::{apply_projection, has_projected};
use crate::api::query::{
    Aggregation, AggregationResult, Cursor, Direction, EntityResult, MoreResults, Query,
    QueryBatch,
};
use crate::error::{BackendError, BackendErrorCode};
use crate::types::{KEY_FIELD, Key, KeyId, MAX_BATCH_SIZE, MAX_LOOKUP_SIZE};

use super::Backend;

/// Per-call limits of a `MemoryBackend`.
#[derive(Debug, Clone)]
pub struct MemoryOptions {
    /// Maximum entities returned in one query batch.
    pub max_batch_results: usize,
    /// Maximum results skipped for an offset in one query batch.
    pub max_skipped_results: usize,
    pub max_put_batch: usize,
    pub max_lookup_batch: usize,
    pub max_delete_batch: usize,
}

impl Default for MemoryOptions {
    fn default() -> Self {
        Self {
            max_batch_results: 300,
            max_skipped_results: 1000,
            max_put_batch: MAX_BATCH_SIZE,
            max_lookup_batch: MAX_LOOKUP_SIZE,
            max_delete_batch: MAX_BATCH_SIZE,
        }
    }
}

#[derive(Default)]
struct MemoryState {
    entities: BTreeMap<Key, Value>,
    last_id: i64,
}

struct MemoryInner {
    state: RwLock<MemoryState>,
    options: MemoryOptions,
}

/// An in-memory backend.
///
/// `MemoryBackend` is cheaply clonable (`Arc`-based) and `Send + Sync`;
/// clones share the same entities.
#[derive(Clone)]
pub struct MemoryBackend {
    inner: Arc<MemoryInner>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_options(MemoryOptions::default())
    }

    pub fn with_options(options: MemoryOptions) -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                state: RwLock::new(MemoryState::default()),
                options,
            }),
        }
    }

    pub fn options(&self) -> &MemoryOptions {
        &self.inner.options
    }

    /// Number of stored entities across all kinds.
    pub fn len(&self) -> usize {
        self.inner.state.read().entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &Key) -> bool {
        self.inner.state.read().entities.contains_key(key)
    }

    /// Number of stored entities of one kind.
    pub fn count_kind(&self, kind: &str) -> usize {
        self.inner
            .state
            .read()
            .entities
            .keys()
            .filter(|k| k.kind == kind)
            .count()
    }

    /// Select, order and project the entities a query matches.
    fn collect_rows(&self, query: &Query) -> Result<Vec<Row>, BackendError> {
        let state = self.inner.state.read();
        let mut rows = Vec::new();

        for (key, doc) in &state.entities {
            if key.kind != query.kind {
                continue;
            }
            if let Some(ancestor) = &query.ancestor
                && !key.has_ancestor(ancestor)
            {
                continue;
            }
            if !matches_filters(query, key, doc)? {
                continue;
            }
            // Entities lacking an ordered or projected property are not in
            // the index the query would be served from.
            let Some(sort_values) = sort_values(query, key, doc) else {
                continue;
            };
            if !has_projected(doc, &query.projection) {
                continue;
            }
            let properties = if query.keys_only {
                None
            } else {
                Some(apply_projection(doc, &query.projection))
            };
            rows.push(Row {
                key: key.clone(),
                sort_values,
                properties,
            });
        }
        drop(state);

        rows.sort_by(|a, b| compare_rows(query, &a.sort_values, &a.key, &b.sort_values, &b.key));

        if query.distinct {
            let mut seen = HashSet::new();
            rows.retain(|row| {
                let projected = row
                    .properties
                    .as_ref()
                    .map(|p| p.to_string())
                    .unwrap_or_default();
                seen.insert(projected)
            });
        }

        Ok(rows)
    }
}

/// One matching entity in query order.
struct Row {
    key: Key,
    sort_values: Vec<SortValue>,
    properties: Option<Value>,
}

impl Row {
    fn position(&self) -> Position {
        Position {
            sort_values: self.sort_values.clone(),
            key: self.key.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum SortValue {
    Key(Key),
    Value(Value),
}

impl SortValue {
    fn compare(&self, other: &SortValue) -> Ordering {
        match (self, other) {
            (SortValue::Key(a), SortValue::Key(b)) => a.cmp(b),
            (SortValue::Value(a), SortValue::Value(b)) => sort_cmp(a, b),
            (SortValue::Value(_), SortValue::Key(_)) => Ordering::Less,
            (SortValue::Key(_), SortValue::Value(_)) => Ordering::Greater,
        }
    }
}

/// A point in a query's ordering: the sort tuple and key of the last entity
/// before it.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Position {
    sort_values: Vec<SortValue>,
    key: Key,
}

/// Cursor payload. `after: None` is the start of the result set.
#[derive(Debug, Serialize, Deserialize)]
struct CursorPayload {
    after: Option<Position>,
}

fn encode_cursor(after: Option<Position>) -> Result<Cursor, BackendError> {
    let bytes = rmp_serde::to_vec_named(&CursorPayload { after })
        .map_err(|e| BackendError::new(BackendErrorCode::Internal, e.to_string()))?;
    Ok(Cursor::from_bytes(bytes))
}

fn decode_cursor(cursor: &Cursor, query: &Query) -> Result<Option<Position>, BackendError> {
    if cursor.is_empty() {
        return Ok(None);
    }
    let payload: CursorPayload = rmp_serde::from_slice(cursor.as_bytes())
        .map_err(|e| BackendError::invalid_argument(format!("invalid cursor: {e}")))?;
    if let Some(position) = &payload.after
        && position.sort_values.len() != query.orders.len()
    {
        return Err(BackendError::invalid_argument(
            "cursor does not match the query's sort orders",
        ));
    }
    Ok(payload.after)
}

fn matches_filters(query: &Query, key: &Key, doc: &Value) -> Result<bool, BackendError> {
    for filter in &query.filters {
        if !filter.matches(key, doc)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn sort_values(query: &Query, key: &Key, doc: &Value) -> Option<Vec<SortValue>> {
    query
        .orders
        .iter()
        .map(|order| {
            if order.field == KEY_FIELD {
                Some(SortValue::Key(key.clone()))
            } else {
                lookup(doc, &order.field).map(|v| SortValue::Value(v.clone()))
            }
        })
        .collect()
}

fn compare_rows(
    query: &Query,
    a_values: &[SortValue],
    a_key: &Key,
    b_values: &[SortValue],
    b_key: &Key,
) -> Ordering {
    for ((order, a), b) in query.orders.iter().zip(a_values).zip(b_values) {
        let ord = match order.direction {
            Direction::Ascending => a.compare(b),
            Direction::Descending => b.compare(a),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a_key.cmp(b_key)
}

/// Reject query shapes no index could serve.
fn validate_query(query: &Query) -> Result<(), BackendError> {
    if query.kind.is_empty() {
        return Err(BackendError::invalid_argument("kind is required"));
    }
    for filter in &query.filters {
        filter.validate()?;
    }

    let mut inequality_fields: Vec<&str> = query
        .filters
        .iter()
        .filter(|f| f.op.is_inequality())
        .map(|f| f.field.as_str())
        .collect();
    inequality_fields.sort_unstable();
    inequality_fields.dedup();

    match inequality_fields.as_slice() {
        [] => {}
        [field] => {
            if let Some(first) = query.orders.first()
                && first.field != *field
            {
                return Err(BackendError::failed_precondition(format!(
                    "no matching index found: first sort order must be on inequality property '{field}', got '{}'",
                    first.field
                )));
            }
        }
        fields => {
            return Err(BackendError::failed_precondition(format!(
                "no matching index found: inequality filters on multiple properties: {}",
                fields.join(", ")
            )));
        }
    }

    if query.distinct && query.projection.is_empty() {
        return Err(BackendError::invalid_argument(
            "distinct query requires a projection",
        ));
    }
    if query.keys_only && !query.projection.is_empty() {
        return Err(BackendError::invalid_argument(
            "keys-only query cannot have a projection",
        ));
    }
    Ok(())
}

fn check_batch(op: &str, len: usize, max: usize) -> Result<(), BackendError> {
    if len > max {
        return Err(BackendError::invalid_argument(format!(
            "{op}: too many entities in one call ({len} > {max})"
        )));
    }
    Ok(())
}

fn check_complete(op: &str, key: &Key) -> Result<(), BackendError> {
    if key.kind.is_empty() {
        return Err(BackendError::invalid_argument(format!("{op}: key kind is required")));
    }
    if key.is_incomplete() {
        return Err(BackendError::invalid_argument(format!(
            "{op}: incomplete key {key}"
        )));
    }
    Ok(())
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn run_query(&self, query: &Query) -> Result<QueryBatch, BackendError> {
        validate_query(query)?;
        let start = match &query.start_cursor {
            Some(cursor) => decode_cursor(cursor, query)?,
            None => None,
        };

        let rows = self.collect_rows(query)?;
        let options = &self.inner.options;

        let begin = match &start {
            Some(pos) => rows.partition_point(|row| {
                compare_rows(query, &row.sort_values, &row.key, &pos.sort_values, &pos.key)
                    != Ordering::Greater
            }),
            None => 0,
        };
        let remaining = &rows[begin..];

        let skipped = query.offset.min(remaining.len()).min(options.max_skipped_results);
        let offset_pending = skipped < query.offset && skipped < remaining.len();
        let remaining = &remaining[skipped..];

        let wanted = if offset_pending {
            0
        } else {
            query.limit.unwrap_or(usize::MAX)
        };
        let take = wanted.min(options.max_batch_results).min(remaining.len());

        let mut results = Vec::with_capacity(take);
        for row in &remaining[..take] {
            results.push(EntityResult {
                key: row.key.clone(),
                properties: row.properties.clone(),
                cursor: encode_cursor(Some(row.position()))?,
            });
        }

        let rest = remaining.len() - take;
        let more_results = if offset_pending {
            MoreResults::NotFinished
        } else if rest == 0 {
            MoreResults::NoMoreResults
        } else if take == wanted {
            MoreResults::MoreResultsAfterLimit
        } else {
            MoreResults::NotFinished
        };

        let skipped_cursor = match skipped {
            0 => None,
            n => Some(encode_cursor(Some(rows[begin + n - 1].position()))?),
        };
        let end_cursor = match (results.last(), &skipped_cursor) {
            (Some(last), _) => last.cursor.clone(),
            (None, Some(cursor)) => cursor.clone(),
            (None, None) => encode_cursor(start)?,
        };

        Ok(QueryBatch {
            results,
            skipped_results: skipped,
            skipped_cursor,
            end_cursor,
            more_results,
        })
    }

    async fn run_aggregation(
        &self,
        query: &Query,
        aggregations: &[Aggregation],
    ) -> Result<AggregationResult, BackendError> {
        if aggregations.is_empty() {
            return Err(BackendError::invalid_argument(
                "at least one aggregation is required",
            ));
        }
        let mut aliases = HashSet::new();
        for aggregation in aggregations {
            if aggregation.alias().is_empty() || !aliases.insert(aggregation.alias()) {
                return Err(BackendError::invalid_argument(format!(
                    "aggregation aliases must be unique and non-empty: '{}'",
                    aggregation.alias()
                )));
            }
        }

        // Counts depend only on the filter state.
        let view = query.count_view();
        validate_query(&view)?;
        let count = self.collect_rows(&view)?.len();

        let mut result = AggregationResult::new();
        for aggregation in aggregations {
            match aggregation {
                Aggregation::Count { alias } => {
                    result.insert(alias.clone(), Value::from(count as i64));
                }
            }
        }
        Ok(result)
    }

    async fn put_multi(&self, entities: Vec<(Key, Value)>) -> Result<Vec<Key>, BackendError> {
        check_batch("put", entities.len(), self.inner.options.max_put_batch)?;
        for (key, doc) in &entities {
            if key.kind.is_empty() {
                return Err(BackendError::invalid_argument("put: key kind is required"));
            }
            if !doc.is_object() {
                return Err(BackendError::invalid_argument(format!(
                    "put: entity {key} is not an object"
                )));
            }
        }

        let mut state = self.inner.state.write();
        let mut keys = Vec::with_capacity(entities.len());
        for (mut key, doc) in entities {
            if key.is_incomplete() {
                state.last_id += 1;
                key.id = KeyId::Id(state.last_id);
            }
            state.entities.insert(key.clone(), doc);
            keys.push(key);
        }
        Ok(keys)
    }

    async fn lookup(&self, keys: &[Key]) -> Result<Vec<Option<Value>>, BackendError> {
        check_batch("lookup", keys.len(), self.inner.options.max_lookup_batch)?;
        for key in keys {
            check_complete("lookup", key)?;
        }
        let state = self.inner.state.read();
        Ok(keys
            .iter()
            .map(|key| state.entities.get(key).cloned())
            .collect())
    }

    async fn delete_multi(&self, keys: &[Key]) -> Result<(), BackendError> {
        check_batch("delete", keys.len(), self.inner.options.max_delete_batch)?;
        for key in keys {
            check_complete("delete", key)?;
        }
        let mut state = self.inner.state.write();
        for key in keys {
            state.entities.remove(key);
        }
        Ok(())
    }
}

use std::fmt;
use std::marker::PhantomData;
use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use crate::types::{Entity, KEY_FIELD, Key};

use super::connection::Connection;
use super::filter::{Filter, FilterOperator, FilterValue};
use super::query::{Cursor, Order, Query};

/// What a configuration call did to the builder.
///
/// Invalid or empty inputs are ignored rather than rejected; the outcome
/// log records which calls took effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    /// A limit or offset that was zero or negative.
    IgnoredNonPositive,
    /// An empty cursor token or a missing ancestor.
    IgnoredEmpty,
    /// A cursor token that failed to decode, or a non-string identity value.
    IgnoredInvalid,
}

/// One entry of a builder's outcome log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutcomeRecord {
    pub setting: &'static str,
    pub outcome: Outcome,
}

// ---------------------------------------------------------------------------
// QueryBuilder
// ---------------------------------------------------------------------------

/// Fluent query over entities of one kind, decoded as `T`.
///
/// Configuration methods consume and return the builder; executions borrow
/// it, so one configured builder can be executed repeatedly. Clone it to
/// branch a partially configured query.
pub struct QueryBuilder<T> {
    pub(crate) conn: Connection,
    pub(crate) query: Query,
    pub(crate) using_offset: bool,
    pub(crate) using_cursor: bool,
    pub(crate) timeout: Option<Duration>,
    outcomes: Vec<OutcomeRecord>,
    _entity: PhantomData<fn() -> T>,
}

impl<T> Clone for QueryBuilder<T> {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
            query: self.query.clone(),
            using_offset: self.using_offset,
            using_cursor: self.using_cursor,
            timeout: self.timeout,
            outcomes: self.outcomes.clone(),
            _entity: PhantomData,
        }
    }
}

impl<T> fmt::Debug for QueryBuilder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryBuilder")
            .field("query", &self.query)
            .field("using_offset", &self.using_offset)
            .field("using_cursor", &self.using_cursor)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl<T: Entity> QueryBuilder<T> {
    pub fn new(conn: Connection, kind: impl Into<String>) -> Self {
        Self {
            conn,
            query: Query::new(kind),
            using_offset: false,
            using_cursor: false,
            timeout: None,
            outcomes: Vec::new(),
            _entity: PhantomData,
        }
    }

    fn record(&mut self, setting: &'static str, outcome: Outcome) {
        if outcome != Outcome::Applied {
            debug!(kind = %self.query.kind, setting, ?outcome, "query setting ignored");
        }
        self.outcomes.push(OutcomeRecord { setting, outcome });
    }

    /// Add an AND-combined predicate.
    ///
    /// On the identity field `__key__` a string value names an entity of
    /// this query's kind; any other value is ignored.
    pub fn with_filter(mut self, field: &str, op: FilterOperator, value: impl Into<Value>) -> Self {
        let value = value.into();
        if field == KEY_FIELD {
            let Value::String(name) = value else {
                self.record("filter", Outcome::IgnoredInvalid);
                return self;
            };
            let key = Key::name(self.query.kind.clone(), name);
            self.query.filters.push(Filter::new(field, op, key));
        } else {
            self.query.filters.push(Filter::new(field, op, value));
        }
        self.record("filter", Outcome::Applied);
        self
    }

    /// Add a predicate on the entity key with an arbitrary key value.
    pub fn with_key_filter(mut self, op: FilterOperator, key: Key) -> Self {
        self.query
            .filters
            .push(Filter::new(KEY_FIELD, op, FilterValue::Key(key)));
        self.record("filter", Outcome::Applied);
        self
    }

    /// Sort ascending by `field`. Orders apply in the order they are added.
    pub fn with_order(mut self, field: &str) -> Self {
        self.query.orders.push(Order::asc(field));
        self.record("order", Outcome::Applied);
        self
    }

    pub fn with_order_desc(mut self, field: &str) -> Self {
        self.query.orders.push(Order::desc(field));
        self.record("order", Outcome::Applied);
        self
    }

    /// Cap the number of results. Non-positive values are ignored.
    pub fn with_limit(mut self, limit: i64) -> Self {
        if limit <= 0 {
            self.record("limit", Outcome::IgnoredNonPositive);
            return self;
        }
        self.query.limit = Some(limit as usize);
        self.record("limit", Outcome::Applied);
        self
    }

    /// Skip the first `offset` results and mark the query as offset-paginated.
    /// Non-positive values are ignored.
    pub fn with_offset(mut self, offset: i64) -> Self {
        if offset <= 0 {
            self.record("offset", Outcome::IgnoredNonPositive);
            return self;
        }
        self.query.offset = offset as usize;
        self.using_offset = true;
        self.record("offset", Outcome::Applied);
        self
    }

    /// Start after the position `token` encodes and mark the query as
    /// cursor-paginated. Empty and undecodable tokens are ignored.
    pub fn with_cursor(mut self, token: &str) -> Self {
        if token.is_empty() {
            self.record("cursor", Outcome::IgnoredEmpty);
            return self;
        }
        match Cursor::decode(token) {
            Ok(cursor) => {
                self.query.start_cursor = Some(cursor);
                self.using_cursor = true;
                self.record("cursor", Outcome::Applied);
            }
            Err(e) => {
                debug!(kind = %self.query.kind, error = %e, "cursor rejected");
                self.record("cursor", Outcome::IgnoredInvalid);
            }
        }
        self
    }

    /// Restrict results to descendants of `key` (inclusive).
    pub fn with_ancestor_key(mut self, key: impl Into<Option<Key>>) -> Self {
        match key.into() {
            Some(key) => {
                self.query.ancestor = Some(key);
                self.record("ancestor", Outcome::Applied);
            }
            None => self.record("ancestor", Outcome::IgnoredEmpty),
        }
        self
    }

    /// Return only the listed properties. Entities lacking any of them are
    /// not matched.
    pub fn with_projection<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.query.projection = fields.into_iter().map(Into::into).collect();
        self.record("projection", Outcome::Applied);
        self
    }

    /// Drop results whose projected properties duplicate an earlier result.
    pub fn with_distinct(mut self) -> Self {
        self.query.distinct = true;
        self.record("distinct", Outcome::Applied);
        self
    }

    /// Fetch keys only; decoded records are `T` built from an empty document.
    pub fn keys_only(mut self) -> Self {
        self.query.keys_only = true;
        self.record("keys_only", Outcome::Applied);
        self
    }

    /// Deadline for each execution of this builder, overriding the
    /// connection's.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self.record("timeout", Outcome::Applied);
        self
    }

    // -- Introspection --

    pub fn kind(&self) -> &str {
        &self.query.kind
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// The backend query as configured so far.
    pub fn query(&self) -> &Query {
        &self.query
    }

    /// The configured limit, 0 when unset.
    pub fn limit(&self) -> i64 {
        self.query.limit.map_or(0, |l| l as i64)
    }

    pub fn using_offset(&self) -> bool {
        self.using_offset
    }

    pub fn using_cursor(&self) -> bool {
        self.using_cursor
    }

    pub fn last_outcome(&self) -> Option<Outcome> {
        self.outcomes.last().map(|r| r.outcome)
    }

    pub fn outcomes(&self) -> &[OutcomeRecord] {
        &self.outcomes
    }

    pub(crate) fn effective_timeout(&self) -> Option<Duration> {
        self.timeout.or(self.conn.timeout())
    }
}

//! The backend-native query representation and the shapes a backend returns
//! for it: batched entity results, cursors and aggregation maps.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CursorError;
use crate::types::Key;

use super::filter::Filter;

/// Sort direction of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Ascending,
    Descending,
}

/// A (field, direction) sort order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub field: String,
    #[serde(default)]
    pub direction: Direction,
}

impl Order {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Direction::Ascending,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Direction::Descending,
        }
    }
}

/// An opaque, backend-issued position in a query's result ordering.
///
/// The string form is URL-safe base64 without padding. This layer never
/// interprets the bytes; only the backend that issued a cursor can.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Cursor(Vec<u8>);

impl Cursor {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn encode(&self) -> String {
        URL_SAFE_NO_PAD.encode(&self.0)
    }

    pub fn decode(s: &str) -> Result<Self, CursorError> {
        if s.is_empty() {
            return Err(CursorError::Empty);
        }
        let bytes = URL_SAFE_NO_PAD.decode(s)?;
        if bytes.is_empty() {
            return Err(CursorError::Empty);
        }
        Ok(Self(bytes))
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cursor({})", self.encode())
    }
}

impl FromStr for Cursor {
    type Err = CursorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

impl From<Cursor> for String {
    fn from(cursor: Cursor) -> Self {
        cursor.encode()
    }
}

impl TryFrom<String> for Cursor {
    type Error = CursorError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::decode(&s)
    }
}

/// A query against one kind, in the form a backend executes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub kind: String,
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub orders: Vec<Order>,
    #[serde(default)]
    pub projection: Vec<String>,
    #[serde(default)]
    pub distinct: bool,
    #[serde(default)]
    pub keys_only: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ancestor: Option<Key>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_cursor: Option<Cursor>,
}

impl Query {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            filters: Vec::new(),
            orders: Vec::new(),
            projection: Vec::new(),
            distinct: false,
            keys_only: false,
            ancestor: None,
            limit: None,
            offset: 0,
            start_cursor: None,
        }
    }

    /// The part of the query a count depends on: kind, filters and ancestor.
    pub fn count_view(&self) -> Query {
        Query {
            kind: self.kind.clone(),
            filters: self.filters.clone(),
            ancestor: self.ancestor.clone(),
            ..Query::new(String::new())
        }
    }
}

/// Whether a backend has more results after a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoreResults {
    /// The batch was cut short; resume from the batch's end cursor.
    NotFinished,
    /// The query limit was reached and more entities match.
    MoreResultsAfterLimit,
    NoMoreResults,
}

/// One entity in a query batch. `properties` is `None` for keys-only queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityResult {
    pub key: Key,
    #[serde(default)]
    pub properties: Option<Value>,
    /// Position immediately after this entity.
    pub cursor: Cursor,
}

/// One round trip's worth of query results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryBatch {
    pub results: Vec<EntityResult>,
    /// How many results the backend skipped to honor the offset.
    #[serde(default)]
    pub skipped_results: usize,
    /// Position after the skipped results, when any were skipped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipped_cursor: Option<Cursor>,
    /// Position after the last result (or after the skipped results).
    pub end_cursor: Cursor,
    pub more_results: MoreResults,
}

/// An aggregation computed by the backend over a query's matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Aggregation {
    Count { alias: String },
}

impl Aggregation {
    pub fn count(alias: impl Into<String>) -> Self {
        Aggregation::Count {
            alias: alias.into(),
        }
    }

    pub fn alias(&self) -> &str {
        match self {
            Aggregation::Count { alias } => alias,
        }
    }
}

/// Aggregation results keyed by alias.
pub type AggregationResult = BTreeMap<String, Value>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::filter::FilterOperator;
    use serde_json::json;

    #[test]
    fn test_cursor_string_roundtrip_is_verbatim() {
        let cursor = Cursor::from_bytes(vec![0xde, 0xad, 0xbe, 0xef, 0x00, 0xff]);
        let encoded = cursor.encode();
        assert!(!encoded.contains('='));
        let decoded = Cursor::decode(&encoded).unwrap();
        assert_eq!(decoded, cursor);
        assert_eq!(decoded.encode(), encoded);
    }

    #[test]
    fn test_cursor_decode_rejects_empty_and_malformed() {
        assert!(matches!(Cursor::decode(""), Err(CursorError::Empty)));
        assert!(matches!(
            Cursor::decode("not a cursor!"),
            Err(CursorError::Base64(_))
        ));
    }

    #[test]
    fn test_cursor_serializes_as_string() {
        let cursor = Cursor::from_bytes(b"position".to_vec());
        let value = serde_json::to_value(&cursor).unwrap();
        assert_eq!(value, json!(cursor.encode()));
        let back: Cursor = serde_json::from_value(value).unwrap();
        assert_eq!(back, cursor);
    }

    #[test]
    fn test_count_view_keeps_only_filter_state() {
        let mut query = Query::new("User");
        query.filters.push(Filter::new(
            "status",
            FilterOperator::Equal,
            json!("active"),
        ));
        query.orders.push(Order::desc("created"));
        query.ancestor = Some(Key::name("Org", "acme"));
        query.limit = Some(10);
        query.offset = 5;
        query.distinct = true;
        query.projection = vec!["status".into()];
        query.start_cursor = Some(Cursor::from_bytes(vec![1]));

        let view = query.count_view();
        assert_eq!(view.kind, "User");
        assert_eq!(view.filters, query.filters);
        assert_eq!(view.ancestor, query.ancestor);
        assert!(view.orders.is_empty());
        assert!(view.projection.is_empty());
        assert!(!view.distinct);
        assert_eq!(view.limit, None);
        assert_eq!(view.offset, 0);
        assert_eq!(view.start_cursor, None);
    }
}

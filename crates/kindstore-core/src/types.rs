//! Core types: entity keys, batch ceilings, and the record ↔ document codec.

use std::cmp::Ordering;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CodecError;

/// Name of the identity pseudo-field. Filtering or ordering on it targets the
/// entity key instead of a stored property.
pub const KEY_FIELD: &str = "__key__";

/// Maximum number of entities written or deleted per backend call.
pub const MAX_BATCH_SIZE: usize = 500;

/// Maximum number of keys looked up per backend call.
pub const MAX_LOOKUP_SIZE: usize = 1000;

/// Store name used as the first token of failure log lines.
pub const STORE_NAME: &str = "kindstore";

/// The identifier part of a key.
///
/// Numeric ids sort before names. An incomplete id is one the backend has
/// not allocated yet; it only appears on keys handed to a put.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyId {
    Incomplete,
    Id(i64),
    Name(String),
}

/// A (kind, id) entity identifier, optionally nested under a parent key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Key {
    pub kind: String,
    pub id: KeyId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<Box<Key>>,
}

impl Key {
    /// A key identified by a string name.
    pub fn name(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: KeyId::Name(name.into()),
            parent: None,
        }
    }

    /// A key identified by a numeric id.
    pub fn id(kind: impl Into<String>, id: i64) -> Self {
        Self {
            kind: kind.into(),
            id: KeyId::Id(id),
            parent: None,
        }
    }

    /// A key whose id will be allocated by the backend on insert.
    pub fn incomplete(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: KeyId::Incomplete,
            parent: None,
        }
    }

    pub fn with_parent(mut self, parent: Key) -> Self {
        self.parent = Some(Box::new(parent));
        self
    }

    pub fn is_incomplete(&self) -> bool {
        self.id == KeyId::Incomplete
    }

    pub fn name_str(&self) -> Option<&str> {
        match &self.id {
            KeyId::Name(name) => Some(name),
            _ => None,
        }
    }

    pub fn id_num(&self) -> Option<i64> {
        match self.id {
            KeyId::Id(id) => Some(id),
            _ => None,
        }
    }

    /// Whether `ancestor` is this key or one of its parents.
    pub fn has_ancestor(&self, ancestor: &Key) -> bool {
        let mut current = Some(self);
        while let Some(key) = current {
            if key == ancestor {
                return true;
            }
            current = key.parent.as_deref();
        }
        false
    }

    /// Path elements from the root ancestor down to this key.
    fn path(&self) -> Vec<&Key> {
        let mut path = Vec::new();
        let mut current = Some(self);
        while let Some(key) = current {
            path.push(key);
            current = key.parent.as_deref();
        }
        path.reverse();
        path
    }
}

impl Ord for Key {
    /// Keys order by ancestor path, element by element: kind first, then id.
    fn cmp(&self, other: &Self) -> Ordering {
        let left = self.path();
        let right = other.path();
        for (a, b) in left.iter().zip(right.iter()) {
            let ord = a.kind.cmp(&b.kind).then_with(|| a.id.cmp(&b.id));
            if ord != Ordering::Equal {
                return ord;
            }
        }
        left.len().cmp(&right.len())
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(parent) = &self.parent {
            write!(f, "{parent}/")?;
        }
        match &self.id {
            KeyId::Incomplete => write!(f, "{}:?", self.kind),
            KeyId::Id(id) => write!(f, "{}:{id}", self.kind),
            KeyId::Name(name) => write!(f, "{}:{name:?}", self.kind),
        }
    }
}

/// A record type the query layer can read and write.
///
/// Records are stored as JSON objects. `Default` supplies the placeholder
/// returned by `get_multi` for ids that have no entity.
pub trait Entity: Serialize + DeserializeOwned + Default {}

impl<T> Entity for T where T: Serialize + DeserializeOwned + Default {}

/// Convert a record into the backend's native item representation.
pub fn to_document<T: Serialize>(entity: &T) -> Result<Value, CodecError> {
    let value = serde_json::to_value(entity).map_err(CodecError::Serialize)?;
    match value {
        Value::Object(_) => Ok(value),
        Value::Null => Err(CodecError::NotAnObject("null")),
        Value::Bool(_) => Err(CodecError::NotAnObject("boolean")),
        Value::Number(_) => Err(CodecError::NotAnObject("number")),
        Value::String(_) => Err(CodecError::NotAnObject("string")),
        Value::Array(_) => Err(CodecError::NotAnObject("array")),
    }
}

/// Convert a stored document back into a record.
///
/// `None` stands for a keys-only result and decodes from an empty object.
pub fn from_document<T: DeserializeOwned>(document: Option<Value>) -> Result<T, CodecError> {
    let document = document.unwrap_or_else(|| Value::Object(Map::new()));
    serde_json::from_value(document).map_err(CodecError::Deserialize)
}

//! # kindstore
//!
//! A typed query-builder and batch-mutation layer over a kind/key-addressed
//! document store.
//!
//! Queries are built fluently against one kind and executed as full
//! materialization, single fetch, cursor pagination or a count. Writes,
//! lookups and delete-by-query are chunked over the backend's per-call
//! ceilings. The store itself sits behind the [`backend::Backend`] trait:
//! [`backend::MemoryBackend`] runs in process, [`backend::RemoteBackend`]
//! talks to a `kindstore-server` emulator over a Unix socket.
//!
//! ## Quick Start
//!
//! ```no_run
//! use kindstore_core::api::{Connection, FilterOperator};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Default, Serialize, Deserialize)]
//! struct User {
//!     name: String,
//!     status: String,
//! }
//!
//! # async fn run() -> kindstore_core::error::Result<()> {
//! let conn = Connection::in_memory("demo", "");
//! let users = conn.query::<User>("User");
//!
//! users
//!     .upsert("alice", &User { name: "Alice".into(), status: "active".into() })
//!     .await?;
//!
//! let active = users
//!     .clone()
//!     .with_filter("status", FilterOperator::Equal, "active")
//!     .with_limit(10);
//! let found = active.select().await?;
//! let count = active.total().await?;
//! assert_eq!(found.len() as i64, count);
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod backend;
pub mod config;
pub mod error;
pub mod protocol;
pub mod types;

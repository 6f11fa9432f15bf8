//! kindstore emulator server.
//!
//! Serves in-memory kindstore datasets over a Unix domain socket using the
//! JSON-lines protocol in `kindstore_core::protocol`, so that
//! `Connection::connect` can be exercised without a managed store.

pub mod server;

pub use server::{Datasets, KindstoreServer};

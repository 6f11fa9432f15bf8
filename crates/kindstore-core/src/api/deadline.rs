use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::error;

use crate::error::{BackendError, Error, Result};
use crate::types::STORE_NAME;

/// The point in time after which an operation's backend calls fail.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Deadline {
    at: Option<Instant>,
    operation: &'static str,
}

impl Deadline {
    pub(crate) fn start(timeout: Option<Duration>, operation: &'static str) -> Self {
        Self {
            at: timeout.map(|t| Instant::now() + t),
            operation,
        }
    }

    /// Await one backend round trip, failing with `Error::Cancelled` once
    /// the deadline passes.
    pub(crate) async fn call<F, R>(&self, fut: F) -> Result<R>
    where
        F: Future<Output = std::result::Result<R, BackendError>>,
    {
        match self.at {
            Some(at) => match tokio::time::timeout_at(at, fut).await {
                Ok(res) => res.map_err(Error::from),
                Err(_) => Err(Error::Cancelled {
                    operation: self.operation,
                }),
            },
            None => fut.await.map_err(Error::from),
        }
    }
}

/// Log a failed operation and hand the error back unchanged.
///
/// The message reads `kindstore <kind> <operation>-error <details>`, with
/// underscores in the operation name written as hyphens
/// (`upsert_multi` logs `upsert-multi-error`). The structured `operation`
/// field keeps the method name.
pub(crate) fn failed(kind: &str, operation: &str, err: Error) -> Error {
    let token = operation.replace('_', "-");
    error!(kind, operation, "{STORE_NAME} {kind} {token}-error {err}");
    err
}

//! Writes, key lookups and delete-by-query, chunked over the backend's
//! per-call ceilings.

use std::borrow::Borrow;

use tracing::debug;

use crate::error::{BackendError, Error, Result};
use crate::types::{Entity, Key, MAX_BATCH_SIZE, from_document, to_document};

use super::builders::QueryBuilder;
use super::deadline::failed;

impl<T: Entity> QueryBuilder<T> {
    /// Write one entity under `(kind, id)`, replacing any existing one.
    pub async fn upsert(&self, id: &str, entity: &T) -> Result<()> {
        const OP: &str = "upsert";
        let write = async {
            let document = to_document(entity)?;
            self.deadline(OP)
                .call(
                    self.conn
                        .backend()
                        .put_multi(vec![(Key::name(self.kind(), id), document)]),
                )
                .await?;
            Ok::<_, Error>(())
        };
        write.await.map_err(|e| failed(self.kind(), OP, e))
    }

    /// Write many entities keyed by id.
    ///
    /// Entities are sent in chunks of at most `MAX_BATCH_SIZE`, one after
    /// another. The first failing chunk aborts the call; earlier chunks stay
    /// written.
    pub async fn upsert_multi<I, K, V>(&self, items: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Borrow<T>,
    {
        const OP: &str = "upsert_multi";
        let write = async {
            let mut entities = Vec::new();
            for (id, entity) in items {
                let entity: &T = entity.borrow();
                let document = to_document(entity)?;
                entities.push((Key::name(self.kind(), id.as_ref()), document));
            }
            if entities.is_empty() {
                return Ok(());
            }

            let deadline = self.deadline(OP);
            let total = entities.len();
            let mut chunk = Vec::with_capacity(MAX_BATCH_SIZE.min(total));
            for (i, entity) in entities.into_iter().enumerate() {
                chunk.push(entity);
                if chunk.len() == MAX_BATCH_SIZE || i + 1 == total {
                    let batch = std::mem::take(&mut chunk);
                    debug!(kind = %self.kind(), entities = batch.len(), "writing chunk");
                    deadline.call(self.conn.backend().put_multi(batch)).await?;
                }
            }
            Ok::<_, Error>(())
        };
        write.await.map_err(|e| failed(self.kind(), OP, e))
    }

    /// Fetch entities by id in one lookup.
    ///
    /// The result has one record per id, in input order; ids without an
    /// entity yield `T::default()`.
    pub async fn get_multi<I, K>(&self, ids: I) -> Result<Vec<T>>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        const OP: &str = "get_multi";
        let keys: Vec<Key> = ids
            .into_iter()
            .map(|id| Key::name(self.kind(), id.as_ref()))
            .collect();
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let read = async {
            let found = self
                .deadline(OP)
                .call(self.conn.backend().lookup(&keys))
                .await?;
            found
                .into_iter()
                .map(|document| match document {
                    Some(document) => from_document(Some(document)).map_err(Error::from),
                    None => Ok(T::default()),
                })
                .collect::<Result<Vec<T>>>()
        };
        read.await.map_err(|e| failed(self.kind(), OP, e))
    }

    /// Write `entity` under a backend-allocated numeric id and return its key.
    pub async fn insert_with_auto_id(&self, entity: &T) -> Result<Key> {
        const OP: &str = "insert_with_auto_id";
        let write = async {
            let document = to_document(entity)?;
            let keys = self
                .deadline(OP)
                .call(
                    self.conn
                        .backend()
                        .put_multi(vec![(Key::incomplete(self.kind()), document)]),
                )
                .await?;
            keys.into_iter()
                .next()
                .ok_or_else(|| Error::from(BackendError::protocol("put returned no key")))
        };
        write.await.map_err(|e| failed(self.kind(), OP, e))
    }

    /// Delete every entity the current query selects and return how many
    /// keys were deleted.
    ///
    /// The query's limit, offset and cursor apply. Keys are deleted in
    /// chunks of `MAX_BATCH_SIZE`, one after another; the first failing
    /// chunk aborts the call without undoing earlier chunks.
    pub async fn delete(&self) -> Result<usize> {
        const OP: &str = "delete";
        let run = async {
            let deadline = self.deadline(OP);
            let keys = self.matching_keys(deadline).await?;
            for chunk in keys.chunks(MAX_BATCH_SIZE) {
                debug!(kind = %self.kind(), keys = chunk.len(), "deleting chunk");
                deadline.call(self.conn.backend().delete_multi(chunk)).await?;
            }
            Ok::<_, Error>(keys.len())
        };
        run.await.map_err(|e| failed(self.kind(), OP, e))
    }
}

//! Atomic bulk writes.
//!
//! A batch is validated in full before the database is touched, then
//! applied inside one transaction. Dropping the transaction on any error
//! (including cancellation between statements) rolls every row back.

use std::collections::BTreeSet;

use aiep_vector::Embedding;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, TransactionBehavior};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Result, StoreError};
use crate::kind::EmbeddingKind;
use crate::store::{
    fetch, insert_row, not_found, now_secs, parent_not_found, validate_new, write_embedding,
    EmbeddingStore,
};

/// Largest number of entries accepted in one batch.
pub const MAX_BATCH_SIZE: usize = 1000;

/// One entry of a batch embedding update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingUpdate {
    pub id: i64,
    pub embedding: Vec<f32>,
}

impl EmbeddingUpdate {
    pub fn new(id: i64, embedding: Vec<f32>) -> Self {
        Self { id, embedding }
    }
}

fn check_size(len: usize) -> Result<()> {
    if len > MAX_BATCH_SIZE {
        return Err(StoreError::BatchTooLarge {
            size: len,
            max: MAX_BATCH_SIZE,
        });
    }
    Ok(())
}

impl<K: EmbeddingKind> EmbeddingStore<K> {
    /// Overwrite the embeddings of several existing rows, all or nothing.
    ///
    /// Fails `NotFound` without writing anything if any id does not name
    /// a live row. Later entries for a repeated id win.
    pub async fn apply_batch(
        &self,
        updates: Vec<EmbeddingUpdate>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if updates.is_empty() {
            return Err(StoreError::EmptyBatch);
        }
        check_size(updates.len())?;

        let mut rows = Vec::with_capacity(updates.len());
        for update in updates {
            if update.id <= 0 {
                return Err(not_found::<K>(update.id));
            }
            let embedding = Embedding::new(update.embedding)?;
            rows.push((update.id, embedding.to_blob()));
        }

        let count = rows.len();
        let result = self
            .db
            .run(cancel, move |conn, token| write_batch::<K>(conn, token, &rows))
            .await;
        match &result {
            Ok(()) => info!(kind = %K::KIND, count, "Embedding batch committed"),
            Err(e) => warn!(kind = %K::KIND, count, error = %e, "Embedding batch rolled back"),
        }
        result
    }

    /// Insert several entities in one transaction, all or nothing.
    ///
    /// Every entity is validated first; every distinct parent must exist.
    /// An empty input returns an empty list.
    pub async fn create_batch(
        &self,
        entities: Vec<K::New>,
        cancel: &CancellationToken,
    ) -> Result<Vec<K::Entity>> {
        if entities.is_empty() {
            return Ok(Vec::new());
        }
        check_size(entities.len())?;

        let mut prepared = Vec::with_capacity(entities.len());
        for new in entities {
            let embedding = validate_new::<K>(&new)?;
            prepared.push((new, embedding));
        }

        let count = prepared.len();
        let result = self
            .db
            .run(cancel, move |conn, token| insert_batch::<K>(conn, token, &prepared))
            .await;
        match &result {
            Ok(_) => info!(kind = %K::KIND, count, "Create batch committed"),
            Err(e) => warn!(kind = %K::KIND, count, error = %e, "Create batch rolled back"),
        }
        result
    }
}

fn write_batch<K: EmbeddingKind>(
    conn: &mut Connection,
    token: &CancellationToken,
    rows: &[(i64, Vec<u8>)],
) -> Result<()> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let ids: Vec<i64> = rows.iter().map(|(id, _)| *id).collect();
    let existing = existing_ids(&tx, K::TABLE, &ids)?;
    if let Some(missing) = ids.iter().find(|id| !existing.contains(*id)) {
        return Err(not_found::<K>(*missing));
    }
    debug!(kind = %K::KIND, rows = rows.len(), distinct = existing.len(), "Batch ids verified");

    let now = now_secs();
    for (id, blob) in rows {
        if token.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        if write_embedding::<K>(&tx, *id, blob, now)? == 0 {
            return Err(not_found::<K>(*id));
        }
    }

    tx.commit()?;
    Ok(())
}

fn insert_batch<K: EmbeddingKind>(
    conn: &mut Connection,
    token: &CancellationToken,
    prepared: &[(K::New, Option<Embedding>)],
) -> Result<Vec<K::Entity>> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let parents: Vec<i64> = prepared.iter().map(|(new, _)| K::parent_id(new)).collect();
    let existing = existing_ids(&tx, K::PARENT.table, &parents)?;
    if let Some(missing) = parents.iter().find(|id| !existing.contains(*id)) {
        return Err(parent_not_found::<K>(*missing));
    }

    let mut created = Vec::with_capacity(prepared.len());
    for (new, embedding) in prepared {
        if token.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        let id = insert_row::<K>(&tx, new, embedding.as_ref())?;
        created.push(fetch::<K>(&tx, id)?.ok_or_else(|| not_found::<K>(id))?);
    }

    tx.commit()?;
    Ok(created)
}

/// The subset of `ids` naming live rows of `table`.
fn existing_ids(conn: &Connection, table: &str, ids: &[i64]) -> Result<BTreeSet<i64>> {
    let distinct: BTreeSet<i64> = ids.iter().copied().collect();
    let placeholders: Vec<String> = (1..=distinct.len()).map(|i| format!("?{}", i)).collect();
    let sql = format!(
        "SELECT id FROM {} WHERE deleted_at IS NULL AND id IN ({})",
        table,
        placeholders.join(", ")
    );
    let mut stmt = conn.prepare(&sql)?;
    let found = stmt
        .query_map(params_from_iter(distinct.iter().map(|id| Value::Integer(*id))), |row| {
            row.get::<_, i64>(0)
        })?
        .collect::<rusqlite::Result<BTreeSet<i64>>>()?;
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinds::NewChatMessage;
    use crate::store::MessageStore;
    use crate::test_utils::{seed_session, seed_user, unit_vector};
    use crate::{Database, ErrorKind};
    use aiep_core::MessageRole;
    use rusqlite::functions::FunctionFlags;
    use std::panic::AssertUnwindSafe;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    async fn setup(n: usize) -> (MessageStore, i64, Vec<i64>) {
        let db = Arc::new(Database::in_memory().unwrap());
        let user = seed_user(&db, "lu@uni.edu");
        let session = seed_session(&db, user);
        let store = MessageStore::new(db);
        let token = CancellationToken::new();
        let mut ids = Vec::new();
        for i in 0..n {
            let msg = store
                .create(
                    NewChatMessage::new(session, MessageRole::User, format!("message {}", i)),
                    &token,
                )
                .await
                .unwrap();
            ids.push(msg.id);
        }
        (store, session, ids)
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let (store, _, _) = setup(0).await;
        let err = store
            .apply_batch(Vec::new(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EmptyBatch);
    }

    #[tokio::test]
    async fn test_batch_too_large() {
        let (store, _, _) = setup(0).await;
        let updates = (1..=1001).map(|id| EmbeddingUpdate::new(id, unit_vector(0))).collect();
        let err = store
            .apply_batch(updates, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::BatchTooLarge { size: 1001, max: 1000 }));
    }

    #[tokio::test]
    async fn test_invalid_entry_aborts_before_backend() {
        let (store, _, ids) = setup(2).await;
        let token = CancellationToken::new();
        let updates = vec![
            EmbeddingUpdate::new(ids[0], unit_vector(0)),
            EmbeddingUpdate::new(ids[1], vec![0.5; 12]),
        ];
        let err = store.apply_batch(updates, &token).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Dimension);
        assert!(store.get_by_id(ids[0], &token).await.unwrap().embedding.is_none());

        let zero = vec![EmbeddingUpdate::new(0, unit_vector(0))];
        let err = store.apply_batch(zero, &token).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_batch_applies_all_rows() {
        let (store, _, ids) = setup(3).await;
        let token = CancellationToken::new();
        let updates = ids
            .iter()
            .enumerate()
            .map(|(axis, id)| EmbeddingUpdate::new(*id, unit_vector(axis)))
            .collect();
        store.apply_batch(updates, &token).await.unwrap();

        for (axis, id) in ids.iter().enumerate() {
            let msg = store.get_by_id(*id, &token).await.unwrap();
            assert_eq!(msg.embedding.unwrap().as_slice(), unit_vector(axis).as_slice());
        }
    }

    #[tokio::test]
    async fn test_repeated_id_last_write_wins() {
        let (store, _, ids) = setup(1).await;
        let token = CancellationToken::new();
        let updates = vec![
            EmbeddingUpdate::new(ids[0], unit_vector(0)),
            EmbeddingUpdate::new(ids[0], unit_vector(7)),
        ];
        store.apply_batch(updates, &token).await.unwrap();
        let msg = store.get_by_id(ids[0], &token).await.unwrap();
        assert_eq!(msg.embedding.unwrap().as_slice(), unit_vector(7).as_slice());
    }

    #[tokio::test]
    async fn test_cancelled_batch_writes_nothing() {
        let (store, _, ids) = setup(1).await;
        let token = CancellationToken::new();
        token.cancel();
        let err = store
            .apply_batch(vec![EmbeddingUpdate::new(ids[0], unit_vector(0))], &token)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);

        let fresh = CancellationToken::new();
        assert!(store.get_by_id(ids[0], &fresh).await.unwrap().embedding.is_none());
    }

    #[tokio::test]
    async fn test_cancel_mid_batch_rolls_back() {
        let (store, _, ids) = setup(5).await;
        let token = CancellationToken::new();
        for (axis, id) in ids.iter().enumerate() {
            store.update_embedding(*id, unit_vector(axis), &token).await.unwrap();
        }

        // Fire the token from inside the transaction after the second row write.
        let writes = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&writes);
        let hook = AssertUnwindSafe(token.clone());
        store
            .db
            .with_conn(move |conn| {
                conn.create_scalar_function("note_write", 0, FunctionFlags::SQLITE_UTF8, move |_| {
                    let hook = &hook;
                    let n = seen.fetch_add(1, Ordering::SeqCst) + 1;
                    if n == 2 {
                        hook.cancel();
                    }
                    Ok(n as i64)
                })?;
                conn.execute_batch(
                    "CREATE TEMP TRIGGER note_embedding_write
                     AFTER UPDATE OF embedding ON chat_messages
                     BEGIN SELECT note_write(); END;",
                )?;
                Ok(())
            })
            .unwrap();

        let updates = ids
            .iter()
            .map(|id| EmbeddingUpdate::new(*id, unit_vector(100)))
            .collect();
        let err = store.apply_batch(updates, &token).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert!(writes.load(Ordering::SeqCst) >= 2);

        let fresh = CancellationToken::new();
        for (axis, id) in ids.iter().enumerate() {
            let msg = store.get_by_id(*id, &fresh).await.unwrap();
            assert_eq!(msg.embedding.unwrap().as_slice(), unit_vector(axis).as_slice());
        }
    }

    #[tokio::test]
    async fn test_create_batch_is_atomic() {
        let (store, session, _) = setup(0).await;
        let token = CancellationToken::new();
        let batch = vec![
            NewChatMessage::new(session, MessageRole::User, "ok"),
            NewChatMessage::new(session + 50, MessageRole::User, "orphan"),
        ];
        let err = store.create_batch(batch, &token).await.unwrap_err();
        assert!(matches!(err, StoreError::ParentNotFound { .. }));
        assert_eq!(store.stats(&token).await.unwrap().total, 0);

        let batch = vec![
            NewChatMessage::new(session, MessageRole::User, "q"),
            NewChatMessage::new(session, MessageRole::Assistant, "a").with_embedding(unit_vector(2)),
        ];
        let created = store.create_batch(batch, &token).await.unwrap();
        assert_eq!(created.len(), 2);
        assert!(created[1].embedding.is_some());
        assert!(store.create_batch(Vec::new(), &token).await.unwrap().is_empty());
    }
}

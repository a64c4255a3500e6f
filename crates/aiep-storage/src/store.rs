//! The generic embedding store.
//!
//! One [`EmbeddingStore`] is instantiated per entity kind. All SQL is
//! assembled from the kind's descriptor, so messages, insights and topics
//! share a single implementation of every operation.

use std::marker::PhantomData;
use std::sync::Arc;

use aiep_vector::Embedding;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::db::Database;
use crate::error::{Result, StoreError};
use crate::kind::{Binding, EmbeddingKind};
use crate::kinds::{InsightKind, MessageKind, TopicKind};

pub type MessageStore = EmbeddingStore<MessageKind>;
pub type InsightStore = EmbeddingStore<InsightKind>;
pub type TopicStore = EmbeddingStore<TopicKind>;

/// Row counts for one entity kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct KindStats {
    /// Live (not soft-deleted) rows.
    pub total: u64,
    /// Live rows with an embedding.
    pub vectorised: u64,
}

/// Persistence of one entity kind together with its embedding.
pub struct EmbeddingStore<K: EmbeddingKind> {
    pub(crate) db: Arc<Database>,
    _kind: PhantomData<fn() -> K>,
}

impl<K: EmbeddingKind> Clone for EmbeddingStore<K> {
    fn clone(&self) -> Self {
        Self::new(Arc::clone(&self.db))
    }
}

impl<K: EmbeddingKind> std::fmt::Debug for EmbeddingStore<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingStore")
            .field("kind", &K::KIND)
            .finish()
    }
}

impl<K: EmbeddingKind> EmbeddingStore<K> {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            _kind: PhantomData,
        }
    }

    pub async fn get_by_id(&self, id: i64, cancel: &CancellationToken) -> Result<K::Entity> {
        if id <= 0 {
            return Err(not_found::<K>(id));
        }
        let entity = self
            .db
            .run(cancel, move |conn, _| fetch::<K>(conn, id))
            .await?;
        debug!(kind = %K::KIND, id, found = entity.is_some(), "get_by_id");
        entity.ok_or_else(|| not_found::<K>(id))
    }

    /// Insert a new entity after checking that its parent exists.
    pub async fn create(&self, new: K::New, cancel: &CancellationToken) -> Result<K::Entity> {
        let embedding = validate_new::<K>(&new)?;
        let entity = self
            .db
            .run(cancel, move |conn, _| {
                let parent_id = K::parent_id(&new);
                if !parent_exists::<K>(conn, parent_id)? {
                    return Err(parent_not_found::<K>(parent_id));
                }
                let id = insert_row::<K>(conn, &new, embedding.as_ref())?;
                fetch::<K>(conn, id)?.ok_or_else(|| not_found::<K>(id))
            })
            .await?;
        debug!(kind = %K::KIND, id = K::entity_id(&entity), "Created entity");
        Ok(entity)
    }

    /// Attach or replace the embedding of an existing entity.
    pub async fn update_embedding(
        &self,
        id: i64,
        vector: Vec<f32>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let embedding = Embedding::new(vector)?;
        if id <= 0 {
            return Err(not_found::<K>(id));
        }
        let blob = embedding.to_blob();
        let affected = self
            .db
            .run(cancel, move |conn, _| write_embedding::<K>(conn, id, &blob, now_secs()))
            .await?;
        debug!(kind = %K::KIND, id, affected, "update_embedding");
        if affected == 0 {
            return Err(not_found::<K>(id));
        }
        Ok(())
    }

    /// Apply a partial update to the entity's scalar fields.
    ///
    /// Absent patch fields are left untouched and an empty patch does
    /// nothing. The embedding is never modified here.
    pub async fn update(&self, id: i64, patch: K::Patch, cancel: &CancellationToken) -> Result<()> {
        if id <= 0 {
            return Err(not_found::<K>(id));
        }
        K::validate_patch(&patch)?;
        let bindings = K::patch_bindings(&patch);
        if bindings.is_empty() {
            debug!(kind = %K::KIND, id, "Empty patch, nothing to update");
            return Ok(());
        }

        let affected = self
            .db
            .run(cancel, move |conn, _| {
                let mut values: Vec<Value> = Vec::with_capacity(bindings.len() + 2);
                let mut assignments = Vec::with_capacity(bindings.len() + 1);
                for (column, value) in bindings {
                    values.push(value);
                    assignments.push(format!("{} = ?{}", column, values.len()));
                }
                values.push(Value::Integer(now_secs()));
                assignments.push(format!("updated_at = ?{}", values.len()));
                values.push(Value::Integer(id));

                let sql = format!(
                    "UPDATE {} SET {} WHERE id = ?{} AND deleted_at IS NULL",
                    K::TABLE,
                    assignments.join(", "),
                    values.len()
                );
                Ok(conn.execute(&sql, params_from_iter(values.iter()))?)
            })
            .await?;
        debug!(kind = %K::KIND, id, affected, "update");
        if affected == 0 {
            return Err(not_found::<K>(id));
        }
        Ok(())
    }

    /// Soft-delete the entity. Its embedding stops taking part in searches.
    pub async fn delete(&self, id: i64, cancel: &CancellationToken) -> Result<()> {
        if id <= 0 {
            return Err(not_found::<K>(id));
        }
        let affected = self
            .db
            .run(cancel, move |conn, _| {
                let sql = format!(
                    "UPDATE {} SET deleted_at = ?1 WHERE id = ?2 AND deleted_at IS NULL",
                    K::TABLE
                );
                Ok(conn.execute(&sql, params![now_secs(), id])?)
            })
            .await?;
        if affected == 0 {
            return Err(not_found::<K>(id));
        }
        info!(kind = %K::KIND, id, "Deleted entity");
        Ok(())
    }

    pub async fn stats(&self, cancel: &CancellationToken) -> Result<KindStats> {
        self.db
            .run(cancel, |conn, _| {
                let sql = format!(
                    "SELECT COUNT(*), COUNT(embedding) FROM {} WHERE deleted_at IS NULL",
                    K::TABLE
                );
                let (total, vectorised): (i64, i64) =
                    conn.query_row(&sql, [], |row| Ok((row.get(0)?, row.get(1)?)))?;
                Ok(KindStats {
                    total: total.max(0) as u64,
                    vectorised: vectorised.max(0) as u64,
                })
            })
            .await
    }
}

// -----------------------------------------------------------------------------
// Helpers shared with the search and batch modules. All run on the blocking
// pool with the connection already locked.
// -----------------------------------------------------------------------------

pub(crate) fn not_found<K: EmbeddingKind>(id: i64) -> StoreError {
    StoreError::NotFound {
        kind: K::KIND.as_str(),
        id,
    }
}

pub(crate) fn parent_not_found<K: EmbeddingKind>(id: i64) -> StoreError {
    StoreError::ParentNotFound {
        parent: K::PARENT.name,
        id,
    }
}

pub(crate) fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Validate a new entity without touching the database.
pub(crate) fn validate_new<K: EmbeddingKind>(new: &K::New) -> Result<Option<Embedding>> {
    if K::parent_id(new) <= 0 {
        return Err(StoreError::validation(format!(
            "{} is required",
            K::PARENT.column
        )));
    }
    K::validate_new(new)?;
    Ok(Embedding::from_optional(K::raw_embedding(new).to_vec())?)
}

pub(crate) fn fetch<K: EmbeddingKind>(conn: &Connection, id: i64) -> Result<Option<K::Entity>> {
    let sql = format!(
        "SELECT {} FROM {} WHERE id = ?1 AND deleted_at IS NULL",
        K::COLUMNS,
        K::TABLE
    );
    conn.prepare_cached(&sql)?
        .query_row([id], |row| Ok(K::row_to_entity(row)))
        .optional()?
        .transpose()
}

pub(crate) fn parent_exists<K: EmbeddingKind>(conn: &Connection, parent_id: i64) -> Result<bool> {
    let sql = format!(
        "SELECT EXISTS (SELECT 1 FROM {} WHERE id = ?1 AND deleted_at IS NULL)",
        K::PARENT.table
    );
    Ok(conn.query_row(&sql, [parent_id], |row| row.get(0))?)
}

pub(crate) fn insert_row<K: EmbeddingKind>(
    conn: &Connection,
    new: &K::New,
    embedding: Option<&Embedding>,
) -> Result<i64> {
    let now = now_secs();
    let mut bindings: Vec<Binding> = K::insert_bindings(new);
    bindings.push((
        "embedding",
        embedding.map_or(Value::Null, |e| Value::Blob(e.to_blob())),
    ));
    bindings.push(("created_at", Value::Integer(now)));
    bindings.push(("updated_at", Value::Integer(now)));

    let columns: Vec<&str> = bindings.iter().map(|(column, _)| *column).collect();
    let placeholders: Vec<String> = (1..=bindings.len()).map(|i| format!("?{}", i)).collect();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        K::TABLE,
        columns.join(", "),
        placeholders.join(", ")
    );
    conn.prepare_cached(&sql)?
        .execute(params_from_iter(bindings.iter().map(|(_, value)| value)))?;
    Ok(conn.last_insert_rowid())
}

pub(crate) fn write_embedding<K: EmbeddingKind>(
    conn: &Connection,
    id: i64,
    blob: &[u8],
    now: i64,
) -> Result<usize> {
    let sql = format!(
        "UPDATE {} SET embedding = ?1, updated_at = ?2 WHERE id = ?3 AND deleted_at IS NULL",
        K::TABLE
    );
    Ok(conn.prepare_cached(&sql)?.execute(params![blob, now, id])?)
}

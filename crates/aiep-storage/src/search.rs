//! Semantic (nearest-neighbour) search over stored embeddings.
//!
//! Candidates are the live, vectorised rows of a kind. They are ranked by
//! `cosine_distance` to the query vector, ascending, with the row id as
//! the tie-break. An empty ranking is reported as
//! [`StoreError::NoResults`], never as an empty list.

use aiep_vector::codec::{encode_blob, require_full};
use aiep_vector::{to_distance_bound, DistanceBound, Embedding};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::kind::{Binding, EmbeddingKind};
use crate::store::{not_found, EmbeddingStore};

/// Parameters of a filtered similarity search.
#[derive(Debug, Clone)]
pub struct SimilarityQuery<S> {
    pub scope: S,
    pub limit: usize,
    /// Minimum cosine similarity in `[0, 1]`; `0.0` disables the threshold.
    pub min_similarity: f32,
}

impl<S: Default> SimilarityQuery<S> {
    pub fn new(limit: usize) -> Self {
        Self {
            scope: S::default(),
            limit,
            min_similarity: 0.0,
        }
    }
}

impl<S> SimilarityQuery<S> {
    pub fn with_scope(mut self, scope: S) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_min_similarity(mut self, min_similarity: f32) -> Self {
        self.min_similarity = min_similarity;
        self
    }
}

/// A search hit and its cosine distance to the query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Scored<E> {
    pub entity: E,
    pub distance: f64,
}

/// Everything a ranked scan needs, validated and owned.
struct RankedScan {
    query: Vec<u8>,
    scope: Vec<Binding>,
    bound: Option<DistanceBound>,
    exclude: Option<i64>,
    limit: usize,
}

impl<K: EmbeddingKind> EmbeddingStore<K> {
    /// The `limit` nearest neighbours of `query` among all vectorised rows.
    pub async fn search_by_embedding(
        &self,
        query: &[f32],
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<Scored<K::Entity>>> {
        require_full(query)?;
        check_limit(limit)?;
        let scan = RankedScan {
            query: encode_blob(query),
            scope: Vec::new(),
            bound: None,
            exclude: None,
            limit,
        };
        self.execute_scan(scan, cancel).await
    }

    /// Like [`search_by_embedding`](Self::search_by_embedding), restricted
    /// to the query's scope and, when `min_similarity > 0`, to candidates
    /// at most `1 - min_similarity` away.
    pub async fn search_by_embedding_with_filter(
        &self,
        query: &[f32],
        params: SimilarityQuery<K::Scope>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Scored<K::Entity>>> {
        require_full(query)?;
        check_limit(params.limit)?;
        let bound = to_distance_bound(params.min_similarity)?;
        let scan = RankedScan {
            query: encode_blob(query),
            scope: K::scope_bindings(&params.scope),
            bound,
            exclude: None,
            limit: params.limit,
        };
        self.execute_scan(scan, cancel).await
    }

    /// Neighbours of a stored entity, using its own embedding as the query.
    ///
    /// The reference itself is excluded by id.
    pub async fn find_similar_to(
        &self,
        reference_id: i64,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<Scored<K::Entity>>> {
        check_limit(limit)?;
        if reference_id <= 0 {
            return Err(not_found::<K>(reference_id));
        }

        let results = self
            .db
            .run(cancel, move |conn, _| {
                let query = reference_embedding::<K>(conn, reference_id)?;
                let scan = RankedScan {
                    query: query.to_blob(),
                    scope: Vec::new(),
                    bound: None,
                    exclude: Some(reference_id),
                    limit,
                };
                ranked_scan::<K>(conn, &scan)
            })
            .await?;
        debug!(kind = %K::KIND, reference_id, limit, count = results.len(), "find_similar_to");
        non_empty(results)
    }

    async fn execute_scan(
        &self,
        scan: RankedScan,
        cancel: &CancellationToken,
    ) -> Result<Vec<Scored<K::Entity>>> {
        let (limit, filters, bounded) = (scan.limit, scan.scope.len(), scan.bound.is_some());
        let results = self
            .db
            .run(cancel, move |conn, _| ranked_scan::<K>(conn, &scan))
            .await?;
        debug!(
            kind = %K::KIND,
            limit,
            filters,
            bounded,
            count = results.len(),
            "Similarity search"
        );
        non_empty(results)
    }
}

fn check_limit(limit: usize) -> Result<()> {
    if limit == 0 {
        return Err(StoreError::InvalidLimit(limit));
    }
    Ok(())
}

fn non_empty<T>(results: Vec<T>) -> Result<Vec<T>> {
    if results.is_empty() {
        return Err(StoreError::NoResults);
    }
    Ok(results)
}

/// Load the stored embedding of a reference entity.
fn reference_embedding<K: EmbeddingKind>(conn: &Connection, id: i64) -> Result<Embedding> {
    let sql = format!(
        "SELECT embedding FROM {} WHERE id = ?1 AND deleted_at IS NULL",
        K::TABLE
    );
    let blob: Option<Option<Vec<u8>>> = conn
        .query_row(&sql, [id], |row| row.get(0))
        .optional()?;
    let blob = blob.ok_or_else(|| not_found::<K>(id))?;
    let required = || StoreError::EmbeddingRequired {
        kind: K::KIND.as_str(),
        id,
    };
    match blob {
        Some(bytes) => Embedding::from_blob(&bytes)?.ok_or_else(required),
        None => Err(required()),
    }
}

fn ranked_scan<K: EmbeddingKind>(
    conn: &Connection,
    scan: &RankedScan,
) -> Result<Vec<Scored<K::Entity>>> {
    let mut values: Vec<Value> = vec![Value::Blob(scan.query.clone())];
    let mut inner = String::new();
    for (column, value) in &scan.scope {
        values.push(value.clone());
        inner.push_str(&format!(" AND {} = ?{}", column, values.len()));
    }
    if let Some(id) = scan.exclude {
        values.push(Value::Integer(id));
        inner.push_str(&format!(" AND id != ?{}", values.len()));
    }

    let mut outer = String::from("distance IS NOT NULL");
    if let Some(bound) = scan.bound {
        values.push(Value::Real(bound.inclusive_limit()));
        outer.push_str(&format!(" AND distance <= ?{}", values.len()));
    }
    values.push(Value::Integer(i64::try_from(scan.limit).unwrap_or(i64::MAX)));
    let limit_param = values.len();

    let sql = format!(
        "SELECT * FROM (
             SELECT {columns}, cosine_distance(embedding, ?1) AS distance
             FROM {table}
             WHERE embedding IS NOT NULL AND deleted_at IS NULL{inner}
         )
         WHERE {outer}
         ORDER BY distance ASC, id ASC
         LIMIT ?{limit_param}",
        columns = K::COLUMNS,
        table = K::TABLE,
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(values.iter()), |row| {
        let distance: f64 = row.get("distance")?;
        Ok(K::row_to_entity(row).map(|entity| Scored { entity, distance }))
    })?;

    let mut results = Vec::new();
    for row in rows {
        results.push(row??);
    }
    Ok(results)
}

//! Subcommand implementations.

use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;

use aiep_core::{AiepError, EntityKind};
use aiep_storage::{
    Database, EmbeddingKind, EmbeddingStore, EmbeddingUpdate, InsightKind, KindStats,
    MessageKind, SimilarityQuery, TopicKind, MAX_BATCH_SIZE,
};
use tokio_util::sync::CancellationToken;
use tracing::info;

pub fn migrate(db: &Database) -> aiep_core::Result<()> {
    let version = db.schema_version()?;
    println!("schema version {}", version);
    Ok(())
}

pub async fn stats(db: &Arc<Database>, cancel: &CancellationToken) -> aiep_core::Result<()> {
    for kind in EntityKind::ALL {
        let stats = match kind {
            EntityKind::Message => kind_stats::<MessageKind>(db, cancel).await?,
            EntityKind::Insight => kind_stats::<InsightKind>(db, cancel).await?,
            EntityKind::Topic => kind_stats::<TopicKind>(db, cancel).await?,
        };
        println!("{:<8} total={} vectorised={}", kind.as_str(), stats.total, stats.vectorised);
    }
    Ok(())
}

async fn kind_stats<K: EmbeddingKind>(
    db: &Arc<Database>,
    cancel: &CancellationToken,
) -> aiep_core::Result<KindStats> {
    Ok(EmbeddingStore::<K>::new(db.clone()).stats(cancel).await?)
}

pub async fn similar(
    db: &Arc<Database>,
    kind: EntityKind,
    id: i64,
    limit: usize,
    cancel: &CancellationToken,
) -> aiep_core::Result<()> {
    let hits = match kind {
        EntityKind::Message => neighbours::<MessageKind>(db, id, limit, cancel).await?,
        EntityKind::Insight => neighbours::<InsightKind>(db, id, limit, cancel).await?,
        EntityKind::Topic => neighbours::<TopicKind>(db, id, limit, cancel).await?,
    };
    for (neighbour, distance) in hits {
        println!("{}\t{:.6}", neighbour, distance);
    }
    Ok(())
}

async fn neighbours<K: EmbeddingKind>(
    db: &Arc<Database>,
    id: i64,
    limit: usize,
    cancel: &CancellationToken,
) -> aiep_core::Result<Vec<(i64, f64)>> {
    let store = EmbeddingStore::<K>::new(db.clone());
    let hits = store.find_similar_to(id, limit, cancel).await?;
    Ok(hits
        .iter()
        .map(|hit| (K::entity_id(&hit.entity), hit.distance))
        .collect())
}

/// Limit and threshold for the `search` command.
#[derive(Debug, Clone, Copy)]
pub struct SearchParams {
    pub limit: usize,
    pub min_similarity: f32,
}

pub async fn search(
    db: &Arc<Database>,
    kind: EntityKind,
    query_file: &Path,
    params: SearchParams,
    cancel: &CancellationToken,
) -> aiep_core::Result<()> {
    let query = read_query(std::fs::File::open(query_file)?)?;
    let hits = match kind {
        EntityKind::Message => ranked::<MessageKind>(db, query, params, cancel).await?,
        EntityKind::Insight => ranked::<InsightKind>(db, query, params, cancel).await?,
        EntityKind::Topic => ranked::<TopicKind>(db, query, params, cancel).await?,
    };
    for (hit, distance) in hits {
        println!("{}\t{:.6}", hit, distance);
    }
    Ok(())
}

async fn ranked<K: EmbeddingKind>(
    db: &Arc<Database>,
    query: Vec<f32>,
    params: SearchParams,
    cancel: &CancellationToken,
) -> aiep_core::Result<Vec<(i64, f64)>> {
    let store = EmbeddingStore::<K>::new(db.clone());
    let filter = SimilarityQuery::<K::Scope>::new(params.limit)
        .with_min_similarity(params.min_similarity);
    let hits = store
        .search_by_embedding_with_filter(&query, filter, cancel)
        .await?;
    Ok(hits
        .iter()
        .map(|hit| (K::entity_id(&hit.entity), hit.distance))
        .collect())
}

/// Parse a query vector stored as a JSON array of numbers.
pub fn read_query(reader: impl std::io::Read) -> aiep_core::Result<Vec<f32>> {
    Ok(serde_json::from_reader(reader)?)
}

/// Read a JSON-lines file and apply it in batches of at most [`MAX_BATCH_SIZE`].
///
/// Each chunk is its own transaction; a failing chunk stops the import
/// with earlier chunks already committed.
pub async fn import(
    db: &Arc<Database>,
    kind: EntityKind,
    file: &Path,
    cancel: &CancellationToken,
) -> aiep_core::Result<()> {
    let updates = read_updates(std::io::BufReader::new(std::fs::File::open(file)?))?;
    if updates.is_empty() {
        return Err(AiepError::InvalidValue {
            field: "import file",
            value: format!("{} has no entries", file.display()),
        });
    }

    let total = updates.len();
    let mut applied = 0;
    for chunk in updates.chunks(MAX_BATCH_SIZE) {
        let chunk = chunk.to_vec();
        let len = chunk.len();
        match kind {
            EntityKind::Message => apply::<MessageKind>(db, chunk, cancel).await?,
            EntityKind::Insight => apply::<InsightKind>(db, chunk, cancel).await?,
            EntityKind::Topic => apply::<TopicKind>(db, chunk, cancel).await?,
        }
        applied += len;
        info!(kind = %kind, applied, total, "Import chunk committed");
    }
    println!("imported {} {} embeddings", applied, kind);
    Ok(())
}

async fn apply<K: EmbeddingKind>(
    db: &Arc<Database>,
    updates: Vec<EmbeddingUpdate>,
    cancel: &CancellationToken,
) -> aiep_core::Result<()> {
    EmbeddingStore::<K>::new(db.clone())
        .apply_batch(updates, cancel)
        .await?;
    Ok(())
}

/// Parse `{"id": N, "embedding": [...]}` lines, skipping blank ones.
pub fn read_updates(reader: impl BufRead) -> aiep_core::Result<Vec<EmbeddingUpdate>> {
    let mut updates = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let update: EmbeddingUpdate = serde_json::from_str(&line)
            .map_err(|e| AiepError::Serialization(format!("line {}: {}", index + 1, e)))?;
        updates.push(update);
    }
    Ok(updates)
}

use anyhow::{bail, Result};
use sqlx::Row;

use crate::config::Config;
use crate::embedding::{self, Embedder};
use crate::models::ChunkRecord;
use crate::store::Store;

/// Find and embed chunks that are missing or have stale embeddings.
pub async fn run_embed_pending(
    config: &Config,
    limit: Option<usize>,
    batch_size_override: Option<usize>,
    dry_run: bool,
) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let embedder = embedding::create_embedder(&config.embedding)?;
    let model_name = embedder.model_name().to_string();
    let store = Store::connect(config).await?;
    let batch_size = batch_size_override.unwrap_or(config.embedding.batch_size);

    let pending = find_pending_chunks(&store, &model_name, limit).await?;

    if dry_run {
        println!("embed pending (dry-run)");
        println!("  chunks needing embeddings: {}", pending.len());
        store.close().await;
        return Ok(());
    }

    if pending.is_empty() {
        println!("embed pending");
        println!("  all chunks up to date");
        store.close().await;
        return Ok(());
    }

    let total = pending.len();
    let (embedded, failed) = embed_batches(&store, embedder.as_ref(), &pending, batch_size).await?;

    println!("embed pending");
    println!("  total pending: {}", total);
    println!("  embedded: {}", embedded);
    println!("  failed: {}", failed);

    store.close().await;
    Ok(())
}

/// Delete all embeddings and regenerate for all chunks.
pub async fn run_embed_rebuild(config: &Config, batch_size_override: Option<usize>) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let embedder = embedding::create_embedder(&config.embedding)?;
    let model_name = embedder.model_name().to_string();
    let store = Store::connect(config).await?;
    let batch_size = batch_size_override.unwrap_or(config.embedding.batch_size);

    sqlx::query("DELETE FROM chunk_vectors")
        .execute(store.pool())
        .await?;
    sqlx::query("DELETE FROM embeddings")
        .execute(store.pool())
        .await?;

    println!("embed rebuild — cleared existing embeddings");

    let all_chunks = find_pending_chunks(&store, &model_name, None).await?;

    if all_chunks.is_empty() {
        println!("  no chunks to embed");
        store.close().await;
        return Ok(());
    }

    let total = all_chunks.len();
    let (embedded, failed) =
        embed_batches(&store, embedder.as_ref(), &all_chunks, batch_size).await?;

    println!("embed rebuild");
    println!("  total chunks: {}", total);
    println!("  embedded: {}", embedded);
    println!("  failed: {}", failed);

    store.close().await;
    Ok(())
}

async fn embed_batches(
    store: &Store,
    embedder: &dyn Embedder,
    pending: &[PendingChunk],
    batch_size: usize,
) -> Result<(u64, u64)> {
    let mut embedded = 0u64;
    let mut failed = 0u64;

    for batch in pending.chunks(batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|p| p.text.clone()).collect();

        match embedder.embed_batch(&texts).await {
            Ok(vectors) => {
                for (item, vec) in batch.iter().zip(vectors.iter()) {
                    let blob = embedding::vec_to_blob(vec);
                    upsert_embedding(
                        store,
                        &item.chunk_id,
                        &item.nct_id,
                        embedder.model_name(),
                        embedder.dims(),
                        &item.text_hash,
                        &blob,
                    )
                    .await?;
                    embedded += 1;
                }
            }
            Err(e) => {
                eprintln!("Warning: embedding batch failed: {}", e);
                failed += batch.len() as u64;
            }
        }
    }

    Ok((embedded, failed))
}

/// Embed chunks during indexing (inline). Non-fatal on failure; returns
/// `(embedded, pending)` counts.
pub async fn embed_chunks_inline(
    config: &Config,
    store: &Store,
    chunks: &[ChunkRecord],
) -> (u64, u64) {
    if !config.embedding.is_enabled() {
        return (0, 0);
    }

    let embedder = match embedding::create_embedder(&config.embedding) {
        Ok(e) => e,
        Err(e) => {
            eprintln!("Warning: could not create embedder: {}", e);
            return (0, chunks.len() as u64);
        }
    };

    let model_name = embedder.model_name().to_string();
    let mut embedded = 0u64;
    let mut pending = 0u64;

    for batch in chunks.chunks(config.embedding.batch_size.max(1)) {
        // Check which chunks still need embedding
        let mut need_embedding = Vec::new();
        for chunk in batch {
            let existing: Option<String> =
                sqlx::query_scalar("SELECT hash FROM embeddings WHERE chunk_id = ? AND model = ?")
                    .bind(&chunk.id)
                    .bind(&model_name)
                    .fetch_optional(store.pool())
                    .await
                    .unwrap_or(None);

            if existing.as_deref() == Some(chunk.hash.as_str()) {
                // Already up to date
                embedded += 1;
                continue;
            }

            need_embedding.push(chunk);
        }

        if need_embedding.is_empty() {
            continue;
        }

        let texts: Vec<String> = need_embedding.iter().map(|c| c.text.clone()).collect();

        match embedder.embed_batch(&texts).await {
            Ok(vectors) => {
                for (chunk, vec) in need_embedding.iter().zip(vectors.iter()) {
                    let blob = embedding::vec_to_blob(vec);
                    if let Err(e) = upsert_embedding(
                        store,
                        &chunk.id,
                        &chunk.nct_id,
                        &model_name,
                        embedder.dims(),
                        &chunk.hash,
                        &blob,
                    )
                    .await
                    {
                        eprintln!("Warning: failed to store embedding for {}: {}", chunk.id, e);
                        pending += 1;
                    } else {
                        embedded += 1;
                    }
                }
            }
            Err(e) => {
                eprintln!("Warning: embedding batch failed: {}", e);
                pending += need_embedding.len() as u64;
            }
        }
    }

    (embedded, pending)
}

struct PendingChunk {
    chunk_id: String,
    nct_id: String,
    text: String,
    text_hash: String,
}

async fn find_pending_chunks(
    store: &Store,
    model: &str,
    limit: Option<usize>,
) -> Result<Vec<PendingChunk>> {
    let limit_val = limit.unwrap_or(usize::MAX) as i64;

    // Chunks that either have no embedding or have a stale hash
    let rows = sqlx::query(
        r#"
        SELECT c.id AS chunk_id, c.nct_id, c.text, c.hash
        FROM chunks c
        LEFT JOIN embeddings e ON e.chunk_id = c.id AND e.model = ?
        WHERE e.chunk_id IS NULL OR e.hash != c.hash
        ORDER BY c.nct_id, c.chunk_index
        LIMIT ?
        "#,
    )
    .bind(model)
    .bind(limit_val)
    .fetch_all(store.pool())
    .await?;

    let results: Vec<PendingChunk> = rows
        .iter()
        .map(|row| PendingChunk {
            chunk_id: row.get("chunk_id"),
            nct_id: row.get("nct_id"),
            text: row.get("text"),
            text_hash: row.get("hash"),
        })
        .collect();

    Ok(results)
}

async fn upsert_embedding(
    store: &Store,
    chunk_id: &str,
    nct_id: &str,
    model: &str,
    dims: usize,
    text_hash: &str,
    blob: &[u8],
) -> Result<()> {
    let now = chrono::Utc::now().timestamp();

    sqlx::query(
        r#"
        INSERT INTO embeddings (chunk_id, model, dims, created_at, hash)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(chunk_id) DO UPDATE SET
            model = excluded.model,
            dims = excluded.dims,
            created_at = excluded.created_at,
            hash = excluded.hash
        "#,
    )
    .bind(chunk_id)
    .bind(model)
    .bind(dims as i64)
    .bind(now)
    .bind(text_hash)
    .execute(store.pool())
    .await?;

    sqlx::query(
        r#"
        INSERT INTO chunk_vectors (chunk_id, nct_id, embedding)
        VALUES (?, ?, ?)
        ON CONFLICT(chunk_id) DO UPDATE SET
            nct_id = excluded.nct_id,
            embedding = excluded.embedding
        "#,
    )
    .bind(chunk_id)
    .bind(nct_id)
    .bind(blob)
    .execute(store.pool())
    .await?;

    Ok(())
}

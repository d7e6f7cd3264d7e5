//! Append-only JSONL + binary embedding sidecar persistence shared by the
//! episodic and semantic stores.
//!
//! One record per line in the `.jsonl` file; one fixed-width f32×dim row
//! per record, in the same order, in the `.embeddings` sidecar.
//! Compaction (`compressOldMemory`) rewrites both files via a
//! temp-file-then-rename pair for atomicity.

use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::error::Result;
use crate::index::EmbeddingEngine;

pub fn jsonl_path(base: &Path, store_name: &str) -> PathBuf {
    base.join(format!("{store_name}.jsonl"))
}

pub fn embeddings_path(base: &Path, store_name: &str) -> PathBuf {
    base.join(format!("{store_name}.embeddings"))
}

pub async fn load_records<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = tokio::fs::File::open(path).await?;
    let mut lines = BufReader::new(file).lines();
    let mut records = Vec::new();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        records.push(serde_json::from_str(&line)?);
    }
    Ok(records)
}

pub async fn append_record<T: Serialize>(path: &Path, record: &T) -> Result<()> {
    let line = serde_json::to_string(record)?;
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(line.as_bytes()).await?;
    file.write_all(b"\n").await?;
    Ok(())
}

pub async fn load_embeddings(path: &Path) -> Result<Vec<Vec<f32>>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let bytes = tokio::fs::read(path).await?;
    Ok(bytes
        .chunks_exact(crate::index::EMBEDDING_BLOB_SIZE)
        .filter_map(EmbeddingEngine::blob_to_embedding)
        .collect())
}

pub async fn append_embedding(path: &Path, embedding: &[f32]) -> Result<()> {
    let blob = EmbeddingEngine::embedding_to_blob(embedding);
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(&blob).await?;
    Ok(())
}

/// Rewrite both sidecars in place: write to `<path>.tmp`, then rename over
/// the original. Used by `compressOldMemory` after clustering.
pub async fn compact<T: Serialize>(
    jsonl: &Path,
    embeddings: &Path,
    records: &[T],
    vectors: &[Vec<f32>],
) -> Result<()> {
    let jsonl_tmp = jsonl.with_extension("jsonl.tmp");
    let embeddings_tmp = embeddings.with_extension("embeddings.tmp");

    {
        let mut file = tokio::fs::File::create(&jsonl_tmp).await?;
        for record in records {
            let line = serde_json::to_string(record)?;
            file.write_all(line.as_bytes()).await?;
            file.write_all(b"\n").await?;
        }
    }
    {
        let mut file = tokio::fs::File::create(&embeddings_tmp).await?;
        for vector in vectors {
            file.write_all(&EmbeddingEngine::embedding_to_blob(vector))
                .await?;
        }
    }

    tokio::fs::rename(&jsonl_tmp, jsonl).await?;
    tokio::fs::rename(&embeddings_tmp, embeddings).await?;
    Ok(())
}

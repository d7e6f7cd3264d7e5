//! Semantic memory — concepts and facts, retrieved by vector kNN with an
//! optional category filter. Concepts and facts share the same on-disk
//! shape but distinct capacities and JSONL files.

use std::path::PathBuf;

use tokio::sync::RwLock;

use crate::error::Result;
use crate::index::EmbeddingEngine;
use crate::memory::persist;
use crate::model::{SemanticItem, SemanticKind};

struct Inner {
    items: Vec<SemanticItem>,
}

pub struct SemanticStore {
    kind: SemanticKind,
    capacity: usize,
    base_dir: PathBuf,
    embedder: EmbeddingEngine,
    inner: RwLock<Inner>,
}

impl SemanticStore {
    pub async fn load(
        base_dir: PathBuf,
        kind: SemanticKind,
        capacity: usize,
        embedder: EmbeddingEngine,
    ) -> Result<Self> {
        let jsonl = persist::jsonl_path(&base_dir, Self::store_name(kind));
        let items: Vec<SemanticItem> = persist::load_records(&jsonl).await?;
        Ok(Self {
            kind,
            capacity,
            base_dir,
            embedder,
            inner: RwLock::new(Inner { items }),
        })
    }

    fn store_name(kind: SemanticKind) -> &'static str {
        match kind {
            SemanticKind::Concept => "semantic_concepts",
            SemanticKind::Fact => "semantic_facts",
        }
    }

    fn jsonl_path(&self) -> PathBuf {
        persist::jsonl_path(&self.base_dir, Self::store_name(self.kind))
    }

    fn embeddings_path(&self) -> PathBuf {
        persist::embeddings_path(&self.base_dir, Self::store_name(self.kind))
    }

    pub async fn upsert(&self, mut item: SemanticItem) -> Result<()> {
        item.embedding = self.embedder.embed(&item.text).await?;

        persist::append_record(&self.jsonl_path(), &item).await?;
        persist::append_embedding(&self.embeddings_path(), &item.embedding).await?;

        let mut inner = self.inner.write().await;
        inner.items.push(item);

        if inner.items.len() > self.capacity {
            let drop_count = inner.items.len() - self.capacity;
            inner.items.drain(0..drop_count);
            let records = inner.items.clone();
            let vectors: Vec<Vec<f32>> = records.iter().map(|i| i.embedding.clone()).collect();
            drop(inner);
            persist::compact(&self.jsonl_path(), &self.embeddings_path(), &records, &vectors).await?;
        }

        Ok(())
    }

    pub async fn retrieve(
        &self,
        query: &str,
        category: Option<&str>,
        max_results: usize,
    ) -> Result<Vec<(SemanticItem, f32)>> {
        let query_embedding = self.embedder.embed(query).await?;
        let inner = self.inner.read().await;

        let candidates: Vec<(usize, Vec<f32>)> = inner
            .items
            .iter()
            .enumerate()
            .filter(|(_, item)| category.map_or(true, |c| item.category == c))
            .map(|(i, item)| (i, item.embedding.clone()))
            .collect();

        let ranked = EmbeddingEngine::top_k_similar(&query_embedding, &candidates, max_results);
        Ok(ranked
            .into_iter()
            .map(|(i, score)| (inner.items[i].clone(), score))
            .collect())
    }

    pub async fn export_all(&self) -> Vec<SemanticItem> {
        self.inner.read().await.items.clone()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.items.len()
    }
}

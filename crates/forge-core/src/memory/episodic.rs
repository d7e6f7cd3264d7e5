//! Episodic memory — full records of completed task turns, retrieved by
//! vector similarity over `title + description`, retained up to capacity
//! then compressed.

use std::path::PathBuf;

use chrono::Utc;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::index::EmbeddingEngine;
use crate::memory::persist;
use crate::model::Episode;

const STORE_NAME: &str = "episodic";

struct Inner {
    episodes: Vec<Episode>,
}

pub struct EpisodicStore {
    capacity: usize,
    base_dir: PathBuf,
    embedder: EmbeddingEngine,
    inner: RwLock<Inner>,
}

impl EpisodicStore {
    pub async fn load(base_dir: PathBuf, capacity: usize, embedder: EmbeddingEngine) -> Result<Self> {
        let jsonl = persist::jsonl_path(&base_dir, STORE_NAME);
        let episodes: Vec<Episode> = persist::load_records(&jsonl).await?;
        Ok(Self {
            capacity,
            base_dir,
            embedder,
            inner: RwLock::new(Inner { episodes }),
        })
    }

    fn jsonl_path(&self) -> PathBuf {
        persist::jsonl_path(&self.base_dir, STORE_NAME)
    }

    fn embeddings_path(&self) -> PathBuf {
        persist::embeddings_path(&self.base_dir, STORE_NAME)
    }

    /// Assigns the embedding, appends to the store, and evicts the oldest
    /// episode by timestamp if over capacity.
    pub async fn store_episode(&self, mut episode: Episode) -> Result<()> {
        let text = format!("{} {}", episode.title, episode.description);
        episode.embedding = self.embedder.embed(&text).await?;

        persist::append_record(&self.jsonl_path(), &episode).await?;
        persist::append_embedding(&self.embeddings_path(), &episode.embedding).await?;

        let mut inner = self.inner.write().await;
        inner.episodes.push(episode);

        if inner.episodes.len() > self.capacity {
            let drop_count = inner.episodes.len() - self.capacity;
            inner.episodes.drain(0..drop_count);
            let records = inner.episodes.clone();
            let vectors: Vec<Vec<f32>> = records.iter().map(|e| e.embedding.clone()).collect();
            drop(inner);
            persist::compact(&self.jsonl_path(), &self.embeddings_path(), &records, &vectors).await?;
        }

        Ok(())
    }

    pub async fn retrieve(&self, query: &str, max_results: usize) -> Result<Vec<(Episode, f32)>> {
        let query_embedding = self.embedder.embed(query).await?;
        let inner = self.inner.read().await;

        let candidates: Vec<(usize, Vec<f32>)> = inner
            .episodes
            .iter()
            .enumerate()
            .map(|(i, e)| (i, e.embedding.clone()))
            .collect();

        let ranked = EmbeddingEngine::top_k_similar(&query_embedding, &candidates, max_results);
        Ok(ranked
            .into_iter()
            .map(|(i, score)| (inner.episodes[i].clone(), score))
            .collect())
    }

    /// Clusters episodes older than `threshold_days` by cosine similarity
    /// and replaces each cluster with a single summarized representative.
    /// `ratio` controls how aggressively clusters merge: similarity
    /// threshold = `1.0 - ratio`, so a higher ratio produces fewer, larger
    /// clusters.
    pub async fn compress_old(&self, threshold_days: i64, ratio: f32) -> Result<usize> {
        let cutoff = Utc::now() - chrono::Duration::days(threshold_days);
        let similarity_threshold = (1.0 - ratio.clamp(0.0, 1.0)).clamp(0.05, 0.95);

        let mut inner = self.inner.write().await;
        let (old, recent): (Vec<Episode>, Vec<Episode>) =
            inner.episodes.drain(..).partition(|e| e.timestamp < cutoff);

        if old.is_empty() {
            inner.episodes = recent;
            return Ok(0);
        }

        let clusters = cluster_by_similarity(&old, similarity_threshold);
        let removed = old.len().saturating_sub(clusters.len());
        let mut merged: Vec<Episode> = clusters.into_iter().map(summarize_cluster).collect();
        merged.extend(recent);
        merged.sort_by_key(|e| e.timestamp);

        let vectors: Vec<Vec<f32>> = merged.iter().map(|e| e.embedding.clone()).collect();
        inner.episodes = merged.clone();
        drop(inner);

        persist::compact(&self.jsonl_path(), &self.embeddings_path(), &merged, &vectors).await?;
        Ok(removed)
    }

    pub async fn export_all(&self) -> Vec<Episode> {
        self.inner.read().await.episodes.clone()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.episodes.len()
    }
}

fn cluster_by_similarity(episodes: &[Episode], threshold: f32) -> Vec<Vec<Episode>> {
    let mut clusters: Vec<Vec<Episode>> = Vec::new();

    'outer: for episode in episodes {
        for cluster in clusters.iter_mut() {
            let centroid = &cluster[0].embedding;
            if EmbeddingEngine::cosine_similarity(centroid, &episode.embedding) >= threshold {
                cluster.push(episode.clone());
                continue 'outer;
            }
        }
        clusters.push(vec![episode.clone()]);
    }

    clusters
}

fn summarize_cluster(cluster: Vec<Episode>) -> Episode {
    if cluster.len() == 1 {
        return cluster.into_iter().next().unwrap();
    }

    let representative = cluster
        .iter()
        .max_by_key(|e| e.importance)
        .cloned()
        .expect("non-empty cluster");

    let max_importance = cluster.iter().map(|e| e.importance).max().unwrap_or(1);
    let tags: Vec<String> = {
        let mut set = std::collections::BTreeSet::new();
        for episode in &cluster {
            set.extend(episode.tags.iter().cloned());
        }
        set.into_iter().collect()
    };

    Episode {
        id: crate::model::EpisodeId::new(),
        title: format!("{} (+{} similar)", representative.title, cluster.len() - 1),
        description: representative.description.clone(),
        context: representative.context.clone(),
        actions: representative.actions.clone(),
        outcomes: representative.outcomes.clone(),
        timestamp: representative.timestamp,
        success: cluster.iter().any(|e| e.success),
        importance: max_importance,
        tags,
        embedding: representative.embedding.clone(),
    }
}

//! Tiered memory manager: working / episodic / semantic / procedural
//! stores backed by vector similarity, feeding context back into planning.
//!
//! Capacities: Working 100, Episodic 2,000, Semantic Concepts 20,000 /
//! Facts 100,000, Procedural 2,000.

mod episodic;
mod persist;
mod procedural;
mod semantic;
mod working;

pub use episodic::EpisodicStore;
pub use procedural::ProceduralStore;
pub use semantic::SemanticStore;
pub use working::WorkingStore;

use std::path::PathBuf;

use serde_json::Value;

use crate::error::Result;
use crate::index::EmbeddingEngine;
use crate::model::{Episode, SemanticItem, SemanticKind};

pub const WORKING_CAPACITY: usize = 100;
pub const EPISODIC_CAPACITY: usize = 2_000;
pub const SEMANTIC_CONCEPTS_CAPACITY: usize = 20_000;
pub const SEMANTIC_FACTS_CAPACITY: usize = 100_000;
pub const PROCEDURAL_CAPACITY: usize = 2_000;

/// Returned by `retrieve_relevant_context` when no store has anything
/// within range — an explicit sentinel, not an empty-but-ambiguous string.
pub const NO_RELEVANT_CONTEXT: &str = "(no relevant context)";

/// Which store(s) `retrieveRelevantContext` should search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryQueryType {
    Episodic,
    Concepts,
    Facts,
    All,
}

pub struct MemoryManager {
    working: WorkingStore,
    episodic: EpisodicStore,
    concepts: SemanticStore,
    facts: SemanticStore,
    procedural: ProceduralStore,
}

impl MemoryManager {
    pub async fn load(base_dir: PathBuf, embedder: EmbeddingEngine) -> Result<Self> {
        crate::paths::ensure_dir(&base_dir)?;

        let episodic = EpisodicStore::load(base_dir.clone(), EPISODIC_CAPACITY, embedder.clone()).await?;
        let concepts = SemanticStore::load(
            base_dir.clone(),
            SemanticKind::Concept,
            SEMANTIC_CONCEPTS_CAPACITY,
            embedder.clone(),
        )
        .await?;
        let facts = SemanticStore::load(
            base_dir.clone(),
            SemanticKind::Fact,
            SEMANTIC_FACTS_CAPACITY,
            embedder,
        )
        .await?;
        let procedural = ProceduralStore::load(base_dir, PROCEDURAL_CAPACITY).await?;

        Ok(Self {
            working: WorkingStore::new(WORKING_CAPACITY),
            episodic,
            concepts,
            facts,
            procedural,
        })
    }

    pub fn working(&self) -> &WorkingStore {
        &self.working
    }

    pub async fn put_working(&self, key: impl Into<String>, value: Value) {
        self.working.put(key, value).await;
    }

    /// Ranked concatenation from the requested store(s), or
    /// [`NO_RELEVANT_CONTEXT`] when nothing clears the similarity floor.
    pub async fn retrieve_relevant_context(
        &self,
        query: &str,
        query_type: MemoryQueryType,
        max_results: usize,
    ) -> Result<String> {
        let mut snippets: Vec<(f32, String)> = Vec::new();

        if matches!(query_type, MemoryQueryType::Episodic | MemoryQueryType::All) {
            for (episode, score) in self.episodic.retrieve(query, max_results).await? {
                snippets.push((score, format!("[episode] {}: {}", episode.title, episode.description)));
            }
        }
        if matches!(query_type, MemoryQueryType::Concepts | MemoryQueryType::All) {
            for (item, score) in self.concepts.retrieve(query, None, max_results).await? {
                snippets.push((score, format!("[concept] {}", item.text)));
            }
        }
        if matches!(query_type, MemoryQueryType::Facts | MemoryQueryType::All) {
            for (item, score) in self.facts.retrieve(query, None, max_results).await? {
                snippets.push((score, format!("[fact] {}", item.text)));
            }
        }

        snippets.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        snippets.truncate(max_results);

        if snippets.is_empty() {
            return Ok(NO_RELEVANT_CONTEXT.to_string());
        }

        Ok(snippets
            .into_iter()
            .map(|(_, text)| text)
            .collect::<Vec<_>>()
            .join("\n"))
    }

    pub async fn store_episode(&self, episode: Episode) -> Result<()> {
        self.episodic.store_episode(episode).await
    }

    pub async fn upsert_concept(&self, item: SemanticItem) -> Result<()> {
        self.concepts.upsert(item).await
    }

    pub async fn upsert_fact(&self, item: SemanticItem) -> Result<()> {
        self.facts.upsert(item).await
    }

    /// After a plan completes, folds the observed (situation, tool
    /// sequence, outcome) into procedural memory's running success rate.
    pub async fn record_procedure_outcome(
        &self,
        situation: &str,
        tool_sequence: Vec<String>,
        succeeded: bool,
    ) -> Result<()> {
        self.procedural
            .record_outcome(situation, tool_sequence, succeeded)
            .await
    }

    pub async fn best_procedure_for(&self, situation: &str) -> Option<crate::model::Procedure> {
        self.procedural.best_match(situation).await
    }

    pub async fn compress_old_episodes(&self, threshold_days: i64, ratio: f32) -> Result<usize> {
        self.episodic.compress_old(threshold_days, ratio).await
    }

    /// Dump every store for backup/analysis, serialize it as `format`, and
    /// write it to `output` when given. `include_compressed` is kept in the
    /// call signature even though compression rewrites stores in place
    /// rather than keeping a separate compressed tier, so both values
    /// currently produce the same export.
    pub async fn export_memory_data(
        &self,
        format: ExportFormat,
        include_compressed: bool,
        output: Option<&std::path::Path>,
    ) -> Result<MemoryExport> {
        let _ = include_compressed;
        let export = MemoryExport {
            episodes: self.episodic.export_all().await,
            concepts: self.concepts.export_all().await,
            facts: self.facts.export_all().await,
            procedures: self.procedural.export_all().await,
        };

        if let Some(path) = output {
            let serialized = match format {
                ExportFormat::Json => serde_json::to_string(&export)?,
                ExportFormat::JsonPretty => serde_json::to_string_pretty(&export)?,
            };
            tokio::fs::write(path, serialized).await.map_err(|e| {
                crate::error::OrchestrationError::Internal(format!(
                    "writing memory export to {}: {e}",
                    path.display()
                ))
            })?;
        }

        Ok(export)
    }
}

/// Output encoding for `export_memory_data`. `Json` is compact (suited to
/// piping into another process); `JsonPretty` is the one a human reading
/// the written file wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    #[default]
    Json,
    JsonPretty,
}

impl std::str::FromStr for ExportFormat {
    type Err = crate::error::OrchestrationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "json" => Ok(ExportFormat::Json),
            "json_pretty" | "json-pretty" | "pretty" => Ok(ExportFormat::JsonPretty),
            other => Err(crate::error::OrchestrationError::Validation(format!(
                "unknown export format '{other}', expected 'json' or 'json_pretty'"
            ))),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MemoryExport {
    pub episodes: Vec<Episode>,
    pub concepts: Vec<SemanticItem>,
    pub facts: Vec<SemanticItem>,
    pub procedures: Vec<crate::model::Procedure>,
}

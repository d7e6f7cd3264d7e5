//! Procedural memory — learned (situation → tool sequence) strategies with
//! an empirically updated success rate. No embedding; matched by
//! case-insensitive equality over the declared situation descriptor, not
//! vector similarity.

use std::path::PathBuf;

use tokio::sync::RwLock;

use crate::error::Result;
use crate::memory::persist;
use crate::model::Procedure;

const STORE_NAME: &str = "procedural";

pub struct ProceduralStore {
    capacity: usize,
    base_dir: PathBuf,
    items: RwLock<Vec<Procedure>>,
}

impl ProceduralStore {
    pub async fn load(base_dir: PathBuf, capacity: usize) -> Result<Self> {
        let jsonl = persist::jsonl_path(&base_dir, STORE_NAME);
        let items: Vec<Procedure> = persist::load_records(&jsonl).await?;
        Ok(Self {
            capacity,
            base_dir,
            items: RwLock::new(items),
        })
    }

    fn jsonl_path(&self) -> PathBuf {
        persist::jsonl_path(&self.base_dir, STORE_NAME)
    }

    /// Upserts a procedure for `situation`: if one exists, folds `succeeded`
    /// into its running-average success rate; otherwise inserts a new one.
    pub async fn record_outcome(
        &self,
        situation: &str,
        tool_sequence: Vec<String>,
        succeeded: bool,
    ) -> Result<()> {
        let mut items = self.items.write().await;

        if let Some(existing) = items
            .iter_mut()
            .find(|p| p.situation.eq_ignore_ascii_case(situation))
        {
            let outcome = if succeeded { 1.0 } else { 0.0 };
            existing.success_rate = (existing.success_rate * existing.sample_count as f32 + outcome)
                / (existing.sample_count + 1) as f32;
            existing.sample_count += 1;
            existing.tool_sequence = tool_sequence;
        } else {
            items.push(Procedure {
                id: uuid::Uuid::new_v4(),
                situation: situation.to_string(),
                tool_sequence,
                success_rate: if succeeded { 1.0 } else { 0.0 },
                sample_count: 1,
            });
        }

        if items.len() > self.capacity {
            let drop_count = items.len() - self.capacity;
            items.sort_by(|a, b| a.success_rate.partial_cmp(&b.success_rate).unwrap());
            items.drain(0..drop_count);
        }

        let records = items.clone();
        drop(items);
        rewrite(&self.jsonl_path(), &records).await
    }

    pub async fn best_match(&self, situation: &str) -> Option<Procedure> {
        let items = self.items.read().await;
        items
            .iter()
            .filter(|p| situation.to_lowercase().contains(&p.situation.to_lowercase()))
            .max_by(|a, b| a.success_rate.partial_cmp(&b.success_rate).unwrap())
            .cloned()
    }

    pub async fn export_all(&self) -> Vec<Procedure> {
        self.items.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }
}

async fn rewrite(path: &std::path::Path, records: &[Procedure]) -> Result<()> {
    let tmp = path.with_extension("jsonl.tmp");
    {
        use tokio::io::AsyncWriteExt;
        let mut file = tokio::fs::File::create(&tmp).await?;
        for record in records {
            let line = serde_json::to_string(record)?;
            file.write_all(line.as_bytes()).await?;
            file.write_all(b"\n").await?;
        }
    }
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

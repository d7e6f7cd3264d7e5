//! `OrchestrationContext` snapshot table, keyed by `task_id`.

use rusqlite::{params, Connection};
use tokio::sync::Mutex;

use crate::error::Result;
use crate::model::{OrchestrationContext, TaskId};

pub struct SnapshotStore {
    conn: Mutex<Connection>,
}

impl SnapshotStore {
    pub fn open(path: &std::path::Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS orchestration_snapshots (
                task_id TEXT PRIMARY KEY,
                context_json TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            [],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub async fn save(&self, context: &OrchestrationContext) -> Result<()> {
        let json = serde_json::to_string(context)?;
        let now = super::unix_timestamp() as i64;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO orchestration_snapshots (task_id, context_json, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(task_id) DO UPDATE SET context_json = excluded.context_json, updated_at = excluded.updated_at",
            params![context.task_id.to_string(), json, now],
        )?;
        Ok(())
    }

    pub async fn load(&self, task_id: TaskId) -> Result<Option<OrchestrationContext>> {
        let conn = self.conn.lock().await;
        let mut stmt =
            conn.prepare("SELECT context_json FROM orchestration_snapshots WHERE task_id = ?1")?;
        let mut rows = stmt.query(params![task_id.to_string()])?;
        match rows.next()? {
            Some(row) => {
                let json: String = row.get(0)?;
                Ok(Some(serde_json::from_str(&json)?))
            }
            None => Ok(None),
        }
    }

    pub async fn delete(&self, task_id: TaskId) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "DELETE FROM orchestration_snapshots WHERE task_id = ?1",
            params![task_id.to_string()],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ExecutionPlan, PlanId, PlanStrategy};

    fn sample_context() -> OrchestrationContext {
        let plan = ExecutionPlan {
            plan_id: PlanId::new(),
            task_id: TaskId::new(),
            title: "t".to_string(),
            steps: Vec::new(),
            strategy: PlanStrategy::General,
            total_estimated_duration_secs: 0,
            complexity_score: 0.0,
            success_probability: 1.0,
            risk_factors: Vec::new(),
            prerequisites: Vec::new(),
            required_tools: Vec::new(),
        max_parallel_steps: None,
        };
        OrchestrationContext::new(plan)
    }

    #[tokio::test]
    async fn save_then_load_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::open(&dir.path().join("snap.db")).unwrap();
        let ctx = sample_context();

        store.save(&ctx).await.unwrap();
        let loaded = store.load(ctx.task_id).await.unwrap().unwrap();
        assert_eq!(loaded.task_id, ctx.task_id);
    }

    #[tokio::test]
    async fn load_missing_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::open(&dir.path().join("snap.db")).unwrap();
        assert!(store.load(TaskId::new()).await.unwrap().is_none());
    }
}

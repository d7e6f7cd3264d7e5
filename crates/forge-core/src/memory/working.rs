//! Working memory — short-lived key/value scoped to one task's lifetime.
//!
//! FIFO eviction at capacity, exact-key retrieval only (no embedding).
//! In-memory only: the working tier does not survive process restart,
//! matching its duration-of-task retention.

use std::collections::{HashMap, VecDeque};

use serde_json::Value;
use tokio::sync::RwLock;

use crate::model::WorkingItem;

pub struct WorkingStore {
    capacity: usize,
    items: RwLock<HashMap<String, WorkingItem>>,
    order: RwLock<VecDeque<String>>,
}

impl WorkingStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            items: RwLock::new(HashMap::new()),
            order: RwLock::new(VecDeque::new()),
        }
    }

    pub async fn put(&self, key: impl Into<String>, value: Value) {
        let key = key.into();
        let item = WorkingItem {
            key: key.clone(),
            value,
            created_at: chrono::Utc::now(),
        };

        let mut items = self.items.write().await;
        let mut order = self.order.write().await;

        if !items.contains_key(&key) {
            order.push_back(key.clone());
        }
        items.insert(key, item);

        while items.len() > self.capacity {
            if let Some(oldest) = order.pop_front() {
                items.remove(&oldest);
            } else {
                break;
            }
        }
    }

    pub async fn get(&self, key: &str) -> Option<WorkingItem> {
        self.items.read().await.get(key).cloned()
    }

    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn evicts_oldest_when_over_capacity() {
        let store = WorkingStore::new(2);
        store.put("a", json!(1)).await;
        store.put("b", json!(2)).await;
        store.put("c", json!(3)).await;

        assert_eq!(store.len().await, 2);
        assert!(store.get("a").await.is_none());
        assert!(store.get("c").await.is_some());
    }
}

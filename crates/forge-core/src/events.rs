//! Realtime event bus — per-task publish/subscribe for progress,
//! completion, and failure events.
//!
//! A raw `mpsc` can only drop the frame being sent, not an already-queued
//! one, so subscriber queues here are a `VecDeque` behind a `Mutex` +
//! `Notify` instead — giving the bus control to evict the oldest *progress*
//! frame specifically while completion and failure frames are always
//! appended.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, Notify, RwLock};

use crate::model::{StepId, TaskId};

const SUBSCRIBER_BUFFER_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Progress {
        task_id: TaskId,
        step_id: StepId,
        progress: f32,
        current_step_title: String,
        total_steps: usize,
        timestamp: DateTime<Utc>,
    },
    Completion {
        task_id: TaskId,
        success_rate: f32,
        total_execution_time_secs: f64,
        summary: String,
        timestamp: DateTime<Utc>,
    },
    Failure {
        task_id: TaskId,
        error: String,
        context: String,
        timestamp: DateTime<Utc>,
    },
}

impl Event {
    fn is_progress(&self) -> bool {
        matches!(self, Event::Progress { .. })
    }
}

struct Subscriber {
    queue: Mutex<VecDeque<Event>>,
    notify: Notify,
}

impl Subscriber {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        })
    }

    async fn push(&self, event: Event) {
        let mut queue = self.queue.lock().await;

        if queue.len() >= SUBSCRIBER_BUFFER_CAPACITY {
            let oldest_progress = queue.iter().position(Event::is_progress);
            match (event.is_progress(), oldest_progress) {
                (true, None) => return, // nothing droppable to make room; drop this frame instead
                (_, Some(pos)) => {
                    queue.remove(pos);
                }
                (false, None) => {} // no progress to evict; let a terminal frame through regardless
            }
        }

        queue.push_back(event);
        self.notify.notify_waiters();
    }
}

/// A handle returned to one subscriber of one task's event stream.
pub struct Subscription {
    subscriber: Arc<Subscriber>,
}

impl Subscription {
    /// Wait for and pop the next event, in FIFO emission order.
    pub async fn recv(&self) -> Event {
        loop {
            {
                let mut queue = self.subscriber.queue.lock().await;
                if let Some(event) = queue.pop_front() {
                    return event;
                }
            }
            self.subscriber.notify.notified().await;
        }
    }
}

#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<HashMap<TaskId, Vec<Arc<Subscriber>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(&self, task_id: TaskId) -> Subscription {
        let subscriber = Subscriber::new();
        self.subscribers
            .write()
            .await
            .entry(task_id)
            .or_default()
            .push(Arc::clone(&subscriber));
        Subscription { subscriber }
    }

    pub async fn publish(&self, task_id: TaskId, event: Event) {
        let subscribers = self.subscribers.read().await;
        if let Some(subs) = subscribers.get(&task_id) {
            for sub in subs {
                sub.push(event.clone()).await;
            }
        }
    }

    /// Drop all subscribers for a task — called after the terminal event
    /// has been published and retention has elapsed.
    pub async fn close(&self, task_id: TaskId) {
        self.subscribers.write().await.remove(&task_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress_event(task_id: TaskId) -> Event {
        Event::Progress {
            task_id,
            step_id: StepId::new(),
            progress: 0.5,
            current_step_title: "step".to_string(),
            total_steps: 2,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn subscriber_receives_events_in_order() {
        let bus = EventBus::new();
        let task_id = TaskId::new();
        let sub = bus.subscribe(task_id).await;

        bus.publish(task_id, progress_event(task_id)).await;
        bus.publish(
            task_id,
            Event::Completion {
                task_id,
                success_rate: 1.0,
                total_execution_time_secs: 1.0,
                summary: "done".to_string(),
                timestamp: Utc::now(),
            },
        )
        .await;

        assert!(matches!(sub.recv().await, Event::Progress { .. }));
        assert!(matches!(sub.recv().await, Event::Completion { .. }));
    }

    #[tokio::test]
    async fn unrelated_task_does_not_receive_events() {
        let bus = EventBus::new();
        let task_a = TaskId::new();
        let task_b = TaskId::new();
        let sub_b = bus.subscribe(task_b).await;

        bus.publish(task_a, progress_event(task_a)).await;

        // task_b's queue should remain empty; verify without blocking by
        // checking no publish happened for it.
        let queue_len = sub_b.subscriber.queue.lock().await.len();
        assert_eq!(queue_len, 0);
    }
}

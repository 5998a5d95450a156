//! Bounded two-priority queue feeding the synthesis worker.
//!
//! All `High` items (user navigation) come out before any `Normal` item
//! (sequential look-ahead), FIFO within each priority. Capacity is bounded
//! by item count (enqueue blocks when full) and by a soft byte budget
//! over queued text, which refuses immediately instead of waiting.

use crate::cache::Fingerprint;
use crate::config::QueueConfig;
use crate::error::{NarrateError, Result};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::Notify;

/// Ordering tier. Navigation-induced work outranks look-ahead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    High,
    Normal,
}

/// One unit of synthesis work. Carries everything the worker needs so it
/// never touches the document.
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub sentence_index: usize,
    pub text: String,
    pub fingerprint: Fingerprint,
    pub speed: f32,
    pub priority: Priority,
    pub enqueued_at: Instant,
}

#[derive(Default)]
struct State {
    high: VecDeque<QueueItem>,
    normal: VecDeque<QueueItem>,
    text_bytes: usize,
    closed: bool,
}

impl State {
    fn len(&self) -> usize {
        self.high.len() + self.normal.len()
    }

    fn pop(&mut self) -> Option<QueueItem> {
        self.high.pop_front().or_else(|| self.normal.pop_front())
    }
}

pub struct SynthesisQueue {
    state: Mutex<State>,
    capacity: usize,
    byte_budget: usize,
    space: Notify,
    items: Notify,
}

impl SynthesisQueue {
    pub fn new(config: &QueueConfig) -> Self {
        Self {
            state: Mutex::new(State::default()),
            capacity: config.capacity.max(1),
            byte_budget: config.text_byte_budget,
            space: Notify::new(),
            items: Notify::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Enqueue one item. Blocks while the queue is at item capacity;
    /// refuses with [`NarrateError::QueueFull`] without waiting when the
    /// byte budget would be exceeded.
    pub async fn enqueue(&self, item: QueueItem) -> Result<()> {
        loop {
            let wait = self.space.notified();
            tokio::pin!(wait);
            wait.as_mut().enable();
            {
                let mut state = self.lock();
                if state.closed {
                    return Err(NarrateError::Closed("queue"));
                }
                if state.text_bytes + item.text.len() > self.byte_budget {
                    return Err(NarrateError::QueueFull);
                }
                if state.len() < self.capacity {
                    state.text_bytes += item.text.len();
                    match item.priority {
                        Priority::High => state.high.push_back(item),
                        Priority::Normal => state.normal.push_back(item),
                    }
                    self.items.notify_one();
                    return Ok(());
                }
            }
            wait.await;
        }
    }

    /// Enqueue several items in order, stopping at the first failure.
    pub async fn enqueue_batch(&self, batch: Vec<QueueItem>) -> Result<()> {
        for item in batch {
            self.enqueue(item).await?;
        }
        Ok(())
    }

    /// Remove and return the next item by priority. Blocks while empty.
    pub async fn dequeue(&self) -> Result<QueueItem> {
        loop {
            let wait = self.items.notified();
            tokio::pin!(wait);
            wait.as_mut().enable();
            {
                let mut state = self.lock();
                if state.closed {
                    return Err(NarrateError::Closed("queue"));
                }
                if let Some(item) = state.pop() {
                    state.text_bytes -= item.text.len();
                    self.space.notify_one();
                    return Ok(item);
                }
            }
            wait.await;
        }
    }

    /// The next item without removing it.
    pub fn peek(&self) -> Option<QueueItem> {
        let state = self.lock();
        state
            .high
            .front()
            .or_else(|| state.normal.front())
            .cloned()
    }

    /// The next `k` items in dequeue order, without removing them. The
    /// controller uses this to prime the cache in parallel.
    pub fn preview(&self, k: usize) -> Vec<QueueItem> {
        let state = self.lock();
        state
            .high
            .iter()
            .chain(state.normal.iter())
            .take(k)
            .cloned()
            .collect()
    }

    pub fn size(&self) -> usize {
        self.lock().len()
    }

    /// Wait until at least one item slot is free or the deadline expires.
    pub async fn wait_for_space(&self, deadline: Duration) -> Result<()> {
        let waiter = async {
            loop {
                let wait = self.space.notified();
                tokio::pin!(wait);
                wait.as_mut().enable();
                {
                    let state = self.lock();
                    if state.closed {
                        return Err(NarrateError::Closed("queue"));
                    }
                    if state.len() < self.capacity {
                        return Ok(());
                    }
                }
                wait.await;
            }
        };
        match tokio::time::timeout(deadline, waiter).await {
            Ok(result) => result,
            Err(_) => Err(NarrateError::Timeout(deadline)),
        }
    }

    /// Drop all pending items. In-flight synthesis is unaffected.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.high.clear();
        state.normal.clear();
        state.text_bytes = 0;
        self.space.notify_waiters();
    }

    /// Terminally close the queue, waking every blocked producer and
    /// consumer with an error.
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        state.high.clear();
        state.normal.clear();
        state.text_bytes = 0;
        drop(state);
        self.items.notify_waiters();
        self.space.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::VoiceSpec;

    fn item(index: usize, priority: Priority) -> QueueItem {
        let text = format!("sentence number {index}.");
        QueueItem {
            sentence_index: index,
            fingerprint: Fingerprint::compute(&text, &VoiceSpec::new("piper", None, 1.0)),
            text,
            speed: 1.0,
            priority,
            enqueued_at: Instant::now(),
        }
    }

    fn queue(capacity: usize, budget: usize) -> SynthesisQueue {
        SynthesisQueue::new(&QueueConfig {
            capacity,
            text_byte_budget: budget,
        })
    }

    #[tokio::test]
    async fn high_priority_jumps_ahead_of_normal() {
        let q = queue(8, 4096);
        let _ = q.enqueue(item(0, Priority::Normal)).await;
        let _ = q.enqueue(item(1, Priority::Normal)).await;
        let _ = q.enqueue(item(2, Priority::High)).await;

        let order: Vec<usize> = [
            q.dequeue().await,
            q.dequeue().await,
            q.dequeue().await,
        ]
        .into_iter()
        .filter_map(|r| r.ok().map(|i| i.sentence_index))
        .collect();
        assert_eq!(order, vec![2, 0, 1]);
    }

    #[tokio::test]
    async fn fifo_within_a_priority() {
        let q = queue(8, 4096);
        for i in 0..4 {
            let _ = q.enqueue(item(i, Priority::Normal)).await;
        }
        for expected in 0..4 {
            let got = q.dequeue().await.map(|i| i.sentence_index);
            assert_eq!(got.ok(), Some(expected));
        }
    }

    #[tokio::test]
    async fn byte_budget_refuses_without_waiting() {
        let q = queue(100, 30);
        let _ = q.enqueue(item(0, Priority::Normal)).await;
        let result = q.enqueue(item(1, Priority::Normal)).await;
        assert!(matches!(result, Err(NarrateError::QueueFull)));
    }

    #[tokio::test]
    async fn full_queue_blocks_until_a_pop() {
        let q = std::sync::Arc::new(queue(1, 4096));
        let _ = q.enqueue(item(0, Priority::Normal)).await;

        let producer = {
            let q = std::sync::Arc::clone(&q);
            tokio::spawn(async move { q.enqueue(item(1, Priority::Normal)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!producer.is_finished());

        let _ = q.dequeue().await;
        let result = tokio::time::timeout(Duration::from_secs(1), producer).await;
        assert!(matches!(result, Ok(Ok(Ok(())))));
    }

    #[tokio::test]
    async fn batch_preserves_order() {
        let q = queue(8, 4096);
        let batch = vec![
            item(0, Priority::Normal),
            item(1, Priority::Normal),
            item(2, Priority::Normal),
        ];
        assert!(q.enqueue_batch(batch).await.is_ok());
        for expected in 0..3 {
            let got = q.dequeue().await.map(|i| i.sentence_index);
            assert_eq!(got.ok(), Some(expected));
        }
    }

    #[tokio::test]
    async fn preview_does_not_remove() {
        let q = queue(8, 4096);
        let _ = q.enqueue(item(0, Priority::Normal)).await;
        let _ = q.enqueue(item(1, Priority::Normal)).await;
        let previewed = q.preview(3);
        assert_eq!(previewed.len(), 2);
        assert_eq!(q.size(), 2);
    }

    #[tokio::test]
    async fn close_unblocks_a_waiting_consumer() {
        let q = std::sync::Arc::new(queue(4, 4096));
        let consumer = {
            let q = std::sync::Arc::clone(&q);
            tokio::spawn(async move { q.dequeue().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        q.close();
        let result = tokio::time::timeout(Duration::from_secs(1), consumer).await;
        assert!(matches!(result, Ok(Ok(Err(NarrateError::Closed("queue"))))));
    }

    #[tokio::test]
    async fn operations_after_close_are_terminal() {
        let q = queue(4, 4096);
        q.close();
        assert!(matches!(
            q.enqueue(item(0, Priority::High)).await,
            Err(NarrateError::Closed("queue"))
        ));
        assert!(matches!(q.dequeue().await, Err(NarrateError::Closed("queue"))));
    }

    #[tokio::test]
    async fn wait_for_space_times_out_when_full() {
        let q = queue(1, 4096);
        let _ = q.enqueue(item(0, Priority::Normal)).await;
        let result = q.wait_for_space(Duration::from_millis(50)).await;
        assert!(matches!(result, Err(NarrateError::Timeout(_))));
    }

    #[tokio::test]
    async fn clear_drops_pending_work() {
        let q = queue(8, 4096);
        let _ = q.enqueue(item(0, Priority::Normal)).await;
        let _ = q.enqueue(item(1, Priority::High)).await;
        q.clear();
        assert_eq!(q.size(), 0);
        assert!(q.peek().is_none());
    }
}

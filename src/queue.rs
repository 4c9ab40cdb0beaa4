use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::{timeout_at, Instant};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("the queue is full ({capacity} tracks)")]
    Full { capacity: usize },
}

/// FIFO of pending tracks for one guild.
///
/// Producers push from command handlers, the session loop is the only consumer.
pub struct PlayQueue<T> {
    items: Mutex<VecDeque<T>>,
    available: Notify,
    capacity: Option<usize>,
}

impl<T> PlayQueue<T> {
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            available: Notify::new(),
            capacity,
        }
    }

    fn items(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, item: T) -> Result<(), QueueError> {
        self.push_all(vec![item]).map(|_| ())
    }

    /// Appends the whole batch or nothing.
    pub fn push_all(&self, batch: Vec<T>) -> Result<usize, QueueError> {
        let added = batch.len();

        {
            let mut items = self.items();

            if let Some(capacity) = self.capacity {
                if items.len() + added > capacity {
                    return Err(QueueError::Full { capacity });
                }
            }

            items.extend(batch);
        }

        if added > 0 {
            self.available.notify_one();
        }

        Ok(added)
    }

    pub fn try_pop(&self) -> Option<T> {
        self.items().pop_front()
    }

    /// Waits up to `timeout` for the next item.
    pub async fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;

        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let next = self.try_pop();
            if next.is_some() {
                return next;
            }

            if timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }

    /// Drops every pending item, returning how many were discarded.
    pub fn clear(&self) -> usize {
        let mut items = self.items();
        let discarded = items.len();
        items.clear();

        discarded
    }

    pub fn len(&self) -> usize {
        self.items().len()
    }
}

impl<T: Clone> PlayQueue<T> {
    pub fn snapshot(&self, limit: usize) -> Vec<T> {
        self.items().iter().take(limit).cloned().collect()
    }
}

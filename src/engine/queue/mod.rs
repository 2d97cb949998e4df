//! Producer/consumer queues with an explicit loading lifecycle
//!
//! A consumer blocked on an empty queue keeps waiting while producers are
//! still loading, and gets `NoMoreItems` once the queue is empty and loading
//! has finished. `Closed` is terminal: pending items are discarded and later
//! pushes are ignored.

mod request;
mod response;

pub use request::{validate_request, PopulateReport, RequestQueue, RequestQueueScope};
pub use response::{Dump, FuzzOutcome, ResponseQueue};

use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::Notify;

use crate::error::QueueError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadingState {
    /// Producers may still add items
    Loading,
    /// No more items will be added; remaining items can be drained
    Draining,
    /// Discarded; every read reports `NoMoreItems`
    Closed,
}

#[derive(Debug)]
struct Inner<T> {
    items: VecDeque<T>,
    state: LoadingState,
}

/// FIFO shared by both queue kinds
#[derive(Debug)]
pub(crate) struct LoadingQueue<T> {
    inner: Mutex<Inner<T>>,
    notify: Notify,
}

impl<T> Default for LoadingQueue<T> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                state: LoadingState::Loading,
            }),
            notify: Notify::new(),
        }
    }
}

impl<T> LoadingQueue<T> {
    pub fn state(&self) -> LoadingState {
        self.inner.lock().state
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    /// Returns false if the queue is closed and the item was dropped
    pub fn push(&self, item: T) -> bool {
        {
            let mut inner = self.inner.lock();
            if inner.state == LoadingState::Closed {
                return false;
            }
            inner.items.push_back(item);
        }
        self.notify.notify_one();
        true
    }

    pub fn start_loading(&self) {
        let mut inner = self.inner.lock();
        if inner.state == LoadingState::Draining {
            inner.state = LoadingState::Loading;
        }
    }

    pub fn finish_loading(&self) {
        {
            let mut inner = self.inner.lock();
            if inner.state == LoadingState::Loading {
                inner.state = LoadingState::Draining;
            }
        }
        self.notify.notify_waiters();
    }

    pub fn close(&self) {
        {
            let mut inner = self.inner.lock();
            inner.state = LoadingState::Closed;
            inner.items.clear();
        }
        self.notify.notify_waiters();
    }

    /// Non-blocking read: `Ok(None)` means empty but still loading
    pub fn try_pop(&self) -> Result<Option<T>, QueueError> {
        let mut inner = self.inner.lock();
        if let Some(item) = inner.items.pop_front() {
            return Ok(Some(item));
        }
        match inner.state {
            LoadingState::Loading => Ok(None),
            LoadingState::Draining | LoadingState::Closed => Err(QueueError::NoMoreItems),
        }
    }

    pub async fn pop(&self) -> Result<T, QueueError> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a push between the check and the
            // await is not missed
            notified.as_mut().enable();

            if let Some(item) = self.try_pop()? {
                // Pass on a wakeup this waiter may have consumed
                if self.len() > 0 {
                    self.notify.notify_one();
                }
                return Ok(item);
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_round_trip_then_no_more_items() {
        let queue = LoadingQueue::default();
        for i in 0..5 {
            assert!(queue.push(i));
        }
        queue.finish_loading();

        for i in 0..5 {
            assert_eq!(queue.pop().await.unwrap(), i);
        }
        assert_eq!(queue.pop().await, Err(QueueError::NoMoreItems));
        assert_eq!(queue.pop().await, Err(QueueError::NoMoreItems));
    }

    #[tokio::test]
    async fn test_waiter_sees_late_push() {
        let queue = Arc::new(LoadingQueue::default());
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.push("late");
        assert_eq!(consumer.await.unwrap(), Ok("late"));
    }

    #[tokio::test]
    async fn test_finish_loading_wakes_all_waiters() {
        let queue: Arc<LoadingQueue<u32>> = Arc::new(LoadingQueue::default());
        let consumers: Vec<_> = (0..3)
            .map(|_| {
                let queue = queue.clone();
                tokio::spawn(async move { queue.pop().await })
            })
            .collect();
        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.finish_loading();

        for consumer in consumers {
            assert_eq!(consumer.await.unwrap(), Err(QueueError::NoMoreItems));
        }
    }

    #[tokio::test]
    async fn test_close_discards_and_rejects() {
        let queue = LoadingQueue::default();
        queue.push(1);
        queue.close();
        assert!(!queue.push(2));
        assert_eq!(queue.try_pop(), Err(QueueError::NoMoreItems));

        queue.start_loading();
        assert_eq!(queue.state(), LoadingState::Closed);
    }

    #[test]
    fn test_try_pop_distinguishes_empty_from_done() {
        let queue: LoadingQueue<u8> = LoadingQueue::default();
        assert_eq!(queue.try_pop(), Ok(None));
        queue.finish_loading();
        assert_eq!(queue.try_pop(), Err(QueueError::NoMoreItems));
    }
}

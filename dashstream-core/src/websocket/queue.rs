use parking_lot::Mutex;
use std::{collections::VecDeque, time::Duration};
use tokio::sync::Notify;

use crate::{error::HubError, models::message::Message};

/// What to do when a connection's outbound queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropPolicy {
    /// Discard the oldest queued message to make room. Used by live feeds.
    DropOldest,
    /// Wait for space until the deadline. Used when replaying ordered backlogs.
    BlockUntilSpace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    Queued,
    DisplacedOldest,
}

struct QueueState {
    items: VecDeque<Message>,
    closed: bool,
    dropped: u64,
}

/// Bounded FIFO between feed producers and a single connection writer.
pub struct OutboundQueue {
    state: Mutex<QueueState>,
    capacity: usize,
    readable: Notify,
    writable: Notify,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity),
                closed: false,
                dropped: 0,
            }),
            capacity,
            readable: Notify::new(),
            writable: Notify::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dropped(&self) -> u64 {
        self.state.lock().dropped
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn push_drop_oldest(&self, msg: Message) -> Result<Enqueued, HubError> {
        let outcome = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(HubError::QueueClosed);
            }
            let outcome = if state.items.len() >= self.capacity {
                state.items.pop_front();
                state.dropped += 1;
                Enqueued::DisplacedOldest
            } else {
                Enqueued::Queued
            };
            state.items.push_back(msg);
            outcome
        };
        self.readable.notify_one();
        Ok(outcome)
    }

    pub async fn push_wait(&self, msg: Message, deadline: Duration) -> Result<(), HubError> {
        tokio::time::timeout(deadline, self.push_when_space(msg))
            .await
            .map_err(|_| HubError::Timeout)?
    }

    async fn push_when_space(&self, msg: Message) -> Result<(), HubError> {
        loop {
            let notified = self.writable.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                if state.closed {
                    return Err(HubError::QueueClosed);
                }
                if state.items.len() < self.capacity {
                    state.items.push_back(msg);
                    drop(state);
                    self.readable.notify_one();
                    return Ok(());
                }
            }

            notified.await;
        }
    }

    /// Waits for the next message. Returns `None` once the queue is closed.
    pub async fn pop(&self) -> Option<Message> {
        loop {
            let notified = self.readable.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                if state.closed {
                    return None;
                }
                if let Some(msg) = state.items.pop_front() {
                    drop(state);
                    self.writable.notify_one();
                    return Some(msg);
                }
            }

            notified.await;
        }
    }

    pub fn close(&self) {
        {
            let mut state = self.state.lock();
            state.closed = true;
            state.items.clear();
        }
        self.readable.notify_waiters();
        self.writable.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::topic::Topic;
    use std::sync::Arc;

    fn msg(i: u32) -> Message {
        Message::new(Topic::Milestone, &i).unwrap()
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = OutboundQueue::new(4);
        for i in 0..3 {
            queue.push_drop_oldest(msg(i)).unwrap();
        }
        for i in 0..3 {
            assert_eq!(queue.pop().await.unwrap(), msg(i));
        }
    }

    #[tokio::test]
    async fn test_drop_oldest_when_full() {
        let queue = OutboundQueue::new(2);
        assert_eq!(queue.push_drop_oldest(msg(1)).unwrap(), Enqueued::Queued);
        assert_eq!(queue.push_drop_oldest(msg(2)).unwrap(), Enqueued::Queued);
        assert_eq!(
            queue.push_drop_oldest(msg(3)).unwrap(),
            Enqueued::DisplacedOldest
        );

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.pop().await.unwrap(), msg(2));
        assert_eq!(queue.pop().await.unwrap(), msg(3));
    }

    #[tokio::test]
    async fn test_push_wait_times_out_when_full() {
        let queue = OutboundQueue::new(1);
        queue.push_drop_oldest(msg(1)).unwrap();

        let result = queue.push_wait(msg(2), Duration::from_millis(50)).await;
        assert!(matches!(result, Err(HubError::Timeout)));
        assert_eq!(queue.pop().await.unwrap(), msg(1));
    }

    #[tokio::test]
    async fn test_push_wait_resumes_when_writer_drains() {
        let queue = Arc::new(OutboundQueue::new(1));
        queue.push_drop_oldest(msg(1)).unwrap();

        let producer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.push_wait(msg(2), Duration::from_secs(5)).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(queue.pop().await.unwrap(), msg(1));
        producer.await.unwrap().unwrap();
        assert_eq!(queue.pop().await.unwrap(), msg(2));
        assert_eq!(queue.dropped(), 0);
    }

    #[tokio::test]
    async fn test_close_wakes_reader_and_rejects_pushes() {
        let queue = Arc::new(OutboundQueue::new(1));
        let reader = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();
        assert!(reader.await.unwrap().is_none());
        assert!(matches!(
            queue.push_drop_oldest(msg(1)),
            Err(HubError::QueueClosed)
        ));
    }
}

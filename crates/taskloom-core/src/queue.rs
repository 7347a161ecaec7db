//! Bounded async queue
//!
//! Streams values from one producing drive loop to external observers.
//! FIFO order is preserved; `close` lets consumers drain what is buffered
//! and then observe the end of the stream.

use std::sync::Mutex;

use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("queue is closed")]
    Closed,
}

/// Bounded single-producer queue with concurrent consumers.
pub struct Queue<T> {
    sender: Mutex<Option<mpsc::Sender<T>>>,
    receiver: tokio::sync::Mutex<mpsc::Receiver<T>>,
}

impl<T> Queue<T> {
    pub const DEFAULT_CAPACITY: usize = 256;

    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Self {
            sender: Mutex::new(Some(sender)),
            receiver: tokio::sync::Mutex::new(receiver),
        }
    }

    fn sender(&self) -> Option<mpsc::Sender<T>> {
        self.sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Push one value, waiting while the queue is full.
    pub async fn put(&self, item: T) -> Result<(), QueueError> {
        match self.sender() {
            Some(sender) => sender.send(item).await.map_err(|_| QueueError::Closed),
            None => Err(QueueError::Closed),
        }
    }

    /// Pop the next value; `None` once the queue is closed and drained.
    pub async fn get(&self) -> Option<T> {
        self.receiver.lock().await.recv().await
    }

    /// Pop without waiting.
    pub fn try_get(&self) -> Option<T> {
        self.receiver.try_lock().ok()?.try_recv().ok()
    }

    /// Drain everything currently buffered.
    pub fn drain(&self) -> Vec<T> {
        let mut out = Vec::new();
        if let Ok(mut receiver) = self.receiver.try_lock() {
            while let Ok(item) = receiver.try_recv() {
                out.push(item);
            }
        }
        out
    }

    /// Stop accepting values. Buffered values stay readable.
    pub fn close(&self) {
        self.sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
    }

    pub fn is_closed(&self) -> bool {
        self.sender().is_none()
    }
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_preserves_order() {
        tokio_test::block_on(async {
            let queue = Queue::new(8);
            for i in 0..5 {
                queue.put(i).await.expect("put");
            }
            for i in 0..5 {
                assert_eq!(queue.get().await, Some(i));
            }
        });
    }

    #[test]
    fn test_close_rejects_new_values_but_drains_buffered() {
        tokio_test::block_on(async {
            let queue = Queue::new(8);
            queue.put(1).await.expect("put");
            queue.close();
            assert!(queue.is_closed());
            assert_eq!(queue.put(2).await, Err(QueueError::Closed));
            assert_eq!(queue.get().await, Some(1));
            assert_eq!(queue.get().await, None);
        });
    }

    #[tokio::test]
    async fn test_consumer_sees_values_pushed_concurrently() {
        let queue = std::sync::Arc::new(Queue::new(2));
        let producer = queue.clone();
        let handle = tokio::spawn(async move {
            for i in 0..10 {
                producer.put(i).await.expect("put");
            }
            producer.close();
        });
        let mut seen = Vec::new();
        while let Some(item) = queue.get().await {
            seen.push(item);
        }
        handle.await.expect("producer");
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }
}

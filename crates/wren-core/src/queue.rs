use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

/// Inbound user messages typed while a turn is running.  Cloning shares
/// the same queue.
#[derive(Debug, Clone, Default)]
pub struct MessageQueue {
    inner: Arc<Mutex<VecDeque<String>>>,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<String>> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn push(&self, msg: impl Into<String>) {
        self.lock().push_back(msg.into());
    }

    pub fn pop(&self) -> Option<String> {
        self.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_fifo_order() {
        let q = MessageQueue::new();
        let producer = q.clone();
        producer.push("a");
        producer.push("b");
        assert_eq!(q.len(), 2);
        assert_eq!(q.pop().as_deref(), Some("a"));
        assert_eq!(q.pop().as_deref(), Some("b"));
        assert!(q.pop().is_none());
        assert!(producer.is_empty());
    }
}

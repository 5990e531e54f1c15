use parking_lot::RwLock;
use std::collections::VecDeque;

/// A parsed source-side change notification, routed by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Insert {
        index: String,
        reference: String,
    },
    Update {
        index: String,
        reference: String,
        soft_deleted: bool,
        previously_soft_deleted: bool,
    },
    Delete {
        index: String,
        reference: String,
    },
    RelationUpdate {
        index: String,
        relation: String,
        reference: String,
        pivot: bool,
    },
}

impl Event {
    pub fn index(&self) -> &str {
        match self {
            Event::Insert { index, .. }
            | Event::Update { index, .. }
            | Event::Delete { index, .. }
            | Event::RelationUpdate { index, .. } => index,
        }
    }
}

/// A relation change waiting in an index mailbox. `relation` is the unique
/// name; `reference` is the relation's `local` value, or the pivot's
/// `pivot_local` value when `pivot` is set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RelationUpdateEvent {
    pub relation: String,
    pub reference: String,
    pub pivot: bool,
}

/// Concurrent FIFO: O(1) append, bulk drain. Appends and drains are the only
/// critical sections; nothing is held across await points.
#[derive(Debug)]
pub struct EventQueue<T> {
    inner: RwLock<VecDeque<T>>,
}

impl<T> Default for EventQueue<T> {
    fn default() -> Self {
        EventQueue {
            inner: RwLock::new(VecDeque::new()),
        }
    }
}

impl<T> EventQueue<T> {
    pub fn new() -> Self {
        EventQueue::default()
    }

    pub fn push(&self, item: T) {
        self.inner.write().push_back(item);
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Removes and returns up to `max` items in insertion order.
    pub fn drain(&self, max: usize) -> Vec<T> {
        let mut queue = self.inner.write();
        let count = max.min(queue.len());
        queue.drain(..count).collect()
    }
}

/// Per-index mailboxes, one queue per event kind. FIFO within a kind; no
/// ordering between kinds.
#[derive(Debug, Default)]
pub struct WaitingEvents {
    pub inserts: EventQueue<String>,
    pub updates: EventQueue<String>,
    pub deletes: EventQueue<String>,
    pub relation_updates: EventQueue<RelationUpdateEvent>,
}

impl WaitingEvents {
    pub fn new() -> Self {
        WaitingEvents::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_is_fifo() {
        let queue = EventQueue::new();
        queue.push("a");
        queue.push("b");
        queue.push("c");

        assert_eq!(queue.drain(2), ["a", "b"]);
        assert_eq!(queue.drain(10), ["c"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_drain_caps_at_len() {
        let queue = EventQueue::new();
        queue.push(1);
        assert_eq!(queue.drain(500), [1]);
        assert_eq!(queue.drain(500), Vec::<i32>::new());
    }

    #[test]
    fn test_concurrent_appends_are_all_kept() {
        use std::sync::Arc;

        let queue = Arc::new(EventQueue::new());
        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let queue = Arc::clone(&queue);
                std::thread::spawn(move || {
                    for item in 0..100 {
                        queue.push(worker * 100 + item);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(queue.len(), 800);
    }
}

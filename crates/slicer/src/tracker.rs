//! Issued-but-unacknowledged work items

use std::collections::HashMap;
use std::sync::Mutex;

use crate::types::{MessageId, WorkItem};

/// Mutex-guarded map of message ids handed to the host
///
/// Lock hold times are a single map operation, so a std mutex is used and
/// never held across an await. A poisoned lock is recovered: the map is
/// always left consistent by each operation.
#[derive(Debug, Default)]
pub struct PendingWorkTracker {
    items: Mutex<HashMap<MessageId, WorkItem>>,
}

impl PendingWorkTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<MessageId, WorkItem>> {
        self.items.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn insert(&self, id: MessageId, item: WorkItem) {
        self.lock().insert(id, item);
    }

    /// Remove and return the item for `id`; at most one caller gets it
    pub fn remove(&self, id: &MessageId) -> Option<WorkItem> {
        self.lock().remove(id)
    }

    pub fn get(&self, id: &MessageId) -> Option<WorkItem> {
        self.lock().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// The only pending item, if exactly one is pending
    pub fn sole_item(&self) -> Option<WorkItem> {
        let items = self.lock();
        if items.len() == 1 {
            items.values().next().cloned()
        } else {
            None
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::types::Partition;
    use std::sync::Arc;

    fn partition(low: i64, high: i64) -> WorkItem {
        WorkItem::Partition(Partition::new("t", "id", low, high))
    }

    #[test]
    fn test_insert_get_remove() {
        let tracker = PendingWorkTracker::new();
        let id = MessageId::new();
        tracker.insert(id, partition(1, 3));

        assert_eq!(tracker.get(&id), Some(partition(1, 3)));
        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.remove(&id), Some(partition(1, 3)));
        assert!(tracker.is_empty());
        assert_eq!(tracker.remove(&id), None);
    }

    #[test]
    fn test_sole_item() {
        let tracker = PendingWorkTracker::new();
        assert_eq!(tracker.sole_item(), None);

        tracker.insert(MessageId::new(), WorkItem::Done);
        assert_eq!(tracker.sole_item(), Some(WorkItem::Done));

        tracker.insert(MessageId::new(), partition(1, 3));
        assert_eq!(tracker.sole_item(), None);
    }

    #[test]
    fn test_concurrent_remove_yields_item_once() {
        let tracker = Arc::new(PendingWorkTracker::new());
        let id = MessageId::new();
        tracker.insert(id, partition(1, 3));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                std::thread::spawn(move || tracker.remove(&id).is_some())
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}

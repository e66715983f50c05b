//! Scheduling queue for delayed and periodic posts.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::message::Message;

/// Handle returned by periodic posts.
///
/// Cancelling stops every future firing. A firing that already left the
/// schedule is still delivered.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    pub(crate) fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

#[derive(Debug)]
pub(crate) struct Repeat {
    pub(crate) interval: Duration,
    pub(crate) handle: CancelHandle,
}

/// One queued message.
#[derive(Debug)]
pub(crate) struct Scheduled {
    pub(crate) due: Instant,
    pub(crate) seq: u64,
    pub(crate) message: Arc<Message>,
    pub(crate) repeat: Option<Repeat>,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Scheduled {}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is max-heap, so reverse: earliest due first,
        // then FIFO by post sequence for equal due times
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
pub(crate) struct ScheduleQueue {
    heap: BinaryHeap<Scheduled>,
}

impl ScheduleQueue {
    pub(crate) fn push(&mut self, entry: Scheduled) {
        self.heap.push(entry);
    }

    pub(crate) fn next_due(&self) -> Option<Instant> {
        self.heap.peek().map(|entry| entry.due)
    }

    /// Pop the earliest entry if it is due at `now`.
    pub(crate) fn pop_due(&mut self, now: Instant) -> Option<Scheduled> {
        if self.heap.peek()?.due <= now {
            self.heap.pop()
        } else {
            None
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }

    pub(crate) fn clear(&mut self) {
        self.heap.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(due: Instant, seq: u64, name: &str) -> Scheduled {
        Scheduled {
            due,
            seq,
            message: Arc::new(Message::read_device(name)),
            repeat: None,
        }
    }

    #[test]
    fn test_pops_by_due_then_sequence() {
        let t0 = Instant::now();
        let mut queue = ScheduleQueue::default();
        queue.push(entry(t0 + Duration::from_millis(5), 0, "late"));
        queue.push(entry(t0, 2, "second"));
        queue.push(entry(t0, 1, "first"));

        let now = t0 + Duration::from_millis(10);
        let order: Vec<String> = std::iter::from_fn(|| queue.pop_due(now))
            .map(|e| e.message.target().unwrap_or_default().to_string())
            .collect();
        assert_eq!(order, vec!["first", "second", "late"]);
    }

    #[test]
    fn test_not_yet_due_stays_queued() {
        let t0 = Instant::now();
        let mut queue = ScheduleQueue::default();
        queue.push(entry(t0 + Duration::from_secs(1), 0, "later"));

        assert!(queue.pop_due(t0).is_none());
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.next_due(), Some(t0 + Duration::from_secs(1)));
    }

    #[test]
    fn test_cancel_handle_clones_share_state() {
        let handle = CancelHandle::new();
        let clone = handle.clone();
        clone.cancel();
        assert!(handle.is_cancelled());
    }
}

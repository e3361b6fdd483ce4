//! Bounded audit trail of routed messages.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::protocol::Message;

/// Default number of entries kept before the oldest are evicted.
pub const DEFAULT_AUDIT_CAPACITY: usize = 10_000;

/// Snapshot of a message as it passed through the router.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub recorded_at: DateTime<Utc>,
    pub message: Message,
}

/// Ring buffer of audit entries, oldest evicted first.
#[derive(Debug)]
pub struct AuditLog {
    capacity: usize,
    entries: VecDeque<AuditEntry>,
}

impl AuditLog {
    /// Create a log holding at most `capacity` entries (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity.min(1024)),
        }
    }

    pub fn record(&mut self, message: &Message) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(AuditEntry {
            recorded_at: Utc::now(),
            message: message.clone(),
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// All entries, oldest first.
    pub fn snapshot(&self) -> Vec<AuditEntry> {
        self.entries.iter().cloned().collect()
    }

}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new(DEFAULT_AUDIT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MessageType;

    fn numbered(n: i64) -> Message {
        Message::new(MessageType::SystemLog, "sink").with_field("n", n)
    }

    #[test]
    fn test_evicts_oldest_first() {
        let mut log = AuditLog::new(3);
        for n in 0..5 {
            log.record(&numbered(n));
        }

        assert_eq!(log.len(), 3);
        let kept: Vec<i64> = log
            .snapshot()
            .iter()
            .map(|e| e.message.payload["n"].as_i64().unwrap())
            .collect();
        assert_eq!(kept, vec![2, 3, 4]);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut log = AuditLog::new(0);
        log.record(&numbered(1));
        log.record(&numbered(2));
        assert_eq!(log.capacity(), 1);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_default_capacity() {
        assert_eq!(AuditLog::default().capacity(), 10_000);
    }
}

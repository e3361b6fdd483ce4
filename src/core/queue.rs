//! Per-priority delivery queues for the router.
//!
//! One FIFO queue per priority level. The router's scheduler drains the highest
//! non-empty level to exhaustion before looking at the next lower one, so sustained
//! high-priority traffic can starve lower levels.

use std::collections::VecDeque;

use serde::Serialize;

use crate::protocol::{Message, Priority};

/// FIFO queue per priority level.
#[derive(Debug, Default)]
pub struct PriorityQueues {
    levels: [VecDeque<Message>; 4],
}

impl PriorityQueues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a message at its own priority.
    pub fn push(&mut self, message: Message) {
        self.levels[message.priority.level() as usize].push_back(message);
    }

    /// Dequeue the oldest message of one level.
    pub fn pop(&mut self, priority: Priority) -> Option<Message> {
        self.levels[priority.level() as usize].pop_front()
    }

    /// Dequeue from the highest non-empty level.
    pub fn pop_highest(&mut self) -> Option<Message> {
        Priority::DESCENDING
            .into_iter()
            .find_map(|priority| self.pop(priority))
    }

    pub fn len(&self, priority: Priority) -> usize {
        self.levels[priority.level() as usize].len()
    }

    pub fn total(&self) -> usize {
        self.levels.iter().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    pub fn depths(&self) -> QueueDepths {
        QueueDepths {
            critical: self.len(Priority::Critical),
            high: self.len(Priority::High),
            normal: self.len(Priority::Normal),
            low: self.len(Priority::Low),
            total: self.total(),
        }
    }
}

/// Queue depths per priority level.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueDepths {
    pub critical: usize,
    pub high: usize,
    pub normal: usize,
    pub low: usize,
    pub total: usize,
}

impl std::fmt::Display for QueueDepths {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Queue Depths:")?;
        writeln!(f, "  Critical: {}", self.critical)?;
        writeln!(f, "  High:     {}", self.high)?;
        writeln!(f, "  Normal:   {}", self.normal)?;
        writeln!(f, "  Low:      {}", self.low)?;
        write!(f, "  Total:    {}", self.total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MessageType;

    fn at(priority: Priority, n: i64) -> Message {
        Message::new(MessageType::Query, "x")
            .with_priority(priority)
            .with_field("n", n)
    }

    #[test]
    fn test_highest_first_fifo_within_level() {
        let mut queues = PriorityQueues::new();
        queues.push(at(Priority::Low, 1));
        queues.push(at(Priority::High, 2));
        queues.push(at(Priority::Critical, 3));
        queues.push(at(Priority::High, 4));

        let order: Vec<i64> = std::iter::from_fn(|| queues.pop_highest())
            .map(|m| m.payload["n"].as_i64().unwrap())
            .collect();
        assert_eq!(order, vec![3, 2, 4, 1]);
        assert!(queues.is_empty());
    }

    #[test]
    fn test_depths() {
        let mut queues = PriorityQueues::new();
        queues.push(at(Priority::Normal, 1));
        queues.push(at(Priority::Normal, 2));
        queues.push(at(Priority::Low, 3));

        let depths = queues.depths();
        assert_eq!(depths.normal, 2);
        assert_eq!(depths.low, 1);
        assert_eq!(depths.critical, 0);
        assert_eq!(depths.total, 3);
        assert!(depths.to_string().contains("Normal:   2"));
    }
}

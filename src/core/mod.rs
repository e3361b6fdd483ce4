//! Core module - routing, scheduling, and auditing.
//!
//! This module contains the process-wide side of messaging:
//! - The router between network protocols
//! - Per-priority delivery queues
//! - The bounded audit trail of routed messages

pub mod audit;
pub mod queue;
pub mod router;

pub use audit::{AuditEntry, AuditLog, DEFAULT_AUDIT_CAPACITY};
pub use queue::{PriorityQueues, QueueDepths};
pub use router::{MessageRouter, RouterStats};

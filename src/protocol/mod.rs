//! Inter-network communication protocol.
//!
//! This module defines the per-network side of messaging:
//! - The message envelope with correlation and retry metadata
//! - The closed message taxonomy and priority levels
//! - The communication endpoint each network owns
//! - The table of requests awaiting a response

pub mod endpoint;
pub mod envelope;
pub mod handler;
pub mod pending;
pub mod types;

pub use endpoint::{CommunicationProtocol, ProtocolStats, Transport};
pub use envelope::{Message, Payload, DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT};
pub use handler::{HandlerResult, MessageHandler};
pub use pending::PendingResponses;
pub use types::{MessageType, Priority};

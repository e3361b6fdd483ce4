//! hiernet library root.
//!
//! In-process messaging substrate for a hierarchy of cooperating networks: a
//! message envelope, a per-network [`CommunicationProtocol`] and a process-wide
//! [`MessageRouter`].

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod network;
pub mod protocol;

pub use cli::Commands;
pub use config::{load_settings, Settings};
pub use core::{AuditEntry, MessageRouter, RouterStats};
pub use error::{Error, Result};
pub use network::{
    CapabilityRegistry, EchoNetwork, Network, NetworkCapability, NetworkHandle, NetworkMetadata,
    NetworkState, NetworkType, StateType,
};
pub use protocol::{CommunicationProtocol, Message, MessageHandler, MessageType, Priority};

//! Message taxonomy and priority levels.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Message type classification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    // Query traffic
    /// User query to process
    Query,
    /// Decomposed sub-query handed to a network
    SubQuery,
    /// Response to a query
    QueryResponse,

    // Control traffic
    Register,
    Unregister,
    Heartbeat,
    StatusUpdate,

    // Data traffic
    DataRequest,
    DataResponse,
    KnowledgeShare,

    // Evolution traffic
    PerformanceReport,
    QualityAssessment,
    RewardSignal,
    /// Network is about to be removed
    PruningNotice,

    // Innovation traffic
    IdeaProposal,
    HypothesisTest,
    ExperimentResult,

    // Admin traffic
    AdminCommand,
    AdminFeedback,
    SystemLog,
}

impl MessageType {
    /// Every message type, in declaration order.
    pub const ALL: [MessageType; 20] = [
        MessageType::Query,
        MessageType::SubQuery,
        MessageType::QueryResponse,
        MessageType::Register,
        MessageType::Unregister,
        MessageType::Heartbeat,
        MessageType::StatusUpdate,
        MessageType::DataRequest,
        MessageType::DataResponse,
        MessageType::KnowledgeShare,
        MessageType::PerformanceReport,
        MessageType::QualityAssessment,
        MessageType::RewardSignal,
        MessageType::PruningNotice,
        MessageType::IdeaProposal,
        MessageType::HypothesisTest,
        MessageType::ExperimentResult,
        MessageType::AdminCommand,
        MessageType::AdminFeedback,
        MessageType::SystemLog,
    ];

    /// Wire tag for this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Query => "query",
            MessageType::SubQuery => "sub_query",
            MessageType::QueryResponse => "query_response",
            MessageType::Register => "register",
            MessageType::Unregister => "unregister",
            MessageType::Heartbeat => "heartbeat",
            MessageType::StatusUpdate => "status_update",
            MessageType::DataRequest => "data_request",
            MessageType::DataResponse => "data_response",
            MessageType::KnowledgeShare => "knowledge_share",
            MessageType::PerformanceReport => "performance_report",
            MessageType::QualityAssessment => "quality_assessment",
            MessageType::RewardSignal => "reward_signal",
            MessageType::PruningNotice => "pruning_notice",
            MessageType::IdeaProposal => "idea_proposal",
            MessageType::HypothesisTest => "hypothesis_test",
            MessageType::ExperimentResult => "experiment_result",
            MessageType::AdminCommand => "admin_command",
            MessageType::AdminFeedback => "admin_feedback",
            MessageType::SystemLog => "system_log",
        }
    }
}

impl Default for MessageType {
    fn default() -> Self {
        Self::Query
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message priority levels.
///
/// Serialized as the integer level (0-3).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(into = "u8", try_from = "u8")]
pub enum Priority {
    Low = 0,
    Normal = 1,
    High = 2,
    Critical = 3,
}

impl Priority {
    /// All levels, highest first. This is the order the router drains its queues in.
    pub const DESCENDING: [Priority; 4] = [
        Priority::Critical,
        Priority::High,
        Priority::Normal,
        Priority::Low,
    ];

    pub fn level(self) -> u8 {
        self as u8
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::Normal
    }
}

impl From<Priority> for u8 {
    fn from(priority: Priority) -> Self {
        priority.level()
    }
}

impl TryFrom<u8> for Priority {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Priority::Low),
            1 => Ok(Priority::Normal),
            2 => Ok(Priority::High),
            3 => Ok(Priority::Critical),
            other => Err(format!("Unknown priority level: {}", other)),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Normal => write!(f, "normal"),
            Priority::High => write!(f, "high"),
            Priority::Critical => write!(f, "critical"),
        }
    }
}

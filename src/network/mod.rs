//! Networks: the participants that talk through the router.
//!
//! A [`Network`] describes itself with [`NetworkMetadata`] and installs its message
//! handlers on the protocol it is given. [`NetworkHandle::attach`] wires a network into
//! a router; the handle owns the network's protocol, state and counters for as long as
//! it is attached.

pub mod capability;
pub mod echo;
pub mod handle;
pub mod metrics;
pub mod state;

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::protocol::CommunicationProtocol;

pub use capability::{CapabilityRegistry, NetworkCapability};
pub use echo::EchoNetwork;
pub use handle::NetworkHandle;
pub use metrics::{MetricsSnapshot, NetworkMetrics};
pub use state::{NetworkState, StateManager, StateType, DEFAULT_STATE_HISTORY};

/// Role of a network in the hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkType {
    /// Top-level orchestrator
    Master,
    /// Coordinates a group of specialists
    Department,
    #[default]
    Specialist,
    Innovation,
    QualityControl,
}

impl NetworkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkType::Master => "master",
            NetworkType::Department => "department",
            NetworkType::Specialist => "specialist",
            NetworkType::Innovation => "innovation",
            NetworkType::QualityControl => "quality_control",
        }
    }
}

impl std::fmt::Display for NetworkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity and advertised capabilities of a network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkMetadata {
    pub network_id: String,
    pub name: String,
    #[serde(default)]
    pub network_type: NetworkType,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl NetworkMetadata {
    pub fn new(network_id: impl Into<String>, network_type: NetworkType) -> Self {
        let network_id = network_id.into();
        Self {
            name: network_id.clone(),
            network_id,
            network_type,
            parent_id: None,
            description: String::new(),
            capabilities: BTreeSet::new(),
            tags: BTreeSet::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.insert(capability.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }
}

/// A participant in the hierarchy.
#[async_trait]
pub trait Network: Send + Sync {
    fn metadata(&self) -> &NetworkMetadata;

    /// Register this network's handlers on its protocol.
    ///
    /// Called once by [`NetworkHandle::attach`] before the protocol starts.
    async fn install_handlers(&self, protocol: &Arc<CommunicationProtocol>) -> Result<()>;

    /// Scored descriptions of what this network offers.
    ///
    /// Defaults to one perfect-quality entry per advertised capability tag.
    fn capability_details(&self) -> Vec<NetworkCapability> {
        self.metadata()
            .capabilities
            .iter()
            .map(NetworkCapability::new)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_builder() {
        let metadata = NetworkMetadata::new("nlp", NetworkType::Department)
            .with_name("Language")
            .with_parent("master")
            .with_description("Language department")
            .with_capability("summarize")
            .with_capability("translate")
            .with_tag("text");

        assert_eq!(metadata.name, "Language");
        assert_eq!(metadata.parent_id.as_deref(), Some("master"));
        assert_eq!(metadata.description, "Language department");
        assert!(metadata.has_capability("translate"));
        assert!(!metadata.has_capability("vision"));

        let value = serde_json::to_value(&metadata).unwrap();
        assert_eq!(value["network_type"], "department");
        assert_eq!(value["capabilities"], serde_json::json!(["summarize", "translate"]));
    }

    #[test]
    fn test_network_type_names() {
        assert_eq!(NetworkType::QualityControl.to_string(), "quality_control");
        assert_eq!(NetworkType::default(), NetworkType::Specialist);
        let parsed: NetworkType = serde_json::from_str("\"innovation\"").unwrap();
        assert_eq!(parsed, NetworkType::Innovation);
    }

    #[test]
    fn test_default_capability_details() {
        let network = EchoNetwork::new(
            NetworkMetadata::new("a", NetworkType::Specialist)
                .with_capability("search")
                .with_capability("index"),
        );
        let details = network.capability_details();
        let tags: Vec<&str> = details.iter().map(|c| c.capability_type.as_str()).collect();
        assert_eq!(tags, vec!["index", "search"]);
        assert!(details.iter().all(|c| (c.quality_score() - 1.0).abs() < 1e-9));
    }
}

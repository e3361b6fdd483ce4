//! Scored capability descriptions and a registry to rank them.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::protocol::Payload;

/// Processing time treated as fully efficient, in milliseconds.
const BASELINE_PROCESSING_MS: f64 = 1000.0;

/// A capability one network offers, with quality figures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkCapability {
    /// Capability tag, as used for routing
    pub capability_type: String,
    /// Network providing it; set on registration
    #[serde(default)]
    pub network_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_version")]
    pub version: String,
    /// 0.0 to 1.0
    #[serde(default = "default_score")]
    pub confidence_score: f64,
    /// Average processing time
    #[serde(default)]
    pub processing_time_ms: f64,
    /// 0.0 to 1.0
    #[serde(default = "default_score")]
    pub accuracy_score: f64,
    #[serde(default)]
    pub supported_inputs: BTreeSet<String>,
    #[serde(default)]
    pub supported_outputs: BTreeSet<String>,
    /// Other capabilities this one relies on
    #[serde(default)]
    pub dependencies: BTreeSet<String>,
    #[serde(default)]
    pub metadata: Payload,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

fn default_score() -> f64 {
    1.0
}

impl NetworkCapability {
    pub fn new(capability_type: impl Into<String>) -> Self {
        let capability_type = capability_type.into();
        Self {
            name: capability_type.clone(),
            capability_type,
            network_id: String::new(),
            description: String::new(),
            version: default_version(),
            confidence_score: default_score(),
            processing_time_ms: 0.0,
            accuracy_score: default_score(),
            supported_inputs: BTreeSet::new(),
            supported_outputs: BTreeSet::new(),
            dependencies: BTreeSet::new(),
            metadata: Payload::new(),
        }
    }

    pub fn with_scores(mut self, confidence: f64, accuracy: f64) -> Self {
        self.confidence_score = confidence;
        self.accuracy_score = accuracy;
        self
    }

    pub fn with_processing_time(mut self, processing_time_ms: f64) -> Self {
        self.processing_time_ms = processing_time_ms;
        self
    }

    /// Overall quality in 0.0..=1.0.
    ///
    /// 80% the mean of accuracy and confidence, 20% efficiency, where anything at or
    /// under one second counts as fully efficient.
    pub fn quality_score(&self) -> f64 {
        let base = (self.accuracy_score + self.confidence_score) / 2.0;
        let efficiency = (BASELINE_PROCESSING_MS / self.processing_time_ms.max(1.0)).min(1.0);
        base * 0.8 + efficiency * 0.2
    }
}

/// Capabilities indexed by tag and by providing network.
#[derive(Debug, Default)]
pub struct CapabilityRegistry {
    by_type: HashMap<String, Vec<NetworkCapability>>,
    by_network: HashMap<String, BTreeSet<String>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `capability` as offered by `network_id`.
    ///
    /// A network registering the same tag again replaces its earlier entry.
    pub fn register_capability(&mut self, network_id: &str, mut capability: NetworkCapability) {
        capability.network_id = network_id.to_string();
        let entries = self
            .by_type
            .entry(capability.capability_type.clone())
            .or_default();
        entries.retain(|existing| existing.network_id != network_id);

        self.by_network
            .entry(network_id.to_string())
            .or_default()
            .insert(capability.capability_type.clone());
        entries.push(capability);
    }

    /// Drop every capability `network_id` registered.
    pub fn unregister_network(&mut self, network_id: &str) {
        let Some(tags) = self.by_network.remove(network_id) else {
            return;
        };
        for tag in tags {
            if let Some(entries) = self.by_type.get_mut(&tag) {
                entries.retain(|capability| capability.network_id != network_id);
                if entries.is_empty() {
                    self.by_type.remove(&tag);
                }
            }
        }
    }

    /// Providers of `capability_type` with at least `min_quality`, best first.
    pub fn find_networks_by_capability(
        &self,
        capability_type: &str,
        min_quality: f64,
    ) -> Vec<NetworkCapability> {
        let mut matches: Vec<NetworkCapability> = self
            .by_type
            .get(capability_type)
            .into_iter()
            .flatten()
            .filter(|capability| capability.quality_score() >= min_quality)
            .cloned()
            .collect();
        matches.sort_by(|a, b| b.quality_score().total_cmp(&a.quality_score()));
        matches
    }

    pub fn get_network_capabilities(&self, network_id: &str) -> BTreeSet<String> {
        self.by_network.get(network_id).cloned().unwrap_or_default()
    }

    /// Every registered tag, sorted.
    pub fn capability_types(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.by_type.keys().cloned().collect();
        tags.sort();
        tags
    }
}

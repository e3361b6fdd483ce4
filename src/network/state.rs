//! Network operational state and its transition history.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::protocol::Payload;

/// Number of past states a [`StateManager`] keeps by default.
pub const DEFAULT_STATE_HISTORY: usize = 100;

/// Operational state of a network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateType {
    Initializing,
    Idle,
    Processing,
    /// Waiting on responses from other networks
    Waiting,
    Error,
    Shutdown,
    Offline,
    Maintenance,
}

impl std::fmt::Display for StateType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StateType::Initializing => "initializing",
            StateType::Idle => "idle",
            StateType::Processing => "processing",
            StateType::Waiting => "waiting",
            StateType::Error => "error",
            StateType::Shutdown => "shutdown",
            StateType::Offline => "offline",
            StateType::Maintenance => "maintenance",
        };
        f.write_str(name)
    }
}

/// One state a network was in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkState {
    pub network_id: String,
    pub state_type: StateType,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub context: Payload,
    #[serde(default)]
    pub previous_state: Option<StateType>,
    #[serde(default)]
    pub error_info: Option<Payload>,
}

impl NetworkState {
    pub fn new(network_id: impl Into<String>, state_type: StateType) -> Self {
        Self {
            network_id: network_id.into(),
            state_type,
            timestamp: Utc::now(),
            message: String::new(),
            context: Payload::new(),
            previous_state: None,
            error_info: None,
        }
    }

    /// Idle, processing or waiting.
    pub fn is_operational(&self) -> bool {
        matches!(
            self.state_type,
            StateType::Idle | StateType::Processing | StateType::Waiting
        )
    }

    /// Ready to take a new query.
    pub fn is_available(&self) -> bool {
        self.state_type == StateType::Idle
    }

    /// Errored or in maintenance; needs an operator.
    pub fn requires_attention(&self) -> bool {
        matches!(self.state_type, StateType::Error | StateType::Maintenance)
    }
}

/// Tracks a network's current state and a bounded history of earlier ones.
#[derive(Debug)]
pub struct StateManager {
    network_id: String,
    current: NetworkState,
    history: VecDeque<NetworkState>,
    max_history: usize,
}

impl StateManager {
    /// Start offline with the default history bound.
    pub fn new(network_id: impl Into<String>) -> Self {
        Self::with_history_capacity(network_id, DEFAULT_STATE_HISTORY)
    }

    pub fn with_history_capacity(network_id: impl Into<String>, max_history: usize) -> Self {
        let network_id = network_id.into();
        Self {
            current: NetworkState::new(network_id.clone(), StateType::Offline),
            network_id,
            history: VecDeque::new(),
            max_history: max_history.max(1),
        }
    }

    /// Move to `state_type`, pushing the current state onto the history.
    pub fn transition_to(
        &mut self,
        state_type: StateType,
        message: impl Into<String>,
        context: Option<Payload>,
    ) -> &NetworkState {
        let mut next = NetworkState::new(self.network_id.clone(), state_type);
        next.message = message.into();
        next.context = context.unwrap_or_default();
        self.replace(next)
    }

    /// Move to [`StateType::Error`] with optional details.
    pub fn set_error(
        &mut self,
        message: impl Into<String>,
        error_info: Option<Payload>,
    ) -> &NetworkState {
        let mut next = NetworkState::new(self.network_id.clone(), StateType::Error);
        next.message = message.into();
        next.error_info = error_info;
        self.replace(next)
    }

    pub fn current(&self) -> &NetworkState {
        &self.current
    }

    /// Past states, oldest first. The current state is not included.
    pub fn history(&self) -> Vec<NetworkState> {
        self.history.iter().cloned().collect()
    }

    /// The `n` most recent past states, oldest first.
    pub fn last_n(&self, n: usize) -> Vec<NetworkState> {
        let skip = self.history.len().saturating_sub(n);
        self.history.iter().skip(skip).cloned().collect()
    }

    fn replace(&mut self, mut next: NetworkState) -> &NetworkState {
        next.previous_state = Some(self.current.state_type);
        tracing::debug!(
            network_id = %self.network_id,
            from = %self.current.state_type,
            to = %next.state_type,
            "State transition"
        );

        let previous = std::mem::replace(&mut self.current, next);
        if self.history.len() == self.max_history {
            self.history.pop_front();
        }
        self.history.push_back(previous);
        &self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_predicates() {
        let idle = NetworkState::new("n", StateType::Idle);
        assert!(idle.is_operational());
        assert!(idle.is_available());
        assert!(!idle.requires_attention());

        let waiting = NetworkState::new("n", StateType::Waiting);
        assert!(waiting.is_operational());
        assert!(!waiting.is_available());

        for state_type in [StateType::Error, StateType::Maintenance] {
            let state = NetworkState::new("n", state_type);
            assert!(state.requires_attention());
            assert!(!state.is_operational());
        }
        assert!(!NetworkState::new("n", StateType::Offline).is_operational());
    }

    #[test]
    fn test_transitions_record_previous_state() {
        let mut manager = StateManager::new("coder");
        assert_eq!(manager.current().state_type, StateType::Offline);

        manager.transition_to(StateType::Initializing, "", None);
        let state = manager.transition_to(StateType::Idle, "ready", None);
        assert_eq!(state.previous_state, Some(StateType::Initializing));
        assert_eq!(state.message, "ready");

        let history: Vec<StateType> = manager.history().iter().map(|s| s.state_type).collect();
        assert_eq!(history, vec![StateType::Offline, StateType::Initializing]);
    }

    #[test]
    fn test_set_error_keeps_details() {
        let mut manager = StateManager::new("coder");
        manager.transition_to(StateType::Processing, "", None);

        let mut info = Payload::new();
        info.insert("code".to_string(), 503.into());
        let state = manager.set_error("upstream down", Some(info));

        assert_eq!(state.state_type, StateType::Error);
        assert_eq!(state.previous_state, Some(StateType::Processing));
        assert_eq!(state.error_info.as_ref().unwrap()["code"], 503);
        assert!(manager.current().requires_attention());
    }

    #[test]
    fn test_history_is_bounded() {
        let mut manager = StateManager::new("coder");
        for n in 0..150 {
            let state_type = if n % 2 == 0 { StateType::Processing } else { StateType::Idle };
            manager.transition_to(state_type, format!("step {}", n), None);
        }

        let history = manager.history();
        assert_eq!(history.len(), DEFAULT_STATE_HISTORY);
        assert_eq!(history[0].message, "step 49");
        assert_eq!(history[99].message, "step 148");
        assert_eq!(manager.current().message, "step 149");

        let last = manager.last_n(2);
        assert_eq!(last.len(), 2);
        assert_eq!(last[1].message, "step 148");
        assert!(manager.last_n(0).is_empty());
    }

    #[test]
    fn test_small_history_capacity() {
        let mut manager = StateManager::with_history_capacity("coder", 2);
        manager.transition_to(StateType::Initializing, "", None);
        manager.transition_to(StateType::Idle, "", None);
        manager.transition_to(StateType::Shutdown, "", None);

        let history: Vec<StateType> = manager.history().iter().map(|s| s.state_type).collect();
        assert_eq!(history, vec![StateType::Initializing, StateType::Idle]);
    }

    #[test]
    fn test_state_serializes_snake_case() {
        let state = NetworkState::new("qc", StateType::Maintenance);
        let value = serde_json::to_value(&state).unwrap();
        assert_eq!(value["state_type"], "maintenance");
        assert!(value["previous_state"].is_null());
    }
}

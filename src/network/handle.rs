//! A network wired into a router.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::{Mutex, RwLock};

use super::capability::CapabilityRegistry;
use super::metrics::{MetricsSnapshot, NetworkMetrics};
use super::state::{NetworkState, StateManager, StateType};
use super::{Network, NetworkMetadata};
use crate::core::MessageRouter;
use crate::error::Result;
use crate::protocol::{CommunicationProtocol, Message, Payload};

/// A network attached to a router.
///
/// The handle owns the network's protocol, its state and counters, and any
/// sub-networks registered under it.
pub struct NetworkHandle {
    network: Arc<dyn Network>,
    network_id: String,
    metadata: RwLock<NetworkMetadata>,
    protocol: Arc<CommunicationProtocol>,
    router: Arc<MessageRouter>,
    state: Mutex<StateManager>,
    metrics: NetworkMetrics,
    sub_networks: Mutex<BTreeMap<String, NetworkHandle>>,
    active: AtomicBool,
}

impl NetworkHandle {
    /// Create the network's protocol, install its handlers, register it with the
    /// router under its capabilities and start the protocol.
    pub async fn attach(network: Arc<dyn Network>, router: &Arc<MessageRouter>) -> Result<Self> {
        let metadata = network.metadata().clone();
        let network_id = metadata.network_id.clone();
        let protocol = CommunicationProtocol::new(network_id.clone());

        let mut state = StateManager::new(network_id.clone());
        state.transition_to(StateType::Initializing, "attaching", None);

        if let Err(e) = network.install_handlers(&protocol).await {
            tracing::error!(%network_id, error = %e, "Failed to install handlers");
            return Err(e);
        }
        router
            .register_network(&network_id, &protocol, metadata.capabilities.iter().cloned())
            .await;
        protocol.start().await;
        state.transition_to(StateType::Idle, "attached", None);

        tracing::info!(
            %network_id,
            network_type = %metadata.network_type,
            "Network attached"
        );

        Ok(Self {
            network,
            network_id,
            metadata: RwLock::new(metadata),
            protocol,
            router: router.clone(),
            state: Mutex::new(state),
            metrics: NetworkMetrics::new(),
            sub_networks: Mutex::new(BTreeMap::new()),
            active: AtomicBool::new(true),
        })
    }

    pub fn network_id(&self) -> &str {
        &self.network_id
    }

    pub fn network(&self) -> &Arc<dyn Network> {
        &self.network
    }

    /// Current metadata, including the parent set by [`register_sub_network`].
    ///
    /// [`register_sub_network`]: NetworkHandle::register_sub_network
    pub async fn metadata(&self) -> NetworkMetadata {
        self.metadata.read().await.clone()
    }

    pub fn protocol(&self) -> &Arc<CommunicationProtocol> {
        &self.protocol
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn metrics(&self) -> &NetworkMetrics {
        &self.metrics
    }

    pub async fn state(&self) -> NetworkState {
        self.state.lock().await.current().clone()
    }

    pub async fn state_history(&self) -> Vec<NetworkState> {
        self.state.lock().await.history()
    }

    pub async fn transition_to(&self, state_type: StateType, message: &str) -> NetworkState {
        self.state
            .lock()
            .await
            .transition_to(state_type, message, None)
            .clone()
    }

    pub async fn set_error(&self, message: &str, error_info: Option<Payload>) -> NetworkState {
        tracing::warn!(network_id = %self.network_id, %message, "Network entered error state");
        self.state.lock().await.set_error(message, error_info).clone()
    }

    /// Send a request and wait for its response.
    ///
    /// Counts the request; a timeout or cancellation also counts an error. An idle
    /// network shows as waiting until the call returns.
    pub async fn request(&self, message: Message) -> Result<Option<Message>> {
        self.metrics.record_request().await;
        self.enter_waiting().await;

        let result = self.protocol.send(message, true).await;
        if !matches!(result, Ok(Some(_))) {
            self.metrics.record_error();
        }

        self.leave_waiting().await;
        result
    }

    /// Fan a request out to every network offering `capability`, as this network.
    ///
    /// Counts the request; getting no response at all counts an error.
    pub async fn query_capability(&self, message: Message, capability: &str) -> Vec<Message> {
        self.metrics.record_request().await;
        self.enter_waiting().await;

        let message = message.with_sender(self.network_id.as_str());
        let responses = self.router.route_by_capability(&message, capability).await;
        if responses.is_empty() {
            self.metrics.record_error();
        }

        self.leave_waiting().await;
        responses
    }

    /// Add each of this network's capability descriptions to `registry`.
    pub fn register_capabilities(&self, registry: &mut CapabilityRegistry) {
        for capability in self.network.capability_details() {
            registry.register_capability(&self.network_id, capability);
        }
    }

    /// Put `sub` under this network; its `parent_id` becomes this network's ID.
    pub async fn register_sub_network(&self, sub: NetworkHandle) {
        sub.metadata.write().await.parent_id = Some(self.network_id.clone());
        tracing::info!(
            network_id = %self.network_id,
            sub_network_id = %sub.network_id,
            "Sub-network registered"
        );
        self.sub_networks
            .lock()
            .await
            .insert(sub.network_id.clone(), sub);
    }

    /// Take a sub-network back out. Its parent link is left as is.
    pub async fn unregister_sub_network(&self, network_id: &str) -> Option<NetworkHandle> {
        let sub = self.sub_networks.lock().await.remove(network_id);
        if sub.is_some() {
            tracing::info!(
                network_id = %self.network_id,
                sub_network_id = %network_id,
                "Sub-network unregistered"
            );
        }
        sub
    }

    pub async fn sub_network_ids(&self) -> Vec<String> {
        self.sub_networks.lock().await.keys().cloned().collect()
    }

    /// Counters and status of this network.
    pub async fn get_metrics(&self) -> MetricsSnapshot {
        let protocol = self.protocol.stats().await;
        MetricsSnapshot {
            network_id: self.network_id.clone(),
            name: self.metadata.read().await.name.clone(),
            is_active: self.is_active(),
            request_count: self.metrics.request_count(),
            error_count: self.metrics.error_count(),
            error_rate: self.metrics.error_rate(),
            last_active: self.metrics.last_active().await,
            performance_metrics: self.metrics.performance().await,
            sub_networks_count: self.sub_networks.lock().await.len(),
            messages_received: protocol.received,
            handler_failures: protocol.handler_failures,
        }
    }

    /// Restart the protocol of this network and then of its sub-networks.
    pub fn start(&self) -> BoxFuture<'_, ()> {
        async move {
            self.protocol.start().await;
            self.active.store(true, Ordering::SeqCst);
            self.transition_to(StateType::Idle, "started").await;

            for sub in self.sub_networks.lock().await.values() {
                sub.start().await;
            }
        }
        .boxed()
    }

    /// Stop sub-networks first, then this network's protocol. Router registration
    /// is kept; pending requests are cancelled.
    pub fn stop(&self) -> BoxFuture<'_, ()> {
        async move {
            for sub in self.sub_networks.lock().await.values() {
                sub.stop().await;
            }
            self.shutdown().await;
        }
        .boxed()
    }

    /// Detach sub-networks, then unregister from the router and stop the protocol.
    pub fn detach(self) -> BoxFuture<'static, ()> {
        async move {
            let subs = std::mem::take(&mut *self.sub_networks.lock().await);
            for sub in subs.into_values() {
                sub.detach().await;
            }

            self.router.unregister_network(&self.network_id).await;
            self.shutdown().await;
            tracing::info!(network_id = %self.network_id, "Network detached");
        }
        .boxed()
    }

    async fn shutdown(&self) {
        self.transition_to(StateType::Shutdown, "stopping").await;
        self.protocol.stop().await;
        self.active.store(false, Ordering::SeqCst);
        self.transition_to(StateType::Offline, "stopped").await;
    }

    async fn enter_waiting(&self) {
        let mut state = self.state.lock().await;
        if state.current().is_available() {
            state.transition_to(StateType::Waiting, "awaiting responses", None);
        }
    }

    async fn leave_waiting(&self) {
        let mut state = self.state.lock().await;
        if state.current().state_type == StateType::Waiting {
            state.transition_to(StateType::Idle, "", None);
        }
    }
}

impl std::fmt::Debug for NetworkHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkHandle")
            .field("network_id", &self.network_id)
            .field("active", &self.is_active())
            .field("protocol", &self.protocol)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{EchoNetwork, NetworkCapability, NetworkType};
    use crate::protocol::MessageType;
    use std::time::Duration;

    fn echo(network_id: &str, capability: &str) -> Arc<dyn Network> {
        Arc::new(EchoNetwork::new(
            NetworkMetadata::new(network_id, NetworkType::Specialist).with_capability(capability),
        ))
    }

    #[tokio::test]
    async fn test_attach_registers_capabilities() {
        let router = MessageRouter::new();
        let handle = NetworkHandle::attach(echo("searcher", "search"), &router)
            .await
            .unwrap();

        assert!(handle.is_active());
        assert!(handle.protocol().is_running());
        assert!(handle.protocol().has_handler(MessageType::Query).await);
        assert_eq!(handle.state().await.state_type, StateType::Idle);
        assert_eq!(
            router.find_networks_by_capability("search").await,
            vec!["searcher".to_string()]
        );

        let protocol = handle.protocol().clone();
        handle.detach().await;
        assert!(!protocol.is_running());
        assert!(router.find_networks_by_capability("search").await.is_empty());
        assert!(router.network_ids().await.is_empty());
    }

    #[tokio::test]
    async fn test_request_between_attached_networks() {
        let router = MessageRouter::new();
        router.start().await;
        let master = NetworkMetadata::new("master", NetworkType::Master);
        let master = Arc::new(EchoNetwork::new(master));
        let master = NetworkHandle::attach(master, &router).await.unwrap();
        let worker = NetworkHandle::attach(echo("worker", "search"), &router)
            .await
            .unwrap();

        let request = Message::new(MessageType::Query, "worker")
            .with_field("q", "rust")
            .with_timeout(Duration::from_secs(5));
        let response = master.request(request).await.unwrap().unwrap();

        assert_eq!(response.sender_id, "worker");
        assert_eq!(response.payload["network_id"], "worker");
        assert_eq!(response.payload["echo"]["q"], "rust");

        let fanned = master
            .query_capability(Message::new(MessageType::Query, "").with_field("q", "x"), "search")
            .await;
        assert_eq!(fanned.len(), 1);
        assert_eq!(fanned[0].receiver_id, "master");

        let metrics = master.get_metrics().await;
        assert_eq!(metrics.request_count, 2);
        assert_eq!(metrics.error_count, 0);
        assert_eq!(master.state().await.state_type, StateType::Idle);
        let waited = master
            .state_history()
            .await
            .iter()
            .filter(|s| s.state_type == StateType::Waiting)
            .count();
        assert_eq!(waited, 2);

        worker.detach().await;
        master.detach().await;
        router.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_request_counts_error() {
        let router = MessageRouter::new();
        let master = NetworkHandle::attach(echo("master", "admin"), &router)
            .await
            .unwrap();

        let request = Message::new(MessageType::Query, "nobody")
            .with_timeout(Duration::from_secs(1))
            .with_max_retries(0);
        assert!(master.request(request).await.unwrap().is_none());
        let nobody = master
            .query_capability(Message::new(MessageType::Query, ""), "vision")
            .await;
        assert!(nobody.is_empty());

        let metrics = master.get_metrics().await;
        assert_eq!(metrics.request_count, 2);
        assert_eq!(metrics.error_count, 2);
        assert!((metrics.error_rate - 1.0).abs() < 1e-9);
        assert!(metrics.last_active.is_some());
    }

    #[tokio::test]
    async fn test_sub_networks() {
        let router = MessageRouter::new();
        let department = NetworkHandle::attach(echo("nlp", "language"), &router)
            .await
            .unwrap();
        let summarizer = NetworkHandle::attach(echo("summarizer", "summarize"), &router)
            .await
            .unwrap();
        let translator = NetworkHandle::attach(echo("translator", "translate"), &router)
            .await
            .unwrap();
        let summarizer_protocol = summarizer.protocol().clone();

        department.register_sub_network(summarizer).await;
        department.register_sub_network(translator).await;
        assert_eq!(
            department.sub_network_ids().await,
            vec!["summarizer".to_string(), "translator".to_string()]
        );
        assert_eq!(department.get_metrics().await.sub_networks_count, 2);

        department.stop().await;
        assert!(!department.is_active());
        assert!(!summarizer_protocol.is_running());
        assert_eq!(department.state().await.state_type, StateType::Offline);

        department.start().await;
        assert!(department.is_active());
        assert!(summarizer_protocol.is_running());

        let translator = department.unregister_sub_network("translator").await.unwrap();
        assert_eq!(translator.metadata().await.parent_id.as_deref(), Some("nlp"));
        assert!(department.unregister_sub_network("translator").await.is_none());

        department.detach().await;
        assert!(!summarizer_protocol.is_running());
        assert_eq!(router.network_ids().await, vec!["translator".to_string()]);
        translator.detach().await;
    }

    #[tokio::test]
    async fn test_register_capabilities_in_registry() {
        let router = MessageRouter::new();
        let fast = NetworkHandle::attach(echo("fast", "search"), &router).await.unwrap();
        let slow_network = EchoNetwork::new(
            NetworkMetadata::new("slow", NetworkType::Specialist).with_capability("search"),
        )
        .with_capability_details(vec![
            NetworkCapability::new("search").with_processing_time(5000.0)
        ]);
        let slow = NetworkHandle::attach(Arc::new(slow_network), &router).await.unwrap();

        let mut registry = CapabilityRegistry::new();
        fast.register_capabilities(&mut registry);
        slow.register_capabilities(&mut registry);

        let ranked: Vec<String> = registry
            .find_networks_by_capability("search", 0.0)
            .into_iter()
            .map(|c| c.network_id)
            .collect();
        assert_eq!(ranked, vec!["fast", "slow"]);
    }
}

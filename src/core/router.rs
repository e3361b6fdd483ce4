//! Message routing between networks.
//!
//! Handles:
//! - Direct delivery to a registered network
//! - Broadcast to every registered network except the sender
//! - Capability fan-out with response aggregation
//! - Priority-ordered scheduling of submitted messages

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

use super::audit::{AuditEntry, AuditLog};
use super::queue::{PriorityQueues, QueueDepths};
use crate::config::RouterSettings;
use crate::protocol::{CommunicationProtocol, Message, PendingResponses, Transport};

/// Router statistics.
#[derive(Debug, Clone, Serialize)]
pub struct RouterStats {
    pub registered_networks: usize,
    pub messages_logged: usize,
    pub is_running: bool,
    pub queued: QueueDepths,
    pub routed: u64,
    pub undeliverable: u64,
    pub pending_fan_out: usize,
}

impl std::fmt::Display for RouterStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Router Stats:")?;
        writeln!(f, "  Networks:      {}", self.registered_networks)?;
        writeln!(f, "  Logged:        {}", self.messages_logged)?;
        writeln!(f, "  Running:       {}", self.is_running)?;
        writeln!(f, "  Routed:        {}", self.routed)?;
        writeln!(f, "  Undeliverable: {}", self.undeliverable)?;
        writeln!(f, "  Fan-out:       {}", self.pending_fan_out)?;
        write!(f, "  Queued:        {}", self.queued.total)
    }
}

/// Process-wide router between network protocols.
///
/// The router only holds weak references to protocols; each network owns its own.
pub struct MessageRouter {
    settings: RouterSettings,
    networks: RwLock<HashMap<String, Weak<CommunicationProtocol>>>,
    capabilities: RwLock<HashMap<String, HashSet<String>>>,
    audit: Mutex<AuditLog>,
    queues: Mutex<PriorityQueues>,
    fan_out: PendingResponses,
    scheduler: Mutex<Option<JoinHandle<()>>>,
    running: AtomicBool,
    routed: AtomicU64,
    undeliverable: AtomicU64,
}

impl MessageRouter {
    pub fn new() -> Arc<Self> {
        Self::with_settings(RouterSettings::default())
    }

    pub fn with_settings(settings: RouterSettings) -> Arc<Self> {
        Arc::new(Self {
            audit: Mutex::new(AuditLog::new(settings.audit_log_capacity)),
            settings,
            networks: RwLock::new(HashMap::new()),
            capabilities: RwLock::new(HashMap::new()),
            queues: Mutex::new(PriorityQueues::new()),
            fan_out: PendingResponses::new(),
            scheduler: Mutex::new(None),
            running: AtomicBool::new(false),
            routed: AtomicU64::new(0),
            undeliverable: AtomicU64::new(0),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Register a network and bind the router as its outbound transport.
    ///
    /// Re-registering an ID replaces the previous protocol and capability set.
    pub async fn register_network<I, S>(
        self: &Arc<Self>,
        network_id: &str,
        protocol: &Arc<CommunicationProtocol>,
        capabilities: I,
    ) where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let capabilities: HashSet<String> = capabilities.into_iter().map(Into::into).collect();
        let mut listed: Vec<&String> = capabilities.iter().collect();
        listed.sort();
        tracing::info!(%network_id, capabilities = ?listed, "Network registered");

        self.networks
            .write()
            .await
            .insert(network_id.to_string(), Arc::downgrade(protocol));
        self.capabilities
            .write()
            .await
            .insert(network_id.to_string(), capabilities);

        let transport: Weak<MessageRouter> = Arc::downgrade(self);
        let transport: Weak<dyn Transport> = transport;
        protocol.bind_transport(transport).await;
    }

    /// Remove a network and its capabilities. Returns whether it was registered.
    pub async fn unregister_network(&self, network_id: &str) -> bool {
        let protocol = self.networks.write().await.remove(network_id);
        self.capabilities.write().await.remove(network_id);

        let Some(protocol) = protocol else {
            return false;
        };
        if let Some(protocol) = protocol.upgrade() {
            protocol.unbind_transport().await;
        }
        tracing::info!(%network_id, "Network unregistered");
        true
    }

    /// IDs of every network offering `capability`, in no particular order.
    pub async fn find_networks_by_capability(&self, capability: &str) -> Vec<String> {
        self.capabilities
            .read()
            .await
            .iter()
            .filter(|(_, caps)| caps.contains(capability))
            .map(|(network_id, _)| network_id.clone())
            .collect()
    }

    pub async fn capabilities_of(&self, network_id: &str) -> Option<HashSet<String>> {
        self.capabilities.read().await.get(network_id).cloned()
    }

    pub async fn network_ids(&self) -> Vec<String> {
        self.networks.read().await.keys().cloned().collect()
    }

    /// Route a message to its destination.
    ///
    /// Broadcasts always report success. A direct message reports whether the
    /// receiver is registered. Responses to an outstanding fan-out are claimed here
    /// before any addressing is considered.
    pub async fn route_message(&self, message: Message) -> bool {
        self.audit.lock().await.record(&message);

        let Some(message) = self.fan_out.resolve(message).await else {
            self.routed.fetch_add(1, Ordering::Relaxed);
            return true;
        };

        if message.is_broadcast() {
            self.broadcast(message).await;
            self.routed.fetch_add(1, Ordering::Relaxed);
            return true;
        }

        let Some(protocol) = self.lookup(&message.receiver_id).await else {
            self.undeliverable.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                message_id = %message.id,
                receiver_id = %message.receiver_id,
                "Receiver not found"
            );
            return false;
        };

        protocol.deliver(message).await;
        self.routed.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Send a request to every network offering `capability` and gather replies.
    ///
    /// Each network gets its own request (fresh ID, `parent_id` set to the original
    /// message's ID). Requests that time out after their retry budget, or are
    /// cancelled, are left out. Responses come back in completion order.
    pub async fn route_by_capability(&self, message: &Message, capability: &str) -> Vec<Message> {
        let network_ids = self.find_networks_by_capability(capability).await;
        if network_ids.is_empty() {
            tracing::warn!(%capability, message_id = %message.id, "No networks with capability");
            return Vec::new();
        }

        let mut in_flight = FuturesUnordered::new();
        for network_id in network_ids {
            let Some(protocol) = self.lookup(&network_id).await else {
                continue;
            };

            let mut request = message.addressed_copy(&network_id);
            request.parent_id = Some(message.id.clone());
            request.requires_response = true;
            in_flight.push(self.request(protocol, request));
        }

        let expected = in_flight.len();
        let mut responses = Vec::with_capacity(expected);
        while let Some(response) = in_flight.next().await {
            if let Some(response) = response {
                responses.push(response);
            }
        }

        tracing::info!(
            %capability,
            message_id = %message.id,
            expected,
            received = responses.len(),
            "Capability fan-out complete"
        );
        responses
    }

    /// Start the priority scheduler. No-op when already running.
    pub async fn start(self: &Arc<Self>) {
        let mut scheduler = self.scheduler.lock().await;
        if scheduler.is_some() {
            return;
        }

        let this = Arc::downgrade(self);
        *scheduler = Some(tokio::spawn(Self::run_scheduler(this, self.settings.scheduler_idle())));
        self.running.store(true, Ordering::SeqCst);
        tracing::info!("Router started");
    }

    /// Stop the priority scheduler.
    ///
    /// Fan-outs already waiting on responses are left to finish or time out.
    pub async fn stop(&self) {
        let Some(scheduler) = self.scheduler.lock().await.take() else {
            return;
        };
        self.running.store(false, Ordering::SeqCst);
        scheduler.abort();
        tracing::info!("Router stopped");
    }

    pub async fn get_statistics(&self) -> RouterStats {
        RouterStats {
            registered_networks: self.networks.read().await.len(),
            messages_logged: self.audit.lock().await.len(),
            is_running: self.is_running(),
            queued: self.queues.lock().await.depths(),
            routed: self.routed.load(Ordering::Relaxed),
            undeliverable: self.undeliverable.load(Ordering::Relaxed),
            pending_fan_out: self.fan_out.len().await,
        }
    }

    /// Audit entries, oldest first.
    pub async fn audit_log(&self) -> Vec<AuditEntry> {
        self.audit.lock().await.snapshot()
    }

    /// Route every queued message, highest priority level first.
    ///
    /// Each level is drained to exhaustion before the next lower one is checked.
    pub async fn drain_queues(&self) -> usize {
        let mut routed = 0;
        loop {
            let next = self.queues.lock().await.pop_highest();
            let Some(message) = next else {
                break;
            };
            self.route_message(message).await;
            routed += 1;
        }
        routed
    }

    async fn lookup(&self, network_id: &str) -> Option<Arc<CommunicationProtocol>> {
        self.networks
            .read()
            .await
            .get(network_id)
            .and_then(Weak::upgrade)
    }

    async fn broadcast(&self, message: Message) {
        let recipients: Vec<(String, Arc<CommunicationProtocol>)> = self
            .networks
            .read()
            .await
            .iter()
            .filter(|(network_id, _)| **network_id != message.sender_id)
            .filter_map(|(network_id, protocol)| {
                protocol.upgrade().map(|protocol| (network_id.clone(), protocol))
            })
            .collect();

        tracing::debug!(
            message_id = %message.id,
            sender_id = %message.sender_id,
            recipients = recipients.len(),
            "Broadcasting message"
        );

        futures::future::join_all(recipients.into_iter().map(|(network_id, protocol)| {
            let copy = message.addressed_copy(network_id);
            async move { protocol.deliver(copy).await }
        }))
        .await;
    }

    /// Deliver one fan-out request and wait for its response, resubmitting on
    /// timeout while the retry budget allows.
    async fn request(
        &self,
        protocol: Arc<CommunicationProtocol>,
        mut request: Message,
    ) -> Option<Message> {
        loop {
            let response = self.fan_out.register(&request.id).await;
            self.audit.lock().await.record(&request);
            protocol.deliver(request.clone()).await;

            match tokio::time::timeout(request.timeout, response).await {
                Ok(Ok(response)) => return Some(response),
                Ok(Err(_)) => return None,
                Err(_) => {
                    self.fan_out.remove(&request.id).await;
                    tracing::warn!(
                        message_id = %request.id,
                        receiver_id = %request.receiver_id,
                        attempt = request.retry_count + 1,
                        "Fan-out request timed out"
                    );
                    if !request.should_retry() {
                        return None;
                    }
                    request.increment_retry();
                }
            }
        }
    }

    async fn run_scheduler(this: Weak<Self>, idle: Duration) {
        loop {
            let Some(router) = this.upgrade() else {
                break;
            };
            router.drain_queues().await;
            drop(router);

            tokio::time::sleep(idle).await;
        }
    }
}

#[async_trait]
impl Transport for MessageRouter {
    /// Queue by priority while the scheduler runs, otherwise route right away.
    async fn submit(&self, message: Message) {
        if self.is_running() {
            self.queues.lock().await.push(message);
        } else {
            self.route_message(message).await;
        }
    }
}

impl std::fmt::Debug for MessageRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageRouter")
            .field("settings", &self.settings)
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{MessageType, Priority};
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc;

    /// Protocol whose query handler answers with `{"from": <id>}`.
    async fn responder(network_id: &str) -> Arc<CommunicationProtocol> {
        let protocol = CommunicationProtocol::new(network_id);
        let this = Arc::downgrade(&protocol);
        let id = network_id.to_string();
        protocol
            .register_handler(MessageType::Query, move |request: Message| {
                let this = this.clone();
                let id = id.clone();
                async move {
                    if let Some(protocol) = this.upgrade() {
                        let reply = request.create_response(Default::default(), None);
                        protocol
                            .send(reply.with_field("from", id), false)
                            .await?;
                    }
                    anyhow::Ok(())
                }
            })
            .await;
        protocol.start().await;
        protocol
    }

    /// Protocol that records every message it handles.
    async fn recorder(
        network_id: &str,
    ) -> (Arc<CommunicationProtocol>, mpsc::UnboundedReceiver<Message>) {
        let protocol = CommunicationProtocol::new(network_id);
        let (tx, rx) = mpsc::unbounded_channel();
        for message_type in MessageType::ALL {
            let tx = tx.clone();
            protocol
                .register_handler(message_type, move |message: Message| {
                    let tx = tx.clone();
                    async move {
                        tx.send(message)?;
                        anyhow::Ok(())
                    }
                })
                .await;
        }
        protocol.start().await;
        (protocol, rx)
    }

    #[tokio::test]
    async fn test_register_and_find_by_capability() {
        let router = MessageRouter::new();
        let a = CommunicationProtocol::new("a");
        let b = CommunicationProtocol::new("b");
        router.register_network("a", &a, ["search", "summarize"]).await;
        router.register_network("b", &b, ["search"]).await;

        let mut found = router.find_networks_by_capability("search").await;
        found.sort();
        assert_eq!(found, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(router.find_networks_by_capability("summarize").await, vec!["a".to_string()]);
        assert!(router.find_networks_by_capability("vision").await.is_empty());

        assert!(router.unregister_network("b").await);
        assert!(!router.unregister_network("b").await);
        assert_eq!(router.find_networks_by_capability("search").await, vec!["a".to_string()]);
        assert!(router.capabilities_of("b").await.is_none());
        assert_eq!(router.get_statistics().await.registered_networks, 1);
    }

    #[tokio::test]
    async fn test_unknown_receiver() {
        let router = MessageRouter::new();
        let delivered = router
            .route_message(Message::new(MessageType::Query, "ghost").with_sender("a"))
            .await;

        assert!(!delivered);
        let stats = router.get_statistics().await;
        assert_eq!(stats.messages_logged, 1);
        assert_eq!(stats.undeliverable, 1);
        assert_eq!(router.audit_log().await[0].message.receiver_id, "ghost");
    }

    #[tokio::test]
    async fn test_direct_delivery() {
        let router = MessageRouter::new();
        let (b, mut inbox) = recorder("b").await;
        router.register_network("b", &b, Vec::<String>::new()).await;

        let message = Message::new(MessageType::DataRequest, "b").with_sender("a");
        assert!(router.route_message(message.clone()).await);

        let received = inbox.recv().await.unwrap();
        assert_eq!(received.id, message.id);
        assert_eq!(received.sender_id, "a");
    }

    #[tokio::test]
    async fn test_dropped_protocol_is_not_found() {
        let router = MessageRouter::new();
        let b = CommunicationProtocol::new("b");
        router.register_network("b", &b, ["search"]).await;
        drop(b);

        assert!(!router.route_message(Message::new(MessageType::Query, "b")).await);
    }

    #[tokio::test]
    async fn test_broadcast_skips_sender() {
        let router = MessageRouter::new();
        let (a, mut a_inbox) = recorder("a").await;
        let (b, mut b_inbox) = recorder("b").await;
        let (c, mut c_inbox) = recorder("c").await;
        for (id, protocol) in [("a", &a), ("b", &b), ("c", &c)] {
            router.register_network(id, protocol, Vec::<String>::new()).await;
        }

        let message = Message::broadcast(MessageType::StatusUpdate)
            .with_sender("a")
            .with_field("status", "idle");
        assert!(router.route_message(message).await);

        let to_b = b_inbox.recv().await.unwrap();
        let to_c = c_inbox.recv().await.unwrap();
        assert_eq!(to_b.receiver_id, "b");
        assert_eq!(to_c.receiver_id, "c");
        assert_eq!(to_b.sender_id, "a");
        assert_eq!(to_c.payload["status"], "idle");

        tokio::task::yield_now().await;
        assert!(a_inbox.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_fan_out_collects_responses() {
        let router = MessageRouter::new();
        let a = responder("a").await;
        let b = responder("b").await;
        router.register_network("a", &a, ["search"]).await;
        router.register_network("b", &b, ["search"]).await;

        let query = Message::new(MessageType::Query, "").with_sender("master");
        let responses = router.route_by_capability(&query, "search").await;

        let mut from: Vec<String> = responses
            .iter()
            .map(|r| r.payload["from"].as_str().unwrap().to_string())
            .collect();
        from.sort();
        assert_eq!(from, vec!["a".to_string(), "b".to_string()]);
        assert!(responses.iter().all(|r| r.receiver_id == "master"));
        assert_eq!(router.get_statistics().await.pending_fan_out, 0);
    }

    #[tokio::test]
    async fn test_fan_out_requests_link_to_original() {
        let router = MessageRouter::new();
        let (a, mut inbox) = recorder("a").await;
        router.register_network("a", &a, ["search"]).await;

        let query = Message::new(MessageType::Query, "")
            .with_sender("master")
            .with_timeout(Duration::from_millis(20))
            .with_max_retries(0);
        let responses = router.route_by_capability(&query, "search").await;
        assert!(responses.is_empty());

        let request = inbox.recv().await.unwrap();
        assert_ne!(request.id, query.id);
        assert_eq!(request.parent_id.as_deref(), Some(query.id.as_str()));
        assert!(request.requires_response);
        assert_eq!(request.receiver_id, "a");
    }

    #[tokio::test(start_paused = true)]
    async fn test_fan_out_partial_responses() {
        let router = MessageRouter::new();
        let a = responder("a").await;
        let b = responder("b").await;
        let silent = CommunicationProtocol::new("silent");
        silent.start().await;
        for (id, protocol) in [("a", &a), ("b", &b), ("silent", &silent)] {
            router.register_network(id, protocol, ["search"]).await;
        }

        let query = Message::new(MessageType::Query, "")
            .with_sender("master")
            .with_timeout(Duration::from_secs(2))
            .with_max_retries(1);
        let responses = router.route_by_capability(&query, "search").await;

        assert_eq!(responses.len(), 2);
        assert!(responses.iter().all(|r| r.payload["from"] != "silent"));
    }

    #[tokio::test]
    async fn test_fan_out_without_capability() {
        let router = MessageRouter::new();
        let responses = tokio::time::timeout(
            Duration::from_secs(1),
            router.route_by_capability(&Message::new(MessageType::Query, ""), "vision"),
        )
        .await
        .unwrap();
        assert!(responses.is_empty());
    }

    #[tokio::test]
    async fn test_audit_log_is_bounded() {
        let router = MessageRouter::with_settings(RouterSettings {
            audit_log_capacity: 3,
            ..RouterSettings::default()
        });
        for n in 0..5 {
            router
                .route_message(Message::new(MessageType::Query, "ghost").with_field("n", n))
                .await;
        }

        let log = router.audit_log().await;
        assert_eq!(log.len(), 3);
        assert_eq!(log[0].message.payload["n"], 2);
        assert_eq!(log[2].message.payload["n"], 4);
    }

    #[tokio::test]
    async fn test_scheduler_drains_highest_priority_first() {
        let router = MessageRouter::new();
        let (b, mut inbox) = recorder("b").await;
        router.register_network("b", &b, Vec::<String>::new()).await;

        // Queue while the scheduler is "running" but before it gets a chance to drain.
        router.running.store(true, Ordering::SeqCst);
        for (priority, n) in [
            (Priority::Low, 1),
            (Priority::Normal, 2),
            (Priority::Critical, 3),
            (Priority::High, 4),
            (Priority::Critical, 5),
        ] {
            router
                .submit(
                    Message::new(MessageType::Query, "b")
                        .with_priority(priority)
                        .with_field("n", n),
                )
                .await;
        }
        assert_eq!(router.get_statistics().await.queued.total, 5);

        assert_eq!(router.drain_queues().await, 5);
        router.running.store(false, Ordering::SeqCst);

        let mut order = Vec::new();
        for _ in 0..5 {
            order.push(inbox.recv().await.unwrap().payload["n"].as_i64().unwrap());
        }
        assert_eq!(order, vec![3, 5, 4, 2, 1]);
    }

    #[tokio::test]
    async fn test_protocol_send_flows_through_router() {
        let router = MessageRouter::new();
        router.start().await;
        let a = CommunicationProtocol::new("a");
        a.start().await;
        let (b, mut inbox) = recorder("b").await;
        router.register_network("a", &a, ["search"]).await;
        router.register_network("b", &b, ["search"]).await;

        a.send(Message::new(MessageType::KnowledgeShare, "b"), false)
            .await
            .unwrap();

        let received = inbox.recv().await.unwrap();
        assert_eq!(received.sender_id, "a");
        assert_eq!(received.message_type, MessageType::KnowledgeShare);
        router.stop().await;
        assert!(!router.get_statistics().await.is_running);
    }

    #[tokio::test]
    async fn test_request_response_between_protocols() {
        let router = MessageRouter::new();
        router.start().await;
        let a = CommunicationProtocol::new("a");
        a.start().await;
        let b = responder("b").await;
        router.register_network("a", &a, Vec::<String>::new()).await;
        router.register_network("b", &b, Vec::<String>::new()).await;

        let response = a
            .send(Message::new(MessageType::Query, "b"), true)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response.payload["from"], "b");
        assert_eq!(response.sender_id, "b");
        router.stop().await;
    }

    #[tokio::test]
    async fn test_handler_failure_does_not_block_broadcast() {
        let router = MessageRouter::new();
        let failing = CommunicationProtocol::new("failing");
        failing
            .register_handler(MessageType::Heartbeat, |_message: Message| async move {
                Err::<(), _>(anyhow::anyhow!("boom"))
            })
            .await;
        failing.start().await;
        let seen = Arc::new(AtomicUsize::new(0));
        let healthy = CommunicationProtocol::new("healthy");
        let counter = seen.clone();
        healthy
            .register_handler(MessageType::Heartbeat, move |_message: Message| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    anyhow::Ok(())
                }
            })
            .await;
        router.register_network("failing", &failing, Vec::<String>::new()).await;
        router.register_network("healthy", &healthy, Vec::<String>::new()).await;

        // `healthy` is not started, so its delivery runs inline.
        assert!(router.route_message(Message::broadcast(MessageType::Heartbeat)).await);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}

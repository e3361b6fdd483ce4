//! Per-network communication endpoint.
//!
//! A [`CommunicationProtocol`] owns:
//! - an outbound queue, drained by a background task into the bound [`Transport`]
//! - an inbound queue, worked by a background task that runs handlers one at a time
//! - the handler table, one handler per [`MessageType`]
//! - the table of requests waiting for a response

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

use super::envelope::Message;
use super::handler::MessageHandler;
use super::pending::PendingResponses;
use super::types::MessageType;
use crate::error::{Error, Result};

/// Where a protocol hands its outbound messages.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn submit(&self, message: Message);
}

type SharedReceiver = Arc<Mutex<UnboundedReceiver<Message>>>;

struct Workers {
    drain: JoinHandle<()>,
    inbound: JoinHandle<()>,
}

#[derive(Debug, Default)]
struct Counters {
    sent: AtomicU64,
    received: AtomicU64,
    responses: AtomicU64,
    dropped: AtomicU64,
    handler_failures: AtomicU64,
    timeouts: AtomicU64,
}

/// Protocol statistics.
#[derive(Debug, Clone, Serialize)]
pub struct ProtocolStats {
    pub network_id: String,
    pub running: bool,
    pub handlers: usize,
    pub pending_responses: usize,
    pub queued_outbound: usize,
    pub sent: u64,
    pub received: u64,
    pub responses: u64,
    pub dropped: u64,
    pub handler_failures: u64,
    pub timeouts: u64,
}

/// Asynchronous message endpoint of one network.
pub struct CommunicationProtocol {
    network_id: String,
    handlers: RwLock<HashMap<MessageType, Arc<dyn MessageHandler>>>,
    pending: PendingResponses,
    outbound_tx: UnboundedSender<Message>,
    outbound_rx: SharedReceiver,
    queued_outbound: Arc<AtomicUsize>,
    inbound_tx: UnboundedSender<Message>,
    inbound_rx: SharedReceiver,
    transport: RwLock<Option<Weak<dyn Transport>>>,
    workers: Mutex<Option<Workers>>,
    running: AtomicBool,
    counters: Counters,
}

impl CommunicationProtocol {
    /// Create a stopped protocol for `network_id`.
    pub fn new(network_id: impl Into<String>) -> Arc<Self> {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        Arc::new(Self {
            network_id: network_id.into(),
            handlers: RwLock::new(HashMap::new()),
            pending: PendingResponses::new(),
            outbound_tx,
            outbound_rx: Arc::new(Mutex::new(outbound_rx)),
            queued_outbound: Arc::new(AtomicUsize::new(0)),
            inbound_tx,
            inbound_rx: Arc::new(Mutex::new(inbound_rx)),
            transport: RwLock::new(None),
            workers: Mutex::new(None),
            running: AtomicBool::new(false),
            counters: Counters::default(),
        })
    }

    pub fn network_id(&self) -> &str {
        &self.network_id
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Install the handler for a message type, replacing any previous one.
    pub async fn register_handler<H>(&self, message_type: MessageType, handler: H)
    where
        H: MessageHandler + 'static,
    {
        self.handlers
            .write()
            .await
            .insert(message_type, Arc::new(handler));
        tracing::debug!(network_id = %self.network_id, %message_type, "Handler registered");
    }

    /// Remove the handler for a message type.
    pub async fn unregister_handler(&self, message_type: MessageType) -> bool {
        self.handlers.write().await.remove(&message_type).is_some()
    }

    pub async fn has_handler(&self, message_type: MessageType) -> bool {
        self.handlers.read().await.contains_key(&message_type)
    }

    /// Route outbound messages through `transport`.
    pub async fn bind_transport(&self, transport: Weak<dyn Transport>) {
        *self.transport.write().await = Some(transport);
    }

    pub async fn unbind_transport(&self) {
        *self.transport.write().await = None;
    }

    /// Send a message.
    ///
    /// Without `wait_for_response` this only enqueues the message and returns
    /// `Ok(None)`. Otherwise the call waits up to `message.timeout` for a message
    /// whose `parent_id` is this message's ID. A timed-out request is resubmitted
    /// while `should_retry()` holds; once the budget is spent the result is
    /// `Ok(None)`. Stopping the protocol while waiting yields [`Error::Cancelled`].
    pub async fn send(
        &self,
        mut message: Message,
        wait_for_response: bool,
    ) -> Result<Option<Message>> {
        message.sender_id = self.network_id.clone();

        if !wait_for_response {
            self.enqueue_outbound(message);
            return Ok(None);
        }

        message.requires_response = true;
        loop {
            let response = self.pending.register(&message.id).await;
            self.enqueue_outbound(message.clone());

            match tokio::time::timeout(message.timeout, response).await {
                Ok(Ok(response)) => return Ok(Some(response)),
                Ok(Err(_)) => return Err(Error::Cancelled(message.id)),
                Err(_) => {
                    self.pending.remove(&message.id).await;
                    self.counters.timeouts.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        network_id = %self.network_id,
                        message_id = %message.id,
                        attempt = message.retry_count + 1,
                        "Message timed out after {:?}",
                        message.timeout
                    );

                    if !message.should_retry() {
                        return Ok(None);
                    }
                    message.increment_retry();
                }
            }
        }
    }

    /// Send to every network; clears the receiver.
    pub async fn broadcast(&self, mut message: Message) -> Result<()> {
        message.receiver_id.clear();
        self.send(message, false).await.map(|_| ())
    }

    /// Process an incoming message right away.
    ///
    /// A response to a pending request resolves that request and is never handed to
    /// a handler. Anything else goes to the handler registered for its type.
    pub async fn receive(&self, message: Message) {
        if let Some(message) = self.resolve_pending(message).await {
            self.dispatch(message).await;
        }
    }

    /// Entry point used by the router.
    ///
    /// Responses to pending requests resolve immediately. Other messages are queued
    /// for the inbound worker when running, or handled inline when stopped.
    pub async fn deliver(&self, message: Message) {
        let Some(message) = self.resolve_pending(message).await else {
            return;
        };

        if !self.is_running() {
            self.dispatch(message).await;
            return;
        }

        if let Err(mpsc::error::SendError(message)) = self.inbound_tx.send(message) {
            self.dispatch(message).await;
        }
    }

    /// Start the background workers. No-op when already running.
    pub async fn start(self: &Arc<Self>) {
        let mut workers = self.workers.lock().await;
        if workers.is_some() {
            return;
        }

        let this = Arc::downgrade(self);
        let drain = tokio::spawn(Self::drain_outbound(
            this.clone(),
            self.outbound_rx.clone(),
            self.queued_outbound.clone(),
        ));
        let inbound = tokio::spawn(Self::process_inbound(this, self.inbound_rx.clone()));

        *workers = Some(Workers { drain, inbound });
        self.running.store(true, Ordering::SeqCst);
        tracing::info!(network_id = %self.network_id, "Protocol started");
    }

    /// Stop the workers and cancel every pending request.
    pub async fn stop(&self) {
        let Some(workers) = self.workers.lock().await.take() else {
            return;
        };
        self.running.store(false, Ordering::SeqCst);

        let cancelled = self.pending.cancel_all().await;
        workers.drain.abort();
        workers.inbound.abort();

        tracing::info!(network_id = %self.network_id, cancelled, "Protocol stopped");
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.len().await
    }

    /// Messages sent but not yet handed to the transport.
    pub fn queue_depth(&self) -> usize {
        self.queued_outbound.load(Ordering::SeqCst)
    }

    pub async fn stats(&self) -> ProtocolStats {
        ProtocolStats {
            network_id: self.network_id.clone(),
            running: self.is_running(),
            handlers: self.handlers.read().await.len(),
            pending_responses: self.pending.len().await,
            queued_outbound: self.queue_depth(),
            sent: self.counters.sent.load(Ordering::Relaxed),
            received: self.counters.received.load(Ordering::Relaxed),
            responses: self.counters.responses.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            handler_failures: self.counters.handler_failures.load(Ordering::Relaxed),
            timeouts: self.counters.timeouts.load(Ordering::Relaxed),
        }
    }

    fn enqueue_outbound(&self, message: Message) {
        tracing::info!(
            network_id = %self.network_id,
            message_id = %message.id,
            message_type = %message.message_type,
            receiver_id = %message.receiver_id,
            priority = message.priority.level(),
            "Sending message"
        );

        self.queued_outbound.fetch_add(1, Ordering::SeqCst);
        if self.outbound_tx.send(message).is_err() {
            self.queued_outbound.fetch_sub(1, Ordering::SeqCst);
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::error!(network_id = %self.network_id, "Outbound queue closed");
            return;
        }
        self.counters.sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the message back unless it resolved a pending request.
    async fn resolve_pending(&self, message: Message) -> Option<Message> {
        tracing::info!(
            network_id = %self.network_id,
            message_id = %message.id,
            message_type = %message.message_type,
            sender_id = %message.sender_id,
            "Receiving message"
        );
        self.counters.received.fetch_add(1, Ordering::Relaxed);
        let message_id = message.id.clone();

        let unmatched = self.pending.resolve(message).await;
        if unmatched.is_none() {
            self.counters.responses.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(network_id = %self.network_id, %message_id, "Resolved pending request");
        }
        unmatched
    }

    async fn dispatch(&self, message: Message) {
        let handler = self.handlers.read().await.get(&message.message_type).cloned();
        let Some(handler) = handler else {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                network_id = %self.network_id,
                message_id = %message.id,
                message_type = %message.message_type,
                "No handler found, dropping message"
            );
            return;
        };

        let message_id = message.id.clone();
        let message_type = message.message_type;

        let outcome = AssertUnwindSafe(handler.handle(message)).catch_unwind().await;
        let failure = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(e)) => format!("{:#}", e),
            Err(panic) => panic_message(panic.as_ref()),
        };

        self.counters.handler_failures.fetch_add(1, Ordering::Relaxed);
        tracing::error!(
            network_id = %self.network_id,
            %message_id,
            %message_type,
            error = %failure,
            "Handler failed"
        );
    }

    async fn forward(&self, message: Message) {
        let transport = self
            .transport
            .read()
            .await
            .as_ref()
            .and_then(|transport| transport.upgrade());

        match transport {
            Some(transport) => transport.submit(message).await,
            None => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    network_id = %self.network_id,
                    message_id = %message.id,
                    "No transport bound, message not delivered"
                );
            }
        }
    }

    async fn drain_outbound(this: Weak<Self>, rx: SharedReceiver, queued: Arc<AtomicUsize>) {
        let mut rx = rx.lock().await;
        while let Some(message) = rx.recv().await {
            queued.fetch_sub(1, Ordering::SeqCst);
            let Some(protocol) = this.upgrade() else {
                break;
            };
            protocol.forward(message).await;
        }
    }

    async fn process_inbound(this: Weak<Self>, rx: SharedReceiver) {
        let mut rx = rx.lock().await;
        while let Some(message) = rx.recv().await {
            let Some(protocol) = this.upgrade() else {
                break;
            };
            protocol.dispatch(message).await;
        }
    }
}

impl std::fmt::Debug for CommunicationProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommunicationProtocol")
            .field("network_id", &self.network_id)
            .field("running", &self.is_running())
            .finish()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}

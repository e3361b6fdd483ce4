//! Outstanding request correlations.
//!
//! Each entry maps a request ID to the one-shot channel its sender is waiting on.
//! Resolving consumes the channel, so an entry can be resolved at most once.

use std::collections::HashMap;

use tokio::sync::{oneshot, Mutex};

use super::envelope::Message;

/// Table of requests awaiting a response.
#[derive(Debug, Default)]
pub struct PendingResponses {
    entries: Mutex<HashMap<String, oneshot::Sender<Message>>>,
}

impl PendingResponses {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request and get the handle its response will arrive on.
    ///
    /// Registering an ID that is already pending replaces the old entry; the old
    /// waiter observes cancellation.
    pub async fn register(&self, request_id: &str) -> oneshot::Receiver<Message> {
        let (tx, rx) = oneshot::channel();
        self.entries.lock().await.insert(request_id.to_string(), tx);
        rx
    }

    /// Try to resolve a pending request with `message`.
    ///
    /// Returns the message back when its `parent_id` matches no pending entry.
    pub async fn resolve(&self, message: Message) -> Option<Message> {
        let Some(parent_id) = message.parent_id.as_deref() else {
            return Some(message);
        };

        let sender = self.entries.lock().await.remove(parent_id);
        match sender {
            Some(tx) => {
                let parent_id = parent_id.to_string();
                if tx.send(message).is_err() {
                    tracing::debug!(
                        request_id = %parent_id,
                        "Response arrived after waiter gave up"
                    );
                }
                None
            }
            None => Some(message),
        }
    }

    /// Forget a request without resolving it.
    pub async fn remove(&self, request_id: &str) -> bool {
        self.entries.lock().await.remove(request_id).is_some()
    }

    /// Drop every pending entry; waiters observe cancellation.
    pub async fn cancel_all(&self) -> usize {
        let mut entries = self.entries.lock().await;
        let cancelled = entries.len();
        entries.clear();
        cancelled
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

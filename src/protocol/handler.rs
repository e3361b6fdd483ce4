//! Message handler trait.

use async_trait::async_trait;
use std::future::Future;

use super::envelope::Message;

/// Outcome of a handler invocation. Failures are logged by the protocol, never
/// propagated to the sender.
pub type HandlerResult = anyhow::Result<()>;

/// Async callback invoked for each message of the type it is registered under.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: Message) -> HandlerResult;
}

#[async_trait]
impl<F, Fut> MessageHandler for F
where
    F: Fn(Message) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send,
{
    async fn handle(&self, message: Message) -> HandlerResult {
        (self)(message).await
    }
}

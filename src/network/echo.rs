//! A specialist that answers queries by echoing them.

use std::sync::Arc;

use async_trait::async_trait;

use super::{Network, NetworkCapability, NetworkMetadata};
use crate::error::Result;
use crate::protocol::{CommunicationProtocol, Message, MessageType, Payload};

/// Specialist that answers every query with the payload it was sent.
///
/// The response payload carries `network_id` and the original payload under `echo`.
#[derive(Debug, Clone)]
pub struct EchoNetwork {
    metadata: NetworkMetadata,
    details: Vec<NetworkCapability>,
}

impl EchoNetwork {
    pub fn new(metadata: NetworkMetadata) -> Self {
        Self {
            metadata,
            details: Vec::new(),
        }
    }

    /// Report these descriptions instead of the perfect-quality defaults.
    pub fn with_capability_details(mut self, details: Vec<NetworkCapability>) -> Self {
        self.details = details;
        self
    }
}

#[async_trait]
impl Network for EchoNetwork {
    fn metadata(&self) -> &NetworkMetadata {
        &self.metadata
    }

    async fn install_handlers(&self, protocol: &Arc<CommunicationProtocol>) -> Result<()> {
        let this = Arc::downgrade(protocol);
        let network_id = self.metadata.network_id.clone();

        protocol
            .register_handler(MessageType::Query, move |request: Message| {
                let this = this.clone();
                let network_id = network_id.clone();
                async move {
                    let Some(protocol) = this.upgrade() else {
                        return anyhow::Ok(());
                    };

                    let mut payload = Payload::new();
                    payload.insert("network_id".to_string(), network_id.into());
                    payload.insert("echo".to_string(), request.payload.clone().into());
                    protocol
                        .send(request.create_response(payload, None), false)
                        .await?;
                    anyhow::Ok(())
                }
            })
            .await;
        Ok(())
    }

    fn capability_details(&self) -> Vec<NetworkCapability> {
        if self.details.is_empty() {
            return self
                .metadata
                .capabilities
                .iter()
                .map(NetworkCapability::new)
                .collect();
        }
        self.details.clone()
    }
}

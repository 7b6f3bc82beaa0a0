//! NATS-backed outbound channel

use async_trait::async_trait;
use bytes::Bytes;

use crate::channels::{ChannelError, MessageChannel, OutboundMessage};

/// Publishes outbound messages to NATS subjects named after destinations
#[derive(Debug, Clone)]
pub struct NatsChannel {
    client: async_nats::Client,
    subject_prefix: Option<String>,
}

impl NatsChannel {
    /// Create a channel over an existing NATS client
    pub fn new(client: async_nats::Client) -> Self {
        Self {
            client,
            subject_prefix: None,
        }
    }

    /// Connect to a NATS server and create a channel
    pub async fn connect(url: &str) -> Result<Self, ChannelError> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| ChannelError::Transport(format!("failed to connect to {url}: {e}")))?;
        Ok(Self::new(client))
    }

    /// Prefix all subjects, e.g. a tenant or environment namespace
    pub fn with_subject_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.subject_prefix = Some(prefix.into());
        self
    }

    fn subject(&self, destination: &str) -> String {
        subject_for(self.subject_prefix.as_deref(), destination)
    }
}

fn subject_for(prefix: Option<&str>, destination: &str) -> String {
    match prefix {
        Some(prefix) => format!("{prefix}.{destination}"),
        None => destination.to_string(),
    }
}

#[async_trait]
impl MessageChannel for NatsChannel {
    async fn send(
        &self,
        destination: &str,
        message: OutboundMessage,
    ) -> Result<(), ChannelError> {
        let payload =
            serde_json::to_vec(&message).map_err(|e| ChannelError::Transport(e.to_string()))?;
        self.client
            .publish(self.subject(destination), Bytes::from(payload))
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))
    }
}

// Copyright 2025 Cowboy AI, LLC.

//! Outbound message channels
//!
//! The aggregator emits released aggregates and discarded events through a
//! channel abstraction; the transport behind it is an external collaborator.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::message::{MessageEvent, ReleasedAggregate};

/// Errors that can occur while sending to a downstream channel
#[derive(Debug, Clone, Error)]
pub enum ChannelError {
    /// The transport rejected or failed the send
    #[error("Transport error: {0}")]
    Transport(String),

    /// The channel is closed
    #[error("Channel closed: {0}")]
    Closed(String),
}

/// A message emitted by the aggregator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum OutboundMessage {
    /// A released aggregate bound for its resolved destination
    Aggregate(ReleasedAggregate),

    /// An event routed to the discard destination
    Discarded(MessageEvent),
}

/// Downstream channel the aggregator emits into
#[async_trait]
pub trait MessageChannel: Send + Sync {
    /// Send a message to a destination
    async fn send(&self, destination: &str, message: OutboundMessage)
        -> Result<(), ChannelError>;
}

/// In-memory channel over an unbounded tokio mpsc queue
///
/// Useful for tests and for embedding the engine without a broker.
#[derive(Debug, Clone)]
pub struct InMemoryChannel {
    tx: mpsc::UnboundedSender<(String, OutboundMessage)>,
}

impl InMemoryChannel {
    /// Create a channel plus the receiver for its emissions
    pub fn channel() -> (
        Self,
        mpsc::UnboundedReceiver<(String, OutboundMessage)>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Create a channel plus a stream over its emissions
    pub fn channel_stream() -> (
        Self,
        UnboundedReceiverStream<(String, OutboundMessage)>,
    ) {
        let (channel, rx) = Self::channel();
        (channel, UnboundedReceiverStream::new(rx))
    }
}

#[async_trait]
impl MessageChannel for InMemoryChannel {
    async fn send(
        &self,
        destination: &str,
        message: OutboundMessage,
    ) -> Result<(), ChannelError> {
        self.tx
            .send((destination.to_string(), message))
            .map_err(|_| ChannelError::Closed(destination.to_string()))
    }
}

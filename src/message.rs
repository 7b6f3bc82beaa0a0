// Copyright 2025 Cowboy AI, LLC.

//! Message event types and wire header names

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::correlation::CorrelationKey;

/// Wire header names carried by inbound message events
pub mod headers {
    /// Event type discriminator
    pub const MESSAGE_EVENT_TYPE: &str = "messageEventType";
    /// Message definition name
    pub const MESSAGE_EVENT_NAME: &str = "messageEventName";
    /// Unique event id used for idempotent receipt
    pub const MESSAGE_EVENT_ID: &str = "messageEventId";
    /// Explicit correlation key
    pub const MESSAGE_EVENT_CORRELATION_KEY: &str = "messageEventCorrelationKey";
    /// Business key of the originating process instance
    pub const MESSAGE_EVENT_BUSINESS_KEY: &str = "messageEventBusinessKey";
    /// Full name of the originating service
    pub const SERVICE_FULL_NAME: &str = "serviceFullName";
    /// Application the originating service belongs to
    pub const APP_NAME: &str = "appName";
    /// Destination the originating service listens on for replies
    pub const MESSAGE_EVENT_OUTPUT_DESTINATION: &str = "messageEventOutputDestination";
}

/// Kind of BPMN message event delivered by a process engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageEventType {
    /// A start-message definition was deployed
    #[serde(rename = "START_MESSAGE_DEPLOYED")]
    DefinitionDeployed,

    /// A catch event is waiting for a message
    #[serde(rename = "MESSAGE_WAITING")]
    Waiting,

    /// A throw event sent a message
    #[serde(rename = "MESSAGE_SENT")]
    Sent,

    /// A waiting catch event received its message
    #[serde(rename = "MESSAGE_RECEIVED")]
    Received,

    /// A message subscription was cancelled
    #[serde(rename = "MESSAGE_SUBSCRIPTION_CANCELLED")]
    SubscriptionCancelled,
}

impl MessageEventType {
    /// Whether this event type marks its correlation group as complete
    pub fn is_terminal_marker(&self) -> bool {
        matches!(self, MessageEventType::Received)
    }

    /// Wire name of the event type
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageEventType::DefinitionDeployed => "START_MESSAGE_DEPLOYED",
            MessageEventType::Waiting => "MESSAGE_WAITING",
            MessageEventType::Sent => "MESSAGE_SENT",
            MessageEventType::Received => "MESSAGE_RECEIVED",
            MessageEventType::SubscriptionCancelled => "MESSAGE_SUBSCRIPTION_CANCELLED",
        }
    }
}

impl fmt::Display for MessageEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An inbound message event, immutable once received
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEvent {
    /// Unique event id, used for idempotent receipt
    pub id: Uuid,

    /// Message definition name
    pub name: String,

    /// Kind of event
    pub event_type: MessageEventType,

    /// Explicit correlation key, when the engine provided one
    pub correlation_key: Option<String>,

    /// Business key of the originating process instance
    pub business_key: Option<String>,

    /// Full name of the originating service
    pub target_service: String,

    /// Opaque process variables carried by the event
    #[serde(default)]
    pub variables: HashMap<String, serde_json::Value>,

    /// Position of this event within its sequence, when known
    pub sequence_number: Option<u64>,

    /// Expected number of events in the sequence, when known
    pub sequence_size: Option<usize>,

    /// When the event was produced
    pub timestamp: DateTime<Utc>,
}

impl MessageEvent {
    /// Create a new message event with the required headers
    pub fn new(
        name: impl Into<String>,
        event_type: MessageEventType,
        target_service: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            event_type,
            correlation_key: None,
            business_key: None,
            target_service: target_service.into(),
            variables: HashMap::new(),
            sequence_number: None,
            sequence_size: None,
            timestamp: Utc::now(),
        }
    }

    /// Set the explicit correlation key
    pub fn with_correlation_key(mut self, correlation_key: impl Into<String>) -> Self {
        self.correlation_key = Some(correlation_key.into());
        self
    }

    /// Set the business key
    pub fn with_business_key(mut self, business_key: impl Into<String>) -> Self {
        self.business_key = Some(business_key.into());
        self
    }

    /// Add a process variable
    pub fn with_variable(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.variables.insert(key.into(), value);
        self
    }

    /// Set the sequence number
    pub fn with_sequence_number(mut self, sequence_number: u64) -> Self {
        self.sequence_number = Some(sequence_number);
        self
    }

    /// Set the expected sequence size
    pub fn with_sequence_size(mut self, sequence_size: usize) -> Self {
        self.sequence_size = Some(sequence_size);
        self
    }

    fn without_sequence(mut self) -> Self {
        self.sequence_number = None;
        self.sequence_size = None;
        self
    }
}

/// The unit emitted downstream for one released correlation group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleasedAggregate {
    /// Correlation key of the released group
    pub correlation_key: CorrelationKey,

    /// Service the aggregate is routed to
    pub target_service: String,

    /// Buffered messages in lock-acquisition append order
    pub messages: Vec<MessageEvent>,

    /// When the release happened
    pub released_at: DateTime<Utc>,

    /// Whether the aggregate was forced out by expiry before completion
    pub partial: bool,
}

impl ReleasedAggregate {
    /// Create an aggregate for a completed group
    pub fn new(
        correlation_key: CorrelationKey,
        target_service: impl Into<String>,
        messages: Vec<MessageEvent>,
    ) -> Self {
        Self {
            correlation_key,
            target_service: target_service.into(),
            messages,
            released_at: Utc::now(),
            partial: false,
        }
    }

    /// Create an aggregate for a group forced out by expiry
    pub fn partial(
        correlation_key: CorrelationKey,
        target_service: impl Into<String>,
        messages: Vec<MessageEvent>,
    ) -> Self {
        Self {
            partial: true,
            ..Self::new(correlation_key, target_service, messages)
        }
    }

    /// Strip sequence headers from the emitted copies
    pub fn pop_sequence(mut self) -> Self {
        self.messages = self
            .messages
            .into_iter()
            .map(MessageEvent::without_sequence)
            .collect();
        self
    }

    /// Number of messages in the aggregate
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the aggregate carries no messages
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_required_header_names() {
        assert_eq!(headers::MESSAGE_EVENT_TYPE, "messageEventType");
        assert_eq!(
            headers::MESSAGE_EVENT_CORRELATION_KEY,
            "messageEventCorrelationKey"
        );
        assert_eq!(headers::MESSAGE_EVENT_BUSINESS_KEY, "messageEventBusinessKey");
        assert_eq!(headers::SERVICE_FULL_NAME, "serviceFullName");
    }

    #[test]
    fn test_event_type_wire_names() {
        let json = serde_json::to_string(&MessageEventType::Sent).unwrap();
        assert_eq!(json, "\"MESSAGE_SENT\"");

        let parsed: MessageEventType =
            serde_json::from_str("\"MESSAGE_SUBSCRIPTION_CANCELLED\"").unwrap();
        assert_eq!(parsed, MessageEventType::SubscriptionCancelled);

        assert_eq!(
            MessageEventType::DefinitionDeployed.to_string(),
            "START_MESSAGE_DEPLOYED"
        );
    }

    #[test]
    fn test_terminal_marker() {
        assert!(MessageEventType::Received.is_terminal_marker());
        assert!(!MessageEventType::Sent.is_terminal_marker());
        assert!(!MessageEventType::Waiting.is_terminal_marker());
        assert!(!MessageEventType::DefinitionDeployed.is_terminal_marker());
    }

    #[test]
    fn test_message_event_builder() {
        let event = MessageEvent::new("order-placed", MessageEventType::Sent, "rb")
            .with_correlation_key("order-1")
            .with_business_key("b-42")
            .with_variable("amount", json!(100))
            .with_sequence_number(2)
            .with_sequence_size(5);

        assert_eq!(event.name, "order-placed");
        assert_eq!(event.correlation_key.as_deref(), Some("order-1"));
        assert_eq!(event.business_key.as_deref(), Some("b-42"));
        assert_eq!(event.variables.get("amount"), Some(&json!(100)));
        assert_eq!(event.sequence_number, Some(2));
        assert_eq!(event.sequence_size, Some(5));
    }

    #[test]
    fn test_event_round_trips_as_json() {
        let event = MessageEvent::new("m", MessageEventType::Waiting, "rb")
            .with_variable("key", json!("value"));

        let json = serde_json::to_string(&event).unwrap();
        let parsed: MessageEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_pop_sequence_strips_sequence_headers() {
        let messages = vec![
            MessageEvent::new("m", MessageEventType::Sent, "rb")
                .with_sequence_number(1)
                .with_sequence_size(2),
            MessageEvent::new("m", MessageEventType::Sent, "rb").with_sequence_number(2),
        ];
        let aggregate =
            ReleasedAggregate::new(CorrelationKey::new("m:1"), "rb", messages).pop_sequence();

        assert_eq!(aggregate.len(), 2);
        for message in &aggregate.messages {
            assert!(message.sequence_number.is_none());
            assert!(message.sequence_size.is_none());
        }
    }

    #[test]
    fn test_partial_aggregate_flag() {
        let aggregate = ReleasedAggregate::partial(CorrelationKey::new("m:1"), "rb", Vec::new());
        assert!(aggregate.partial);
        assert!(aggregate.is_empty());
    }
}

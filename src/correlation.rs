// Copyright 2025 Cowboy AI, LLC.

//! Correlation key derivation
//!
//! A key is derived from an event's identifying headers by an ordered chain
//! of strategies; the first strategy producing a key wins. Events no strategy
//! can identify are not correlatable and never reach a group.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::chain::{Handler, HandlerChain};
use crate::errors::{CorrelationError, CorrelationResult};
use crate::message::MessageEvent;

/// Identifier grouping related message events together
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationKey(String);

impl CorrelationKey {
    /// Create a key from its string form
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The key's string form
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the key, returning its string form
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Chain of correlation strategies over message events
pub type CorrelationChain = HandlerChain<MessageEvent, CorrelationKey>;

/// Derives the key from the explicit correlation header
///
/// Key form: `{name}:{correlation_key}`.
#[derive(Debug, Default)]
pub struct HeaderCorrelationStrategy;

impl Handler<MessageEvent, CorrelationKey> for HeaderCorrelationStrategy {
    fn handle(&self, event: &MessageEvent) -> Option<CorrelationKey> {
        event
            .correlation_key
            .as_ref()
            .map(|correlation_key| CorrelationKey::new(format!("{}:{correlation_key}", event.name)))
    }
}

/// Derives the key from message name, business key and target service
///
/// Key form: `{target_service}:{name}:{business_key}`.
#[derive(Debug, Default)]
pub struct BusinessKeyCorrelationStrategy;

impl Handler<MessageEvent, CorrelationKey> for BusinessKeyCorrelationStrategy {
    fn handle(&self, event: &MessageEvent) -> Option<CorrelationKey> {
        event.business_key.as_ref().map(|business_key| {
            CorrelationKey::new(format!(
                "{}:{}:{business_key}",
                event.target_service, event.name
            ))
        })
    }
}

/// Derives correlation keys through a strategy chain
#[derive(Debug)]
pub struct CorrelationKeyExtractor {
    chain: CorrelationChain,
}

impl CorrelationKeyExtractor {
    /// Create an extractor with the given strategy chain
    pub fn new(chain: CorrelationChain) -> Self {
        Self { chain }
    }

    /// Derive the correlation key for an event
    ///
    /// Deterministic and side-effect free. Fails with
    /// [`CorrelationError::NotCorrelatable`] when no identifying header set
    /// is present.
    pub fn extract(&self, event: &MessageEvent) -> CorrelationResult<CorrelationKey> {
        self.chain.handle(event).ok_or_else(|| {
            CorrelationError::NotCorrelatable(format!(
                "message event '{}' from {} carries no correlation or business key",
                event.name, event.target_service
            ))
        })
    }
}

impl Default for CorrelationKeyExtractor {
    fn default() -> Self {
        Self::new(
            CorrelationChain::new()
                .with(HeaderCorrelationStrategy)
                .with(BusinessKeyCorrelationStrategy),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageEventType;
    use proptest::prelude::*;

    fn event() -> MessageEvent {
        MessageEvent::new("invoice", MessageEventType::Sent, "rb")
    }

    #[test]
    fn test_explicit_header_wins() {
        let extractor = CorrelationKeyExtractor::default();
        let event = event().with_correlation_key("c-1").with_business_key("b-1");

        let key = extractor.extract(&event).unwrap();
        assert_eq!(key.as_str(), "invoice:c-1");
    }

    #[test]
    fn test_business_key_fallback() {
        let extractor = CorrelationKeyExtractor::default();
        let event = event().with_business_key("b-1");

        let key = extractor.extract(&event).unwrap();
        assert_eq!(key.as_str(), "rb:invoice:b-1");
    }

    #[test]
    fn test_not_correlatable_without_identifying_headers() {
        let extractor = CorrelationKeyExtractor::default();

        let err = extractor.extract(&event()).unwrap_err();
        assert!(matches!(err, CorrelationError::NotCorrelatable(_)));
        assert!(err.is_recoverable());
    }

    proptest! {
        #[test]
        fn prop_extraction_is_deterministic(
            name in "[a-z]{1,12}",
            correlation in proptest::option::of("[a-z0-9]{1,8}"),
            business in proptest::option::of("[a-z0-9]{1,8}"),
        ) {
            let extractor = CorrelationKeyExtractor::default();
            let mut event = MessageEvent::new(name, MessageEventType::Sent, "rb");
            event.correlation_key = correlation;
            event.business_key = business;

            let first = extractor.extract(&event).ok();
            let second = extractor.extract(&event).ok();
            prop_assert_eq!(first, second);
        }

        #[test]
        fn prop_explicit_key_always_takes_precedence(
            correlation in "[a-z0-9]{1,8}",
            business in "[a-z0-9]{1,8}",
        ) {
            let extractor = CorrelationKeyExtractor::default();
            let event = MessageEvent::new("m", MessageEventType::Sent, "rb")
                .with_correlation_key(correlation.clone())
                .with_business_key(business);

            let key = extractor.extract(&event).unwrap();
            prop_assert_eq!(key.as_str(), format!("m:{correlation}"));
        }
    }
}

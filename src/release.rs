// Copyright 2025 Cowboy AI, LLC.

//! Release strategies
//!
//! A strategy decides whether a group's buffered messages are ready to be
//! emitted as one aggregate. Evaluation is side-effect free and callable
//! repeatedly; the default policy is a handler chain where the first
//! handler voting ready wins and an exhausted chain keeps buffering.

use crate::chain::{Handler, HandlerChain};
use crate::group::CorrelationGroup;

/// Decides whether a group is ready to release
pub trait ReleaseStrategy: Send + Sync {
    /// Whether the group's buffered messages form a complete aggregate
    fn can_release(&self, group: &CorrelationGroup) -> bool;
}

/// Chain of release handlers voting over a group
pub type ReleaseChain = HandlerChain<CorrelationGroup, bool>;

/// Votes ready when the expected sequence size is known and reached
///
/// A group with unknown sequence size never auto-releases on count alone;
/// this handler abstains so a terminal marker or expiry decides instead.
#[derive(Debug, Default)]
pub struct SequenceSizeReleaseHandler;

impl Handler<CorrelationGroup, bool> for SequenceSizeReleaseHandler {
    fn handle(&self, group: &CorrelationGroup) -> Option<bool> {
        match group.sequence_size() {
            Some(size) if group.len() >= size => Some(true),
            _ => None,
        }
    }
}

/// Votes ready when a terminal-marker event is buffered
#[derive(Debug, Default)]
pub struct TerminalMarkerReleaseHandler;

impl Handler<CorrelationGroup, bool> for TerminalMarkerReleaseHandler {
    fn handle(&self, group: &CorrelationGroup) -> Option<bool> {
        group
            .messages()
            .iter()
            .any(|message| message.event_type.is_terminal_marker())
            .then_some(true)
    }
}

/// Release strategy backed by a handler chain
pub struct ReleaseStrategyChain {
    chain: ReleaseChain,
}

impl ReleaseStrategyChain {
    /// Create a strategy over the given chain
    pub fn new(chain: ReleaseChain) -> Self {
        Self { chain }
    }

    /// The default policy: sequence size reached or terminal marker present
    pub fn default_policy() -> Self {
        Self::new(
            ReleaseChain::new()
                .with(SequenceSizeReleaseHandler)
                .with(TerminalMarkerReleaseHandler),
        )
    }
}

impl Default for ReleaseStrategyChain {
    fn default() -> Self {
        Self::default_policy()
    }
}

impl ReleaseStrategy for ReleaseStrategyChain {
    fn can_release(&self, group: &CorrelationGroup) -> bool {
        self.chain.handle(group).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation::CorrelationKey;
    use crate::message::{MessageEvent, MessageEventType};
    use proptest::prelude::*;

    fn group_with(count: usize, sequence_size: Option<usize>) -> CorrelationGroup {
        let mut group = CorrelationGroup::new(CorrelationKey::new("m:1"));
        for n in 0..count {
            let mut message =
                MessageEvent::new("m", MessageEventType::Sent, "rb").with_sequence_number(n as u64);
            message.sequence_size = sequence_size;
            group.append(message);
        }
        group
    }

    #[test]
    fn test_release_at_sequence_size() {
        let strategy = ReleaseStrategyChain::default_policy();

        assert!(!strategy.can_release(&group_with(2, Some(3))));
        assert!(strategy.can_release(&group_with(3, Some(3))));
        assert!(strategy.can_release(&group_with(4, Some(3))));
    }

    #[test]
    fn test_unknown_sequence_size_never_releases_on_count() {
        let strategy = ReleaseStrategyChain::default_policy();
        assert!(!strategy.can_release(&group_with(100, None)));
    }

    #[test]
    fn test_terminal_marker_releases() {
        let strategy = ReleaseStrategyChain::default_policy();

        let mut group = group_with(2, None);
        assert!(!strategy.can_release(&group));

        group.append(MessageEvent::new("m", MessageEventType::Received, "rb"));
        assert!(strategy.can_release(&group));
    }

    #[test]
    fn test_evaluation_is_repeatable() {
        let strategy = ReleaseStrategyChain::default_policy();
        let group = group_with(3, Some(3));

        assert!(strategy.can_release(&group));
        assert!(strategy.can_release(&group));
        assert_eq!(group.len(), 3);
    }

    #[test]
    fn test_empty_chain_buffers() {
        let strategy = ReleaseStrategyChain::new(ReleaseChain::new());
        assert!(!strategy.can_release(&group_with(5, Some(1))));
    }

    proptest! {
        #[test]
        fn prop_sized_groups_release_once_size_reached(
            size in 1usize..20,
            extra in 0usize..5,
        ) {
            let strategy = ReleaseStrategyChain::default_policy();
            prop_assert!(strategy.can_release(&group_with(size + extra, Some(size))));
            if size > 1 {
                prop_assert!(!strategy.can_release(&group_with(size - 1, Some(size))));
            }
        }
    }
}

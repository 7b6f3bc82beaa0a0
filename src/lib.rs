//! # Messages Core
//!
//! Message correlation and aggregation engine for distributed process
//! runtimes. The engine receives asynchronous BPMN-style message events,
//! correlates them into groups keyed by a business correlation id, applies
//! release and expiry policies, and forwards each completed group exactly
//! once to a downstream destination.
//!
//! The building blocks:
//! - **CorrelationKeyExtractor**: derives a group key from an event's
//!   identifying headers
//! - **GroupStore**: durable mapping from correlation key to buffered
//!   message group
//! - **LockRegistry / LockTemplate**: per-key mutual exclusion guaranteeing
//!   at-most-one release per group generation
//! - **ReleaseStrategy**: decides when a group's buffered messages are
//!   complete
//! - **CorrelationAggregator**: the orchestrating engine plus its periodic
//!   expiry sweep
//! - **OutputRouter / MessageChannel**: destination resolution and the
//!   downstream transport seam
//!
//! ## Design Principles
//!
//! 1. **Exactly-once release**: group removal and the release decision share
//!    one critical section per correlation key
//! 2. **No silent loss**: contention, duplicates and unroutable events
//!    surface as explicit signals or land on the discard destination
//! 3. **Explicit construction**: one configuration struct, read once; no
//!    container magic
//! 4. **Pluggable seams**: store, locks and transport are traits selected at
//!    construction

#![warn(missing_docs)]

pub mod aggregator;
pub mod chain;
pub mod channels;
pub mod config;
pub mod correlation;
pub mod dedupe;
pub mod errors;
pub mod group;
pub mod locking;
pub mod message;
pub mod release;
pub mod router;
pub mod store;
pub mod transport;

// Re-export core types
pub use aggregator::{
    spawn_sweeper, CorrelationAggregator, Disposition, ReleaseDecision, SweepOutcome,
};
pub use chain::{FnHandler, Handler, HandlerChain};
pub use channels::{ChannelError, InMemoryChannel, MessageChannel, OutboundMessage};
pub use config::{AggregatorConfig, LockMode, DEFAULT_DISCARD_DESTINATION};
pub use correlation::{
    BusinessKeyCorrelationStrategy, CorrelationChain, CorrelationKey, CorrelationKeyExtractor,
    HeaderCorrelationStrategy,
};
pub use dedupe::IdempotencyGuard;
pub use errors::{CorrelationError, CorrelationResult};
pub use group::CorrelationGroup;
pub use locking::{
    LeaseLockRegistry, LocalLockRegistry, LockError, LockHandle, LockRegistry, LockTemplate,
};
pub use message::{headers, MessageEvent, MessageEventType, ReleasedAggregate};
pub use release::{
    ReleaseChain, ReleaseStrategy, ReleaseStrategyChain, SequenceSizeReleaseHandler,
    TerminalMarkerReleaseHandler,
};
pub use router::{OutputRouter, DEFAULT_DYNAMIC_DESTINATION_PREFIX};
pub use store::{GroupStore, InMemoryGroupStore, StoreError};
pub use transport::NatsChannel;

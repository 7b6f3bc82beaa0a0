// Copyright 2025 Cowboy AI, LLC.

//! Aggregator configuration surface
//!
//! All knobs are read once at construction; parsing and validating
//! configuration sources is the embedding service's job.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::locking::{LeaseLockRegistry, LocalLockRegistry, LockRegistry};
use crate::router::DEFAULT_DYNAMIC_DESTINATION_PREFIX;

/// Default destination for discarded events
pub const DEFAULT_DISCARD_DESTINATION: &str = "discardChannel";

/// Which mutual-exclusion primitive guards correlation keys
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum LockMode {
    /// In-process mutex map (single instance)
    Local,

    /// Lease-based lock (multi-instance deployment)
    Lease {
        /// Time-to-live of a granted lease
        ttl: Duration,
        /// Poll interval while waiting for a lease
        retry_interval: Duration,
    },
}

impl LockMode {
    /// Build the registry this mode selects
    pub fn build_registry(&self) -> Arc<dyn LockRegistry> {
        match self {
            LockMode::Local => Arc::new(LocalLockRegistry::new()),
            LockMode::Lease { ttl, retry_interval } => {
                Arc::new(LeaseLockRegistry::new(*ttl, *retry_interval))
            }
        }
    }
}

impl Default for LockMode {
    fn default() -> Self {
        LockMode::Local
    }
}

/// Configuration for the correlation aggregator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Bound on per-key lock acquisition
    pub lock_timeout: Duration,

    /// Bound on a downstream send
    pub send_timeout: Duration,

    /// Interval between expiry sweeps
    pub sweep_interval: Duration,

    /// Buffering time after which a group is eligible for expiry
    pub group_max_age: Duration,

    /// Emit the buffered subset of an expired group instead of discarding it
    pub send_partial_result_on_expiry: bool,

    /// Keep emptied groups alive and emit an empty result when they expire
    pub complete_groups_when_empty: bool,

    /// Enable forced expiry of timed-out groups
    pub expire_groups_upon_timeout: bool,

    /// Strip sequence headers from released message copies
    pub pop_sequence: bool,

    /// Release the key's lock before the downstream send
    pub release_lock_before_send: bool,

    /// Destination for discarded events
    pub discard_destination: String,

    /// Static service-name to destination bindings, consulted first
    pub destination_bindings: HashMap<String, String>,

    /// Prefix for dynamically computed destinations; `None` disables the
    /// dynamic fallback
    pub dynamic_destination_prefix: Option<String>,

    /// Lock primitive guarding correlation keys
    pub lock_mode: LockMode,

    /// Number of recently seen event ids remembered for idempotent receipt
    pub dedupe_capacity: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(5),
            send_timeout: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(10),
            group_max_age: Duration::from_secs(60),
            send_partial_result_on_expiry: true,
            complete_groups_when_empty: true,
            expire_groups_upon_timeout: true,
            pop_sequence: false,
            release_lock_before_send: false,
            discard_destination: DEFAULT_DISCARD_DESTINATION.to_string(),
            destination_bindings: HashMap::new(),
            dynamic_destination_prefix: Some(DEFAULT_DYNAMIC_DESTINATION_PREFIX.to_string()),
            lock_mode: LockMode::default(),
            dedupe_capacity: 1024,
        }
    }
}

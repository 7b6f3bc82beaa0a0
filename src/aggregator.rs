// Copyright 2025 Cowboy AI, LLC.

//! Correlation aggregator core
//!
//! On each inbound event the aggregator acquires the key's lock, appends to
//! (or creates) the group, evaluates the release strategy and, when ready,
//! removes the group and emits the buffered messages as one aggregate. A
//! periodic sweep drives forced release and expiry of timed-out groups.
//! The shared per-key lock is the only thing excluding a sweep from racing
//! an in-flight release, so both paths re-check group state under it.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::channels::{MessageChannel, OutboundMessage};
use crate::config::AggregatorConfig;
use crate::correlation::{CorrelationKey, CorrelationKeyExtractor};
use crate::dedupe::IdempotencyGuard;
use crate::errors::{CorrelationError, CorrelationResult};
use crate::locking::{LockRegistry, LockTemplate};
use crate::message::{MessageEvent, MessageEventType, ReleasedAggregate};
use crate::release::{ReleaseStrategy, ReleaseStrategyChain};
use crate::router::OutputRouter;
use crate::store::GroupStore;

/// Outcome of evaluating a group inside its critical section
#[derive(Debug)]
pub enum ReleaseDecision {
    /// The group stays buffered
    Buffer,

    /// The group completed; its buffered messages are emitted as one unit
    Release(Vec<MessageEvent>),

    /// The group timed out
    Expire {
        /// Messages buffered at expiry time
        messages: Vec<MessageEvent>,
        /// Destination service recorded for the group
        target_service: Option<String>,
        /// Whether the buffered subset is emitted rather than discarded
        partial: bool,
    },
}

/// What happened to one inbound message event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// The event was appended to its group
    Buffered,

    /// The event completed its group; the aggregate was emitted
    Released {
        /// Destination the aggregate was sent to
        destination: String,
        /// Number of messages in the aggregate
        messages: usize,
    },

    /// The event cancelled its group's subscription
    Cancelled,

    /// The event id was already seen; routed to discard
    Duplicate,
}

/// Counters for one sweep pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    /// Expired groups emitted as partial aggregates
    pub released: usize,

    /// Expired groups discarded without emission
    pub discarded: usize,

    /// Expired groups whose emission failed post-commit
    pub failed: usize,
}

/// Correlates inbound message events into groups and releases them downstream
pub struct CorrelationAggregator {
    config: AggregatorConfig,
    extractor: CorrelationKeyExtractor,
    store: Arc<dyn GroupStore>,
    locks: LockTemplate,
    strategy: Arc<dyn ReleaseStrategy>,
    router: OutputRouter,
    output: Arc<dyn MessageChannel>,
    dedupe: IdempotencyGuard,
}

impl CorrelationAggregator {
    /// Create an aggregator with the default extractor and release policy
    pub fn new(
        config: AggregatorConfig,
        store: Arc<dyn GroupStore>,
        output: Arc<dyn MessageChannel>,
    ) -> Self {
        let registry = config.lock_mode.build_registry();
        let locks = LockTemplate::new(registry, config.lock_timeout);
        let router = OutputRouter::from_config(&config);
        let dedupe = IdempotencyGuard::new(config.dedupe_capacity);
        Self {
            extractor: CorrelationKeyExtractor::default(),
            strategy: Arc::new(ReleaseStrategyChain::default_policy()),
            config,
            store,
            locks,
            router,
            output,
            dedupe,
        }
    }

    /// Replace the release strategy
    pub fn with_strategy(mut self, strategy: Arc<dyn ReleaseStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    /// Replace the correlation key extractor
    pub fn with_extractor(mut self, extractor: CorrelationKeyExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    /// Replace the lock registry
    pub fn with_lock_registry(mut self, registry: Arc<dyn LockRegistry>) -> Self {
        self.locks = LockTemplate::new(registry, self.config.lock_timeout);
        self
    }

    /// The configuration the aggregator was built with
    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// The group store backing the aggregator
    pub fn store(&self) -> &Arc<dyn GroupStore> {
        &self.store
    }

    /// Process one inbound message event
    ///
    /// Never silently loses a message: non-correlatable events and
    /// duplicates go to the discard destination, a contended lock surfaces
    /// as [`CorrelationError::LockTimeout`] for transport redelivery, and a
    /// failed downstream send surfaces as a post-commit failure.
    pub async fn on_message(&self, event: MessageEvent) -> CorrelationResult<Disposition> {
        if !self.dedupe.check_and_record(event.id) {
            debug!("Duplicate message event {} discarded", event.id);
            self.discard(event).await?;
            return Ok(Disposition::Duplicate);
        }

        let key = match self.extractor.extract(&event) {
            Ok(key) => key,
            Err(err) => {
                warn!(
                    "Discarding non-correlatable message event '{}' from {}",
                    event.name, event.target_service
                );
                if let Err(discard_err) = self.discard(event).await {
                    warn!("Discard send failed: {discard_err}");
                }
                return Err(err);
            }
        };

        if event.event_type == MessageEventType::SubscriptionCancelled {
            return self.cancel_subscription(&key).await;
        }

        let event_id = event.id;
        let outcome = if self.config.release_lock_before_send {
            match self
                .locks
                .with_lock(key.as_str(), || self.correlate(&key, event))
                .await
                .map_err(CorrelationError::from)
                .and_then(|decision| decision)
            {
                Ok(decision) => self.dispatch(&key, decision).await,
                Err(err) => Err(err),
            }
        } else {
            self.locks
                .with_lock(key.as_str(), || async {
                    let decision = self.correlate(&key, event).await?;
                    self.dispatch(&key, decision).await
                })
                .await
                .map_err(CorrelationError::from)
                .and_then(|result| result)
        };

        // an event that never reached its group must pass again on
        // transport redelivery
        if let Err(
            CorrelationError::LockTimeout { .. }
            | CorrelationError::Interrupted { .. }
            | CorrelationError::StoreUnavailable(_),
        ) = &outcome
        {
            self.dedupe.forget(&event_id);
        }

        outcome
    }

    /// Expire timed-out groups
    ///
    /// Candidates are re-read under their key's lock: a group released
    /// concurrently by `on_message` is absent by then and skipped, so a
    /// group is never both released and expired. Contended keys are skipped
    /// and picked up by the next sweep.
    pub async fn sweep(&self) -> CorrelationResult<SweepOutcome> {
        let mut outcome = SweepOutcome::default();
        if !self.config.expire_groups_upon_timeout {
            return Ok(outcome);
        }

        let max_age = self.config.group_max_age;
        let candidates = self.store.sweep_expired(max_age).await?;

        for candidate in candidates {
            let key = candidate.key().clone();
            let locked = self
                .locks
                .with_lock(key.as_str(), || self.expire(&key))
                .await;

            let decision = match locked {
                Ok(decision) => decision?,
                Err(err) => {
                    warn!("Sweep skipped contended group {key}: {err}");
                    continue;
                }
            };

            match decision {
                ReleaseDecision::Buffer | ReleaseDecision::Release(_) => {}
                ReleaseDecision::Expire {
                    messages,
                    target_service,
                    partial,
                } => {
                    if !partial {
                        debug!(
                            "Expired group {key} discarded with {} buffered messages",
                            messages.len()
                        );
                        outcome.discarded += 1;
                        continue;
                    }
                    let Some(target_service) = target_service else {
                        debug!("Expired group {key} has no recorded target; discarded");
                        outcome.discarded += 1;
                        continue;
                    };
                    let aggregate =
                        ReleasedAggregate::partial(key.clone(), target_service, messages);
                    match self.emit(aggregate).await {
                        Ok(_) => outcome.released += 1,
                        Err(err) => {
                            error!("Expiry release for group {key} failed: {err}");
                            outcome.failed += 1;
                        }
                    }
                }
            }
        }

        Ok(outcome)
    }

    /// Mutate the group under its lock and decide release versus buffer
    async fn correlate(
        &self,
        key: &CorrelationKey,
        event: MessageEvent,
    ) -> CorrelationResult<ReleaseDecision> {
        self.store.get_or_create(key).await?;
        let group = self.store.append(key, event).await?;

        if self.strategy.can_release(&group) {
            let mut removed = self.store.remove(key).await?.unwrap_or(group);
            let messages = removed.complete();
            info!(
                "Releasing group {key} with {} messages",
                messages.len()
            );
            Ok(ReleaseDecision::Release(messages))
        } else {
            debug!("Buffering message event in group {key} (size {})", group.len());
            Ok(ReleaseDecision::Buffer)
        }
    }

    /// Re-read an expiry candidate under its lock and decide its fate
    async fn expire(&self, key: &CorrelationKey) -> CorrelationResult<ReleaseDecision> {
        let Some(current) = self.store.get(key).await? else {
            return Ok(ReleaseDecision::Buffer);
        };
        if !current.older_than(self.config.group_max_age) {
            return Ok(ReleaseDecision::Buffer);
        }
        let Some(mut removed) = self.store.remove(key).await? else {
            return Ok(ReleaseDecision::Buffer);
        };

        let target_service = removed.target_service().map(str::to_string);
        let partial = self.config.send_partial_result_on_expiry
            && (!removed.is_empty() || self.config.complete_groups_when_empty);
        let messages = removed.complete();

        Ok(ReleaseDecision::Expire {
            messages,
            target_service,
            partial,
        })
    }

    async fn dispatch(
        &self,
        key: &CorrelationKey,
        decision: ReleaseDecision,
    ) -> CorrelationResult<Disposition> {
        match decision {
            ReleaseDecision::Buffer => Ok(Disposition::Buffered),
            ReleaseDecision::Release(messages) => {
                let Some(target_service) = messages.first().map(|m| m.target_service.clone())
                else {
                    return Ok(Disposition::Buffered);
                };
                let aggregate = ReleasedAggregate::new(key.clone(), target_service, messages);
                self.emit(aggregate).await
            }
            ReleaseDecision::Expire { .. } => Ok(Disposition::Buffered),
        }
    }

    /// Route one aggregate downstream
    ///
    /// The group is already removed from the store by the time this runs, so
    /// a routing or send failure here is post-commit: it is surfaced to the
    /// caller, never retried by the engine.
    async fn emit(&self, aggregate: ReleasedAggregate) -> CorrelationResult<Disposition> {
        let destination = self.router.resolve(&aggregate.target_service)?;
        let count = aggregate.len();
        let aggregate = if self.config.pop_sequence {
            aggregate.pop_sequence()
        } else {
            aggregate
        };

        let send = self
            .output
            .send(&destination, OutboundMessage::Aggregate(aggregate));
        match tokio::time::timeout(self.config.send_timeout, send).await {
            Ok(Ok(())) => {
                info!("Sent aggregate of {count} messages to {destination}");
                Ok(Disposition::Released {
                    destination,
                    messages: count,
                })
            }
            Ok(Err(err)) => {
                error!("Post-commit send failure to {destination}: {err}");
                Err(CorrelationError::SendFailed {
                    destination,
                    reason: err.to_string(),
                })
            }
            Err(_) => {
                error!(
                    "Post-commit send to {destination} timed out after {:?}",
                    self.config.send_timeout
                );
                Err(CorrelationError::SendTimeout {
                    destination,
                    timeout: self.config.send_timeout,
                })
            }
        }
    }

    async fn cancel_subscription(&self, key: &CorrelationKey) -> CorrelationResult<Disposition> {
        self.locks
            .with_lock(key.as_str(), || async {
                if self.config.complete_groups_when_empty {
                    self.store.clear(key).await?;
                } else {
                    self.store.remove(key).await?;
                }
                Ok::<_, CorrelationError>(())
            })
            .await
            .map_err(CorrelationError::from)??;

        info!("Cancelled message subscription for group {key}");
        Ok(Disposition::Cancelled)
    }

    async fn discard(&self, event: MessageEvent) -> CorrelationResult<()> {
        let destination = self.config.discard_destination.clone();
        self.output
            .send(&destination, OutboundMessage::Discarded(event))
            .await
            .map_err(|err| CorrelationError::SendFailed {
                destination,
                reason: err.to_string(),
            })
    }
}

/// Spawn the periodic sweep task for an aggregator
///
/// Runs until the returned handle is aborted.
pub fn spawn_sweeper(aggregator: Arc<CorrelationAggregator>) -> tokio::task::JoinHandle<()> {
    let period = aggregator.config.sweep_interval;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match aggregator.sweep().await {
                Ok(outcome) if outcome != SweepOutcome::default() => {
                    info!(
                        "Sweep released {} groups, discarded {}, failed {}",
                        outcome.released, outcome.discarded, outcome.failed
                    );
                }
                Ok(_) => {}
                Err(err) => warn!("Sweep pass failed: {err}"),
            }
        }
    })
}

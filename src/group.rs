// Copyright 2025 Cowboy AI, LLC.

//! Correlation group aggregate unit

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::correlation::CorrelationKey;
use crate::message::MessageEvent;

/// Mutable aggregate of buffered message events sharing one correlation key
///
/// A non-completed group is reachable by exactly one key in the store; once
/// completed it must be removed in the same critical section. All mutation
/// happens under the key's lock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationGroup {
    key: CorrelationKey,
    messages: Vec<MessageEvent>,
    created_at: DateTime<Utc>,
    last_modified_at: DateTime<Utc>,
    completed: bool,
    sequence_size: Option<usize>,
    target_service: Option<String>,
}

impl CorrelationGroup {
    /// Create an empty group for a key
    pub fn new(key: CorrelationKey) -> Self {
        let now = Utc::now();
        Self {
            key,
            messages: Vec::new(),
            created_at: now,
            last_modified_at: now,
            completed: false,
            sequence_size: None,
            target_service: None,
        }
    }

    /// The group's correlation key
    pub fn key(&self) -> &CorrelationKey {
        &self.key
    }

    /// Buffered messages in append order
    pub fn messages(&self) -> &[MessageEvent] {
        &self.messages
    }

    /// When the group was created
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// When the group was last mutated
    pub fn last_modified_at(&self) -> DateTime<Utc> {
        self.last_modified_at
    }

    /// Whether the group reached its terminal state
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Expected number of messages, when known
    pub fn sequence_size(&self) -> Option<usize> {
        self.sequence_size
    }

    /// Destination service recorded from the first appended message
    ///
    /// Retained across [`clear`](Self::clear) so an empty-group release can
    /// still be routed.
    pub fn target_service(&self) -> Option<&str> {
        self.target_service.as_deref()
    }

    /// Number of buffered messages
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the group buffers no messages
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Append a message, learning sequence size and target service from it
    pub fn append(&mut self, message: MessageEvent) {
        if self.sequence_size.is_none() {
            self.sequence_size = message.sequence_size;
        }
        if self.target_service.is_none() {
            self.target_service = Some(message.target_service.clone());
        }
        self.messages.push(message);
        self.touch();
    }

    /// Empty the group's buffer, keeping the group alive
    pub fn clear(&mut self) {
        self.messages.clear();
        self.touch();
    }

    /// Mark the group completed and take its messages
    pub fn complete(&mut self) -> Vec<MessageEvent> {
        self.completed = true;
        std::mem::take(&mut self.messages)
    }

    /// Whether the group was last mutated longer than `max_age` ago
    pub fn older_than(&self, max_age: Duration) -> bool {
        Utc::now()
            .signed_duration_since(self.last_modified_at)
            .to_std()
            .map(|age| age > max_age)
            .unwrap_or(false)
    }

    fn touch(&mut self) {
        self.last_modified_at = Utc::now();
    }
}

//! Transition history tracking.
//!
//! Every machine keeps a bounded log of the transitions it performed. The log
//! is diagnostic only: nothing in dispatch depends on it.

use super::token::Token;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

/// Number of transitions retained when no capacity is given.
pub const DEFAULT_HISTORY_CAPACITY: usize = 64;

/// Record of a single state transition.
///
/// # Example
///
/// ```rust
/// use instrument_driver::core::TransitionRecord;
/// use instrument_driver::driver::{ConnectionEvent, ConnectionState};
/// use chrono::Utc;
///
/// let record = TransitionRecord {
///     from: ConnectionState::Disconnected,
///     to: ConnectionState::Connected,
///     event: ConnectionEvent::Connect,
///     timestamp: Utc::now(),
/// };
/// assert_eq!(record.to, ConnectionState::Connected);
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct TransitionRecord<S: Token, E: Token> {
    /// The state being left
    pub from: S,
    /// The state being entered
    pub to: S,
    /// The event whose handler requested the transition
    pub event: E,
    /// When the transition happened
    pub timestamp: DateTime<Utc>,
}

/// Ordered, bounded history of transitions.
///
/// Once `capacity` records are held, recording a new one evicts the oldest.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct TransitionHistory<S: Token, E: Token> {
    capacity: usize,
    records: VecDeque<TransitionRecord<S, E>>,
}

impl<S: Token, E: Token> Default for TransitionHistory<S, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Token, E: Token> TransitionHistory<S, E> {
    /// Create an empty history holding up to [`DEFAULT_HISTORY_CAPACITY`] records.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }

    /// Create an empty history holding up to `capacity` records.
    ///
    /// A capacity of zero disables recording.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            records: VecDeque::with_capacity(capacity.min(DEFAULT_HISTORY_CAPACITY)),
        }
    }

    /// Append a record, evicting the oldest one when full.
    pub fn record(&mut self, record: TransitionRecord<S, E>) {
        if self.capacity == 0 {
            return;
        }
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    /// States traversed: the `from` of the oldest retained record, then the
    /// `to` of each record.
    pub fn path(&self) -> Vec<S> {
        let mut path = Vec::with_capacity(self.records.len() + 1);
        if let Some(first) = self.records.front() {
            path.push(first.from);
        }
        path.extend(self.records.iter().map(|r| r.to));
        path
    }

    /// Time between the oldest and newest retained record.
    pub fn duration(&self) -> Option<Duration> {
        let (first, last) = (self.records.front()?, self.records.back()?);
        last.timestamp
            .signed_duration_since(first.timestamp)
            .to_std()
            .ok()
    }

    /// Most recent record, if any.
    pub fn last(&self) -> Option<&TransitionRecord<S, E>> {
        self.records.back()
    }

    /// Retained records, oldest first.
    pub fn records(&self) -> impl Iterator<Item = &TransitionRecord<S, E>> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

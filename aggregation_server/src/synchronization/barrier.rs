use std::{collections::HashSet, num::NonZeroUsize};

use crate::queue::SenderId;

/// The outcome of a batch barrier arrival.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arrival {
    /// A new sender arrived, `barriers` have arrived so far.
    Counted { barriers: usize },
    /// This sender had already arrived in the current round.
    Duplicate,
    /// The last required sender arrived, the round is complete.
    Complete,
}

/// Counts the batch barriers of the current round against the required fan-in.
///
/// Only the aggregation loop touches it, so it needs no synchronization.
#[derive(Debug)]
pub struct RoundBarrier {
    fan_in: NonZeroUsize,
    round: u64,
    arrived: HashSet<SenderId>,
    received: usize,
}

impl RoundBarrier {
    /// Creates a new `RoundBarrier` positioned at round 0.
    ///
    /// # Arguments
    /// * `fan_in` - The amount of distinct senders that complete a round.
    pub fn new(fan_in: NonZeroUsize) -> Self {
        Self {
            fan_in,
            round: 0,
            arrived: HashSet::with_capacity(fan_in.get()),
            received: 0,
        }
    }

    /// Registers a batch barrier from `sender`.
    ///
    /// # Arguments
    /// * `sender` - The producer of the batch barrier message.
    ///
    /// # Returns
    /// Whether it was counted, ignored as a duplicate or completed the round.
    pub fn arrive(&mut self, sender: SenderId) -> Arrival {
        if self.is_complete() || !self.arrived.insert(sender) {
            return Arrival::Duplicate;
        }

        match self.arrived.len() {
            n if n == self.fan_in.get() => Arrival::Complete,
            barriers => Arrival::Counted { barriers },
        }
    }

    /// Counts a received data message, only used for observability.
    pub fn note_received(&mut self) {
        self.received += 1;
    }

    /// Moves on to the next round, forgetting every arrival.
    pub fn next_round(&mut self) {
        self.round += 1;
        self.arrived.clear();
        self.received = 0;
    }

    pub fn is_complete(&self) -> bool {
        self.arrived.len() == self.fan_in.get()
    }

    pub fn round(&self) -> u64 {
        self.round
    }

    pub fn barriers(&self) -> usize {
        self.arrived.len()
    }

    pub fn received(&self) -> usize {
        self.received
    }

    pub fn fan_in(&self) -> usize {
        self.fan_in.get()
    }
}

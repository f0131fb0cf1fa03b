//! Self-echo deduplication for gateway traffic
//!
//! Replies the gateway sends back into a channel come around again as
//! inbound notifications. The guard remembers the sequence numbers of
//! recently sent replies so those echoes can be dropped before they reach
//! the orchestrator.

use std::collections::VecDeque;
use std::sync::Mutex;

/// Default number of remembered sequence numbers
pub const DEFAULT_CAPACITY: usize = 16;

/// Bounded memory of recently sent message sequence numbers
#[derive(Debug)]
pub struct DedupGuard {
    capacity: usize,
    recent: Mutex<VecDeque<u64>>,
}

impl DedupGuard {
    /// Create a guard remembering the last [`DEFAULT_CAPACITY`] sequence numbers
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a guard with an explicit capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            recent: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
        }
    }

    /// Remember a sent sequence number, evicting the oldest when full
    pub fn record(&self, sequence: u64) {
        let mut recent = match self.recent.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if recent.len() == self.capacity {
            recent.pop_front();
        }
        recent.push_back(sequence);
    }

    /// Whether a sequence number was recently sent by us
    pub fn contains(&self, sequence: u64) -> bool {
        let recent = match self.recent.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        recent.contains(&sequence)
    }
}

impl Default for DedupGuard {
    fn default() -> Self {
        Self::new()
    }
}

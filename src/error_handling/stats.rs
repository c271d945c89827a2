//! Decision statistics tracking.
//!
//! Thread-safe counters for verdicts, rejection reasons and refresh outcomes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use strum::IntoEnumIterator;

use super::types::DecisionEvent;

/// Thread-safe decision statistics.
///
/// Every [`DecisionEvent`] is initialized to zero on creation, so lookups never
/// miss. Shared across request paths and the scheduler through `Arc`.
#[derive(Debug)]
pub struct DecisionStats {
    counters: HashMap<DecisionEvent, AtomicUsize>,
}

impl DecisionStats {
    /// Creates a tracker with every counter at zero.
    pub fn new() -> Self {
        let mut counters = HashMap::new();
        for event in DecisionEvent::iter() {
            counters.insert(event, AtomicUsize::new(0));
        }
        DecisionStats { counters }
    }

    /// Increment the counter for an event.
    pub fn increment(&self, event: DecisionEvent) {
        if let Some(counter) = self.counters.get(&event) {
            counter.fetch_add(1, Ordering::Relaxed);
        } else {
            log::error!(
                "Attempted to increment counter for {:?} which is not in the map. \
                 This indicates a bug in DecisionStats initialization.",
                event
            );
        }
    }

    /// Current value of an event counter.
    pub fn get(&self, event: DecisionEvent) -> usize {
        self.counters
            .get(&event)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// All counters, in enum declaration order.
    pub fn snapshot(&self) -> Vec<(DecisionEvent, usize)> {
        DecisionEvent::iter().map(|e| (e, self.get(e))).collect()
    }

    /// Total number of verdicts handed out.
    pub fn total_decisions(&self) -> usize {
        self.get(DecisionEvent::Allowed)
            + self.get(DecisionEvent::Challenged)
            + self.get(DecisionEvent::Denied)
    }
}

impl Default for DecisionStats {
    fn default() -> Self {
        Self::new()
    }
}

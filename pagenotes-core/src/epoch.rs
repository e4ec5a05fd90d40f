//! Staleness tracking for work started against a page range.
//!
//! Every range change advances the epoch. Long-running work takes a ticket
//! when it starts and checks it when it settles; a ticket from an older
//! epoch means the result belongs to a range the user has left.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct RangeEpoch {
    counter: Arc<AtomicU64>,
}

impl RangeEpoch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u64 {
        self.counter.load(Ordering::Acquire)
    }

    /// Invalidates every outstanding ticket.
    pub fn advance(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn ticket(&self) -> EpochTicket {
        EpochTicket {
            epoch: self.current(),
            counter: Arc::clone(&self.counter),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EpochTicket {
    epoch: u64,
    counter: Arc<AtomicU64>,
}

impl EpochTicket {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn is_current(&self) -> bool {
        self.counter.load(Ordering::Acquire) == self.epoch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advancing_invalidates_outstanding_tickets() {
        let epoch = RangeEpoch::new();
        let ticket = epoch.ticket();
        assert!(ticket.is_current());

        let shared = epoch.clone();
        assert_eq!(shared.advance(), 1);
        assert!(!ticket.is_current());
        assert!(epoch.ticket().is_current());
        assert_eq!(epoch.current(), 1);
    }
}

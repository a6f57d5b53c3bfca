use std::sync::atomic::{AtomicU64, Ordering};

use peril_core::AckDecision;

/// Counters for one consumption loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStatsSnapshot {
    pub received: u64,
    pub acked: u64,
    pub discarded: u64,
    pub requeued: u64,
    pub decode_failures: u64,
    pub handler_panics: u64,
    pub settle_failures: u64,
}

impl ConsumerStatsSnapshot {
    /// Deliveries the broker accepted a settle for.
    pub fn settled(&self) -> u64 {
        self.acked + self.discarded + self.requeued
    }
}

#[derive(Debug, Default)]
pub(crate) struct ConsumerStats {
    received: AtomicU64,
    acked: AtomicU64,
    discarded: AtomicU64,
    requeued: AtomicU64,
    decode_failures: AtomicU64,
    handler_panics: AtomicU64,
    settle_failures: AtomicU64,
}

impl ConsumerStats {
    pub(crate) fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_handler_panic(&self) {
        self.handler_panics.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_settle_failure(&self) {
        self.settle_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_settled(&self, decision: AckDecision) {
        let counter = match decision {
            AckDecision::Ack => &self.acked,
            AckDecision::NackDiscard => &self.discarded,
            AckDecision::NackRequeue => &self.requeued,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> ConsumerStatsSnapshot {
        ConsumerStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            handler_panics: self.handler_panics.load(Ordering::Relaxed),
            settle_failures: self.settle_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use peril_core::AckDecision;

    use super::ConsumerStats;

    #[test]
    fn settled_counts_each_decision_once() {
        let stats = ConsumerStats::default();
        stats.record_received();
        stats.record_received();
        stats.record_received();
        stats.record_settled(AckDecision::Ack);
        stats.record_settled(AckDecision::NackDiscard);
        stats.record_settled(AckDecision::NackRequeue);
        stats.record_decode_failure();

        let snap = stats.snapshot();
        assert_eq!(snap.received, 3);
        assert_eq!(snap.settled(), 3);
        assert_eq!((snap.acked, snap.discarded, snap.requeued), (1, 1, 1));
        assert_eq!(snap.decode_failures, 1);
        assert_eq!(snap.handler_panics, 0);
    }
}

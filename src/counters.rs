use std::sync::atomic::{AtomicU64, Ordering};

/// ByteCounters tracks the relayed traffic of a single socket
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ByteCounters {
    pub bytes_read: u64,
    pub bytes_written: u64,
}

/// TrafficTotals aggregates relayed traffic across every socket that
/// references it. Totals only ever grow.
///
/// Share one instance (behind an `Arc`) between all sockets of a process
/// to get process-wide figures.
#[derive(Debug, Default)]
pub struct TrafficTotals {
    received: AtomicU64,
    sent: AtomicU64,
}

/// TrafficTotals implementation block
impl TrafficTotals {
    /// new is a constructor for the TrafficTotals type
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn total_sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    fn add_received(&self, n: u64) {
        self.received.fetch_add(n, Ordering::Relaxed);
    }

    fn add_sent(&self, n: u64) {
        self.sent.fetch_add(n, Ordering::Relaxed);
    }
}

/// ByteCounters implementation block
impl ByteCounters {
    /// record_read counts `n` relayed inbound bytes here and in `totals`
    pub fn record_read(&mut self, totals: &TrafficTotals, n: usize) {
        self.bytes_read += n as u64;
        totals.add_received(n as u64);
    }

    /// record_written counts `n` relayed outbound bytes here and in `totals`
    pub fn record_written(&mut self, totals: &TrafficTotals, n: usize) {
        self.bytes_written += n as u64;
        totals.add_sent(n as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn counters_feed_shared_totals() {
        let totals = TrafficTotals::new();
        let mut a = ByteCounters::default();
        let mut b = ByteCounters::default();

        a.record_read(&totals, 10);
        b.record_read(&totals, 5);
        a.record_written(&totals, 3);

        assert_eq!(a.bytes_read, 10);
        assert_eq!(a.bytes_written, 3);
        assert_eq!(b.bytes_read, 5);
        assert_eq!(b.bytes_written, 0);
        assert_eq!(totals.total_received(), 15);
        assert_eq!(totals.total_sent(), 3);
    }

    #[test]
    fn totals_are_consistent_across_threads() {
        let totals = Arc::new(TrafficTotals::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let totals = Arc::clone(&totals);
                thread::spawn(move || {
                    let mut counters = ByteCounters::default();
                    for _ in 0..1000 {
                        counters.record_read(&totals, 2);
                        counters.record_written(&totals, 1);
                    }
                    counters
                })
            })
            .collect();

        for handle in handles {
            let counters = handle.join().unwrap();
            assert_eq!(counters.bytes_read, 2000);
            assert_eq!(counters.bytes_written, 1000);
        }

        assert_eq!(totals.total_received(), 16_000);
        assert_eq!(totals.total_sent(), 8_000);
    }
}

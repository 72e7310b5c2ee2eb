use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Per-worker forwarding counters.
///
/// Incremented by the owning worker; readable from any thread for status
/// snapshots, so the fields are atomics with relaxed ordering.
#[derive(Debug, Default)]
pub struct WorkerCounters {
    pub n_in_interests: AtomicU64,
    pub n_out_interests: AtomicU64,
    pub n_in_data: AtomicU64,
    pub n_out_data: AtomicU64,
    pub n_in_nacks: AtomicU64,
    pub n_out_nacks: AtomicU64,
    pub n_satisfied_interests: AtomicU64,
    pub n_unsatisfied_interests: AtomicU64,
    pub n_cs_hits: AtomicU64,
    pub n_cs_misses: AtomicU64,
    pub n_unsolicited_data: AtomicU64,
    /// Packets refused at the inbound rings (admission control).
    pub n_queue_drops: AtomicU64,
    /// Packets refused by the pipelines (violations, down faces, no match).
    pub n_pipeline_drops: AtomicU64,
    /// Live table sizes, republished by the worker after each batch.
    pub pit_entries: AtomicU64,
    pub cs_entries: AtomicU64,
}

impl WorkerCounters {
    pub fn snapshot(&self) -> CountersSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        CountersSnapshot {
            n_in_interests: get(&self.n_in_interests),
            n_out_interests: get(&self.n_out_interests),
            n_in_data: get(&self.n_in_data),
            n_out_data: get(&self.n_out_data),
            n_in_nacks: get(&self.n_in_nacks),
            n_out_nacks: get(&self.n_out_nacks),
            n_satisfied_interests: get(&self.n_satisfied_interests),
            n_unsatisfied_interests: get(&self.n_unsatisfied_interests),
            n_cs_hits: get(&self.n_cs_hits),
            n_cs_misses: get(&self.n_cs_misses),
            n_unsolicited_data: get(&self.n_unsolicited_data),
            n_queue_drops: get(&self.n_queue_drops),
            n_pipeline_drops: get(&self.n_pipeline_drops),
            pit_entries: get(&self.pit_entries),
            cs_entries: get(&self.cs_entries),
        }
    }
}

/// Point-in-time copy of `WorkerCounters`, also used for aggregated totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CountersSnapshot {
    pub n_in_interests: u64,
    pub n_out_interests: u64,
    pub n_in_data: u64,
    pub n_out_data: u64,
    pub n_in_nacks: u64,
    pub n_out_nacks: u64,
    pub n_satisfied_interests: u64,
    pub n_unsatisfied_interests: u64,
    pub n_cs_hits: u64,
    pub n_cs_misses: u64,
    pub n_unsolicited_data: u64,
    pub n_queue_drops: u64,
    pub n_pipeline_drops: u64,
    pub pit_entries: u64,
    pub cs_entries: u64,
}

impl CountersSnapshot {
    /// Accumulate another worker's snapshot into this one.
    pub fn merge(&mut self, other: &CountersSnapshot) {
        self.n_in_interests += other.n_in_interests;
        self.n_out_interests += other.n_out_interests;
        self.n_in_data += other.n_in_data;
        self.n_out_data += other.n_out_data;
        self.n_in_nacks += other.n_in_nacks;
        self.n_out_nacks += other.n_out_nacks;
        self.n_satisfied_interests += other.n_satisfied_interests;
        self.n_unsatisfied_interests += other.n_unsatisfied_interests;
        self.n_cs_hits += other.n_cs_hits;
        self.n_cs_misses += other.n_cs_misses;
        self.n_unsolicited_data += other.n_unsolicited_data;
        self.n_queue_drops += other.n_queue_drops;
        self.n_pipeline_drops += other.n_pipeline_drops;
        self.pit_entries += other.pit_entries;
        self.cs_entries += other.cs_entries;
    }
}

/// Convenience increment helper.
pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Store a gauge value.
pub(crate) fn gauge(counter: &AtomicU64, value: u64) {
    counter.store(value, Ordering::Relaxed);
}

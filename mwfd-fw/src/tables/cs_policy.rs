use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Instant;

use crate::tables::cs::{CsEntry, CsEntryId};

/// Replacement policy attached to a content store.
///
/// The CS calls `after_insert`, `after_refresh`, `before_use` and
/// `before_erase` exactly once per event; `before_erase` is only called for
/// erasures the policy did not itself decide (staleness, explicit erase).
/// While the store is over its limit, the CS pulls victims with
/// `evict_one`; a returned id is already forgotten by the policy and the CS
/// removes it structurally without a further `before_erase`.
pub trait CsPolicy: Send {
    fn policy_name(&self) -> &'static str;
    fn after_insert(&mut self, id: CsEntryId, entry: &CsEntry);
    fn after_refresh(&mut self, id: CsEntryId, entry: &CsEntry);
    fn before_use(&mut self, id: CsEntryId, entry: &CsEntry);
    fn before_erase(&mut self, id: CsEntryId);
    fn evict_one(&mut self) -> Option<CsEntryId>;
    fn len(&self) -> usize;
}

/// Instantiate a policy by its configuration name.
pub fn create_policy(name: &str) -> Option<Box<dyn CsPolicy>> {
    match name {
        LruPolicy::NAME => Some(Box::new(LruPolicy::new())),
        LfuPolicy::NAME => Some(Box::new(LfuPolicy::new())),
        PriorityPolicy::NAME => Some(Box::new(PriorityPolicy::new())),
        _ => None,
    }
}

/// Least-recently-used: a recency queue ordered by a monotonic sequence;
/// `before_use` moves the entry to the tail, eviction pops the head.
pub struct LruPolicy {
    seq: u64,
    queue: BTreeMap<u64, CsEntryId>,
    position: HashMap<CsEntryId, u64>,
}

impl LruPolicy {
    pub const NAME: &'static str = "lru";

    pub fn new() -> Self {
        Self {
            seq: 0,
            queue: BTreeMap::new(),
            position: HashMap::new(),
        }
    }

    fn touch(&mut self, id: CsEntryId) {
        if let Some(old) = self.position.remove(&id) {
            self.queue.remove(&old);
        }
        self.seq += 1;
        self.queue.insert(self.seq, id);
        self.position.insert(id, self.seq);
    }
}

impl CsPolicy for LruPolicy {
    fn policy_name(&self) -> &'static str {
        Self::NAME
    }

    fn after_insert(&mut self, id: CsEntryId, _entry: &CsEntry) {
        self.touch(id);
    }

    fn after_refresh(&mut self, id: CsEntryId, _entry: &CsEntry) {
        self.touch(id);
    }

    fn before_use(&mut self, id: CsEntryId, _entry: &CsEntry) {
        self.touch(id);
    }

    fn before_erase(&mut self, id: CsEntryId) {
        if let Some(seq) = self.position.remove(&id) {
            self.queue.remove(&seq);
        }
    }

    fn evict_one(&mut self) -> Option<CsEntryId> {
        let (&seq, &id) = self.queue.iter().next()?;
        self.queue.remove(&seq);
        self.position.remove(&id);
        Some(id)
    }

    fn len(&self) -> usize {
        self.queue.len()
    }
}

impl Default for LruPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// How many touches pass between two aging rounds of the LFU policy.
const LFU_AGE_INTERVAL: u64 = 256;

/// Least-frequently-used with aging: eviction removes the entry with the
/// lowest use count; counts are periodically halved so formerly popular
/// entries decay.
pub struct LfuPolicy {
    seq: u64,
    touches: u64,
    ordered: BTreeSet<(u64, u64, CsEntryId)>,
    stats: HashMap<CsEntryId, (u64, u64)>,
}

impl LfuPolicy {
    pub const NAME: &'static str = "lfu";

    pub fn new() -> Self {
        Self {
            seq: 0,
            touches: 0,
            ordered: BTreeSet::new(),
            stats: HashMap::new(),
        }
    }

    fn bump(&mut self, id: CsEntryId) {
        self.seq += 1;
        let (freq, _) = self.stats.get(&id).copied().unwrap_or((0, 0));
        if freq > 0 {
            self.ordered
                .remove(&(freq, self.stats[&id].1, id));
        }
        self.stats.insert(id, (freq + 1, self.seq));
        self.ordered.insert((freq + 1, self.seq, id));

        self.touches += 1;
        if self.touches % LFU_AGE_INTERVAL == 0 {
            self.age();
        }
    }

    fn age(&mut self) {
        let mut aged = BTreeSet::new();
        for (&id, stat) in self.stats.iter_mut() {
            stat.0 = (stat.0 / 2).max(1);
            aged.insert((stat.0, stat.1, id));
        }
        self.ordered = aged;
    }
}

impl CsPolicy for LfuPolicy {
    fn policy_name(&self) -> &'static str {
        Self::NAME
    }

    fn after_insert(&mut self, id: CsEntryId, _entry: &CsEntry) {
        self.bump(id);
    }

    fn after_refresh(&mut self, id: CsEntryId, _entry: &CsEntry) {
        self.bump(id);
    }

    fn before_use(&mut self, id: CsEntryId, _entry: &CsEntry) {
        self.bump(id);
    }

    fn before_erase(&mut self, id: CsEntryId) {
        if let Some((freq, seq)) = self.stats.remove(&id) {
            self.ordered.remove(&(freq, seq, id));
        }
    }

    fn evict_one(&mut self) -> Option<CsEntryId> {
        let &(freq, seq, id) = self.ordered.iter().next()?;
        self.ordered.remove(&(freq, seq, id));
        self.stats.remove(&id);
        Some(id)
    }

    fn len(&self) -> usize {
        self.stats.len()
    }
}

impl Default for LfuPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// Weighted score over remaining freshness, payload size and use count;
/// the lowest-scored entry is evicted first.
pub struct PriorityPolicy {
    origin: Instant,
    ordered: BTreeSet<(i64, CsEntryId)>,
    scores: HashMap<CsEntryId, i64>,
    uses: HashMap<CsEntryId, u64>,
}

impl PriorityPolicy {
    pub const NAME: &'static str = "priority";

    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            ordered: BTreeSet::new(),
            scores: HashMap::new(),
            uses: HashMap::new(),
        }
    }

    fn score(&self, id: CsEntryId, entry: &CsEntry) -> i64 {
        let freshness_ms = entry
            .staleness_deadline
            .map(|deadline| deadline.saturating_duration_since(self.origin).as_millis() as i64)
            .unwrap_or(0);
        let size_kib = (entry.data.content.len() / 1024) as i64;
        let uses = self.uses.get(&id).copied().unwrap_or(0) as i64;
        freshness_ms / 100 + uses * 50 - size_kib
    }

    fn rescore(&mut self, id: CsEntryId, entry: &CsEntry) {
        if let Some(old) = self.scores.remove(&id) {
            self.ordered.remove(&(old, id));
        }
        let score = self.score(id, entry);
        self.scores.insert(id, score);
        self.ordered.insert((score, id));
    }
}

impl CsPolicy for PriorityPolicy {
    fn policy_name(&self) -> &'static str {
        Self::NAME
    }

    fn after_insert(&mut self, id: CsEntryId, entry: &CsEntry) {
        self.uses.insert(id, 0);
        self.rescore(id, entry);
    }

    fn after_refresh(&mut self, id: CsEntryId, entry: &CsEntry) {
        self.rescore(id, entry);
    }

    fn before_use(&mut self, id: CsEntryId, entry: &CsEntry) {
        *self.uses.entry(id).or_default() += 1;
        self.rescore(id, entry);
    }

    fn before_erase(&mut self, id: CsEntryId) {
        if let Some(score) = self.scores.remove(&id) {
            self.ordered.remove(&(score, id));
        }
        self.uses.remove(&id);
    }

    fn evict_one(&mut self) -> Option<CsEntryId> {
        let &(score, id) = self.ordered.iter().next()?;
        self.ordered.remove(&(score, id));
        self.scores.remove(&id);
        self.uses.remove(&id);
        Some(id)
    }

    fn len(&self) -> usize {
        self.scores.len()
    }
}

impl Default for PriorityPolicy {
    fn default() -> Self {
        Self::new()
    }
}

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use log::{debug, trace};
use mwfd_core::name::Name;
use mwfd_core::packets::{Data, Interest};

use crate::tables::cs_policy::{create_policy, CsPolicy, LruPolicy};
use crate::tables::name_tree::{NameTree, NodeId, TableSlot};

pub type CsEntryId = u64;

/// One cached Data packet.
#[derive(Debug, Clone)]
pub struct CsEntry {
    pub name: Name,
    pub data: Data,
    pub received_at: Instant,
    /// Absent when the Data carries no freshness period; such Data is never
    /// fresh.
    pub staleness_deadline: Option<Instant>,
    pub unsolicited: bool,
}

impl CsEntry {
    pub fn is_fresh(&self, now: Instant) -> bool {
        self.staleness_deadline.map_or(false, |d| d > now)
    }

    pub fn is_stale(&self, now: Instant) -> bool {
        self.staleness_deadline.map_or(false, |d| d <= now)
    }
}

/// Content store configuration
#[derive(Debug, Clone)]
pub struct CsConfig {
    pub capacity: usize,
    /// Cap on the prefix-match view; `None` leaves only `capacity`.
    pub pm_limit: Option<usize>,
    /// Cap on the exact-match view; `None` leaves only `capacity`.
    pub em_limit: Option<usize>,
    /// Maintain the exact-match hash view next to the prefix view.
    pub dual_index: bool,
    pub admit: bool,
    pub serve: bool,
    pub policy: String,
}

impl Default for CsConfig {
    fn default() -> Self {
        Self {
            capacity: 65536,
            pm_limit: None,
            em_limit: None,
            dual_index: true,
            admit: true,
            serve: true,
            policy: LruPolicy::NAME.to_string(),
        }
    }
}

/// Name-indexed cache of Data packets with a pluggable replacement policy.
///
/// Two views are maintained when dual indexing is on: the trie-ordered
/// prefix view answering CanBePrefix lookups and a hash view for exact-name
/// lookups. Both views always hold the same entry set, so each view's cap
/// bounds the whole store.
pub struct Cs {
    entries: HashMap<CsEntryId, CsEntry>,
    prefix_index: BTreeMap<Name, CsEntryId>,
    exact_index: HashMap<Name, CsEntryId>,
    nodes: HashMap<CsEntryId, NodeId>,
    policy: Box<dyn CsPolicy>,
    limit: usize,
    pm_limit: Option<usize>,
    em_limit: Option<usize>,
    dual_index: bool,
    admit: bool,
    serve: bool,
    next_id: CsEntryId,
}

impl Cs {
    pub fn new(config: &CsConfig) -> Self {
        let policy = create_policy(&config.policy)
            .unwrap_or_else(|| Box::new(LruPolicy::new()));
        Self {
            entries: HashMap::new(),
            prefix_index: BTreeMap::new(),
            exact_index: HashMap::new(),
            nodes: HashMap::new(),
            policy,
            limit: config.capacity,
            pm_limit: config.pm_limit,
            em_limit: config.em_limit,
            dual_index: config.dual_index,
            admit: config.admit,
            serve: config.serve,
            next_id: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// The tightest of the overall and per-view caps.
    pub fn effective_limit(&self) -> usize {
        let mut limit = self.limit;
        if let Some(pm) = self.pm_limit {
            limit = limit.min(pm);
        }
        if let Some(em) = self.em_limit {
            if self.dual_index {
                limit = limit.min(em);
            }
        }
        limit
    }

    pub fn admit_enabled(&self) -> bool {
        self.admit
    }

    pub fn set_admit(&mut self, admit: bool) {
        self.admit = admit;
    }

    pub fn set_serve(&mut self, serve: bool) {
        self.serve = serve;
    }

    pub fn set_limit(&mut self, tree: &mut NameTree, limit: usize) {
        self.limit = limit;
        self.enforce_limit(tree);
    }

    pub fn set_pm_limit(&mut self, tree: &mut NameTree, limit: Option<usize>) {
        self.pm_limit = limit;
        self.enforce_limit(tree);
    }

    pub fn set_em_limit(&mut self, tree: &mut NameTree, limit: Option<usize>) {
        self.em_limit = limit;
        self.enforce_limit(tree);
    }

    /// Admit a Data packet. Returns false when admission is disabled or the
    /// store cannot hold anything. An existing entry under the same name is
    /// refreshed in place.
    pub fn insert(
        &mut self,
        tree: &mut NameTree,
        data: Data,
        now: Instant,
        unsolicited: bool,
    ) -> bool {
        if !self.admit || self.effective_limit() == 0 {
            return false;
        }
        let name = data.name.clone();
        if let Some(&id) = self.prefix_index.get(&name) {
            let entry = self.entries.get_mut(&id).unwrap();
            entry.staleness_deadline = data.staleness_deadline(now);
            entry.received_at = now;
            entry.data = data;
            entry.unsolicited &= unsolicited;
            let entry = self.entries[&id].clone();
            self.policy.after_refresh(id, &entry);
            trace!("cs: refreshed {name}");
            return true;
        }

        let id = self.next_id;
        self.next_id += 1;
        let entry = CsEntry {
            name: name.clone(),
            staleness_deadline: data.staleness_deadline(now),
            data,
            received_at: now,
            unsolicited,
        };
        let node = tree.lookup_or_insert(&name);
        tree.attach(node, TableSlot::Cs);
        self.nodes.insert(id, node);
        self.prefix_index.insert(name.clone(), id);
        if self.dual_index {
            self.exact_index.insert(name.clone(), id);
        }
        self.policy.after_insert(id, &entry);
        self.entries.insert(id, entry);
        trace!("cs: inserted {name}");
        self.enforce_limit(tree);
        true
    }

    /// Find a Data satisfying the Interest. The view is chosen by the
    /// CanBePrefix flag; MustBeFresh filters on the staleness deadline.
    pub fn lookup(&mut self, interest: &Interest, now: Instant) -> Option<Data> {
        if !self.serve {
            return None;
        }
        let id = if interest.can_be_prefix {
            self.lookup_prefix(interest, now)?
        } else {
            self.lookup_exact(interest, now)?
        };
        let entry = self.entries.get(&id).unwrap().clone();
        self.policy.before_use(id, &entry);
        Some(entry.data)
    }

    fn lookup_exact(&self, interest: &Interest, now: Instant) -> Option<CsEntryId> {
        let id = if self.dual_index {
            *self.exact_index.get(&interest.name)?
        } else {
            *self.prefix_index.get(&interest.name)?
        };
        let entry = &self.entries[&id];
        if interest.must_be_fresh && !entry.is_fresh(now) {
            return None;
        }
        Some(id)
    }

    fn lookup_prefix(&self, interest: &Interest, now: Instant) -> Option<CsEntryId> {
        // Trie order puts every name under the prefix in one contiguous
        // range starting at the prefix itself.
        for (name, &id) in self.prefix_index.range(interest.name.clone()..) {
            if !interest.name.is_prefix_of(name) {
                break;
            }
            let entry = &self.entries[&id];
            if interest.must_be_fresh && !entry.is_fresh(now) {
                continue;
            }
            return Some(id);
        }
        None
    }

    /// Erase every stale entry. Invoked by the worker's staleness sweep.
    pub fn evict_stale(&mut self, tree: &mut NameTree, now: Instant) -> usize {
        let stale: Vec<CsEntryId> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_stale(now))
            .map(|(&id, _)| id)
            .collect();
        let count = stale.len();
        for id in stale {
            self.policy.before_erase(id);
            self.erase_structurally(tree, id);
        }
        if count > 0 {
            debug!("cs: swept {count} stale entries");
        }
        count
    }

    /// Erase the entry under `name`, if present.
    pub fn erase(&mut self, tree: &mut NameTree, name: &Name) -> bool {
        let Some(&id) = self.prefix_index.get(name) else {
            return false;
        };
        self.policy.before_erase(id);
        self.erase_structurally(tree, id);
        true
    }

    pub fn contains(&self, name: &Name) -> bool {
        self.prefix_index.contains_key(name)
    }

    fn enforce_limit(&mut self, tree: &mut NameTree) {
        let limit = self.effective_limit();
        while self.entries.len() > limit {
            // The policy already forgot the victim; no before_erase here.
            let Some(victim) = self.policy.evict_one() else {
                break;
            };
            debug!("cs: evicting {}", self.entries[&victim].name);
            self.erase_structurally(tree, victim);
        }
    }

    fn erase_structurally(&mut self, tree: &mut NameTree, id: CsEntryId) {
        if let Some(entry) = self.entries.remove(&id) {
            self.prefix_index.remove(&entry.name);
            self.exact_index.remove(&entry.name);
            if let Some(node) = self.nodes.remove(&id) {
                tree.detach(node, TableSlot::Cs);
            }
        }
    }

    #[cfg(test)]
    fn views_consistent(&self) -> bool {
        if !self.dual_index {
            return self.exact_index.is_empty();
        }
        self.prefix_index.len() == self.exact_index.len()
            && self
                .prefix_index
                .iter()
                .all(|(name, id)| self.exact_index.get(name) == Some(id))
    }
}

use std::collections::HashMap;
use std::time::Instant;

use mwfd_core::lp::NackReason;
use mwfd_core::name::Name;
use mwfd_core::packets::{Data, Interest};

use crate::face::FaceId;
use crate::tables::name_tree::{NameTree, NodeId, TableSlot};

pub type PitEntryId = u64;

/// PIT entries are keyed by name plus the selector tuple, so Interests that
/// differ only in selectors occupy distinct entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PitKey {
    pub name: Name,
    pub can_be_prefix: bool,
    pub must_be_fresh: bool,
    /// First delegation of the forwarding hint, or empty when absent.
    pub hint: Name,
}

impl PitKey {
    pub fn from_interest(interest: &Interest) -> Self {
        Self {
            name: interest.name.clone(),
            can_be_prefix: interest.can_be_prefix,
            must_be_fresh: interest.must_be_fresh,
            hint: interest
                .forwarding_hint
                .first()
                .cloned()
                .unwrap_or_default(),
        }
    }
}

/// Record of a downstream that requested the Data.
#[derive(Debug, Clone)]
pub struct InRecord {
    pub face: FaceId,
    pub nonce: u32,
    pub interest: Interest,
    pub expiry: Instant,
}

/// Record of an upstream the Interest was forwarded to.
#[derive(Debug, Clone)]
pub struct OutRecord {
    pub face: FaceId,
    pub nonce: u32,
    pub expiry: Instant,
    pub nack: Option<NackReason>,
}

/// Where a nonce was found during loop detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateNonce {
    None,
    /// Same nonce from the same downstream: a retransmission, not a loop.
    InRecordSameFace,
    InRecordOtherFace,
    OutRecord,
}

#[derive(Debug)]
pub struct PitEntry {
    pub id: PitEntryId,
    pub key: PitKey,
    node: NodeId,
    /// The Interest that created the entry; consulted for the forwarding
    /// hint and as the representative packet of the entry.
    pub interest: Interest,
    /// Worker that owns this entry; stamped into outgoing PitTokens.
    pub worker_id: u32,
    in_records: HashMap<FaceId, InRecord>,
    out_records: HashMap<FaceId, OutRecord>,
    /// When the entry should be erased; kept at the maximum in-record
    /// expiry while downstreams are waiting.
    pub expiry: Instant,
    /// Bumped on every reschedule so stale timer events are ignored.
    pub timer_epoch: u64,
    pub satisfied: bool,
}

impl PitEntry {
    pub fn name(&self) -> &Name {
        &self.key.name
    }

    pub fn in_record(&self, face: FaceId) -> Option<&InRecord> {
        self.in_records.get(&face)
    }

    pub fn in_records(&self) -> impl Iterator<Item = &InRecord> {
        self.in_records.values()
    }

    pub fn in_record_count(&self) -> usize {
        self.in_records.len()
    }

    pub fn has_in_records(&self) -> bool {
        !self.in_records.is_empty()
    }

    pub fn out_record(&self, face: FaceId) -> Option<&OutRecord> {
        self.out_records.get(&face)
    }

    pub fn out_records(&self) -> impl Iterator<Item = &OutRecord> {
        self.out_records.values()
    }

    pub fn has_out_records(&self) -> bool {
        !self.out_records.is_empty()
    }

    /// Insert or refresh the in-record for a downstream. At most one record
    /// per face exists.
    pub fn upsert_in_record(&mut self, face: FaceId, interest: &Interest, expiry: Instant) {
        self.in_records.insert(
            face,
            InRecord {
                face,
                nonce: interest.nonce.unwrap_or_default(),
                interest: interest.clone(),
                expiry,
            },
        );
    }

    pub fn remove_in_record(&mut self, face: FaceId) -> Option<InRecord> {
        self.in_records.remove(&face)
    }

    pub fn clear_in_records(&mut self) {
        self.in_records.clear();
    }

    /// Insert or refresh the out-record for an upstream, clearing any
    /// recorded Nack.
    pub fn upsert_out_record(&mut self, face: FaceId, nonce: u32, expiry: Instant) {
        self.out_records.insert(
            face,
            OutRecord {
                face,
                nonce,
                expiry,
                nack: None,
            },
        );
    }

    pub fn remove_out_record(&mut self, face: FaceId) -> Option<OutRecord> {
        self.out_records.remove(&face)
    }

    /// Record a Nack on the upstream's out-record. Fails unless the
    /// out-record exists and carries the same nonce.
    pub fn record_nack(&mut self, face: FaceId, nonce: u32, reason: NackReason) -> bool {
        match self.out_records.get_mut(&face) {
            Some(record) if record.nonce == nonce => {
                record.nack = Some(reason);
                true
            }
            _ => false,
        }
    }

    /// Whether every upstream has answered with a Nack.
    pub fn all_out_records_nacked(&self) -> bool {
        !self.out_records.is_empty() && self.out_records.values().all(|r| r.nack.is_some())
    }

    /// Least severe reason among recorded Nacks.
    pub fn least_severe_nack(&self) -> Option<NackReason> {
        let mut least: Option<NackReason> = None;
        for record in self.out_records.values() {
            if let Some(reason) = record.nack {
                least = Some(match least {
                    Some(current) if !reason.is_less_severe(current) => current,
                    _ => reason,
                });
            }
        }
        least
    }

    pub fn find_nonce(&self, nonce: u32, face: FaceId) -> DuplicateNonce {
        for record in self.in_records.values() {
            if record.nonce == nonce {
                return if record.face == face {
                    DuplicateNonce::InRecordSameFace
                } else {
                    DuplicateNonce::InRecordOtherFace
                };
            }
        }
        if self.out_records.values().any(|r| r.nonce == nonce) {
            return DuplicateNonce::OutRecord;
        }
        DuplicateNonce::None
    }

    /// Maximum in-record expiry, the deadline the entry timer tracks while
    /// any downstream is waiting.
    pub fn max_in_record_expiry(&self) -> Option<Instant> {
        self.in_records.values().map(|r| r.expiry).max()
    }

    /// Whether any upstream is still awaited at `now`.
    pub fn has_pending_out_records(&self, now: Instant) -> bool {
        self.out_records
            .values()
            .any(|r| r.nack.is_none() && r.expiry > now)
    }
}

/// Pending Interest Table of one worker.
pub struct Pit {
    entries: HashMap<PitEntryId, PitEntry>,
    index: HashMap<PitKey, PitEntryId>,
    by_name: HashMap<Name, Vec<PitEntryId>>,
    next_id: PitEntryId,
}

impl Pit {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            index: HashMap::new(),
            by_name: HashMap::new(),
            next_id: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: PitEntryId) -> Option<&PitEntry> {
        self.entries.get(&id)
    }

    pub fn get_mut(&mut self, id: PitEntryId) -> Option<&mut PitEntry> {
        self.entries.get_mut(&id)
    }

    pub fn find(&self, key: &PitKey) -> Option<PitEntryId> {
        self.index.get(key).copied()
    }

    /// Find the entry matching the Interest's key, creating it when absent.
    /// Returns the entry id and whether it was created.
    pub fn find_or_insert(
        &mut self,
        tree: &mut NameTree,
        interest: &Interest,
        worker_id: u32,
        now: Instant,
    ) -> (PitEntryId, bool) {
        let key = PitKey::from_interest(interest);
        if let Some(id) = self.find(&key) {
            return (id, false);
        }
        let node = tree.lookup_or_insert(&key.name);
        tree.attach(node, TableSlot::Pit);
        let id = self.next_id;
        self.next_id += 1;
        self.by_name.entry(key.name.clone()).or_default().push(id);
        self.index.insert(key.clone(), id);
        self.entries.insert(
            id,
            PitEntry {
                id,
                key,
                node,
                interest: interest.clone(),
                worker_id,
                in_records: HashMap::new(),
                out_records: HashMap::new(),
                expiry: now,
                timer_epoch: 0,
                satisfied: false,
            },
        );
        (id, true)
    }

    /// All unsatisfied entries the Data can satisfy: exact-name entries,
    /// prefix entries with CanBePrefix, gated on arrival freshness for
    /// MustBeFresh.
    pub fn find_all_satisfied_by(&self, data: &Data) -> Vec<PitEntryId> {
        let mut matches = Vec::new();
        let fresh = data.is_fresh_on_arrival();
        for length in 0..=data.name.len() {
            let prefix = data.name.get_prefix(length);
            let Some(ids) = self.by_name.get(&prefix) else {
                continue;
            };
            for &id in ids {
                let entry = &self.entries[&id];
                if entry.satisfied {
                    continue;
                }
                if length < data.name.len() && !entry.key.can_be_prefix {
                    continue;
                }
                if entry.key.must_be_fresh && !fresh {
                    continue;
                }
                matches.push(id);
            }
        }
        matches
    }

    pub fn erase(&mut self, tree: &mut NameTree, id: PitEntryId) -> Option<PitEntry> {
        let entry = self.entries.remove(&id)?;
        self.index.remove(&entry.key);
        if let Some(ids) = self.by_name.get_mut(entry.name()) {
            ids.retain(|&other| other != id);
            if ids.is_empty() {
                self.by_name.remove(entry.name());
            }
        }
        tree.detach(entry.node, TableSlot::Pit);
        Some(entry)
    }

    /// Entries whose names lie under `prefix`; used by the afterNewNextHop
    /// trigger.
    pub fn entries_under_prefix(&self, prefix: &Name) -> Vec<PitEntryId> {
        self.by_name
            .iter()
            .filter(|(name, _)| prefix.is_prefix_of(name))
            .flat_map(|(_, ids)| ids.iter().copied())
            .collect()
    }

    pub fn ids(&self) -> Vec<PitEntryId> {
        self.entries.keys().copied().collect()
    }
}

impl Default for Pit {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn name(uri: &str) -> Name {
        Name::from_uri(uri).unwrap()
    }

    fn interest(uri: &str, nonce: u32) -> Interest {
        Interest::new(name(uri)).with_nonce(nonce)
    }

    #[test]
    fn test_at_most_one_record_per_face() {
        let mut tree = NameTree::new();
        let mut pit = Pit::new();
        let now = Instant::now();
        let (id, created) =
            pit.find_or_insert(&mut tree, &interest("/a", 1), 0, now);
        assert!(created);

        let entry = pit.get_mut(id).unwrap();
        entry.upsert_in_record(1, &interest("/a", 1), now);
        entry.upsert_in_record(1, &interest("/a", 2), now + Duration::from_secs(1));
        assert_eq!(entry.in_record_count(), 1);
        assert_eq!(entry.in_record(1).unwrap().nonce, 2);

        entry.upsert_out_record(3, 7, now);
        entry.upsert_out_record(3, 8, now);
        assert_eq!(entry.out_records().count(), 1);
        assert_eq!(entry.out_record(3).unwrap().nonce, 8);
    }

    #[test]
    fn test_selector_tuple_distinguishes_entries() {
        let mut tree = NameTree::new();
        let mut pit = Pit::new();
        let now = Instant::now();
        let plain = interest("/a", 1);
        let prefix = interest("/a", 1).with_can_be_prefix(true);
        let (id1, _) = pit.find_or_insert(&mut tree, &plain, 0, now);
        let (id2, _) = pit.find_or_insert(&mut tree, &prefix, 0, now);
        assert_ne!(id1, id2);
        assert_eq!(pit.len(), 2);

        pit.erase(&mut tree, id1);
        // The shared name-tree node survives until the second entry goes.
        assert!(tree.lookup(&name("/a")).is_some());
        pit.erase(&mut tree, id2);
        assert!(tree.lookup(&name("/a")).is_none());
    }

    #[test]
    fn test_duplicate_nonce_detection() {
        let mut tree = NameTree::new();
        let mut pit = Pit::new();
        let now = Instant::now();
        let (id, _) =
            pit.find_or_insert(&mut tree, &interest("/y", 5), 0, now);
        let entry = pit.get_mut(id).unwrap();
        entry.upsert_in_record(1, &interest("/y", 5), now);

        assert_eq!(entry.find_nonce(5, 1), DuplicateNonce::InRecordSameFace);
        assert_eq!(entry.find_nonce(5, 2), DuplicateNonce::InRecordOtherFace);
        assert_eq!(entry.find_nonce(6, 2), DuplicateNonce::None);

        entry.upsert_out_record(3, 9, now);
        assert_eq!(entry.find_nonce(9, 2), DuplicateNonce::OutRecord);
    }

    #[test]
    fn test_satisfaction_matching() {
        let mut tree = NameTree::new();
        let mut pit = Pit::new();
        let now = Instant::now();
        let (exact, _) = pit.find_or_insert(&mut tree, &interest("/a/b", 1), 0, now);
        let (prefix, _) = pit.find_or_insert(
            &mut tree,
            &interest("/a", 2).with_can_be_prefix(true),
            0,
            now,
        );
        let (fresh_only, _) = pit.find_or_insert(
            &mut tree,
            &interest("/a/b", 3).with_must_be_fresh(true),
            0,
            now,
        );

        let stale = Data::new(name("/a/b"), Vec::new());
        let mut found = pit.find_all_satisfied_by(&stale);
        found.sort_unstable();
        assert_eq!(found, vec![exact, prefix]);

        let fresh = Data::new(name("/a/b"), Vec::new()).with_freshness(Duration::from_secs(1));
        let mut found = pit.find_all_satisfied_by(&fresh);
        found.sort_unstable();
        assert_eq!(found, vec![exact, prefix, fresh_only]);

        // A name outside every entry's namespace matches nothing.
        assert!(pit
            .find_all_satisfied_by(&Data::new(name("/z"), Vec::new()))
            .is_empty());
    }

    #[test]
    fn test_nack_recording_requires_nonce_match() {
        let mut tree = NameTree::new();
        let mut pit = Pit::new();
        let now = Instant::now();
        let (id, _) =
            pit.find_or_insert(&mut tree, &interest("/n", 1), 0, now);
        let entry = pit.get_mut(id).unwrap();
        entry.upsert_out_record(3, 42, now);

        assert!(!entry.record_nack(3, 41, NackReason::NoRoute));
        assert!(entry.out_record(3).unwrap().nack.is_none());
        assert!(entry.record_nack(3, 42, NackReason::NoRoute));
        assert!(entry.all_out_records_nacked());
        assert_eq!(entry.least_severe_nack(), Some(NackReason::NoRoute));
    }

    #[test]
    fn test_least_severe_nack() {
        let mut tree = NameTree::new();
        let mut pit = Pit::new();
        let now = Instant::now();
        let (id, _) =
            pit.find_or_insert(&mut tree, &interest("/n", 1), 0, now);
        let entry = pit.get_mut(id).unwrap();
        entry.upsert_out_record(3, 1, now);
        entry.upsert_out_record(4, 2, now);
        entry.record_nack(3, 1, NackReason::NoRoute);
        assert!(!entry.all_out_records_nacked());
        entry.record_nack(4, 2, NackReason::Congestion);
        assert_eq!(entry.least_severe_nack(), Some(NackReason::Congestion));
    }

    #[test]
    fn test_max_in_record_expiry() {
        let mut tree = NameTree::new();
        let mut pit = Pit::new();
        let now = Instant::now();
        let (id, _) =
            pit.find_or_insert(&mut tree, &interest("/e", 1), 0, now);
        let entry = pit.get_mut(id).unwrap();
        entry.upsert_in_record(1, &interest("/e", 1), now + Duration::from_secs(2));
        entry.upsert_in_record(2, &interest("/e", 2), now + Duration::from_secs(5));
        assert_eq!(
            entry.max_in_record_expiry(),
            Some(now + Duration::from_secs(5))
        );
    }
}

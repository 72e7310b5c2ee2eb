use std::collections::HashMap;

use log::debug;
use mwfd_core::name::Name;

use crate::face::FaceId;
use crate::tables::name_tree::{NameTree, NodeId, TableSlot};

/// One upstream of a FIB entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NextHop {
    pub face: FaceId,
    pub cost: u32,
    pub flags: u64,
}

/// Routing entry: a name prefix and its next-hops, unique by face and
/// sorted by ascending cost.
#[derive(Debug, Clone, PartialEq)]
pub struct FibEntry {
    pub name: Name,
    next_hops: Vec<NextHop>,
}

impl FibEntry {
    fn new(name: Name) -> Self {
        Self {
            name,
            next_hops: Vec::new(),
        }
    }

    pub fn next_hops(&self) -> &[NextHop] {
        &self.next_hops
    }

    pub fn has_next_hops(&self) -> bool {
        !self.next_hops.is_empty()
    }

    pub fn next_hop_for(&self, face: FaceId) -> Option<&NextHop> {
        self.next_hops.iter().find(|hop| hop.face == face)
    }

    fn upsert(&mut self, face: FaceId, cost: u32, flags: u64) -> bool {
        let added = match self.next_hops.iter_mut().find(|hop| hop.face == face) {
            Some(hop) => {
                hop.cost = cost;
                hop.flags = flags;
                false
            }
            None => {
                self.next_hops.push(NextHop { face, cost, flags });
                true
            }
        };
        self.next_hops.sort_by_key(|hop| (hop.cost, hop.face));
        added
    }
}

/// Outcome of a FIB update, for the afterNewNextHop trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FibUpdate {
    NewNextHop,
    UpdatedNextHop,
}

/// Forwarding Information Base, indexed through the NameTree.
pub struct Fib {
    entries: HashMap<NodeId, FibEntry>,
}

impl Fib {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Idempotent insert/update of a next-hop.
    pub fn insert(
        &mut self,
        tree: &mut NameTree,
        name: &Name,
        face: FaceId,
        cost: u32,
        flags: u64,
    ) -> FibUpdate {
        let node = tree.lookup_or_insert(name);
        let entry = self.entries.entry(node).or_insert_with(|| {
            tree.attach(node, TableSlot::Fib);
            FibEntry::new(name.clone())
        });
        if entry.upsert(face, cost, flags) {
            debug!("fib: new next-hop {face} for {name} (cost {cost})");
            FibUpdate::NewNextHop
        } else {
            FibUpdate::UpdatedNextHop
        }
    }

    /// Remove a next-hop; the entry disappears when its last next-hop goes.
    pub fn remove(&mut self, tree: &mut NameTree, name: &Name, face: FaceId) {
        let Some(node) = tree.lookup(name) else {
            return;
        };
        let Some(entry) = self.entries.get_mut(&node) else {
            return;
        };
        entry.next_hops.retain(|hop| hop.face != face);
        if entry.next_hops.is_empty() {
            self.entries.remove(&node);
            tree.detach(node, TableSlot::Fib);
            debug!("fib: entry {name} removed");
        }
    }

    /// Drop `face` from every entry, erasing entries that empty out.
    /// Used when a face closes.
    pub fn remove_face(&mut self, tree: &mut NameTree, face: FaceId) {
        let mut emptied = Vec::new();
        for (&node, entry) in self.entries.iter_mut() {
            entry.next_hops.retain(|hop| hop.face != face);
            if entry.next_hops.is_empty() {
                emptied.push(node);
            }
        }
        for node in emptied {
            self.entries.remove(&node);
            tree.detach(node, TableSlot::Fib);
        }
    }

    pub fn entry(&self, node: NodeId) -> Option<&FibEntry> {
        self.entries.get(&node)
    }

    pub fn find_exact(&self, tree: &NameTree, name: &Name) -> Option<&FibEntry> {
        self.entries.get(&tree.lookup(name)?)
    }

    /// Longest-prefix-match lookup: the deepest entry on the path of
    /// `name`, which is the root entry when nothing longer matches.
    pub fn find_longest_prefix_match(&self, tree: &NameTree, name: &Name) -> Option<&FibEntry> {
        let node = tree.longest_prefix_match(name, |t, n| t.has_fib(n))?;
        self.entries.get(&node)
    }
}

impl Default for Fib {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(uri: &str) -> Name {
        Name::from_uri(uri).unwrap()
    }

    #[test]
    fn test_insert_is_idempotent() {
        let mut tree = NameTree::new();
        let mut fib = Fib::new();
        assert_eq!(
            fib.insert(&mut tree, &name("/a"), 1, 10, 0),
            FibUpdate::NewNextHop
        );
        assert_eq!(
            fib.insert(&mut tree, &name("/a"), 1, 20, 0),
            FibUpdate::UpdatedNextHop
        );
        let entry = fib.find_exact(&tree, &name("/a")).unwrap();
        assert_eq!(entry.next_hops().len(), 1);
        assert_eq!(entry.next_hops()[0].cost, 20);
    }

    #[test]
    fn test_next_hops_sorted_by_cost() {
        let mut tree = NameTree::new();
        let mut fib = Fib::new();
        fib.insert(&mut tree, &name("/a"), 1, 30, 0);
        fib.insert(&mut tree, &name("/a"), 2, 10, 0);
        fib.insert(&mut tree, &name("/a"), 3, 20, 0);
        let faces: Vec<FaceId> = fib
            .find_exact(&tree, &name("/a"))
            .unwrap()
            .next_hops()
            .iter()
            .map(|hop| hop.face)
            .collect();
        assert_eq!(faces, vec![2, 3, 1]);
    }

    #[test]
    fn test_add_then_remove_is_noop() {
        let mut tree = NameTree::new();
        let mut fib = Fib::new();
        fib.insert(&mut tree, &name("/a"), 1, 10, 0);
        let before = fib.find_exact(&tree, &name("/a")).cloned();

        fib.insert(&mut tree, &name("/a"), 9, 99, 7);
        fib.remove(&mut tree, &name("/a"), 9);
        assert_eq!(fib.find_exact(&tree, &name("/a")).cloned(), before);

        // Removing the only next-hop erases the entry and its tree node.
        fib.remove(&mut tree, &name("/a"), 1);
        assert!(fib.find_exact(&tree, &name("/a")).is_none());
        assert!(tree.lookup(&name("/a")).is_none());
    }

    #[test]
    fn test_longest_prefix_match_falls_back_to_root() {
        let mut tree = NameTree::new();
        let mut fib = Fib::new();
        fib.insert(&mut tree, &name("/a/b"), 1, 10, 0);
        fib.insert(&mut tree, &Name::new(), 2, 1, 0);

        let hit = fib
            .find_longest_prefix_match(&tree, &name("/a/b/c"))
            .unwrap();
        assert_eq!(hit.name, name("/a/b"));

        let root = fib.find_longest_prefix_match(&tree, &name("/z")).unwrap();
        assert_eq!(root.name, Name::new());
        assert_eq!(root.next_hops()[0].face, 2);
    }

    #[test]
    fn test_remove_face_everywhere() {
        let mut tree = NameTree::new();
        let mut fib = Fib::new();
        fib.insert(&mut tree, &name("/a"), 1, 10, 0);
        fib.insert(&mut tree, &name("/a"), 2, 20, 0);
        fib.insert(&mut tree, &name("/b"), 1, 10, 0);
        fib.remove_face(&mut tree, 1);
        assert_eq!(
            fib.find_exact(&tree, &name("/a")).unwrap().next_hops().len(),
            1
        );
        assert!(fib.find_exact(&tree, &name("/b")).is_none());
    }
}

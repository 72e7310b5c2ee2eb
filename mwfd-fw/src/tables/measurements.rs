use std::collections::HashMap;
use std::time::{Duration, Instant};

use mwfd_core::name::Name;

use crate::tables::name_tree::{NameTree, NodeId, TableSlot};

/// How long an entry lives past its last access.
pub const MEASUREMENTS_LIFETIME: Duration = Duration::from_secs(16);

/// Per-prefix scratch space owned by the strategy layer: named numeric
/// values plus a sliding lifetime extended on every access.
#[derive(Debug)]
pub struct MeasurementsEntry {
    pub name: Name,
    values: HashMap<String, f64>,
    pub last_access: Instant,
    pub expiry: Instant,
}

impl MeasurementsEntry {
    pub fn get(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }

    pub fn set(&mut self, key: &str, value: f64) {
        self.values.insert(key.to_string(), value);
    }

    pub fn add(&mut self, key: &str, delta: f64) -> f64 {
        let value = self.values.entry(key.to_string()).or_insert(0.0);
        *value += delta;
        *value
    }

    /// Exponential moving average update, the usual form for RTT tracking.
    pub fn ewma(&mut self, key: &str, sample: f64, alpha: f64) -> f64 {
        let value = match self.values.get(key) {
            Some(&old) => old * (1.0 - alpha) + sample * alpha,
            None => sample,
        };
        self.values.insert(key.to_string(), value);
        value
    }
}

/// Measurements table of one worker.
pub struct Measurements {
    entries: HashMap<NodeId, MeasurementsEntry>,
    lifetime: Duration,
}

impl Measurements {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            lifetime: MEASUREMENTS_LIFETIME,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fetch the entry for `name`, creating it when absent, and slide its
    /// lifetime window.
    pub fn get_or_insert(
        &mut self,
        tree: &mut NameTree,
        name: &Name,
        now: Instant,
    ) -> &mut MeasurementsEntry {
        let node = tree.lookup_or_insert(name);
        let lifetime = self.lifetime;
        let entry = self.entries.entry(node).or_insert_with(|| {
            tree.attach(node, TableSlot::Measurements);
            MeasurementsEntry {
                name: name.clone(),
                values: HashMap::new(),
                last_access: now,
                expiry: now + lifetime,
            }
        });
        entry.last_access = now;
        entry.expiry = now + lifetime;
        entry
    }

    /// Deepest existing entry on the path of `name`, without extending it.
    pub fn find_longest_prefix_match(
        &self,
        tree: &NameTree,
        name: &Name,
    ) -> Option<&MeasurementsEntry> {
        let node = tree.longest_prefix_match(name, |t, n| t.has_measurements(n))?;
        self.entries.get(&node)
    }

    /// Drop entries whose lifetime lapsed, releasing their tree slots.
    pub fn sweep(&mut self, tree: &mut NameTree, now: Instant) -> usize {
        let expired: Vec<NodeId> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.expiry <= now)
            .map(|(&node, _)| node)
            .collect();
        let count = expired.len();
        for node in expired {
            self.entries.remove(&node);
            tree.detach(node, TableSlot::Measurements);
        }
        count
    }
}

impl Default for Measurements {
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
    fn test_values() {
        let mut tree = NameTree::new();
        let mut table = Measurements::new();
        let now = Instant::now();
        let entry = table.get_or_insert(&mut tree, &name("/a"), now);
        entry.set("last-forward-ms", 120.0);
        assert_eq!(entry.add("sent", 1.0), 1.0);
        assert_eq!(entry.add("sent", 1.0), 2.0);
        assert_eq!(entry.get("last-forward-ms"), Some(120.0));
        assert_eq!(entry.get("missing"), None);
    }

    #[test]
    fn test_ewma() {
        let mut tree = NameTree::new();
        let mut table = Measurements::new();
        let now = Instant::now();
        let entry = table.get_or_insert(&mut tree, &name("/a"), now);
        assert_eq!(entry.ewma("rtt", 100.0, 0.125), 100.0);
        let next = entry.ewma("rtt", 200.0, 0.125);
        assert!((next - 112.5).abs() < 1e-9);
    }

    #[test]
    fn test_lifetime_slides_on_access() {
        let mut tree = NameTree::new();
        let mut table = Measurements::new();
        let t0 = Instant::now();
        table.get_or_insert(&mut tree, &name("/a"), t0);
        let t1 = t0 + Duration::from_secs(10);
        table.get_or_insert(&mut tree, &name("/a"), t1);
        // Accessed at t1, so still alive past the original expiry.
        assert_eq!(table.sweep(&mut tree, t0 + MEASUREMENTS_LIFETIME), 0);
        assert_eq!(table.sweep(&mut tree, t1 + MEASUREMENTS_LIFETIME), 1);
        assert!(tree.lookup(&name("/a")).is_none());
    }

    #[test]
    fn test_longest_prefix_match() {
        let mut tree = NameTree::new();
        let mut table = Measurements::new();
        let now = Instant::now();
        table
            .get_or_insert(&mut tree, &name("/a"), now)
            .set("v", 1.0);
        table
            .get_or_insert(&mut tree, &name("/a/b/c"), now)
            .set("v", 2.0);
        let found = table
            .find_longest_prefix_match(&tree, &name("/a/b"))
            .unwrap();
        assert_eq!(found.get("v"), Some(1.0));
        assert!(table
            .find_longest_prefix_match(&tree, &name("/z"))
            .is_none());
    }
}

use std::collections::HashSet;

use mwfd_core::name::Name;

/// Names of the regions this router belongs to, used to decide whether a
/// forwarding hint still applies: once the Interest reaches the producer
/// region, its own name is used for FIB lookup instead of the delegations.
#[derive(Debug, Default)]
pub struct NetworkRegionTable {
    regions: HashSet<Name>,
}

impl NetworkRegionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, region: Name) -> bool {
        self.regions.insert(region)
    }

    pub fn remove(&mut self, region: &Name) -> bool {
        self.regions.remove(region)
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Whether any delegation of the hint points into one of this router's
    /// regions.
    pub fn is_in_producer_region(&self, delegations: &[Name]) -> bool {
        delegations
            .iter()
            .any(|delegation| self.regions.iter().any(|r| delegation.is_prefix_of(r)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(uri: &str) -> Name {
        Name::from_uri(uri).unwrap()
    }

    #[test]
    fn test_producer_region_match() {
        let mut table = NetworkRegionTable::new();
        table.insert(name("/telia/terabits/router5"));

        assert!(table.is_in_producer_region(&[name("/telia/terabits")]));
        assert!(table.is_in_producer_region(&[name("/att"), name("/telia")]));
        assert!(!table.is_in_producer_region(&[name("/att/backbone")]));
        assert!(!table.is_in_producer_region(&[]));
    }

    #[test]
    fn test_remove() {
        let mut table = NetworkRegionTable::new();
        assert!(table.insert(name("/r")));
        assert!(!table.insert(name("/r")));
        assert!(table.remove(&name("/r")));
        assert!(table.is_empty());
    }
}

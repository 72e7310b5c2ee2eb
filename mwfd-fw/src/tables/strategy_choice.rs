use std::collections::HashMap;

use log::info;
use mwfd_core::name::Name;

/// Longest-prefix-match table mapping namespaces to strategy instance
/// names. The root always carries the default, so resolution cannot fail.
pub struct StrategyChoice {
    choices: HashMap<Name, Name>,
}

impl StrategyChoice {
    pub fn new(default_instance: Name) -> Self {
        let mut choices = HashMap::new();
        choices.insert(Name::new(), default_instance);
        Self { choices }
    }

    pub fn len(&self) -> usize {
        self.choices.len()
    }

    pub fn insert(&mut self, prefix: Name, instance: Name) {
        info!("strategy-choice: {prefix} -> {instance}");
        self.choices.insert(prefix, instance);
    }

    /// Remove the choice for `prefix`. The root entry cannot be removed,
    /// only replaced.
    pub fn erase(&mut self, prefix: &Name) -> bool {
        if prefix.is_empty() {
            return false;
        }
        self.choices.remove(prefix).is_some()
    }

    pub fn get(&self, prefix: &Name) -> Option<&Name> {
        self.choices.get(prefix)
    }

    /// The strategy instance governing `name`: the choice at the longest
    /// matching prefix.
    pub fn find_effective(&self, name: &Name) -> &Name {
        for length in (0..=name.len()).rev() {
            if let Some(instance) = self.choices.get(&name.get_prefix(length)) {
                return instance;
            }
        }
        // The root entry is installed at construction and never removed.
        &self.choices[&Name::new()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(uri: &str) -> Name {
        Name::from_uri(uri).unwrap()
    }

    #[test]
    fn test_root_default_always_resolves() {
        let table = StrategyChoice::new(name("/strategy/best-route"));
        assert_eq!(
            table.find_effective(&name("/any/thing")),
            &name("/strategy/best-route")
        );
    }

    #[test]
    fn test_longest_prefix_wins() {
        let mut table = StrategyChoice::new(name("/strategy/best-route"));
        table.insert(name("/a"), name("/strategy/multicast"));
        table.insert(name("/a/b"), name("/strategy/best-route"));
        assert_eq!(
            table.find_effective(&name("/a/x")),
            &name("/strategy/multicast")
        );
        assert_eq!(
            table.find_effective(&name("/a/b/c")),
            &name("/strategy/best-route")
        );
        assert_eq!(
            table.find_effective(&name("/z")),
            &name("/strategy/best-route")
        );
    }

    #[test]
    fn test_root_cannot_be_erased() {
        let mut table = StrategyChoice::new(name("/strategy/best-route"));
        assert!(!table.erase(&Name::new()));
        table.insert(name("/a"), name("/strategy/multicast"));
        assert!(table.erase(&name("/a")));
        assert!(!table.erase(&name("/a")));
        assert_eq!(table.len(), 1);
    }
}

use std::collections::{BTreeMap, HashMap};

use log::warn;
use mwfd_core::lp::Nack;
use mwfd_core::name::Name;
use mwfd_core::packets::{Data, Interest};

use crate::face::FaceId;
use crate::fw::forwarder::StrategyApi;
use crate::tables::fib::NextHop;
use crate::tables::pit::PitEntryId;

/// A forwarding strategy: the policy that decides where Interests go and
/// how Data and Nacks are relayed.
///
/// Triggers are invoked by the pipelines; the `StrategyApi` argument exposes
/// the actions a strategy may take. Only `after_receive_interest` has no
/// default.
pub trait Strategy: Send {
    /// Instance name this strategy was created under, version included.
    fn instance_name(&self) -> &Name;

    /// The Interest has passed the violation checks, missed the CS and its
    /// in-record is in place: decide whether and where to forward.
    fn after_receive_interest(
        &mut self,
        api: &mut StrategyApi<'_>,
        ingress: FaceId,
        interest: &Interest,
        entry: PitEntryId,
    );

    /// Invoked for each entry when one Data satisfies several PIT entries;
    /// measurement collection only, the pipeline fans the Data out itself.
    fn before_satisfy_interest(
        &mut self,
        _api: &mut StrategyApi<'_>,
        _entry: PitEntryId,
        _ingress: FaceId,
        _data: &Data,
    ) {
    }

    /// A matching Data was found in the CS.
    fn after_content_store_hit(
        &mut self,
        api: &mut StrategyApi<'_>,
        entry: PitEntryId,
        ingress: FaceId,
        data: Data,
    ) {
        api.send_data(entry, data, ingress);
    }

    /// An incoming Data satisfies exactly this entry; the strategy has full
    /// control over how it travels downstream.
    fn after_receive_data(
        &mut self,
        api: &mut StrategyApi<'_>,
        entry: PitEntryId,
        ingress: FaceId,
        data: &Data,
    ) {
        self.before_satisfy_interest(api, entry, ingress, data);
        api.send_data_to_all(entry, ingress, data);
    }

    /// A Nack matching the out-record arrived; its header has been recorded
    /// on the out-record already.
    fn after_receive_nack(
        &mut self,
        _api: &mut StrategyApi<'_>,
        _ingress: FaceId,
        _nack: &Nack,
        _entry: PitEntryId,
    ) {
    }

    /// A route under this entry's namespace gained a next-hop.
    fn after_new_next_hop(
        &mut self,
        _api: &mut StrategyApi<'_>,
        _next_hop: NextHop,
        _entry: PitEntryId,
    ) {
    }

    /// An outgoing Interest was dropped at the face layer.
    fn on_dropped_interest(
        &mut self,
        _api: &mut StrategyApi<'_>,
        _egress: FaceId,
        _interest: &Interest,
    ) {
    }

    /// Whether `after_new_next_hop` should be invoked for this strategy.
    fn wants_new_next_hop_trigger(&self) -> bool {
        false
    }
}

pub type StrategyFactory = Box<dyn Fn(Name) -> Box<dyn Strategy> + Send + Sync>;

/// A strategy instance name split at its last version component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedInstanceName {
    /// Name up to and including the version component, when one is present;
    /// the whole input otherwise.
    pub strategy_name: Name,
    pub version: Option<u64>,
    /// Components after the version: instance parameters.
    pub parameters: Name,
}

/// Errors from strategy registration
#[derive(Debug, thiserror::Error)]
pub enum StrategyRegistryError {
    #[error("strategy name {0} lacks a version component")]
    MissingVersion(Name),
    #[error("strategy name {0} is already registered")]
    AlreadyRegistered(Name),
}

/// Registry of strategy types, keyed by versioned strategy name.
///
/// Built once during startup and read-only afterwards; every worker holds a
/// shared reference and instantiates its own strategy objects from it.
pub struct StrategyRegistry {
    registry: BTreeMap<Name, StrategyFactory>,
    default_instance: Name,
}

impl StrategyRegistry {
    pub fn new(default_instance: Name) -> Self {
        Self {
            registry: BTreeMap::new(),
            default_instance,
        }
    }

    /// Registry with the built-in strategies, defaulting to best-route.
    pub fn with_builtins() -> Self {
        use crate::fw::best_route::BestRouteStrategy;
        use crate::fw::multicast::MulticastStrategy;

        let mut registry = Self::new(BestRouteStrategy::strategy_name());
        registry
            .register(
                BestRouteStrategy::strategy_name(),
                Box::new(|name| Box::new(BestRouteStrategy::new(name))),
            )
            .unwrap();
        registry
            .register(
                MulticastStrategy::strategy_name(),
                Box::new(|name| Box::new(MulticastStrategy::new(name))),
            )
            .unwrap();
        registry
    }

    /// Register a strategy type under a versioned name.
    pub fn register(
        &mut self,
        versioned_name: Name,
        factory: StrategyFactory,
    ) -> Result<(), StrategyRegistryError> {
        if versioned_name.version().is_none() {
            return Err(StrategyRegistryError::MissingVersion(versioned_name));
        }
        if self.registry.contains_key(&versioned_name) {
            return Err(StrategyRegistryError::AlreadyRegistered(versioned_name));
        }
        self.registry.insert(versioned_name, factory);
        Ok(())
    }

    pub fn default_instance(&self) -> &Name {
        &self.default_instance
    }

    pub fn list_registered(&self) -> Vec<Name> {
        self.registry.keys().cloned().collect()
    }

    /// Split an instance name at its last version component.
    pub fn parse_instance_name(input: &Name) -> ParsedInstanceName {
        match input.last_version_index() {
            Some(index) => ParsedInstanceName {
                strategy_name: input.get_prefix(index + 1),
                version: mwfd_core::name::component_version(input.get(index).unwrap()),
                parameters: Name {
                    components: input.components[index + 1..].to_vec(),
                },
            },
            None => ParsedInstanceName {
                strategy_name: input.clone(),
                version: None,
                parameters: Name::new(),
            },
        }
    }

    /// Find the registered name satisfying the request: the highest version
    /// not above the requested one, or the highest registered version when
    /// the request is unversioned.
    fn find(&self, instance_name: &Name) -> Option<&Name> {
        let parsed = Self::parse_instance_name(instance_name);
        let requested_base = match parsed.version {
            Some(_) => parsed.strategy_name.get_prefix(parsed.strategy_name.len() - 1),
            None => parsed.strategy_name.clone(),
        };
        let mut best: Option<(&Name, u64)> = None;
        for registered in self.registry.keys() {
            let base = registered.get_prefix(registered.len() - 1);
            if base != requested_base {
                continue;
            }
            let version = registered.version().unwrap();
            if let Some(requested) = parsed.version {
                if version > requested {
                    continue;
                }
            }
            match best {
                Some((_, current)) if current >= version => {}
                _ => best = Some((registered, version)),
            }
        }
        best.map(|(name, _)| name)
    }

    pub fn can_create(&self, instance_name: &Name) -> bool {
        self.find(instance_name).is_some()
    }

    /// Instantiate the strategy for `instance_name`, or `None` when no
    /// registered type satisfies it.
    pub fn create(&self, instance_name: &Name) -> Option<Box<dyn Strategy>> {
        let registered = self.find(instance_name)?.clone();
        let factory = &self.registry[&registered];
        let instance = Self::make_instance_name(instance_name, &registered);
        Some(factory(instance))
    }

    /// Complete an instance name with the registered version when the input
    /// carries none.
    fn make_instance_name(input: &Name, strategy_name: &Name) -> Name {
        if input.last_version_index().is_some() {
            return input.clone();
        }
        let mut name = input.clone();
        name.append(strategy_name.last().unwrap().clone());
        name
    }
}

/// The strategy instances of one worker, created lazily from the registry.
pub struct StrategySet {
    active: HashMap<Name, Box<dyn Strategy>>,
}

impl StrategySet {
    pub fn new() -> Self {
        Self {
            active: HashMap::new(),
        }
    }

    /// Remove the instance for `instance_name`, creating it on first use.
    /// The caller must `put` it back after running the trigger.
    pub fn take_or_create(
        &mut self,
        instance_name: &Name,
        registry: &StrategyRegistry,
    ) -> Option<Box<dyn Strategy>> {
        if let Some(strategy) = self.active.remove(instance_name) {
            return Some(strategy);
        }
        match registry.create(instance_name) {
            Some(strategy) => Some(strategy),
            None => {
                warn!("strategy {instance_name} cannot be created, using default");
                self.active
                    .remove(registry.default_instance())
                    .or_else(|| registry.create(registry.default_instance()))
            }
        }
    }

    pub fn put(&mut self, key: Name, strategy: Box<dyn Strategy>) {
        self.active.insert(key, strategy);
    }
}

impl Default for StrategySet {
    fn default() -> Self {
        Self::new()
    }
}

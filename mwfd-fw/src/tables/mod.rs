pub mod cs;
pub mod cs_policy;
pub mod fib;
pub mod measurements;
pub mod name_tree;
pub mod network_region;
pub mod pit;
pub mod strategy_choice;

use mwfd_core::name::Name;

use crate::tables::cs::{Cs, CsConfig};
use crate::tables::fib::Fib;
use crate::tables::measurements::Measurements;
use crate::tables::name_tree::NameTree;
use crate::tables::network_region::NetworkRegionTable;
use crate::tables::pit::Pit;
use crate::tables::strategy_choice::StrategyChoice;

/// The private tables of one forwarding worker, all indexed through the
/// shared NameTree.
pub struct Tables {
    pub name_tree: NameTree,
    pub fib: Fib,
    pub pit: Pit,
    pub cs: Cs,
    pub measurements: Measurements,
    pub strategy_choice: StrategyChoice,
    pub network_region: NetworkRegionTable,
}

impl Tables {
    pub fn new(cs_config: &CsConfig, default_strategy: Name) -> Self {
        Self {
            name_tree: NameTree::new(),
            fib: Fib::new(),
            pit: Pit::new(),
            cs: Cs::new(cs_config),
            measurements: Measurements::new(),
            strategy_choice: StrategyChoice::new(default_strategy),
            network_region: NetworkRegionTable::new(),
        }
    }
}

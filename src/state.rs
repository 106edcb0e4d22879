use crate::{CommodityId, LinkId, PathId};
use std::collections::BTreeMap;

/// Counts below this are treated as zero.
pub(crate) const TOLERANCE: f64 = 1e-6;

/// Identifies where a [State] is headed: a fixed path, or for link-local commodities
/// the next link chosen by the split ratios.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PathOrLink {
    Path(PathId),
    Link(LinkId),
}

/// The key under which vehicle mass is tracked.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct State {
    pub commodity: CommodityId,
    pub key: PathOrLink,
}

impl State {
    pub fn new(commodity: CommodityId, key: PathOrLink) -> Self {
        Self { commodity, key }
    }

    /// Relabels a link-local state with the given next link. Path states are unchanged.
    pub fn with_next_link(self, link: LinkId) -> Self {
        match self.key {
            PathOrLink::Path(_) => self,
            PathOrLink::Link(_) => Self::new(self.commodity, PathOrLink::Link(link)),
        }
    }
}

/// Vehicles (or vehicles per step) keyed by state. Ordered so that every
/// traversal is reproducible.
pub type StateMap = BTreeMap<State, f64>;

/// Arithmetic on [StateMap]s.
pub trait StateMapExt {
    /// Sum over all states.
    fn total(&self) -> f64;
    /// Adds `factor * other` into `self`.
    fn add_scaled(&mut self, other: &StateMap, factor: f64);
    /// Returns a copy with every value multiplied by `factor`.
    fn scaled(&self, factor: f64) -> StateMap;
}

impl StateMapExt for StateMap {
    fn total(&self) -> f64 {
        self.values().sum()
    }

    fn add_scaled(&mut self, other: &StateMap, factor: f64) {
        for (state, value) in other {
            let value = value * factor;
            if value > 0.0 {
                *self.entry(*state).or_insert(0.0) += value;
            }
        }
    }

    fn scaled(&self, factor: f64) -> StateMap {
        self.iter()
            .map(|(state, value)| (*state, value * factor))
            .filter(|(_, value)| *value > 0.0)
            .collect()
    }
}

#[cfg(feature = "debug")]
use crate::debug::debug_backlog;
use crate::network::{Demand, DemandOrigin, Network};
use crate::profile::Profile1D;
use crate::state::{PathOrLink, State, StateMap, StateMapExt, TOLERANCE};
use crate::{CommodityId, LaneGroupId, LinkId, SimError};
use log::trace;
use std::collections::BTreeMap;

/// Feeds one demand into the entry cells of its origin link.
///
/// Vehicles that find no room wait in a vertical queue and are offered again
/// before new arrivals on the next step.
#[derive(Clone, Debug)]
pub struct FluidSource {
    commodity: CommodityId,
    link: LinkId,
    origin: DemandOrigin,
    /// Rate in vehicles per second.
    profile: Profile1D,
    backlog: StateMap,
}

impl FluidSource {
    pub(crate) fn new(demand: &Demand, network: &Network) -> Result<Self, SimError> {
        Ok(Self {
            commodity: demand.commodity,
            link: network.origin_link(demand.origin)?,
            origin: demand.origin,
            profile: demand.profile.clone(),
            backlog: StateMap::new(),
        })
    }

    pub fn commodity(&self) -> CommodityId {
        self.commodity
    }

    pub fn link(&self) -> LinkId {
        self.link
    }

    /// Vehicles generated but not yet admitted to the link.
    pub fn backlog(&self) -> f64 {
        self.backlog.total()
    }

    pub(crate) fn reset(&mut self) {
        self.backlog.clear();
    }

    /// Generates the vehicles of the step starting at `time` and inserts as many as
    /// the entry cells can take.
    pub(crate) fn inject(&mut self, network: &mut Network, time: f64, dt: f64) -> Result<(), SimError> {
        let amount = self.profile.value_at(time) * dt;
        if amount > 0.0 {
            let arrivals = self.split_into_states(network, amount, time)?;
            self.backlog.add_scaled(&arrivals, 1.0);
        }
        if self.backlog.total() <= TOLERANCE {
            self.backlog.clear();
            return Ok(());
        }

        let link = &network.links[self.link];
        let mut groups: BTreeMap<LinkId, StateMap> = BTreeMap::new();
        for (state, count) in &self.backlog {
            let next = link.next_link(state).unwrap_or(self.link);
            groups.entry(next).or_default().insert(*state, *count);
        }

        let mut admitted = StateMap::new();
        for (next, vehicles) in groups {
            let targets: Vec<LaneGroupId> = match link.lanegroups_to(next) {
                Some(lgs) if next != self.link => lgs.to_vec(),
                _ => link.lanegroups().to_vec(),
            };
            let total = vehicles.total();
            let lanes: f64 = targets
                .iter()
                .map(|id| network.lanegroups[*id].num_lanes() as f64)
                .sum();

            // Shares by lane count first, then whatever room is left.
            let mut left = total;
            for pass in 0..2 {
                for id in &targets {
                    let lg = &mut network.lanegroups[*id];
                    let wanted = match pass {
                        0 => total * lg.num_lanes() as f64 / lanes,
                        _ => left,
                    };
                    let amount = wanted.min(lg.entry_room).min(left);
                    if amount <= 0.0 {
                        continue;
                    }
                    let part = vehicles.scaled(amount / total);
                    lg.add_vehicle_packet(&part);
                    admitted.add_scaled(&part, 1.0);
                    left -= amount;
                }
            }
        }

        for (state, count) in admitted {
            if let Some(waiting) = self.backlog.get_mut(&state) {
                *waiting -= count;
            }
        }
        self.backlog.retain(|_, count| *count > TOLERANCE);
        if !self.backlog.is_empty() {
            trace!(
                "source on link {:?} holds {:.3} vehicles",
                self.link,
                self.backlog()
            );
        }
        #[cfg(feature = "debug")]
        debug_backlog(self.link, self.backlog());
        Ok(())
    }

    /// Tags new vehicles with the states they travel in.
    fn split_into_states(
        &self,
        network: &Network,
        amount: f64,
        time: f64,
    ) -> Result<StateMap, SimError> {
        let link = &network.links[self.link];
        let mut out = StateMap::new();
        match self.origin {
            DemandOrigin::Path(path) => {
                out.insert(State::new(self.commodity, PathOrLink::Path(path)), amount);
            }
            DemandOrigin::Link(_) => match link.packet_splitter() {
                Some(splitter) => {
                    for (outlink, ratio) in splitter.ratios(self.commodity, time)? {
                        out.insert(
                            State::new(self.commodity, PathOrLink::Link(outlink)),
                            amount * ratio,
                        );
                    }
                }
                None => {
                    let key = PathOrLink::Link(link.trivial_outlink());
                    out.insert(State::new(self.commodity, key), amount);
                }
            },
        }
        Ok(out)
    }
}

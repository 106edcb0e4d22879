//! Flow exchange at a junction.

#[cfg(feature = "debug")]
use crate::debug::debug_node_flows;
use crate::link_model;
use crate::network::{Network, Node};
use crate::packet::PacketLink;
use crate::state::{StateMap, StateMapExt, TOLERANCE};
use crate::{LaneGroupId, LinkId, NodeId, RoadConnectionId, SimError};
use smallvec::SmallVec;
use std::collections::BTreeMap;

/// The flow variables of one road connection leaving one incoming lane group.
#[derive(Clone, Debug)]
struct RoadConnectionFlow {
    rc: RoadConnectionId,
    /// Index of the sending lane group in `ulgs`.
    ulg: usize,
    outlink: LinkId,
    /// The receiving lane groups.
    arrive_to: SmallVec<[LaneGroupId; 4]>,
    /// Saturation flow in vehicles per step.
    capacity: f64,
    /// Share of the flow charged to each receiving lane group.
    gamma: SmallVec<[(LaneGroupId, f64); 4]>,
    /// Demand per state.
    demand: StateMap,
    /// Resolved flow.
    flow: f64,
    /// Resolved flow per state.
    f_rs: StateMap,
}

/// An incoming lane group.
#[derive(Clone, Debug)]
struct UpLaneGroup {
    id: LaneGroupId,
    /// The flows serving each outlink, with the share of demand each one carries.
    outlink2flows: BTreeMap<LinkId, SmallVec<[(usize, f64); 2]>>,
    /// Resolved exit flow per state.
    f_gs: StateMap,
}

/// An outgoing lane group.
#[derive(Clone, Debug)]
struct DnLaneGroup {
    supply: f64,
    /// The flows that may enter.
    flows: SmallVec<[usize; 4]>,
}

/// Resolves, every step, how much of each incoming lane group's demand crosses the
/// node on each road connection, given the supply of the outgoing lane groups.
///
/// Contention for a receiving lane group is settled by proportional allocation: all
/// road connections that still want flow advance together by the largest fraction
/// every receiving lane group can absorb, and those feeding the first lane group to
/// saturate are frozen. Ties go to the lane group with the smallest id.
#[derive(Clone, Debug)]
pub struct NodeModel {
    node: NodeId,
    ulgs: Vec<UpLaneGroup>,
    flows: Vec<RoadConnectionFlow>,
    dlgs: BTreeMap<LaneGroupId, DnLaneGroup>,
}

impl NodeModel {
    /// Builds the static flow structure of a node for a model step of `dt` seconds.
    pub(crate) fn new(id: NodeId, node: &Node, network: &Network, dt: f64) -> Self {
        let mut ulgs = vec![];
        let mut flows = vec![];
        let mut dlgs: BTreeMap<LaneGroupId, DnLaneGroup> = BTreeMap::new();

        for link in node.in_links() {
            for lg_id in network.links[*link].lanegroups() {
                let lg = &network.lanegroups[*lg_id];
                let mut outlink2flows = BTreeMap::new();
                for (outlink, rcs) in &lg.outlink2rcs {
                    let start = flows.len();
                    for rc_id in rcs {
                        let rc = &network.road_connections[*rc_id];
                        let capacity = rc
                            .capacity_vph()
                            .map(|c| c * dt / 3600.0)
                            .unwrap_or(f64::INFINITY);
                        for dlg in rc.end_lanegroups() {
                            dlgs.entry(*dlg)
                                .or_insert_with(|| DnLaneGroup {
                                    supply: 0.0,
                                    flows: SmallVec::new(),
                                })
                                .flows
                                .push(flows.len());
                        }
                        flows.push(RoadConnectionFlow {
                            rc: *rc_id,
                            ulg: ulgs.len(),
                            outlink: *outlink,
                            arrive_to: rc.end_lanegroups().iter().copied().collect(),
                            capacity,
                            gamma: SmallVec::new(),
                            demand: StateMap::new(),
                            flow: 0.0,
                            f_rs: StateMap::new(),
                        });
                    }
                    // Several connections to one outlink share its demand by receiving lanes.
                    let lanes = |flow: &RoadConnectionFlow| -> f64 {
                        flow.arrive_to
                            .iter()
                            .map(|id| network.lanegroups[*id].num_lanes() as f64)
                            .sum()
                    };
                    let total: f64 = flows[start..].iter().map(lanes).sum();
                    let shares = (start..flows.len())
                        .map(|idx| (idx, lanes(&flows[idx]) / total))
                        .collect();
                    outlink2flows.insert(*outlink, shares);
                }
                ulgs.push(UpLaneGroup {
                    id: *lg_id,
                    outlink2flows,
                    f_gs: StateMap::new(),
                });
            }
        }

        Self {
            node: id,
            ulgs,
            flows,
            dlgs,
        }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    /// The resolved flow on a road connection this step, summed over sending lane groups.
    pub fn road_connection_flow(&self, rc: RoadConnectionId) -> f64 {
        self.flows
            .iter()
            .filter(|f| f.rc == rc)
            .map(|f| f.flow)
            .sum()
    }

    /// Resolves this step's flows from the demand and supply published by the lane groups.
    pub(crate) fn update_flow(&mut self, network: &Network) -> Result<(), SimError> {
        self.collect_demand(network)?;
        self.collect_supply(network);
        self.compute_gamma();
        self.allocate();
        self.split_by_state();
        self.check_supply()?;

        #[cfg(feature = "debug")]
        debug_node_flows(
            self.node,
            self.flows.iter().map(|f| (f.rc, f.outlink, f.flow)),
        );
        Ok(())
    }

    /// Moves the resolved flows across the node: the receiving links place the
    /// packets, the sending lane groups release the vehicles.
    pub(crate) fn dispatch(&mut self, network: &mut Network, time: f64) -> Result<(), SimError> {
        for flow in &self.flows {
            if flow.flow <= TOLERANCE {
                continue;
            }
            let packet = PacketLink::new(flow.f_rs.clone(), &flow.arrive_to, Some(flow.rc));
            link_model::add_vehicle_packet(
                &network.links[flow.outlink],
                &mut network.lanegroups,
                &packet,
                time,
            )?;
        }
        for ulg in &self.ulgs {
            if ulg.f_gs.is_empty() {
                continue;
            }
            let lg = &mut network.lanegroups[ulg.id];
            lg.release_vehicles(&ulg.f_gs)?;
            lg.update_flow_accumulators(&ulg.f_gs);
        }
        Ok(())
    }

    fn collect_demand(&mut self, network: &Network) -> Result<(), SimError> {
        for flow in &mut self.flows {
            flow.demand.clear();
            flow.flow = 0.0;
            flow.f_rs.clear();
        }
        for ulg in &mut self.ulgs {
            ulg.f_gs.clear();
            let lg = &network.lanegroups[ulg.id];
            let link = &network.links[lg.link_id()];
            let Some(cell) = lg.dnstream_cell() else {
                continue;
            };
            for (state, demand) in &cell.demand_dwn {
                let Some(next) = link.next_link(state) else {
                    continue;
                };
                let Some(targets) = ulg.outlink2flows.get(&next) else {
                    if *demand <= 0.0 {
                        continue;
                    }
                    return Err(SimError::NoRoadConnection {
                        lanegroup: ulg.id,
                        outlink: next,
                        demand: *demand,
                    });
                };
                for (idx, share) in targets {
                    *self.flows[*idx].demand.entry(*state).or_insert(0.0) += demand * share;
                }
            }
        }
        Ok(())
    }

    fn collect_supply(&mut self, network: &Network) {
        for (id, dlg) in &mut self.dlgs {
            dlg.supply = network.lanegroups[*id].supply();
        }
    }

    /// Splits each connection's flow over its receiving lane groups by their supply.
    fn compute_gamma(&mut self) {
        for flow in &mut self.flows {
            let total: f64 = flow.arrive_to.iter().map(|j| self.dlgs[j].supply).sum();
            flow.gamma = flow
                .arrive_to
                .iter()
                .map(|j| {
                    let share = if total > 0.0 {
                        self.dlgs[j].supply / total
                    } else {
                        0.0
                    };
                    (*j, share)
                })
                .collect();
        }
    }

    fn allocate(&mut self) {
        let want: Vec<f64> = self
            .flows
            .iter()
            .map(|f| {
                let has_supply = f.gamma.iter().any(|(_, g)| *g > 0.0);
                if has_supply {
                    f64::min(f.demand.total(), f.capacity)
                } else {
                    0.0
                }
            })
            .collect();
        let mut active: Vec<bool> = want.iter().map(|w| *w > TOLERANCE).collect();
        let mut remaining: BTreeMap<LaneGroupId, f64> =
            self.dlgs.iter().map(|(id, d)| (*id, d.supply)).collect();

        while active.iter().any(|a| *a) {
            // The receiving lane group that saturates first.
            let mut bottleneck: Option<(LaneGroupId, f64)> = None;
            for (j, dlg) in &self.dlgs {
                let load: f64 = dlg
                    .flows
                    .iter()
                    .filter(|idx| active[**idx])
                    .map(|idx| gamma_of(&self.flows[*idx], *j) * (want[*idx] - self.flows[*idx].flow))
                    .sum();
                if load <= TOLERANCE {
                    continue;
                }
                let ratio = remaining[j] / load;
                if bottleneck.map_or(true, |(_, best)| ratio < best) {
                    bottleneck = Some((*j, ratio));
                }
            }

            let ratio = match bottleneck {
                Some((_, ratio)) if ratio < 1.0 => ratio,
                _ => 1.0,
            };
            for (idx, flow) in self.flows.iter_mut().enumerate() {
                if !active[idx] {
                    continue;
                }
                let delta = ratio * (want[idx] - flow.flow);
                flow.flow += delta;
                for (j, g) in &flow.gamma {
                    if let Some(room) = remaining.get_mut(j) {
                        *room = (*room - g * delta).max(0.0);
                    }
                }
                if want[idx] - flow.flow <= TOLERANCE {
                    active[idx] = false;
                }
            }
            match bottleneck {
                Some((j, ratio)) if ratio < 1.0 => {
                    for idx in &self.dlgs[&j].flows {
                        active[*idx] = false;
                    }
                }
                _ => break,
            }
        }
    }

    fn split_by_state(&mut self) {
        for flow in &mut self.flows {
            let demand = flow.demand.total();
            if flow.flow <= 0.0 || demand <= 0.0 {
                flow.flow = 0.0;
                continue;
            }
            flow.f_rs = flow.demand.scaled(flow.flow / demand);
            self.ulgs[flow.ulg].f_gs.add_scaled(&flow.f_rs, 1.0);
        }
    }

    fn check_supply(&self) -> Result<(), SimError> {
        for (j, dlg) in &self.dlgs {
            let inflow: f64 = dlg
                .flows
                .iter()
                .map(|idx| gamma_of(&self.flows[*idx], *j) * self.flows[*idx].flow)
                .sum();
            if inflow > dlg.supply + TOLERANCE {
                return Err(SimError::SupplyExceeded {
                    node: self.node,
                    lanegroup: *j,
                    flow: inflow,
                    supply: dlg.supply,
                });
            }
        }
        Ok(())
    }
}

fn gamma_of(flow: &RoadConnectionFlow, lanegroup: LaneGroupId) -> f64 {
    flow.gamma
        .iter()
        .find(|(id, _)| *id == lanegroup)
        .map(|(_, g)| *g)
        .unwrap_or(0.0)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::RoadParams;
    use crate::link::LinkAttributes;
    use crate::network::{CommodityAttributes, RoadConnectionAttributes};
    use crate::state::{PathOrLink, State};
    use crate::CommodityId;
    use assert_approx_eq::assert_approx_eq;

    const DT: f64 = 2.0;
    /// One cell per step at 100 km/h.
    const CELL: f64 = 500.0 / 9.0;

    struct Merge {
        net: Network,
        node: NodeId,
        ups: [LinkId; 2],
        dn: LinkId,
        comm: CommodityId,
    }

    fn merge() -> Merge {
        let mut net = Network::new();
        let [a, b, m, z] = [(); 4].map(|_| net.add_node());
        let link = |net: &mut Network, start_node, end_node| {
            net.add_link(&LinkAttributes {
                start_node,
                end_node,
                length: CELL,
                lanes: 1,
                lanegroups: &[],
                road_params: RoadParams::default(),
            })
            .unwrap()
        };
        let ups = [link(&mut net, a, m), link(&mut net, b, m)];
        let dn = link(&mut net, m, z);
        for up in ups {
            net.add_road_connection(&RoadConnectionAttributes {
                start_link: up,
                end_link: dn,
                start_lanes: None,
                end_lanes: None,
                capacity_vph: None,
            })
            .unwrap();
        }
        let comm = net
            .add_commodity(&CommodityAttributes {
                name: "cars",
                pathfull: false,
                paths: &[],
            })
            .unwrap();
        net.finalize().unwrap();
        for lg in net.lanegroups.values_mut() {
            lg.create_cells(1, CELL, DT).unwrap();
        }
        Merge {
            net,
            node: m,
            ups,
            dn,
            comm,
        }
    }

    fn load(m: &mut Merge, link: LinkId, vehicles: f64) {
        let state = State::new(m.comm, PathOrLink::Link(m.dn));
        let lg = m.net.links[link].lanegroups()[0];
        m.net.lanegroups[lg]
            .cell_mut(0)
            .add_vehicles(&[(state, vehicles)].into_iter().collect());
    }

    fn resolve(m: &mut Merge) -> NodeModel {
        for lg in m.net.lanegroups.values_mut() {
            lg.update_demand_supply();
        }
        let mut model = NodeModel::new(m.node, &m.net.nodes[m.node], &m.net, DT);
        model.update_flow(&m.net).unwrap();
        model
    }

    fn exit_flow(model: &NodeModel, m: &Merge, link: LinkId) -> f64 {
        let lg = m.net.links[link].lanegroups()[0];
        model
            .ulgs
            .iter()
            .find(|u| u.id == lg)
            .map(|u| u.f_gs.total())
            .unwrap()
    }

    #[test]
    fn merge_is_proportional_to_demand() {
        let mut m = merge();
        let [a, b] = m.ups;
        let capacity = 2000.0 * DT / 3600.0;
        load(&mut m, a, 0.5 * capacity);
        load(&mut m, b, 3.0);
        let model = resolve(&mut m);

        // Supply is one capacity, wanted are one half and one capacity.
        assert_approx_eq!(exit_flow(&model, &m, m.ups[0]), capacity / 3.0);
        assert_approx_eq!(exit_flow(&model, &m, m.ups[1]), 2.0 * capacity / 3.0);
    }

    #[test]
    fn uncongested_merge_passes_demand() {
        let mut m = merge();
        let [a, b] = m.ups;
        load(&mut m, a, 0.2);
        load(&mut m, b, 0.3);
        let model = resolve(&mut m);
        assert_approx_eq!(exit_flow(&model, &m, m.ups[0]), 0.2);
        assert_approx_eq!(exit_flow(&model, &m, m.ups[1]), 0.3);
    }

    #[test]
    fn supply_is_respected() {
        let mut m = merge();
        let [a, b] = m.ups;
        let dn = m.dn;
        load(&mut m, a, 3.0);
        load(&mut m, b, 3.0);
        load(&mut m, dn, 5.0);
        let model = resolve(&mut m);

        let dn_lg = m.net.links[m.dn].lanegroups()[0];
        let supply = m.net.lanegroups[dn_lg].supply();
        let total = exit_flow(&model, &m, m.ups[0]) + exit_flow(&model, &m, m.ups[1]);
        assert!(supply < 2000.0 * DT / 3600.0);
        assert_approx_eq!(total, supply);
        assert_approx_eq!(
            exit_flow(&model, &m, m.ups[0]),
            exit_flow(&model, &m, m.ups[1])
        );
    }

    #[test]
    fn dispatch_moves_vehicles() {
        let mut m = merge();
        let a = m.ups[0];
        load(&mut m, a, 0.4);
        let mut model = resolve(&mut m);
        model.dispatch(&mut m.net, DT).unwrap();

        let up_lg = m.net.links[m.ups[0]].lanegroups()[0];
        let dn_lg = m.net.links[m.dn].lanegroups()[0];
        assert_approx_eq!(m.net.lanegroups[up_lg].total_vehicles(), 0.0);
        assert_approx_eq!(m.net.lanegroups[dn_lg].total_vehicles(), 0.4);
        assert_approx_eq!(m.net.lanegroups[up_lg].flow_accumulator().total(), 0.4);
    }
}

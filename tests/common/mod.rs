//! Scenario builders shared by the integration tests.
#![allow(dead_code)]

use traffic_flow::{
    CommodityAttributes, CommodityId, Demand, DemandOrigin, Interval, LinkAttributes, LinkId,
    NodeId, Profile1D, RoadConnectionAttributes, RoadConnectionId, RoadParams, Simulation,
};

/// Metres travelled in one 2 s step at 100 km/h.
pub const STEP_LENGTH: f64 = 500.0 / 9.0;

pub fn link(sim: &mut Simulation, from: NodeId, to: NodeId, length: f64, lanes: u32) -> LinkId {
    sim.add_link(&LinkAttributes {
        start_node: from,
        end_node: to,
        length,
        lanes,
        lanegroups: &[],
        road_params: RoadParams::default(),
    })
    .unwrap()
}

/// A link with one lane group per lane.
pub fn split_link(
    sim: &mut Simulation,
    from: NodeId,
    to: NodeId,
    length: f64,
    lanes: u32,
) -> LinkId {
    let groups = (1..=lanes).map(|l| Interval::new(l, l)).collect::<Vec<_>>();
    sim.add_link(&LinkAttributes {
        start_node: from,
        end_node: to,
        length,
        lanes,
        lanegroups: &groups,
        road_params: RoadParams::default(),
    })
    .unwrap()
}

pub fn connect(sim: &mut Simulation, from: LinkId, to: LinkId) -> RoadConnectionId {
    connect_lanes(sim, from, to, None, None)
}

pub fn connect_lanes(
    sim: &mut Simulation,
    from: LinkId,
    to: LinkId,
    start_lanes: Option<Interval<u32>>,
    end_lanes: Option<Interval<u32>>,
) -> RoadConnectionId {
    sim.add_road_connection(&RoadConnectionAttributes {
        start_link: from,
        end_link: to,
        start_lanes,
        end_lanes,
        capacity_vph: None,
    })
    .unwrap()
}

pub fn cars(sim: &mut Simulation) -> CommodityId {
    sim.add_commodity(&CommodityAttributes {
        name: "cars",
        pathfull: false,
        paths: &[],
    })
    .unwrap()
}

/// A constant inflow in vehicles per hour from time zero.
pub fn constant_demand(sim: &mut Simulation, commodity: CommodityId, link: LinkId, vph: f64) {
    sim.add_demand(Demand {
        commodity,
        origin: DemandOrigin::Link(link),
        profile: Profile1D::from_vph(0.0, None, &[vph]),
    })
    .unwrap();
}

/// Vehicles that have left the lane groups of `link`.
pub fn exits(sim: &Simulation, link: LinkId) -> f64 {
    sim.get_link(link)
        .unwrap()
        .lanegroups()
        .iter()
        .map(|lg| sim.flow_accumulator(*lg).unwrap().total())
        .sum()
}

/// Checks that no cell is negative or over its storage capacity.
pub fn assert_cells_valid(sim: &Simulation) {
    for lg in sim.network().iter_lanegroups() {
        for cell in lg.cells() {
            for count in cell.vehicles().values() {
                assert!(*count >= -1e-9, "negative count {}", count);
            }
            assert!(cell.total_vehicles() <= cell.max_vehicles() + 1e-6);
        }
        assert!(lg.total_vehicles() <= lg.max_vehicles() + 1e-6);
    }
}

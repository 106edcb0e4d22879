mod common;

use assert_approx_eq::assert_approx_eq;
use common::*;
use traffic_flow::{
    CommodityAttributes, Demand, DemandOrigin, LinkId, ModelConfig, Profile1D, Simulation,
    SplitProfile,
};

struct Diverge {
    sim: Simulation,
    entry: LinkId,
    road: LinkId,
    left: LinkId,
    right: LinkId,
}

/// A source feeding a ten-cell road that forks into two sinks.
fn diverge() -> Diverge {
    let mut sim = Simulation::new();
    let nodes = [(); 5].map(|_| sim.add_node());
    let entry = link(&mut sim, nodes[0], nodes[1], STEP_LENGTH, 1);
    let road = link(&mut sim, nodes[1], nodes[2], 10.0 * STEP_LENGTH, 1);
    let left = link(&mut sim, nodes[2], nodes[3], STEP_LENGTH, 1);
    let right = link(&mut sim, nodes[2], nodes[4], STEP_LENGTH, 1);
    connect(&mut sim, entry, road);
    connect(&mut sim, road, left);
    connect(&mut sim, road, right);
    Diverge {
        sim,
        entry,
        road,
        left,
        right,
    }
}

#[test]
fn merge_shares_capacity_evenly() {
    let mut sim = Simulation::new();
    let nodes = [(); 5].map(|_| sim.add_node());
    let a = link(&mut sim, nodes[0], nodes[2], STEP_LENGTH, 1);
    let b = link(&mut sim, nodes[1], nodes[2], STEP_LENGTH, 1);
    let road = link(&mut sim, nodes[2], nodes[3], 10.0 * STEP_LENGTH, 1);
    let exit = link(&mut sim, nodes[3], nodes[4], STEP_LENGTH, 1);
    connect(&mut sim, a, road);
    connect(&mut sim, b, road);
    connect(&mut sim, road, exit);
    let commodity = cars(&mut sim);
    constant_demand(&mut sim, commodity, a, 2000.0);
    constant_demand(&mut sim, commodity, b, 2000.0);
    sim.add_model(&ModelConfig::ctm("ctm", 2.0), None).unwrap();
    sim.initialize(0.0).unwrap();

    sim.run_until(600.0).unwrap();
    let before = exits(&sim, exit);
    sim.run_until(1200.0).unwrap();

    assert_approx_eq!(exits(&sim, a), exits(&sim, b), 1e-6);
    let delivered = exits(&sim, exit) - before;
    assert!(delivered <= 2000.0 / 6.0 + 1e-6, "delivered {}", delivered);
    assert!(delivered > 0.95 * 2000.0 / 6.0, "delivered {}", delivered);
    assert!(sim.source_backlog(a) > 0.0);
    assert_approx_eq!(sim.source_backlog(a), sim.source_backlog(b), 1e-6);

    let generated = 2.0 * 2000.0 * 1200.0 / 3600.0;
    let accounted = sim.total_vehicles()
        + exits(&sim, exit)
        + sim.source_backlog(a)
        + sim.source_backlog(b);
    assert_approx_eq!(generated, accounted, 1e-6);
    assert_cells_valid(&sim);
}

#[test]
fn diverge_follows_split_ratios() {
    let mut d = diverge();
    let road = d.road;
    let commodity = cars(&mut d.sim);
    constant_demand(&mut d.sim, commodity, d.entry, 1200.0);
    d.sim
        .set_split_profile(
            road,
            commodity,
            SplitProfile::constant(&[(d.left, 3.0), (d.right, 7.0)]),
        )
        .unwrap();
    d.sim.add_model(&ModelConfig::ctm("ctm", 2.0), None).unwrap();
    d.sim.initialize(0.0).unwrap();
    d.sim.run_until(600.0).unwrap();

    let left = exits(&d.sim, d.left);
    let right = exits(&d.sim, d.right);
    assert!(left > 0.0);
    assert_approx_eq!(left / (left + right), 0.3, 1e-6);

    let generated = 1200.0 * 600.0 / 3600.0;
    let accounted = d.sim.total_vehicles() + left + right + d.sim.source_backlog(d.entry);
    assert_approx_eq!(generated, accounted, 1e-6);
}

#[test]
fn split_ratios_follow_their_profile() {
    let mut d = diverge();
    let road = d.road;
    let commodity = cars(&mut d.sim);
    constant_demand(&mut d.sim, commodity, d.entry, 1200.0);
    let mut profile = SplitProfile::new(0.0, Some(300.0));
    profile.add_entry(d.left, vec![1.0, 0.0]);
    profile.add_entry(d.right, vec![0.0, 1.0]);
    d.sim.set_split_profile(road, commodity, profile).unwrap();
    d.sim.add_model(&ModelConfig::ctm("ctm", 2.0), None).unwrap();
    d.sim.initialize(0.0).unwrap();

    d.sim.run_until(300.0).unwrap();
    assert!(exits(&d.sim, d.left) > 0.0);
    assert_eq!(exits(&d.sim, d.right), 0.0);

    d.sim.run_until(600.0).unwrap();
    let (left, right) = (exits(&d.sim, d.left), exits(&d.sim, d.right));
    d.sim.run_until(900.0).unwrap();
    assert_approx_eq!(exits(&d.sim, d.left) - left, 0.0, 1e-9);
    assert_approx_eq!(exits(&d.sim, d.right) - right, 100.0, 1e-6);
}

#[test]
fn new_split_ratios_apply_from_the_next_step() {
    let mut d = diverge();
    let road = d.road;
    let commodity = cars(&mut d.sim);
    constant_demand(&mut d.sim, commodity, d.entry, 1200.0);
    d.sim
        .set_split_profile(road, commodity, SplitProfile::constant(&[(d.left, 1.0)]))
        .unwrap();
    d.sim.add_model(&ModelConfig::ctm("ctm", 2.0), None).unwrap();
    d.sim.initialize(0.0).unwrap();

    d.sim.run_until(300.0).unwrap();
    assert_eq!(exits(&d.sim, d.right), 0.0);
    d.sim
        .set_split_profile(road, commodity, SplitProfile::constant(&[(d.right, 1.0)]))
        .unwrap();
    d.sim.run_until(600.0).unwrap();
    let left = exits(&d.sim, d.left);
    d.sim.run_until(900.0).unwrap();
    assert_approx_eq!(exits(&d.sim, d.left), left, 1e-9);
    assert!(exits(&d.sim, d.right) > 0.0);
}

#[test]
fn pathfull_commodity_follows_its_path() {
    let mut d = diverge();
    let road = d.road;
    let path = d.sim.add_path(&[d.entry, road, d.right]).unwrap();
    let commodity = d
        .sim
        .add_commodity(&CommodityAttributes {
            name: "buses",
            pathfull: true,
            paths: &[path],
        })
        .unwrap();
    d.sim
        .add_demand(Demand {
            commodity,
            origin: DemandOrigin::Path(path),
            profile: Profile1D::from_vph(0.0, None, &[900.0]),
        })
        .unwrap();
    d.sim.add_model(&ModelConfig::ctm("ctm", 2.0), None).unwrap();
    d.sim.initialize(0.0).unwrap();
    d.sim.run_until(600.0).unwrap();

    assert_eq!(exits(&d.sim, d.left), 0.0);
    let right = d.sim.get_link(d.right).unwrap().lanegroups()[0];
    let delivered = d.sim.flow_accumulator(right).unwrap().commodity_total(commodity);
    assert!(delivered > 0.0);
    let generated = 900.0 * 600.0 / 3600.0;
    let accounted = d.sim.total_vehicles() + delivered + d.sim.source_backlog(d.entry);
    assert_approx_eq!(generated, accounted, 1e-6);
}

#[test]
fn commodities_split_independently() {
    let mut d = diverge();
    let road = d.road;
    let cars = cars(&mut d.sim);
    let trucks = d
        .sim
        .add_commodity(&CommodityAttributes {
            name: "trucks",
            pathfull: false,
            paths: &[],
        })
        .unwrap();
    constant_demand(&mut d.sim, cars, d.entry, 900.0);
    constant_demand(&mut d.sim, trucks, d.entry, 300.0);
    d.sim
        .set_split_profile(road, cars, SplitProfile::constant(&[(d.left, 1.0)]))
        .unwrap();
    d.sim
        .set_split_profile(
            road,
            trucks,
            SplitProfile::constant(&[(d.left, 0.5), (d.right, 0.5)]),
        )
        .unwrap();
    d.sim.add_model(&ModelConfig::ctm("ctm", 2.0), None).unwrap();
    d.sim.initialize(0.0).unwrap();
    d.sim.run_until(600.0).unwrap();

    let lg = |link: LinkId| d.sim.get_link(link).unwrap().lanegroups()[0];
    let left = d.sim.flow_accumulator(lg(d.left)).unwrap();
    let right = d.sim.flow_accumulator(lg(d.right)).unwrap();
    assert_eq!(right.commodity_total(cars), 0.0);
    assert!(left.commodity_total(cars) > 0.0);
    assert_approx_eq!(
        left.commodity_total(trucks),
        right.commodity_total(trucks),
        1e-6
    );
}

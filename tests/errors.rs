mod common;

use common::*;
use traffic_flow::{
    CommodityAttributes, LinkAttributes, LinkId, ModelConfig, RoadParams, SimError, Simulation,
    SplitProfile,
};

struct Fork {
    sim: Simulation,
    entry: LinkId,
    road: LinkId,
    left: LinkId,
    right: LinkId,
}

/// A source feeding a road that forks into two sinks, without connections at the fork.
fn fork() -> Fork {
    let mut sim = Simulation::new();
    let nodes = [(); 5].map(|_| sim.add_node());
    let entry = link(&mut sim, nodes[0], nodes[1], STEP_LENGTH, 1);
    let road = link(&mut sim, nodes[1], nodes[2], 5.0 * STEP_LENGTH, 1);
    let left = link(&mut sim, nodes[2], nodes[3], STEP_LENGTH, 1);
    let right = link(&mut sim, nodes[2], nodes[4], STEP_LENGTH, 1);
    connect(&mut sim, entry, road);
    Fork {
        sim,
        entry,
        road,
        left,
        right,
    }
}

fn ctm() -> ModelConfig {
    ModelConfig::ctm("ctm", 2.0)
}

#[test]
fn split_to_unconnected_outlink() {
    let mut f = fork();
    connect(&mut f.sim, f.road, f.left);
    let commodity = cars(&mut f.sim);
    f.sim
        .set_split_profile(
            f.road,
            commodity,
            SplitProfile::constant(&[(f.left, 0.5), (f.right, 0.5)]),
        )
        .unwrap();
    f.sim.add_model(&ctm(), None).unwrap();
    let err = f.sim.initialize(0.0).unwrap_err();
    match err {
        SimError::UnreachableOutlink {
            link,
            outlink,
            commodity: c,
        } => {
            assert_eq!(link, f.road);
            assert_eq!(outlink, f.right);
            assert_eq!(c, commodity);
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn split_to_unconnected_outlink_at_runtime() {
    let mut f = fork();
    connect(&mut f.sim, f.road, f.left);
    connect(&mut f.sim, f.road, f.right);
    let commodity = cars(&mut f.sim);
    constant_demand(&mut f.sim, commodity, f.entry, 600.0);
    f.sim
        .set_split_profile(f.road, commodity, SplitProfile::constant(&[(f.left, 1.0)]))
        .unwrap();
    f.sim.add_model(&ctm(), None).unwrap();
    f.sim.initialize(0.0).unwrap();
    f.sim.run_until(60.0).unwrap();

    let result = f
        .sim
        .set_split_profile(f.road, commodity, SplitProfile::constant(&[(f.entry, 1.0)]));
    assert!(matches!(
        result,
        Err(SimError::UnreachableOutlink { outlink, .. }) if outlink == f.entry
    ));
    f.sim.run_until(120.0).unwrap();
}

#[test]
fn fork_without_split_ratios() {
    let mut f = fork();
    connect(&mut f.sim, f.road, f.left);
    connect(&mut f.sim, f.road, f.right);
    let commodity = cars(&mut f.sim);
    f.sim.add_model(&ctm(), None).unwrap();
    assert!(matches!(
        f.sim.initialize(0.0),
        Err(SimError::MissingSplitRatios { link, commodity: c }) if link == f.road && c == commodity
    ));
}

#[test]
fn path_must_be_linear() {
    let mut f = fork();
    match f.sim.add_path(&[f.entry, f.road, f.right, f.left]) {
        Err(SimError::NotALinearPath { links }) => assert_eq!(links, vec![f.right, f.left]),
        other => panic!("expected NotALinearPath, got {:?}", other),
    }
    assert!(matches!(
        f.sim.add_path(&[]),
        Err(SimError::NotALinearPath { .. })
    ));
}

#[test]
fn path_needs_connections() {
    let mut f = fork();
    let path = f.sim.add_path(&[f.entry, f.road, f.left]).unwrap();
    f.sim
        .add_commodity(&CommodityAttributes {
            name: "buses",
            pathfull: true,
            paths: &[path],
        })
        .unwrap();
    f.sim.add_model(&ctm(), None).unwrap();
    assert!(matches!(
        f.sim.initialize(0.0),
        Err(SimError::PathNotConnected { path: p, link, next })
            if p == path && link == f.road && next == f.left
    ));
}

#[test]
fn path_must_end_on_a_sink() {
    let mut f = fork();
    connect(&mut f.sim, f.road, f.left);
    connect(&mut f.sim, f.road, f.right);
    let path = f.sim.add_path(&[f.entry, f.road]).unwrap();
    f.sim
        .add_commodity(&CommodityAttributes {
            name: "buses",
            pathfull: true,
            paths: &[path],
        })
        .unwrap();
    f.sim.add_model(&ctm(), None).unwrap();
    assert!(matches!(
        f.sim.initialize(0.0),
        Err(SimError::PathEndsBeforeSink { link, .. }) if link == f.road
    ));
}

#[test]
fn demand_must_enter_a_source() {
    let mut f = fork();
    connect(&mut f.sim, f.road, f.left);
    let commodity = cars(&mut f.sim);
    f.sim
        .set_split_profile(f.road, commodity, SplitProfile::constant(&[(f.left, 1.0)]))
        .unwrap();
    constant_demand(&mut f.sim, commodity, f.road, 600.0);
    f.sim.add_model(&ctm(), None).unwrap();
    assert!(matches!(
        f.sim.initialize(0.0),
        Err(SimError::InvalidConfig(_))
    ));
}

#[test]
fn jam_density_below_critical_density() {
    let mut sim = Simulation::new();
    let nodes = [(); 2].map(|_| sim.add_node());
    sim.add_link(&LinkAttributes {
        start_node: nodes[0],
        end_node: nodes[1],
        length: STEP_LENGTH,
        lanes: 1,
        lanegroups: &[],
        road_params: RoadParams {
            jam_density_vpkpl: 10.0,
            ..RoadParams::default()
        },
    })
    .unwrap();
    sim.add_model(&ctm(), None).unwrap();
    assert!(matches!(
        sim.initialize(0.0),
        Err(SimError::InvalidRoadParams { .. })
    ));
}

#[test]
fn model_assignment() {
    let mut f = fork();
    connect(&mut f.sim, f.road, f.left);
    f.sim.add_model(&ctm(), None).unwrap();
    assert!(matches!(
        f.sim.add_model(&ctm(), Some(&[f.entry])),
        Err(SimError::DuplicateModel(name)) if name == "ctm"
    ));
    assert!(matches!(
        f.sim.add_model(&ModelConfig::ctm("other", 2.0), None),
        Err(SimError::MultipleDefaultModels)
    ));
    let queue = ModelConfig {
        model_type: "spaceq".into(),
        ..ModelConfig::ctm("queue", 2.0)
    };
    assert!(matches!(
        f.sim.add_model(&queue, Some(&[f.entry])),
        Err(SimError::NotImplemented(_))
    ));
    let zero_step = ModelConfig::ctm("zero", 0.0);
    assert!(matches!(
        f.sim.add_model(&zero_step, Some(&[f.entry])),
        Err(SimError::InvalidConfig(_))
    ));
}

#[test]
fn link_assigned_twice() {
    let mut f = fork();
    f.sim
        .add_model(&ModelConfig::ctm("a", 2.0), Some(&[f.entry, f.road]))
        .unwrap();
    f.sim
        .add_model(&ModelConfig::ctm("b", 2.0), Some(&[f.road]))
        .unwrap();
    assert!(matches!(
        f.sim.initialize(0.0),
        Err(SimError::LinkAssignedTwice { link }) if link == f.road
    ));
}

#[test]
fn link_without_model() {
    let mut f = fork();
    f.sim
        .add_model(&ctm(), Some(&[f.entry, f.road, f.left]))
        .unwrap();
    assert!(matches!(
        f.sim.initialize(0.0),
        Err(SimError::UnassignedLink { link }) if link == f.right
    ));
}

#[test]
fn node_between_models() {
    let mut f = fork();
    connect(&mut f.sim, f.road, f.left);
    f.sim
        .add_model(&ModelConfig::ctm("upstream", 2.0), Some(&[f.entry]))
        .unwrap();
    f.sim.add_model(&ctm(), None).unwrap();
    assert!(matches!(
        f.sim.initialize(0.0),
        Err(SimError::NodeSpansModels { .. })
    ));
}

#[test]
fn lifecycle_order() {
    let mut f = fork();
    connect(&mut f.sim, f.road, f.left);
    f.sim.add_model(&ctm(), None).unwrap();
    assert!(matches!(f.sim.run_until(10.0), Err(SimError::NotInitialized)));
    assert!(matches!(f.sim.reset(), Err(SimError::NotInitialized)));

    f.sim.initialize(0.0).unwrap();
    assert!(f.sim.is_initialized());
    let node = f.sim.add_node();
    assert!(matches!(
        f.sim.add_link(&LinkAttributes {
            start_node: node,
            end_node: node,
            length: 100.0,
            lanes: 1,
            lanegroups: &[],
            road_params: RoadParams::default(),
        }),
        Err(SimError::AlreadyInitialized)
    ));
    assert!(matches!(
        f.sim.initialize(0.0),
        Err(SimError::AlreadyInitialized)
    ));
}

#[test]
fn error_names_the_links() {
    let mut f = fork();
    connect(&mut f.sim, f.road, f.left);
    let commodity = cars(&mut f.sim);
    f.sim
        .set_split_profile(
            f.road,
            commodity,
            SplitProfile::constant(&[(f.left, 0.5), (f.right, 0.5)]),
        )
        .unwrap();
    f.sim.add_model(&ctm(), None).unwrap();
    let message = f.sim.initialize(0.0).unwrap_err().to_string();
    assert!(message.contains(&format!("{:?}", f.road)), "{}", message);
    assert!(message.contains(&format!("{:?}", f.right)), "{}", message);
}

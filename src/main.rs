use std::time::Instant;

use traffic_flow::{
    CommodityAttributes, Demand, DemandOrigin, Interval, LinkAttributes, ModelConfig, Profile1D,
    RoadConnectionAttributes, RoadParams, Simulation, SplitProfile,
};

/// A freeway of `segments` two-lane links, with an off-ramp after every fourth one.
fn corridor(segments: usize) -> Simulation {
    let mut sim = Simulation::new();
    let road_params = RoadParams::default();
    let commodity = sim
        .add_commodity(&CommodityAttributes {
            name: "cars",
            pathfull: false,
            paths: &[],
        })
        .unwrap();

    let mut node = sim.add_node();
    let mut prev = None;
    let mut links = vec![];
    let mut ramps = vec![];
    for i in 0..segments {
        let next = sim.add_node();
        let link = sim
            .add_link(&LinkAttributes {
                start_node: node,
                end_node: next,
                length: 500.0,
                lanes: 2,
                lanegroups: &[Interval::new(1, 1), Interval::new(2, 2)],
                road_params,
            })
            .unwrap();
        if let Some(prev) = prev {
            sim.add_road_connection(&RoadConnectionAttributes {
                start_link: prev,
                end_link: link,
                start_lanes: None,
                end_lanes: None,
                capacity_vph: None,
            })
            .unwrap();
        }
        if i % 4 == 3 && i + 1 < segments {
            let ramp_end = sim.add_node();
            let ramp = sim
                .add_link(&LinkAttributes {
                    start_node: next,
                    end_node: ramp_end,
                    length: 200.0,
                    lanes: 1,
                    lanegroups: &[],
                    road_params,
                })
                .unwrap();
            sim.add_road_connection(&RoadConnectionAttributes {
                start_link: link,
                end_link: ramp,
                start_lanes: Some(Interval::new(2, 2)),
                end_lanes: None,
                capacity_vph: Some(1500.0),
            })
            .unwrap();
            ramps.push((i, ramp));
        }
        links.push(link);
        prev = Some(link);
        node = next;
    }
    for (i, ramp) in ramps {
        let split = [(ramp, 0.1), (links[i + 1], 0.9)];
        sim.set_split_profile(links[i], commodity, SplitProfile::constant(&split))
            .unwrap();
    }

    sim.add_demand(Demand {
        commodity,
        origin: DemandOrigin::Link(links[0]),
        profile: Profile1D::from_vph(0.0, None, &[3000.0]),
    })
    .unwrap();
    sim.add_model(&ModelConfig::ctm("freeway", 2.0), None)
        .unwrap();
    sim
}

fn main() {
    let mut sim = corridor(200);
    sim.initialize(0.0).unwrap();

    println!("Simulating...");
    const HOUR: f64 = 3600.0;
    let start = Instant::now();
    sim.run_until(HOUR).unwrap();
    let elapsed = start.elapsed();
    println!(
        "Simulated {} s in {:?} --> {:.0}x real time ({:.0} vehs in network)",
        HOUR,
        elapsed,
        HOUR / elapsed.as_secs_f64(),
        sim.total_vehicles(),
    );
}

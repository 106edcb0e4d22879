use crate::config::RoadParams;
use crate::lanechange::{Side, SideProbabilities};
use crate::state::{State, StateMap, StateMapExt, TOLERANCE};
use crate::{LaneGroupId, SimError};
use log::warn;

/// The fundamental diagram of one cell, scaled to the simulation step.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CellParams {
    /// Maximum flow in vehicles per step.
    pub capacity: f64,
    /// Storage capacity in vehicles.
    pub max_vehicles: f64,
    /// Free-flow speed in cells per step, at most one.
    pub ffspeed: f64,
    /// Congestion wave speed in cells per step, at most one.
    pub wspeed: f64,
}

impl CellParams {
    /// Derives the step-scaled parameters of a cell.
    ///
    /// # Parameters
    /// * `road` - The road parameters, per lane
    /// * `lanes` - The number of lanes in the cell
    /// * `length` - The cell length in m
    /// * `dt` - The simulation step in s
    pub fn new(road: &RoadParams, lanes: u32, length: f64, dt: f64) -> Result<Self, String> {
        if road.capacity_vphpl <= 0.0 || road.speed_kph <= 0.0 || road.jam_density_vpkpl <= 0.0 {
            return Err(format!("non-positive parameter in {:?}", road));
        }
        if length <= 0.0 {
            return Err(format!("non-positive cell length {}", length));
        }

        let lanes = lanes as f64;
        let capacity = road.capacity_vphpl * lanes * dt / 3600.0;
        let max_vehicles = road.jam_density_vpkpl * lanes * length / 1000.0;

        let mut ffspeed = road.speed_mps() * dt / length;
        if ffspeed > 1.0 {
            warn!(
                "free-flow speed covers {:.3} cells of {:.1} m per step; clamping to 1",
                ffspeed, length
            );
            ffspeed = 1.0;
        }

        let congested_room = max_vehicles - capacity / ffspeed;
        if congested_room <= 0.0 {
            return Err(format!(
                "critical density exceeds jam density ({:.3} vs {:.3} vehicles per cell)",
                capacity / ffspeed,
                max_vehicles
            ));
        }
        let wspeed = f64::min(capacity / congested_room, 1.0);

        Ok(Self {
            capacity,
            max_vehicles,
            ffspeed,
            wspeed,
        })
    }
}

/// The smallest spatial unit of a lane group.
#[derive(Clone, Debug)]
pub struct Cell {
    /// The lane group this cell belongs to.
    lanegroup: LaneGroupId,
    /// Position within the lane group, 0 being the most upstream.
    index: usize,
    /// Length in m.
    length: f64,
    params: CellParams,
    /// Vehicles per state.
    vehicles: StateMap,
    /// Forward demand published for this step.
    pub(crate) demand_dwn: StateMap,
    /// Demand towards the left neighbour lane group published for this step.
    pub(crate) demand_left: StateMap,
    /// Demand towards the right neighbour lane group published for this step.
    pub(crate) demand_right: StateMap,
    /// Supply published for this step.
    pub(crate) supply: f64,
}

impl Cell {
    pub fn new(lanegroup: LaneGroupId, index: usize, length: f64, params: CellParams) -> Self {
        Self {
            lanegroup,
            index,
            length,
            params,
            vehicles: StateMap::new(),
            demand_dwn: StateMap::new(),
            demand_left: StateMap::new(),
            demand_right: StateMap::new(),
            supply: 0.0,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Gets the cell length in m.
    pub fn length(&self) -> f64 {
        self.length
    }

    pub fn params(&self) -> &CellParams {
        &self.params
    }

    pub(crate) fn set_params(&mut self, params: CellParams) {
        self.params = params;
    }

    pub fn max_vehicles(&self) -> f64 {
        self.params.max_vehicles
    }

    /// Gets the vehicles in the cell, per state.
    pub fn vehicles(&self) -> &StateMap {
        &self.vehicles
    }

    pub fn total_vehicles(&self) -> f64 {
        self.vehicles.total()
    }

    /// The flow this cell can send in one step, apportioned over states by their share
    /// of the cell contents.
    pub fn demand(&self) -> StateMap {
        let total = self.total_vehicles();
        if total <= 0.0 {
            return StateMap::new();
        }
        let sendable = f64::min(self.params.ffspeed * total, self.params.capacity);
        self.vehicles.scaled(sendable / total)
    }

    /// The flow this cell can receive in one step.
    pub fn supply(&self) -> f64 {
        let room = self.params.max_vehicles - self.total_vehicles();
        (self.params.wspeed * room).min(self.params.capacity).max(0.0)
    }

    /// Room left before the cell reaches its storage capacity.
    pub fn room(&self) -> f64 {
        (self.params.max_vehicles - self.total_vehicles()).max(0.0)
    }

    /// Adds vehicles. The caller must already have limited the flow to the cell's supply.
    pub fn add_vehicles(&mut self, flows: &StateMap) {
        self.vehicles.add_scaled(flows, 1.0);
        debug_assert!(
            self.total_vehicles() <= self.params.max_vehicles + TOLERANCE,
            "cell {} of lane group {:?} over capacity",
            self.index,
            self.lanegroup
        );
    }

    /// Removes vehicles, failing if any state would go negative beyond tolerance.
    pub fn release_vehicles(&mut self, flows: &StateMap) -> Result<(), SimError> {
        for (state, flow) in flows {
            if *flow <= 0.0 {
                continue;
            }
            let count = self.vehicles.get(state).copied().unwrap_or(0.0) - flow;
            if count < -TOLERANCE {
                return Err(SimError::NegativeCount {
                    lanegroup: self.lanegroup,
                    cell: self.index,
                    deficit: -count,
                });
            }
            if count > 0.0 {
                self.vehicles.insert(*state, count);
            } else {
                self.vehicles.remove(state);
            }
        }
        Ok(())
    }

    /// Removes every vehicle and clears the published demand and supply.
    pub fn reset(&mut self) {
        self.vehicles.clear();
        self.demand_dwn.clear();
        self.demand_left.clear();
        self.demand_right.clear();
        self.supply = 0.0;
    }

    /// Publishes this step's demand and supply, splitting the demand of every state
    /// into its forward and lateral shares.
    ///
    /// States without lane-change probabilities send all of their demand forward.
    pub(crate) fn update_demand_supply<'a>(
        &mut self,
        probabilities: impl Fn(&State) -> Option<&'a SideProbabilities>,
    ) {
        self.demand_dwn.clear();
        self.demand_left.clear();
        self.demand_right.clear();
        self.supply = self.supply();

        for (state, demand) in self.demand() {
            let Some(probs) = probabilities(&state) else {
                self.demand_dwn.insert(state, demand);
                continue;
            };
            for (side, prob) in probs {
                let share = demand * prob;
                if share <= 0.0 {
                    continue;
                }
                let target = match side {
                    Side::Left => &mut self.demand_left,
                    Side::Middle => &mut self.demand_dwn,
                    Side::Right => &mut self.demand_right,
                };
                target.insert(state, share);
            }
        }
    }
}

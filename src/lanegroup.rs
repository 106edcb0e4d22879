use crate::cell::{Cell, CellParams};
use crate::config::{LaneChangeConfig, RoadParams};
use crate::lanechange::{Directions, LaneSelector, LaneSpace};
use crate::state::{State, StateMap, StateMapExt, TOLERANCE};
use crate::util::Interval;
use crate::{CommodityId, LaneGroupId, LinkId, RoadConnectionId, SimError};
use itertools::Itertools;
use smallvec::SmallVec;
use std::collections::BTreeMap;

/// Running totals of the vehicles that left a lane group, per state.
#[derive(Clone, Debug, Default)]
pub struct FlowAccumulator {
    per_state: StateMap,
}

impl FlowAccumulator {
    pub fn add(&mut self, flows: &StateMap) {
        self.per_state.add_scaled(flows, 1.0);
    }

    /// Vehicles counted so far for one state.
    pub fn get(&self, state: &State) -> f64 {
        self.per_state.get(state).copied().unwrap_or(0.0)
    }

    /// Vehicles counted so far for one commodity.
    pub fn commodity_total(&self, commodity: CommodityId) -> f64 {
        self.per_state
            .iter()
            .filter(|(state, _)| state.commodity == commodity)
            .map(|(_, count)| count)
            .sum()
    }

    /// Vehicles counted so far over all states.
    pub fn total(&self) -> f64 {
        self.per_state.total()
    }

    pub fn per_state(&self) -> &StateMap {
        &self.per_state
    }
}

/// A set of adjacent lanes on a link sharing the same downstream connectivity,
/// modelled as a queue of cells.
#[derive(Clone, Debug)]
pub struct LaneGroup {
    id: LaneGroupId,
    link: LinkId,
    /// The lanes covered, lane 1 being the leftmost.
    lanes: Interval<u32>,
    /// Length in m.
    length: f64,
    /// The road parameters currently in effect.
    road: RoadParams,
    /// The step the cells were built for, in s.
    dt: f64,
    /// The cells, from upstream to downstream.
    cells: Vec<Cell>,
    /// The lane groups to the left and right on the same link.
    pub(crate) neighbours: (Option<LaneGroupId>, Option<LaneGroupId>),
    /// Road connections leaving this lane group, by the link they lead to.
    pub(crate) outlink2rcs: BTreeMap<LinkId, SmallVec<[RoadConnectionId; 2]>>,
    /// Legal lane-change directions of each state present on the link.
    pub(crate) state2directions: BTreeMap<State, Directions>,
    pub(crate) lane_selectors: BTreeMap<CommodityId, LaneSelector>,
    /// Supply still unclaimed by arriving vehicles this step.
    pub(crate) entry_room: f64,
    flow_accumulator: FlowAccumulator,
}

impl LaneGroup {
    pub(crate) fn new(
        id: LaneGroupId,
        link: LinkId,
        lanes: Interval<u32>,
        length: f64,
        road: RoadParams,
    ) -> Self {
        Self {
            id,
            link,
            lanes,
            length,
            road,
            dt: 0.0,
            cells: vec![],
            neighbours: (None, None),
            outlink2rcs: BTreeMap::new(),
            state2directions: BTreeMap::new(),
            lane_selectors: BTreeMap::new(),
            entry_room: 0.0,
            flow_accumulator: Default::default(),
        }
    }

    pub fn id(&self) -> LaneGroupId {
        self.id
    }

    pub fn link_id(&self) -> LinkId {
        self.link
    }

    pub fn lanes(&self) -> Interval<u32> {
        self.lanes
    }

    pub fn num_lanes(&self) -> u32 {
        self.lanes.count()
    }

    /// Gets the length of the lane group in m.
    pub fn length(&self) -> f64 {
        self.length
    }

    pub fn road_params(&self) -> &RoadParams {
        &self.road
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    /// The cell adjacent to the downstream node.
    pub fn dnstream_cell(&self) -> Option<&Cell> {
        self.cells.last()
    }

    pub fn upstream_cell(&self) -> Option<&Cell> {
        self.cells.first()
    }

    /// Storage capacity in vehicles.
    pub fn max_vehicles(&self) -> f64 {
        self.cells.iter().map(|c| c.max_vehicles()).sum()
    }

    pub fn total_vehicles(&self) -> f64 {
        self.cells.iter().map(|c| c.total_vehicles()).sum()
    }

    /// Vehicles per state, summed over cells.
    pub fn vehicles(&self) -> StateMap {
        let mut out = StateMap::new();
        for cell in &self.cells {
            out.add_scaled(cell.vehicles(), 1.0);
        }
        out
    }

    /// The flow the downstream cell can currently send.
    pub fn demand(&self) -> StateMap {
        self.dnstream_cell().map(|c| c.demand()).unwrap_or_default()
    }

    /// The flow the upstream cell can currently receive.
    pub fn supply(&self) -> f64 {
        self.upstream_cell().map(|c| c.supply()).unwrap_or(0.0)
    }

    /// Unclaimed entry supply per lane for the current step.
    pub fn space_per_lane(&self) -> f64 {
        self.entry_room / self.num_lanes() as f64
    }

    /// Lane distance between this lane group and the lane range `[min, max]`.
    pub fn distance_to_lanes(&self, min: u32, max: u32) -> u32 {
        self.lanes.distance_to(&Interval::new(min, max))
    }

    /// Whether some road connection leads from this lane group to `outlink`.
    pub fn reaches(&self, outlink: LinkId) -> bool {
        self.outlink2rcs.contains_key(&outlink)
    }

    pub fn flow_accumulator(&self) -> &FlowAccumulator {
        &self.flow_accumulator
    }

    pub fn lane_selector(&self, commodity: CommodityId) -> Option<&LaneSelector> {
        self.lane_selectors.get(&commodity)
    }

    /// Divides the lane group into `count` cells of `cell_length` m each.
    pub(crate) fn create_cells(
        &mut self,
        count: usize,
        cell_length: f64,
        dt: f64,
    ) -> Result<(), String> {
        let params = CellParams::new(&self.road, self.num_lanes(), cell_length, dt)?;
        self.dt = dt;
        self.cells = (0..count)
            .map(|i| Cell::new(self.id, i, cell_length, params))
            .collect();
        Ok(())
    }

    /// Replaces the road parameters; the cells pick them up from the next step.
    pub(crate) fn set_road_params(&mut self, road: RoadParams) -> Result<(), String> {
        let mut params = Vec::with_capacity(self.cells.len());
        for cell in &self.cells {
            params.push(CellParams::new(&road, self.num_lanes(), cell.length(), self.dt)?);
        }
        for (cell, params) in self.cells.iter_mut().zip(params) {
            cell.set_params(params);
        }
        self.road = road;
        Ok(())
    }

    /// Creates one lane selector per commodity present on the link.
    pub(crate) fn create_lane_selectors(&mut self, config: &LaneChangeConfig, model_dt: f64) {
        let commodities = self
            .state2directions
            .keys()
            .map(|s| s.commodity)
            .dedup()
            .collect::<SmallVec<[CommodityId; 4]>>();
        self.lane_selectors = commodities
            .into_iter()
            .map(|commodity| {
                let selector = LaneSelector::new(
                    commodity,
                    config.policy,
                    config.dt_update,
                    model_dt,
                    self.state2directions.iter(),
                );
                (commodity, selector)
            })
            .collect();
    }

    /// Recomputes the lane-change probabilities of one commodity.
    /// Returns the time until the next refresh, if any.
    pub(crate) fn refresh_lane_selector(
        &mut self,
        commodity: CommodityId,
        space: &LaneSpace,
    ) -> Option<f64> {
        let selector = self.lane_selectors.get_mut(&commodity)?;
        selector.update_lane_change_probabilities(space);
        selector.refresh_interval()
    }

    /// Publishes the demand and supply of every cell for this step.
    pub(crate) fn update_demand_supply(&mut self) {
        let selectors = &self.lane_selectors;
        for cell in &mut self.cells {
            cell.update_demand_supply(|state| {
                selectors
                    .get(&state.commodity)
                    .and_then(|s| s.get_lanechange_probabilities(state.key))
            });
        }
        self.entry_room = self.cells.first().map(|c| c.supply).unwrap_or(0.0);
    }

    /// Inserts arriving vehicles into the upstream cell, consuming entry supply.
    pub(crate) fn add_vehicle_packet(&mut self, vehicles: &StateMap) {
        if let Some(cell) = self.cells.first_mut() {
            cell.add_vehicles(vehicles);
            self.entry_room = (self.entry_room - vehicles.total()).max(0.0);
        }
    }

    /// Removes exiting vehicles from the downstream cell.
    pub(crate) fn release_vehicles(&mut self, flows: &StateMap) -> Result<(), SimError> {
        match self.cells.last_mut() {
            Some(cell) => cell.release_vehicles(flows),
            None => Ok(()),
        }
    }

    pub(crate) fn update_flow_accumulators(&mut self, flows: &StateMap) {
        self.flow_accumulator.add(flows);
    }

    /// Moves the published forward demand of each cell into the next one, as far as
    /// the next cell's published supply allows.
    pub(crate) fn advance_cells(&mut self) -> Result<(), SimError> {
        let moves = self
            .cells
            .windows(2)
            .enumerate()
            .filter_map(|(i, pair)| {
                let sendable = pair[0].demand_dwn.total();
                if sendable <= TOLERANCE {
                    return None;
                }
                let flow = f64::min(sendable, pair[1].supply);
                Some((i, pair[0].demand_dwn.scaled(flow / sendable)))
            })
            .collect::<Vec<_>>();

        for (i, flows) in moves {
            self.cells[i].release_vehicles(&flows)?;
            self.cells[i + 1].add_vehicles(&flows);
        }
        Ok(())
    }

    pub(crate) fn cell_mut(&mut self, index: usize) -> &mut Cell {
        &mut self.cells[index]
    }

    /// Removes all vehicles and clears the flow counts.
    pub(crate) fn reset(&mut self) {
        self.cells.iter_mut().for_each(|c| c.reset());
        self.entry_room = 0.0;
        self.flow_accumulator = Default::default();
    }
}

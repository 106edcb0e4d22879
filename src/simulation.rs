use crate::config::ModelConfig;
#[cfg(feature = "debug")]
use crate::debug::take_debug_frame;
use crate::dispatch::{Dispatcher, Event, EventKind};
use crate::lanegroup::{FlowAccumulator, LaneGroup};
use crate::link::{Link, LinkAttributes};
use crate::model::{create_model, Model};
use crate::network::{CommodityAttributes, Demand, Network, RoadConnectionAttributes};
use crate::profile::SplitProfile;
use crate::state::{State, StateMap, StateMapExt};
use crate::{
    CommodityId, LaneGroupId, LinkId, ModelId, NodeId, PathId, RoadConnectionId, SimError,
};
use log::{debug, info};
use slotmap::SlotMap;

/// Events up to this much past the requested end time still run.
const TIME_SLACK: f64 = 1e-9; // s

struct ModelEntry {
    model: Box<dyn Model>,
    /// The links requested for the model; `None` for the default model.
    links: Option<Vec<LinkId>>,
}

/// A traffic flow simulation.
#[derive(Default)]
pub struct Simulation {
    /// The road network and its demand.
    network: Network,
    /// The flow models.
    models: SlotMap<ModelId, ModelEntry>,
    /// The pending events.
    dispatcher: Dispatcher,
    /// The time the simulation starts, or restarts after a reset, in s.
    start_time: f64,
    initialized: bool,
    /// Debugging information from the previously simulated events.
    #[cfg(feature = "debug")]
    debug: serde_json::Value,
}

impl Simulation {
    /// Creates a new simulation.
    pub fn new() -> Self {
        Default::default()
    }

    /// Adds a node to the network.
    pub fn add_node(&mut self) -> NodeId {
        self.network.add_node()
    }

    /// Adds a link, with its lane groups, to the network.
    pub fn add_link(&mut self, attributes: &LinkAttributes) -> Result<LinkId, SimError> {
        self.check_building()?;
        self.network.add_link(attributes)
    }

    /// Specifies that vehicles may move from some lanes of one link to some lanes of the next.
    pub fn add_road_connection(
        &mut self,
        attributes: &RoadConnectionAttributes,
    ) -> Result<RoadConnectionId, SimError> {
        self.check_building()?;
        self.network.add_road_connection(attributes)
    }

    /// Adds a path. Consecutive links must meet at a node, and the last one must be a sink.
    pub fn add_path(&mut self, links: &[LinkId]) -> Result<PathId, SimError> {
        self.check_building()?;
        self.network.add_path(links)
    }

    pub fn add_commodity(
        &mut self,
        attributes: &CommodityAttributes,
    ) -> Result<CommodityId, SimError> {
        self.check_building()?;
        self.network.add_commodity(attributes)
    }

    pub fn add_demand(&mut self, demand: Demand) -> Result<(), SimError> {
        self.check_building()?;
        self.network.add_demand(demand)
    }

    /// Adds a flow model governing the given links, or every link no other model
    /// claims if `links` is `None`.
    pub fn add_model(
        &mut self,
        config: &ModelConfig,
        links: Option<&[LinkId]>,
    ) -> Result<ModelId, SimError> {
        self.check_building()?;
        if self.models.values().any(|m| m.model.name() == config.name) {
            return Err(SimError::DuplicateModel(config.name.clone()));
        }
        if links.is_none() && self.models.values().any(|m| m.links.is_none()) {
            return Err(SimError::MultipleDefaultModels);
        }
        let model = create_model(config)?;
        Ok(self.models.insert(ModelEntry {
            model,
            links: links.map(|l| l.to_vec()),
        }))
    }

    /// Sets the split ratios of a link-local commodity leaving `link`.
    /// After initialization the new ratios apply from the next step.
    pub fn set_split_profile(
        &mut self,
        link: LinkId,
        commodity: CommodityId,
        profile: SplitProfile,
    ) -> Result<(), SimError> {
        self.network.set_split_profile(link, commodity, profile)
    }

    /// Changes the capacity of a lane group, e.g. for an incident or a lane closure.
    /// After initialization the new capacity applies from the next step.
    pub fn set_lanegroup_capacity(
        &mut self,
        lanegroup: LaneGroupId,
        capacity_vphpl: f64,
    ) -> Result<(), SimError> {
        let mut road = *self
            .network
            .lanegroup(lanegroup)
            .ok_or(SimError::UnknownEntity("lane group"))?
            .road_params();
        road.capacity_vphpl = capacity_vphpl;
        self.network.set_lanegroup_road_params(lanegroup, road)
    }

    /// Finalizes the network, builds the models and schedules their first events.
    pub fn initialize(&mut self, start_time: f64) -> Result<(), SimError> {
        self.check_building()?;
        self.network.finalize()?;
        let assignment = self.assign_links()?;
        self.assign_nodes()?;

        for (id, links) in assignment {
            let entry = &mut self.models[id];
            entry.model.set_links(id, links, &self.network);
            entry.model.build(&mut self.network)?;
        }

        for demand in self.network.demands().to_vec() {
            let link_id = self.network.origin_link(demand.origin)?;
            let link = &self.network.links[link_id];
            if !link.is_source() {
                return Err(SimError::InvalidConfig(format!(
                    "demand enters link {:?}, which has upstream links",
                    link_id
                )));
            }
            let model = link.model.ok_or(SimError::UnassignedLink { link: link_id })?;
            self.models[model]
                .model
                .create_source(&demand, &self.network)?;
        }

        self.start_time = start_time;
        self.schedule(start_time);
        self.initialized = true;
        info!(
            "simulation initialized at {} s: {} models, {} links, {} demands",
            start_time,
            self.models.len(),
            self.network.links.len(),
            self.network.demands.len()
        );
        Ok(())
    }

    /// Runs every event up to and including `end_time`.
    pub fn run_until(&mut self, end_time: f64) -> Result<(), SimError> {
        self.check_initialized()?;
        while let Some(time) = self.dispatcher.peek_time() {
            if time > end_time + TIME_SLACK {
                break;
            }
            let Some(event) = self.dispatcher.pop() else {
                break;
            };
            if let Some(next) = self.handle(event)? {
                self.dispatcher.register_event(next);
            }
        }
        self.dispatcher.advance_to(end_time);

        #[cfg(feature = "debug")]
        {
            self.debug = take_debug_frame();
        }
        Ok(())
    }

    /// Runs the simulation forward by `duration` seconds.
    pub fn advance(&mut self, duration: f64) -> Result<(), SimError> {
        self.run_until(self.time() + duration)
    }

    /// Executes one event, returning the event it schedules next.
    pub fn handle(&mut self, event: Event) -> Result<Option<Event>, SimError> {
        let next = match event.kind {
            EventKind::FluidFlowUpdate(id) => {
                let entry = self
                    .models
                    .get_mut(id)
                    .ok_or(SimError::UnknownEntity("model"))?;
                entry.model.update_flow(&mut self.network, event.time)?;
                Some(event.time + entry.model.dt())
            }
            EventKind::FluidStateUpdate(id) => {
                let entry = self
                    .models
                    .get_mut(id)
                    .ok_or(SimError::UnknownEntity("model"))?;
                entry.model.update_state(&mut self.network, event.time)?;
                Some(event.time + entry.model.dt())
            }
            EventKind::LaneSelectorRefresh {
                lanegroup,
                commodity,
            } => self
                .network
                .refresh_lane_selector(lanegroup, commodity)
                .map(|interval| event.time + interval),
        };
        Ok(next.map(|time| Event::new(time, event.kind)))
    }

    /// Empties the network and restarts the clock at the initial start time.
    pub fn reset(&mut self) -> Result<(), SimError> {
        self.check_initialized()?;
        for entry in self.models.values_mut() {
            entry.model.reset(&mut self.network);
        }
        self.schedule(self.start_time);
        debug!("simulation reset to {} s", self.start_time);
        Ok(())
    }

    /// Gets the current simulation time in s.
    pub fn time(&self) -> f64 {
        self.dispatcher.time()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    /// Gets a reference to the link with the given ID.
    pub fn get_link(&self, link: LinkId) -> Option<&Link> {
        self.network.link(link)
    }

    /// Gets a reference to the lane group with the given ID.
    pub fn get_lanegroup(&self, lanegroup: LaneGroupId) -> Option<&LaneGroup> {
        self.network.lanegroup(lanegroup)
    }

    /// Gets a reference to the model with the given ID.
    pub fn get_model(&self, id: ModelId) -> Option<&dyn Model> {
        self.models.get(id).map(|entry| entry.model.as_ref())
    }

    /// Vehicles on a lane group.
    pub fn lanegroup_vehicles(&self, lanegroup: LaneGroupId) -> f64 {
        self.network
            .lanegroup(lanegroup)
            .map(|lg| lg.total_vehicles())
            .unwrap_or(0.0)
    }

    /// Vehicles in one cell of a lane group.
    pub fn cell_vehicles(&self, lanegroup: LaneGroupId, cell: usize) -> f64 {
        self.network
            .lanegroup(lanegroup)
            .and_then(|lg| lg.cells().get(cell))
            .map(|c| c.total_vehicles())
            .unwrap_or(0.0)
    }

    /// Vehicles of one state on a lane group.
    pub fn state_vehicles(&self, lanegroup: LaneGroupId, state: &State) -> f64 {
        self.network
            .lanegroup(lanegroup)
            .map(|lg| lg.vehicles().get(state).copied().unwrap_or(0.0))
            .unwrap_or(0.0)
    }

    /// Vehicles on a link.
    pub fn link_vehicles(&self, link: LinkId) -> f64 {
        self.network
            .link(link)
            .map(|l| {
                l.lanegroups()
                    .iter()
                    .map(|lg| self.lanegroup_vehicles(*lg))
                    .sum()
            })
            .unwrap_or(0.0)
    }

    /// The flow a lane group can currently send, per state.
    pub fn lanegroup_demand(&self, lanegroup: LaneGroupId) -> StateMap {
        self.network
            .lanegroup(lanegroup)
            .map(|lg| lg.demand())
            .unwrap_or_default()
    }

    /// The flow a lane group can currently receive.
    pub fn lanegroup_supply(&self, lanegroup: LaneGroupId) -> f64 {
        self.network
            .lanegroup(lanegroup)
            .map(|lg| lg.supply())
            .unwrap_or(0.0)
    }

    /// The vehicles that have left a lane group so far.
    pub fn flow_accumulator(&self, lanegroup: LaneGroupId) -> Option<&FlowAccumulator> {
        self.network
            .lanegroup(lanegroup)
            .map(|lg| lg.flow_accumulator())
    }

    /// Vehicles waiting to enter `link` from its sources.
    pub fn source_backlog(&self, link: LinkId) -> f64 {
        self.network
            .link(link)
            .and_then(|l| l.model())
            .and_then(|m| self.models.get(m))
            .map(|entry| entry.model.source_backlog(link))
            .unwrap_or(0.0)
    }

    /// Vehicles in the network, not counting source backlogs.
    pub fn total_vehicles(&self) -> f64 {
        self.network
            .iter_lanegroups()
            .map(|lg| lg.vehicles().total())
            .sum()
    }

    /// Gets the debugging information for the previously simulated events as JSON array.
    #[cfg(feature = "debug")]
    pub fn debug(&mut self) -> serde_json::Value {
        self.debug.clone()
    }

    fn check_building(&self) -> Result<(), SimError> {
        match self.initialized {
            true => Err(SimError::AlreadyInitialized),
            false => Ok(()),
        }
    }

    fn check_initialized(&self) -> Result<(), SimError> {
        match self.initialized {
            true => Ok(()),
            false => Err(SimError::NotInitialized),
        }
    }

    /// Gives every link to exactly one model.
    fn assign_links(&mut self) -> Result<Vec<(ModelId, Vec<LinkId>)>, SimError> {
        let mut assignment: Vec<(ModelId, Vec<LinkId>)> = vec![];
        for (id, entry) in &self.models {
            let Some(links) = &entry.links else {
                continue;
            };
            for link in links {
                let link = self
                    .network
                    .links
                    .get_mut(*link)
                    .ok_or(SimError::UnknownEntity("link"))?;
                if link.model.is_some() {
                    return Err(SimError::LinkAssignedTwice { link: link.id() });
                }
                link.model = Some(id);
            }
            assignment.push((id, links.clone()));
        }

        let default = self
            .models
            .iter()
            .find(|(_, entry)| entry.links.is_none())
            .map(|(id, _)| id);
        let mut rest = vec![];
        for link in self.network.links.values_mut() {
            if link.model.is_some() {
                continue;
            }
            let model = default.ok_or(SimError::UnassignedLink { link: link.id() })?;
            link.model = Some(model);
            rest.push(link.id());
        }
        if let Some(default) = default {
            assignment.push((default, rest));
        }
        Ok(assignment)
    }

    /// Gives every node the model of its links.
    fn assign_nodes(&mut self) -> Result<(), SimError> {
        let Network { nodes, links, .. } = &mut self.network;
        for (id, node) in nodes.iter_mut() {
            let mut models = node
                .in_links()
                .iter()
                .chain(node.out_links())
                .filter_map(|l| links[*l].model);
            let first = models.next();
            if models.any(|m| Some(m) != first) {
                return Err(SimError::NodeSpansModels { node: id });
            }
            node.model = first;
        }
        Ok(())
    }

    /// Clears the event queue and schedules the first events from `start_time`.
    fn schedule(&mut self, start_time: f64) {
        self.dispatcher.clear(start_time);
        for (id, entry) in &self.models {
            entry
                .model
                .register_with_dispatcher(id, &mut self.dispatcher, start_time);
        }
        for lg in self.network.lanegroups.values() {
            for commodity in lg.lane_selectors.keys() {
                self.dispatcher.register_event(Event::new(
                    start_time,
                    EventKind::LaneSelectorRefresh {
                        lanegroup: lg.id(),
                        commodity: *commodity,
                    },
                ));
            }
        }
    }
}

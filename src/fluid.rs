//! The cell transmission model.

use crate::config::ModelConfig;
use crate::dispatch::{Dispatcher, Event, EventKind};
use crate::model::Model;
use crate::network::{lanegroups_of, Demand, Network};
use crate::node_model::NodeModel;
use crate::source::FluidSource;
use crate::state::{StateMap, StateMapExt, TOLERANCE};
use crate::{LaneGroupId, LinkId, ModelId, NodeId, SimError};
use log::{debug, info};
use std::collections::BTreeSet;

/// Divides a lane group of `length` m into the fewest cells no longer than
/// `max_cell_length`. Boundary lane groups get a single cell.
///
/// Returns the number of cells and their length.
pub fn cells_per_lanegroup(length: f64, max_cell_length: f64, is_boundary: bool) -> (usize, f64) {
    if is_boundary || max_cell_length <= 0.0 {
        return (1, length);
    }
    let ratio = length / max_cell_length;
    let rounded = ratio.round();
    let count = if (ratio - rounded).abs() < 1e-9 {
        rounded as usize
    } else {
        ratio.floor() as usize + 1
    };
    let count = count.max(1);
    (count, length / count as f64)
}

/// A fluid model: the links it governs move vehicles as a continuum through
/// cells, and the nodes between them exchange flow through node models.
pub struct FluidModel {
    config: ModelConfig,
    id: ModelId,
    links: Vec<LinkId>,
    /// The nodes with links on both sides.
    nodes: Vec<NodeId>,
    node_models: Vec<NodeModel>,
    sources: Vec<FluidSource>,
}

impl FluidModel {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            config,
            id: ModelId::default(),
            links: vec![],
            nodes: vec![],
            node_models: vec![],
            sources: vec![],
        }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn node_models(&self) -> &[NodeModel] {
        &self.node_models
    }

    fn lanegroups<'a>(&'a self, network: &'a Network) -> impl Iterator<Item = LaneGroupId> + 'a {
        lanegroups_of(&network.links, &self.links)
    }

    /// Publishes every cell's demand and supply, then resolves every node.
    #[allow(non_snake_case)]
    fn update_flow_I(&mut self, network: &mut Network) -> Result<(), SimError> {
        for id in lanegroups_of(&network.links, &self.links).collect::<Vec<_>>() {
            network.lanegroups[id].update_demand_supply();
        }
        for node_model in &mut self.node_models {
            node_model.update_flow(network)?;
        }
        Ok(())
    }

    /// Applies the boundary flows and moves the resolved flows across nodes.
    #[allow(non_snake_case)]
    fn update_flow_II(&mut self, network: &mut Network, time: f64) -> Result<(), SimError> {
        let step_start = time - self.config.dt;
        for source in &mut self.sources {
            source.inject(network, step_start, self.config.dt)?;
        }

        for link in &self.links {
            if !network.links[*link].is_sink() {
                continue;
            }
            for lg in network.links[*link].lanegroups().to_vec() {
                let lanegroup = &mut network.lanegroups[lg];
                let flows = match lanegroup.dnstream_cell() {
                    Some(cell) => cell.demand_dwn.clone(),
                    None => continue,
                };
                lanegroup.release_vehicles(&flows)?;
                lanegroup.update_flow_accumulators(&flows);
            }
        }

        for node_model in &mut self.node_models {
            node_model.dispatch(network, step_start)?;
        }
        Ok(())
    }

    /// Moves vehicles between consecutive cells of each lane group, then between
    /// neighbouring lane groups.
    fn update_fluid_state(&mut self, network: &mut Network) -> Result<(), SimError> {
        let lanegroups = self.lanegroups(network).collect::<Vec<_>>();
        for id in &lanegroups {
            network.lanegroups[*id].advance_cells()?;
        }

        // Lateral moves, scaled to the room left in the target cell.
        let mut moves: Vec<(LaneGroupId, LaneGroupId, usize, StateMap)> = vec![];
        for id in &lanegroups {
            let lg = &network.lanegroups[*id];
            let (left, right) = lg.neighbours;
            for cell in lg.cells() {
                for (target, flows) in [(left, &cell.demand_left), (right, &cell.demand_right)] {
                    let Some(target) = target else {
                        continue;
                    };
                    if flows.total() > TOLERANCE {
                        moves.push((*id, target, cell.index(), flows.clone()));
                    }
                }
            }
        }

        // Requested inflow per target cell, turned into the fraction that fits.
        let mut factors: Vec<(LaneGroupId, usize, f64)> = vec![];
        for (_, target, index, flows) in &moves {
            match factors
                .iter_mut()
                .find(|(lg, i, _)| lg == target && i == index)
            {
                Some(entry) => entry.2 += flows.total(),
                None => factors.push((*target, *index, flows.total())),
            }
        }
        for (target, index, factor) in &mut factors {
            let room = network.lanegroups[*target]
                .cells()
                .get(*index)
                .map(|cell| cell.room())
                .unwrap_or(0.0);
            *factor = if *factor > room { room / *factor } else { 1.0 };
        }

        for (from, target, index, flows) in moves {
            let factor = factors
                .iter()
                .find(|(lg, i, _)| *lg == target && *i == index)
                .map(|(_, _, factor)| *factor)
                .unwrap_or(0.0);
            if factor <= 0.0 {
                continue;
            }
            let flows = flows.scaled(factor);
            network.lanegroups[from].cell_mut(index).release_vehicles(&flows)?;
            network.lanegroups[target].cell_mut(index).add_vehicles(&flows);
        }
        Ok(())
    }
}

impl Model for FluidModel {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn dt(&self) -> f64 {
        self.config.dt
    }

    fn links(&self) -> &[LinkId] {
        &self.links
    }

    fn set_links(&mut self, id: ModelId, links: Vec<LinkId>, network: &Network) {
        self.id = id;
        let nodes: BTreeSet<NodeId> = links
            .iter()
            .map(|l| network.links[*l].end_node())
            .filter(|n| {
                let node = &network.nodes[*n];
                !node.in_links().is_empty() && !node.out_links().is_empty()
            })
            .collect();
        self.nodes = nodes.into_iter().collect();
        self.links = links;
    }

    fn build(&mut self, network: &mut Network) -> Result<(), SimError> {
        let dt = self.config.dt;
        let mut cells = 0;
        for link_id in &self.links {
            let link = &network.links[*link_id];
            let max_cell_length = self
                .config
                .max_cell_length
                .unwrap_or_else(|| link.road_params().speed_mps() * dt);
            let is_boundary = link.is_source() || link.is_sink();
            let (count, length) = cells_per_lanegroup(link.length(), max_cell_length, is_boundary);
            let lanegroups = link.lanegroups().to_vec();
            let multi_lanegroup = lanegroups.len() > 1;
            for lg in lanegroups {
                let lanegroup = &mut network.lanegroups[lg];
                lanegroup
                    .create_cells(count, length, dt)
                    .map_err(|reason| SimError::InvalidRoadParams {
                        link: *link_id,
                        reason,
                    })?;
                if multi_lanegroup {
                    lanegroup.create_lane_selectors(&self.config.lane_change, dt);
                }
                cells += count;
            }
        }

        self.node_models = self
            .nodes
            .iter()
            .map(|id| NodeModel::new(*id, &network.nodes[*id], network, dt))
            .collect();

        info!(
            "model `{}` built: {} links, {} nodes, {} cells",
            self.config.name,
            self.links.len(),
            self.node_models.len(),
            cells
        );
        Ok(())
    }

    fn reset(&mut self, network: &mut Network) {
        for id in self.lanegroups(network).collect::<Vec<_>>() {
            network.lanegroups[id].reset();
        }
        self.sources.iter_mut().for_each(|s| s.reset());
    }

    fn register_with_dispatcher(&self, id: ModelId, dispatcher: &mut Dispatcher, start_time: f64) {
        let first = start_time + self.config.dt;
        dispatcher.register_event(Event::new(first, EventKind::FluidFlowUpdate(id)));
        dispatcher.register_event(Event::new(first, EventKind::FluidStateUpdate(id)));
    }

    fn update_flow(&mut self, network: &mut Network, time: f64) -> Result<(), SimError> {
        debug!(
            "model `{}` ({:?}): flow update at {}",
            self.config.name, self.id, time
        );
        self.update_flow_I(network)?;
        self.update_flow_II(network, time)
    }

    fn update_state(&mut self, network: &mut Network, _time: f64) -> Result<(), SimError> {
        self.update_fluid_state(network)
    }

    fn create_source(&mut self, demand: &Demand, network: &Network) -> Result<(), SimError> {
        self.sources.push(FluidSource::new(demand, network)?);
        Ok(())
    }

    fn source_backlog(&self, link: LinkId) -> f64 {
        self.sources
            .iter()
            .filter(|s| s.link() == link)
            .map(|s| s.backlog())
            .sum()
    }
}

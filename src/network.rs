//! The static road network: nodes, links, lane groups, road connections,
//! commodities, paths and demands, all held in arenas.

use crate::config::RoadParams;
use crate::lanechange::{Directions, LaneSpace, Side};
use crate::lanegroup::LaneGroup;
use crate::link::{Link, LinkAttributes};
use crate::profile::{Profile1D, SplitProfile};
use crate::splitter::PacketSplitter;
use crate::state::{PathOrLink, State};
use crate::util::Interval;
use crate::{
    CommodityId, LaneGroupId, LaneGroupSet, LinkId, LinkSet, ModelId, NodeId, PathId,
    RoadConnectionId, SimError,
};
use log::{debug, warn};
use slotmap::SlotMap;
use smallvec::SmallVec;

/// A junction.
#[derive(Clone, Debug, Default)]
pub struct Node {
    pub(crate) in_links: SmallVec<[LinkId; 4]>,
    pub(crate) out_links: SmallVec<[LinkId; 4]>,
    pub(crate) road_connections: SmallVec<[RoadConnectionId; 8]>,
    pub(crate) model: Option<ModelId>,
}

impl Node {
    pub fn in_links(&self) -> &[LinkId] {
        &self.in_links
    }

    pub fn out_links(&self) -> &[LinkId] {
        &self.out_links
    }

    pub fn road_connections(&self) -> &[RoadConnectionId] {
        &self.road_connections
    }

    pub fn model(&self) -> Option<ModelId> {
        self.model
    }
}

/// A permitted movement from a lane range of one link to a lane range of the next.
#[derive(Clone, Debug)]
pub struct RoadConnection {
    id: RoadConnectionId,
    start_link: LinkId,
    end_link: LinkId,
    /// Saturation flow in vehicles per hour; unbounded if absent.
    capacity_vph: Option<f64>,
    pub(crate) start_lanegroups: SmallVec<[LaneGroupId; 4]>,
    pub(crate) end_lanegroups: SmallVec<[LaneGroupId; 4]>,
}

impl RoadConnection {
    pub fn id(&self) -> RoadConnectionId {
        self.id
    }

    pub fn start_link(&self) -> LinkId {
        self.start_link
    }

    pub fn end_link(&self) -> LinkId {
        self.end_link
    }

    pub fn capacity_vph(&self) -> Option<f64> {
        self.capacity_vph
    }

    pub fn start_lanegroups(&self) -> &[LaneGroupId] {
        &self.start_lanegroups
    }

    pub fn end_lanegroups(&self) -> &[LaneGroupId] {
        &self.end_lanegroups
    }
}

/// The attributes of a road connection.
#[derive(Clone, Copy, Debug)]
pub struct RoadConnectionAttributes {
    pub start_link: LinkId,
    pub end_link: LinkId,
    /// Lanes of the start link served; all lanes if absent.
    pub start_lanes: Option<Interval<u32>>,
    /// Lanes of the end link served; all lanes if absent.
    pub end_lanes: Option<Interval<u32>>,
    /// Saturation flow in vehicles per hour.
    pub capacity_vph: Option<f64>,
}

/// A class of travel demand.
#[derive(Clone, Debug)]
pub struct Commodity {
    id: CommodityId,
    name: String,
    pathfull: bool,
    paths: Vec<PathId>,
}

impl Commodity {
    pub fn id(&self) -> CommodityId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether vehicles of this commodity follow fixed paths.
    pub fn pathfull(&self) -> bool {
        self.pathfull
    }

    pub fn paths(&self) -> &[PathId] {
        &self.paths
    }
}

/// The attributes of a commodity.
pub struct CommodityAttributes<'a> {
    pub name: &'a str,
    /// Pathfull commodities are tracked per path, the others per next link.
    pub pathfull: bool,
    /// The paths available to a pathfull commodity.
    pub paths: &'a [PathId],
}

/// A linear sequence of links, ending on a sink.
#[derive(Clone, Debug)]
pub struct Path {
    links: Vec<LinkId>,
}

impl Path {
    pub fn links(&self) -> &[LinkId] {
        &self.links
    }
}

/// Where the vehicles of a demand enter the network.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DemandOrigin {
    /// At a source link, for a link-local commodity.
    Link(LinkId),
    /// At the first link of a path, for a pathfull commodity.
    Path(PathId),
}

/// A time-varying inflow of one commodity.
#[derive(Clone, Debug)]
pub struct Demand {
    pub commodity: CommodityId,
    pub origin: DemandOrigin,
    /// Rate in vehicles per second.
    pub profile: Profile1D,
}

/// The road network and its travel demand.
#[derive(Clone, Debug, Default)]
pub struct Network {
    pub(crate) nodes: SlotMap<NodeId, Node>,
    pub(crate) links: LinkSet,
    pub(crate) lanegroups: LaneGroupSet,
    pub(crate) road_connections: SlotMap<RoadConnectionId, RoadConnection>,
    pub(crate) commodities: SlotMap<CommodityId, Commodity>,
    pub(crate) paths: SlotMap<PathId, Path>,
    pub(crate) demands: Vec<Demand>,
}

impl Network {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn add_node(&mut self) -> NodeId {
        self.nodes.insert(Node::default())
    }

    /// Adds a link and its lane groups.
    pub fn add_link(&mut self, attribs: &LinkAttributes) -> Result<LinkId, SimError> {
        if !self.nodes.contains_key(attribs.start_node) || !self.nodes.contains_key(attribs.end_node)
        {
            return Err(SimError::UnknownEntity("node"));
        }
        if !(attribs.length > 0.0) || attribs.lanes == 0 {
            return Err(SimError::InvalidConfig(format!(
                "a link needs a positive length and at least one lane, got {} m and {} lanes",
                attribs.length, attribs.lanes
            )));
        }
        let ranges = lanegroup_ranges(attribs.lanes, attribs.lanegroups)?;

        let link_id = self
            .links
            .insert_with_key(|id| Link::new(id, attribs, SmallVec::new()));
        for range in ranges {
            let lg = self.lanegroups.insert_with_key(|id| {
                LaneGroup::new(id, link_id, range, attribs.length, attribs.road_params)
            });
            self.links[link_id].lanegroups.push(lg);
        }
        self.nodes[attribs.start_node].out_links.push(link_id);
        self.nodes[attribs.end_node].in_links.push(link_id);
        Ok(link_id)
    }

    /// Adds a movement between two links meeting at a node.
    pub fn add_road_connection(
        &mut self,
        attribs: &RoadConnectionAttributes,
    ) -> Result<RoadConnectionId, SimError> {
        let start = self
            .links
            .get(attribs.start_link)
            .ok_or(SimError::UnknownEntity("link"))?;
        let end = self
            .links
            .get(attribs.end_link)
            .ok_or(SimError::UnknownEntity("link"))?;
        if start.end_node() != end.start_node() {
            return Err(SimError::InvalidConfig(format!(
                "links {:?} and {:?} do not meet at a node",
                attribs.start_link, attribs.end_link
            )));
        }
        let start_lanegroups =
            self.lanegroups_on_lanes(start, attribs.start_lanes.unwrap_or(all_lanes(start)))?;
        let end_lanegroups =
            self.lanegroups_on_lanes(end, attribs.end_lanes.unwrap_or(all_lanes(end)))?;
        let node = start.end_node();

        let rc = self.road_connections.insert_with_key(|id| RoadConnection {
            id,
            start_link: attribs.start_link,
            end_link: attribs.end_link,
            capacity_vph: attribs.capacity_vph,
            start_lanegroups: start_lanegroups.clone(),
            end_lanegroups,
        });
        for lg in start_lanegroups {
            self.lanegroups[lg]
                .outlink2rcs
                .entry(attribs.end_link)
                .or_default()
                .push(rc);
        }
        self.nodes[node].road_connections.push(rc);
        Ok(rc)
    }

    /// Adds a path. Consecutive links must meet at a node.
    pub fn add_path(&mut self, links: &[LinkId]) -> Result<PathId, SimError> {
        if links.iter().any(|l| !self.links.contains_key(*l)) {
            return Err(SimError::UnknownEntity("link"));
        }
        if links.is_empty() {
            return Err(SimError::NotALinearPath { links: vec![] });
        }
        if let Some(pair) = links
            .windows(2)
            .find(|pair| self.links[pair[0]].end_node() != self.links[pair[1]].start_node())
        {
            return Err(SimError::NotALinearPath {
                links: pair.to_vec(),
            });
        }
        Ok(self.paths.insert(Path {
            links: links.to_vec(),
        }))
    }

    pub fn add_commodity(&mut self, attribs: &CommodityAttributes) -> Result<CommodityId, SimError> {
        if attribs.paths.iter().any(|p| !self.paths.contains_key(*p)) {
            return Err(SimError::UnknownEntity("path"));
        }
        if attribs.pathfull && attribs.paths.is_empty() {
            return Err(SimError::InvalidConfig(format!(
                "pathfull commodity `{}` has no paths",
                attribs.name
            )));
        }
        Ok(self.commodities.insert_with_key(|id| Commodity {
            id,
            name: attribs.name.into(),
            pathfull: attribs.pathfull,
            paths: attribs.paths.to_vec(),
        }))
    }

    /// Sets the split ratios of a link-local commodity leaving `link`.
    pub fn set_split_profile(
        &mut self,
        link: LinkId,
        commodity: CommodityId,
        profile: SplitProfile,
    ) -> Result<(), SimError> {
        if !self.commodities.contains_key(commodity) {
            return Err(SimError::UnknownEntity("commodity"));
        }
        let link = self
            .links
            .get_mut(link)
            .ok_or(SimError::UnknownEntity("link"))?;
        if link.packet_splitter.is_some() {
            check_split_profile(link, commodity, &profile)?;
        }
        match &mut link.packet_splitter {
            Some(splitter) => splitter.set_split_profile(commodity, profile),
            None => {
                link.split_profiles.insert(commodity, profile);
            }
        }
        Ok(())
    }

    pub fn add_demand(&mut self, demand: Demand) -> Result<(), SimError> {
        let commodity = self
            .commodities
            .get(demand.commodity)
            .ok_or(SimError::UnknownEntity("commodity"))?;
        match demand.origin {
            DemandOrigin::Path(path) if !commodity.paths.contains(&path) => {
                return Err(SimError::InvalidConfig(format!(
                    "path {:?} is not available to commodity `{}`",
                    path, commodity.name
                )));
            }
            DemandOrigin::Link(_) if commodity.pathfull => {
                return Err(SimError::InvalidConfig(format!(
                    "pathfull commodity `{}` needs a path demand",
                    commodity.name
                )));
            }
            DemandOrigin::Link(link) if !self.links.contains_key(link) => {
                return Err(SimError::UnknownEntity("link"));
            }
            _ => {}
        }
        self.demands.push(demand);
        Ok(())
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn link(&self, id: LinkId) -> Option<&Link> {
        self.links.get(id)
    }

    pub fn lanegroup(&self, id: LaneGroupId) -> Option<&LaneGroup> {
        self.lanegroups.get(id)
    }

    pub fn road_connection(&self, id: RoadConnectionId) -> Option<&RoadConnection> {
        self.road_connections.get(id)
    }

    pub fn commodity(&self, id: CommodityId) -> Option<&Commodity> {
        self.commodities.get(id)
    }

    pub fn path(&self, id: PathId) -> Option<&Path> {
        self.paths.get(id)
    }

    pub fn iter_links(&self) -> impl Iterator<Item = &Link> {
        self.links.values()
    }

    pub fn iter_lanegroups(&self) -> impl Iterator<Item = &LaneGroup> {
        self.lanegroups.values()
    }

    pub fn demands(&self) -> &[Demand] {
        &self.demands
    }

    /// The origin link of a demand.
    pub fn origin_link(&self, origin: DemandOrigin) -> Result<LinkId, SimError> {
        match origin {
            DemandOrigin::Link(link) => Ok(link),
            DemandOrigin::Path(path) => self
                .paths
                .get(path)
                .and_then(|p| p.links.first().copied())
                .ok_or(SimError::UnknownEntity("path")),
        }
    }

    /// Derives the topology tables, splitters, states and lane-change directions
    /// once the network is complete.
    pub(crate) fn finalize(&mut self) -> Result<(), SimError> {
        self.build_topology();
        self.build_paths()?;
        self.build_splitters()?;
        self.build_states()?;
        self.build_lane_changes();
        debug!(
            "network finalized: {} nodes, {} links, {} lane groups, {} road connections",
            self.nodes.len(),
            self.links.len(),
            self.lanegroups.len(),
            self.road_connections.len()
        );
        Ok(())
    }

    fn build_topology(&mut self) {
        let Self {
            nodes,
            links,
            lanegroups,
            ..
        } = self;
        for link in links.values_mut() {
            link.outlinks = nodes[link.end_node()].out_links.clone();
            link.is_source = nodes[link.start_node()].in_links.is_empty();
            link.is_sink = link.outlinks.is_empty();
            link.outlink2lanegroups.clear();
            for lg in &link.lanegroups {
                for outlink in lanegroups[*lg].outlink2rcs.keys() {
                    link.outlink2lanegroups.entry(*outlink).or_default().push(*lg);
                }
            }
            for outlink in &link.outlinks {
                if !link.outlink2lanegroups.contains_key(outlink) {
                    warn!(
                        "link {:?} has no road connection to outlink {:?}",
                        link.id(),
                        outlink
                    );
                }
            }
        }
    }

    fn build_paths(&mut self) -> Result<(), SimError> {
        for link in self.links.values_mut() {
            link.path2outlink.clear();
        }
        for (id, path) in &self.paths {
            for pair in path.links.windows(2) {
                let (link, next) = (pair[0], pair[1]);
                if self.links[link].lanegroups_to(next).is_none() {
                    return Err(SimError::PathNotConnected {
                        path: id,
                        link,
                        next,
                    });
                }
                self.links[link].path2outlink.insert(id, next);
            }
            if let Some(last) = path.links.last() {
                if !self.links[*last].is_sink() {
                    return Err(SimError::PathEndsBeforeSink {
                        path: id,
                        link: *last,
                    });
                }
            }
        }
        Ok(())
    }

    fn build_splitters(&mut self) -> Result<(), SimError> {
        for link in self.links.values_mut() {
            let mut profiles = std::mem::take(&mut link.split_profiles);
            if let Some(splitter) = link.packet_splitter.take() {
                profiles.extend(
                    splitter
                        .split_profiles()
                        .map(|(comm, profile)| (*comm, profile.clone())),
                );
            }
            if link.is_sink() || link.outlinks.len() < 2 {
                if !profiles.is_empty() {
                    debug!("ignoring split ratios on link {:?} with one outlink", link.id());
                }
                continue;
            }
            for (commodity, profile) in &profiles {
                check_split_profile(link, *commodity, profile)?;
            }
            link.packet_splitter = Some(PacketSplitter::new(link.id(), profiles));
        }
        Ok(())
    }

    fn build_states(&mut self) -> Result<(), SimError> {
        for link in self.links.values_mut() {
            link.states.clear();
        }
        for commodity in self.commodities.values() {
            if commodity.pathfull {
                for path in &commodity.paths {
                    for link in &self.paths[*path].links {
                        self.links[*link]
                            .states
                            .insert(State::new(commodity.id, PathOrLink::Path(*path)));
                    }
                }
                continue;
            }
            for link in self.links.values_mut() {
                let keys: SmallVec<[LinkId; 4]> = match &link.packet_splitter {
                    _ if link.is_sink() => [link.id()].into_iter().collect(),
                    // One state per outlink, whatever its current ratio.
                    Some(splitter) => {
                        if splitter.split_profile(commodity.id).is_none() {
                            return Err(SimError::MissingSplitRatios {
                                link: link.id(),
                                commodity: commodity.id,
                            });
                        }
                        link.outlinks.iter().copied().collect()
                    }
                    None => [link.trivial_outlink()].into_iter().collect(),
                };
                for key in keys {
                    link.states
                        .insert(State::new(commodity.id, PathOrLink::Link(key)));
                }
            }
        }
        Ok(())
    }

    fn build_lane_changes(&mut self) {
        let Self {
            links, lanegroups, ..
        } = self;
        for link in links.values() {
            let lgs = &link.lanegroups;
            for (i, lg) in lgs.iter().enumerate() {
                let left = i.checked_sub(1).map(|j| lgs[j]);
                let right = lgs.get(i + 1).copied();
                lanegroups[*lg].neighbours = (left, right);
            }
            for (i, lg) in lgs.iter().enumerate() {
                let table = link
                    .states
                    .iter()
                    .map(|state| {
                        let next = link.next_link(state);
                        (*state, directions(lanegroups, lgs, i, next))
                    })
                    .collect();
                lanegroups[*lg].state2directions = table;
            }
        }
    }

    /// Space per lane around a lane group, as weighed by lane selectors.
    pub(crate) fn lane_space(&self, id: LaneGroupId) -> LaneSpace {
        let space = |id: LaneGroupId| {
            let lg = &self.lanegroups[id];
            (lg.max_vehicles() - lg.total_vehicles()).max(0.0) / lg.num_lanes() as f64
        };
        let (left, right) = self.lanegroups[id].neighbours;
        LaneSpace {
            left: left.map(space),
            middle: space(id),
            right: right.map(space),
        }
    }

    /// Recomputes the lane-change probabilities of one commodity in one lane group.
    /// Returns the time until the next refresh, if any.
    pub(crate) fn refresh_lane_selector(
        &mut self,
        lanegroup: LaneGroupId,
        commodity: CommodityId,
    ) -> Option<f64> {
        if !self.lanegroups.contains_key(lanegroup) {
            return None;
        }
        let space = self.lane_space(lanegroup);
        self.lanegroups[lanegroup].refresh_lane_selector(commodity, &space)
    }

    /// Replaces the road parameters of a lane group, e.g. to model a lane closure.
    pub(crate) fn set_lanegroup_road_params(
        &mut self,
        lanegroup: LaneGroupId,
        road: RoadParams,
    ) -> Result<(), SimError> {
        let lg = self
            .lanegroups
            .get_mut(lanegroup)
            .ok_or(SimError::UnknownEntity("lane group"))?;
        let link = lg.link_id();
        lg.set_road_params(road)
            .map_err(|reason| SimError::InvalidRoadParams { link, reason })
    }

    fn lanegroups_on_lanes(
        &self,
        link: &Link,
        lanes: Interval<u32>,
    ) -> Result<SmallVec<[LaneGroupId; 4]>, SimError> {
        if lanes.min < 1 || lanes.max > link.num_lanes() || lanes.min > lanes.max {
            return Err(SimError::InvalidConfig(format!(
                "lanes {:?} do not exist on link {:?}",
                lanes,
                link.id()
            )));
        }
        Ok(link
            .lanegroups
            .iter()
            .copied()
            .filter(|lg| self.lanegroups[*lg].lanes().overlaps(&lanes))
            .collect())
    }
}

fn all_lanes(link: &Link) -> Interval<u32> {
    Interval::new(1, link.num_lanes())
}

/// Validates the lane ranges of a link's lane groups: left to right, contiguous,
/// covering every lane.
fn lanegroup_ranges(lanes: u32, ranges: &[Interval<u32>]) -> Result<Vec<Interval<u32>>, SimError> {
    if ranges.is_empty() {
        return Ok(vec![Interval::new(1, lanes)]);
    }
    let mut next = 1;
    for range in ranges {
        if range.min != next || range.max < range.min {
            return Err(SimError::InvalidConfig(format!(
                "lane group {:?} does not continue from lane {}",
                range, next
            )));
        }
        next = range.max + 1;
    }
    if next != lanes + 1 {
        return Err(SimError::InvalidConfig(format!(
            "lane groups cover {} of {} lanes",
            next - 1,
            lanes
        )));
    }
    Ok(ranges.to_vec())
}

/// Fails if the profile sends a positive share to an outlink the link cannot reach.
fn check_split_profile(
    link: &Link,
    commodity: CommodityId,
    profile: &SplitProfile,
) -> Result<(), SimError> {
    for outlink in profile.positive_outlinks() {
        if !link.outlinks.contains(&outlink) || link.lanegroups_to(outlink).is_none() {
            return Err(SimError::UnreachableOutlink {
                link: link.id(),
                outlink,
                commodity,
            });
        }
    }
    Ok(())
}

/// The legal lane-change directions of a state in lane group `i` of a link.
fn directions(
    lanegroups: &LaneGroupSet,
    lgs: &[LaneGroupId],
    i: usize,
    next: Option<LinkId>,
) -> Directions {
    let mut out = Directions::new();
    let Some(next) = next else {
        out.push(Side::Middle);
        return out;
    };
    let reaches = |j: usize| lanegroups[lgs[j]].reaches(next);
    if reaches(i) {
        if i > 0 && reaches(i - 1) {
            out.push(Side::Left);
        }
        out.push(Side::Middle);
        if i + 1 < lgs.len() && reaches(i + 1) {
            out.push(Side::Right);
        }
    } else {
        if (0..i).any(reaches) {
            out.push(Side::Left);
        }
        if (i + 1..lgs.len()).any(reaches) {
            out.push(Side::Right);
        }
        if out.is_empty() {
            out.push(Side::Middle);
        }
    }
    out
}

/// The set of lane groups of the given links.
pub(crate) fn lanegroups_of<'a>(
    links: &'a LinkSet,
    ids: &'a [LinkId],
) -> impl Iterator<Item = LaneGroupId> + 'a {
    ids.iter()
        .flat_map(move |id| links[*id].lanegroups.iter().copied())
}

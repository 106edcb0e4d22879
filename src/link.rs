use crate::config::RoadParams;
use crate::profile::SplitProfile;
use crate::splitter::PacketSplitter;
use crate::state::{PathOrLink, State};
use crate::util::Interval;
use crate::{CommodityId, LaneGroupId, LinkId, ModelId, NodeId, PathId};
use smallvec::SmallVec;
use std::collections::{BTreeMap, BTreeSet};

/// A directed road segment between two nodes.
#[derive(Clone, Debug)]
pub struct Link {
    /// The link ID.
    id: LinkId,
    start_node: NodeId,
    end_node: NodeId,
    /// Length in m.
    length: f64,
    /// Number of lanes.
    lanes: u32,
    road_params: RoadParams,
    /// The lane groups, ordered from left to right.
    pub(crate) lanegroups: SmallVec<[LaneGroupId; 4]>,
    /// The links leaving the end node.
    pub(crate) outlinks: SmallVec<[LinkId; 4]>,
    pub(crate) is_source: bool,
    pub(crate) is_sink: bool,
    /// The lane groups with a road connection to each downstream link.
    pub(crate) outlink2lanegroups: BTreeMap<LinkId, SmallVec<[LaneGroupId; 4]>>,
    /// The link following this one on each path through it.
    pub(crate) path2outlink: BTreeMap<PathId, LinkId>,
    /// Split ratios supplied before the splitter exists.
    pub(crate) split_profiles: BTreeMap<CommodityId, SplitProfile>,
    /// Present when vehicles leaving this link must choose among several outlinks.
    pub(crate) packet_splitter: Option<PacketSplitter>,
    pub(crate) model: Option<ModelId>,
    /// Every state that can occur on this link.
    pub(crate) states: BTreeSet<State>,
}

/// The attributes of a link.
pub struct LinkAttributes<'a> {
    pub start_node: NodeId,
    pub end_node: NodeId,
    /// The length in m.
    pub length: f64,
    /// The number of lanes.
    pub lanes: u32,
    /// The lane ranges of the lane groups; one lane group over all lanes if empty.
    pub lanegroups: &'a [Interval<u32>],
    pub road_params: RoadParams,
}

impl Link {
    /// Creates a new link.
    pub(crate) fn new(
        id: LinkId,
        attribs: &LinkAttributes,
        lanegroups: SmallVec<[LaneGroupId; 4]>,
    ) -> Self {
        Self {
            id,
            start_node: attribs.start_node,
            end_node: attribs.end_node,
            length: attribs.length,
            lanes: attribs.lanes,
            road_params: attribs.road_params,
            lanegroups,
            outlinks: SmallVec::new(),
            is_source: false,
            is_sink: false,
            outlink2lanegroups: BTreeMap::new(),
            path2outlink: BTreeMap::new(),
            split_profiles: BTreeMap::new(),
            packet_splitter: None,
            model: None,
            states: BTreeSet::new(),
        }
    }

    pub fn id(&self) -> LinkId {
        self.id
    }

    pub fn start_node(&self) -> NodeId {
        self.start_node
    }

    pub fn end_node(&self) -> NodeId {
        self.end_node
    }

    /// Gets the length of the link in m.
    pub fn length(&self) -> f64 {
        self.length
    }

    pub fn num_lanes(&self) -> u32 {
        self.lanes
    }

    pub fn road_params(&self) -> &RoadParams {
        &self.road_params
    }

    /// The lane groups, ordered from left to right.
    pub fn lanegroups(&self) -> &[LaneGroupId] {
        &self.lanegroups
    }

    pub fn outlinks(&self) -> &[LinkId] {
        &self.outlinks
    }

    /// Whether vehicles enter the network on this link.
    pub fn is_source(&self) -> bool {
        self.is_source
    }

    /// Whether vehicles leave the network at the end of this link.
    pub fn is_sink(&self) -> bool {
        self.is_sink
    }

    pub fn model(&self) -> Option<ModelId> {
        self.model
    }

    pub fn packet_splitter(&self) -> Option<&PacketSplitter> {
        self.packet_splitter.as_ref()
    }

    /// The lane groups that can reach `outlink`, if any.
    pub fn lanegroups_to(&self, outlink: LinkId) -> Option<&[LaneGroupId]> {
        self.outlink2lanegroups
            .get(&outlink)
            .map(|lgs| lgs.as_slice())
            .filter(|lgs| !lgs.is_empty())
    }

    /// The link that vehicles in `state` move to from here, or `None` if they leave
    /// the network at the end of this link.
    pub fn next_link(&self, state: &State) -> Option<LinkId> {
        match state.key {
            PathOrLink::Path(path) => self.path2outlink.get(&path).copied(),
            PathOrLink::Link(_) if self.is_sink => None,
            PathOrLink::Link(next) => Some(next),
        }
    }

    /// The outlink used when the splitter is absent.
    pub(crate) fn trivial_outlink(&self) -> LinkId {
        match self.outlinks.first() {
            Some(outlink) if !self.is_sink => *outlink,
            _ => self.id,
        }
    }
}

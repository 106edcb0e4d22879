use crate::{CommodityId, LaneGroupId, LinkId, NodeId, PathId};
use thiserror::Error;

/// Everything that can abort a simulation.
///
/// Configuration errors are raised while the scenario is assembled or initialized,
/// invariant violations while it runs. Neither is recoverable: a step either completes
/// with all invariants intact or the simulation stops.
#[derive(Error, Debug)]
pub enum SimError {
    #[error(
        "no access from link {link:?} to link {outlink:?} for commodity {commodity:?}; \
         check for a positive split ratio between these two links"
    )]
    UnreachableOutlink {
        link: LinkId,
        outlink: LinkId,
        commodity: CommodityId,
    },
    #[error("links {links:?} do not form a linear path")]
    NotALinearPath { links: Vec<LinkId> },
    #[error("path {path:?} has no road connection from link {link:?} to link {next:?}")]
    PathNotConnected {
        path: PathId,
        link: LinkId,
        next: LinkId,
    },
    #[error("path {path:?} ends on link {link:?}, which is not a sink")]
    PathEndsBeforeSink { path: PathId, link: LinkId },
    #[error("link {link:?} has several outlinks but no split ratios for commodity {commodity:?}")]
    MissingSplitRatios {
        link: LinkId,
        commodity: CommodityId,
    },
    #[error("invalid road parameters on link {link:?}: {reason}")]
    InvalidRoadParams { link: LinkId, reason: String },
    #[error("unknown model type `{0}`")]
    UnknownModel(String),
    #[error("duplicate model name `{0}`")]
    DuplicateModel(String),
    #[error("more than one default model")]
    MultipleDefaultModels,
    #[error("link {link:?} is assigned to more than one model")]
    LinkAssignedTwice { link: LinkId },
    #[error("link {link:?} is not assigned to any model")]
    UnassignedLink { link: LinkId },
    #[error("node {node:?} joins links governed by different models")]
    NodeSpansModels { node: NodeId },
    #[error("unknown {0} id")]
    UnknownEntity(&'static str),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("malformed configuration: {0}")]
    BadConfig(#[from] serde_json::Error),
    #[error("the simulation has already been initialized")]
    AlreadyInitialized,
    #[error("the simulation has not been initialized")]
    NotInitialized,
    #[error("cell {cell} of lane group {lanegroup:?} would go {deficit} vehicles below zero")]
    NegativeCount {
        lanegroup: LaneGroupId,
        cell: usize,
        deficit: f64,
    },
    #[error("node {node:?} sends {flow} vehicles into lane group {lanegroup:?} with supply {supply}")]
    SupplyExceeded {
        node: NodeId,
        lanegroup: LaneGroupId,
        flow: f64,
        supply: f64,
    },
    #[error(
        "lane group {lanegroup:?} offers {demand} vehicles bound for link {outlink:?} \
         but has no road connection to it"
    )]
    NoRoadConnection {
        lanegroup: LaneGroupId,
        outlink: LinkId,
        demand: f64,
    },
    #[error("no lane group on link {link:?} has room for {residual} arriving vehicles")]
    NoLaneGroupWithRoom { link: LinkId, residual: f64 },
    #[error("{0} is not implemented")]
    NotImplemented(String),
}

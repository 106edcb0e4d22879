pub use cell::{Cell, CellParams};
pub use config::{LaneChangeConfig, LaneChangePolicy, ModelConfig, RoadParams};
pub use dispatch::{Dispatcher, Event, EventKind};
pub use error::SimError;
pub use fluid::{cells_per_lanegroup, FluidModel};
pub use lanechange::{LaneSelector, LaneSpace, Side, SideProbabilities};
pub use lanegroup::{FlowAccumulator, LaneGroup};
pub use link::{Link, LinkAttributes};
pub use model::{create_model, Model};
pub use network::{
    Commodity, CommodityAttributes, Demand, DemandOrigin, Network, Node, Path, RoadConnection,
    RoadConnectionAttributes,
};
pub use node_model::NodeModel;
pub use packet::PacketLink;
pub use profile::{Profile1D, SplitProfile};
pub use simulation::Simulation;
use slotmap::{new_key_type, SlotMap};
pub use slotmap::{Key, KeyData};
pub use source::FluidSource;
pub use splitter::PacketSplitter;
pub use state::{PathOrLink, State, StateMap, StateMapExt};
pub use util::Interval;

mod cell;
mod config;
mod debug;
mod dispatch;
mod error;
mod fluid;
mod lanechange;
mod lanegroup;
mod link;
mod link_model;
mod model;
mod network;
mod node_model;
mod packet;
mod profile;
mod simulation;
mod source;
mod splitter;
mod state;
mod util;

new_key_type! {
    /// Unique ID of a [Node].
    pub struct NodeId;
    /// Unique ID of a [Link].
    pub struct LinkId;
    /// Unique ID of a [LaneGroup].
    pub struct LaneGroupId;
    /// Unique ID of a [RoadConnection].
    pub struct RoadConnectionId;
    /// Unique ID of a [Commodity].
    pub struct CommodityId;
    /// Unique ID of a [Path].
    pub struct PathId;
    /// Unique ID of a [Model].
    pub struct ModelId;
}

type LinkSet = SlotMap<LinkId, Link>;
type LaneGroupSet = SlotMap<LaneGroupId, LaneGroup>;

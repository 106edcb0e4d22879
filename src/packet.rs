use crate::state::{StateMap, StateMapExt, TOLERANCE};
use crate::{LaneGroupId, RoadConnectionId};
use smallvec::SmallVec;

/// Vehicles crossing a node in one step, bound for one link.
#[derive(Clone, Debug, Default)]
pub struct PacketLink {
    /// Vehicles per state.
    pub vehicles: StateMap,
    /// The lane groups of the receiving link where the vehicles arrive.
    pub arrive_to_lanegroups: SmallVec<[LaneGroupId; 4]>,
    /// The road connection the vehicles travelled.
    pub road_connection: Option<RoadConnectionId>,
}

impl PacketLink {
    pub fn new(
        vehicles: StateMap,
        arrive_to_lanegroups: &[LaneGroupId],
        road_connection: Option<RoadConnectionId>,
    ) -> Self {
        Self {
            vehicles,
            arrive_to_lanegroups: arrive_to_lanegroups.iter().copied().collect(),
            road_connection,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.vehicles.total() <= TOLERANCE
    }
}

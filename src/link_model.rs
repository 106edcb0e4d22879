//! Placement of vehicles arriving at a link into its lane groups.

use crate::link::Link;
use crate::packet::PacketLink;
use crate::state::{StateMap, StateMapExt, TOLERANCE};
use crate::{LaneGroupId, LaneGroupSet, SimError};
use log::trace;
use smallvec::SmallVec;

/// Inserts a packet that crossed the upstream node into the lane groups of `link`.
///
/// Link-local states are relabeled with the outlink they will take from `link`.
/// Each sub-packet goes to the admissible lane group with the most space per lane;
/// whatever does not fit spills to the arrival lane groups, then to any other lane
/// group of the link, closest to the admissible lanes first.
pub(crate) fn add_vehicle_packet(
    link: &Link,
    lanegroups: &mut LaneGroupSet,
    packet: &PacketLink,
    time: f64,
) -> Result<(), SimError> {
    if packet.is_empty() {
        return Ok(());
    }

    let Some(splitter) = link.packet_splitter() else {
        let outlink = link.trivial_outlink();
        let vehicles = packet
            .vehicles
            .iter()
            .map(|(state, count)| (state.with_next_link(outlink), *count))
            .collect::<StateMap>();
        let targets = match link.lanegroups_to(outlink) {
            Some(lgs) if !link.is_sink() => lgs,
            _ => link.lanegroups(),
        };
        return place(link, lanegroups, &packet.arrive_to_lanegroups, targets, vehicles);
    };

    for (outlink, vehicles) in splitter.split_packet(link, &packet.vehicles, time)? {
        let targets = link.lanegroups_to(outlink).ok_or_else(|| {
            let commodity = vehicles
                .keys()
                .next()
                .map(|s| s.commodity)
                .unwrap_or_default();
            SimError::UnreachableOutlink {
                link: link.id(),
                outlink,
                commodity,
            }
        })?;
        place(link, lanegroups, &packet.arrive_to_lanegroups, targets, vehicles)?;
    }
    Ok(())
}

/// Distributes `vehicles` over lane groups with room, preferring the targets.
fn place(
    link: &Link,
    lanegroups: &mut LaneGroupSet,
    arrive: &[LaneGroupId],
    targets: &[LaneGroupId],
    mut vehicles: StateMap,
) -> Result<(), SimError> {
    let mut candidates: SmallVec<[LaneGroupId; 4]> = arrive
        .iter()
        .copied()
        .filter(|lg| targets.contains(lg))
        .collect();
    if candidates.is_empty() {
        candidates = targets.iter().copied().collect();
    }
    let second_best: SmallVec<[LaneGroupId; 4]> = arrive
        .iter()
        .copied()
        .filter(|lg| !candidates.contains(lg))
        .collect();
    let rest: SmallVec<[LaneGroupId; 4]> = link
        .lanegroups()
        .iter()
        .copied()
        .filter(|lg| !candidates.contains(lg) && !second_best.contains(lg))
        .collect();

    loop {
        let total = vehicles.total();
        if total <= TOLERANCE {
            return Ok(());
        }
        let chosen = choose_best_lanegroup(lanegroups, &candidates)
            .or_else(|| choose_closest_that_is_not_full(lanegroups, &second_best, targets))
            .or_else(|| choose_closest_that_is_not_full(lanegroups, &rest, targets));
        let Some(lg) = chosen else {
            return Err(SimError::NoLaneGroupWithRoom {
                link: link.id(),
                residual: total,
            });
        };

        let lanegroup = &mut lanegroups[lg];
        let amount = f64::min(total, lanegroup.entry_room);
        if amount >= total {
            lanegroup.add_vehicle_packet(&vehicles);
            return Ok(());
        }
        trace!(
            "lane group {:?} takes {:.4} of {:.4} arriving vehicles",
            lg,
            amount,
            total
        );
        lanegroup.add_vehicle_packet(&vehicles.scaled(amount / total));
        lanegroup.entry_room = 0.0;
        vehicles = vehicles.scaled(1.0 - amount / total);
    }
}

/// Picks the candidate with room and the most space per lane. The first one wins ties.
pub(crate) fn choose_best_lanegroup(
    lanegroups: &LaneGroupSet,
    candidates: &[LaneGroupId],
) -> Option<LaneGroupId> {
    candidates
        .iter()
        .copied()
        .filter(|id| lanegroups[*id].entry_room > TOLERANCE)
        .fold(None, |best: Option<(LaneGroupId, f64)>, id| {
            let space = lanegroups[id].space_per_lane();
            match best {
                Some((_, best_space)) if best_space >= space => best,
                _ => Some((id, space)),
            }
        })
        .map(|(id, _)| id)
}

/// Picks the lane group with room whose lanes are closest to those of `targets`.
pub(crate) fn choose_closest_that_is_not_full(
    lanegroups: &LaneGroupSet,
    pool: &[LaneGroupId],
    targets: &[LaneGroupId],
) -> Option<LaneGroupId> {
    let min = targets.iter().map(|id| lanegroups[*id].lanes().min).min()?;
    let max = targets.iter().map(|id| lanegroups[*id].lanes().max).max()?;
    pool.iter()
        .copied()
        .filter(|id| lanegroups[*id].entry_room > TOLERANCE)
        .min_by_key(|id| lanegroups[*id].distance_to_lanes(min, max))
}

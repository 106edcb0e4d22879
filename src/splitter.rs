use crate::link::Link;
use crate::profile::SplitProfile;
use crate::state::{PathOrLink, State, StateMap};
use crate::{CommodityId, LinkId, SimError};
use std::collections::BTreeMap;

/// Partitions vehicles leaving a link among its outlinks.
///
/// Path states follow their path; link-local states are divided by the split
/// ratios of their commodity and relabeled with the chosen outlink.
#[derive(Clone, Debug)]
pub struct PacketSplitter {
    link: LinkId,
    split_profiles: BTreeMap<CommodityId, SplitProfile>,
}

impl PacketSplitter {
    pub(crate) fn new(link: LinkId, split_profiles: BTreeMap<CommodityId, SplitProfile>) -> Self {
        Self {
            link,
            split_profiles,
        }
    }

    pub fn split_profile(&self, commodity: CommodityId) -> Option<&SplitProfile> {
        self.split_profiles.get(&commodity)
    }

    pub(crate) fn set_split_profile(&mut self, commodity: CommodityId, profile: SplitProfile) {
        self.split_profiles.insert(commodity, profile);
    }

    pub(crate) fn split_profiles(&self) -> impl Iterator<Item = (&CommodityId, &SplitProfile)> {
        self.split_profiles.iter()
    }

    /// Gets the ratios of a link-local commodity at `time`.
    pub fn ratios(
        &self,
        commodity: CommodityId,
        time: f64,
    ) -> Result<BTreeMap<LinkId, f64>, SimError> {
        let ratios = self
            .split_profiles
            .get(&commodity)
            .map(|profile| profile.ratios_at(time))
            .unwrap_or_default();
        if ratios.is_empty() {
            return Err(SimError::MissingSplitRatios {
                link: self.link,
                commodity,
            });
        }
        Ok(ratios)
    }

    /// Partitions `vehicles` by outlink.
    pub fn split_packet(
        &self,
        link: &Link,
        vehicles: &StateMap,
        time: f64,
    ) -> Result<BTreeMap<LinkId, StateMap>, SimError> {
        let mut out: BTreeMap<LinkId, StateMap> = BTreeMap::new();
        for (state, count) in vehicles {
            match state.key {
                PathOrLink::Path(path) => {
                    let outlink = link.path2outlink.get(&path).copied().ok_or(
                        SimError::PathEndsBeforeSink {
                            path,
                            link: self.link,
                        },
                    )?;
                    *out.entry(outlink).or_default().entry(*state).or_insert(0.0) += count;
                }
                PathOrLink::Link(_) => {
                    for (outlink, ratio) in self.ratios(state.commodity, time)? {
                        let relabeled = State::new(state.commodity, PathOrLink::Link(outlink));
                        *out.entry(outlink)
                            .or_default()
                            .entry(relabeled)
                            .or_insert(0.0) += count * ratio;
                    }
                }
            }
        }
        Ok(out)
    }
}

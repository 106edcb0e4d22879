use crate::config::LaneChangePolicy;
use crate::state::{PathOrLink, State};
use crate::CommodityId;
use arrayvec::ArrayVec;
use std::collections::BTreeMap;

/// A lane-change direction relative to the current lane group.
/// Lane 1 is the leftmost lane.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Side {
    Left,
    Middle,
    Right,
}

/// The legal lane-change directions of a state within a lane group.
pub(crate) type Directions = ArrayVec<Side, 3>;

/// Probability of moving to each side.
pub type SideProbabilities = BTreeMap<Side, f64>;

/// Space per lane available in the current lane group and its neighbours.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LaneSpace {
    pub left: Option<f64>,
    pub middle: f64,
    pub right: Option<f64>,
}

impl LaneSpace {
    fn get(&self, side: Side) -> f64 {
        match side {
            Side::Left => self.left.unwrap_or(0.0),
            Side::Middle => self.middle,
            Side::Right => self.right.unwrap_or(0.0),
        }
    }
}

/// Decides, for one commodity in one lane group, which neighbouring lane group
/// vehicles drift towards.
#[derive(Clone, Debug)]
pub struct LaneSelector {
    commodity: CommodityId,
    policy: LaneChangePolicy,
    /// Refresh interval in s; `None` when the probabilities are frozen.
    interval: Option<f64>,
    /// Legal directions per state.
    options: BTreeMap<PathOrLink, Directions>,
    side2prob: BTreeMap<PathOrLink, SideProbabilities>,
}

impl LaneSelector {
    /// Creates a selector with uniform probabilities over the legal directions of each
    /// of the commodity's states.
    ///
    /// # Parameters
    /// * `dt_update` - Refresh interval in s; zero means every `model_dt`, negative means never
    pub(crate) fn new<'a>(
        commodity: CommodityId,
        policy: LaneChangePolicy,
        dt_update: f64,
        model_dt: f64,
        state2directions: impl Iterator<Item = (&'a State, &'a Directions)>,
    ) -> Self {
        let options: BTreeMap<PathOrLink, Directions> = state2directions
            .filter(|(state, _)| state.commodity == commodity)
            .map(|(state, directions)| (state.key, directions.clone()))
            .collect();
        let side2prob = options
            .iter()
            .map(|(key, directions)| (*key, uniform(directions)))
            .collect();

        let interval = if dt_update == 0.0 {
            Some(model_dt)
        } else if dt_update > 0.0 {
            Some(dt_update)
        } else {
            None
        };

        Self {
            commodity,
            policy,
            interval,
            options,
            side2prob,
        }
    }

    pub fn commodity(&self) -> CommodityId {
        self.commodity
    }

    pub fn policy(&self) -> LaneChangePolicy {
        self.policy
    }

    /// The time until the next refresh, or `None` if the probabilities are frozen.
    pub fn refresh_interval(&self) -> Option<f64> {
        self.interval
    }

    /// Gets the current side probabilities of a state, if the state may change lanes.
    pub fn get_lanechange_probabilities(&self, key: PathOrLink) -> Option<&SideProbabilities> {
        self.side2prob.get(&key)
    }

    /// Recomputes the probabilities of every state from its current options.
    pub fn update_lane_change_probabilities(&mut self, space: &LaneSpace) {
        let options = std::mem::take(&mut self.options);
        for (key, directions) in &options {
            self.update_lane_change_probabilities_with_options(*key, directions, space);
        }
    }

    /// Replaces the options of one state and recomputes its probabilities.
    pub fn update_lane_change_probabilities_with_options(
        &mut self,
        key: PathOrLink,
        directions: &[Side],
        space: &LaneSpace,
    ) {
        if directions.is_empty() {
            self.options.remove(&key);
            self.side2prob.remove(&key);
            return;
        }
        self.options
            .insert(key, directions.iter().copied().collect::<Directions>());
        let probs = match self.policy {
            LaneChangePolicy::Uniform => uniform(directions),
            LaneChangePolicy::Keep => {
                if directions.contains(&Side::Middle) {
                    [(Side::Middle, 1.0)].into_iter().collect()
                } else {
                    uniform(directions)
                }
            }
            LaneChangePolicy::Space => {
                let total: f64 = directions.iter().map(|side| space.get(*side)).sum();
                if total <= 0.0 {
                    uniform(directions)
                } else {
                    directions
                        .iter()
                        .map(|side| (*side, space.get(*side) / total))
                        .collect()
                }
            }
        };
        self.side2prob.insert(key, probs);
    }
}

fn uniform(directions: &[Side]) -> SideProbabilities {
    let p = 1.0 / directions.len() as f64;
    directions.iter().map(|side| (*side, p)).collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::LinkId;
    use assert_approx_eq::assert_approx_eq;
    use slotmap::KeyData;

    fn key() -> PathOrLink {
        PathOrLink::Link(LinkId::from(KeyData::from_ffi(4)))
    }

    fn selector(policy: LaneChangePolicy, dt_update: f64) -> LaneSelector {
        let commodity = CommodityId::from(KeyData::from_ffi(1));
        let other = CommodityId::from(KeyData::from_ffi(2));
        let dirs: Directions = [Side::Left, Side::Middle].into_iter().collect();
        let states = [
            (State::new(commodity, key()), dirs.clone()),
            (State::new(other, key()), dirs),
        ];
        LaneSelector::new(
            commodity,
            policy,
            dt_update,
            5.0,
            states.iter().map(|(s, d)| (s, d)),
        )
    }

    #[test]
    fn starts_uniform() {
        let selector = selector(LaneChangePolicy::Keep, 0.0);
        let probs = selector.get_lanechange_probabilities(key()).unwrap();
        assert_approx_eq!(probs[&Side::Left], 0.5);
        assert_approx_eq!(probs[&Side::Middle], 0.5);
        assert_eq!(selector.refresh_interval(), Some(5.0));
        let missing = PathOrLink::Link(LinkId::from(KeyData::from_ffi(9)));
        assert!(selector.get_lanechange_probabilities(missing).is_none());
    }

    #[test]
    fn keep_policy_stays() {
        let mut selector = selector(LaneChangePolicy::Keep, -1.0);
        assert_eq!(selector.refresh_interval(), None);
        selector.update_lane_change_probabilities(&LaneSpace::default());
        let probs = selector.get_lanechange_probabilities(key()).unwrap();
        assert_eq!(probs.len(), 1);
        assert_approx_eq!(probs[&Side::Middle], 1.0);

        selector.update_lane_change_probabilities_with_options(
            key(),
            &[Side::Right],
            &LaneSpace::default(),
        );
        let probs = selector.get_lanechange_probabilities(key()).unwrap();
        assert_approx_eq!(probs[&Side::Right], 1.0);
    }

    #[test]
    fn space_policy_weights_sides() {
        let mut selector = selector(LaneChangePolicy::Space, 30.0);
        assert_eq!(selector.refresh_interval(), Some(30.0));
        let space = LaneSpace {
            left: Some(3.0),
            middle: 1.0,
            right: None,
        };
        selector.update_lane_change_probabilities(&space);
        let probs = selector.get_lanechange_probabilities(key()).unwrap();
        assert_approx_eq!(probs[&Side::Left], 0.75);
        assert_approx_eq!(probs[&Side::Middle], 0.25);
    }
}

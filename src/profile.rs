use crate::LinkId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Slack used when locating a time within a profile, so that accumulated
/// floating-point time lands on the intended interval.
const TIME_SLACK: f64 = 1e-9;

/// A piecewise-constant time series.
///
/// The first value applies from `start_time` for `dt` seconds, the next one for the
/// following `dt` seconds and so on; the last value holds indefinitely. A missing `dt`
/// means the profile is constant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Profile1D {
    start_time: f64,
    dt: Option<f64>,
    values: Vec<f64>,
}

impl Profile1D {
    pub fn new(start_time: f64, dt: Option<f64>, values: Vec<f64>) -> Self {
        Self {
            start_time,
            dt,
            values,
        }
    }

    /// A profile with a single value from time zero.
    pub fn constant(value: f64) -> Self {
        Self::new(0.0, None, vec![value])
    }

    /// Creates a demand profile from rates in vehicles per hour, stored in vehicles per second.
    pub fn from_vph(start_time: f64, dt: Option<f64>, values_vph: &[f64]) -> Self {
        let mut profile = Self::new(start_time, dt, values_vph.to_vec());
        profile.multiply(1.0 / 3600.0);
        profile
    }

    pub fn multiply(&mut self, factor: f64) {
        self.values.iter_mut().for_each(|v| *v *= factor);
    }

    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    /// Gets the value in effect at `time`; zero before the profile starts.
    pub fn value_at(&self, time: f64) -> f64 {
        if time + TIME_SLACK < self.start_time {
            return 0.0;
        }
        interval_index(self.start_time, self.dt, self.values.len(), time)
            .map(|idx| self.values[idx])
            .unwrap_or(0.0)
    }
}

/// Time-varying split ratios of one commodity at one link, keyed by outlink.
///
/// Ratios are normalized when read, so they need not sum to one. Before the
/// profile starts its first values apply.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SplitProfile {
    start_time: f64,
    dt: Option<f64>,
    splits: BTreeMap<LinkId, Vec<f64>>,
}

impl SplitProfile {
    pub fn new(start_time: f64, dt: Option<f64>) -> Self {
        Self {
            start_time,
            dt,
            splits: BTreeMap::new(),
        }
    }

    /// Constant split ratios.
    pub fn constant(ratios: &[(LinkId, f64)]) -> Self {
        let mut profile = Self::new(0.0, None);
        for (outlink, ratio) in ratios {
            profile.add_entry(*outlink, vec![*ratio]);
        }
        profile
    }

    pub fn add_entry(&mut self, outlink: LinkId, values: Vec<f64>) {
        self.splits.insert(outlink, values);
    }

    /// The outlinks that receive a positive ratio at some time.
    pub fn positive_outlinks(&self) -> impl Iterator<Item = LinkId> + '_ {
        self.splits
            .iter()
            .filter(|(_, values)| values.iter().any(|v| *v > 0.0))
            .map(|(link, _)| *link)
    }

    /// Gets the normalized ratios in effect at `time`, omitting zero entries.
    pub fn ratios_at(&self, time: f64) -> BTreeMap<LinkId, f64> {
        let raw: BTreeMap<LinkId, f64> = self
            .splits
            .iter()
            .filter_map(|(link, values)| {
                interval_index(self.start_time, self.dt, values.len(), time)
                    .map(|idx| (*link, values[idx]))
            })
            .filter(|(_, ratio)| *ratio > 0.0)
            .collect();
        let total: f64 = raw.values().sum();
        if total <= 0.0 {
            return BTreeMap::new();
        }
        raw.into_iter().map(|(l, r)| (l, r / total)).collect()
    }
}

fn interval_index(start_time: f64, dt: Option<f64>, len: usize, time: f64) -> Option<usize> {
    if len == 0 {
        return None;
    }
    let idx = match dt {
        Some(dt) if dt > 0.0 && time > start_time => {
            ((time - start_time) / dt + TIME_SLACK).floor() as usize
        }
        _ => 0,
    };
    Some(usize::min(idx, len - 1))
}

//! Model and road configuration, deserialized from JSON.

use crate::SimError;
use serde::{Deserialize, Serialize};

/// The physical parameters of a road, per lane.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoadParams {
    /// Capacity in vehicles per hour per lane.
    pub capacity_vphpl: f64,
    /// Free-flow speed in km/h.
    pub speed_kph: f64,
    /// Jam density in vehicles per km per lane.
    pub jam_density_vpkpl: f64,
}

impl Default for RoadParams {
    fn default() -> Self {
        Self {
            capacity_vphpl: 2000.0,
            speed_kph: 100.0,
            jam_density_vpkpl: 100.0,
        }
    }
}

impl RoadParams {
    /// Free-flow speed in m/s.
    pub fn speed_mps(&self) -> f64 {
        self.speed_kph / 3.6
    }
}

/// How lane selectors weigh the lane-change directions open to a vehicle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LaneChangePolicy {
    /// Stay in the lane group when that is legal, otherwise split evenly over the legal sides.
    #[default]
    Keep,
    /// Split evenly over every legal direction.
    Uniform,
    /// Weight each legal direction by the space per lane on that side.
    Space,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaneChangeConfig {
    pub policy: LaneChangePolicy,
    /// Refresh interval of the lane selectors in s.
    /// Zero refreshes every model step, a negative value computes them once.
    pub dt_update: f64,
}

impl Default for LaneChangeConfig {
    fn default() -> Self {
        Self {
            policy: LaneChangePolicy::Keep,
            dt_update: 0.0,
        }
    }
}

/// Configuration of one flow model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    /// The registered model type, e.g. `"ctm"`.
    #[serde(rename = "type", default = "default_model_type")]
    pub model_type: String,
    /// Simulation step in s.
    pub dt: f64,
    /// Upper bound on cell length in m. When absent each link uses the distance
    /// travelled at free-flow speed in one step.
    #[serde(default)]
    pub max_cell_length: Option<f64>,
    #[serde(default)]
    pub lane_change: LaneChangeConfig,
}

fn default_model_type() -> String {
    "ctm".into()
}

impl ModelConfig {
    /// A cell transmission model configuration with default settings.
    pub fn ctm(name: &str, dt: f64) -> Self {
        Self {
            name: name.into(),
            model_type: default_model_type(),
            dt,
            max_cell_length: None,
            lane_change: Default::default(),
        }
    }

    /// Parses and validates a configuration.
    pub fn from_json(json: &str) -> Result<Self, SimError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub(crate) fn validate(&self) -> Result<(), SimError> {
        if !(self.dt.is_finite() && self.dt > 0.0) {
            return Err(SimError::InvalidConfig(format!(
                "model `{}` has a non-positive step {}",
                self.name, self.dt
            )));
        }
        if let Some(len) = self.max_cell_length {
            if !(len.is_finite() && len > 0.0) {
                return Err(SimError::InvalidConfig(format!(
                    "model `{}` has a non-positive max_cell_length {}",
                    self.name, len
                )));
            }
        }
        Ok(())
    }
}

//! The flow models a simulation can run, and the table that creates them by type.

use crate::config::ModelConfig;
use crate::dispatch::Dispatcher;
use crate::fluid::FluidModel;
use crate::network::{Demand, Network};
use crate::{LinkId, ModelId, SimError};
use once_cell::sync::Lazy;
use std::collections::BTreeMap;

/// A flow model governing a set of links and the nodes between them.
pub trait Model {
    fn name(&self) -> &str;

    /// The step in s.
    fn dt(&self) -> f64;

    /// The links assigned to this model.
    fn links(&self) -> &[LinkId];

    /// Assigns the links, and the nodes they enclose, to this model.
    fn set_links(&mut self, id: ModelId, links: Vec<LinkId>, network: &Network);

    /// Creates the model's internal structures once the network is final.
    fn build(&mut self, network: &mut Network) -> Result<(), SimError>;

    /// Empties the model's links and queues.
    fn reset(&mut self, network: &mut Network);

    /// Schedules the model's first events.
    fn register_with_dispatcher(&self, id: ModelId, dispatcher: &mut Dispatcher, start_time: f64);

    /// Computes the flows of the step ending at `time` and moves vehicles across nodes
    /// and boundaries.
    fn update_flow(&mut self, network: &mut Network, time: f64) -> Result<(), SimError>;

    /// Moves vehicles within links.
    fn update_state(&mut self, network: &mut Network, time: f64) -> Result<(), SimError>;

    /// Attaches a demand whose origin link belongs to this model.
    fn create_source(&mut self, demand: &Demand, network: &Network) -> Result<(), SimError>;

    /// Vehicles waiting to enter `link`.
    fn source_backlog(&self, link: LinkId) -> f64;
}

type ModelConstructor = fn(&ModelConfig) -> Result<Box<dyn Model>, SimError>;

static MODEL_TYPES: Lazy<BTreeMap<&'static str, ModelConstructor>> = Lazy::new(|| {
    let mut types: BTreeMap<&'static str, ModelConstructor> = BTreeMap::new();
    types.insert("ctm", |config| Ok(Box::new(FluidModel::new(config.clone()))));
    types.insert("spaceq", |_| {
        Err(SimError::NotImplemented("the spatial queue model".into()))
    });
    types.insert("micro", |_| {
        Err(SimError::NotImplemented("the microscopic model".into()))
    });
    types
});

/// Creates a model from its configuration.
pub fn create_model(config: &ModelConfig) -> Result<Box<dyn Model>, SimError> {
    config.validate()?;
    let constructor = MODEL_TYPES
        .get(config.model_type.as_str())
        .ok_or_else(|| SimError::UnknownModel(config.model_type.clone()))?;
    constructor(config)
}

#[cfg(test)]
mod test {
    use super::*;

    fn config(model_type: &str) -> ModelConfig {
        ModelConfig {
            model_type: model_type.into(),
            ..ModelConfig::ctm("m", 2.0)
        }
    }

    #[test]
    fn ctm_is_registered() {
        let model = create_model(&config("ctm")).unwrap();
        assert_eq!(model.name(), "m");
        assert_eq!(model.dt(), 2.0);
    }

    #[test]
    fn other_types_fail() {
        assert!(matches!(
            create_model(&config("spaceq")),
            Err(SimError::NotImplemented(_))
        ));
        assert!(matches!(
            create_model(&config("micro")),
            Err(SimError::NotImplemented(_))
        ));
        assert!(matches!(
            create_model(&config("newell")),
            Err(SimError::UnknownModel(name)) if name == "newell"
        ));
    }
}

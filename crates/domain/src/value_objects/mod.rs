//! Value Objects - Immutable, identity-less domain primitives

mod acceleration_decision;
mod backend;
mod hardware_profile;
mod model_file;
mod model_key;

pub use acceleration_decision::AccelerationDecision;
pub use backend::{Backend, DecisionSource};
pub use hardware_profile::HardwareProfile;
pub use model_file::{ModelFile, ModelFiles};
pub use model_key::ModelKey;

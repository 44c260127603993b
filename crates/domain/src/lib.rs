//! Domain layer for GemMunch
//!
//! Value objects shared by the on-device inference runtime: model keys and
//! files, hardware descriptions and acceleration decisions.
//! This layer performs no I/O.

pub mod errors;
pub mod value_objects;

pub use errors::DomainError;
pub use value_objects::*;

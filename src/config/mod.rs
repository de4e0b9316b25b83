//! Configuration module - settings loading and validation

mod settings;

pub use settings::*;

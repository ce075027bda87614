//! Configuration module for scribe
//!
//! Loads settings from a TOML file, falling back to defaults.

mod settings;

pub use settings::{EngineSettings, GeneralSettings, JobSettings, Settings};

//! Application configuration
//!
//! Everything the CLI reads from `config.toml` before a run starts.

mod config;

pub use config::{AnalysisConfig, Config, EngineConfig};

//! Engine configuration for the muestra sampler.
//!
//! Settings that shape a sampler engine outside of any one instrument:
//! output rate and block size, voice pool size, preloading, oversampling,
//! the sustain pedal controller and the voice stealing policy. Settings are
//! stored as TOML.
//!
//! # Example
//!
//! ```rust,no_run
//! use muestra_config::{EngineConfig, StealingAlgorithm};
//!
//! // Load settings from a file
//! let config = EngineConfig::load("engine.toml").unwrap();
//!
//! // Or build them in code
//! let config = EngineConfig {
//!     num_voices: 32,
//!     stealing: StealingAlgorithm::EnvelopeAndAge,
//!     ..EngineConfig::default()
//! };
//! config.validate().unwrap();
//! config.save("engine.toml").unwrap();
//! ```

mod engine;
mod error;

pub use engine::{EngineConfig, OVERSAMPLING_FACTORS, StealingAlgorithm};
pub use error::ConfigError;

//! Engine settings file format and operations.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Oversampling factors the engine accepts.
pub const OVERSAMPLING_FACTORS: [u32; 4] = [1, 2, 4, 8];

/// Policy used to pick a voice to release when a polyphony limit is hit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StealingAlgorithm {
    /// The first playing voice in the scope.
    First,
    /// The earliest started voice.
    #[default]
    Oldest,
    /// An old voice whose recent output is quiet, falling back to the oldest.
    EnvelopeAndAge,
}

/// Settings for one sampler engine.
///
/// # TOML Format
///
/// ```toml
/// sample_rate = 48000.0
/// samples_per_block = 512
/// num_voices = 64
/// overflow_voice_multiplier = 1.5
/// preload_size = 8192
/// oversampling = 1
/// loader_queue_capacity = 512
/// sustain_cc = 64
/// sustain_threshold = 64
/// stealing = "oldest"
/// volume_db = -3.0
/// root_directory = "/path/to/samples"
/// ```
///
/// Missing keys take their default values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Output sample rate in Hz.
    pub sample_rate: f32,
    /// Largest block rendered in one pass; longer requests are split.
    pub samples_per_block: usize,
    /// Number of voices that may play (not release) at once.
    pub num_voices: usize,
    /// Extra pool slots for releasing tails, as a multiple of `num_voices`.
    pub overflow_voice_multiplier: f32,
    /// Frames preloaded past each region's offset (0 = whole file).
    pub preload_size: u32,
    /// Sample data oversampling factor (1, 2, 4 or 8).
    pub oversampling: u32,
    /// Capacity of the background loader queue.
    pub loader_queue_capacity: usize,
    /// Controller number of the sustain pedal.
    pub sustain_cc: u8,
    /// Sustain pedal value at or above which notes are held.
    pub sustain_threshold: u8,
    /// Voice stealing policy.
    pub stealing: StealingAlgorithm,
    /// Master volume in dB.
    pub volume_db: f32,
    /// Directory sample names are resolved against.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_directory: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000.0,
            samples_per_block: 1024,
            num_voices: 64,
            overflow_voice_multiplier: 1.5,
            preload_size: 8192,
            oversampling: 1,
            loader_queue_capacity: 512,
            sustain_cc: 64,
            sustain_threshold: 64,
            stealing: StealingAlgorithm::Oldest,
            volume_db: 0.0,
            root_directory: None,
        }
    }
}

impl EngineConfig {
    /// Load and validate settings from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;
        Self::from_toml(&content)
    }

    /// Parse and validate settings from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Save the settings to a TOML file, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::create_dir(parent, e))?;
        }

        let content = self.to_toml()?;
        std::fs::write(path, content).map_err(|e| ConfigError::write_file(path, e))?;
        Ok(())
    }

    /// Convert the settings to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check every setting is in range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(ConfigError::invalid(
                "sample_rate",
                format!("{} is not a positive rate", self.sample_rate),
            ));
        }
        if self.samples_per_block == 0 {
            return Err(ConfigError::invalid("samples_per_block", "must be at least 1"));
        }
        if self.num_voices == 0 {
            return Err(ConfigError::invalid("num_voices", "must be at least 1"));
        }
        if !(self.overflow_voice_multiplier >= 1.0 && self.overflow_voice_multiplier <= 8.0) {
            return Err(ConfigError::invalid(
                "overflow_voice_multiplier",
                format!("{} is outside 1.0..=8.0", self.overflow_voice_multiplier),
            ));
        }
        if !OVERSAMPLING_FACTORS.contains(&self.oversampling) {
            return Err(ConfigError::invalid(
                "oversampling",
                format!("{} is not one of 1, 2, 4, 8", self.oversampling),
            ));
        }
        if self.loader_queue_capacity == 0 {
            return Err(ConfigError::invalid("loader_queue_capacity", "must be at least 1"));
        }
        if self.sustain_cc > 127 {
            return Err(ConfigError::invalid("sustain_cc", "must be a 7-bit controller"));
        }
        if self.sustain_threshold > 127 {
            return Err(ConfigError::invalid("sustain_threshold", "must be at most 127"));
        }
        if !self.volume_db.is_finite() {
            return Err(ConfigError::invalid("volume_db", "must be finite"));
        }
        Ok(())
    }

    /// Size of the voice pool: `num_voices` times the overflow multiplier,
    /// never less than `num_voices`.
    pub fn pool_size(&self) -> usize {
        let scaled = (self.num_voices as f32 * self.overflow_voice_multiplier).ceil() as usize;
        scaled.max(self.num_voices)
    }
}

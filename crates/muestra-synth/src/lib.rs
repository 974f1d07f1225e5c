//! Muestra Synth - Polyphonic sample playback for the muestra sampler
//!
//! This crate turns a set of [`Region`]s and a stream of MIDI-like events
//! into stereo audio, one block at a time.
//!
//! # Core Components
//!
//! ## Regions
//!
//! - [`Region`] - One instrument zone: sample, key/velocity ranges, gains,
//!   pitch, envelope and polyphony settings
//! - [`RegionSet`] / [`SetKind`] - The master/group hierarchy above regions
//! - [`EgDescription`] - Amplitude envelope in seconds and percent
//!
//! ## Voices
//!
//! - [`Voice`] - A slot of the fixed pool playing one region
//! - [`SisterRings`] - Links between voices started by the same event
//! - [`VoiceManager`] - Pool ownership and polyphony arbitration
//! - [`StealingAlgorithm`] - How a full scope picks the voice to release
//!
//! ## Engine
//!
//! - [`Synth`] - Regions, voices, MIDI state and the file pool together
//!
//! # Threads
//!
//! Event methods and [`Synth::render_block`] run on the render thread and
//! never allocate, block or touch the file system. Samples longer than the
//! preload size are streamed by the file pool's loader thread and handed to
//! voices without locks. Configuration methods are not real-time safe.
//!
//! # Example
//!
//! ```rust
//! use muestra_config::EngineConfig;
//! use muestra_synth::{EgDescription, Region, Synth};
//!
//! let config = EngineConfig {
//!     sample_rate: 48000.0,
//!     samples_per_block: 256,
//!     num_voices: 8,
//!     ..EngineConfig::default()
//! };
//! let mut synth = Synth::new(config)?;
//!
//! synth.add_region(
//!     Region::new("*sine")
//!         .with_key_range(0..=127)
//!         .with_amplitude_eg(EgDescription {
//!             attack: 0.01,
//!             release: 0.2,
//!             ..EgDescription::default()
//!         }),
//! )?;
//!
//! // Play a chord
//! synth.note_on(0, 1, 60, 100);
//! synth.note_on(0, 1, 64, 100);
//! synth.note_on(0, 1, 67, 100);
//! assert_eq!(synth.num_active_voices(), 3);
//!
//! let mut left = vec![0.0; 256];
//! let mut right = vec![0.0; 256];
//! synth.render_block(&mut left, &mut right);
//! # Ok::<(), muestra_synth::Error>(())
//! ```

pub mod midi_state;
pub mod region;
pub mod region_set;
pub mod sister;
pub mod stealing;
pub mod synth;
pub mod voice;
pub mod voice_manager;

pub use midi_state::MidiState;
pub use region::{
    CcCondition, CcModifier, CrossfadeCurve, EgDescription, FAST_RELEASE_SECONDS, LoopMode,
    OffMode, Region, RegionSample, SelfMask, Trigger,
};
pub use region_set::{PolyphonyGroup, RegionSet, SetId, SetKind};
pub use sister::SisterRings;
pub use stealing::StealingAlgorithm;
pub use synth::Synth;
pub use voice::{PowerHistory, TriggerEvent, TriggerKind, Voice, VoiceState};
pub use voice_manager::VoiceManager;

// Re-export the engine settings
pub use muestra_config::EngineConfig;

use muestra_config::ConfigError;

/// Error types for engine operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Sample file or loader error.
    #[error(transparent)]
    Io(#[from] muestra_io::Error),

    /// Invalid engine settings.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The region names a generator other than `*sine` or `*silence`.
    #[error("Unknown generator: {0}")]
    GeneratorUnknown(String),

    /// The region or set names a parent set the engine does not have.
    #[error("Unknown region set: {0}")]
    UnknownSet(usize),
}

/// Convenience result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

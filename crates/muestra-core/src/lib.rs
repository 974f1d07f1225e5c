//! Muestra Core - sample playback primitives
//!
//! The allocation-free building blocks of the muestra sampler: everything a
//! voice needs to turn a buffer of sample frames into an output block.
//!
//! # Components
//!
//! ## Interpolation Kernel
//!
//! - [`fill_indices`] - turn a playback position plus per-sample increments
//!   into frame indices and crossfade coefficients
//! - [`IndexPolicy`] - looping or saturating behaviour at the boundary
//! - [`interpolate`] - bounds-checked two-point read
//!
//! ## Envelopes
//!
//! - [`AdsrEnvelope`] - delay/attack/hold/decay/sustain/release generator
//!   with sample-accurate release
//!
//! ## Smoothing
//!
//! - [`LinearSmoother`] - constant-rate ramps for gain and pan changes
//!
//! ## Buffers and Spans
//!
//! - [`AudioBuffer`] - planar multichannel buffer
//! - [`block`] - fills, ramps and gains over slices
//!
//! ## Utilities
//!
//! - Conversions: [`db_to_linear`], [`midi_to_freq`], [`cents_to_ratio`],
//!   [`pan_gains`], [`seconds_to_samples`], etc.
//!
//! # no_std Support
//!
//! Disable the default `std` feature to use the crate without the standard
//! library. Only `alloc` is required, for [`AudioBuffer`].
//!
//! ```toml
//! [dependencies]
//! muestra-core = { version = "0.1", default-features = false }
//! ```
//!
//! # Example
//!
//! ```rust
//! use muestra_core::{AdsrEnvelope, AdsrParams, IndexPolicy, fill_indices, interpolate};
//!
//! let source = [0.0f32, 1.0, 2.0, 3.0];
//! let jumps = [0.5f32; 4];
//! let mut indices = [0usize; 4];
//! let mut left = [0.0f32; 4];
//! let mut right = [0.0f32; 4];
//! fill_indices(
//!     IndexPolicy::Saturating { ceiling: 3.0 },
//!     &jumps,
//!     &mut indices,
//!     &mut left,
//!     &mut right,
//!     0.0,
//! );
//!
//! let mut env = AdsrEnvelope::new();
//! env.reset(AdsrParams::default());
//! let mut gain = [0.0f32; 4];
//! env.get_block(&mut gain);
//!
//! let out: Vec<f32> = (0..4)
//!     .map(|i| interpolate(&source, indices[i], left[i], right[i]) * gain[i])
//!     .collect();
//! assert_eq!(out, [0.5, 1.0, 1.5, 2.0]);
//! ```

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(not(feature = "std"))]
extern crate alloc;

pub mod block;
pub mod buffer;
pub mod envelope;
pub mod interpolation;
pub mod math;
pub mod smoothing;

pub use buffer::AudioBuffer;
pub use envelope::{AdsrEnvelope, AdsrParams, EnvelopeState, RELEASE_FLOOR};
pub use interpolation::{IndexPolicy, fill_indices, interpolate, looping_index, saturating_index};
pub use math::{
    balance_gains, cents_to_ratio, db_to_linear, linear_to_db, midi_to_freq, normalize_bend,
    normalize_cc, normalize_percent, pan_gains, seconds_to_samples,
};
pub use smoothing::LinearSmoother;

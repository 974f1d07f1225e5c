//! Sample-position interpolation kernel.
//!
//! Turns a fractional playback position and a span of per-sample increments
//! into, for every output sample, an integer frame index and a pair of
//! linear crossfade coefficients:
//!
//! ```text
//! output[i] = source[index[i]] * left[i] + source[index[i] + 1] * right[i]
//! ```
//!
//! The position is advanced *before* each index is emitted, so the first
//! output sample already reflects the first increment.
//!
//! Two boundary policies exist:
//!
//! - **Looping**: whenever the position reaches `loop_end` it wraps back by
//!   `loop_end - loop_start`.
//! - **Saturating**: once the position reaches the ceiling it stays there and
//!   all remaining samples put their full weight on the last frame.
//!
//! # Example
//!
//! ```rust
//! use muestra_core::{IndexPolicy, fill_indices};
//!
//! let jumps = [0.5f32; 4];
//! let mut indices = [0usize; 4];
//! let mut left = [0.0f32; 4];
//! let mut right = [0.0f32; 4];
//!
//! let end = fill_indices(
//!     IndexPolicy::Saturating { ceiling: 10.0 },
//!     &jumps,
//!     &mut indices,
//!     &mut left,
//!     &mut right,
//!     0.0,
//! );
//! assert_eq!(indices, [0, 1, 1, 2]);
//! assert_eq!(end, 2.0);
//! ```

/// Boundary policy applied by [`fill_indices`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IndexPolicy {
    /// Wrap by `end - start` whenever the position reaches `end`.
    Looping {
        /// First frame of the loop.
        start: f32,
        /// Position at which the loop wraps.
        end: f32,
    },
    /// Clamp at `ceiling`, weighting the last frame fully.
    Saturating {
        /// Highest reachable position (usually `frames - 1`).
        ceiling: f32,
    },
}

/// Run the kernel with the given policy. Returns the final position.
///
/// The number of samples processed is the length of the shortest slice.
#[inline]
pub fn fill_indices(
    policy: IndexPolicy,
    jumps: &[f32],
    indices: &mut [usize],
    left: &mut [f32],
    right: &mut [f32],
    position: f32,
) -> f32 {
    match policy {
        IndexPolicy::Looping { start, end } => {
            looping_index(jumps, indices, left, right, position, start, end)
        }
        IndexPolicy::Saturating { ceiling } => {
            saturating_index(jumps, indices, left, right, position, ceiling)
        }
    }
}

/// Looping policy. Returns the final position.
///
/// A degenerate loop (`loop_end <= loop_start`) holds the position at
/// `loop_end` instead of wrapping.
pub fn looping_index(
    jumps: &[f32],
    indices: &mut [usize],
    left: &mut [f32],
    right: &mut [f32],
    position: f32,
    loop_start: f32,
    loop_end: f32,
) -> f32 {
    let len = block_len(jumps, indices, left, right);
    let span = loop_end - loop_start;
    let mut pos = position;

    for i in 0..len {
        pos += jumps[i];
        if pos >= loop_end {
            if span > 0.0 {
                while pos >= loop_end {
                    pos -= span;
                }
                // Rounding in the subtraction can land a hair below the start.
                if pos < loop_start {
                    pos = loop_start;
                }
            } else {
                pos = loop_end;
            }
        }
        write_coefficients(pos, i, indices, left, right);
    }

    pos
}

/// Saturating policy. Returns the final position.
pub fn saturating_index(
    jumps: &[f32],
    indices: &mut [usize],
    left: &mut [f32],
    right: &mut [f32],
    position: f32,
    ceiling: f32,
) -> f32 {
    let len = block_len(jumps, indices, left, right);
    let mut pos = position;
    let mut i = 0;

    while i < len {
        pos += jumps[i];
        if pos >= ceiling {
            break;
        }
        write_coefficients(pos, i, indices, left, right);
        i += 1;
    }

    if i < len {
        pos = ceiling;
        let last = (ceiling.max(0.0) as usize).saturating_sub(1);
        indices[i..len].fill(last);
        left[i..len].fill(0.0);
        right[i..len].fill(1.0);
    }

    pos
}

/// Read one interpolated sample with bounds-checked access.
///
/// Frames past the end of `channel` read as silence.
#[inline]
pub fn interpolate(channel: &[f32], index: usize, left: f32, right: f32) -> f32 {
    let a = channel.get(index).copied().unwrap_or(0.0);
    let b = channel.get(index + 1).copied().unwrap_or(0.0);
    a * left + b * right
}

#[inline]
fn write_coefficients(
    pos: f32,
    i: usize,
    indices: &mut [usize],
    left: &mut [f32],
    right: &mut [f32],
) {
    let clamped = pos.max(0.0);
    let index = clamped as usize;
    let frac = clamped - index as f32;
    indices[i] = index;
    right[i] = frac;
    left[i] = 1.0 - frac;
}

#[inline]
fn block_len(jumps: &[f32], indices: &[usize], left: &[f32], right: &[f32]) -> usize {
    jumps
        .len()
        .min(indices.len())
        .min(left.len())
        .min(right.len())
}

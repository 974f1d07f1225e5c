//! Load-time oversampling of sample data.
//!
//! Samples can be stored at 2x, 4x or 8x their file rate so that heavily
//! pitched-down playback interpolates between closer frames. Upsampling uses
//! linear interpolation between neighbouring frames; the final frame is held.

use crate::{Error, Result};
use muestra_core::AudioBuffer;

/// Oversampling factor applied to sample data when it is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Oversampling {
    /// Store samples at their file rate.
    #[default]
    X1,
    /// Twice the file rate.
    X2,
    /// Four times the file rate.
    X4,
    /// Eight times the file rate.
    X8,
}

impl Oversampling {
    /// Integer factor.
    pub fn factor(self) -> usize {
        match self {
            Self::X1 => 1,
            Self::X2 => 2,
            Self::X4 => 4,
            Self::X8 => 8,
        }
    }
}

impl TryFrom<u32> for Oversampling {
    type Error = Error;

    fn try_from(factor: u32) -> Result<Self> {
        match factor {
            1 => Ok(Self::X1),
            2 => Ok(Self::X2),
            4 => Ok(Self::X4),
            8 => Ok(Self::X8),
            other => Err(Error::UnsupportedOversampling(other)),
        }
    }
}

/// Upsample every channel of `input` by `factor`.
///
/// The output holds `frames * factor` frames. `X1` returns a copy.
pub fn upsample(input: &AudioBuffer, factor: Oversampling) -> AudioBuffer {
    let n = factor.factor();
    if n == 1 {
        return input.clone();
    }

    let frames = input.num_frames();
    let mut output = AudioBuffer::new(input.num_channels(), frames * n);
    for ch in 0..input.num_channels() {
        let src = input.channel(ch);
        let Some(dst) = output.channel_mut(ch) else {
            continue;
        };
        for (i, &current) in src.iter().enumerate() {
            let next = src.get(i + 1).copied().unwrap_or(current);
            for k in 0..n {
                let t = k as f32 / n as f32;
                dst[i * n + k] = current + (next - current) * t;
            }
        }
    }
    output
}

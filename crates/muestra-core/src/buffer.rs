//! Planar multichannel audio buffer.

#[cfg(not(feature = "std"))]
extern crate alloc;

#[cfg(feature = "std")]
extern crate std as alloc;

use alloc::vec;
use alloc::vec::Vec;

use crate::block;

/// Planar (one `Vec` per channel) audio buffer with a fixed frame count.
///
/// All channels always hold the same number of frames.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioBuffer {
    channels: Vec<Vec<f32>>,
    frames: usize,
}

impl AudioBuffer {
    /// Allocate a zeroed buffer.
    pub fn new(num_channels: usize, frames: usize) -> Self {
        Self {
            channels: vec![vec![0.0; frames]; num_channels],
            frames,
        }
    }

    /// Build from per-channel data. Channels are truncated to the shortest.
    pub fn from_channels(mut channels: Vec<Vec<f32>>) -> Self {
        let frames = channels.iter().map(Vec::len).min().unwrap_or(0);
        for channel in &mut channels {
            channel.truncate(frames);
        }
        Self { channels, frames }
    }

    /// Number of channels.
    #[inline]
    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Frames per channel.
    #[inline]
    pub fn num_frames(&self) -> usize {
        self.frames
    }

    /// True when the buffer holds no frames.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames == 0 || self.channels.is_empty()
    }

    /// Borrow one channel. Out-of-range channels read as an empty slice.
    #[inline]
    pub fn channel(&self, index: usize) -> &[f32] {
        self.channels.get(index).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Mutably borrow one channel.
    #[inline]
    pub fn channel_mut(&mut self, index: usize) -> Option<&mut [f32]> {
        self.channels.get_mut(index).map(Vec::as_mut_slice)
    }

    /// Mutably borrow the first two channels at once.
    ///
    /// A mono buffer yields `None` for the second channel.
    pub fn stereo_mut(&mut self) -> (Option<&mut [f32]>, Option<&mut [f32]>) {
        match self.channels.as_mut_slice() {
            [] => (None, None),
            [left] => (Some(left.as_mut_slice()), None),
            [left, right, ..] => (Some(left.as_mut_slice()), Some(right.as_mut_slice())),
        }
    }

    /// Set every sample to `value`.
    pub fn fill(&mut self, value: f32) {
        for channel in &mut self.channels {
            channel.fill(value);
        }
    }

    /// Add `other` channel by channel over the shared frame range.
    pub fn add(&mut self, other: &AudioBuffer) {
        for (dst, src) in self.channels.iter_mut().zip(&other.channels) {
            block::add(dst, src);
        }
    }

    /// Multiply every sample by `gain`.
    pub fn apply_gain(&mut self, gain: f32) {
        for channel in &mut self.channels {
            block::apply_gain(channel, gain);
        }
    }

    /// Mean of squared samples across all channels.
    pub fn mean_squared(&self) -> f32 {
        if self.is_empty() {
            return 0.0;
        }
        let sum: f32 = self.channels.iter().map(|c| block::mean_squared(c)).sum();
        sum / self.channels.len() as f32
    }
}

#[cfg(test)]
mod tests {
    extern crate alloc;
    use alloc::vec;

    use super::*;

    #[test]
    fn test_new_is_zeroed() {
        let buffer = AudioBuffer::new(2, 16);
        assert_eq!(buffer.num_channels(), 2);
        assert_eq!(buffer.num_frames(), 16);
        assert!(buffer.channel(1).iter().all(|&s| s == 0.0));
        assert!(buffer.channel(5).is_empty());
    }

    #[test]
    fn test_from_channels_truncates() {
        let buffer = AudioBuffer::from_channels(vec![vec![1.0; 4], vec![2.0; 3]]);
        assert_eq!(buffer.num_frames(), 3);
        assert_eq!(buffer.channel(0), &[1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_fill_add_gain() {
        let mut a = AudioBuffer::new(2, 4);
        a.fill(1.0);
        let mut b = AudioBuffer::new(2, 4);
        b.fill(0.5);
        a.add(&b);
        a.apply_gain(2.0);
        assert!(a.channel(0).iter().all(|&s| s == 3.0));
        assert_eq!(a.mean_squared(), 9.0);
    }

    #[test]
    fn test_stereo_mut() {
        let mut mono = AudioBuffer::new(1, 2);
        let (l, r) = mono.stereo_mut();
        assert!(l.is_some());
        assert!(r.is_none());

        let mut stereo = AudioBuffer::new(2, 2);
        if let (Some(l), Some(r)) = stereo.stereo_mut() {
            l[0] = 1.0;
            r[1] = 2.0;
        }
        assert_eq!(stereo.channel(0), &[1.0, 0.0]);
        assert_eq!(stereo.channel(1), &[0.0, 2.0]);
    }

    #[test]
    fn test_empty_buffer() {
        let buffer = AudioBuffer::default();
        assert!(buffer.is_empty());
        assert_eq!(buffer.mean_squared(), 0.0);
    }
}

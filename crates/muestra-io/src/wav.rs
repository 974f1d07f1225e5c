//! WAV file reading and writing.

use crate::{Error, Result};
use hound::{SampleFormat, WavReader, WavWriter};
use muestra_core::AudioBuffer;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

/// WAV audio encoding format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WavFormat {
    /// Linear PCM (integer samples).
    Pcm,
    /// IEEE 754 floating-point samples.
    IeeeFloat,
}

/// Loop points from a RIFF `smpl` chunk, in frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopRange {
    /// First frame of the loop.
    pub start: u32,
    /// Last frame of the loop (inclusive).
    pub end: u32,
}

/// WAV file metadata extracted without loading sample data.
#[derive(Debug, Clone)]
pub struct WavInfo {
    /// Number of audio channels.
    pub channels: u16,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Bit depth per sample.
    pub bits_per_sample: u16,
    /// Total number of frames (samples per channel).
    pub num_frames: u64,
    /// Audio encoding format.
    pub format: WavFormat,
    /// First loop of the `smpl` chunk, if present.
    pub loop_range: Option<LoopRange>,
}

/// WAV file specification used when writing.
#[derive(Debug, Clone, Copy)]
pub struct WavSpec {
    /// Number of audio channels (1 = mono, 2 = stereo).
    pub channels: u16,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Bit depth per sample. 32 writes IEEE float, anything else integer PCM.
    pub bits_per_sample: u16,
}

impl Default for WavSpec {
    fn default() -> Self {
        Self {
            channels: 2,
            sample_rate: 48000,
            bits_per_sample: 32,
        }
    }
}

impl From<WavSpec> for hound::WavSpec {
    fn from(spec: WavSpec) -> Self {
        hound::WavSpec {
            channels: spec.channels,
            sample_rate: spec.sample_rate,
            bits_per_sample: spec.bits_per_sample,
            sample_format: if spec.bits_per_sample == 32 {
                SampleFormat::Float
            } else {
                SampleFormat::Int
            },
        }
    }
}

/// Read WAV metadata, including loop points, without loading sample data.
pub fn read_wav_info<P: AsRef<Path>>(path: P) -> Result<WavInfo> {
    let path = path.as_ref();
    let reader = WavReader::open(path)?;
    let spec = reader.spec();
    let num_frames = u64::from(reader.duration());

    let format = match spec.sample_format {
        SampleFormat::Float => WavFormat::IeeeFloat,
        SampleFormat::Int => WavFormat::Pcm,
    };
    drop(reader);

    Ok(WavInfo {
        channels: spec.channels,
        sample_rate: spec.sample_rate,
        bits_per_sample: spec.bits_per_sample,
        num_frames,
        format,
        loop_range: read_smpl_loop(path)?,
    })
}

/// Read up to `max_frames` frames (all of them for `None`) into a planar buffer.
///
/// Only mono and stereo files are accepted. Integer samples are normalized
/// to `[-1, 1)`.
pub fn read_frames<P: AsRef<Path>>(path: P, max_frames: Option<usize>) -> Result<AudioBuffer> {
    let path = path.as_ref();
    let mut reader = WavReader::open(path)?;
    let spec = reader.spec();
    let channels = spec.channels as usize;
    if !(1..=2).contains(&channels) {
        return Err(Error::UnsupportedChannels {
            path: path.to_path_buf(),
            channels: spec.channels,
        });
    }

    let available = reader.duration() as usize;
    let frames = max_frames.map_or(available, |max| max.min(available));
    let wanted = frames * channels;

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .take(wanted)
            .collect::<std::result::Result<Vec<_>, _>>()?,
        SampleFormat::Int => {
            let max_val = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .take(wanted)
                .map(|s| s.map(|v| v as f32 / max_val))
                .collect::<std::result::Result<Vec<_>, _>>()?
        }
    };

    let mut buffer = AudioBuffer::new(channels, interleaved.len() / channels);
    for (frame, samples) in interleaved.chunks_exact(channels).enumerate() {
        for (ch, &sample) in samples.iter().enumerate() {
            if let Some(channel) = buffer.channel_mut(ch) {
                channel[frame] = sample;
            }
        }
    }
    Ok(buffer)
}

/// Read the first loop of the RIFF `smpl` chunk.
///
/// Returns `Ok(None)` when the file has no `smpl` chunk or the chunk lists no
/// loops.
pub fn read_smpl_loop<P: AsRef<Path>>(path: P) -> Result<Option<LoopRange>> {
    let mut file = BufReader::new(File::open(path)?);

    let mut header = [0u8; 12];
    file.read_exact(&mut header)
        .map_err(|_| Error::MalformedChunk("truncated RIFF header".into()))?;
    if &header[0..4] != b"RIFF" || &header[8..12] != b"WAVE" {
        return Err(Error::MalformedChunk("not a RIFF/WAVE file".into()));
    }

    loop {
        let mut chunk = [0u8; 8];
        if file.read_exact(&mut chunk).is_err() {
            return Ok(None);
        }
        let size = u32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]);

        if &chunk[0..4] != b"smpl" {
            // Chunks are word aligned
            let skip = i64::from(size) + i64::from(size & 1);
            file.seek(SeekFrom::Current(skip))?;
            continue;
        }

        if size < 36 {
            return Err(Error::MalformedChunk(format!("smpl chunk of {size} bytes")));
        }
        let mut body = vec![0u8; size as usize];
        file.read_exact(&mut body)
            .map_err(|_| Error::MalformedChunk("truncated smpl chunk".into()))?;

        let word = |offset: usize| {
            u32::from_le_bytes([
                body[offset],
                body[offset + 1],
                body[offset + 2],
                body[offset + 3],
            ])
        };

        let num_loops = word(28);
        if num_loops == 0 {
            return Ok(None);
        }
        // 36-byte header, then 24 bytes per loop: id, type, start, end, fraction, count
        if body.len() < 36 + 24 {
            return Err(Error::MalformedChunk(format!(
                "smpl chunk declares {num_loops} loops but holds none"
            )));
        }
        let (start, end) = (word(36 + 8), word(36 + 12));
        if end < start {
            return Err(Error::MalformedChunk(format!(
                "loop end {end} before start {start}"
            )));
        }
        return Ok(Some(LoopRange { start, end }));
    }
}

/// Write a planar buffer to a WAV file.
///
/// The channel count is taken from the buffer; `spec.channels` is ignored.
pub fn write_wav<P: AsRef<Path>>(path: P, buffer: &AudioBuffer, spec: WavSpec) -> Result<()> {
    let spec = WavSpec {
        channels: buffer.num_channels() as u16,
        ..spec
    };
    let mut writer = WavWriter::create(path, hound::WavSpec::from(spec))?;

    let max_val = (1i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
    for frame in 0..buffer.num_frames() {
        for ch in 0..buffer.num_channels() {
            let sample = buffer.channel(ch)[frame];
            if spec.bits_per_sample == 32 {
                writer.write_sample(sample)?;
            } else {
                let int_sample = (sample * max_val).clamp(-max_val, max_val - 1.0) as i32;
                writer.write_sample(int_sample)?;
            }
        }
    }

    writer.finalize()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn ramp(frames: usize) -> Vec<f32> {
        (0..frames).map(|i| i as f32 / frames as f32 - 0.5).collect()
    }

    #[test]
    fn test_roundtrip_stereo_f32() {
        let buffer = AudioBuffer::from_channels(vec![ramp(64), vec![0.25; 64]]);
        let file = NamedTempFile::new().unwrap();
        write_wav(file.path(), &buffer, WavSpec::default()).unwrap();

        let loaded = read_frames(file.path(), None).unwrap();
        assert_eq!(loaded, buffer);

        let info = read_wav_info(file.path()).unwrap();
        assert_eq!(info.channels, 2);
        assert_eq!(info.num_frames, 64);
        assert_eq!(info.format, WavFormat::IeeeFloat);
        assert!(info.loop_range.is_none());
    }

    #[test]
    fn test_read_prefix_only() {
        let buffer = AudioBuffer::from_channels(vec![ramp(100)]);
        let file = NamedTempFile::new().unwrap();
        write_wav(file.path(), &buffer, WavSpec::default()).unwrap();

        let prefix = read_frames(file.path(), Some(10)).unwrap();
        assert_eq!(prefix.num_channels(), 1);
        assert_eq!(prefix.num_frames(), 10);
        assert_eq!(prefix.channel(0), &buffer.channel(0)[..10]);

        let clamped = read_frames(file.path(), Some(1000)).unwrap();
        assert_eq!(clamped.num_frames(), 100);
    }

    #[test]
    fn test_int_samples_are_normalized() {
        let buffer = AudioBuffer::from_channels(vec![vec![0.5, -0.5, 0.0, -1.0]]);
        let file = NamedTempFile::new().unwrap();
        let spec = WavSpec {
            bits_per_sample: 16,
            ..WavSpec::default()
        };
        write_wav(file.path(), &buffer, spec).unwrap();

        let loaded = read_frames(file.path(), None).unwrap();
        for (a, b) in loaded.channel(0).iter().zip(buffer.channel(0)) {
            assert!((a - b).abs() < 1e-4, "{a} vs {b}");
        }
        assert_eq!(read_wav_info(file.path()).unwrap().format, WavFormat::Pcm);
    }

    #[test]
    fn test_rejects_more_than_two_channels() {
        let buffer = AudioBuffer::new(3, 8);
        let file = NamedTempFile::new().unwrap();
        write_wav(file.path(), &buffer, WavSpec::default()).unwrap();

        match read_frames(file.path(), None) {
            Err(Error::UnsupportedChannels { channels, .. }) => assert_eq!(channels, 3),
            other => panic!("expected UnsupportedChannels, got {other:?}"),
        }
    }

    #[test]
    fn test_smpl_rejects_non_riff() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), b"not a wave file at all").unwrap();
        assert!(matches!(
            read_smpl_loop(file.path()),
            Err(Error::MalformedChunk(_))
        ));
    }
}

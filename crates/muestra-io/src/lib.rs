//! Sample file I/O for the muestra sampler.
//!
//! This crate provides:
//!
//! - **WAV reading**: [`read_wav_info`], [`read_frames`] and [`read_smpl_loop`]
//!   for metadata, planar frame data and loop points
//! - **Preload cache**: [`FilePool`] keeps a short prefix of every sample in
//!   memory, shared across engines through a [`SampleCache`]
//! - **Background loading**: [`BackgroundLoader`] streams full files on a
//!   worker thread and hands them to voices through a [`LoadSlot`]
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use muestra_io::{FilePool, SampleCache};
//!
//! let pool = FilePool::new("samples/", SampleCache::global(), 512)?;
//! let info = pool.get_file_information("piano_c4.wav", 0)?;
//! println!("{} frames at {} Hz", info.num_frames, info.sample_rate);
//!
//! // On the render thread
//! let slot = pool.new_slot();
//! slot.expect(1);
//! pool.enqueue_loading(&slot, &info.id, 1);
//! ```

use std::path::PathBuf;

mod file_pool;
mod loader;
mod oversample;
mod wav;

pub use file_pool::{FileId, FileInformation, FilePool, PreloadedSample, SampleCache};
pub use loader::{BackgroundLoader, LoadRequest, LoadSlot, LoadedSample};
pub use oversample::{Oversampling, upsample};
pub use wav::{
    LoopRange, WavFormat, WavInfo, WavSpec, read_frames, read_smpl_loop, read_wav_info, write_wav,
};

/// Error types for sample file operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// WAV file read/write error.
    #[error("WAV file error: {0}")]
    Wav(#[from] hound::Error),

    /// Standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The sample file does not exist under the root directory.
    #[error("Sample file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// Only mono and stereo samples can be played.
    #[error("Unsupported channel count {channels} in {}", path.display())]
    UnsupportedChannels {
        /// File that was rejected.
        path: PathBuf,
        /// Channel count found in its header.
        channels: u16,
    },

    /// A RIFF chunk is truncated or inconsistent.
    #[error("Malformed chunk: {0}")]
    MalformedChunk(String),

    /// The background loader thread could not be started.
    #[error("Failed to start loader thread: {0}")]
    LoaderSpawn(#[source] std::io::Error),

    /// The requested oversampling factor is not 1, 2, 4 or 8.
    #[error("Unsupported oversampling factor: {0}")]
    UnsupportedOversampling(u32),
}

/// Convenience result type for sample file operations.
pub type Result<T> = std::result::Result<T, Error>;

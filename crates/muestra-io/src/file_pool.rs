//! Preloaded sample cache and the engine-facing file pool.
//!
//! Every sample used by an instrument has its first frames loaded at
//! instrument-load time so a voice can start instantly. The rest of the file
//! is streamed by the [`BackgroundLoader`].
//!
//! Preloaded buffers are reference counted. A [`SampleCache`] maps each file
//! to a weak reference of its preloaded data so that engines sharing a cache
//! (the process-wide one by default) share one buffer per file; the buffer
//! is freed when the last engine releases it.

use crate::loader::{BackgroundLoader, LoadRequest, LoadSlot};
use crate::oversample::{Oversampling, upsample};
use crate::wav::{LoopRange, WavInfo, read_frames, read_wav_info};
use crate::{Error, Result};
use muestra_core::AudioBuffer;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};

/// Identity of a sample file: the name used by the instrument plus its
/// resolved path.
///
/// Cloning only bumps reference counts, so it is cheap on the render thread.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileId {
    name: Arc<str>,
    path: Arc<Path>,
}

impl FileId {
    /// Resolve `name` under `root`.
    pub fn new(root: &Path, name: &str) -> Self {
        Self {
            name: Arc::from(name),
            path: Arc::from(root.join(name)),
        }
    }

    /// Name as given by the instrument.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolved path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Preloaded prefix of one sample file.
#[derive(Debug)]
pub struct PreloadedSample {
    /// Header information of the file.
    pub info: WavInfo,
    /// Frames read from the file, before oversampling.
    pub file_frames: u64,
    /// Oversampling applied to `data`.
    pub oversampling: Oversampling,
    /// Planar frames (oversampled).
    pub data: AudioBuffer,
}

impl PreloadedSample {
    /// Whether the whole file is held in `data`.
    pub fn is_complete(&self) -> bool {
        self.file_frames >= self.info.num_frames
    }
}

type CacheKey = (PathBuf, Oversampling);

/// Weak map of preloaded samples shared between engines.
#[derive(Debug, Default)]
pub struct SampleCache {
    entries: Mutex<HashMap<CacheKey, Weak<PreloadedSample>>>,
}

impl SampleCache {
    /// Create an empty, private cache.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The process-wide cache.
    pub fn global() -> Arc<Self> {
        static GLOBAL: OnceLock<Arc<SampleCache>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(SampleCache::new))
    }

    /// Number of live preloaded samples.
    pub fn len(&self) -> usize {
        self.lock()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    /// Whether no preloaded sample is alive.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return the cached sample for `path` if at least `min_frames` are loaded.
    fn lookup(
        &self,
        path: &Path,
        oversampling: Oversampling,
        min_frames: u64,
    ) -> Option<Arc<PreloadedSample>> {
        let entries = self.lock();
        entries
            .get(&(path.to_path_buf(), oversampling))
            .and_then(Weak::upgrade)
            .filter(|sample| sample.file_frames >= min_frames)
    }

    fn insert(&self, path: &Path, sample: &Arc<PreloadedSample>) {
        let mut entries = self.lock();
        entries.retain(|_, weak| weak.strong_count() > 0);
        entries.insert(
            (path.to_path_buf(), sample.oversampling),
            Arc::downgrade(sample),
        );
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<CacheKey, Weak<PreloadedSample>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// What the engine needs to know about a sample when adding a region.
#[derive(Debug, Clone)]
pub struct FileInformation {
    /// Identity used for background load requests.
    pub id: FileId,
    /// Total frames, in the oversampled domain.
    pub num_frames: u64,
    /// Loop points, in the oversampled domain.
    pub loop_range: Option<LoopRange>,
    /// Playback rate of the stored data (file rate times oversampling).
    pub sample_rate: f32,
    /// Channel count (1 or 2).
    pub num_channels: u16,
    /// Shared preloaded prefix.
    pub preloaded: Arc<PreloadedSample>,
}

#[derive(Debug)]
struct PoolEntry {
    sample: Arc<PreloadedSample>,
    max_offset: u64,
}

/// Per-engine view of sample files: preloaded data plus background loading.
#[derive(Debug)]
pub struct FilePool {
    root: PathBuf,
    preload_size: u32,
    oversampling: Oversampling,
    cache: Arc<SampleCache>,
    entries: HashMap<Arc<Path>, PoolEntry>,
    loader: BackgroundLoader,
}

impl FilePool {
    /// Create a pool rooted at `root`, using `cache` for preloaded data and a
    /// loader queue of `queue_capacity` requests.
    pub fn new(root: impl Into<PathBuf>, cache: Arc<SampleCache>, queue_capacity: usize) -> Result<Self> {
        Ok(Self {
            root: root.into(),
            preload_size: 8192,
            oversampling: Oversampling::X1,
            cache,
            entries: HashMap::new(),
            loader: BackgroundLoader::spawn(queue_capacity)?,
        })
    }

    /// Directory sample names are resolved against.
    pub fn root_directory(&self) -> &Path {
        &self.root
    }

    /// Change the root directory. Already preloaded files are kept.
    pub fn set_root_directory(&mut self, root: impl Into<PathBuf>) {
        self.root = root.into();
    }

    /// Frames preloaded past each region's offset (0 = whole file).
    pub fn preload_size(&self) -> u32 {
        self.preload_size
    }

    /// Current oversampling factor.
    pub fn oversampling(&self) -> Oversampling {
        self.oversampling
    }

    /// Number of files this pool holds preloaded data for.
    pub fn num_preloaded_samples(&self) -> usize {
        self.entries.len()
    }

    /// Look up a sample, preloading `offset + preload_size` frames of it.
    ///
    /// Not real-time safe: may read from disk.
    pub fn get_file_information(&mut self, name: &str, offset: u64) -> Result<FileInformation> {
        let id = FileId::new(&self.root, name);
        if !id.path().exists() {
            return Err(Error::FileNotFound(id.path().to_path_buf()));
        }

        let info = read_wav_info(id.path())?;
        if !(1..=2).contains(&info.channels) {
            return Err(Error::UnsupportedChannels {
                path: id.path().to_path_buf(),
                channels: info.channels,
            });
        }

        let max_offset = self
            .entries
            .get(id.path())
            .map_or(offset, |entry| entry.max_offset.max(offset));
        let frames = frames_to_load(info.num_frames, max_offset, self.preload_size);
        let sample = self.preload(id.path(), frames)?;
        self.entries.insert(
            Arc::clone(&id.path),
            PoolEntry {
                sample: Arc::clone(&sample),
                max_offset,
            },
        );

        let factor = self.oversampling.factor() as u64;
        let scale = |frame: u32| (u64::from(frame) * factor).min(u64::from(u32::MAX)) as u32;
        Ok(FileInformation {
            num_frames: info.num_frames * factor,
            loop_range: info.loop_range.map(|range| LoopRange {
                start: scale(range.start),
                end: scale(range.end),
            }),
            sample_rate: info.sample_rate as f32 * factor as f32,
            num_channels: info.channels,
            preloaded: sample,
            id,
        })
    }

    /// Create a handoff slot for one voice.
    pub fn new_slot(&self) -> Arc<LoadSlot> {
        Arc::new(LoadSlot::new(self.loader.handle()))
    }

    /// Ask the loader thread for the whole of `file`. Real-time safe.
    ///
    /// The slot must already expect `ticket`. Returns `false` when the
    /// request was dropped because the queue is full.
    pub fn enqueue_loading(&self, slot: &Arc<LoadSlot>, file: &FileId, ticket: u64) -> bool {
        self.loader.enqueue(LoadRequest {
            slot: Arc::clone(slot),
            path: Arc::clone(&file.path),
            oversampling: self.oversampling,
            ticket,
        })
    }

    /// Requests dropped because the loader queue was full.
    pub fn dropped_requests(&self) -> u64 {
        self.loader.dropped_requests()
    }

    /// Block until the loader queue is drained. Not real-time safe.
    pub fn wait_for_background_loading(&self) {
        self.loader.wait_for_background_loading();
    }

    /// Release all preloaded data held by this pool.
    pub fn clear(&mut self) {
        self.entries.clear();
        tracing::debug!("file pool cleared");
    }

    /// Change the preload size and reload every preloaded file.
    pub fn set_preload_size(&mut self, preload_size: u32) -> Result<()> {
        self.preload_size = preload_size;
        self.reload_all()
    }

    /// Change the oversampling factor and reload every preloaded file.
    pub fn set_oversampling(&mut self, oversampling: Oversampling) -> Result<()> {
        self.oversampling = oversampling;
        self.reload_all()
    }

    fn reload_all(&mut self) -> Result<()> {
        let paths: Vec<Arc<Path>> = self.entries.keys().cloned().collect();
        for path in paths {
            let Some(max_offset) = self.entries.get(&path).map(|entry| entry.max_offset) else {
                continue;
            };
            let total = read_wav_info(&path)?.num_frames;
            let frames = frames_to_load(total, max_offset, self.preload_size);
            let sample = self.preload(&path, frames)?;
            self.entries.insert(path, PoolEntry { sample, max_offset });
        }
        tracing::debug!(
            files = self.entries.len(),
            preload_size = self.preload_size,
            oversampling = self.oversampling.factor(),
            "file pool reloaded"
        );
        Ok(())
    }

    /// Preloaded data of at least `frames` file frames, from this pool, the
    /// shared cache, or disk.
    fn preload(&self, path: &Path, frames: u64) -> Result<Arc<PreloadedSample>> {
        if let Some(entry) = self.entries.get(path) {
            if entry.sample.file_frames >= frames
                && entry.sample.oversampling == self.oversampling
            {
                return Ok(Arc::clone(&entry.sample));
            }
        }

        if let Some(sample) = self.cache.lookup(path, self.oversampling, frames) {
            tracing::debug!(path = %path.display(), "preloaded sample shared from cache");
            return Ok(sample);
        }

        let info = read_wav_info(path)?;
        let data = read_frames(path, Some(frames as usize))?;
        let file_frames = data.num_frames() as u64;
        let sample = Arc::new(PreloadedSample {
            info,
            file_frames,
            oversampling: self.oversampling,
            data: upsample(&data, self.oversampling),
        });
        self.cache.insert(path, &sample);
        tracing::debug!(path = %path.display(), frames = file_frames, "preloaded sample");
        Ok(sample)
    }
}

fn frames_to_load(total: u64, offset: u64, preload_size: u32) -> u64 {
    if preload_size == 0 {
        total
    } else {
        total.min(offset + u64::from(preload_size))
    }
}

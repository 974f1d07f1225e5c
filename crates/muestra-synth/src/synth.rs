//! The sampler engine.
//!
//! [`Synth`] ties regions, the voice pool and the file pool together. Event
//! methods and [`Synth::render_block`] are real-time safe; everything that
//! changes the configuration takes `&mut self` and may allocate, block and
//! read files.
//!
//! ```rust,no_run
//! use muestra_config::EngineConfig;
//! use muestra_synth::{Region, Synth};
//!
//! let mut synth = Synth::new(EngineConfig::default())?;
//! synth.add_region(Region::new("*sine").with_key_range(48..=72))?;
//!
//! synth.note_on(0, 1, 60, 100);
//! let mut left = vec![0.0; 1024];
//! let mut right = vec![0.0; 1024];
//! synth.render_block(&mut left, &mut right);
//! # Ok::<(), muestra_synth::Error>(())
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use muestra_config::EngineConfig;
use muestra_core::{block, db_to_linear};
use muestra_io::{FilePool, Oversampling, SampleCache};

use crate::midi_state::MidiState;
use crate::region::{Region, Trigger};
use crate::region_set::{PolyphonyGroup, RegionSet, SetId, SetKind};
use crate::stealing::StealingAlgorithm;
use crate::voice::{TriggerEvent, TriggerKind, Voice};
use crate::voice_manager::VoiceManager;
use crate::{Error, Result};

const GENERATORS: [&str; 2] = ["*sine", "*silence"];

/// Polyphonic sampler engine.
#[derive(Debug)]
pub struct Synth {
    config: EngineConfig,
    // Voices hold buffers reclaimed by the pool's collector: drop them first
    manager: VoiceManager,
    regions: Vec<Arc<Region>>,
    midi: MidiState,
    pool: FilePool,
    gain: f32,
    killed: Vec<TriggerEvent>,
    dropped_notes: u64,
}

impl Synth {
    /// Build an engine sharing the process-wide sample cache.
    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::with_cache(config, SampleCache::global())
    }

    /// Build an engine using `cache` for preloaded sample data.
    pub fn with_cache(config: EngineConfig, cache: Arc<SampleCache>) -> Result<Self> {
        config.validate()?;

        let root = config
            .root_directory
            .clone()
            .unwrap_or_else(|| PathBuf::from("."));
        let mut pool = FilePool::new(root, cache, config.loader_queue_capacity)?;
        pool.set_preload_size(config.preload_size)?;
        pool.set_oversampling(Oversampling::try_from(config.oversampling)?)?;

        let mut manager = VoiceManager::new(config.stealing);
        manager.resize(
            config.num_voices,
            config.pool_size(),
            &pool,
            config.sample_rate,
            config.samples_per_block,
        );

        tracing::info!(
            sample_rate = config.sample_rate,
            num_voices = config.num_voices,
            pool_size = config.pool_size(),
            "sampler engine ready"
        );

        Ok(Self {
            gain: db_to_linear(config.volume_db),
            killed: Vec::with_capacity(config.pool_size()),
            config,
            manager,
            regions: Vec::new(),
            midi: MidiState::new(),
            pool,
            dropped_notes: 0,
        })
    }

    /// Current settings.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Regions and sets
    // ------------------------------------------------------------------

    /// Add a region, preloading its sample. Returns the region index.
    ///
    /// Fails if the sample cannot be loaded, the generator is unknown or
    /// the parent set does not exist.
    pub fn add_region(&mut self, mut region: Region) -> Result<usize> {
        if !self.manager.has_set(region.parent) {
            return Err(Error::UnknownSet(region.parent.0));
        }

        if region.is_generator() {
            if !GENERATORS.contains(&region.sample.as_str()) {
                return Err(Error::GeneratorUnknown(region.sample.clone()));
            }
        } else {
            let file = self.pool.get_file_information(&region.sample, region.offset)?;
            region.set_sample(file, self.pool.oversampling().factor() as u64);
        }

        let id = self.regions.len();
        region.set_id(id);
        self.manager.add_region(&mut region);
        tracing::debug!(id, sample = %region.sample, "region added");
        self.regions.push(Arc::new(region));
        Ok(id)
    }

    /// Add a master or group header below `parent`.
    pub fn add_set(&mut self, kind: SetKind, parent: SetId, polyphony: Option<u32>) -> Result<SetId> {
        if !self.manager.has_set(parent) {
            return Err(Error::UnknownSet(parent.0));
        }
        Ok(self.manager.add_set(kind, parent, polyphony))
    }

    /// Change the voice limit of a set.
    pub fn set_set_polyphony(&mut self, set: SetId, polyphony: Option<u32>) -> Result<()> {
        if !self.manager.has_set(set) {
            return Err(Error::UnknownSet(set.0));
        }
        self.manager.set_set_polyphony(set, polyphony);
        Ok(())
    }

    /// Limit the voices of a `group=` id.
    pub fn set_group_polyphony(&mut self, group: u32, limit: Option<u32>) {
        self.manager.set_group_polyphony(group, limit);
    }

    /// Remove every region and set, stopping all voices.
    pub fn clear_regions(&mut self) {
        self.manager.clear_regions();
        self.regions.clear();
        tracing::debug!("regions cleared");
    }

    /// Number of regions.
    pub fn num_regions(&self) -> usize {
        self.regions.len()
    }

    /// Region by index.
    pub fn region(&self, id: usize) -> Option<&Region> {
        self.regions.get(id).map(AsRef::as_ref)
    }

    /// All regions, in index order.
    pub fn regions(&self) -> impl Iterator<Item = &Region> {
        self.regions.iter().map(AsRef::as_ref)
    }

    /// Region sets, indexed by [`SetId`].
    pub fn sets(&self) -> &[RegionSet] {
        self.manager.sets()
    }

    /// Polyphony group by `group=` id.
    pub fn group(&self, group: u32) -> Option<&PolyphonyGroup> {
        self.manager.group(group)
    }

    // ------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------

    /// Change the number of voices. Stops all voices.
    pub fn set_num_voices(&mut self, num_voices: usize) -> Result<()> {
        let mut config = self.config.clone();
        config.num_voices = num_voices;
        config.validate()?;
        self.config = config;
        self.rebuild_voices();
        tracing::info!(num_voices, pool_size = self.config.pool_size(), "voice count changed");
        Ok(())
    }

    /// Change the output sample rate.
    pub fn set_sample_rate(&mut self, sample_rate: f32) -> Result<()> {
        let mut config = self.config.clone();
        config.sample_rate = sample_rate;
        config.validate()?;
        self.config = config;
        self.manager.set_sample_rate(sample_rate);
        tracing::debug!(sample_rate, "sample rate changed");
        Ok(())
    }

    /// Change the largest block rendered in one pass.
    pub fn set_samples_per_block(&mut self, samples_per_block: usize) -> Result<()> {
        let mut config = self.config.clone();
        config.samples_per_block = samples_per_block;
        config.validate()?;
        self.config = config;
        self.manager.set_samples_per_block(samples_per_block);
        self.killed.reserve(self.config.pool_size());
        Ok(())
    }

    /// Change the voice stealing policy.
    pub fn set_stealing(&mut self, stealing: StealingAlgorithm) {
        self.config.stealing = stealing;
        self.manager.set_stealing(stealing);
    }

    /// Change the master volume.
    pub fn set_volume(&mut self, volume_db: f32) -> Result<()> {
        let mut config = self.config.clone();
        config.volume_db = volume_db;
        config.validate()?;
        self.config = config;
        self.gain = db_to_linear(volume_db);
        Ok(())
    }

    /// Change the preload size and refresh every region. Stops all voices.
    pub fn set_preload_size(&mut self, preload_size: u32) -> Result<()> {
        self.manager.reset_all();
        self.pool.set_preload_size(preload_size)?;
        self.config.preload_size = preload_size;
        self.refresh_regions()
    }

    /// Change the oversampling factor and refresh every region. Stops all
    /// voices.
    pub fn set_oversampling(&mut self, factor: u32) -> Result<()> {
        let oversampling = Oversampling::try_from(factor)?;
        self.manager.reset_all();
        self.pool.set_oversampling(oversampling)?;
        self.config.oversampling = factor;
        self.refresh_regions()
    }

    fn refresh_regions(&mut self) -> Result<()> {
        let factor = self.pool.oversampling().factor() as u64;
        for region in &mut self.regions {
            if region.is_generator() {
                continue;
            }
            let file = self.pool.get_file_information(&region.sample, region.offset)?;
            Arc::make_mut(region).set_sample(file, factor);
        }
        tracing::debug!(regions = self.regions.len(), "regions refreshed");
        Ok(())
    }

    fn rebuild_voices(&mut self) {
        self.manager.resize(
            self.config.num_voices,
            self.config.pool_size(),
            &self.pool,
            self.config.sample_rate,
            self.config.samples_per_block,
        );
        self.killed = Vec::with_capacity(self.config.pool_size());
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    /// Note-on `delay` samples into the next block. A zero velocity is a
    /// note-off.
    pub fn note_on(&mut self, delay: i32, channel: u8, note: u8, velocity: u8) {
        if !MidiState::is_valid_channel(channel) || note > 127 {
            return;
        }
        if velocity == 0 {
            self.note_off(delay, channel, note, 0);
            return;
        }
        let delay = delay.max(0);
        let velocity = velocity.min(127);

        self.midi.note_on_event(channel, note, velocity);
        self.midi.cancel_deferred_release(channel, note);

        let trigger = TriggerEvent {
            kind: TriggerKind::NoteOn,
            channel,
            number: note,
            value: velocity,
        };
        let mut ring = None;
        for index in 0..self.regions.len() {
            if !self.regions[index].triggers_on_note(&self.midi, channel, note, velocity) {
                continue;
            }
            let region = Arc::clone(&self.regions[index]);
            self.turn_off_group(delay, region.group);
            self.start_voice(region, delay, trigger, &mut ring);
        }
        self.manager.sync();
    }

    /// Note-off `delay` samples into the next block.
    ///
    /// Release-triggered regions play with the velocity of the note-on.
    pub fn note_off(&mut self, delay: i32, channel: u8, note: u8, _velocity: u8) {
        if !MidiState::is_valid_channel(channel) || note > 127 {
            return;
        }
        let delay = delay.max(0);

        self.midi.note_off_event(channel, note);
        let velocity = self.midi.note_velocity(channel, note);

        let (sustain_cc, threshold) = (self.config.sustain_cc, self.config.sustain_threshold);
        for voice in self.manager.voices_mut() {
            voice.register_note_off(delay, channel, note, &self.midi, sustain_cc, threshold);
        }

        self.dispatch_note_off(delay, channel, note, velocity, false);
        self.manager.sync();
    }

    /// Controller change `delay` samples into the next block.
    pub fn cc(&mut self, delay: i32, channel: u8, cc: u8, value: u8) {
        if !MidiState::is_valid_channel(channel) || cc > 127 {
            return;
        }
        let delay = delay.max(0);
        let value = value.min(127);

        self.midi.cc_event(channel, cc, value);

        let (sustain_cc, threshold) = (self.config.sustain_cc, self.config.sustain_threshold);
        for voice in self.manager.voices_mut() {
            voice.register_cc(delay, channel, cc, value, sustain_cc, threshold);
        }

        if cc == sustain_cc && value < threshold {
            while let Some(note) = self.midi.pop_deferred_release(channel) {
                let velocity = self.midi.note_velocity(channel, note);
                self.dispatch_note_off(delay, channel, note, velocity, true);
            }
        }

        let trigger = TriggerEvent {
            kind: TriggerKind::Cc,
            channel,
            number: cc,
            value,
        };
        let mut ring = None;
        for index in 0..self.regions.len() {
            if !self.regions[index].triggers_on_cc(&self.midi, channel, cc, value) {
                continue;
            }
            let region = Arc::clone(&self.regions[index]);
            self.start_voice(region, delay, trigger, &mut ring);
        }
        self.manager.sync();
    }

    /// Pitch wheel move (`-8192..=8191`). Voices pick it up at the next
    /// block.
    pub fn pitch_wheel(&mut self, _delay: i32, channel: u8, value: i32) {
        if !MidiState::is_valid_channel(channel) {
            return;
        }
        self.midi.pitch_bend_event(channel, value);
        let bend = self.midi.pitch_bend(channel);
        for voice in self.manager.voices_mut() {
            voice.register_pitch_wheel(channel, bend);
        }
    }

    /// Channel aftertouch. Affects which regions later events trigger.
    pub fn aftertouch(&mut self, _delay: i32, channel: u8, value: u8) {
        if !MidiState::is_valid_channel(channel) {
            return;
        }
        self.midi.aftertouch_event(channel, value);
    }

    /// Release every voice.
    pub fn all_notes_off(&mut self, delay: i32) {
        let delay = delay.max(0);
        for voice in self.manager.voices_mut() {
            voice.release(delay);
        }
        self.manager.sync();
    }

    /// Silence every voice immediately.
    pub fn all_sound_off(&mut self) {
        self.manager.reset_all();
    }

    /// Back to the power-on state: voices stopped, controllers, notes and
    /// held-back release triggers cleared.
    pub fn reset(&mut self) {
        self.manager.reset_all();
        self.midi.reset();
        self.dropped_notes = 0;
    }

    fn turn_off_group(&mut self, delay: i32, group: u32) {
        self.killed.clear();
        self.manager.check_off_groups(delay, group, &mut self.killed);
        for index in 0..self.killed.len() {
            let killed = self.killed[index];
            self.dispatch_note_off(delay, killed.channel, killed.number, killed.value, false);
        }
    }

    fn dispatch_note_off(&mut self, delay: i32, channel: u8, note: u8, velocity: u8, deferred: bool) {
        let sustained = self.midi.cc(channel, self.config.sustain_cc) >= self.config.sustain_threshold;
        let trigger = TriggerEvent {
            kind: TriggerKind::NoteOff,
            channel,
            number: note,
            value: velocity,
        };

        let mut ring = None;
        for index in 0..self.regions.len() {
            let region = &self.regions[index];
            if !region.triggers_on_note_off(&self.midi, channel, note, velocity) {
                continue;
            }
            match region.trigger {
                Trigger::ReleaseKey if deferred => continue,
                Trigger::Release if !deferred && sustained && region.check_sustain => {
                    self.midi.defer_release(channel, note);
                    continue;
                }
                _ => {}
            }
            let region = Arc::clone(region);
            self.start_voice(region, delay, trigger, &mut ring);
        }
    }

    fn start_voice(&mut self, region: Arc<Region>, delay: i32, trigger: TriggerEvent, ring: &mut Option<usize>) {
        self.manager.check_polyphony(&region, delay, trigger);
        match self.manager.find_free_voice() {
            Some(voice) => {
                self.manager
                    .start_voice(voice, region, delay, trigger, &self.midi, &self.pool, ring);
            }
            None => self.dropped_notes += 1,
        }
    }

    // ------------------------------------------------------------------
    // Rendering
    // ------------------------------------------------------------------

    /// Render into `left` and `right`, overwriting them.
    ///
    /// Requests longer than the configured block size are rendered in
    /// several passes; event delays count from the start of the request.
    pub fn render_block(&mut self, left: &mut [f32], right: &mut [f32]) {
        let total = left.len().min(right.len());
        let step = self.config.samples_per_block.max(1);
        let mut start = 0;
        while start < total {
            let end = (start + step).min(total);
            let (block_left, block_right) = (&mut left[start..end], &mut right[start..end]);
            self.manager.render_block(block_left, block_right);
            block::apply_gain(block_left, self.gain);
            block::apply_gain(block_right, self.gain);
            start = end;
        }
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// Voices that are not idle (playing or releasing).
    pub fn num_active_voices(&self) -> usize {
        self.manager.num_active_voices()
    }

    /// Voices playing and not released.
    pub fn num_playing_voices(&self) -> usize {
        self.manager.num_playing_voices()
    }

    /// Size of the voice pool.
    pub fn num_voices(&self) -> usize {
        self.manager.voices().len()
    }

    /// Voice by pool index.
    pub fn voice(&self, index: usize) -> Option<&Voice> {
        self.manager.voices().get(index)
    }

    /// Every voice of the pool.
    pub fn voices(&self) -> &[Voice] {
        self.manager.voices()
    }

    /// Indices of the voices that are not idle, in start order.
    pub fn active_voices(&self) -> &[usize] {
        self.manager.active_voices()
    }

    /// Voice manager, for ring and scope inspection.
    pub fn voice_manager(&self) -> &VoiceManager {
        &self.manager
    }

    /// Triggered regions that found no free voice since the last reset.
    pub fn dropped_notes(&self) -> u64 {
        self.dropped_notes
    }

    /// Background load requests dropped because the queue was full.
    pub fn dropped_load_requests(&self) -> u64 {
        self.pool.dropped_requests()
    }

    /// MIDI state seen by the engine.
    pub fn midi_state(&self) -> &MidiState {
        &self.midi
    }

    /// The engine's file pool.
    pub fn file_pool(&self) -> &FilePool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EngineConfig {
        EngineConfig {
            sample_rate: 1000.0,
            samples_per_block: 64,
            num_voices: 4,
            ..EngineConfig::default()
        }
    }

    fn synth() -> Synth {
        Synth::with_cache(config(), SampleCache::new()).unwrap()
    }

    #[test]
    fn test_pool_size_follows_multiplier() {
        let synth = synth();
        assert_eq!(synth.num_voices(), 6);
        assert_eq!(synth.voice_manager().polyphony(), 4);
    }

    #[test]
    fn test_unknown_generator_is_rejected() {
        let mut synth = synth();
        let err = synth.add_region(Region::new("*noise")).unwrap_err();
        assert!(matches!(err, Error::GeneratorUnknown(name) if name == "*noise"));
        assert_eq!(synth.num_regions(), 0);
    }

    #[test]
    fn test_unknown_parent_set_is_rejected() {
        let mut synth = synth();
        let err = synth
            .add_region(Region::new("*sine").with_parent(SetId(7)))
            .unwrap_err();
        assert!(matches!(err, Error::UnknownSet(7)));
        assert!(synth.add_set(SetKind::Group, SetId(3), None).is_err());
    }

    #[test]
    fn test_missing_sample_is_an_error() {
        let mut synth = synth();
        assert!(synth.add_region(Region::new("does-not-exist.wav")).is_err());
    }

    #[test]
    fn test_invalid_channel_is_ignored() {
        let mut synth = synth();
        synth.add_region(Region::new("*sine")).unwrap();
        synth.note_on(0, 0, 60, 100);
        synth.note_on(0, 17, 60, 100);
        assert_eq!(synth.num_active_voices(), 0);
        synth.note_on(0, 16, 60, 100);
        assert_eq!(synth.num_active_voices(), 1);
    }

    #[test]
    fn test_zero_velocity_note_on_releases() {
        let mut synth = synth();
        synth.add_region(Region::new("*sine")).unwrap();
        synth.note_on(0, 1, 60, 100);
        synth.note_on(0, 1, 60, 0);
        assert_eq!(synth.num_playing_voices(), 0);
    }

    #[test]
    fn test_render_splits_long_requests() {
        let mut synth = synth();
        synth.add_region(Region::new("*sine")).unwrap();
        synth.note_on(0, 1, 69, 127);
        let mut left = vec![0.0; 200];
        let mut right = vec![0.0; 200];
        synth.render_block(&mut left, &mut right);
        assert!(left[150..].iter().any(|s| s.abs() > 0.0));
        assert_eq!(synth.voices()[synth.active_voices()[0]].age(), 200);
    }

    #[test]
    fn test_set_num_voices_rebuilds_pool() {
        let mut synth = synth();
        synth.add_region(Region::new("*sine")).unwrap();
        synth.note_on(0, 1, 60, 100);
        synth.set_num_voices(8).unwrap();
        assert_eq!(synth.num_voices(), 12);
        assert_eq!(synth.num_active_voices(), 0);
        assert!(synth.set_num_voices(0).is_err());
        assert_eq!(synth.config().num_voices, 8);
    }

    #[test]
    fn test_master_volume() {
        let mut loud = synth();
        let mut quiet = synth();
        quiet.set_volume(-6.0).unwrap();
        for synth in [&mut loud, &mut quiet] {
            synth.add_region(Region::new("*sine")).unwrap();
            synth.note_on(0, 1, 69, 127);
        }
        let (mut l1, mut r1) = (vec![0.0; 64], vec![0.0; 64]);
        let (mut l2, mut r2) = (vec![0.0; 64], vec![0.0; 64]);
        loud.render_block(&mut l1, &mut r1);
        quiet.render_block(&mut l2, &mut r2);
        let ratio = db_to_linear(-6.0);
        for (a, b) in l1.iter().zip(&l2) {
            assert!((a * ratio - b).abs() < 1e-5);
        }
    }
}

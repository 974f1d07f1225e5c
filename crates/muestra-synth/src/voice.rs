//! One playing note.
//!
//! A [`Voice`] is a slot in the engine's fixed pool. It is bound to a region
//! by [`Voice::start`], renders blocks until its envelope finishes, then
//! returns to idle:
//!
//! ```text
//! Idle --start--> Playing --release--> Released --envelope done--> Idle
//!   ^                                                               |
//!   +-------------------- all sound off / reset --------------------+
//! ```
//!
//! Voices never allocate or block after construction. Sample data comes from
//! the region's shared preloaded prefix until the background loader
//! publishes the full file into the voice's [`LoadSlot`].

use basedrop::Shared;
use libm::sinf;
use muestra_core::{
    AdsrEnvelope, AudioBuffer, IndexPolicy, LinearSmoother, balance_gains, block, db_to_linear,
    fill_indices, interpolate, midi_to_freq, normalize_bend, normalize_cc, normalize_percent,
    pan_gains, seconds_to_samples,
};
use muestra_io::{FilePool, LoadSlot, LoadedSample};
use std::fmt;
use std::sync::Arc;

use crate::midi_state::MidiState;
use crate::region::{LoopMode, Region};

/// Samples averaged by [`PowerHistory`].
pub const POWER_HISTORY_LENGTH: usize = 16;

/// Controller that releases every voice.
pub const ALL_NOTES_OFF_CC: u8 = 123;
/// Controller that silences every voice at once.
pub const ALL_SOUND_OFF_CC: u8 = 120;

const TWO_PI: f32 = core::f32::consts::TAU;
const VOLUME_DB_RANGE: (f32, f32) = (-144.0, 48.0);
const SMOOTHING_MS: f32 = 10.0;

/// Lifecycle of a voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VoiceState {
    /// Free for a new note.
    #[default]
    Idle,
    /// Sounding, not yet released.
    Playing,
    /// In its release tail.
    Released,
}

/// Event class that started a voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriggerKind {
    /// A note-on.
    #[default]
    NoteOn,
    /// A note-off (release-triggered region).
    NoteOff,
    /// A controller change.
    Cc,
}

/// Identity of the event that started a voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TriggerEvent {
    /// Event class.
    pub kind: TriggerKind,
    /// MIDI channel (1-16).
    pub channel: u8,
    /// Note or controller number.
    pub number: u8,
    /// Velocity or controller value.
    pub value: u8,
}

/// Running mean of the last block powers of a voice.
#[derive(Debug, Clone, Default)]
pub struct PowerHistory {
    values: [f32; POWER_HISTORY_LENGTH],
    next: usize,
}

impl PowerHistory {
    /// Record the power of one block.
    pub fn push(&mut self, power: f32) {
        self.values[self.next] = power;
        self.next = (self.next + 1) % POWER_HISTORY_LENGTH;
    }

    /// Mean of the recorded powers.
    pub fn average(&self) -> f32 {
        self.values.iter().sum::<f32>() / POWER_HISTORY_LENGTH as f32
    }

    /// Forget all recorded powers.
    pub fn clear(&mut self) {
        self.values = [0.0; POWER_HISTORY_LENGTH];
        self.next = 0;
    }
}

/// Sampler voice.
pub struct Voice {
    index: usize,
    state: VoiceState,
    region: Option<Arc<Region>>,
    trigger: TriggerEvent,
    sample_rate: f32,
    samples_per_block: usize,

    envelope: AdsrEnvelope,
    amplitude: LinearSmoother,
    volume: LinearSmoother,
    pan: LinearSmoother,
    base_gain: f32,
    base_volume_db: f32,
    base_pan: f32,

    speed_ratio: f32,
    pitch_ratio: f32,
    bend_ratio: f32,
    frequency: f32,
    position: f32,
    phase: f32,
    reached_end: bool,

    initial_delay: usize,
    trigger_delay: Option<i32>,
    note_is_off: bool,
    age: u64,
    sequence: u64,

    slot: Arc<LoadSlot>,
    ticket: u64,
    full: Option<Shared<LoadedSample>>,

    power: PowerHistory,

    jumps: Vec<f32>,
    indices: Vec<usize>,
    left_coeffs: Vec<f32>,
    right_coeffs: Vec<f32>,
    gains: Vec<f32>,
    span: Vec<f32>,
}

impl Voice {
    /// Create an idle voice. `slot` receives its full sample buffers.
    pub fn new(index: usize, slot: Arc<LoadSlot>, sample_rate: f32, samples_per_block: usize) -> Self {
        let mut voice = Self {
            index,
            state: VoiceState::Idle,
            region: None,
            trigger: TriggerEvent::default(),
            sample_rate,
            samples_per_block: 0,
            envelope: AdsrEnvelope::new(),
            amplitude: LinearSmoother::with_config(1.0, sample_rate, SMOOTHING_MS),
            volume: LinearSmoother::with_config(1.0, sample_rate, SMOOTHING_MS),
            pan: LinearSmoother::with_config(0.0, sample_rate, SMOOTHING_MS),
            base_gain: 1.0,
            base_volume_db: 0.0,
            base_pan: 0.0,
            speed_ratio: 1.0,
            pitch_ratio: 1.0,
            bend_ratio: 1.0,
            frequency: 0.0,
            position: 0.0,
            phase: 0.0,
            reached_end: false,
            initial_delay: 0,
            trigger_delay: None,
            note_is_off: false,
            age: 0,
            sequence: 0,
            slot,
            ticket: 0,
            full: None,
            power: PowerHistory::default(),
            jumps: Vec::new(),
            indices: Vec::new(),
            left_coeffs: Vec::new(),
            right_coeffs: Vec::new(),
            gains: Vec::new(),
            span: Vec::new(),
        };
        voice.set_samples_per_block(samples_per_block);
        voice
    }

    /// Change the output sample rate. Not real-time safe.
    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
        self.amplitude.set_sample_rate(sample_rate);
        self.volume.set_sample_rate(sample_rate);
        self.pan.set_sample_rate(sample_rate);
    }

    /// Resize the scratch buffers. Not real-time safe.
    pub fn set_samples_per_block(&mut self, samples_per_block: usize) {
        self.samples_per_block = samples_per_block;
        self.jumps.resize(samples_per_block, 0.0);
        self.indices.resize(samples_per_block, 0);
        self.left_coeffs.resize(samples_per_block, 0.0);
        self.right_coeffs.resize(samples_per_block, 0.0);
        self.gains.resize(samples_per_block, 0.0);
        self.span.resize(samples_per_block, 0.0);
    }

    /// Largest block [`render_block`](Self::render_block) accepts.
    pub fn samples_per_block(&self) -> usize {
        self.samples_per_block
    }

    /// Bind the voice to `region` and start playing.
    ///
    /// `delay` is the offset of the event in the current block; negative
    /// values are treated as 0. Returns `false`, leaving the voice idle, if
    /// the region has no sample data.
    pub fn start(
        &mut self,
        region: Arc<Region>,
        delay: i32,
        trigger: TriggerEvent,
        sequence: u64,
        midi: &MidiState,
        pool: &FilePool,
    ) -> bool {
        let delay = delay.max(0);
        let channel = trigger.channel;

        self.full = None;
        self.reached_end = false;
        if region.is_generator() {
            self.speed_ratio = 1.0;
            self.position = 0.0;
        } else {
            let Some(sample) = region.sample_data() else {
                self.reset();
                return false;
            };
            self.speed_ratio = sample.file.sample_rate / self.sample_rate;
            self.position = sample.offset as f32;

            self.ticket = self.ticket.wrapping_add(1).max(1);
            self.slot.expect(self.ticket);
            if !sample.file.preloaded.is_complete() {
                pool.enqueue_loading(&self.slot, &sample.file.id, self.ticket);
            }
        }

        let pitch_key = match trigger.kind {
            TriggerKind::Cc => region.pitch_keycenter,
            TriggerKind::NoteOn | TriggerKind::NoteOff => trigger.number,
        };
        self.pitch_ratio = region.base_pitch_ratio(pitch_key);
        self.bend_ratio = region.bend_ratio(normalize_bend(midi.pitch_bend(channel)));
        self.frequency = midi_to_freq(f32::from(region.pitch_keycenter)) * self.pitch_ratio;
        self.phase = 0.0;

        self.base_volume_db = region.volume;
        let volume_db = modulated(self.base_volume_db, region.volume_cc.map(|m| (m.cc, m.depth)), midi, channel);
        self.volume
            .set_immediate(db_to_linear(volume_db.clamp(VOLUME_DB_RANGE.0, VOLUME_DB_RANGE.1)));

        self.base_gain = region.base_gain();
        if trigger.kind != TriggerKind::Cc {
            self.base_gain *= region.note_gain(trigger.number, trigger.value);
        }
        let gain = match region.amplitude_cc {
            Some(m) => self.base_gain * normalize_cc(midi.cc(channel, m.cc)) * normalize_percent(m.depth),
            None => self.base_gain,
        };
        self.amplitude.set_immediate(gain);

        self.base_pan = normalize_percent(region.pan);
        let pan = modulated(
            self.base_pan,
            region.pan_cc.map(|m| (m.cc, normalize_percent(m.depth))),
            midi,
            channel,
        );
        self.pan.set_immediate(pan.clamp(-1.0, 1.0));

        self.initial_delay = delay as usize + seconds_to_samples(region.delay, self.sample_rate) as usize;
        self.envelope.reset(region.amplitude_eg.to_params(
            midi,
            channel,
            trigger.value,
            self.sample_rate,
            self.initial_delay as i32,
        ));

        self.trigger = trigger;
        self.trigger_delay = Some(delay);
        self.note_is_off = false;
        self.age = 0;
        self.sequence = sequence;
        self.power.clear();
        self.region = Some(region);
        self.state = VoiceState::Playing;
        true
    }

    /// Release the voice `delay` samples into the next block.
    ///
    /// A voice released before its initial delay ran out never sounds and
    /// goes straight back to idle.
    pub fn release(&mut self, delay: i32) {
        self.release_with(delay, None);
    }

    /// Release using the region's off mode, as when turned off by a group.
    pub fn off(&mut self, delay: i32) {
        let fast = self
            .region
            .as_ref()
            .and_then(|region| region.off_release_samples(self.sample_rate));
        self.release_with(delay, fast);
    }

    fn release_with(&mut self, delay: i32, release_samples: Option<i32>) {
        if self.state != VoiceState::Playing {
            return;
        }

        let delay = delay.max(0);
        if self.envelope.remaining_delay() > delay as usize {
            self.reset();
            return;
        }

        self.state = VoiceState::Released;
        match release_samples {
            Some(samples) => self.envelope.start_release_over(delay, samples),
            None => self.envelope.start_release(delay),
        }
    }

    /// Handle a note-off for `channel`/`note`.
    pub fn register_note_off(
        &mut self,
        delay: i32,
        channel: u8,
        note: u8,
        midi: &MidiState,
        sustain_cc: u8,
        sustain_threshold: u8,
    ) {
        let Some(region) = self.region.as_ref() else {
            return;
        };
        if self.state != VoiceState::Playing
            || self.trigger.kind != TriggerKind::NoteOn
            || self.trigger.channel != channel
            || self.trigger.number != note
        {
            return;
        }

        self.note_is_off = true;
        if region.effective_loop_mode() == LoopMode::OneShot {
            return;
        }
        if region.check_sustain && midi.cc(channel, sustain_cc) >= sustain_threshold {
            return;
        }
        self.release(delay);
    }

    /// Handle a controller change on `channel`.
    pub fn register_cc(
        &mut self,
        delay: i32,
        channel: u8,
        cc: u8,
        value: u8,
        sustain_cc: u8,
        sustain_threshold: u8,
    ) {
        if self.state == VoiceState::Idle || self.trigger.channel != channel {
            return;
        }
        let Some(region) = self.region.as_ref() else {
            return;
        };

        if cc == ALL_SOUND_OFF_CC {
            self.reset();
            return;
        }
        if cc == ALL_NOTES_OFF_CC {
            self.release(delay);
            return;
        }

        let sustain_lifted = region.check_sustain
            && self.note_is_off
            && cc == sustain_cc
            && value < sustain_threshold;

        let normalized = normalize_cc(value);
        if let Some(m) = region.amplitude_cc.filter(|m| m.cc == cc) {
            self.amplitude
                .set_target(self.base_gain * normalized * normalize_percent(m.depth));
        }
        if let Some(m) = region.volume_cc.filter(|m| m.cc == cc) {
            let db = (self.base_volume_db + normalized * m.depth).clamp(VOLUME_DB_RANGE.0, VOLUME_DB_RANGE.1);
            self.volume.set_target(db_to_linear(db));
        }
        if let Some(m) = region.pan_cc.filter(|m| m.cc == cc) {
            self.pan
                .set_target((self.base_pan + normalized * normalize_percent(m.depth)).clamp(-1.0, 1.0));
        }

        if sustain_lifted {
            self.release(delay);
        }
    }

    /// Handle a pitch wheel move on `channel`. Applied from the next block.
    pub fn register_pitch_wheel(&mut self, channel: u8, value: i32) {
        if self.state == VoiceState::Idle || self.trigger.channel != channel {
            return;
        }
        if let Some(region) = self.region.as_ref() {
            self.bend_ratio = region.bend_ratio(normalize_bend(value));
        }
    }

    /// Release the voice if its region is turned off by `group`.
    ///
    /// Voices started by the event that is checking are left alone. Returns
    /// `true` if the voice was released.
    pub fn check_off_group(&mut self, delay: i32, group: u32) -> bool {
        let Some(region) = self.region.as_ref() else {
            return false;
        };
        if self.state != VoiceState::Playing
            || self.trigger.kind != TriggerKind::NoteOn
            || region.off_by != Some(group)
            || self.trigger_delay == Some(delay)
        {
            return false;
        }
        self.off(delay);
        true
    }

    /// Return to idle immediately, dropping the region and any full buffer.
    pub fn reset(&mut self) {
        self.state = VoiceState::Idle;
        self.region = None;
        self.full = None;
        self.slot.clear();
        self.trigger_delay = None;
        self.note_is_off = false;
        self.reached_end = false;
        self.initial_delay = 0;
    }

    /// Render one block into `left` and `right`, overwriting them.
    ///
    /// Blocks longer than [`samples_per_block`](Self::samples_per_block) are
    /// truncated to it.
    pub fn render_block(&mut self, left: &mut [f32], right: &mut [f32]) {
        let n = left.len().min(right.len()).min(self.samples_per_block);
        let (left, right) = (&mut left[..n], &mut right[..n]);
        left.fill(0.0);
        right.fill(0.0);

        let Some(region) = self.region.clone() else {
            self.power.push(0.0);
            return;
        };
        if self.state == VoiceState::Idle {
            self.power.push(0.0);
            return;
        }

        let skip = self.initial_delay.min(n);
        self.initial_delay -= skip;

        if region.is_generator() {
            self.fill_with_generator(&region, &mut left[skip..]);
        } else {
            self.fill_with_data(&region, skip, left, right);
        }

        if region.is_stereo() {
            self.process_stereo(left, right);
        } else {
            self.process_mono(left, right);
        }

        self.age += n as u64;
        if !self.envelope.is_smoothing() {
            self.reset();
        }

        let power = (block::mean_squared(left) + block::mean_squared(right)) * 0.5;
        self.power.push(power);
        self.trigger_delay = None;
    }

    fn fill_with_generator(&mut self, region: &Region, output: &mut [f32]) {
        if region.sample != "*sine" || output.is_empty() {
            return;
        }
        let step = self.frequency * TWO_PI / self.sample_rate * self.bend_ratio;
        let mut phase = self.phase;
        for sample in output.iter_mut() {
            phase += step;
            if phase >= TWO_PI {
                phase -= TWO_PI;
            }
            *sample = sinf(phase);
        }
        self.phase = phase;
    }

    fn fill_with_data(&mut self, region: &Region, skip: usize, left: &mut [f32], right: &mut [f32]) {
        let n = left.len();
        if skip >= n || self.reached_end {
            return;
        }
        let Some(sample) = region.sample_data() else {
            return;
        };

        if self.full.is_none() && !sample.file.preloaded.is_complete() {
            self.full = self.slot.take(self.ticket);
        }
        let full = self.full.clone();
        let source: &AudioBuffer = match full.as_ref() {
            Some(loaded) => &loaded.data,
            None => &sample.file.preloaded.data,
        };

        // Frames past the end of a partial source read as silence until the
        // full buffer arrives.
        let count = n - skip;
        let last_frame = sample.end.saturating_sub(1);
        let (loop_start, loop_end) = sample.loop_range;
        let looping = match region.effective_loop_mode() {
            LoopMode::LoopContinuous => true,
            LoopMode::LoopSustain => self.state == VoiceState::Playing,
            LoopMode::NoLoop | LoopMode::OneShot => false,
        } && loop_end > loop_start
            && (loop_end as usize) < source.num_frames();

        let policy = if looping {
            IndexPolicy::Looping {
                start: loop_start as f32,
                end: loop_end as f32,
            }
        } else {
            IndexPolicy::Saturating {
                ceiling: last_frame as f32,
            }
        };

        self.jumps[..count].fill(self.pitch_ratio * self.speed_ratio * self.bend_ratio);
        self.position = fill_indices(
            policy,
            &self.jumps[..count],
            &mut self.indices[..count],
            &mut self.left_coeffs[..count],
            &mut self.right_coeffs[..count],
            self.position,
        );

        let stereo = source.num_channels() > 1;
        let (source_left, source_right) = (source.channel(0), source.channel(1));
        for i in 0..count {
            let (index, l, r) = (self.indices[i], self.left_coeffs[i], self.right_coeffs[i]);
            left[skip + i] = interpolate(source_left, index, l, r);
            if stereo {
                right[skip + i] = interpolate(source_right, index, l, r);
            }
        }

        if !looping && self.position >= last_frame as f32 {
            let clamped_index = (last_frame as usize).saturating_sub(1);
            let reached = (0..count)
                .find(|&i| self.indices[i] == clamped_index && self.right_coeffs[i] == 1.0);
            if let Some(first) = reached {
                self.reached_end = true;
                self.release((skip + first) as i32);
                left[skip + first..].fill(0.0);
                right[skip + first..].fill(0.0);
            }
        }
    }

    fn fill_gains(&mut self, n: usize) {
        let gains = &mut self.gains[..n];
        let span = &mut self.span[..n];
        self.amplitude.fill_block(gains);
        self.volume.fill_block(span);
        block::apply_gain_span(gains, span);
        self.envelope.get_block(span);
        block::apply_gain_span(gains, span);
    }

    fn process_mono(&mut self, left: &mut [f32], right: &mut [f32]) {
        let n = left.len();
        self.fill_gains(n);
        block::apply_gain_span(left, &self.gains[..n]);
        right.copy_from_slice(left);

        if self.pan.is_settled() {
            let (l, r) = pan_gains(self.pan.get());
            block::apply_gain(left, l);
            block::apply_gain(right, r);
        } else {
            for i in 0..n {
                let (l, r) = pan_gains(self.pan.advance());
                left[i] *= l;
                right[i] *= r;
            }
        }
    }

    fn process_stereo(&mut self, left: &mut [f32], right: &mut [f32]) {
        let n = left.len();
        self.fill_gains(n);
        block::apply_gain_span(left, &self.gains[..n]);
        block::apply_gain_span(right, &self.gains[..n]);

        if self.pan.is_settled() {
            let (l, r) = balance_gains(self.pan.get());
            block::apply_gain(left, l);
            block::apply_gain(right, r);
        } else {
            for i in 0..n {
                let (l, r) = balance_gains(self.pan.advance());
                left[i] *= l;
                right[i] *= r;
            }
        }
    }

    /// Position of the voice in the pool.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Lifecycle state.
    pub fn state(&self) -> VoiceState {
        self.state
    }

    /// Whether the voice can take a new note.
    pub fn is_free(&self) -> bool {
        self.state == VoiceState::Idle
    }

    /// Whether the voice is idle or in its release tail.
    pub fn released_or_free(&self) -> bool {
        self.state != VoiceState::Playing
    }

    /// Whether a polyphony limit may release this voice.
    pub fn can_be_stolen(&self) -> bool {
        self.state == VoiceState::Playing
    }

    /// The event that started the voice.
    pub fn trigger(&self) -> TriggerEvent {
        self.trigger
    }

    /// Region being played; `None` when idle.
    pub fn region(&self) -> Option<&Arc<Region>> {
        self.region.as_ref()
    }

    /// Samples rendered since the voice started.
    pub fn age(&self) -> u64 {
        self.age
    }

    /// Start order; lower values started earlier.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Mean power of the recent blocks.
    pub fn mean_squared_average(&self) -> f32 {
        self.power.average()
    }

    /// Playback position in source frames.
    pub fn source_position(&self) -> f32 {
        self.position
    }

    /// Samples of silence left before the voice sounds.
    pub fn initial_delay(&self) -> usize {
        self.initial_delay
    }

    /// Whether the full sample buffer has been handed over.
    pub fn has_full_buffer(&self) -> bool {
        self.full.is_some()
    }

    /// Current envelope.
    pub fn envelope(&self) -> &AdsrEnvelope {
        &self.envelope
    }

    /// Ticket of the last load request.
    pub fn ticket(&self) -> u64 {
        self.ticket
    }

    #[cfg(test)]
    pub(crate) fn set_sequence_for_test(&mut self, sequence: u64, age: u64, power: f32) {
        self.sequence = sequence;
        self.age = age;
        self.power.clear();
        for _ in 0..POWER_HISTORY_LENGTH {
            self.power.push(power);
        }
    }

    #[cfg(test)]
    pub(crate) fn set_state_for_test(&mut self, state: VoiceState) {
        self.state = state;
    }
}

impl fmt::Debug for Voice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Voice")
            .field("index", &self.index)
            .field("state", &self.state)
            .field("trigger", &self.trigger)
            .field("region", &self.region.as_ref().map(|region| region.id()))
            .field("position", &self.position)
            .field("age", &self.age)
            .field("ticket", &self.ticket)
            .field("full", &self.full.is_some())
            .finish_non_exhaustive()
    }
}

fn modulated(base: f32, modifier: Option<(u8, f32)>, midi: &MidiState, channel: u8) -> f32 {
    match modifier {
        Some((cc, depth)) => base + normalize_cc(midi.cc(channel, cc)) * depth,
        None => base,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::{EgDescription, OffMode};
    use muestra_io::SampleCache;

    const SR: f32 = 100.0;

    fn pool() -> FilePool {
        FilePool::new(std::env::temp_dir(), SampleCache::new(), 4).unwrap()
    }

    fn sine(eg: EgDescription) -> Arc<Region> {
        Arc::new(Region::new("*sine").with_amplitude_eg(eg))
    }

    fn note(number: u8, value: u8) -> TriggerEvent {
        TriggerEvent {
            kind: TriggerKind::NoteOn,
            channel: 1,
            number,
            value,
        }
    }

    fn render(voice: &mut Voice, n: usize) -> (Vec<f32>, Vec<f32>) {
        let mut left = vec![0.0; n];
        let mut right = vec![0.0; n];
        voice.render_block(&mut left, &mut right);
        (left, right)
    }

    #[test]
    fn test_power_history_average() {
        let mut history = PowerHistory::default();
        assert_eq!(history.average(), 0.0);
        for _ in 0..POWER_HISTORY_LENGTH {
            history.push(2.0);
        }
        assert_eq!(history.average(), 2.0);
        history.push(0.0);
        assert!(history.average() < 2.0);
    }

    #[test]
    fn test_start_and_release_cycle() {
        let pool = pool();
        let midi = MidiState::new();
        let mut voice = Voice::new(0, pool.new_slot(), SR, 16);
        assert!(voice.is_free());

        let eg = EgDescription {
            release: 0.04,
            ..EgDescription::default()
        };
        assert!(voice.start(sine(eg), 0, note(69, 127), 1, &midi, &pool));
        assert_eq!(voice.state(), VoiceState::Playing);
        assert!(!voice.released_or_free());
        assert!(voice.can_be_stolen());

        let (left, right) = render(&mut voice, 8);
        assert!(left.iter().any(|s| s.abs() > 0.0));
        assert!(right.iter().any(|s| s.abs() > 0.0));
        assert_eq!(voice.age(), 8);

        voice.register_note_off(0, 1, 69, &midi, 64, 64);
        assert_eq!(voice.state(), VoiceState::Released);
        assert!(voice.released_or_free());

        render(&mut voice, 8);
        assert!(voice.is_free());
        assert!(voice.region().is_none());
    }

    #[test]
    fn test_note_off_for_other_note_is_ignored() {
        let pool = pool();
        let midi = MidiState::new();
        let mut voice = Voice::new(0, pool.new_slot(), SR, 16);
        voice.start(sine(EgDescription::default()), 0, note(60, 100), 1, &midi, &pool);
        voice.register_note_off(0, 1, 61, &midi, 64, 64);
        voice.register_note_off(0, 2, 60, &midi, 64, 64);
        assert_eq!(voice.state(), VoiceState::Playing);
    }

    #[test]
    fn test_sustain_pedal_holds_note() {
        let pool = pool();
        let mut midi = MidiState::new();
        midi.cc_event(1, 64, 127);
        let mut voice = Voice::new(0, pool.new_slot(), SR, 16);
        voice.start(sine(EgDescription::default()), 0, note(60, 100), 1, &midi, &pool);

        voice.register_note_off(0, 1, 60, &midi, 64, 64);
        assert_eq!(voice.state(), VoiceState::Playing);

        midi.cc_event(1, 64, 0);
        voice.register_cc(0, 1, 64, 0, 64, 64);
        assert_eq!(voice.state(), VoiceState::Released);
    }

    #[test]
    fn test_one_shot_ignores_note_off() {
        let pool = pool();
        let midi = MidiState::new();
        let region = Arc::new(Region::new("*sine").with_loop_mode(LoopMode::OneShot));
        let mut voice = Voice::new(0, pool.new_slot(), SR, 16);
        voice.start(region, 0, note(60, 100), 1, &midi, &pool);
        voice.register_note_off(0, 1, 60, &midi, 64, 64);
        assert_eq!(voice.state(), VoiceState::Playing);
    }

    #[test]
    fn test_all_sound_off_resets() {
        let pool = pool();
        let midi = MidiState::new();
        let mut voice = Voice::new(0, pool.new_slot(), SR, 16);
        voice.start(sine(EgDescription::default()), 0, note(60, 100), 1, &midi, &pool);
        voice.register_cc(0, 1, ALL_NOTES_OFF_CC, 0, 64, 64);
        assert_eq!(voice.state(), VoiceState::Released);
        voice.register_cc(0, 1, ALL_SOUND_OFF_CC, 0, 64, 64);
        assert!(voice.is_free());
    }

    #[test]
    fn test_release_before_sounding_resets() {
        let pool = pool();
        let midi = MidiState::new();
        let mut voice = Voice::new(0, pool.new_slot(), SR, 16);
        voice.start(sine(EgDescription::default()), 10, note(60, 100), 1, &midi, &pool);
        assert_eq!(voice.initial_delay(), 10);
        voice.release(5);
        assert!(voice.is_free());
    }

    #[test]
    fn test_initial_delay_is_silent() {
        let pool = pool();
        let midi = MidiState::new();
        let mut voice = Voice::new(0, pool.new_slot(), SR, 16);
        voice.start(sine(EgDescription::default()), 4, note(69, 127), 1, &midi, &pool);
        let (left, _) = render(&mut voice, 8);
        assert!(left[..4].iter().all(|&s| s == 0.0));
        assert!(left[4..].iter().any(|&s| s != 0.0));
        assert_eq!(voice.initial_delay(), 0);
    }

    #[test]
    fn test_off_group_uses_fast_release() {
        let pool = pool();
        let midi = MidiState::new();
        let region = Arc::new(
            Region::new("*sine")
                .with_off_by(2)
                .with_off_mode(OffMode::Fast)
                .with_amplitude_eg(EgDescription {
                    release: 10.0,
                    ..EgDescription::default()
                }),
        );
        let mut voice = Voice::new(0, pool.new_slot(), 1000.0, 64);
        voice.start(region, 0, note(60, 100), 1, &midi, &pool);

        // Same event: left alone
        assert!(!voice.check_off_group(0, 2));
        render(&mut voice, 8);
        assert!(!voice.check_off_group(0, 3));
        assert!(voice.check_off_group(0, 2));
        assert_eq!(voice.state(), VoiceState::Released);

        // 6 ms at 1 kHz
        render(&mut voice, 16);
        assert!(voice.is_free());
    }

    #[test]
    fn test_pitch_wheel_changes_generator_rate() {
        let pool = pool();
        let midi = MidiState::new();
        let mut a = Voice::new(0, pool.new_slot(), 48000.0, 64);
        let mut b = Voice::new(1, pool.new_slot(), 48000.0, 64);
        a.start(sine(EgDescription::default()), 0, note(69, 127), 1, &midi, &pool);
        b.start(sine(EgDescription::default()), 0, note(69, 127), 2, &midi, &pool);
        b.register_pitch_wheel(1, 8191);
        b.register_pitch_wheel(2, -8192);
        let (left_a, _) = render(&mut a, 64);
        let (left_b, _) = render(&mut b, 64);
        assert_ne!(left_a, left_b);
    }

    #[test]
    fn test_centered_mono_pan() {
        let pool = pool();
        let midi = MidiState::new();
        let mut voice = Voice::new(0, pool.new_slot(), 48000.0, 64);
        voice.start(sine(EgDescription::default()), 0, note(69, 127), 1, &midi, &pool);
        let (left, right) = render(&mut voice, 64);
        for (l, r) in left.iter().zip(&right) {
            assert!((l - r).abs() < 1e-6);
        }
    }

    #[test]
    fn test_missing_sample_data_leaves_voice_idle() {
        let pool = pool();
        let midi = MidiState::new();
        let mut voice = Voice::new(0, pool.new_slot(), SR, 16);
        let region = Arc::new(Region::new("unresolved.wav"));
        assert!(!voice.start(region, 0, note(60, 100), 1, &midi, &pool));
        assert!(voice.is_free());
    }
}

//! Instrument regions.
//!
//! A [`Region`] maps a key/velocity/controller zone to sample playback
//! parameters. Regions are built with the `with_*` methods (or deserialized)
//! by whoever loads the instrument, then handed to
//! [`Synth::add_region`](crate::Synth::add_region), which resolves the
//! sample and freezes the region behind an `Arc`.
//!
//! ```rust
//! use muestra_synth::{LoopMode, Region, Trigger};
//!
//! let region = Region::new("*sine")
//!     .with_key_range(48..=72)
//!     .with_pitch_keycenter(60)
//!     .with_trigger(Trigger::Attack)
//!     .with_loop_mode(LoopMode::OneShot)
//!     .with_note_polyphony(1);
//!
//! assert!(region.key_range.contains(&60));
//! assert!(region.is_generator());
//! ```

use core::ops::RangeInclusive;
use libm::{log10f, sqrtf};
use muestra_core::{AdsrParams, cents_to_ratio, db_to_linear, normalize_cc, normalize_percent, seconds_to_samples};
use muestra_io::FileInformation;
use serde::{Deserialize, Serialize};

use crate::midi_state::MidiState;
use crate::region_set::SetId;

/// Release length used by [`OffMode::Fast`], in seconds.
pub const FAST_RELEASE_SECONDS: f32 = 0.006;

/// Longest envelope segment, in seconds.
const EG_TIME_MAX: f32 = 100.0;

/// Event class that starts a region.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// Note-on.
    #[default]
    Attack,
    /// Note-off; deferred while the sustain pedal is held.
    Release,
    /// Note-off, regardless of the sustain pedal.
    ReleaseKey,
    /// A controller entering `range`.
    Cc {
        /// Controller number.
        cc: u8,
        /// Values that trigger the region.
        range: RangeInclusive<u8>,
    },
}

/// How the sample is traversed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopMode {
    /// Play to the end once.
    NoLoop,
    /// Play to the end once, ignoring note-offs.
    OneShot,
    /// Loop until the envelope finishes.
    LoopContinuous,
    /// Loop until released, then play out to the end.
    LoopSustain,
}

/// Whether a new note of the same pitch masks softer earlier ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelfMask {
    /// Release the softest earlier note no louder than the new one.
    #[default]
    Mask,
    /// Release the oldest earlier note.
    DontMask,
}

/// Release used when a voice is turned off by another group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OffMode {
    /// A 6 ms release.
    #[default]
    Fast,
    /// The region's own release.
    Normal,
}

/// Shape of a crossfade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossfadeCurve {
    /// Equal power (square root).
    #[default]
    Power,
    /// Linear gain.
    Gain,
}

/// A controller and how far it moves a parameter at full travel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CcModifier {
    /// Controller number.
    pub cc: u8,
    /// Amount added at controller value 127.
    pub depth: f32,
}

impl CcModifier {
    fn apply(modifier: Option<Self>, base: f32, midi: &MidiState, channel: u8) -> f32 {
        match modifier {
            Some(m) => base + normalize_cc(midi.cc(channel, m.cc)) * m.depth,
            None => base,
        }
    }
}

/// Controller condition a region needs to play.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CcCondition {
    /// Controller number.
    pub cc: u8,
    /// Accepted values.
    pub range: RangeInclusive<u8>,
}

/// Amplitude envelope of a region.
///
/// Times are in seconds, levels in percent. The `vel2*` fields are added at
/// full velocity; the `cc_*` modifiers are added at full controller travel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EgDescription {
    /// Seconds before the attack starts.
    pub delay: f32,
    /// Attack time in seconds.
    pub attack: f32,
    /// Seconds held at the peak.
    pub hold: f32,
    /// Decay time to the sustain level, in seconds.
    pub decay: f32,
    /// Release time in seconds.
    pub release: f32,
    /// Starting level in percent.
    pub start: f32,
    /// Sustain level in percent.
    pub sustain: f32,
    /// Delay added at full velocity.
    pub vel2delay: f32,
    /// Attack added at full velocity.
    pub vel2attack: f32,
    /// Hold added at full velocity.
    pub vel2hold: f32,
    /// Decay added at full velocity.
    pub vel2decay: f32,
    /// Release added at full velocity.
    pub vel2release: f32,
    /// Sustain level added at full velocity, in percent.
    pub vel2sustain: f32,
    /// Controller added to the delay.
    pub cc_delay: Option<CcModifier>,
    /// Controller added to the attack.
    pub cc_attack: Option<CcModifier>,
    /// Controller added to the hold.
    pub cc_hold: Option<CcModifier>,
    /// Controller added to the decay.
    pub cc_decay: Option<CcModifier>,
    /// Controller added to the release.
    pub cc_release: Option<CcModifier>,
    /// Controller added to the start level.
    pub cc_start: Option<CcModifier>,
    /// Controller added to the sustain level.
    pub cc_sustain: Option<CcModifier>,
}

impl Default for EgDescription {
    fn default() -> Self {
        Self {
            delay: 0.0,
            attack: 0.0,
            hold: 0.0,
            decay: 0.0,
            release: 0.0,
            start: 0.0,
            sustain: 100.0,
            vel2delay: 0.0,
            vel2attack: 0.0,
            vel2hold: 0.0,
            vel2decay: 0.0,
            vel2release: 0.0,
            vel2sustain: 0.0,
            cc_delay: None,
            cc_attack: None,
            cc_hold: None,
            cc_decay: None,
            cc_release: None,
            cc_start: None,
            cc_sustain: None,
        }
    }
}

impl EgDescription {
    /// Envelope parameters for one note, in samples.
    ///
    /// `extra_delay` (samples) is added to the envelope delay.
    pub fn to_params(
        &self,
        midi: &MidiState,
        channel: u8,
        velocity: u8,
        sample_rate: f32,
        extra_delay: i32,
    ) -> AdsrParams {
        let vel = normalize_cc(velocity);
        let time = |base: f32, cc: Option<CcModifier>, vel_amount: f32| {
            let seconds = CcModifier::apply(cc, base, midi, channel) + vel * vel_amount;
            seconds_to_samples(seconds.clamp(0.0, EG_TIME_MAX), sample_rate)
        };
        let percent = |base: f32, cc: Option<CcModifier>, vel_amount: f32| {
            let value = CcModifier::apply(cc, base, midi, channel) + vel * vel_amount;
            value.clamp(0.0, 100.0) / 100.0
        };

        AdsrParams {
            delay: extra_delay.saturating_add(time(self.delay, self.cc_delay, self.vel2delay)),
            attack: time(self.attack, self.cc_attack, self.vel2attack),
            hold: time(self.hold, self.cc_hold, self.vel2hold),
            decay: time(self.decay, self.cc_decay, self.vel2decay),
            release: time(self.release, self.cc_release, self.vel2release),
            start: percent(self.start, self.cc_start, 0.0),
            sustain: percent(self.sustain, self.cc_sustain, self.vel2sustain),
            depth: 1.0,
        }
    }
}

/// Sample-derived values filled in when a region is added to an engine.
#[derive(Debug, Clone)]
pub struct RegionSample {
    /// Resolved file and its shared preloaded data.
    pub file: FileInformation,
    /// First frame played, oversampled domain.
    pub offset: u64,
    /// One past the last playable frame, oversampled domain.
    pub end: u64,
    /// Loop start and last loop frame, oversampled domain.
    pub loop_range: (u64, u64),
}

/// Static description of one instrument zone.
///
/// Fields are public for inspection; build with [`Region::new`] and the
/// `with_*` methods.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Region {
    /// Sample name relative to the root directory; `*sine` and `*silence`
    /// are generators.
    pub sample: String,
    /// Notes that trigger the region.
    pub key_range: RangeInclusive<u8>,
    /// Velocities that trigger the region.
    pub velocity_range: RangeInclusive<u8>,
    /// MIDI channels (1-16) the region listens to.
    pub channel_range: RangeInclusive<u8>,
    /// Channel aftertouch values under which the region plays.
    pub aftertouch_range: RangeInclusive<u8>,
    /// Controller conditions that must all hold.
    pub cc_conditions: Vec<CcCondition>,
    /// Event class that starts the region.
    pub trigger: Trigger,

    /// Playback start frame.
    pub offset: u64,
    /// Last frame played (clamped to the file).
    pub sample_end: Option<u64>,
    /// Loop mode; defaults to looping when the file has loop points.
    pub loop_mode: Option<LoopMode>,
    /// Loop start and last loop frame; defaults to the file's loop.
    pub loop_range: Option<RangeInclusive<u64>>,
    /// Seconds of silence before the voice starts.
    pub delay: f32,

    /// Volume in dB.
    pub volume: f32,
    /// Amplitude in percent.
    pub amplitude: f32,
    /// Pan from -100 (left) to 100 (right).
    pub pan: f32,
    /// Volume controller, depth in dB.
    pub volume_cc: Option<CcModifier>,
    /// Amplitude controller, depth in percent.
    pub amplitude_cc: Option<CcModifier>,
    /// Pan controller, depth in percent.
    pub pan_cc: Option<CcModifier>,
    /// Velocity tracking in percent.
    pub amp_veltrack: f32,
    /// Key crossfade in.
    pub xfin_key: RangeInclusive<u8>,
    /// Key crossfade out.
    pub xfout_key: RangeInclusive<u8>,
    /// Velocity crossfade in.
    pub xfin_vel: RangeInclusive<u8>,
    /// Velocity crossfade out.
    pub xfout_vel: RangeInclusive<u8>,
    /// Key crossfade shape.
    pub xf_keycurve: CrossfadeCurve,
    /// Velocity crossfade shape.
    pub xf_velcurve: CrossfadeCurve,

    /// Key at which the sample plays at its recorded pitch.
    pub pitch_keycenter: u8,
    /// Cents per key away from the keycenter.
    pub pitch_keytrack: i32,
    /// Semitones.
    pub transpose: i32,
    /// Cents.
    pub tune: i32,
    /// Cents at full upward pitch bend.
    pub bend_up: i32,
    /// Cents at full downward pitch bend.
    pub bend_down: i32,

    /// Amplitude envelope.
    pub amplitude_eg: EgDescription,

    /// Exclusive group id.
    pub group: u32,
    /// Group whose notes turn this region's voices off.
    pub off_by: Option<u32>,
    /// Release used when turned off by `off_by`.
    pub off_mode: OffMode,
    /// Voices of this region that may play at once.
    pub polyphony: Option<u32>,
    /// Voices of the same note and group that may play at once.
    pub note_polyphony: Option<u32>,
    /// Note polyphony victim selection.
    pub self_mask: SelfMask,
    /// Whether note-offs wait for the sustain pedal.
    pub check_sustain: bool,
    /// Region set the region belongs to.
    pub parent: SetId,

    #[serde(skip)]
    id: usize,
    #[serde(skip)]
    group_index: usize,
    #[serde(skip)]
    sample_data: Option<RegionSample>,
}

impl Default for Region {
    fn default() -> Self {
        Self {
            sample: String::new(),
            key_range: 0..=127,
            velocity_range: 1..=127,
            channel_range: 1..=16,
            aftertouch_range: 0..=127,
            cc_conditions: Vec::new(),
            trigger: Trigger::Attack,
            offset: 0,
            sample_end: None,
            loop_mode: None,
            loop_range: None,
            delay: 0.0,
            volume: 0.0,
            amplitude: 100.0,
            pan: 0.0,
            volume_cc: None,
            amplitude_cc: None,
            pan_cc: None,
            amp_veltrack: 100.0,
            xfin_key: 0..=0,
            xfout_key: 127..=127,
            xfin_vel: 0..=0,
            xfout_vel: 127..=127,
            xf_keycurve: CrossfadeCurve::Power,
            xf_velcurve: CrossfadeCurve::Power,
            pitch_keycenter: 60,
            pitch_keytrack: 100,
            transpose: 0,
            tune: 0,
            bend_up: 200,
            bend_down: -200,
            amplitude_eg: EgDescription::default(),
            group: 0,
            off_by: None,
            off_mode: OffMode::Fast,
            polyphony: None,
            note_polyphony: None,
            self_mask: SelfMask::Mask,
            check_sustain: true,
            parent: SetId::GLOBAL,
            id: 0,
            group_index: 0,
            sample_data: None,
        }
    }
}

impl Region {
    /// Create a region playing `sample` with default settings.
    pub fn new(sample: impl Into<String>) -> Self {
        Self {
            sample: sample.into(),
            ..Self::default()
        }
    }

    /// Set the key range.
    pub fn with_key_range(mut self, range: RangeInclusive<u8>) -> Self {
        self.key_range = range;
        self
    }

    /// Set the velocity range.
    pub fn with_velocity_range(mut self, range: RangeInclusive<u8>) -> Self {
        self.velocity_range = range;
        self
    }

    /// Set the channel range.
    pub fn with_channel_range(mut self, range: RangeInclusive<u8>) -> Self {
        self.channel_range = range;
        self
    }

    /// Set the aftertouch range.
    pub fn with_aftertouch_range(mut self, range: RangeInclusive<u8>) -> Self {
        self.aftertouch_range = range;
        self
    }

    /// Add a controller condition.
    pub fn with_cc_condition(mut self, cc: u8, range: RangeInclusive<u8>) -> Self {
        self.cc_conditions.push(CcCondition { cc, range });
        self
    }

    /// Set the trigger.
    pub fn with_trigger(mut self, trigger: Trigger) -> Self {
        self.trigger = trigger;
        self
    }

    /// Set the start frame.
    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    /// Set the last frame played.
    pub fn with_sample_end(mut self, end: u64) -> Self {
        self.sample_end = Some(end);
        self
    }

    /// Set the loop mode.
    pub fn with_loop_mode(mut self, mode: LoopMode) -> Self {
        self.loop_mode = Some(mode);
        self
    }

    /// Set the loop start and last loop frame.
    pub fn with_loop_range(mut self, range: RangeInclusive<u64>) -> Self {
        self.loop_range = Some(range);
        self
    }

    /// Set the start delay in seconds.
    pub fn with_delay(mut self, seconds: f32) -> Self {
        self.delay = seconds;
        self
    }

    /// Set the volume in dB.
    pub fn with_volume(mut self, db: f32) -> Self {
        self.volume = db;
        self
    }

    /// Set the amplitude in percent.
    pub fn with_amplitude(mut self, percent: f32) -> Self {
        self.amplitude = percent;
        self
    }

    /// Set the pan (-100 to 100).
    pub fn with_pan(mut self, pan: f32) -> Self {
        self.pan = pan;
        self
    }

    /// Modulate the volume by `depth` dB with controller `cc`.
    pub fn with_volume_cc(mut self, cc: u8, depth: f32) -> Self {
        self.volume_cc = Some(CcModifier { cc, depth });
        self
    }

    /// Modulate the amplitude by `depth` percent with controller `cc`.
    pub fn with_amplitude_cc(mut self, cc: u8, depth: f32) -> Self {
        self.amplitude_cc = Some(CcModifier { cc, depth });
        self
    }

    /// Modulate the pan by `depth` percent with controller `cc`.
    pub fn with_pan_cc(mut self, cc: u8, depth: f32) -> Self {
        self.pan_cc = Some(CcModifier { cc, depth });
        self
    }

    /// Set velocity tracking in percent.
    pub fn with_amp_veltrack(mut self, percent: f32) -> Self {
        self.amp_veltrack = percent;
        self
    }

    /// Set key crossfades.
    pub fn with_key_crossfade(
        mut self,
        fade_in: RangeInclusive<u8>,
        fade_out: RangeInclusive<u8>,
        curve: CrossfadeCurve,
    ) -> Self {
        self.xfin_key = fade_in;
        self.xfout_key = fade_out;
        self.xf_keycurve = curve;
        self
    }

    /// Set velocity crossfades.
    pub fn with_velocity_crossfade(
        mut self,
        fade_in: RangeInclusive<u8>,
        fade_out: RangeInclusive<u8>,
        curve: CrossfadeCurve,
    ) -> Self {
        self.xfin_vel = fade_in;
        self.xfout_vel = fade_out;
        self.xf_velcurve = curve;
        self
    }

    /// Set the pitch keycenter.
    pub fn with_pitch_keycenter(mut self, key: u8) -> Self {
        self.pitch_keycenter = key;
        self
    }

    /// Set pitch key tracking in cents per key.
    pub fn with_pitch_keytrack(mut self, cents: i32) -> Self {
        self.pitch_keytrack = cents;
        self
    }

    /// Set transposition in semitones.
    pub fn with_transpose(mut self, semitones: i32) -> Self {
        self.transpose = semitones;
        self
    }

    /// Set fine tuning in cents.
    pub fn with_tune(mut self, cents: i32) -> Self {
        self.tune = cents;
        self
    }

    /// Set the pitch bend range in cents.
    pub fn with_bend_range(mut self, up: i32, down: i32) -> Self {
        self.bend_up = up;
        self.bend_down = down;
        self
    }

    /// Set the amplitude envelope.
    pub fn with_amplitude_eg(mut self, eg: EgDescription) -> Self {
        self.amplitude_eg = eg;
        self
    }

    /// Set the exclusive group.
    pub fn with_group(mut self, group: u32) -> Self {
        self.group = group;
        self
    }

    /// Turn this region's voices off when `group` starts a note.
    pub fn with_off_by(mut self, group: u32) -> Self {
        self.off_by = Some(group);
        self
    }

    /// Set the off mode.
    pub fn with_off_mode(mut self, mode: OffMode) -> Self {
        self.off_mode = mode;
        self
    }

    /// Limit the voices of this region.
    pub fn with_polyphony(mut self, limit: u32) -> Self {
        self.polyphony = Some(limit);
        self
    }

    /// Limit the voices of one note in this region's group.
    pub fn with_note_polyphony(mut self, limit: u32) -> Self {
        self.note_polyphony = Some(limit);
        self
    }

    /// Set self-masking.
    pub fn with_self_mask(mut self, mask: SelfMask) -> Self {
        self.self_mask = mask;
        self
    }

    /// Set whether note-offs wait for the sustain pedal.
    pub fn with_check_sustain(mut self, check: bool) -> Self {
        self.check_sustain = check;
        self
    }

    /// Attach the region to a region set.
    pub fn with_parent(mut self, parent: SetId) -> Self {
        self.parent = parent;
        self
    }

    /// Index of the region in its engine.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Whether the sample is a generator (`*sine`, `*silence`).
    pub fn is_generator(&self) -> bool {
        self.sample.starts_with('*')
    }

    /// Whether the sample has two channels.
    pub fn is_stereo(&self) -> bool {
        self.sample_data
            .as_ref()
            .is_some_and(|data| data.file.num_channels == 2)
    }

    /// Sample-derived values; `None` for generators and before the region
    /// is added to an engine.
    pub fn sample_data(&self) -> Option<&RegionSample> {
        self.sample_data.as_ref()
    }

    /// Effective loop mode.
    pub fn effective_loop_mode(&self) -> LoopMode {
        self.loop_mode.unwrap_or_else(|| {
            if self
                .sample_data
                .as_ref()
                .is_some_and(|data| data.file.loop_range.is_some())
            {
                LoopMode::LoopContinuous
            } else {
                LoopMode::NoLoop
            }
        })
    }

    /// Whether playback wraps around the loop (before any release).
    pub fn should_loop(&self) -> bool {
        matches!(
            self.effective_loop_mode(),
            LoopMode::LoopContinuous | LoopMode::LoopSustain
        )
    }

    /// Whether the region is started by note-offs.
    pub fn is_release_trigger(&self) -> bool {
        matches!(self.trigger, Trigger::Release | Trigger::ReleaseKey)
    }

    /// Whether the region plays for a note-on.
    pub fn triggers_on_note(&self, midi: &MidiState, channel: u8, note: u8, velocity: u8) -> bool {
        self.trigger == Trigger::Attack
            && self.key_range.contains(&note)
            && self.velocity_range.contains(&velocity)
            && self.conditions_hold(midi, channel)
    }

    /// Whether the region plays for a note-off with the note-on velocity.
    pub fn triggers_on_note_off(
        &self,
        midi: &MidiState,
        channel: u8,
        note: u8,
        velocity: u8,
    ) -> bool {
        self.is_release_trigger()
            && self.key_range.contains(&note)
            && self.velocity_range.contains(&velocity)
            && self.conditions_hold(midi, channel)
    }

    /// Whether the region plays for a controller change.
    pub fn triggers_on_cc(&self, midi: &MidiState, channel: u8, cc: u8, value: u8) -> bool {
        match &self.trigger {
            Trigger::Cc { cc: trigger_cc, range } => {
                *trigger_cc == cc && range.contains(&value) && self.conditions_hold(midi, channel)
            }
            _ => false,
        }
    }

    fn conditions_hold(&self, midi: &MidiState, channel: u8) -> bool {
        self.channel_range.contains(&channel)
            && self.aftertouch_range.contains(&midi.aftertouch(channel))
            && self
                .cc_conditions
                .iter()
                .all(|condition| condition.range.contains(&midi.cc(channel, condition.cc)))
    }

    /// Pitch ratio for `note`, before pitch bend.
    pub fn base_pitch_ratio(&self, note: u8) -> f32 {
        let keys = i32::from(note) - i32::from(self.pitch_keycenter);
        let cents = self.pitch_keytrack * keys + self.tune + 100 * self.transpose;
        cents_to_ratio(cents as f32)
    }

    /// Pitch ratio for a normalized bend value in `[-1, 1]`.
    pub fn bend_ratio(&self, bend: f32) -> f32 {
        let cents = if bend > 0.0 {
            bend * self.bend_up as f32
        } else {
            -bend * self.bend_down as f32
        };
        cents_to_ratio(cents)
    }

    /// Linear amplitude before note and controller gains.
    pub fn base_gain(&self) -> f32 {
        normalize_percent(self.amplitude)
    }

    /// Gain from key and velocity: velocity tracking and crossfades.
    pub fn note_gain(&self, note: u8, velocity: u8) -> f32 {
        self.velocity_gain(velocity)
            * crossfade_in(&self.xfin_key, note, self.xf_keycurve)
            * crossfade_out(&self.xfout_key, note, self.xf_keycurve)
            * crossfade_in(&self.xfin_vel, velocity, self.xf_velcurve)
            * crossfade_out(&self.xfout_vel, velocity, self.xf_velcurve)
    }

    /// Velocity tracking gain.
    pub fn velocity_gain(&self, velocity: u8) -> f32 {
        let vel = normalize_cc(velocity);
        let gain_db = if self.amp_veltrack >= 0.0 {
            if vel == 0.0 { -90.0 } else { 40.0 * log10f(vel) }
        } else if vel == 1.0 {
            -90.0
        } else {
            40.0 * log10f(1.0 - vel)
        };
        db_to_linear(gain_db * self.amp_veltrack.abs() / 100.0)
    }

    /// Release length used when turned off by another group, in samples;
    /// `None` keeps the envelope's own release.
    pub fn off_release_samples(&self, sample_rate: f32) -> Option<i32> {
        match self.off_mode {
            OffMode::Fast => Some(seconds_to_samples(FAST_RELEASE_SECONDS, sample_rate)),
            OffMode::Normal => None,
        }
    }

    pub(crate) fn set_id(&mut self, id: usize) {
        self.id = id;
    }

    pub(crate) fn group_index(&self) -> usize {
        self.group_index
    }

    pub(crate) fn set_group_index(&mut self, index: usize) {
        self.group_index = index;
    }

    /// Fill the sample-derived values from the file pool's answer.
    pub(crate) fn set_sample(&mut self, file: FileInformation, factor: u64) {
        let frames = file.num_frames;
        let end = self
            .sample_end
            .map_or(frames, |end| (end.saturating_add(1)).saturating_mul(factor))
            .min(frames);
        let offset = self.offset.saturating_mul(factor).min(end);

        let file_loop = file
            .loop_range
            .map(|range| (u64::from(range.start), u64::from(range.end)));
        let loop_range = match &self.loop_range {
            Some(range) => (range.start() * factor, range.end() * factor),
            None => file_loop.unwrap_or((0, end.saturating_sub(1))),
        };
        let loop_end = loop_range.1.min(end.saturating_sub(1));
        let loop_start = loop_range.0.min(loop_end);

        let end = if self.should_loop_with(file_loop.is_some()) {
            end.min(loop_end + 1)
        } else {
            end
        };

        self.sample_data = Some(RegionSample {
            file,
            offset,
            end,
            loop_range: (loop_start, loop_end),
        });
    }

    fn should_loop_with(&self, file_has_loop: bool) -> bool {
        match self.loop_mode {
            Some(mode) => matches!(mode, LoopMode::LoopContinuous | LoopMode::LoopSustain),
            None => file_has_loop,
        }
    }
}

fn crossfade_in(range: &RangeInclusive<u8>, value: u8, curve: CrossfadeCurve) -> f32 {
    if value < *range.start() {
        return 0.0;
    }
    if value < *range.end() {
        let length = f32::from(range.end() - range.start()).max(1.0);
        let position = f32::from(value - range.start()) / length;
        return match curve {
            CrossfadeCurve::Power => sqrtf(position),
            CrossfadeCurve::Gain => position,
        };
    }
    1.0
}

fn crossfade_out(range: &RangeInclusive<u8>, value: u8, curve: CrossfadeCurve) -> f32 {
    if value > *range.end() {
        return 0.0;
    }
    if value > *range.start() {
        let length = f32::from(range.end() - range.start()).max(1.0);
        let position = f32::from(value - range.start()) / length;
        return match curve {
            CrossfadeCurve::Power => sqrtf(1.0 - position),
            CrossfadeCurve::Gain => 1.0 - position,
        };
    }
    1.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let region = Region::new("kick.wav");
        assert_eq!(region.key_range, 0..=127);
        assert_eq!(region.velocity_range, 1..=127);
        assert_eq!(region.trigger, Trigger::Attack);
        assert_eq!(region.effective_loop_mode(), LoopMode::NoLoop);
        assert!(!region.is_generator());
        assert!(region.check_sustain);
        assert_eq!(region.parent, SetId::GLOBAL);
    }

    #[test]
    fn test_note_trigger_ranges() {
        let midi = MidiState::new();
        let region = Region::new("*sine")
            .with_key_range(60..=64)
            .with_velocity_range(10..=100);
        assert!(region.triggers_on_note(&midi, 1, 60, 50));
        assert!(!region.triggers_on_note(&midi, 1, 65, 50));
        assert!(!region.triggers_on_note(&midi, 1, 62, 101));
        assert!(!region.triggers_on_note_off(&midi, 1, 60, 50));
    }

    #[test]
    fn test_release_trigger() {
        let midi = MidiState::new();
        let region = Region::new("*sine").with_trigger(Trigger::ReleaseKey);
        assert!(region.is_release_trigger());
        assert!(!region.triggers_on_note(&midi, 1, 60, 50));
        assert!(region.triggers_on_note_off(&midi, 1, 60, 50));
    }

    #[test]
    fn test_cc_condition_and_trigger() {
        let mut midi = MidiState::new();
        let region = Region::new("*sine")
            .with_trigger(Trigger::Cc { cc: 20, range: 64..=127 })
            .with_cc_condition(1, 0..=10);
        assert!(region.triggers_on_cc(&midi, 1, 20, 100));
        assert!(!region.triggers_on_cc(&midi, 1, 20, 10));
        assert!(!region.triggers_on_cc(&midi, 1, 21, 100));

        midi.cc_event(1, 1, 50);
        assert!(!region.triggers_on_cc(&midi, 1, 20, 100));
    }

    #[test]
    fn test_channel_range() {
        let midi = MidiState::new();
        let region = Region::new("*sine").with_channel_range(2..=2);
        assert!(!region.triggers_on_note(&midi, 1, 60, 100));
        assert!(region.triggers_on_note(&midi, 2, 60, 100));
    }

    #[test]
    fn test_pitch_ratio() {
        let region = Region::new("*sine").with_pitch_keycenter(60);
        assert!((region.base_pitch_ratio(72) - 2.0).abs() < 1e-4);
        assert!((region.base_pitch_ratio(60) - 1.0).abs() < 1e-6);

        let fixed = Region::new("*sine").with_pitch_keytrack(0).with_transpose(12);
        assert!((fixed.base_pitch_ratio(30) - 2.0).abs() < 1e-4);

        assert!((region.bend_ratio(1.0) - cents_to_ratio(200.0)).abs() < 1e-6);
        assert!((region.bend_ratio(-1.0) - cents_to_ratio(-200.0)).abs() < 1e-6);
    }

    #[test]
    fn test_velocity_gain() {
        let region = Region::new("*sine");
        assert!((region.velocity_gain(127) - 1.0).abs() < 1e-6);
        assert!(region.velocity_gain(64) < region.velocity_gain(100));

        let flat = Region::new("*sine").with_amp_veltrack(0.0);
        assert_eq!(flat.velocity_gain(1), 1.0);

        let inverted = Region::new("*sine").with_amp_veltrack(-100.0);
        assert!(inverted.velocity_gain(10) > inverted.velocity_gain(100));
    }

    #[test]
    fn test_crossfades() {
        assert_eq!(crossfade_in(&(0..=0), 0, CrossfadeCurve::Power), 1.0);
        assert_eq!(crossfade_in(&(20..=40), 10, CrossfadeCurve::Gain), 0.0);
        assert_eq!(crossfade_in(&(20..=40), 30, CrossfadeCurve::Gain), 0.5);
        assert!((crossfade_in(&(20..=40), 30, CrossfadeCurve::Power) - sqrtf(0.5)).abs() < 1e-6);
        assert_eq!(crossfade_out(&(127..=127), 127, CrossfadeCurve::Power), 1.0);
        assert_eq!(crossfade_out(&(80..=100), 90, CrossfadeCurve::Gain), 0.5);
        assert_eq!(crossfade_out(&(80..=100), 101, CrossfadeCurve::Gain), 0.0);
    }

    #[test]
    fn test_eg_to_params() {
        let midi = MidiState::new();
        let eg = EgDescription {
            attack: 0.02,
            release: 0.04,
            sustain: 50.0,
            vel2attack: 0.01,
            ..EgDescription::default()
        };
        let params = eg.to_params(&midi, 1, 127, 100.0, 5);
        assert_eq!(params.attack, 3);
        assert_eq!(params.release, 4);
        assert_eq!(params.delay, 5);
        assert_eq!(params.sustain, 0.5);
    }

    #[test]
    fn test_eg_cc_modifier() {
        let mut midi = MidiState::new();
        midi.cc_event(1, 73, 127);
        let eg = EgDescription {
            attack: 0.01,
            cc_attack: Some(CcModifier { cc: 73, depth: 0.05 }),
            ..EgDescription::default()
        };
        assert_eq!(eg.to_params(&midi, 1, 100, 100.0, 0).attack, 6);
    }

    #[test]
    fn test_fast_off_release() {
        let fast = Region::new("*sine");
        assert_eq!(fast.off_release_samples(1000.0), Some(6));
        let normal = Region::new("*sine").with_off_mode(OffMode::Normal);
        assert_eq!(normal.off_release_samples(1000.0), None);
    }

    #[test]
    fn test_serde_roundtrip() {
        let region = Region::new("piano/c4.wav")
            .with_key_range(58..=62)
            .with_trigger(Trigger::Cc { cc: 64, range: 0..=63 })
            .with_loop_mode(LoopMode::LoopSustain)
            .with_group(3)
            .with_off_by(4);
        let text = toml::to_string(&region).unwrap();
        let back: Region = toml::from_str(&text).unwrap();
        assert_eq!(back.sample, "piano/c4.wav");
        assert_eq!(back.key_range, 58..=62);
        assert_eq!(back.trigger, region.trigger);
        assert_eq!(back.loop_mode, Some(LoopMode::LoopSustain));
        assert_eq!(back.off_by, Some(4));
    }
}

//! Sample-domain ADSR envelope generator.
//!
//! A forward-only state machine:
//!
//! ```text
//! Delay -> Attack -> Hold -> Decay -> Sustain -> Release -> Done
//! ```
//!
//! All durations are in samples. The attack is a linear ramp, the decay and
//! release are multiplicative (exponential) ramps. The release aims at a
//! floor of e^-8 of full scale and writes an exact zero on its last sample,
//! after which the envelope is [`EnvelopeState::Done`].
//!
//! Blocks are generated lazily with [`AdsrEnvelope::get_block`]; the
//! per-sample [`AdsrEnvelope::next_value`] produces the same values.
//!
//! # Example
//!
//! ```rust
//! use muestra_core::{AdsrEnvelope, AdsrParams};
//!
//! let mut env = AdsrEnvelope::new();
//! env.reset(AdsrParams { attack: 2, release: 4, ..AdsrParams::default() });
//! env.start_release(2);
//!
//! let mut block = [0.0f32; 8];
//! env.get_block(&mut block);
//! assert_eq!(block[0], 0.5);
//! assert_eq!(block[1], 1.0);
//! assert_eq!(&block[5..], &[0.0, 0.0, 0.0]);
//! ```

use libm::{expf, logf};

/// Release target relative to full scale (e^-8, about -69.5 dB).
pub const RELEASE_FLOOR: f32 = 3.354_626_3e-4;

/// Envelope phases.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EnvelopeState {
    /// Waiting before the attack; output holds the start level.
    Delay,
    /// Linear ramp from the start level to the peak.
    Attack,
    /// Flat at the peak.
    Hold,
    /// Multiplicative ramp from the peak to the sustain level.
    Decay,
    /// Flat at the sustain level until released.
    Sustain,
    /// Multiplicative ramp toward silence.
    Release,
    /// Finished; output is zero.
    #[default]
    Done,
}

/// Parameters for one activation of the envelope.
///
/// Durations are in samples; negative values are treated as zero. `start`
/// and `sustain` are fractions of `depth` and are clamped to `[0, 1]`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AdsrParams {
    /// Samples before the attack begins.
    pub delay: i32,
    /// Attack length.
    pub attack: i32,
    /// Hold length at the peak.
    pub hold: i32,
    /// Decay length from the peak to sustain.
    pub decay: i32,
    /// Release length.
    pub release: i32,
    /// Start level (fraction of depth).
    pub start: f32,
    /// Sustain level (fraction of depth).
    pub sustain: f32,
    /// Peak level.
    pub depth: f32,
}

impl Default for AdsrParams {
    fn default() -> Self {
        Self {
            delay: 0,
            attack: 0,
            hold: 0,
            decay: 0,
            release: 0,
            start: 0.0,
            sustain: 1.0,
            depth: 1.0,
        }
    }
}

/// ADSR envelope generator.
#[derive(Debug, Clone, Default)]
pub struct AdsrEnvelope {
    state: EnvelopeState,
    value: f32,
    step: f32,

    start: f32,
    peak: f32,
    sustain: f32,

    // Remaining samples in each timed phase
    delay: usize,
    attack: usize,
    hold: usize,
    decay: usize,
    release: usize,

    /// Release duration captured at reset
    release_length: usize,
    /// Samples until a requested release takes effect
    release_delay: Option<usize>,
}

impl AdsrEnvelope {
    /// Create an envelope in the [`EnvelopeState::Done`] state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-arm the envelope for a new activation.
    pub fn reset(&mut self, params: AdsrParams) {
        let depth = params.depth;
        let clamp_len = |samples: i32| samples.max(0) as usize;

        self.start = depth * params.start.clamp(0.0, 1.0);
        self.sustain = depth * params.sustain.clamp(0.0, 1.0);
        self.peak = depth;

        self.delay = clamp_len(params.delay);
        self.attack = clamp_len(params.attack);
        self.hold = clamp_len(params.hold);
        self.decay = clamp_len(params.decay);
        self.release_length = clamp_len(params.release);
        self.release = self.release_length;

        self.release_delay = None;
        self.step = 0.0;
        self.value = self.start;
        self.state = EnvelopeState::Delay;
    }

    /// Force the release phase `delay` samples into the next generated output.
    ///
    /// The release starts from the value the envelope holds at that point,
    /// whatever phase it is in. Has no effect once released or done.
    pub fn start_release(&mut self, delay: i32) {
        if self.is_released() {
            return;
        }
        self.release_delay = Some(delay.max(0) as usize);
    }

    /// Like [`start_release`](Self::start_release), but with a release
    /// length of `release` samples instead of the one given at reset.
    pub fn start_release_over(&mut self, delay: i32, release: i32) {
        if self.is_released() {
            return;
        }
        self.release_length = release.max(0) as usize;
        self.release_delay = Some(delay.max(0) as usize);
    }

    /// Current phase.
    pub fn state(&self) -> EnvelopeState {
        self.state
    }

    /// Last generated value.
    pub fn value(&self) -> f32 {
        self.value
    }

    /// True until the envelope reaches [`EnvelopeState::Done`].
    pub fn is_smoothing(&self) -> bool {
        self.state != EnvelopeState::Done
    }

    /// True once a release has been requested or reached.
    pub fn is_released(&self) -> bool {
        self.release_delay.is_some()
            || matches!(self.state, EnvelopeState::Release | EnvelopeState::Done)
    }

    /// Samples left in the delay phase.
    pub fn remaining_delay(&self) -> usize {
        if self.state == EnvelopeState::Delay {
            self.delay
        } else {
            0
        }
    }

    /// Fill `output` with the next envelope values.
    pub fn get_block(&mut self, output: &mut [f32]) {
        let mut remaining = output;
        while !remaining.is_empty() {
            let boundary = match self.release_delay {
                Some(0) => {
                    self.release_delay = None;
                    self.begin_release();
                    remaining.len()
                }
                Some(delay) => delay.min(remaining.len()),
                None => remaining.len(),
            };

            let (segment, rest) = core::mem::take(&mut remaining).split_at_mut(boundary);
            self.fill_segment(segment);
            if let Some(delay) = self.release_delay.as_mut() {
                *delay -= segment.len();
            }
            remaining = rest;
        }
    }

    /// Generate a single value.
    #[inline]
    pub fn next_value(&mut self) -> f32 {
        match self.release_delay {
            Some(0) => {
                self.release_delay = None;
                self.begin_release();
            }
            Some(delay) => self.release_delay = Some(delay - 1),
            None => {}
        }
        self.advance()
    }

    fn fill_segment(&mut self, segment: &mut [f32]) {
        match self.state {
            EnvelopeState::Sustain => segment.fill(self.value),
            EnvelopeState::Done => segment.fill(0.0),
            _ => {
                for sample in segment.iter_mut() {
                    *sample = self.advance();
                }
            }
        }
    }

    fn begin_release(&mut self) {
        if matches!(self.state, EnvelopeState::Release | EnvelopeState::Done) {
            return;
        }

        self.state = EnvelopeState::Release;
        self.release = self.release_length;
        self.step = if self.value > RELEASE_FLOOR {
            let length = self.release_length.max(1) as f32;
            expf((logf(RELEASE_FLOOR) - logf(self.value)) / length)
        } else {
            1.0
        };

        #[cfg(feature = "tracing")]
        tracing::trace!(level = self.value, samples = self.release_length, "envelope release");
    }

    #[inline]
    fn advance(&mut self) -> f32 {
        loop {
            match self.state {
                EnvelopeState::Delay => {
                    if self.delay > 0 {
                        self.delay -= 1;
                        return self.value;
                    }
                    self.state = EnvelopeState::Attack;
                    self.step = (self.peak - self.value) / self.attack.max(1) as f32;
                }
                EnvelopeState::Attack => {
                    if self.attack > 0 {
                        self.attack -= 1;
                        if self.attack == 0 {
                            self.value = self.peak;
                        } else {
                            self.value += self.step;
                        }
                        return self.value;
                    }
                    self.value = self.peak;
                    self.state = EnvelopeState::Hold;
                }
                EnvelopeState::Hold => {
                    if self.hold > 0 {
                        self.hold -= 1;
                        return self.value;
                    }
                    self.state = EnvelopeState::Decay;
                    self.step = if self.peak > RELEASE_FLOOR {
                        let target = self.sustain.max(RELEASE_FLOOR);
                        expf((logf(target) - logf(self.peak)) / self.decay.max(1) as f32)
                    } else {
                        1.0
                    };
                }
                EnvelopeState::Decay => {
                    if self.decay > 0 {
                        self.decay -= 1;
                        if self.decay == 0 {
                            self.value = self.sustain;
                        } else {
                            self.value *= self.step;
                        }
                        return self.value;
                    }
                    self.value = self.sustain;
                    self.state = EnvelopeState::Sustain;
                }
                EnvelopeState::Sustain => return self.value,
                EnvelopeState::Release => {
                    if self.release > 1 {
                        self.release -= 1;
                        self.value *= self.step;
                        return self.value;
                    }
                    self.release = 0;
                    self.value = 0.0;
                    self.state = EnvelopeState::Done;
                }
                EnvelopeState::Done => return 0.0,
            }
        }
    }
}

//! Linear value smoothing for gain and pan changes.
//!
//! A [`LinearSmoother`] moves toward its target at a constant rate and lands
//! on it exactly after the configured number of samples. Voices use it so
//! that volume, amplitude and pan changes between blocks never step.
//!
//! ```rust
//! use muestra_core::LinearSmoother;
//!
//! let mut gain = LinearSmoother::with_config(0.0, 48000.0, 10.0);
//! gain.set_target(1.0);
//! for _ in 0..480 {
//!     gain.advance();
//! }
//! assert_eq!(gain.get(), 1.0);
//! ```

/// Value with a linear ramp toward its target.
#[derive(Debug, Clone)]
pub struct LinearSmoother {
    current: f32,
    target: f32,
    /// Increment per sample (can be negative)
    increment: f32,
    samples_remaining: u32,
    sample_rate: f32,
    transition_time_ms: f32,
}

impl LinearSmoother {
    /// Create a smoother at `initial` with a 10 ms transition at 48 kHz.
    pub fn new(initial: f32) -> Self {
        Self::with_config(initial, 48000.0, 10.0)
    }

    /// Create with explicit sample rate and transition time.
    pub fn with_config(initial: f32, sample_rate: f32, transition_time_ms: f32) -> Self {
        Self {
            current: initial,
            target: initial,
            increment: 0.0,
            samples_remaining: 0,
            sample_rate,
            transition_time_ms,
        }
    }

    /// Start a ramp toward `target`.
    pub fn set_target(&mut self, target: f32) {
        if (target - self.target).abs() < 1e-9 {
            return;
        }
        self.target = target;

        let samples = (self.transition_time_ms / 1000.0 * self.sample_rate) as u32;
        if samples == 0 {
            self.set_immediate(target);
        } else {
            self.increment = (target - self.current) / samples as f32;
            self.samples_remaining = samples;
        }
    }

    /// Jump to `value` without ramping.
    pub fn set_immediate(&mut self, value: f32) {
        self.current = value;
        self.target = value;
        self.increment = 0.0;
        self.samples_remaining = 0;
    }

    /// Update the sample rate used for future ramps.
    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
    }

    /// Update the transition time used for future ramps.
    pub fn set_transition_time_ms(&mut self, time_ms: f32) {
        self.transition_time_ms = time_ms;
    }

    /// Next value.
    #[inline]
    pub fn advance(&mut self) -> f32 {
        if self.samples_remaining > 0 {
            self.current += self.increment;
            self.samples_remaining -= 1;
            if self.samples_remaining == 0 {
                self.current = self.target;
            }
        }
        self.current
    }

    /// Fill `output` with successive values.
    pub fn fill_block(&mut self, output: &mut [f32]) {
        if self.samples_remaining == 0 {
            output.fill(self.current);
            return;
        }
        for sample in output.iter_mut() {
            *sample = self.advance();
        }
    }

    /// Current value.
    #[inline]
    pub fn get(&self) -> f32 {
        self.current
    }

    /// Target value.
    #[inline]
    pub fn target(&self) -> f32 {
        self.target
    }

    /// True when no ramp is in progress.
    #[inline]
    pub fn is_settled(&self) -> bool {
        self.samples_remaining == 0
    }
}

impl Default for LinearSmoother {
    fn default() -> Self {
        Self::new(0.0)
    }
}

//! Conversions used by the sampler.
//!
//! - [`db_to_linear`] / [`linear_to_db`] - level conversions
//! - [`midi_to_freq`], [`cents_to_ratio`] - pitch conversions
//! - [`normalize_cc`], [`normalize_percent`], [`normalize_bend`] - MIDI value scaling
//! - [`pan_gains`], [`balance_gains`] - stereo placement
//! - [`seconds_to_samples`] - time conversion

use libm::{cosf, expf, logf, powf, sinf};

/// Convert decibels to linear gain.
///
/// ```rust
/// use muestra_core::db_to_linear;
///
/// assert!((db_to_linear(0.0) - 1.0).abs() < 0.001);
/// assert!((db_to_linear(-6.02) - 0.5).abs() < 0.01);
/// ```
#[inline]
pub fn db_to_linear(db: f32) -> f32 {
    // 10^(dB/20) = e^(dB * ln(10)/20)
    const FACTOR: f32 = core::f32::consts::LN_10 / 20.0;
    expf(db * FACTOR)
}

/// Convert linear gain to decibels.
#[inline]
pub fn linear_to_db(linear: f32) -> f32 {
    const FACTOR: f32 = 20.0 / core::f32::consts::LN_10;
    logf(linear.max(1e-10)) * FACTOR
}

/// Equal-tempered frequency of a MIDI note (A4 = 69 = 440 Hz).
#[inline]
pub fn midi_to_freq(note: f32) -> f32 {
    440.0 * powf(2.0, (note - 69.0) / 12.0)
}

/// Frequency ratio for a pitch offset in cents.
#[inline]
pub fn cents_to_ratio(cents: f32) -> f32 {
    powf(2.0, cents / 1200.0)
}

/// Scale a 7-bit MIDI value to `[0, 1]`.
#[inline]
pub fn normalize_cc(value: u8) -> f32 {
    f32::from(value.min(127)) / 127.0
}

/// Scale a percentage to a fraction, clamping to `[-1, 1]`.
#[inline]
pub fn normalize_percent(percent: f32) -> f32 {
    (percent / 100.0).clamp(-1.0, 1.0)
}

/// Scale a 14-bit signed pitch wheel value (`-8192..=8191`) to `[-1, 1]`.
#[inline]
pub fn normalize_bend(value: i32) -> f32 {
    let clamped = value.clamp(-8192, 8191) as f32;
    if clamped < 0.0 {
        clamped / 8192.0
    } else {
        clamped / 8191.0
    }
}

/// Constant-power pan gains for `pan` in `[-1, 1]`.
///
/// Returns `(left, right)`. Centre gives `cos(pi/4)` on both sides.
#[inline]
pub fn pan_gains(pan: f32) -> (f32, f32) {
    let angle = (pan.clamp(-1.0, 1.0) + 1.0) * core::f32::consts::FRAC_PI_4;
    (cosf(angle), sinf(angle))
}

/// Balance gains for stereo sources, `pan` in `[-1, 1]`.
///
/// Unity on both sides at centre; the side being panned away from fades out.
#[inline]
pub fn balance_gains(pan: f32) -> (f32, f32) {
    let (left, right) = pan_gains(pan);
    let scale = core::f32::consts::SQRT_2;
    ((left * scale).min(1.0), (right * scale).min(1.0))
}

/// Convert seconds to a whole number of samples, rounding to nearest.
///
/// Negative durations give zero.
#[inline]
pub fn seconds_to_samples(seconds: f32, sample_rate: f32) -> i32 {
    let samples = seconds * sample_rate;
    if samples <= 0.0 {
        0
    } else {
        (samples + 0.5) as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_roundtrip() {
        for db in [-24.0f32, -6.0, 0.0, 6.0] {
            assert!((linear_to_db(db_to_linear(db)) - db).abs() < 1e-3);
        }
    }

    #[test]
    fn test_midi_to_freq() {
        assert!((midi_to_freq(69.0) - 440.0).abs() < 1e-3);
        assert!((midi_to_freq(81.0) - 880.0).abs() < 1e-2);
        assert!((midi_to_freq(60.0) - 261.6256).abs() < 1e-2);
    }

    #[test]
    fn test_cents_to_ratio() {
        assert!((cents_to_ratio(1200.0) - 2.0).abs() < 1e-5);
        assert!((cents_to_ratio(-1200.0) - 0.5).abs() < 1e-5);
        assert_eq!(cents_to_ratio(0.0), 1.0);
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize_cc(0), 0.0);
        assert_eq!(normalize_cc(127), 1.0);
        assert_eq!(normalize_cc(200), 1.0);
        assert_eq!(normalize_percent(50.0), 0.5);
        assert_eq!(normalize_percent(-250.0), -1.0);
        assert_eq!(normalize_bend(8191), 1.0);
        assert_eq!(normalize_bend(-8192), -1.0);
        assert_eq!(normalize_bend(0), 0.0);
    }

    #[test]
    fn test_pan_gains() {
        let (l, r) = pan_gains(0.0);
        assert!((l - r).abs() < 1e-6);
        assert!((l * l + r * r - 1.0).abs() < 1e-5);

        let (l, r) = pan_gains(-1.0);
        assert!((l - 1.0).abs() < 1e-6);
        assert!(r.abs() < 1e-6);
    }

    #[test]
    fn test_balance_gains() {
        let (l, r) = balance_gains(0.0);
        assert!((l - 1.0).abs() < 1e-5);
        assert!((r - 1.0).abs() < 1e-5);

        let (l, r) = balance_gains(1.0);
        assert!(l.abs() < 1e-5);
        assert_eq!(r, 1.0);
    }

    #[test]
    fn test_seconds_to_samples() {
        assert_eq!(seconds_to_samples(0.02, 100.0), 2);
        assert_eq!(seconds_to_samples(0.04, 100.0), 4);
        assert_eq!(seconds_to_samples(-1.0, 48000.0), 0);
        assert_eq!(seconds_to_samples(0.001, 48000.0), 48);
    }
}

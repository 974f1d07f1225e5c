//! Span helpers used on the render path.
//!
//! Every function works on the common prefix of its slices and never
//! allocates.

/// Fill `output` with a linear ramp starting one step after `start`.
///
/// Returns the last written value (or `start` for an empty span).
#[inline]
pub fn linear_ramp(output: &mut [f32], start: f32, step: f32) -> f32 {
    let mut value = start;
    for sample in output.iter_mut() {
        value += step;
        *sample = value;
    }
    value
}

/// Fill `output` with a multiplicative ramp starting one step after `start`.
///
/// Returns the last written value (or `start` for an empty span).
#[inline]
pub fn multiplicative_ramp(output: &mut [f32], start: f32, step: f32) -> f32 {
    let mut value = start;
    for sample in output.iter_mut() {
        value *= step;
        *sample = value;
    }
    value
}

/// Multiply `output` by a constant gain.
#[inline]
pub fn apply_gain(output: &mut [f32], gain: f32) {
    for sample in output.iter_mut() {
        *sample *= gain;
    }
}

/// Multiply `output` element-wise by `gain`.
#[inline]
pub fn apply_gain_span(output: &mut [f32], gain: &[f32]) {
    for (sample, g) in output.iter_mut().zip(gain) {
        *sample *= *g;
    }
}

/// Add `input` into `output`.
#[inline]
pub fn add(output: &mut [f32], input: &[f32]) {
    for (out, sample) in output.iter_mut().zip(input) {
        *out += *sample;
    }
}

/// Add `input * gain` into `output`.
#[inline]
pub fn multiply_add(output: &mut [f32], input: &[f32], gain: &[f32]) {
    for ((out, sample), g) in output.iter_mut().zip(input).zip(gain) {
        *out += *sample * *g;
    }
}

/// Mean of the squared samples. Zero for an empty span.
#[inline]
pub fn mean_squared(input: &[f32]) -> f32 {
    if input.is_empty() {
        return 0.0;
    }
    let sum: f32 = input.iter().map(|s| s * s).sum();
    sum / input.len() as f32
}

/// Cumulative sum: `output[i] = start + input[0] + ... + input[i]`.
///
/// Returns the final sum.
#[inline]
pub fn cumsum(input: &[f32], output: &mut [f32], start: f32) -> f32 {
    let mut acc = start;
    for (out, sample) in output.iter_mut().zip(input) {
        acc += *sample;
        *out = acc;
    }
    acc
}

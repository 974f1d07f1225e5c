//! Voice stealing policies.
//!
//! When a polyphony scope is full, one of its non-released voices is picked
//! and released together with its sisters. [`StealingAlgorithm`] selects how:
//!
//! - `First`: the first candidate in scope order.
//! - `Oldest`: the earliest started candidate.
//! - `EnvelopeAndAge`: among the older half of the candidates, the oldest
//!   whose sister ring is quieter than half the scope's average power;
//!   falls back to the oldest.

pub use muestra_config::StealingAlgorithm;

use crate::sister::SisterRings;
use crate::voice::Voice;

/// Fraction of the mean power under which a ring may be stolen.
pub const ENVELOPE_COEFF: f32 = 0.5;
/// Fraction of the oldest age a candidate must reach to be considered.
pub const AGE_COEFF: f32 = 0.5;

/// Return a voice to release if `scope` holds at least `limit`
/// non-released voices.
///
/// `scratch` must have capacity for the scope; it is overwritten.
pub fn check_polyphony(
    algorithm: StealingAlgorithm,
    scope: &[usize],
    limit: usize,
    voices: &[Voice],
    rings: &SisterRings,
    scratch: &mut Vec<usize>,
) -> Option<usize> {
    scratch.clear();
    scratch.extend(
        scope
            .iter()
            .copied()
            .filter(|&v| !voices[v].released_or_free()),
    );
    if scratch.len() < limit {
        return None;
    }
    steal(algorithm, scratch, voices, rings)
}

/// Pick a voice among `candidates`. The slice may be reordered.
pub fn steal(
    algorithm: StealingAlgorithm,
    candidates: &mut [usize],
    voices: &[Voice],
    rings: &SisterRings,
) -> Option<usize> {
    match algorithm {
        StealingAlgorithm::First => candidates.first().copied(),
        StealingAlgorithm::Oldest => oldest(candidates, voices),
        StealingAlgorithm::EnvelopeAndAge => envelope_and_age(candidates, voices, rings),
    }
}

fn oldest(candidates: &[usize], voices: &[Voice]) -> Option<usize> {
    candidates
        .iter()
        .copied()
        .min_by_key(|&v| voices[v].sequence())
}

fn envelope_and_age(
    candidates: &mut [usize],
    voices: &[Voice],
    rings: &SisterRings,
) -> Option<usize> {
    if candidates.is_empty() {
        return None;
    }

    // Oldest first
    candidates.sort_unstable_by_key(|&v| voices[v].sequence());

    let mean_power = candidates
        .iter()
        .map(|&v| voices[v].mean_squared_average())
        .sum::<f32>()
        / candidates.len() as f32;
    let power_threshold = mean_power * ENVELOPE_COEFF;
    let age_threshold = voices[candidates[0]].age() as f32 * AGE_COEFF;

    let mut idx = 0;
    while idx < candidates.len() {
        let reference = candidates[idx];
        if (voices[reference].age() as f32) < age_threshold {
            break;
        }

        let ring_power = rings
            .members(reference)
            .map(|v| voices[v].mean_squared_average())
            .fold(0.0f32, f32::max);
        if ring_power < power_threshold {
            return Some(reference);
        }

        idx += 1;
        while idx < candidates.len() && rings.are_sisters(reference, candidates[idx]) {
            idx += 1;
        }
    }

    Some(candidates[0])
}

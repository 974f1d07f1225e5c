//! Property-based tests for muestra-core playback primitives.
//!
//! Covers kernel bounds, envelope monotonicity during release and
//! block/per-sample agreement using proptest for randomized inputs.

use proptest::prelude::*;
use muestra_core::{
    AdsrEnvelope, AdsrParams, LinearSmoother, looping_index, saturating_index,
};

fn envelope_params() -> impl Strategy<Value = AdsrParams> {
    (
        0i32..64,
        0i32..64,
        0i32..32,
        0i32..64,
        0i32..128,
        0.0f32..=1.0,
        0.0f32..=1.0,
        0.05f32..=1.0,
    )
        .prop_map(
            |(delay, attack, hold, decay, release, start, sustain, depth)| AdsrParams {
                delay,
                attack,
                hold,
                decay,
                release,
                start,
                sustain,
                depth,
            },
        )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    /// With positive increments and an integral ceiling, saturating indices
    /// never decrease and always leave room for the second interpolation tap.
    #[test]
    fn saturating_indices_stay_in_bounds(
        frames in 2usize..512,
        jumps in prop::collection::vec(0.01f32..4.0, 1..256),
    ) {
        let ceiling = (frames - 1) as f32;
        let n = jumps.len();
        let mut indices = vec![0usize; n];
        let mut left = vec![0.0f32; n];
        let mut right = vec![0.0f32; n];
        let end = saturating_index(&jumps, &mut indices, &mut left, &mut right, 0.0, ceiling);

        prop_assert!(end <= ceiling);
        for i in 0..n {
            prop_assert!(indices[i] + 1 < frames, "index {} for {} frames", indices[i], frames);
            prop_assert!((0.0..=1.0).contains(&right[i]));
            prop_assert!((left[i] + right[i] - 1.0).abs() < 1e-6);
            if i > 0 {
                prop_assert!(indices[i] >= indices[i - 1]);
            }
        }
    }

    /// Looping indices stay inside the loop once playback is inside it.
    #[test]
    fn looping_indices_stay_in_loop(
        loop_start in 0u32..100,
        span in 1u32..200,
        offset in 0.0f32..1.0,
        jumps in prop::collection::vec(0.0f32..8.0, 1..256),
    ) {
        let loop_start = loop_start as f32;
        let loop_end = loop_start + span as f32;
        let position = loop_start + offset * (span as f32 - 0.01);
        let n = jumps.len();
        let mut indices = vec![0usize; n];
        let mut left = vec![0.0f32; n];
        let mut right = vec![0.0f32; n];
        let end = looping_index(&jumps, &mut indices, &mut left, &mut right, position, loop_start, loop_end);

        prop_assert!(end >= loop_start && end < loop_end);
        for &index in &indices {
            prop_assert!(index as f32 >= loop_start);
            prop_assert!((index as f32) < loop_end);
        }
    }

    /// Once the release takes effect the envelope never rises, and it
    /// always stays within `[0, depth]`.
    #[test]
    fn envelope_release_never_rises(
        params in envelope_params(),
        release_at in 1i32..256,
    ) {
        let mut env = AdsrEnvelope::new();
        env.reset(params);
        env.start_release(release_at);

        let mut block = vec![0.0f32; 512];
        env.get_block(&mut block);

        for &value in &block {
            prop_assert!(value >= 0.0);
            prop_assert!(value <= params.depth + 1e-5, "value {} above depth {}", value, params.depth);
        }
        let from = (release_at - 1) as usize;
        for pair in block[from..].windows(2) {
            prop_assert!(pair[1] <= pair[0], "release rose from {} to {}", pair[0], pair[1]);
        }
    }

    /// Block generation matches per-sample generation for any block split.
    #[test]
    fn envelope_block_matches_per_sample(
        params in envelope_params(),
        release_at in 0i32..200,
        split in 1usize..64,
    ) {
        let mut blocked = AdsrEnvelope::new();
        blocked.reset(params);
        blocked.start_release(release_at);
        let mut single = blocked.clone();

        let mut out = vec![0.0f32; 320];
        for chunk in out.chunks_mut(split) {
            blocked.get_block(chunk);
        }
        for &value in &out {
            prop_assert_eq!(value, single.next_value());
        }
    }

    /// A linear smoother lands exactly on its target after the transition.
    #[test]
    fn smoother_reaches_target(
        start in -10.0f32..10.0,
        target in -10.0f32..10.0,
        time_ms in 0.0f32..50.0,
    ) {
        let mut smoother = LinearSmoother::with_config(start, 48000.0, time_ms);
        smoother.set_target(target);
        let samples = (time_ms / 1000.0 * 48000.0) as usize + 1;
        for _ in 0..samples {
            smoother.advance();
        }
        prop_assert!(smoother.is_settled());
        prop_assert!((smoother.get() - target).abs() < 1e-5 || (start - target).abs() < 1e-9);
    }
}

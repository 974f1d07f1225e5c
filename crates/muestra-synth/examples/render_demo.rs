//! Render demo: play a chord on a sine region and write it to a WAV file.
//!
//! Run with: cargo run -p muestra-synth --example render_demo [output.wav]
//!
//! Set `RUST_LOG=debug` to see engine events.

use muestra_config::EngineConfig;
use muestra_core::AudioBuffer;
use muestra_io::{WavSpec, write_wav};
use muestra_synth::{EgDescription, Region, Synth};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let output = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "render_demo.wav".to_string());

    let config = EngineConfig {
        sample_rate: 48000.0,
        samples_per_block: 512,
        num_voices: 8,
        ..EngineConfig::default()
    };
    let sample_rate = config.sample_rate;
    let block = config.samples_per_block;
    let mut synth = Synth::new(config)?;

    synth.add_region(
        Region::new("*sine")
            .with_volume(-12.0)
            .with_amplitude_eg(EgDescription {
                attack: 0.02,
                decay: 0.3,
                sustain: 60.0,
                release: 0.8,
                ..EgDescription::default()
            }),
    )?;

    let total = (3.0 * sample_rate) as usize;
    let release_at = (1.5 * sample_rate) as usize;
    let mut left = vec![0.0; total];
    let mut right = vec![0.0; total];

    // C major, spread over the first block
    for (i, note) in [60u8, 64, 67, 72].into_iter().enumerate() {
        synth.note_on((i * 64) as i32, 1, note, 90);
    }

    let mut position = 0;
    while position < total {
        let end = (position + block).min(total);
        if (position..end).contains(&release_at) {
            let delay = (release_at - position) as i32;
            for note in [60u8, 64, 67, 72] {
                synth.note_off(delay, 1, note, 0);
            }
        }
        synth.render_block(&mut left[position..end], &mut right[position..end]);
        if position % (block * 16) == 0 {
            tracing::info!(
                seconds = position as f32 / sample_rate,
                active = synth.num_active_voices(),
                "rendering"
            );
        }
        position = end;
    }

    let peak = left
        .iter()
        .chain(right.iter())
        .fold(0.0f32, |peak, s| peak.max(s.abs()));

    let buffer = AudioBuffer::from_channels(vec![left, right]);
    let spec = WavSpec {
        channels: 2,
        sample_rate: sample_rate as u32,
        ..WavSpec::default()
    };
    write_wav(&output, &buffer, spec)?;

    println!("Wrote {output} ({:.1} s, peak {peak:.3})", total as f32 / sample_rate);
    Ok(())
}

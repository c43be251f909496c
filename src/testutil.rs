//! Shared test fixtures: a scripted stand-in for Piper and WAV generators.

use std::path::{Path, PathBuf};

use crate::config::SynthesisConfig;

/// Build a synthesis config that runs `body` under `/bin/sh` with `$model`
/// and `$out` parsed from the Piper-style flags.
///
/// The script is passed to `sh` as an argument rather than executed
/// directly, which avoids ETXTBSY when tests spawn in parallel.
pub fn fake_synthesis(dir: &Path, body: &str) -> SynthesisConfig {
    let script = dir.join(format!("fake-piper-{}.sh", uuid::Uuid::new_v4()));
    let source = format!(
        r#"model=""
out=""
while [ $# -gt 0 ]; do
  case "$1" in
    --model) model="$2"; shift 2 ;;
    --output_file) out="$2"; shift 2 ;;
    *) shift ;;
  esac
done
{body}
"#
    );
    std::fs::write(&script, source).unwrap();

    SynthesisConfig {
        binary: PathBuf::from("/bin/sh"),
        model: dir.join("voice.onnx"),
        extra_args: vec![script.display().to_string()],
        timeout_secs: 10,
    }
}

/// A fake synthesizer that swallows stdin and copies `fixture` to the output.
pub fn copying_synthesis(dir: &Path, fixture: &Path) -> SynthesisConfig {
    fake_synthesis(
        dir,
        &format!(r#"cat > /dev/null; cp "{}" "$out""#, fixture.display()),
    )
}

pub fn mono16(sample_rate: u32) -> hound::WavSpec {
    hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    }
}

pub fn sine(freq: f32, sample_rate: u32, frames: usize, amplitude: f32) -> Vec<f32> {
    (0..frames)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            amplitude * (2.0 * std::f32::consts::PI * freq * t).sin()
        })
        .collect()
}

/// Write an interleaved sine WAV in the given format.
pub fn write_sine_wav(path: &Path, spec: hound::WavSpec, freq: f32, frames: usize) {
    let samples = sine(freq, spec.sample_rate, frames, 0.5);
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for &s in &samples {
        for _ in 0..spec.channels {
            match spec.sample_format {
                hound::SampleFormat::Float => writer.write_sample(s).unwrap(),
                hound::SampleFormat::Int => {
                    let max = (1i64 << (spec.bits_per_sample - 1)) as f32 - 1.0;
                    writer.write_sample((s * max) as i32).unwrap()
                }
            }
        }
    }
    writer.finalize().unwrap();
}

/// Count sign changes, a cheap frequency estimate for pure tones.
pub fn zero_crossings(samples: &[f32]) -> usize {
    samples
        .windows(2)
        .filter(|w| (w[0] < 0.0) != (w[1] < 0.0))
        .count()
}

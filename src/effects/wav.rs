//! WAV decoding to per-channel `f32` buffers and encoding back to the
//! original sample format.
//!
//! A pass decodes the whole file into memory. Synthesized utterances are
//! seconds long, so a few megabytes at most; the resampler and the pitch
//! shifter still walk each buffer in fixed-size blocks.

use std::path::{Path, PathBuf};

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use crate::error::{Result, SpeakError};

/// Decoded audio: format descriptor plus one buffer per channel.
#[derive(Debug, Clone)]
pub struct Audio {
    pub spec: WavSpec,
    pub channels: Vec<Vec<f32>>,
}

impl Audio {
    pub fn frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }
}

/// Open `path` and decode every sample to `f32` in [-1, 1].
pub fn read(path: &Path) -> Result<Audio> {
    let reader = WavReader::open(path)?;
    let spec = reader.spec();
    check_spec(&spec)?;

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<_, _>>()?,
        SampleFormat::Int => {
            let scale = int_scale(spec.bits_per_sample);
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()?
        }
    };

    let n_channels = usize::from(spec.channels);
    let mut channels = vec![Vec::with_capacity(interleaved.len() / n_channels); n_channels];
    for frame in interleaved.chunks_exact(n_channels) {
        for (channel, &sample) in channels.iter_mut().zip(frame) {
            channel.push(sample);
        }
    }

    Ok(Audio { spec, channels })
}

/// Encode `audio` in its own format and atomically replace `path`.
pub fn write(path: &Path, audio: &Audio) -> Result<()> {
    check_spec(&audio.spec)?;
    if audio.channels.len() != usize::from(audio.spec.channels) {
        return Err(SpeakError::Processing(format!(
            "{} channel buffers for a {}-channel format",
            audio.channels.len(),
            audio.spec.channels
        )));
    }

    let partial = partial_path(path);
    let result = write_samples(&partial, audio)
        .and_then(|()| std::fs::rename(&partial, path).map_err(SpeakError::from));
    if result.is_err() {
        let _ = std::fs::remove_file(&partial);
    }
    result
}

fn write_samples(path: &Path, audio: &Audio) -> Result<()> {
    let spec = audio.spec;
    let mut writer = WavWriter::create(path, spec)?;
    let frames = audio.frames();

    match spec.sample_format {
        SampleFormat::Float => {
            for i in 0..frames {
                for channel in &audio.channels {
                    writer.write_sample(channel[i])?;
                }
            }
        }
        SampleFormat::Int => {
            let scale = int_scale(spec.bits_per_sample);
            let (min, max) = (-scale, scale - 1.0);
            for i in 0..frames {
                for channel in &audio.channels {
                    let v = (channel[i] * scale).round().clamp(min, max);
                    writer.write_sample(v as i32)?;
                }
            }
        }
    }

    writer.finalize()?;
    Ok(())
}

/// Formats hound can round-trip through `i32`/`f32`.
fn check_spec(spec: &WavSpec) -> Result<()> {
    if spec.channels == 0 {
        return Err(SpeakError::UnsupportedFormat("zero channels".into()));
    }
    match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Int, 8 | 16 | 24 | 32) | (SampleFormat::Float, 32) => Ok(()),
        (format, bits) => Err(SpeakError::UnsupportedFormat(format!(
            "{bits}-bit {format:?} samples"
        ))),
    }
}

fn int_scale(bits: u16) -> f32 {
    (1u64 << (bits - 1)) as f32
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    path.with_file_name(name)
}

//! Post-processing of synthesized WAV files.
//!
//! Each enabled pass reads the file, transforms every channel and rewrites
//! it in its original format. Passes run in a fixed order: rate
//! transposition first, then pitch shift followed by gain.

pub mod pitch;
pub mod rate;
pub mod wav;

use std::path::Path;
use std::time::Instant;

use tracing::debug;

use crate::config::EffectsConfig;
use crate::error::Result;

use self::pitch::PitchShifter;
use self::rate::RateTransposer;

pub struct PostProcessor {
    config: EffectsConfig,
}

impl PostProcessor {
    pub fn new(config: EffectsConfig) -> Self {
        Self { config }
    }

    pub fn rate_enabled(&self) -> bool {
        self.config.rate.enabled
    }

    pub fn pitch_enabled(&self) -> bool {
        self.config.pitch.enabled
    }

    pub fn is_enabled(&self) -> bool {
        self.rate_enabled() || self.pitch_enabled()
    }

    /// Run every enabled pass over `path`. Blocking; call from
    /// `spawn_blocking` on the request path.
    pub fn process_file(&self, path: &Path) -> Result<()> {
        if self.rate_enabled() {
            self.transpose_rate(path)?;
        }
        if self.pitch_enabled() {
            self.shift_pitch(path)?;
        }
        Ok(())
    }

    fn transpose_rate(&self, path: &Path) -> Result<()> {
        let t0 = Instant::now();
        let mut audio = wav::read(path)?;
        let rate = &self.config.rate;

        audio.channels =
            RateTransposer::new(rate.speed_factor, rate.chunk_size).process(&audio.channels)?;
        wav::write(path, &audio)?;

        debug!(
            "Rate pass on {} took {:.0}ms",
            path.display(),
            t0.elapsed().as_secs_f64() * 1000.0
        );
        Ok(())
    }

    fn shift_pitch(&self, path: &Path) -> Result<()> {
        let t0 = Instant::now();
        let mut audio = wav::read(path)?;
        let pitch = &self.config.pitch;

        let mut shifter = PitchShifter::new(
            pitch.pitch_factor,
            audio.spec.sample_rate,
            pitch.frame_size,
            pitch.overlap,
        );
        for channel in &mut audio.channels {
            let mut shifted = shifter.process(channel)?;
            apply_gain(&mut shifted, pitch.gain);
            *channel = shifted;
        }
        wav::write(path, &audio)?;

        debug!(
            "Pitch pass on {} took {:.0}ms",
            path.display(),
            t0.elapsed().as_secs_f64() * 1000.0
        );
        Ok(())
    }
}

/// Scale by `gain` and hard-clip to [-1, 1].
pub fn apply_gain(samples: &mut [f32], gain: f32) {
    for s in samples {
        *s = (*s * gain).clamp(-1.0, 1.0);
    }
}

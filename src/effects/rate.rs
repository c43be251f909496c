//! Rate transposition: resample by a speed factor and keep the original
//! sample rate, so tempo and pitch move together.

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use tracing::debug;

use crate::error::{Result, SpeakError};

pub struct RateTransposer {
    factor: f64,
    chunk_size: usize,
}

impl RateTransposer {
    /// `factor` is output length / input length.
    pub fn new(factor: f64, chunk_size: usize) -> Self {
        Self { factor, chunk_size }
    }

    /// Resample all channels together. Output length is
    /// `round(input_len * factor)`.
    pub fn process(&self, channels: &[Vec<f32>]) -> Result<Vec<Vec<f32>>> {
        let frames = channels.first().map_or(0, Vec::len);
        if frames == 0 || (self.factor - 1.0).abs() < 1e-9 {
            return Ok(channels.to_vec());
        }

        let params = SincInterpolationParameters {
            sinc_len: 256,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 256,
            window: WindowFunction::BlackmanHarris2,
        };
        let mut resampler =
            SincFixedIn::<f32>::new(self.factor, 1.0, params, self.chunk_size, channels.len())
                .map_err(|e| SpeakError::Processing(format!("resampler init failed: {e}")))?;

        let delay = resampler.output_delay();
        let expected = (frames as f64 * self.factor).round() as usize;
        let mut output: Vec<Vec<f32>> =
            vec![Vec::with_capacity(expected + delay + self.chunk_size); channels.len()];

        let mut pos = 0;
        while frames - pos >= resampler.input_frames_next() {
            let end = pos + resampler.input_frames_next();
            let chunk: Vec<&[f32]> = channels.iter().map(|c| &c[pos..end]).collect();
            let out = resampler
                .process(&chunk[..], None)
                .map_err(|e| SpeakError::Processing(format!("resampling failed: {e}")))?;
            append(&mut output, out);
            pos = end;
        }

        if pos < frames {
            let tail: Vec<&[f32]> = channels.iter().map(|c| &c[pos..]).collect();
            let out = resampler
                .process_partial(Some(&tail[..]), None)
                .map_err(|e| SpeakError::Processing(format!("resampling failed: {e}")))?;
            append(&mut output, out);
        }

        // Flush the filter until the delayed tail has come out.
        while output[0].len() < delay + expected {
            let out = resampler
                .process_partial(None::<&[Vec<f32>]>, None)
                .map_err(|e| SpeakError::Processing(format!("resampling failed: {e}")))?;
            if out[0].is_empty() {
                break;
            }
            append(&mut output, out);
        }

        for channel in &mut output {
            channel.drain(..delay.min(channel.len()));
            channel.resize(expected, 0.0);
        }

        debug!(
            "Rate transposed {frames} → {expected} frames (factor {:.3})",
            self.factor
        );
        Ok(output)
    }
}

fn append(output: &mut [Vec<f32>], chunk: Vec<Vec<f32>>) {
    for (dst, src) in output.iter_mut().zip(chunk) {
        dst.extend_from_slice(&src);
    }
}

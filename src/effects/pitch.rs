//! Phase-vocoder pitch shifter.
//!
//! Each analysis frame is windowed, transformed, and its bins re-mapped to
//! `bin * factor` with their true frequencies scaled by the same factor.
//! Phases are re-accumulated per bin and frames are overlap-added, so the
//! duration is unchanged while the pitch moves.

use std::f64::consts::PI;
use std::sync::Arc;

use realfft::num_complex::Complex;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};

use crate::error::{Result, SpeakError};

pub struct PitchShifter {
    factor: f64,
    sample_rate: f64,
    frame_size: usize,
    hop: usize,
    window: Vec<f32>,
    forward: Arc<dyn RealToComplex<f32>>,
    inverse: Arc<dyn ComplexToReal<f32>>,
    last_phase: Vec<f64>,
    sum_phase: Vec<f64>,
}

impl PitchShifter {
    /// `overlap` must leave a hop that divides `frame_size` (validated in config).
    pub fn new(factor: f64, sample_rate: u32, frame_size: usize, overlap: usize) -> Self {
        let hop = frame_size - overlap;
        // Periodic Hann: its square overlap-adds to a constant for >= 3 frames per hop.
        let window = (0..frame_size)
            .map(|i| {
                let x = 2.0 * std::f32::consts::PI * i as f32 / frame_size as f32;
                0.5 * (1.0 - x.cos())
            })
            .collect();

        let mut planner = RealFftPlanner::<f32>::new();
        let bins = frame_size / 2 + 1;

        Self {
            factor,
            sample_rate: f64::from(sample_rate),
            frame_size,
            hop,
            window,
            forward: planner.plan_fft_forward(frame_size),
            inverse: planner.plan_fft_inverse(frame_size),
            last_phase: vec![0.0; bins],
            sum_phase: vec![0.0; bins],
        }
    }

    /// Shift one channel. The output has exactly `input.len()` samples.
    pub fn process(&mut self, input: &[f32]) -> Result<Vec<f32>> {
        self.last_phase.iter_mut().for_each(|p| *p = 0.0);
        self.sum_phase.iter_mut().for_each(|p| *p = 0.0);

        if input.is_empty() || (self.factor - 1.0).abs() < 1e-9 {
            return Ok(input.to_vec());
        }

        let n = self.frame_size;
        // Pad a full frame on both sides so every real sample is covered by
        // the same number of frames.
        let mut padded = vec![0.0f32; input.len() + 2 * n];
        padded[n..n + input.len()].copy_from_slice(input);
        let mut accum = vec![0.0f32; padded.len()];

        let osamp = (n / self.hop) as f32;
        let scale = 8.0 / (3.0 * n as f32 * osamp);

        let mut frame = vec![0.0f32; n];
        let mut spectrum = self.forward.make_output_vec();
        let mut shifted = self.inverse.make_input_vec();

        let mut start = 0;
        while start + n <= padded.len() {
            for (dst, (&x, &w)) in frame
                .iter_mut()
                .zip(padded[start..start + n].iter().zip(&self.window))
            {
                *dst = x * w;
            }

            self.forward
                .process(&mut frame, &mut spectrum)
                .map_err(|e| SpeakError::Processing(format!("forward FFT failed: {e}")))?;
            self.shift_spectrum(&spectrum, &mut shifted);
            self.inverse
                .process(&mut shifted, &mut frame)
                .map_err(|e| SpeakError::Processing(format!("inverse FFT failed: {e}")))?;

            for (acc, (&y, &w)) in accum[start..start + n]
                .iter_mut()
                .zip(frame.iter().zip(&self.window))
            {
                *acc += y * w * scale;
            }

            start += self.hop;
        }

        Ok(accum[n..n + input.len()].to_vec())
    }

    /// Analysis → bin remap → synthesis for one frame.
    fn shift_spectrum(&mut self, spectrum: &[Complex<f32>], out: &mut [Complex<f32>]) {
        let n = self.frame_size as f64;
        let bins = spectrum.len();
        let osamp = n / self.hop as f64;
        let freq_per_bin = self.sample_rate / n;
        let expected_advance = 2.0 * PI * self.hop as f64 / n;

        let mut magnitudes = vec![0.0f64; bins];
        let mut frequencies = vec![0.0f64; bins];

        for (k, bin) in spectrum.iter().enumerate() {
            let magnitude = f64::from(bin.norm());
            let phase = f64::from(bin.im).atan2(f64::from(bin.re));

            let mut delta = phase - self.last_phase[k] - k as f64 * expected_advance;
            self.last_phase[k] = phase;
            delta = wrap_phase(delta);

            // Deviation from the bin centre, in bins.
            let deviation = osamp * delta / (2.0 * PI);
            let true_freq = (k as f64 + deviation) * freq_per_bin;

            let target = (k as f64 * self.factor) as usize;
            if target < bins {
                magnitudes[target] += magnitude;
                frequencies[target] = true_freq * self.factor;
            }
        }

        for k in 0..bins {
            let deviation = frequencies[k] / freq_per_bin - k as f64;
            let advance = 2.0 * PI * deviation / osamp + k as f64 * expected_advance;
            self.sum_phase[k] = (self.sum_phase[k] + advance).rem_euclid(2.0 * PI);

            let phase = self.sum_phase[k];
            out[k] = Complex::new(
                (magnitudes[k] * phase.cos()) as f32,
                (magnitudes[k] * phase.sin()) as f32,
            );
        }

        // DC and Nyquist must be real for the inverse real transform.
        out[0].im = 0.0;
        out[bins - 1].im = 0.0;
    }
}

/// Map a phase difference into (-π, π].
fn wrap_phase(phase: f64) -> f64 {
    let wrapped = (phase + PI).rem_euclid(2.0 * PI) - PI;
    if wrapped == -PI {
        PI
    } else {
        wrapped
    }
}

//! Audio level estimation.

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

/// Gain applied to the mean spectral magnitude before clamping to `0..=100`.
///
/// A sine at amplitude `a` spreads to a mean first-half magnitude of roughly
/// `a`, so ordinary speech (peaks around 0.1 to 0.3) lands mid-scale.
const LEVEL_GAIN: f32 = 200.0;

/// Short-window frequency-energy meter.
pub struct AudioLevelMeter {
    window: usize,
    fft: Arc<dyn Fft<f32>>,
    buffer: Vec<Complex<f32>>,
}

impl AudioLevelMeter {
    /// Create a meter over `window` samples (at least 2).
    #[must_use]
    pub fn new(window: usize) -> Self {
        let window = window.max(2);
        let fft = FftPlanner::new().plan_fft_forward(window);
        Self {
            window,
            fft,
            buffer: vec![Complex::new(0.0, 0.0); window],
        }
    }

    #[must_use]
    pub fn window(&self) -> usize {
        self.window
    }

    /// Level of a chunk in `0..=100`.
    ///
    /// Uses the most recent `window` samples; shorter chunks are zero-padded.
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn level(&mut self, samples: &[f32]) -> u8 {
        let tail_start = samples.len().saturating_sub(self.window);
        let tail = samples.get(tail_start..).unwrap_or_default();

        for (slot, sample) in self
            .buffer
            .iter_mut()
            .zip(tail.iter().copied().chain(std::iter::repeat(0.0)))
        {
            let sample = if sample.is_finite() { sample } else { 0.0 };
            *slot = Complex::new(sample, 0.0);
        }

        self.fft.process(&mut self.buffer);

        let half = self.window / 2;
        let magnitude_sum: f32 = self.buffer.iter().take(half).map(|c| c.norm()).sum();
        // half >= 1 because window >= 2
        let mean = magnitude_sum / half as f32;

        (mean * LEVEL_GAIN).clamp(0.0, 100.0).round() as u8
    }
}

//! # Pitch Detection Module
//!
//! This module estimates the fundamental frequency of a mono analysis window.
//! The primary estimator is a normalized autocorrelation, computed through
//! the power spectrum so its cost grows as `n log n` with the window length.
//!
//! ## Features
//! - Autocorrelation of the whole window via RustFFT (Wiener-Khinchin)
//! - Peak search starting after the zero-lag lobe to avoid the trivial peak
//! - Parabolic interpolation for sub-sample accuracy
//! - Periods shorter than the maximum frequency allows are rejected, never
//!   folded onto a longer lag
//! - Selectable FFT-based alternative (see [`crate::fft`])

use std::fmt;

use rustfft::{FftPlanner, num_complex::Complex};

use crate::config::{DEFAULT_CLARITY_THRESHOLD, DetectorKind};
use crate::fft::SummaryDetector;

/// Detects the fundamental frequency of `window` with the default clarity
/// threshold.
///
/// # Arguments
/// * `window` - Mono samples, oldest first
/// * `sample_rate` - Sample rate in Hz
/// * `max_frequency_hz` - Highest frequency that may be reported
///
/// # Returns
/// * Frequency in Hz, or 0.0 when no confident pitch was found
pub fn detect(window: &[f32], sample_rate: u32, max_frequency_hz: f32) -> f32 {
    AutocorrelationDetector::new(DEFAULT_CLARITY_THRESHOLD).detect(window, sample_rate, max_frequency_hz)
}

/// The estimator run by an analysis cycle.
#[derive(Debug)]
pub enum Detector {
    Autocorrelation(AutocorrelationDetector),
    EnhancedSummary(SummaryDetector),
}

impl Detector {
    pub fn new(kind: DetectorKind, clarity_threshold: f32) -> Self {
        match kind {
            DetectorKind::Autocorrelation => {
                Detector::Autocorrelation(AutocorrelationDetector::new(clarity_threshold))
            }
            DetectorKind::EnhancedSummary => {
                Detector::EnhancedSummary(SummaryDetector::new(clarity_threshold))
            }
        }
    }

    pub fn detect(&mut self, window: &[f32], sample_rate: u32, max_frequency_hz: f32) -> f32 {
        match self {
            Detector::Autocorrelation(detector) => detector.detect(window, sample_rate, max_frequency_hz),
            Detector::EnhancedSummary(detector) => detector.detect(window, sample_rate, max_frequency_hz),
        }
    }
}

/// Normalized autocorrelation pitch detector.
///
/// The correlation at lag `τ` is `Σ x[i]·x[i+τ] / Σ x[i]²` over the DC-free
/// window. This biased normalization decays with lag, so for a periodic
/// signal the strongest peak is the one at the fundamental period rather than
/// at one of its multiples.
///
/// The window is zero-padded to at least twice its length before the
/// transform, so the circular correlation equals the linear one for every
/// lag. Working buffers and FFT plans are kept between calls.
pub struct AutocorrelationDetector {
    clarity_threshold: f64,
    planner: FftPlanner<f64>,
    spectrum: Vec<Complex<f64>>,
    acf: Vec<f64>,
}

impl fmt::Debug for AutocorrelationDetector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AutocorrelationDetector")
            .field("clarity_threshold", &self.clarity_threshold)
            .finish_non_exhaustive()
    }
}

impl AutocorrelationDetector {
    /// Creates a detector that rejects peaks whose normalized correlation is
    /// below `clarity_threshold`.
    pub fn new(clarity_threshold: f32) -> Self {
        Self {
            clarity_threshold: clarity_threshold as f64,
            planner: FftPlanner::new(),
            spectrum: Vec::new(),
            acf: Vec::new(),
        }
    }

    /// Estimates the fundamental frequency of `window`.
    ///
    /// The strongest peak past the zero-lag lobe wins. When its period is
    /// shorter than `sample_rate / max_frequency_hz` the result is 0, so a
    /// tone above the limit is never reported as a lower octave. The longest
    /// candidate lag is two samples short of the window, and a peak must
    /// keep at least `clarity_threshold` of the energy, which puts the
    /// lowest detectable frequency near `sample_rate / ((1 - clarity) * n)`.
    ///
    /// # Returns
    /// * Frequency in Hz, or 0.0 when no peak clears the clarity threshold
    pub fn detect(&mut self, window: &[f32], sample_rate: u32, max_frequency_hz: f32) -> f32 {
        let n = window.len();
        if n < 4 || sample_rate == 0 || !(max_frequency_hz > 0.0) {
            return 0.0;
        }

        let mean = window.iter().map(|&s| s as f64).sum::<f64>() / n as f64;
        let energy: f64 = window.iter().map(|&s| (s as f64 - mean).powi(2)).sum();
        if energy <= f64::MIN_POSITIVE {
            return 0.0;
        }

        let size = (2 * n).next_power_of_two();
        self.spectrum.clear();
        self.spectrum
            .extend(window.iter().map(|&s| Complex { re: s as f64 - mean, im: 0.0 }));
        self.spectrum.resize(size, Complex { re: 0.0, im: 0.0 });

        self.planner.plan_fft_forward(size).process(&mut self.spectrum);
        for bin in self.spectrum.iter_mut() {
            *bin = Complex {
                re: bin.norm_sqr(),
                im: 0.0,
            };
        }
        self.planner.plan_fft_inverse(size).process(&mut self.spectrum);

        // The unnormalized inverse scales every lag by `size`; dividing by
        // lag 0 removes that along with the energy.
        let zero_lag = self.spectrum[0].re;
        if !(zero_lag > 0.0) {
            return 0.0;
        }
        self.acf.clear();
        self.acf.extend(self.spectrum[..n].iter().map(|c| c.re / zero_lag));
        let acf = &self.acf;

        // The lobe around lag 0 falls monotonically until its first trough,
        // so either a zero crossing or a rising step means it is behind us.
        let Some(lobe_end) = (1..n).find(|&lag| acf[lag] <= 0.0 || acf[lag] > acf[lag - 1]) else {
            return 0.0;
        };

        let threshold = self.clarity_threshold;
        let mut best: Option<(usize, f64)> = None;
        for lag in lobe_end..n - 1 {
            let y = acf[lag];
            if y >= threshold
                && y > acf[lag - 1]
                && y >= acf[lag + 1]
                && best.is_none_or(|(_, value)| y > value)
            {
                best = Some((lag, y));
            }
        }

        let Some((lag, _)) = best else {
            return 0.0;
        };
        let offset = parabolic_offset(acf[lag - 1], acf[lag], acf[lag + 1]);
        let frequency = sample_rate as f64 / (lag as f64 + offset);

        if frequency.is_finite() && frequency > 0.0 && frequency <= max_frequency_hz as f64 {
            frequency as f32
        } else {
            0.0
        }
    }
}

/// Offset of the vertex of the parabola through three equally spaced points,
/// relative to the middle one, clamped to half a sample.
pub(crate) fn parabolic_offset(y1: f64, y2: f64, y3: f64) -> f64 {
    let denominator = y1 - 2.0 * y2 + y3;
    if denominator.abs() < 1e-12 {
        return 0.0;
    }
    (0.5 * (y1 - y3) / denominator).clamp(-0.5, 0.5)
}

//! # Enhanced Summary Autocorrelation
//!
//! FFT-based alternative to the time-domain detector. Each analysis frame is
//! windowed, its power spectrum compressed and transformed back into a
//! generalized autocorrelation. Frames are summed into one summary function,
//! which is then pruned of the repeated peaks at multiples of the period.
//!
//! ## Features
//! - RustFFT plans cached by the planner across cycles
//! - DC offset removal and Hann windowing per frame
//! - Cube-root spectral compression for sharper peaks
//! - Peak pruning by subtracting the time-stretched function

use std::fmt;

use rustfft::{FftPlanner, num_complex::Complex};

use crate::pitch::parabolic_offset;

/// Smallest frame the detector will transform.
pub const MIN_FRAME_SIZE: usize = 256;

/// Frames summed per detection, newest last.
const MAX_FRAMES: usize = 4;

/// Removes the DC offset from a signal by making its average value zero.
///
/// # Arguments
/// * `signal` - Audio signal to process (modified in-place)
pub(crate) fn remove_dc_offset(signal: &mut [f32]) {
    let len = signal.len();
    if len == 0 {
        return;
    }
    let avg = signal.iter().sum::<f32>() / len as f32;
    if avg.abs() > 1e-6 {
        for sample in signal.iter_mut() {
            *sample -= avg;
        }
    }
}

/// Applies a Hann window to the input buffer to reduce spectral leakage.
///
/// # Arguments
/// * `buffer` - Audio buffer to window (modified in-place)
pub(crate) fn apply_hann_window(buffer: &mut [f32]) {
    let n = buffer.len();
    if n < 2 {
        return;
    }
    let n_minus_1 = (n - 1) as f32;
    for (i, sample) in buffer.iter_mut().enumerate() {
        let multiplier = 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / n_minus_1).cos());
        *sample *= multiplier;
    }
}

/// Frame size for a sample rate: the power of two closest (in log scale) to
/// 50 ms of audio, never below [`MIN_FRAME_SIZE`].
///
/// # Returns
/// * 2048 at 44.1 kHz and 48 kHz, 4096 at 96 kHz
pub fn frame_size(sample_rate: u32) -> usize {
    if sample_rate == 0 {
        return MIN_FRAME_SIZE;
    }
    let exponent = ((sample_rate as f64 / 20.0).log2() + 0.5).floor();
    (2f64.powf(exponent) as usize).max(MIN_FRAME_SIZE)
}

/// Summary autocorrelation pitch detector.
pub struct SummaryDetector {
    clarity_threshold: f32,
    planner: FftPlanner<f32>,
    frame: Vec<f32>,
    spectrum: Vec<Complex<f32>>,
    summary: Vec<f32>,
    clipped: Vec<f32>,
}

impl fmt::Debug for SummaryDetector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SummaryDetector")
            .field("clarity_threshold", &self.clarity_threshold)
            .finish_non_exhaustive()
    }
}

impl SummaryDetector {
    /// Creates a detector that rejects peaks weaker than `clarity_threshold`
    /// times the zero-lag value.
    pub fn new(clarity_threshold: f32) -> Self {
        Self {
            clarity_threshold,
            planner: FftPlanner::new(),
            frame: Vec::new(),
            spectrum: Vec::new(),
            summary: Vec::new(),
            clipped: Vec::new(),
        }
    }

    /// Estimates the fundamental frequency of `window`.
    ///
    /// Windows shorter than one frame at the sample rate are analyzed with
    /// the largest power-of-two frame that fits; below [`MIN_FRAME_SIZE`]
    /// samples nothing is detected.
    ///
    /// # Returns
    /// * Frequency in Hz, or 0.0 when no pitch was found
    pub fn detect(&mut self, window: &[f32], sample_rate: u32, max_frequency_hz: f32) -> f32 {
        if sample_rate == 0 || !(max_frequency_hz > 0.0) || window.len() < MIN_FRAME_SIZE {
            return 0.0;
        }
        let mut size = frame_size(sample_rate);
        while size > window.len() {
            size /= 2;
        }
        let half = size / 2;
        let frames = (window.len() / size).min(MAX_FRAMES);
        let start = window.len() - frames * size;

        let fft = self.planner.plan_fft_forward(size);
        self.summary.clear();
        self.summary.resize(half, 0.0);

        for chunk in window[start..].chunks_exact(size) {
            self.frame.clear();
            self.frame.extend_from_slice(chunk);
            remove_dc_offset(&mut self.frame);
            apply_hann_window(&mut self.frame);

            self.spectrum.clear();
            self.spectrum
                .extend(self.frame.iter().map(|&sample| Complex { re: sample, im: 0.0 }));
            fft.process(&mut self.spectrum);

            // Power spectrum compressed to the cube root
            for bin in self.spectrum.iter_mut() {
                *bin = Complex {
                    re: bin.norm_sqr().cbrt(),
                    im: 0.0,
                };
            }
            fft.process(&mut self.spectrum);

            for (acc, bin) in self.summary.iter_mut().zip(&self.spectrum) {
                *acc += bin.re;
            }
        }

        let zero_lag = self.summary[0];
        if !(zero_lag > 0.0) {
            return 0.0;
        }
        prune_multiples(&mut self.summary, &mut self.clipped);

        let Some(lag) = strongest_peak(&self.summary) else {
            return 0.0;
        };
        if self.summary[lag] < self.clarity_threshold * zero_lag {
            return 0.0;
        }

        let s = &self.summary;
        let offset = parabolic_offset(s[lag - 1] as f64, s[lag] as f64, s[lag + 1] as f64);
        let frequency = sample_rate as f64 / (lag as f64 + offset);
        // A period shorter than the limit allows is rejected, not traded for
        // a peak further out.
        if frequency.is_finite() && frequency > 0.0 && frequency <= max_frequency_hz as f64 {
            frequency as f32
        } else {
            0.0
        }
    }
}

/// Clips negative values, subtracts the function stretched by two in time
/// and clips again. What survives is the peak at the period itself; the
/// peaks at its multiples cancel against the stretched copy.
fn prune_multiples(summary: &mut [f32], clipped: &mut Vec<f32>) {
    clipped.clear();
    clipped.extend(summary.iter().map(|&v| v.max(0.0)));
    for (i, value) in summary.iter_mut().enumerate() {
        *value = (clipped[i] - clipped[i / 2]).max(0.0);
    }
}

/// Index of the largest local maximum past the first zero of the pruned
/// function, so the zero-lag lobe is skipped.
fn strongest_peak(values: &[f32]) -> Option<usize> {
    if values.len() < 3 {
        return None;
    }
    let first_zero = values.iter().skip(1).position(|&v| v <= 0.0)? + 1;

    let mut best: Option<(usize, f32)> = None;
    for i in first_zero..values.len() - 1 {
        let v = values[i];
        if v > 0.0 && v > values[i - 1] && v >= values[i + 1] && best.is_none_or(|(_, b)| v > b) {
            best = Some((i, v));
        }
    }
    best.map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_CLARITY_THRESHOLD;

    fn sine(freq: f32, amplitude: f32, sample_rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| {
                amplitude * (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin()
            })
            .collect()
    }

    #[test]
    fn frame_size_tracks_sample_rate() {
        assert_eq!(frame_size(44_100), 2048);
        assert_eq!(frame_size(48_000), 2048);
        assert_eq!(frame_size(96_000), 4096);
        assert_eq!(frame_size(8_000), 512);
        assert_eq!(frame_size(1_000), MIN_FRAME_SIZE);
    }

    #[test]
    fn detects_a440() {
        let mut detector = SummaryDetector::new(DEFAULT_CLARITY_THRESHOLD);
        let window = sine(440.0, 0.5, 48_000, 9_600);
        let freq = detector.detect(&window, 48_000, 1000.0);
        assert!((freq - 440.0).abs() <= 440.0 * 0.02, "got {freq} Hz");
    }

    #[test]
    fn detects_a3_at_44k() {
        let mut detector = SummaryDetector::new(DEFAULT_CLARITY_THRESHOLD);
        let window = sine(220.0, 0.5, 44_100, 8_820);
        let freq = detector.detect(&window, 44_100, 1000.0);
        assert!((freq - 220.0).abs() <= 220.0 * 0.02, "got {freq} Hz");
    }

    #[test]
    fn tones_near_the_limit_are_exact_or_zero() {
        let mut detector = SummaryDetector::new(DEFAULT_CLARITY_THRESHOLD);
        for sample_rate in [44_100, 48_000] {
            for below in [1.0, 5.0, 10.0] {
                let expected = 1000.0 - below;
                let window = sine(expected, 0.5, sample_rate, sample_rate as usize / 5);
                let freq = detector.detect(&window, sample_rate, 1000.0);
                assert!(
                    freq == 0.0 || (freq - expected).abs() <= expected * 0.01,
                    "{expected} Hz at {sample_rate} Hz read as {freq} Hz"
                );
            }
            // 995 Hz sits far enough below the limit to always be found.
            let window = sine(995.0, 0.5, sample_rate, sample_rate as usize / 5);
            assert!(detector.detect(&window, sample_rate, 1000.0) > 0.0);
        }
    }

    #[test]
    fn tone_above_the_limit_is_not_folded_down() {
        let mut detector = SummaryDetector::new(DEFAULT_CLARITY_THRESHOLD);
        for freq in [1010.0, 1500.0] {
            let window = sine(freq, 0.5, 48_000, 9_600);
            assert_eq!(detector.detect(&window, 48_000, 1000.0), 0.0, "{freq} Hz");
        }
    }

    #[test]
    fn silence_and_short_windows_yield_zero() {
        let mut detector = SummaryDetector::new(DEFAULT_CLARITY_THRESHOLD);
        assert_eq!(detector.detect(&vec![0.0; 9_600], 48_000, 1000.0), 0.0);
        assert_eq!(detector.detect(&sine(440.0, 0.5, 48_000, 100), 48_000, 1000.0), 0.0);
    }

    #[test]
    fn pruning_removes_period_multiples() {
        let mut summary = vec![4.0, 2.0, -1.0, 3.0, 1.0, 0.5, 2.5, 0.0];
        let mut scratch = Vec::new();
        prune_multiples(&mut summary, &mut scratch);
        assert_eq!(summary, vec![0.0, 0.0, 0.0, 1.0, 1.0, 0.5, 0.0, 0.0]);
    }

    #[test]
    fn dc_removal_and_window() {
        let mut signal = vec![1.0f32, 2.0, 3.0, 4.0];
        remove_dc_offset(&mut signal);
        assert!((signal.iter().sum::<f32>()).abs() < 1e-6);

        let mut ones = vec![1.0f32; 5];
        apply_hann_window(&mut ones);
        assert!(ones[0].abs() < 1e-6 && ones[4].abs() < 1e-6);
        assert!((ones[2] - 1.0).abs() < 1e-6);
    }
}

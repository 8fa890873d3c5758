//! # Pass Filter Module
//!
//! Cascaded biquad low/high-pass filters. The analysis cycle low-passes each
//! window at the configured maximum frequency so harmonics above the range of
//! interest don't pull the autocorrelation peak.
//!
//! ## Features
//! - Butterworth responses of 2, 4, 6 or 8 poles (one biquad section per pole pair)
//! - Coefficients computed once per filter, state reset per window

use std::f64::consts::PI;

/// The kind of pass filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassType {
    LowPass,
    HighPass,
}

/// Number of poles; each pole pair is one biquad section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Poles {
    Two = 1,
    Four = 2,
    Six = 3,
    Eight = 4,
}

impl Poles {
    fn sections(self) -> usize {
        self as usize
    }
}

/// Per-section bandwidths (Q) giving a Butterworth response for each pole count.
const POLE_BANDWIDTHS: [&[f64]; 4] = [
    &[0.7071],
    &[0.60492333, 1.33722126],
    &[0.58338080, 0.75932572, 1.95302407],
    &[0.57622191, 0.66045510, 0.94276399, 2.57900101],
];

/// A single second-order section in direct form I.
#[derive(Debug, Clone)]
struct Biquad {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
    x1: f64,
    x2: f64,
    y1: f64,
    y2: f64,
}

impl Biquad {
    fn new(pass: PassType, cutoff_hz: f64, sample_rate: f64, bandwidth: f64) -> Self {
        let w0 = 2.0 * PI * cutoff_hz / sample_rate;
        let cos_w0 = w0.cos();
        let alpha = w0.sin() / (2.0 * bandwidth);

        let (b0, b1, b2) = match pass {
            PassType::LowPass => ((1.0 - cos_w0) / 2.0, 1.0 - cos_w0, (1.0 - cos_w0) / 2.0),
            PassType::HighPass => ((1.0 + cos_w0) / 2.0, -(1.0 + cos_w0), (1.0 + cos_w0) / 2.0),
        };
        let a0 = 1.0 + alpha;
        let a1 = -2.0 * cos_w0;
        let a2 = 1.0 - alpha;

        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
            x1: 0.0,
            x2: 0.0,
            y1: 0.0,
            y2: 0.0,
        }
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let x = input as f64;
        let y = self.b0 * x + self.b1 * self.x1 + self.b2 * self.x2 - self.a1 * self.y1 - self.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = x;
        self.y2 = self.y1;
        self.y1 = y;
        y as f32
    }

    fn reset(&mut self) {
        self.x1 = 0.0;
        self.x2 = 0.0;
        self.y1 = 0.0;
        self.y2 = 0.0;
    }
}

/// A cascade of biquad sections forming one Butterworth pass filter.
#[derive(Debug, Clone)]
pub struct PassFilter {
    sections: Vec<Biquad>,
}

impl PassFilter {
    /// Builds a filter, or `None` when the cutoff is not strictly between
    /// 0 Hz and the Nyquist frequency.
    pub fn new(pass: PassType, poles: Poles, cutoff_hz: f32, sample_rate: u32) -> Option<Self> {
        let nyquist = sample_rate as f32 / 2.0;
        if !(cutoff_hz > 0.0 && cutoff_hz < nyquist) {
            return None;
        }
        let sections = POLE_BANDWIDTHS[poles.sections() - 1]
            .iter()
            .map(|&bandwidth| Biquad::new(pass, cutoff_hz as f64, sample_rate as f64, bandwidth))
            .collect();
        Some(Self { sections })
    }

    /// Eight-pole low-pass at `cutoff_hz`.
    pub fn low_pass(cutoff_hz: f32, sample_rate: u32) -> Option<Self> {
        Self::new(PassType::LowPass, Poles::Eight, cutoff_hz, sample_rate)
    }

    /// Filters `samples` in place, one section after another, starting every
    /// section from rest.
    pub fn apply(&mut self, samples: &mut [f32]) {
        for section in &mut self.sections {
            section.reset();
            for sample in samples.iter_mut() {
                *sample = section.process(*sample);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::rms;

    fn sine(freq: f32, sample_rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin())
            .collect()
    }

    /// RMS of the second half, after the filter has settled.
    fn settled_rms(samples: &[f32]) -> f32 {
        rms(&samples[samples.len() / 2..])
    }

    #[test]
    fn low_pass_keeps_passband() {
        let mut filter = PassFilter::low_pass(1000.0, 48_000).unwrap();
        let mut signal = sine(220.0, 48_000, 9_600);
        let before = settled_rms(&signal);
        filter.apply(&mut signal);
        let after = settled_rms(&signal);
        // The high-Q section adds a few percent of ripple below the cutoff.
        assert!((after / before - 1.0).abs() < 0.06, "ratio {}", after / before);
    }

    #[test]
    fn low_pass_attenuates_stopband() {
        let mut filter = PassFilter::low_pass(1000.0, 48_000).unwrap();
        let mut signal = sine(4000.0, 48_000, 9_600);
        filter.apply(&mut signal);
        // Two octaves above an 8-pole cutoff is roughly -96 dB.
        assert!(settled_rms(&signal) < 1e-3);
    }

    #[test]
    fn high_pass_attenuates_low_frequencies() {
        let mut filter = PassFilter::new(PassType::HighPass, Poles::Four, 2000.0, 48_000).unwrap();
        let mut signal = sine(100.0, 48_000, 9_600);
        filter.apply(&mut signal);
        assert!(settled_rms(&signal) < 1e-3);
    }

    #[test]
    fn rejects_cutoff_outside_audible_band() {
        assert!(PassFilter::low_pass(0.0, 48_000).is_none());
        assert!(PassFilter::low_pass(24_000.0, 48_000).is_none());
        assert!(PassFilter::low_pass(30_000.0, 48_000).is_none());
        assert!(PassFilter::low_pass(1000.0, 48_000).is_some());
    }

    #[test]
    fn apply_is_repeatable() {
        let mut filter = PassFilter::low_pass(800.0, 44_100).unwrap();
        let source = sine(300.0, 44_100, 2_048);
        let mut first = source.clone();
        let mut second = source.clone();
        filter.apply(&mut first);
        filter.apply(&mut second);
        assert_eq!(first, second);
    }
}

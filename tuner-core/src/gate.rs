//! Amplitude gating and decibel conversions.
//!
//! The gate keeps the detector from running on silence or background hiss,
//! which is what lets consumers read 0 Hz as "no signal".

/// Decibel value reported for zero (or vanishingly small) amplitude.
pub const MIN_DECIBELS: f64 = -160.0;

/// Root-mean-square amplitude of a window. Empty windows have zero RMS.
pub fn rms(window: &[f32]) -> f32 {
    if window.is_empty() {
        return 0.0;
    }
    let sum: f64 = window.iter().map(|&s| s as f64 * s as f64).sum();
    (sum / window.len() as f64).sqrt() as f32
}

/// Returns true when the window is loud enough to analyze.
pub fn passes(window: &[f32], min_amplitude: f32) -> bool {
    !window.is_empty() && rms(window) >= min_amplitude
}

/// Linear amplitude (0-1) for a decibel value.
pub fn amplitude_from_db(db: f64) -> f64 {
    10f64.powf(db / 10.0).sqrt()
}

/// Decibel value (-160 to 0) for a linear amplitude.
pub fn db_from_amplitude(amplitude: f64) -> f64 {
    let power = amplitude * amplitude;
    if power <= 0.0 {
        return MIN_DECIBELS;
    }
    (10.0 * power.log10()).max(MIN_DECIBELS)
}

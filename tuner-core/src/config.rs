//! # Engine Configuration
//!
//! Parameters supplied to the engine by its collaborators: the analysis
//! parameters (`EngineConfig`), which are frozen while the engine runs, and
//! the capture parameters (`CaptureParams`), which are supplied at start time.
//!
//! Both types derive serde so the settings layer can persist them as-is.

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Default analysis window length in seconds.
pub const DEFAULT_WINDOW_SECONDS: f32 = 0.2;

/// Default amplitude floor (-40 dB).
pub const DEFAULT_MIN_AMPLITUDE: f32 = 0.01;

/// Default upper bound for detected frequencies in Hz.
pub const DEFAULT_MAX_FREQUENCY_HZ: f32 = 1000.0;

/// Default minimum normalized correlation a peak needs to count as a pitch.
pub const DEFAULT_CLARITY_THRESHOLD: f32 = 0.4;

/// Default time between two analysis cycles.
pub const DEFAULT_ANALYSIS_INTERVAL_MS: u64 = 50;

/// Longest window the engine accepts. Keeps the ring allocation bounded.
pub const MAX_WINDOW_SECONDS: f32 = 2.0;

/// Which estimator the analysis cycle runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    /// Time-domain normalized autocorrelation over the allowed lag range.
    #[default]
    Autocorrelation,
    /// FFT-based enhanced summary autocorrelation with peak pruning.
    EnhancedSummary,
}

/// Analysis parameters. Immutable while the engine is running.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Length of the analysis window in seconds.
    pub window_seconds: f32,
    /// Linear RMS amplitude (0-1) below which the window counts as silence.
    pub min_amplitude: f32,
    /// Frequencies above this are never reported.
    pub max_frequency_hz: f32,
    /// Minimum normalized correlation for a peak to be accepted (0-1].
    pub clarity_threshold: f32,
    /// Period of the internal analysis cycle in milliseconds.
    pub analysis_interval_ms: u64,
    pub detector: DetectorKind,
    /// Low-pass the window at `max_frequency_hz` before detection.
    pub low_pass: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            window_seconds: DEFAULT_WINDOW_SECONDS,
            min_amplitude: DEFAULT_MIN_AMPLITUDE,
            max_frequency_hz: DEFAULT_MAX_FREQUENCY_HZ,
            clarity_threshold: DEFAULT_CLARITY_THRESHOLD,
            analysis_interval_ms: DEFAULT_ANALYSIS_INTERVAL_MS,
            detector: DetectorKind::default(),
            low_pass: true,
        }
    }
}

impl EngineConfig {
    /// Creates a validated configuration from the three core parameters,
    /// leaving every other knob at its default.
    pub fn new(window_seconds: f32, min_amplitude: f32, max_frequency_hz: f32) -> Result<Self> {
        Self::default().with_parameters(window_seconds, min_amplitude, max_frequency_hz)
    }

    /// Returns a copy with the three core parameters replaced, validated.
    pub fn with_parameters(
        &self,
        window_seconds: f32,
        min_amplitude: f32,
        max_frequency_hz: f32,
    ) -> Result<Self> {
        let config = Self {
            window_seconds,
            min_amplitude,
            max_frequency_hz,
            ..self.clone()
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks every field against its allowed range.
    pub fn validate(&self) -> Result<()> {
        if !self.window_seconds.is_finite() || self.window_seconds <= 0.0 {
            return Err(EngineError::InvalidConfig(format!(
                "window length must be positive, got {} s",
                self.window_seconds
            )));
        }
        if self.window_seconds > MAX_WINDOW_SECONDS {
            return Err(EngineError::InvalidConfig(format!(
                "window length {} s exceeds the {} s limit",
                self.window_seconds, MAX_WINDOW_SECONDS
            )));
        }
        if !self.min_amplitude.is_finite() || !(0.0..=1.0).contains(&self.min_amplitude) {
            return Err(EngineError::InvalidConfig(format!(
                "minimum amplitude must be within 0-1, got {}",
                self.min_amplitude
            )));
        }
        if !self.max_frequency_hz.is_finite() || self.max_frequency_hz <= 0.0 {
            return Err(EngineError::InvalidConfig(format!(
                "maximum frequency must be positive, got {} Hz",
                self.max_frequency_hz
            )));
        }
        if !(self.clarity_threshold > 0.0 && self.clarity_threshold <= 1.0) {
            return Err(EngineError::InvalidConfig(format!(
                "clarity threshold must be within (0, 1], got {}",
                self.clarity_threshold
            )));
        }
        if self.analysis_interval_ms == 0 {
            return Err(EngineError::InvalidConfig(
                "analysis interval must be at least 1 ms".to_string(),
            ));
        }
        Ok(())
    }

    pub fn analysis_interval(&self) -> Duration {
        Duration::from_millis(self.analysis_interval_ms)
    }

    /// Number of samples the ring buffer holds at the given sample rate.
    pub fn window_len(&self, sample_rate: u32) -> usize {
        window_len(self.window_seconds, sample_rate)
    }
}

/// Converts a window duration into a whole number of samples (at least one).
pub fn window_len(window_seconds: f32, sample_rate: u32) -> usize {
    ((window_seconds as f64 * sample_rate as f64).round() as usize).max(1)
}

/// Identifies the input device to open.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceId {
    /// The host's default input device.
    #[default]
    Default,
    /// Position in the host's input device list.
    Index(usize),
    /// Exact device name as reported by the host.
    Name(String),
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceId::Default => write!(f, "default input"),
            DeviceId::Index(index) => write!(f, "input #{index}"),
            DeviceId::Name(name) => write!(f, "\"{name}\""),
        }
    }
}

impl From<usize> for DeviceId {
    fn from(index: usize) -> Self {
        DeviceId::Index(index)
    }
}

impl FromStr for DeviceId {
    type Err = std::convert::Infallible;

    /// `""`/`"default"` select the default device, digits an index, anything else a name.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("default") {
            Ok(DeviceId::Default)
        } else if let Ok(index) = trimmed.parse::<usize>() {
            Ok(DeviceId::Index(index))
        } else {
            Ok(DeviceId::Name(trimmed.to_string()))
        }
    }
}

/// Capture parameters supplied at start time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureParams {
    pub device: DeviceId,
    pub channels: u16,
    pub sample_rate: u32,
}

impl CaptureParams {
    pub fn new(device: DeviceId, channels: u16, sample_rate: u32) -> Self {
        Self {
            device,
            channels,
            sample_rate,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.channels == 0 {
            return Err(EngineError::InvalidConfig(
                "channel count must be at least 1".to_string(),
            ));
        }
        if self.sample_rate == 0 {
            return Err(EngineError::InvalidConfig(
                "sample rate must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// The format a backend actually delivers after negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

//! # Settings Persistence
//!
//! User-facing tuner settings, stored as pretty-printed JSON. Every field has
//! a default, so older or hand-written files only need the keys they change.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use tuner_core::config::{DEFAULT_MAX_FREQUENCY_HZ, DEFAULT_WINDOW_SECONDS};
use tuner_core::gate::amplitude_from_db;
use tuner_core::tuning::DEFAULT_A4;
use tuner_core::{DetectorKind, DeviceId, EngineConfig};

/// Sample rate requested when the settings do not name one.
pub const DEFAULT_SAMPLE_RATE: u32 = 48_000;

/// Quietest input (in dB) that is still analyzed.
pub const DEFAULT_MIN_INPUT_VOLUME_DB: f64 = -40.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunerSettings {
    /// Input below this level (dB, -160 to 0) reads as silence.
    pub min_input_volume_db: f64,
    /// Highest frequency the engine reports, in Hz.
    pub max_input_frequency: f32,
    /// Frequency of A4 in Hz.
    pub tuning_standard: f64,
    /// Analysis window length in seconds.
    pub buffer_seconds: f32,
    /// Device name or index; `None` means the system default input.
    pub input_device: Option<String>,
    pub sample_rate: u32,
    pub detector: DetectorKind,
}

impl Default for TunerSettings {
    fn default() -> Self {
        Self {
            min_input_volume_db: DEFAULT_MIN_INPUT_VOLUME_DB,
            max_input_frequency: DEFAULT_MAX_FREQUENCY_HZ,
            tuning_standard: DEFAULT_A4,
            buffer_seconds: DEFAULT_WINDOW_SECONDS,
            input_device: None,
            sample_rate: DEFAULT_SAMPLE_RATE,
            detector: DetectorKind::default(),
        }
    }
}

impl TunerSettings {
    /// Converts the settings into a validated engine configuration.
    pub fn engine_config(&self) -> Result<EngineConfig> {
        let min_amplitude = amplitude_from_db(self.min_input_volume_db) as f32;
        let base = EngineConfig {
            detector: self.detector,
            ..EngineConfig::default()
        };
        let config = base
            .with_parameters(self.buffer_seconds, min_amplitude, self.max_input_frequency)
            .context("invalid tuner settings")?;
        Ok(config)
    }

    pub fn device(&self) -> DeviceId {
        self.input_device
            .as_deref()
            .and_then(|device| device.parse().ok())
            .unwrap_or_default()
    }
}

/// Saves the settings to a JSON file.
///
/// # Arguments
/// * `settings` - The settings to save
/// * `path` - File path where the settings should be saved (e.g., "tuner.json")
pub fn save_settings(settings: &TunerSettings, path: &Path) -> Result<()> {
    let json_string = serde_json::to_string_pretty(settings)?;
    let mut file =
        File::create(path).with_context(|| format!("cannot create {}", path.display()))?;
    file.write_all(json_string.as_bytes())?;
    Ok(())
}

/// Loads settings from a JSON file.
///
/// # Returns
/// * `Ok(TunerSettings)` - Successfully loaded settings
/// * `Err(e)` - File I/O error or JSON deserialization error
pub fn load_settings(path: &Path) -> Result<TunerSettings> {
    let mut file = File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
    let mut data = String::new();
    file.read_to_string(&mut data)?;
    let settings: TunerSettings = serde_json::from_str(&data)
        .with_context(|| format!("malformed settings in {}", path.display()))?;
    Ok(settings)
}

/// Like [`load_settings`], but a missing file yields the defaults.
pub fn load_or_default(path: &Path) -> Result<TunerSettings> {
    if !path.exists() {
        log::info!("[SETTINGS] {} not found, using defaults", path.display());
        return Ok(TunerSettings::default());
    }
    load_settings(path)
}

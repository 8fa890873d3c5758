use clap::Parser;
use std::path::PathBuf;

use crate::settings::TunerSettings;

/// command-line interface for the pitch tuner
#[derive(Parser, Debug, Clone)]
#[command(name = "tuner")]
#[command(about = "real-time pitch detection from a microphone")]
pub struct Cli {
    /// list available input devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// input device name or index (use --list-devices to see options)
    #[arg(short, long)]
    pub device: Option<String>,

    /// preferred sample rate in Hz; the nearest supported rate is used
    #[arg(short = 'r', long)]
    pub sample_rate: Option<u32>,

    /// channels to capture, averaged down to mono
    #[arg(short, long, default_value_t = 1)]
    pub channels: u16,

    /// settings file (JSON); a missing file means defaults
    #[arg(short, long, value_name = "PATH")]
    pub settings: Option<PathBuf>,

    /// tuning standard: frequency of A4 in Hz
    #[arg(long, value_name = "HZ")]
    pub a4: Option<f64>,

    /// analyze a synthetic sine at this frequency instead of a microphone
    #[arg(long, value_name = "HZ")]
    pub simulate: Option<f32>,

    /// stop after this many seconds (default: run until ctrl+c)
    #[arg(long, value_name = "SECS")]
    pub duration: Option<f64>,

    /// write the effective settings to this file on exit
    #[arg(long, value_name = "PATH")]
    pub save_settings: Option<PathBuf>,
}

impl Cli {
    /// Overrides the loaded settings with whatever was given on the command line.
    pub fn apply_to(&self, settings: &mut TunerSettings) {
        if let Some(device) = &self.device {
            settings.input_device = Some(device.clone());
        }
        if let Some(rate) = self.sample_rate {
            settings.sample_rate = rate;
        }
        if let Some(a4) = self.a4 {
            settings.tuning_standard = a4;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tuner_core::DeviceId;

    #[test]
    fn defaults_without_arguments() {
        let cli = Cli::try_parse_from(["tuner"]).unwrap();
        assert!(!cli.list_devices);
        assert_eq!(cli.channels, 1);
        assert!(cli.simulate.is_none());

        let mut settings = TunerSettings::default();
        cli.apply_to(&mut settings);
        assert_eq!(settings, TunerSettings::default());
    }

    #[test]
    fn overrides_reach_settings() {
        let cli = Cli::try_parse_from([
            "tuner", "-d", "2", "-r", "44100", "--a4", "442", "--simulate", "220",
        ])
        .unwrap();
        let mut settings = TunerSettings::default();
        cli.apply_to(&mut settings);
        assert_eq!(settings.device(), DeviceId::Index(2));
        assert_eq!(settings.sample_rate, 44_100);
        assert_eq!(settings.tuning_standard, 442.0);
        assert_eq!(cli.simulate, Some(220.0));
    }

    #[test]
    fn rejects_bad_numbers() {
        assert!(Cli::try_parse_from(["tuner", "--channels", "many"]).is_err());
    }
}

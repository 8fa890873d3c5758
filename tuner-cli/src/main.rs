//! # Tuner - Command-Line Front End
//!
//! Runs the pitch detection engine against a microphone (or a synthetic
//! tone) and prints the nearest note with its deviation in cents.
//!
//! ## Architecture
//! - **Engine threads**: capture and analysis run inside `tuner-core`
//! - **Main thread**: polls the engine at 60 Hz and smooths readings for display
//! - **Shutdown**: Ctrl+C or `--duration` stops the engine and releases the device

mod cli;
mod settings;
mod smoothing;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;
use tuner_core::{CaptureParams, NoteReading, ToneBackend, TunerEngine, list_input_devices};

use crate::cli::Cli;
use crate::settings::TunerSettings;
use crate::smoothing::{ReadingSmoother, Smoothed};

/// Display refresh rate in Hz.
const POLL_RATE_HZ: f64 = 60.0;

/// Peak amplitude of the `--simulate` tone.
const SIMULATED_AMPLITUDE: f32 = 0.5;

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    if cli.list_devices {
        for device in list_input_devices()? {
            let marker = if device.is_default { " (default)" } else { "" };
            println!("{:>3}: {}{}", device.index, device.name, marker);
        }
        return Ok(());
    }

    let mut settings = match &cli.settings {
        Some(path) => settings::load_or_default(path)?,
        None => TunerSettings::default(),
    };
    cli.apply_to(&mut settings);

    let engine = match cli.simulate {
        Some(frequency) => {
            log::info!("[MAIN] Simulating a {} Hz tone", frequency);
            TunerEngine::with_backend(Arc::new(ToneBackend::sine(frequency, SIMULATED_AMPLITUDE)))
        }
        None => TunerEngine::new(),
    };
    engine.configure(settings.engine_config()?)?;

    let params = CaptureParams::new(settings.device(), cli.channels, settings.sample_rate);
    let format = engine
        .try_start(&params)
        .with_context(|| format!("could not start capturing from {}", params.device))?;
    log::info!(
        "[MAIN] Listening at {} Hz (A4 = {} Hz)",
        format.sample_rate,
        settings.tuning_standard
    );

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || running.store(false, Ordering::SeqCst))
            .context("failed to install the Ctrl+C handler")?;
    }

    let ticker = crossbeam_channel::tick(Duration::from_secs_f64(1.0 / POLL_RATE_HZ));
    let deadline = cli
        .duration
        .map(|secs| Instant::now() + Duration::from_secs_f64(secs.max(0.0)));
    let mut smoother = ReadingSmoother::new();
    let mut last_line = String::new();

    while running.load(Ordering::SeqCst) {
        let now = ticker.recv()?;
        if deadline.is_some_and(|deadline| now >= deadline) {
            break;
        }
        let line = render(smoother.update(engine.query_frequency(), now), settings.tuning_standard);
        if line != last_line {
            println!("{line}");
            last_line = line;
        }
    }

    engine.stop();
    log::info!("[MAIN] Ran {} analysis cycles", engine.analysis_cycles());

    if let Some(path) = &cli.save_settings {
        settings::save_settings(&settings, path)?;
        log::info!("[MAIN] Settings saved to {}", path.display());
    }
    Ok(())
}

/// One display line for a smoothed reading.
fn render(reading: Smoothed, a4: f64) -> String {
    let average = match reading {
        Smoothed::Pitch { average, .. } | Smoothed::Holding { average } => average,
        Smoothed::Silent => return "--".to_string(),
    };
    match NoteReading::from_frequency(average as f64, a4) {
        Some(note) => {
            let status = if note.in_tune() { "in tune" } else if note.cents > 0.0 { "sharp" } else { "flat" };
            format!(
                "{:<4} {:>8.2} Hz  {:>4} cents  {}",
                note.name,
                note.frequency,
                note.cents_label(),
                status
            )
        }
        None => "--".to_string(),
    }
}

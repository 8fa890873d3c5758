//! # Tuner Engine
//!
//! The controller consumers talk to. It owns the capture session, runs the
//! periodic analysis cycle on its own thread and publishes the latest
//! detected frequency through a lock-free cell.
//!
//! ## Features
//! - Idle/Running state machine; configuration only changes while idle
//! - Start failures leave the engine idle with nothing left open
//! - `query_frequency` never blocks, whatever the analysis cycle is doing
//! - Sample window snapshots for diagnostic consumers
//! - Stop on drop, releasing the input device

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Sender, bounded, select, tick};
use parking_lot::{Mutex, RwLock};

use crate::audio::{CaptureSession, CpalBackend, InputBackend};
use crate::buffer::{self, SampleWindow, SharedRing};
use crate::config::{CaptureParams, DeviceId, EngineConfig, StreamFormat};
use crate::error::{EngineError, Result};
use crate::filter::PassFilter;
use crate::gate;
use crate::pitch::Detector;

/// Single-writer, many-reader cell holding the latest frequency in Hz.
///
/// The value is stored as the bit pattern of an `f32`, so readers always see
/// a value some writer stored in full.
#[derive(Debug, Default)]
pub struct FrequencyCell(AtomicU32);

impl FrequencyCell {
    pub fn new(frequency: f32) -> Self {
        Self(AtomicU32::new(frequency.to_bits()))
    }

    #[inline]
    pub fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Acquire))
    }

    #[inline]
    pub fn store(&self, frequency: f32) {
        self.0.store(frequency.to_bits(), Ordering::Release);
    }
}

/// State that only changes under the control lock.
struct Control {
    config: Option<EngineConfig>,
    session: CaptureSession,
    worker: Option<AnalysisWorker>,
    format: Option<StreamFormat>,
}

/// Real-time pitch detection engine.
///
/// All methods take `&self`, so one engine can be shared between a control
/// thread and any number of polling threads (e.g. behind an `Arc`).
pub struct TunerEngine {
    control: Mutex<Control>,
    latest: Arc<FrequencyCell>,
    cycles: Arc<AtomicU64>,
    active: AtomicBool,
    window: RwLock<Option<SharedRing>>,
}

impl TunerEngine {
    /// Creates an idle engine capturing from real devices.
    pub fn new() -> Self {
        Self::with_backend(Arc::new(CpalBackend::new()))
    }

    /// Creates an idle engine capturing through `backend`.
    pub fn with_backend(backend: Arc<dyn InputBackend>) -> Self {
        Self {
            control: Mutex::new(Control {
                config: None,
                session: CaptureSession::new(backend),
                worker: None,
                format: None,
            }),
            latest: Arc::new(FrequencyCell::default()),
            cycles: Arc::new(AtomicU64::new(0)),
            active: AtomicBool::new(false),
            window: RwLock::new(None),
        }
    }

    /// Replaces the whole configuration.
    ///
    /// # Returns
    /// * `Ok(())` - The configuration will be used by the next start
    /// * `Err(AlreadyRunning)` - The engine is running; nothing changed
    /// * `Err(InvalidConfig)` - A value is out of range; nothing changed
    pub fn configure(&self, config: EngineConfig) -> Result<()> {
        let mut control = self.control.lock();
        if control.session.is_open() {
            return Err(EngineError::AlreadyRunning);
        }
        config.validate()?;
        control.config = Some(config);
        Ok(())
    }

    /// Sets the three core parameters, keeping the remaining settings of the
    /// current (or default) configuration.
    ///
    /// # Arguments
    /// * `window_seconds` - Length of the analysis window
    /// * `min_amplitude` - Linear RMS amplitude below which nothing is detected
    /// * `max_frequency_hz` - Highest frequency that may be reported
    ///
    /// # Returns
    /// * `true` if stored, `false` if running or a value is invalid
    pub fn set_parameters(&self, window_seconds: f32, min_amplitude: f32, max_frequency_hz: f32) -> bool {
        let mut control = self.control.lock();
        if control.session.is_open() {
            log::warn!("[ENGINE] Parameters cannot change while running");
            return false;
        }
        let base = control.config.clone().unwrap_or_default();
        match base.with_parameters(window_seconds, min_amplitude, max_frequency_hz) {
            Ok(config) => {
                log::debug!(
                    "[ENGINE] Parameters set: window {}s, min amplitude {}, max {} Hz",
                    window_seconds,
                    min_amplitude,
                    max_frequency_hz
                );
                control.config = Some(config);
                true
            }
            Err(e) => {
                log::warn!("[ENGINE] Rejected parameters: {}", e);
                false
            }
        }
    }

    /// Opens the input and starts the analysis cycle.
    ///
    /// The frequency cell is reset to 0 before the first cycle runs.
    ///
    /// # Returns
    /// * `Ok(format)` - The format actually being captured
    /// * `Err(e)` - Nothing was started and the engine is still idle
    pub fn try_start(&self, params: &CaptureParams) -> Result<StreamFormat> {
        let mut control = self.control.lock();
        if control.session.is_open() {
            return Err(EngineError::AlreadyRunning);
        }
        let config = control.config.clone().ok_or(EngineError::NotConfigured)?;

        let info = control.session.start(params, config.window_seconds)?;
        self.latest.store(0.0);
        self.cycles.store(0, Ordering::Release);

        let cycle = AnalysisCycle::new(
            &config,
            info.format.sample_rate,
            info.ring.clone(),
            self.latest.clone(),
            self.cycles.clone(),
        );
        let worker = match AnalysisWorker::spawn(cycle, config.analysis_interval()) {
            Ok(worker) => worker,
            Err(e) => {
                if let Err(stop_err) = control.session.stop() {
                    log::warn!("[ENGINE] Failed to release input after start error: {}", stop_err);
                }
                return Err(e);
            }
        };

        control.worker = Some(worker);
        control.format = Some(info.format);
        *self.window.write() = Some(info.ring);
        self.active.store(true, Ordering::Release);

        log::info!(
            "[ENGINE] Running: {} Hz, window {}s, analysis every {} ms",
            info.format.sample_rate,
            config.window_seconds,
            config.analysis_interval_ms
        );
        Ok(info.format)
    }

    /// Boolean form of [`TunerEngine::try_start`]; failures are logged.
    pub fn start(&self, device: DeviceId, channels: u16, sample_rate: u32) -> bool {
        match self.try_start(&CaptureParams::new(device, channels, sample_rate)) {
            Ok(_) => true,
            Err(e) => {
                log::error!("[ENGINE] Start failed: {}", e);
                false
            }
        }
    }

    /// Stops the analysis cycle and closes the input.
    ///
    /// Release errors are logged and do not keep the engine running.
    ///
    /// # Returns
    /// * `true` if the engine was running, `false` if it was already idle
    pub fn stop(&self) -> bool {
        let mut control = self.control.lock();
        let worker = control.worker.take();
        if worker.is_none() && !control.session.is_open() {
            return false;
        }

        if let Some(worker) = worker {
            if let Err(e) = worker.stop() {
                log::warn!("[ENGINE] Analysis worker did not stop cleanly: {}", e);
            }
        }
        if let Err(e) = control.session.stop() {
            log::warn!("[ENGINE] Input did not close cleanly: {}", e);
        }
        control.format = None;
        self.active.store(false, Ordering::Release);

        log::info!("[ENGINE] Stopped");
        true
    }

    /// Latest detected frequency in Hz, 0 when nothing was detected.
    ///
    /// While idle this is the last value published before stopping.
    #[inline]
    pub fn query_frequency(&self) -> f32 {
        self.latest.load()
    }

    /// Copy of the current sample window, oldest sample first.
    ///
    /// After a stop this is the window as it was when capture ended; before
    /// the first start it is empty.
    pub fn sample_buffer(&self) -> SampleWindow {
        match self.window.read().clone() {
            Some(ring) => buffer::snapshot(&ring),
            None => SampleWindow::default(),
        }
    }

    /// Copies the most recent samples into `out`, oldest first.
    ///
    /// # Returns
    /// * Number of samples written
    pub fn copy_sample_buffer(&self, out: &mut [f32]) -> usize {
        let ring = self.window.read().clone();
        match ring {
            Some(ring) => ring.lock().copy_latest(out),
            None => 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn config(&self) -> Option<EngineConfig> {
        self.control.lock().config.clone()
    }

    /// Format negotiated by the running capture, `None` while idle.
    pub fn stream_format(&self) -> Option<StreamFormat> {
        self.control.lock().format
    }

    /// Analysis cycles completed on a full window since the last start.
    pub fn analysis_cycles(&self) -> u64 {
        self.cycles.load(Ordering::Acquire)
    }
}

impl Default for TunerEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TunerEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Thread running [`AnalysisCycle`]s at a fixed interval.
struct AnalysisWorker {
    shutdown: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl AnalysisWorker {
    fn spawn(mut cycle: AnalysisCycle, interval: Duration) -> Result<Self> {
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let handle = thread::Builder::new()
            .name("tuner-analysis".to_string())
            .spawn(move || {
                let ticker = tick(interval);
                loop {
                    select! {
                        recv(ticker) -> _ => {
                            cycle.run();
                        }
                        recv(shutdown_rx) -> _ => break,
                    }
                }
                log::debug!("[ANALYSIS] Worker exiting");
            })
            .map_err(|e| EngineError::Thread(e.to_string()))?;

        Ok(Self {
            shutdown: shutdown_tx,
            handle: Some(handle),
        })
    }

    /// Signals the thread and waits for the cycle in progress to finish.
    fn stop(mut self) -> Result<()> {
        let _ = self.shutdown.send(());
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| EngineError::Thread("analysis thread panicked".to_string())),
            None => Ok(()),
        }
    }
}

/// One gate + filter + detect pass over the current window.
///
/// Everything except the ring and the published outputs is owned by the
/// cycle, so no working state is shared with other threads.
struct AnalysisCycle {
    ring: SharedRing,
    sample_rate: u32,
    min_amplitude: f32,
    max_frequency_hz: f32,
    filter: Option<PassFilter>,
    detector: Detector,
    scratch: Vec<f32>,
    latest: Arc<FrequencyCell>,
    cycles: Arc<AtomicU64>,
}

impl AnalysisCycle {
    fn new(
        config: &EngineConfig,
        sample_rate: u32,
        ring: SharedRing,
        latest: Arc<FrequencyCell>,
        cycles: Arc<AtomicU64>,
    ) -> Self {
        let filter = if config.low_pass {
            PassFilter::low_pass(config.max_frequency_hz, sample_rate)
        } else {
            None
        };
        let capacity = ring.lock().capacity();
        Self {
            ring,
            sample_rate,
            min_amplitude: config.min_amplitude,
            max_frequency_hz: config.max_frequency_hz,
            filter,
            detector: Detector::new(config.detector, config.clarity_threshold),
            scratch: Vec::with_capacity(capacity),
            latest,
            cycles,
        }
    }

    /// Runs one cycle and publishes its result.
    ///
    /// # Returns
    /// * `Some(frequency)` - The value published (0 for silence or no pitch)
    /// * `None` - The window has not filled yet; nothing was published
    fn run(&mut self) -> Option<f32> {
        {
            let ring = self.ring.lock();
            if !ring.is_filled() {
                return None;
            }
            ring.snapshot_into(&mut self.scratch);
        }

        let frequency = self.analyze();
        self.latest.store(frequency);
        self.cycles.fetch_add(1, Ordering::AcqRel);
        log::trace!("[ANALYSIS] {:.2} Hz", frequency);
        Some(frequency)
    }

    fn analyze(&mut self) -> f32 {
        if !gate::passes(&self.scratch, self.min_amplitude) {
            return 0.0;
        }
        if let Some(filter) = self.filter.as_mut() {
            filter.apply(&mut self.scratch);
        }
        self.detector
            .detect(&self.scratch, self.sample_rate, self.max_frequency_hz)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::SampleRing;
    use crate::config::DetectorKind;
    use crate::synthetic::ToneBackend;

    fn sine(freq: f32, amplitude: f32, sample_rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| {
                amplitude * (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin()
            })
            .collect()
    }

    fn cycle_over(config: &EngineConfig, samples: &[f32], capacity: usize) -> (AnalysisCycle, Arc<FrequencyCell>) {
        let ring = SampleRing::new(capacity, 48_000).shared();
        ring.lock().write(samples);
        let latest = Arc::new(FrequencyCell::new(-1.0));
        let cycle = AnalysisCycle::new(config, 48_000, ring, latest.clone(), Arc::new(AtomicU64::new(0)));
        (cycle, latest)
    }

    #[test]
    fn frequency_cell_round_trips_bits() {
        let cell = FrequencyCell::default();
        assert_eq!(cell.load(), 0.0);
        cell.store(440.25);
        assert_eq!(cell.load(), 440.25);
    }

    #[test]
    fn cycle_detects_tone() {
        let config = EngineConfig::default();
        let (mut cycle, latest) = cycle_over(&config, &sine(440.0, 0.5, 48_000, 9_600), 9_600);
        let freq = cycle.run().unwrap();
        assert!((freq - 440.0).abs() < 4.4, "got {freq} Hz");
        assert_eq!(latest.load(), freq);
        assert_eq!(cycle.cycles.load(Ordering::Acquire), 1);
    }

    #[test]
    fn cycle_detects_tone_with_summary_detector() {
        let config = EngineConfig {
            detector: DetectorKind::EnhancedSummary,
            ..EngineConfig::default()
        };
        let (mut cycle, _) = cycle_over(&config, &sine(440.0, 0.5, 48_000, 9_600), 9_600);
        let freq = cycle.run().unwrap();
        assert!((freq - 440.0).abs() < 8.8, "got {freq} Hz");
    }

    #[test]
    fn cycle_gates_silence_and_quiet_input() {
        let config = EngineConfig::default();
        let (mut silent, latest) = cycle_over(&config, &vec![0.0; 9_600], 9_600);
        assert_eq!(silent.run(), Some(0.0));
        assert_eq!(latest.load(), 0.0);

        // RMS of 0.005 is below the 0.01 floor
        let (mut quiet, _) = cycle_over(&config, &sine(440.0, 0.007, 48_000, 9_600), 9_600);
        assert_eq!(quiet.run(), Some(0.0));
    }

    #[test]
    fn cycle_waits_for_a_full_window() {
        let config = EngineConfig::default();
        let (mut cycle, latest) = cycle_over(&config, &sine(440.0, 0.5, 48_000, 4_000), 9_600);
        assert_eq!(cycle.run(), None);
        assert_eq!(latest.load(), -1.0);
        assert_eq!(cycle.cycles.load(Ordering::Acquire), 0);
    }

    #[test]
    fn parameters_only_change_while_idle() {
        let engine = TunerEngine::with_backend(Arc::new(ToneBackend::sine(440.0, 0.5)));
        assert!(engine.config().is_none());
        assert!(!engine.set_parameters(0.0, 0.01, 1000.0));
        assert!(engine.config().is_none());

        assert!(engine.set_parameters(0.1, 0.02, 800.0));
        let config = engine.config().unwrap();
        assert_eq!(config.window_seconds, 0.1);
        assert_eq!(config.max_frequency_hz, 800.0);

        assert!(engine.start(DeviceId::Default, 1, 48_000));
        assert!(!engine.set_parameters(0.5, 0.05, 500.0));
        assert_eq!(
            engine.configure(EngineConfig::default()),
            Err(EngineError::AlreadyRunning)
        );
        assert_eq!(engine.config().unwrap(), config);
        assert!(engine.stop());
    }

    #[test]
    fn start_requires_configuration() {
        let backend = Arc::new(ToneBackend::sine(440.0, 0.5));
        let engine = TunerEngine::with_backend(backend.clone());
        assert_eq!(
            engine.try_start(&CaptureParams::new(DeviceId::Default, 1, 48_000)),
            Err(EngineError::NotConfigured)
        );
        assert!(!engine.is_active());
        assert_eq!(backend.open_count(), 0);
    }

    #[test]
    fn failed_start_stays_idle() {
        let engine = TunerEngine::with_backend(Arc::new(ToneBackend::denied()));
        engine.configure(EngineConfig::default()).unwrap();
        assert!(matches!(
            engine.try_start(&CaptureParams::new(DeviceId::Default, 1, 48_000)),
            Err(EngineError::PermissionDenied(_))
        ));
        assert!(!engine.is_active());
        assert!(engine.stream_format().is_none());
        assert!(!engine.stop());
        // Configuration can still change after a failed start
        assert!(engine.set_parameters(0.3, 0.01, 1000.0));
    }

    #[test]
    fn idle_engine_reports_nothing() {
        let engine = TunerEngine::with_backend(Arc::new(ToneBackend::silence()));
        assert_eq!(engine.query_frequency(), 0.0);
        assert!(engine.sample_buffer().is_empty());
        assert_eq!(engine.copy_sample_buffer(&mut [0.0; 16]), 0);
        assert_eq!(engine.analysis_cycles(), 0);
        assert!(!engine.stop());
    }
}

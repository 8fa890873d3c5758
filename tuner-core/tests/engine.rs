//! End-to-end checks of the engine lifecycle against the synthetic backend.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tuner_core::gate::amplitude_from_db;
use tuner_core::{CaptureParams, DeviceId, EngineConfig, EngineError, ToneBackend, TunerEngine};

const TIMEOUT: Duration = Duration::from_secs(5);

fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

fn tone_engine(frequency: f32) -> (TunerEngine, Arc<ToneBackend>) {
    let backend = Arc::new(ToneBackend::sine(frequency, 0.5));
    let engine = TunerEngine::with_backend(backend.clone());
    assert!(engine.set_parameters(0.2, amplitude_from_db(-40.0) as f32, 1000.0));
    (engine, backend)
}

fn assert_near_220(frequency: f32) {
    assert!(
        (217.8..=222.2).contains(&frequency),
        "expected 220 Hz ±1%, got {frequency} Hz"
    );
}

#[test]
fn detects_220_hz_through_the_capture_path() {
    let (engine, _backend) = tone_engine(220.0);
    assert!(engine.start(DeviceId::Default, 1, 48_000));
    assert!(engine.is_active());

    assert!(wait_for(|| engine.analysis_cycles() >= 1), "no analysis cycle ran");
    assert_near_220(engine.query_frequency());
    assert!(engine.stop());
}

#[test]
fn parameters_are_frozen_while_running() {
    let (engine, _backend) = tone_engine(220.0);
    let before = engine.config().unwrap();
    assert!(engine.start(DeviceId::Default, 1, 48_000));

    // A 100 Hz ceiling would hide the tone if it took effect.
    assert!(!engine.set_parameters(0.2, 0.01, 100.0));
    assert_eq!(engine.config().unwrap(), before);

    assert!(wait_for(|| engine.analysis_cycles() >= 2));
    assert_near_220(engine.query_frequency());
    engine.stop();
}

#[test]
fn second_start_does_not_open_another_stream() {
    let (engine, backend) = tone_engine(220.0);
    assert!(engine.start(DeviceId::Default, 1, 48_000));
    assert!(!engine.start(DeviceId::Default, 1, 48_000));
    assert_eq!(
        engine.try_start(&CaptureParams::new(DeviceId::Default, 2, 44_100)),
        Err(EngineError::AlreadyRunning)
    );
    assert_eq!(backend.open_count(), 1);
    assert_eq!(backend.active_streams(), 1);

    assert!(engine.stop());
    assert_eq!(backend.active_streams(), 0);
}

#[test]
fn concurrent_starts_open_one_stream() {
    let (engine, backend) = tone_engine(220.0);
    let engine = Arc::new(engine);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let engine = engine.clone();
            thread::spawn(move || engine.start(DeviceId::Default, 1, 48_000))
        })
        .collect();
    let started = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|&ok| ok)
        .count();

    assert_eq!(started, 1);
    assert_eq!(backend.open_count(), 1);
    engine.stop();
}

#[test]
fn failed_start_leaves_engine_idle() {
    let backend = Arc::new(ToneBackend::unavailable());
    let engine = TunerEngine::with_backend(backend.clone());
    engine.configure(EngineConfig::default()).unwrap();

    assert!(!engine.start(DeviceId::Index(7), 1, 48_000));
    assert!(!engine.is_active());
    assert_eq!(backend.active_streams(), 0);
    assert!(engine.stream_format().is_none());
    assert!(engine.set_parameters(0.1, 0.01, 1000.0));
}

#[test]
fn stop_is_idempotent_and_keeps_last_values() {
    let (engine, backend) = tone_engine(220.0);
    assert!(!engine.stop());
    assert!(engine.start(DeviceId::Default, 1, 48_000));
    assert!(wait_for(|| engine.analysis_cycles() >= 1));

    assert!(engine.stop());
    assert!(!engine.stop());
    assert!(!engine.is_active());
    assert_eq!(backend.active_streams(), 0);

    assert_near_220(engine.query_frequency());
    let window = engine.sample_buffer();
    assert_eq!(window.len(), 9_600);
    assert_eq!(window.sample_rate(), 48_000);
}

#[test]
fn engine_restarts_after_stop() {
    let (engine, backend) = tone_engine(220.0);
    for _ in 0..2 {
        assert!(engine.start(DeviceId::Default, 1, 48_000));
        assert!(wait_for(|| engine.analysis_cycles() >= 1));
        assert_near_220(engine.query_frequency());
        assert!(engine.stop());
    }
    assert_eq!(backend.open_count(), 2);
    assert_eq!(backend.active_streams(), 0);
}

#[test]
fn silence_reads_as_zero() {
    let backend = Arc::new(ToneBackend::silence());
    let engine = TunerEngine::with_backend(backend);
    engine.configure(EngineConfig::default()).unwrap();
    assert!(engine.start(DeviceId::Default, 1, 48_000));

    assert!(wait_for(|| engine.analysis_cycles() >= 2));
    assert_eq!(engine.query_frequency(), 0.0);
    engine.stop();
}

#[test]
fn falls_back_to_device_rate() {
    let backend = Arc::new(ToneBackend::sine(220.0, 0.5).with_native_rate(44_100));
    let engine = TunerEngine::with_backend(backend);
    engine.configure(EngineConfig::default()).unwrap();

    let format = engine
        .try_start(&CaptureParams::new(DeviceId::Default, 2, 48_000))
        .unwrap();
    assert_eq!(format.sample_rate, 44_100);
    assert_eq!(engine.stream_format(), Some(format));

    assert!(wait_for(|| engine.analysis_cycles() >= 1));
    assert_near_220(engine.query_frequency());
    assert_eq!(engine.sample_buffer().len(), 8_820);
    engine.stop();
}

#[test]
fn queries_from_many_threads_see_whole_values() {
    let (engine, _backend) = tone_engine(220.0);
    let engine = Arc::new(engine);
    assert!(engine.start(DeviceId::Default, 1, 48_000));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let engine = engine.clone();
            thread::spawn(move || {
                let until = Instant::now() + Duration::from_millis(600);
                let mut buffer = vec![0.0f32; 512];
                while Instant::now() < until {
                    let frequency = engine.query_frequency();
                    assert!(
                        frequency == 0.0 || (217.8..=222.2).contains(&frequency),
                        "unexpected reading {frequency}"
                    );
                    let copied = engine.copy_sample_buffer(&mut buffer);
                    assert!(copied <= buffer.len());
                }
            })
        })
        .collect();

    for reader in readers {
        reader.join().unwrap();
    }
    engine.stop();
}

#[test]
fn stop_returns_within_one_interval_on_long_noisy_windows() {
    // Uniform noise of 0.1 has an RMS near 0.058, well above the gate.
    let backend = Arc::new(ToneBackend::noise(0.1));
    let engine = TunerEngine::with_backend(backend.clone());
    let config = EngineConfig {
        window_seconds: 1.0,
        analysis_interval_ms: 100,
        ..EngineConfig::default()
    };
    let interval = config.analysis_interval();
    engine.configure(config).unwrap();
    assert!(engine.start(DeviceId::Default, 1, 48_000));

    assert!(wait_for(|| engine.analysis_cycles() >= 2), "no analysis cycle ran");
    assert_eq!(engine.query_frequency(), 0.0);

    let started = Instant::now();
    assert!(engine.stop());
    let elapsed = started.elapsed();
    assert!(elapsed < interval, "stop took {elapsed:?}");
    assert_eq!(backend.active_streams(), 0);
}

#[test]
fn dropping_the_engine_releases_the_device() {
    let (engine, backend) = tone_engine(220.0);
    assert!(engine.start(DeviceId::Default, 1, 48_000));
    assert_eq!(backend.active_streams(), 1);
    drop(engine);
    assert_eq!(backend.active_streams(), 0);
}

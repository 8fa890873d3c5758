//! # Audio Capture Module
//!
//! This module handles real-time audio capture using CPAL (Cross-Platform Audio Library).
//! Capture is split behind the [`InputBackend`] seam so the engine can run against
//! real hardware or a synthetic source with the same lifecycle.
//!
//! ## Features
//! - Device selection by default, index or name
//! - Sample-rate negotiation with fallback to the nearest supported rate
//! - F32, I16 and U16 input, down-mixed to mono in the callback
//! - A dedicated thread owning each `cpal::Stream`
//! - Idempotent stop; at most one open stream per session

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, StreamConfig, SupportedStreamConfig, SupportedStreamConfigRange};
use crossbeam_channel::{Receiver, Sender, bounded};

use crate::buffer::{SampleRing, SharedRing};
use crate::config::{CaptureParams, DeviceId, StreamFormat};
use crate::error::{EngineError, Result};

/// Handle the capture callback uses to feed the analysis ring.
///
/// Interleaved blocks are averaged frame by frame into mono before they are
/// written, so readers only ever see one channel.
#[derive(Debug, Clone)]
pub struct SampleSink {
    ring: SharedRing,
    channels: usize,
}

impl SampleSink {
    pub fn new(ring: SharedRing, channels: u16) -> Self {
        Self {
            ring,
            channels: channels.max(1) as usize,
        }
    }

    /// Writes an interleaved block of any sample type.
    pub fn write<T: Copy>(&self, data: &[T], convert: impl Fn(T) -> f32) {
        self.ring.lock().write_frames(data, self.channels, convert);
    }

    /// Writes an interleaved block of `f32` samples.
    pub fn write_f32(&self, data: &[f32]) {
        self.write(data, |s| s);
    }
}

/// A source of input audio.
///
/// Opening happens in two steps because the ring buffer can only be sized
/// once the actual sample rate is known.
pub trait InputBackend: Send + Sync {
    /// Resolves the device and the format it will actually deliver.
    fn negotiate(&self, params: &CaptureParams) -> Result<StreamFormat>;

    /// Opens and starts a stream that writes into `sink` until closed.
    fn open(
        &self,
        params: &CaptureParams,
        format: StreamFormat,
        sink: SampleSink,
    ) -> Result<Box<dyn ActiveStream>>;
}

/// A running input stream.
pub trait ActiveStream: Send {
    /// Stops the stream and releases the device. No samples are written
    /// after this returns.
    fn close(self: Box<Self>) -> Result<()>;
}

/// What a successful start hands to the analysis side.
#[derive(Debug, Clone)]
pub struct CaptureInfo {
    pub format: StreamFormat,
    pub ring: SharedRing,
}

/// Owns at most one open input stream.
pub struct CaptureSession {
    backend: Arc<dyn InputBackend>,
    stream: Option<Box<dyn ActiveStream>>,
}

impl CaptureSession {
    pub fn new(backend: Arc<dyn InputBackend>) -> Self {
        Self {
            backend,
            stream: None,
        }
    }

    /// Opens the input described by `params` with a ring holding
    /// `window_seconds` of audio at the negotiated rate.
    ///
    /// # Returns
    /// * `Ok(info)` - The negotiated format and the ring being filled
    /// * `Err(AlreadyRunning)` - A stream is already open; nothing was touched
    /// * `Err(e)` - Device or permission failure; no stream is left open
    pub fn start(&mut self, params: &CaptureParams, window_seconds: f32) -> Result<CaptureInfo> {
        if self.stream.is_some() {
            return Err(EngineError::AlreadyRunning);
        }
        params.validate()?;

        let format = self.backend.negotiate(params)?;
        if format.sample_rate == 0 || format.channels == 0 {
            return Err(EngineError::CaptureFailure(format!(
                "backend negotiated an unusable format ({} Hz, {} channels)",
                format.sample_rate, format.channels
            )));
        }
        if format.sample_rate != params.sample_rate {
            log::warn!(
                "[CAPTURE] {} Hz not available on {}, using {} Hz",
                params.sample_rate,
                params.device,
                format.sample_rate
            );
        }

        let ring = SampleRing::for_duration(window_seconds, format.sample_rate).shared();
        let sink = SampleSink::new(ring.clone(), format.channels);
        let stream = self.backend.open(params, format, sink)?;
        self.stream = Some(stream);

        log::info!(
            "[CAPTURE] Capturing from {} at {} Hz, {} channel(s)",
            params.device,
            format.sample_rate,
            format.channels
        );
        Ok(CaptureInfo { format, ring })
    }

    /// Closes the open stream, if any. Safe to call repeatedly.
    pub fn stop(&mut self) -> Result<()> {
        match self.stream.take() {
            Some(stream) => {
                stream.close()?;
                log::info!("[CAPTURE] Capture stopped");
                Ok(())
            }
            None => Ok(()),
        }
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::warn!("[CAPTURE] Failed to close input stream: {}", e);
        }
    }
}

/// An input device as listed by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputDevice {
    pub index: usize,
    pub name: String,
    pub is_default: bool,
}

/// Lists the input devices of the default host in index order.
pub fn list_input_devices() -> Result<Vec<InputDevice>> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());
    let devices = host.input_devices().map_err(classify)?;

    Ok(devices
        .enumerate()
        .map(|(index, device)| {
            let name = device.name().unwrap_or_else(|_| "<unknown>".to_string());
            InputDevice {
                index,
                is_default: default_name.as_deref() == Some(name.as_str()),
                name,
            }
        })
        .collect())
}

/// Hardware capture through the default CPAL host.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpalBackend;

impl CpalBackend {
    pub fn new() -> Self {
        Self
    }
}

impl InputBackend for CpalBackend {
    fn negotiate(&self, params: &CaptureParams) -> Result<StreamFormat> {
        let host = cpal::default_host();
        let device = resolve_device(&host, &params.device)?;
        let config = choose_config(&device, params)?;
        Ok(StreamFormat {
            sample_rate: config.sample_rate().0,
            channels: config.channels(),
        })
    }

    fn open(
        &self,
        params: &CaptureParams,
        format: StreamFormat,
        sink: SampleSink,
    ) -> Result<Box<dyn ActiveStream>> {
        let (ready_tx, ready_rx) = bounded::<Result<()>>(1);
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let params = params.clone();

        // cpal::Stream is not Send, so the thread that builds it also owns it.
        let handle = thread::Builder::new()
            .name("tuner-capture".to_string())
            .spawn(move || run_capture_thread(params, format, sink, ready_tx, shutdown_rx))
            .map_err(|e| EngineError::Thread(e.to_string()))?;

        let ready = ready_rx.recv().unwrap_or_else(|_| {
            Err(EngineError::Thread(
                "capture thread exited before reporting".to_string(),
            ))
        });
        match ready {
            Ok(()) => Ok(Box::new(CpalStream {
                shutdown: shutdown_tx,
                handle: Some(handle),
            })),
            Err(e) => {
                let _ = handle.join();
                Err(e)
            }
        }
    }
}

struct CpalStream {
    shutdown: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl ActiveStream for CpalStream {
    fn close(mut self: Box<Self>) -> Result<()> {
        let _ = self.shutdown.send(());
        if let Some(handle) = self.handle.take() {
            handle
                .join()
                .map_err(|_| EngineError::Thread("capture thread panicked".to_string()))?;
        }
        Ok(())
    }
}

fn run_capture_thread(
    params: CaptureParams,
    format: StreamFormat,
    sink: SampleSink,
    ready: Sender<Result<()>>,
    shutdown: Receiver<()>,
) {
    let stream = match open_stream(&params, format, sink) {
        Ok(stream) => stream,
        Err(e) => {
            log::error!("[CAPTURE] Failed to open {}: {}", params.device, e);
            let _ = ready.send(Err(e));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    // Returns on an explicit close or when the handle is dropped.
    let _ = shutdown.recv();

    if let Err(e) = stream.pause() {
        log::warn!("[CAPTURE] Failed to pause input stream: {}", e);
    }
    drop(stream);
}

fn open_stream(params: &CaptureParams, format: StreamFormat, sink: SampleSink) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = resolve_device(&host, &params.device)?;
    let supported = choose_config(&device, params)?;
    let config = StreamConfig {
        channels: format.channels,
        sample_rate: cpal::SampleRate(format.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let stream = match supported.sample_format() {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, sink),
        SampleFormat::I16 => build_stream::<i16>(&device, &config, sink),
        SampleFormat::U16 => build_stream::<u16>(&device, &config, sink),
        other => {
            return Err(EngineError::CaptureFailure(format!(
                "unsupported sample format {other:?}"
            )));
        }
    }
    .map_err(classify)?;

    stream.play().map_err(classify)?;
    Ok(stream)
}

/// Build audio stream for given sample type
fn build_stream<T: cpal::Sample + cpal::SizedSample>(
    device: &Device,
    config: &StreamConfig,
    sink: SampleSink,
) -> std::result::Result<cpal::Stream, cpal::BuildStreamError>
where
    f32: cpal::FromSample<T>,
{
    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            sink.write(data, |s| cpal::Sample::from_sample(s));
        },
        |err| {
            log::error!("[CAPTURE] Audio stream error: {}", err);
        },
        None,
    )
}

fn resolve_device(host: &cpal::Host, id: &DeviceId) -> Result<Device> {
    match id {
        DeviceId::Default => host
            .default_input_device()
            .ok_or_else(|| EngineError::DeviceUnavailable("no default input device".to_string())),
        DeviceId::Index(index) => host
            .input_devices()
            .map_err(classify)?
            .nth(*index)
            .ok_or_else(|| EngineError::DeviceUnavailable(format!("no input device at index {index}"))),
        DeviceId::Name(name) => host
            .input_devices()
            .map_err(classify)?
            .find(|d| d.name().map(|n| n == *name).unwrap_or(false))
            .ok_or_else(|| EngineError::DeviceUnavailable(format!("no input device named \"{name}\""))),
    }
}

fn choose_config(device: &Device, params: &CaptureParams) -> Result<SupportedStreamConfig> {
    let configs = device
        .supported_input_configs()
        .map_err(classify)?
        .collect::<Vec<_>>();
    match find_supported_config(configs, params.channels, params.sample_rate) {
        Some(config) => Ok(config),
        None => device.default_input_config().map_err(classify),
    }
}

/// Finds the best supported configuration for the requested channels and rate.
///
/// Preference order: the requested channel count, then the smallest distance
/// between the requested rate and the range, then `f32` samples. The rate is
/// clamped into the chosen range, so an unsupported request falls back to
/// the nearest rate the device offers.
///
/// # Returns
/// * `Some(config)` - Best matching configuration
/// * `None` - No range uses a sample format the capture path understands
fn find_supported_config(
    configs: Vec<SupportedStreamConfigRange>,
    channels: u16,
    target_rate: u32,
) -> Option<SupportedStreamConfig> {
    configs
        .into_iter()
        .filter(|c| {
            matches!(
                c.sample_format(),
                SampleFormat::F32 | SampleFormat::I16 | SampleFormat::U16
            )
        })
        .min_by_key(|c| {
            let rate = clamp_rate(c, target_rate);
            (
                c.channels() != channels,
                rate.abs_diff(target_rate),
                c.sample_format() != SampleFormat::F32,
            )
        })
        .map(|c| {
            let rate = clamp_rate(&c, target_rate);
            c.with_sample_rate(cpal::SampleRate(rate))
        })
}

fn clamp_rate(range: &SupportedStreamConfigRange, target_rate: u32) -> u32 {
    target_rate
        .max(range.min_sample_rate().0)
        .min(range.max_sample_rate().0)
}

/// Maps a host error onto the engine's error kinds by its message, since
/// hosts report denied microphone access as backend-specific text.
fn classify(err: impl std::fmt::Display) -> EngineError {
    let message = err.to_string();
    let lower = message.to_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("not authorized") {
        EngineError::PermissionDenied(message)
    } else if lower.contains("not available") || lower.contains("no longer available") {
        EngineError::DeviceUnavailable(message)
    } else {
        EngineError::CaptureFailure(message)
    }
}

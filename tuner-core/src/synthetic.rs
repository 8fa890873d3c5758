//! Synthetic input backend.
//!
//! Generates a steady sine, white noise or silence in real time on its own thread, so
//! the engine can be exercised end to end without audio hardware. It also
//! counts opened and live streams for lifecycle checks.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{RecvTimeoutError, Sender, bounded};

use crate::audio::{ActiveStream, InputBackend, SampleSink};
use crate::config::{CaptureParams, StreamFormat};
use crate::error::{EngineError, Result};

/// Duration of each generated block.
pub const DEFAULT_BLOCK: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq)]
enum Signal {
    Sine { frequency: f32, amplitude: f32 },
    Noise { amplitude: f32 },
    Silence,
}

/// Input backend producing a synthetic tone.
#[derive(Debug)]
pub struct ToneBackend {
    signal: Signal,
    native_rate: Option<u32>,
    failure: Option<EngineError>,
    block: Duration,
    opens: Arc<AtomicUsize>,
    active: Arc<AtomicUsize>,
}

impl ToneBackend {
    fn with_signal(signal: Signal) -> Self {
        Self {
            signal,
            native_rate: None,
            failure: None,
            block: DEFAULT_BLOCK,
            opens: Arc::new(AtomicUsize::new(0)),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A sine at `frequency` Hz with peak `amplitude`, identical on every channel.
    pub fn sine(frequency: f32, amplitude: f32) -> Self {
        Self::with_signal(Signal::Sine {
            frequency,
            amplitude,
        })
    }

    /// Uniform white noise in `[-amplitude, amplitude]`, from a fixed seed.
    pub fn noise(amplitude: f32) -> Self {
        Self::with_signal(Signal::Noise { amplitude })
    }

    pub fn silence() -> Self {
        Self::with_signal(Signal::Silence)
    }

    /// A backend whose device cannot be found.
    pub fn unavailable() -> Self {
        Self::silence().failing(EngineError::DeviceUnavailable(
            "synthetic device unplugged".to_string(),
        ))
    }

    /// A backend whose device refuses access.
    pub fn denied() -> Self {
        Self::silence().failing(EngineError::PermissionDenied(
            "synthetic device refused access".to_string(),
        ))
    }

    /// Makes negotiation fail with `error`.
    pub fn failing(mut self, error: EngineError) -> Self {
        self.failure = Some(error);
        self
    }

    /// Pretends the device only supports `sample_rate`.
    pub fn with_native_rate(mut self, sample_rate: u32) -> Self {
        self.native_rate = Some(sample_rate);
        self
    }

    pub fn with_block(mut self, block: Duration) -> Self {
        self.block = block;
        self
    }

    /// How many streams have been opened in total.
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// How many streams are currently open.
    pub fn active_streams(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

impl InputBackend for ToneBackend {
    fn negotiate(&self, params: &CaptureParams) -> Result<StreamFormat> {
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }
        Ok(StreamFormat {
            sample_rate: self.native_rate.unwrap_or(params.sample_rate),
            channels: params.channels,
        })
    }

    fn open(
        &self,
        _params: &CaptureParams,
        format: StreamFormat,
        sink: SampleSink,
    ) -> Result<Box<dyn ActiveStream>> {
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let generator = Generator::new(self.signal, format, self.block);
        let active = self.active.clone();

        self.opens.fetch_add(1, Ordering::SeqCst);
        active.fetch_add(1, Ordering::SeqCst);

        let block = self.block;
        let handle = thread::Builder::new()
            .name("tuner-tone".to_string())
            .spawn(move || {
                let mut generator = generator;
                loop {
                    sink.write_f32(generator.next_block());
                    match shutdown_rx.recv_timeout(block) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        _ => break,
                    }
                }
            });

        match handle {
            Ok(handle) => Ok(Box::new(ToneStream {
                shutdown: shutdown_tx,
                handle: Some(handle),
                active,
            })),
            Err(e) => {
                active.fetch_sub(1, Ordering::SeqCst);
                Err(EngineError::Thread(e.to_string()))
            }
        }
    }
}

struct ToneStream {
    shutdown: Sender<()>,
    handle: Option<JoinHandle<()>>,
    active: Arc<AtomicUsize>,
}

impl ActiveStream for ToneStream {
    fn close(mut self: Box<Self>) -> Result<()> {
        let _ = self.shutdown.send(());
        let joined = match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| EngineError::Thread("tone thread panicked".to_string())),
            None => Ok(()),
        };
        self.active.fetch_sub(1, Ordering::SeqCst);
        joined
    }
}

/// Phase-continuous block generator producing interleaved frames.
struct Generator {
    signal: Signal,
    sample_rate: f64,
    channels: usize,
    phase: f64,
    noise_state: u32,
    block: Vec<f32>,
    frames_per_block: usize,
}

impl Generator {
    fn new(signal: Signal, format: StreamFormat, block: Duration) -> Self {
        let frames_per_block =
            ((format.sample_rate as f64 * block.as_secs_f64()).round() as usize).max(1);
        Self {
            signal,
            sample_rate: format.sample_rate as f64,
            channels: format.channels.max(1) as usize,
            phase: 0.0,
            noise_state: 0x9E37_79B9,
            block: Vec::with_capacity(frames_per_block * format.channels.max(1) as usize),
            frames_per_block,
        }
    }

    fn next_block(&mut self) -> &[f32] {
        self.block.clear();
        for _ in 0..self.frames_per_block {
            let value = match self.signal {
                Signal::Sine {
                    frequency,
                    amplitude,
                } => {
                    let value = amplitude as f64 * (std::f64::consts::TAU * self.phase).sin();
                    self.phase = (self.phase + frequency as f64 / self.sample_rate).fract();
                    value as f32
                }
                Signal::Noise { amplitude } => {
                    // xorshift32
                    self.noise_state ^= self.noise_state << 13;
                    self.noise_state ^= self.noise_state >> 17;
                    self.noise_state ^= self.noise_state << 5;
                    amplitude * ((self.noise_state as f32 / u32::MAX as f32) * 2.0 - 1.0)
                }
                Signal::Silence => 0.0,
            };
            self.block.extend(std::iter::repeat_n(value, self.channels));
        }
        &self.block
    }
}

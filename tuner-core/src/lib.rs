// tuner-core/src/lib.rs

//! The core logic for the real-time pitch tuner.
//! This crate owns the input device, buffers the most recent samples,
//! detects the fundamental frequency on a fixed cadence and publishes it
//! through a thread-safe query interface. It is completely headless and
//! contains no presentation code.

pub mod audio;
pub mod buffer;
pub mod config;
pub mod engine;
pub mod error;
pub mod fft;
pub mod filter;
pub mod gate;
pub mod pitch;
pub mod synthetic;
pub mod tuning;

pub use audio::{
    ActiveStream, CaptureInfo, CaptureSession, CpalBackend, InputBackend, InputDevice, SampleSink,
    list_input_devices,
};
pub use buffer::{SampleRing, SampleWindow, SharedRing};
pub use config::{CaptureParams, DetectorKind, DeviceId, EngineConfig, StreamFormat};
pub use engine::{FrequencyCell, TunerEngine};
pub use error::{EngineError, Result};
pub use synthetic::ToneBackend;
pub use tuning::NoteReading;

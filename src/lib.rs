//! Host bridge for the Kodama delay effect
//!
//! The effect's DSP lives in a sandboxed wasm module with a fixed C-style
//! ABI. This crate binds that module, runs audio through it in fixed-size
//! blocks, exports periodic waveform snapshots for visualization, and keeps
//! parameter state in sync, either against a native plugin host or a
//! self-contained worker thread with its own output stream.

pub mod audition;
pub mod device;
pub mod dsp;
pub mod messages;
pub mod params;
pub mod runtime;

pub use device::AudioConfig;
pub use dsp::{AudioBridge, WasmDsp, WaveformSnapshot};
pub use messages::{ControlMessage, ReplyMessage};
pub use params::{Parameter, ParameterProperties, ParameterState, Subscription};
pub use runtime::{
    HostBackend, HostParam, HostRuntime, RuntimeError, RuntimeHandle, StandaloneRuntime,
    WaveformCallback,
};

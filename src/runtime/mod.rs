//! Runtime abstraction over the two hosting environments
//!
//! A [`RuntimeHandle`] is either backed by a native plugin host (parameters
//! and waveform events owned by the host) or by this process's own worker
//! thread running the DSP module. The variant is chosen once at startup and
//! never switched.

pub mod host;
pub mod standalone;
pub mod worker;

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::audition::SampleInfo;
use crate::dsp::waveform::WaveformSnapshot;
use crate::params::{ParameterState, Subscription};

pub use host::{HostBackend, HostParam, HostRuntime};
pub use standalone::StandaloneRuntime;

/// Callback invoked with each emitted waveform snapshot. Snapshots are
/// shared read-only; a subscriber may hold one indefinitely.
pub type WaveformCallback = Box<dyn Fn(Arc<WaveformSnapshot>) + Send + Sync>;

/// Fatal runtime failures. None of these are retried; a failed runtime is
/// reconstructed, not reused.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeError {
    /// Module compile/instantiate/allocate or audio stream setup failed.
    LoadFailure(String),
    /// The worker did not report ready within the init deadline.
    InitTimeout,
    /// Operation requires a successfully initialized runtime.
    NotInitialized,
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::LoadFailure(msg) => write!(f, "Failed to load DSP module: {}", msg),
            RuntimeError::InitTimeout => write!(f, "Timed out waiting for the DSP worker"),
            RuntimeError::NotInitialized => write!(f, "Runtime is not initialized"),
        }
    }
}

impl std::error::Error for RuntimeError {}

/// The two hosting environments behind one interface.
pub enum RuntimeHandle {
    Host(HostRuntime),
    Standalone(StandaloneRuntime),
}

impl RuntimeHandle {
    /// Look up a parameter by id; `None` for ids neither side knows.
    pub fn get_parameter(&self, id: &str) -> Option<Arc<dyn ParameterState>> {
        match self {
            RuntimeHandle::Host(r) => r.get_parameter(id),
            RuntimeHandle::Standalone(r) => r.get_parameter(id),
        }
    }

    /// Write a scaled parameter value. Unknown ids are silently ignored.
    pub fn set_parameter(&self, id: &str, value: f32) {
        match self {
            RuntimeHandle::Host(r) => r.set_parameter(id, value),
            RuntimeHandle::Standalone(r) => r.set_parameter(id, value),
        }
    }

    pub fn on_waveform_data(&self, callback: WaveformCallback) -> Subscription {
        match self {
            RuntimeHandle::Host(r) => r.on_waveform_data(callback),
            RuntimeHandle::Standalone(r) => r.on_waveform_data(callback),
        }
    }

    /// Load an audition file. The host-backed runtime has no audition
    /// transport; the host feeds audio itself.
    pub fn load_audio_file(&self, path: &Path) -> Result<SampleInfo, RuntimeError> {
        match self {
            RuntimeHandle::Host(_) => Err(RuntimeError::LoadFailure(
                "audition is not available under a plugin host".to_string(),
            )),
            RuntimeHandle::Standalone(r) => r.load_audio_file(path),
        }
    }

    pub fn play(&self) {
        if let RuntimeHandle::Standalone(r) = self {
            r.play();
        }
    }

    pub fn stop(&self) {
        if let RuntimeHandle::Standalone(r) = self {
            r.stop();
        }
    }

    pub fn is_playing(&self) -> bool {
        match self {
            RuntimeHandle::Host(_) => false,
            RuntimeHandle::Standalone(r) => r.is_playing(),
        }
    }

    pub fn has_audio_loaded(&self) -> bool {
        match self {
            RuntimeHandle::Host(_) => false,
            RuntimeHandle::Standalone(r) => r.has_audio_loaded(),
        }
    }
}

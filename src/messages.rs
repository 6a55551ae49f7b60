//! Control and reply messages exchanged with the processing worker
//!
//! The schema mirrors the wire protocol of the browser host: an `init`
//! message carrying the compiled module, `set-param` updates, and `ready` /
//! `error` / `waveform` replies.

use serde::{Deserialize, Serialize};

use crate::dsp::waveform::WaveformSnapshot;

/// Messages sent from the controlling side into the worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ControlMessage {
    /// Load and initialize the processing module from its compiled bytes.
    Init { module: Vec<u8> },
    /// Update one module parameter (scaled units).
    SetParam { param: String, value: f32 },
}

/// Messages sent from the worker back to the controlling side.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ReplyMessage {
    /// Module loaded, audio stream running.
    Ready,
    /// Initialization failed; the worker is unusable.
    Error { message: String },
    /// Periodic waveform snapshot from the exporter.
    Waveform(WaveformSnapshot),
}

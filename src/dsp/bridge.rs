//! Per-block processing bridge between host buffers and the DSP module
//!
//! Sits in the real-time path: deinterleaves host channels into planar
//! scratch, runs the module, reinterleaves, and feeds the waveform exporter.
//! No locks, no allocation per block (the only allocations are the fresh
//! snapshot buffers the exporter mandates at emission time).

use log::warn;

use crate::dsp::module::WasmDsp;
use crate::dsp::waveform::{WaveformExporter, WaveformSnapshot, MAX_VOICES};

/// Largest block the bridge will accept, matching the scratch regions
/// allocated inside the module.
pub const MAX_BLOCK_SIZE: usize = 2048;

pub struct AudioBridge {
    dsp: Option<WasmDsp>,
    exporter: WaveformExporter,
    left_in: Vec<f32>,
    right_in: Vec<f32>,
    left_out: Vec<f32>,
    right_out: Vec<f32>,
}

impl AudioBridge {
    pub fn new() -> Self {
        Self {
            dsp: None,
            exporter: WaveformExporter::new(),
            left_in: vec![0.0; MAX_BLOCK_SIZE],
            right_in: vec![0.0; MAX_BLOCK_SIZE],
            left_out: vec![0.0; MAX_BLOCK_SIZE],
            right_out: vec![0.0; MAX_BLOCK_SIZE],
        }
    }

    pub fn install_module(&mut self, dsp: WasmDsp) {
        self.dsp = Some(dsp);
    }

    pub fn is_ready(&self) -> bool {
        self.dsp.is_some()
    }

    pub fn set_parameter(&mut self, name: &str, value: f32) {
        if let Some(dsp) = self.dsp.as_mut() {
            dsp.set_parameter(name, value);
        }
    }

    /// Process one interleaved block. `input` holds `in_channels` interleaved
    /// channels (may be empty for a silent block); `output` holds
    /// `out_channels`. Returns a snapshot on the exporter's cadence.
    ///
    /// When no module is installed or the block shape is unusable the input
    /// is passed through unchanged (silence when there is no input).
    pub fn process(
        &mut self,
        input: &[f32],
        in_channels: usize,
        output: &mut [f32],
        out_channels: usize,
    ) -> Option<WaveformSnapshot> {
        if out_channels == 0 || output.is_empty() {
            return None;
        }
        let num_samples = output.len() / out_channels;

        if num_samples > MAX_BLOCK_SIZE || (!input.is_empty() && in_channels == 0) {
            Self::pass_through(input, in_channels, output, out_channels, num_samples);
            return None;
        }
        if self.dsp.is_none() {
            Self::pass_through(input, in_channels, output, out_channels, num_samples);
            return None;
        }

        // Deinterleave; a mono source feeds both module channels.
        for i in 0..num_samples {
            let (l, r) = if input.is_empty() {
                (0.0, 0.0)
            } else {
                let frame = i * in_channels;
                let l = input.get(frame).copied().unwrap_or(0.0);
                let r = if in_channels > 1 {
                    input.get(frame + 1).copied().unwrap_or(0.0)
                } else {
                    l
                };
                (l, r)
            };
            self.left_in[i] = l;
            self.right_in[i] = r;
        }

        let dsp = match self.dsp.as_mut() {
            Some(dsp) => dsp,
            None => return None,
        };
        if let Err(e) = dsp.process_block(
            &self.left_in[..num_samples],
            &self.right_in[..num_samples],
            &mut self.left_out[..num_samples],
            &mut self.right_out[..num_samples],
        ) {
            warn!("DSP block failed, passing input through: {}", e);
            Self::pass_through(input, in_channels, output, out_channels, num_samples);
            return None;
        }

        // Reinterleave; a single output channel receives the left signal.
        for i in 0..num_samples {
            let frame = i * out_channels;
            output[frame] = self.left_out[i];
            if out_channels > 1 {
                output[frame + 1] = self.right_out[i];
                for ch in 2..out_channels {
                    output[frame + ch] = 0.0;
                }
            }
        }

        let (snap_in, snap_out) = self
            .exporter
            .accumulate(&self.left_in[..num_samples], &self.left_out[..num_samples])?;

        let length = snap_in.len();
        let mut snapshot = WaveformSnapshot {
            input: snap_in,
            output: snap_out,
            voice_waveforms: None,
            voice_count: None,
            length,
        };
        if dsp.has_voice_introspection() {
            let count = dsp.voice_count().min(MAX_VOICES as u32);
            let mut voices = Vec::with_capacity(count as usize);
            for index in 0..count {
                if let Some(waveform) = dsp.voice_waveform(index) {
                    voices.push(waveform);
                }
            }
            snapshot.voice_count = Some(count);
            snapshot.voice_waveforms = Some(voices);
        }
        Some(snapshot)
    }

    fn pass_through(
        input: &[f32],
        in_channels: usize,
        output: &mut [f32],
        out_channels: usize,
        num_samples: usize,
    ) {
        if input.is_empty() || in_channels == 0 {
            output.fill(0.0);
            return;
        }
        for i in 0..num_samples {
            let in_frame = i * in_channels;
            let out_frame = i * out_channels;
            for ch in 0..out_channels {
                let src = in_frame + ch.min(in_channels - 1);
                output[out_frame + ch] = input.get(src).copied().unwrap_or(0.0);
            }
        }
    }
}

impl Default for AudioBridge {
    fn default() -> Self {
        Self::new()
    }
}

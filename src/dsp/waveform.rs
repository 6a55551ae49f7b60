//! Waveform snapshot accumulation for visualization
//!
//! The exporter collects the dry and processed signal into fixed 512-sample
//! buffers and hands a snapshot out every fourth processed block. Emitted
//! buffers are transferred by value and replaced with fresh allocations, so
//! a consumer can hold a snapshot for as long as it likes.

use serde::{Deserialize, Serialize};

/// Samples per snapshot channel.
pub const WAVEFORM_BUFFER_SIZE: usize = 512;
/// Blocks processed between emissions.
pub const WAVEFORM_SEND_INTERVAL: u32 = 4;
/// Upper bound on per-voice waveforms a snapshot can carry.
pub const MAX_VOICES: usize = 16;

/// One emitted waveform frame: dry input, processed output, and optional
/// per-voice waveforms when the module exposes voice introspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaveformSnapshot {
    pub input: Vec<f32>,
    pub output: Vec<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice_waveforms: Option<Vec<Vec<f32>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice_count: Option<u32>,
    pub length: usize,
}

/// Accumulates input/output sample pairs and emits on a fixed block cadence.
pub struct WaveformExporter {
    input: Vec<f32>,
    output: Vec<f32>,
    write_index: usize,
    block_counter: u32,
}

impl WaveformExporter {
    pub fn new() -> Self {
        Self {
            input: vec![0.0; WAVEFORM_BUFFER_SIZE],
            output: vec![0.0; WAVEFORM_BUFFER_SIZE],
            write_index: 0,
            block_counter: 0,
        }
    }

    /// Append one block of dry/processed samples. Returns the filled
    /// `(input, output)` buffers on every fourth call; ownership of the
    /// buffers transfers to the caller and the exporter starts over on
    /// fresh allocations.
    pub fn accumulate(&mut self, input: &[f32], output: &[f32]) -> Option<(Vec<f32>, Vec<f32>)> {
        let n = input.len().min(output.len());
        for i in 0..n {
            if self.write_index >= WAVEFORM_BUFFER_SIZE {
                break;
            }
            self.input[self.write_index] = input[i];
            self.output[self.write_index] = output[i];
            self.write_index += 1;
        }

        self.block_counter += 1;
        if self.block_counter >= WAVEFORM_SEND_INTERVAL {
            self.block_counter = 0;
            self.write_index = 0;
            let emitted_input =
                std::mem::replace(&mut self.input, vec![0.0; WAVEFORM_BUFFER_SIZE]);
            let emitted_output =
                std::mem::replace(&mut self.output, vec![0.0; WAVEFORM_BUFFER_SIZE]);
            Some((emitted_input, emitted_output))
        } else {
            None
        }
    }
}

impl Default for WaveformExporter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emits_every_fourth_block() {
        let mut exporter = WaveformExporter::new();
        let block = vec![0.25f32; 128];

        assert!(exporter.accumulate(&block, &block).is_none());
        assert!(exporter.accumulate(&block, &block).is_none());
        assert!(exporter.accumulate(&block, &block).is_none());
        let emitted = exporter.accumulate(&block, &block);
        assert!(emitted.is_some());

        let (input, output) = emitted.unwrap();
        assert_eq!(input.len(), WAVEFORM_BUFFER_SIZE);
        assert_eq!(output.len(), WAVEFORM_BUFFER_SIZE);
        assert!(input.iter().all(|&s| s == 0.25));
    }

    #[test]
    fn test_four_half_filled_blocks_fill_exactly() {
        let mut exporter = WaveformExporter::new();
        let block = vec![1.0f32; 128];

        for _ in 0..3 {
            assert!(exporter.accumulate(&block, &block).is_none());
        }
        let (input, _) = exporter.accumulate(&block, &block).unwrap();
        assert!(input.iter().all(|&s| s == 1.0));
    }

    #[test]
    fn test_excess_samples_dropped_not_wrapped() {
        let mut exporter = WaveformExporter::new();
        let big_block = vec![1.0f32; 500];
        let marker_block = vec![9.0f32; 500];

        exporter.accumulate(&big_block, &big_block);
        // Only 12 slots remain; the rest of this block must be discarded.
        exporter.accumulate(&marker_block, &marker_block);
        exporter.accumulate(&marker_block, &marker_block);
        let (input, _) = exporter.accumulate(&marker_block, &marker_block).unwrap();

        assert!(input[..500].iter().all(|&s| s == 1.0));
        assert!(input[500..].iter().all(|&s| s == 9.0));
    }

    #[test]
    fn test_emitted_buffers_are_fresh_allocations() {
        let mut exporter = WaveformExporter::new();
        let block = vec![0.5f32; WAVEFORM_BUFFER_SIZE];

        let mut first = None;
        for _ in 0..4 {
            first = exporter.accumulate(&block, &block);
        }
        let (first_input, _) = first.unwrap();
        let first_ptr = first_input.as_ptr();

        let silent = vec![0.0f32; WAVEFORM_BUFFER_SIZE];
        let mut second = None;
        for _ in 0..4 {
            second = exporter.accumulate(&silent, &silent);
        }
        let (second_input, _) = second.unwrap();

        assert_ne!(first_ptr, second_input.as_ptr());
        assert!(first_input.iter().all(|&s| s == 0.5));
        assert!(second_input.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_counter_resets_after_emission() {
        let mut exporter = WaveformExporter::new();
        let block = vec![0.1f32; 64];

        for cycle in 0..3 {
            for i in 0..3 {
                assert!(
                    exporter.accumulate(&block, &block).is_none(),
                    "cycle {cycle} block {i}"
                );
            }
            assert!(exporter.accumulate(&block, &block).is_some());
        }
    }
}

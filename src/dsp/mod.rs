//! DSP module hosting: wasm binding, processing bridge, waveform exporter

pub mod bridge;
pub mod module;
pub mod waveform;

pub use bridge::{AudioBridge, MAX_BLOCK_SIZE};
pub use module::WasmDsp;
pub use waveform::{WaveformExporter, WaveformSnapshot};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::waveform::WAVEFORM_BUFFER_SIZE;

    // Minimal module implementing the processing ABI: bump allocator,
    // output = input * mix, constant per-voice waveforms.
    const TEST_MODULE_WAT: &str = r#"
        (module
          (memory (export "memory") 1)
          (global $heap (mut i32) (i32.const 1024))
          (global $mix (mut f32) (f32.const 1.0))
          (global $voices (mut i32) (i32.const 2))
          (func (export "wasm_init") (param f32))
          (func (export "wasm_alloc") (param $n i32) (result i32)
            (local $ptr i32)
            (local.set $ptr (global.get $heap))
            (global.set $heap
              (i32.add (global.get $heap) (i32.mul (local.get $n) (i32.const 4))))
            (local.get $ptr))
          (func (export "wasm_set_delay_time") (param f32))
          (func (export "wasm_set_feedback") (param f32))
          (func (export "wasm_set_mix") (param f32)
            (global.set $mix (local.get 0)))
          (func (export "wasm_set_voices") (param i32)
            (global.set $voices (local.get 0)))
          (func (export "wasm_get_voice_count") (result i32)
            (global.get $voices))
          (func (export "wasm_get_waveform_size") (result i32)
            (i32.const 8))
          (func (export "wasm_get_voice_waveform") (param $index i32) (param $out i32)
            (local $i i32)
            (block $done
              (loop $fill
                (br_if $done (i32.ge_u (local.get $i) (i32.const 8)))
                (f32.store
                  (i32.add (local.get $out) (i32.mul (local.get $i) (i32.const 4)))
                  (f32.convert_i32_u (i32.add (local.get $index) (i32.const 1))))
                (local.set $i (i32.add (local.get $i) (i32.const 1)))
                (br $fill))))
          (func (export "wasm_process")
            (param $lin i32) (param $rin i32) (param $lout i32) (param $rout i32)
            (param $n i32)
            (local $i i32)
            (local $off i32)
            (block $done
              (loop $loop
                (br_if $done (i32.ge_u (local.get $i) (local.get $n)))
                (local.set $off (i32.mul (local.get $i) (i32.const 4)))
                (f32.store (i32.add (local.get $lout) (local.get $off))
                  (f32.mul
                    (f32.load (i32.add (local.get $lin) (local.get $off)))
                    (global.get $mix)))
                (f32.store (i32.add (local.get $rout) (local.get $off))
                  (f32.mul
                    (f32.load (i32.add (local.get $rin) (local.get $off)))
                    (global.get $mix)))
                (local.set $i (i32.add (local.get $i) (i32.const 1)))
                (br $loop)))))
    "#;

    fn load_test_module(max_block: usize) -> WasmDsp {
        WasmDsp::load(TEST_MODULE_WAT.as_bytes(), 44100.0, max_block).unwrap()
    }

    #[test]
    fn test_load_rejects_garbage_bytes() {
        let result = WasmDsp::load(&[0xde, 0xad, 0xbe, 0xef], 44100.0, 256);
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("compile"));
    }

    #[test]
    fn test_process_block_preserves_length() {
        let mut dsp = load_test_module(256);
        let input = vec![1.0f32; 200];
        let mut left_out = vec![0.0f32; 200];
        let mut right_out = vec![0.0f32; 200];

        dsp.process_block(&input, &input, &mut left_out, &mut right_out)
            .unwrap();

        assert!(left_out.iter().all(|&s| s == 1.0));
        assert!(right_out.iter().all(|&s| s == 1.0));
    }

    #[test]
    fn test_parameter_unit_conversion() {
        let mut dsp = load_test_module(64);
        // Percent values reach the module divided by 100.
        dsp.set_parameter("mix", 50.0);

        let input = vec![1.0f32; 64];
        let mut left_out = vec![0.0f32; 64];
        let mut right_out = vec![0.0f32; 64];
        dsp.process_block(&input, &input, &mut left_out, &mut right_out)
            .unwrap();

        assert!(left_out.iter().all(|&s| (s - 0.5).abs() < 1e-6));
    }

    #[test]
    fn test_unknown_parameter_ignored() {
        let mut dsp = load_test_module(64);
        dsp.set_parameter("resonance", 0.7);

        let input = vec![0.5f32; 8];
        let mut left_out = vec![0.0f32; 8];
        let mut right_out = vec![0.0f32; 8];
        dsp.process_block(&input, &input, &mut left_out, &mut right_out)
            .unwrap();
        assert!(left_out.iter().all(|&s| s == 0.5));
    }

    #[test]
    fn test_voice_introspection() {
        let mut dsp = load_test_module(64);
        assert!(dsp.has_voice_introspection());
        assert_eq!(dsp.voice_count(), 2);

        dsp.set_parameter("voices", 3.0);
        assert_eq!(dsp.voice_count(), 3);

        // Waveform size comes from the module's own export.
        let first = dsp.voice_waveform(0).unwrap();
        assert_eq!(first.len(), 8);
        assert!(first.iter().all(|&s| s == 1.0));

        let third = dsp.voice_waveform(2).unwrap();
        assert!(third.iter().all(|&s| s == 3.0));
    }

    #[test]
    fn test_bridge_passes_through_without_module() {
        let mut bridge = AudioBridge::new();
        let input: Vec<f32> = (0..16).map(|i| i as f32).collect();
        let mut output = vec![0.0f32; 16];

        let snapshot = bridge.process(&input, 2, &mut output, 2);
        assert!(snapshot.is_none());
        assert_eq!(output, input);
    }

    #[test]
    fn test_bridge_silence_without_input() {
        let mut bridge = AudioBridge::new();
        bridge.install_module(load_test_module(MAX_BLOCK_SIZE));

        let mut output = vec![0.7f32; 32];
        bridge.process(&[], 0, &mut output, 2);
        assert!(output.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_bridge_duplicates_mono_input() {
        let mut bridge = AudioBridge::new();
        bridge.install_module(load_test_module(MAX_BLOCK_SIZE));
        bridge.set_parameter("mix", 50.0);

        let input = vec![0.8f32; 16];
        let mut output = vec![0.0f32; 32];
        bridge.process(&input, 1, &mut output, 2);

        for frame in output.chunks_exact(2) {
            assert!((frame[0] - 0.4).abs() < 1e-6);
            assert!((frame[1] - 0.4).abs() < 1e-6);
        }
    }

    #[test]
    fn test_bridge_emits_snapshot_on_fourth_block() {
        let mut bridge = AudioBridge::new();
        bridge.install_module(load_test_module(MAX_BLOCK_SIZE));
        bridge.set_parameter("feedback", 30.0);

        let input = vec![0.25f32; 1000];
        let mut output = vec![0.0f32; 1000];

        let mut snapshots = Vec::new();
        for _ in 0..4 {
            if let Some(s) = bridge.process(&input, 2, &mut output, 2) {
                snapshots.push(s);
            }
        }

        assert_eq!(snapshots.len(), 1);
        let snapshot = &snapshots[0];
        assert_eq!(snapshot.length, WAVEFORM_BUFFER_SIZE);
        assert_eq!(snapshot.input.len(), WAVEFORM_BUFFER_SIZE);
        assert_eq!(snapshot.output.len(), WAVEFORM_BUFFER_SIZE);
        assert!(snapshot.input.iter().all(|&s| s == 0.25));

        assert_eq!(snapshot.voice_count, Some(2));
        let voices = snapshot.voice_waveforms.as_ref().unwrap();
        assert_eq!(voices.len(), 2);
        assert!(voices[0].iter().all(|&s| s == 1.0));
        assert!(voices[1].iter().all(|&s| s == 2.0));
    }

    #[test]
    fn test_bridge_rejects_oversized_block() {
        let mut bridge = AudioBridge::new();
        bridge.install_module(load_test_module(MAX_BLOCK_SIZE));

        let frames = MAX_BLOCK_SIZE + 1;
        let input = vec![0.5f32; frames * 2];
        let mut output = vec![0.0f32; frames * 2];

        let snapshot = bridge.process(&input, 2, &mut output, 2);
        assert!(snapshot.is_none());
        assert_eq!(output, input);
    }
}

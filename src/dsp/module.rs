//! Binding to the compiled DSP module
//!
//! The module is a wasm binary exporting a fixed C-style ABI over its linear
//! memory: `wasm_init`, `wasm_alloc`, `wasm_process` and per-parameter
//! setters, plus optional voice-introspection exports. All scratch regions
//! are allocated once at load time through the module's own allocator; the
//! per-block path only copies samples in and out of those regions.

use log::{debug, info};
use wasmtime::{Engine, Instance, Memory, Module, Store, TypedFunc};

/// Fallback snapshot length when the module does not export
/// `wasm_get_waveform_size`.
const DEFAULT_VOICE_WAVEFORM_SIZE: usize = 512;

struct VoiceIntrospection {
    get_voice_count: TypedFunc<(), u32>,
    get_voice_waveform: TypedFunc<(u32, u32), ()>,
    waveform_size: usize,
    waveform_region: u32,
}

/// A loaded and initialized DSP module with its scratch regions in place.
pub struct WasmDsp {
    store: Store<()>,
    memory: Memory,
    process: TypedFunc<(u32, u32, u32, u32, u32), ()>,
    set_delay_time: TypedFunc<f32, ()>,
    set_feedback: TypedFunc<f32, ()>,
    set_mix: TypedFunc<f32, ()>,
    set_voices: Option<TypedFunc<u32, ()>>,
    voices: Option<VoiceIntrospection>,
    // Byte offsets into the module memory, max_block f32s each.
    left_in_ptr: u32,
    right_in_ptr: u32,
    left_out_ptr: u32,
    right_out_ptr: u32,
    max_block: usize,
}

impl std::fmt::Debug for WasmDsp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmDsp")
            .field("max_block", &self.max_block)
            .finish_non_exhaustive()
    }
}

impl WasmDsp {
    /// Compile and instantiate the module, run `wasm_init`, and allocate the
    /// four processing scratch regions. Any failure here is final; the caller
    /// reports it and does not retry.
    pub fn load(module_bytes: &[u8], sample_rate: f32, max_block: usize) -> Result<Self, String> {
        let engine = Engine::default();
        let module = Module::new(&engine, module_bytes)
            .map_err(|e| format!("Failed to compile DSP module: {}", e))?;
        let mut store = Store::new(&engine, ());
        let instance = Instance::new(&mut store, &module, &[])
            .map_err(|e| format!("Failed to instantiate DSP module: {}", e))?;

        let memory = instance
            .get_memory(&mut store, "memory")
            .ok_or_else(|| "DSP module does not export linear memory".to_string())?;

        let init: TypedFunc<f32, ()> = instance
            .get_typed_func(&mut store, "wasm_init")
            .map_err(|e| format!("Missing export wasm_init: {}", e))?;
        let alloc: TypedFunc<u32, u32> = instance
            .get_typed_func(&mut store, "wasm_alloc")
            .map_err(|e| format!("Missing export wasm_alloc: {}", e))?;
        let process = instance
            .get_typed_func(&mut store, "wasm_process")
            .map_err(|e| format!("Missing export wasm_process: {}", e))?;
        let set_delay_time = instance
            .get_typed_func(&mut store, "wasm_set_delay_time")
            .map_err(|e| format!("Missing export wasm_set_delay_time: {}", e))?;
        let set_feedback = instance
            .get_typed_func(&mut store, "wasm_set_feedback")
            .map_err(|e| format!("Missing export wasm_set_feedback: {}", e))?;
        let set_mix = instance
            .get_typed_func(&mut store, "wasm_set_mix")
            .map_err(|e| format!("Missing export wasm_set_mix: {}", e))?;
        let set_voices = instance.get_typed_func(&mut store, "wasm_set_voices").ok();

        init.call(&mut store, sample_rate)
            .map_err(|e| format!("wasm_init trapped: {}", e))?;

        let alloc_region = |store: &mut Store<()>, elements: usize| -> Result<u32, String> {
            let ptr = alloc
                .call(&mut *store, elements as u32)
                .map_err(|e| format!("wasm_alloc trapped: {}", e))?;
            let end = ptr as usize + elements * std::mem::size_of::<f32>();
            if end > memory.data_size(&*store) {
                return Err(format!(
                    "wasm_alloc returned out-of-bounds region ({} bytes past {})",
                    end,
                    memory.data_size(&*store)
                ));
            }
            Ok(ptr)
        };

        let left_in_ptr = alloc_region(&mut store, max_block)?;
        let right_in_ptr = alloc_region(&mut store, max_block)?;
        let left_out_ptr = alloc_region(&mut store, max_block)?;
        let right_out_ptr = alloc_region(&mut store, max_block)?;

        let voices = {
            let get_voice_count = instance
                .get_typed_func::<(), u32>(&mut store, "wasm_get_voice_count")
                .ok();
            let get_voice_waveform = instance
                .get_typed_func::<(u32, u32), ()>(&mut store, "wasm_get_voice_waveform")
                .ok();
            match (get_voice_count, get_voice_waveform) {
                (Some(count), Some(waveform)) => {
                    let waveform_size = instance
                        .get_typed_func::<(), u32>(&mut store, "wasm_get_waveform_size")
                        .ok()
                        .and_then(|f| f.call(&mut store, ()).ok())
                        .map(|n| n as usize)
                        .unwrap_or(DEFAULT_VOICE_WAVEFORM_SIZE);
                    let waveform_region = alloc_region(&mut store, waveform_size)?;
                    Some(VoiceIntrospection {
                        get_voice_count: count,
                        get_voice_waveform: waveform,
                        waveform_size,
                        waveform_region,
                    })
                }
                _ => None,
            }
        };

        info!(
            "Loaded DSP module ({} bytes, max block {}, voice introspection: {})",
            module_bytes.len(),
            max_block,
            voices.is_some()
        );

        Ok(Self {
            store,
            memory,
            process,
            set_delay_time,
            set_feedback,
            set_mix,
            set_voices,
            voices,
            left_in_ptr,
            right_in_ptr,
            left_out_ptr,
            right_out_ptr,
            max_block,
        })
    }

    fn write_region(&mut self, ptr: u32, samples: &[f32]) {
        let data = self.memory.data_mut(&mut self.store);
        let base = ptr as usize;
        for (i, &sample) in samples.iter().enumerate() {
            let at = base + i * 4;
            data[at..at + 4].copy_from_slice(&sample.to_le_bytes());
        }
    }

    fn read_region(&mut self, ptr: u32, out: &mut [f32]) {
        let data = self.memory.data(&self.store);
        let base = ptr as usize;
        for (i, sample) in out.iter_mut().enumerate() {
            let at = base + i * 4;
            let mut bytes = [0u8; 4];
            bytes.copy_from_slice(&data[at..at + 4]);
            *sample = f32::from_le_bytes(bytes);
        }
    }

    /// Run one block through the module. All slices must share one length,
    /// at most the `max_block` given at load time.
    pub fn process_block(
        &mut self,
        left_in: &[f32],
        right_in: &[f32],
        left_out: &mut [f32],
        right_out: &mut [f32],
    ) -> Result<(), String> {
        let num_samples = left_in.len();
        debug_assert!(num_samples <= self.max_block);
        debug_assert_eq!(right_in.len(), num_samples);
        debug_assert_eq!(left_out.len(), num_samples);
        debug_assert_eq!(right_out.len(), num_samples);

        self.write_region(self.left_in_ptr, left_in);
        self.write_region(self.right_in_ptr, right_in);

        self.process
            .call(
                &mut self.store,
                (
                    self.left_in_ptr,
                    self.right_in_ptr,
                    self.left_out_ptr,
                    self.right_out_ptr,
                    num_samples as u32,
                ),
            )
            .map_err(|e| format!("wasm_process trapped: {}", e))?;

        self.read_region(self.left_out_ptr, left_out);
        self.read_region(self.right_out_ptr, right_out);
        Ok(())
    }

    /// Apply a scaled parameter value, converting to the module's units.
    /// Unknown names are ignored; a trapping setter is swallowed so the
    /// audio path keeps running.
    pub fn set_parameter(&mut self, name: &str, value: f32) {
        let result = match name {
            "delayTime" => self.set_delay_time.call(&mut self.store, value),
            "feedback" => self.set_feedback.call(&mut self.store, value / 100.0),
            "mix" => self.set_mix.call(&mut self.store, value / 100.0),
            "voices" => match &self.set_voices {
                Some(f) => f.call(&mut self.store, value as u32),
                None => Ok(()),
            },
            other => {
                debug!("Ignoring unknown parameter '{}'", other);
                Ok(())
            }
        };
        if let Err(e) = result {
            debug!("Parameter setter '{}' trapped: {}", name, e);
        }
    }

    pub fn has_voice_introspection(&self) -> bool {
        self.voices.is_some()
    }

    /// Number of currently active voices, 0 without introspection exports.
    pub fn voice_count(&mut self) -> u32 {
        match &self.voices {
            Some(v) => v.get_voice_count.call(&mut self.store, ()).unwrap_or(0),
            None => 0,
        }
    }

    /// Copy one voice's waveform out of the module. `None` when the module
    /// has no introspection exports or the call traps.
    pub fn voice_waveform(&mut self, index: u32) -> Option<Vec<f32>> {
        let (func, region, size) = match &self.voices {
            Some(v) => (
                v.get_voice_waveform.clone(),
                v.waveform_region,
                v.waveform_size,
            ),
            None => return None,
        };
        func.call(&mut self.store, (index, region)).ok()?;
        let mut out = vec![0.0f32; size];
        self.read_region(region, &mut out);
        Some(out)
    }

    pub fn max_block(&self) -> usize {
        self.max_block
    }
}

//! Standalone audition host: run a compiled DSP module against an audio file
//!
//! Usage: kodama-standalone <module.wasm> [audio-file]
//!
//! Loads the module, optionally loops the given file through it, and prints
//! a peak meter line for every waveform snapshot. Press Enter to quit.

use std::io::BufRead;
use std::path::Path;
use std::process;

use kodama_host::{AudioConfig, RuntimeError, StandaloneRuntime};

fn peak(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()))
}

fn run() -> Result<(), String> {
    let args: Vec<String> = std::env::args().collect();
    let module_path = args
        .get(1)
        .ok_or_else(|| format!("Usage: {} <module.wasm> [audio-file]", args[0]))?;
    let audio_path = args.get(2);

    let module_bytes = std::fs::read(module_path)
        .map_err(|e| format!("Failed to read '{}': {}", module_path, e))?;

    let runtime = StandaloneRuntime::new(AudioConfig::default());
    runtime
        .initialize(module_bytes)
        .map_err(|e| e.to_string())?;

    let _waveform_sub = runtime.on_waveform_data(Box::new(|snapshot| {
        let voices = snapshot
            .voice_count
            .map(|n| format!(", {} voices", n))
            .unwrap_or_default();
        println!(
            "in {:.3}  out {:.3}{}",
            peak(&snapshot.input),
            peak(&snapshot.output),
            voices
        );
    }));

    if let Some(path) = audio_path {
        let info = runtime
            .load_audio_file(Path::new(path))
            .map_err(|e| match e {
                RuntimeError::LoadFailure(msg) => msg,
                other => other.to_string(),
            })?;
        println!(
            "Playing '{}' ({:.1}s, {} Hz), looping. Press Enter to quit.",
            info.name, info.duration_secs, info.sample_rate
        );
        runtime.play();
    } else {
        println!("Module loaded, no audio file given. Press Enter to quit.");
    }

    let stdin = std::io::stdin();
    let mut line = String::new();
    let _ = stdin.lock().read_line(&mut line);

    runtime.stop();
    Ok(())
}

fn main() {
    env_logger::init();
    if let Err(e) = run() {
        eprintln!("{}", e);
        process::exit(1);
    }
}

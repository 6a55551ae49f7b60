//! Runtime backed by this process's own worker thread
//!
//! Parameters are owned locally: a write lands in the local cache first
//! (reads never consult the worker) and is then forwarded to the worker as a
//! fire-and-forget message. Waveform snapshots come back over the reply
//! channel and are fanned out to subscribers by a dispatch thread.

use log::{debug, info, warn};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::audition::{AudioSample, SampleInfo};
use crate::device::AudioConfig;
use crate::messages::{ControlMessage, ReplyMessage};
use crate::params::{
    ChangeCallback, Parameter, ParameterProperties, ParameterState, Subscription,
};
use crate::runtime::worker::{self, WorkerCommand, WorkerHandle, INIT_TIMEOUT};
use crate::runtime::{RuntimeError, WaveformCallback};

type WorkerSlot = Arc<Mutex<Option<Sender<WorkerCommand>>>>;

/// The standalone parameter table: id, descriptor, default scaled value.
fn default_parameters() -> Vec<(&'static str, ParameterProperties, f32)> {
    vec![
        (
            "delayTime",
            ParameterProperties::new("Delay Time", "ms", 0.0, 2000.0, 1.0),
            300.0,
        ),
        (
            "feedback",
            ParameterProperties::new("Feedback", "%", 0.0, 100.0, 0.1),
            30.0,
        ),
        (
            "mix",
            ParameterProperties::new("Mix", "%", 0.0, 100.0, 0.1),
            50.0,
        ),
        (
            "voices",
            ParameterProperties::new("Voices", "", 1.0, 16.0, 1.0),
            1.0,
        ),
    ]
}

/// A locally cached parameter that mirrors every write to the worker.
struct StandaloneParameter {
    id: String,
    inner: Parameter,
    worker: WorkerSlot,
}

impl StandaloneParameter {
    fn forward(&self) {
        if let Some(sender) = self.worker.lock().as_ref() {
            let _ = sender.send(WorkerCommand::SetParam {
                param: self.id.clone(),
                value: self.inner.scaled_value(),
            });
        }
    }
}

impl ParameterState for StandaloneParameter {
    fn properties(&self) -> ParameterProperties {
        self.inner.properties()
    }

    fn normalized_value(&self) -> f32 {
        self.inner.normalized_value()
    }

    fn set_normalized_value(&self, value: f32) {
        self.inner.set_normalized_value(value);
        self.forward();
    }

    fn scaled_value(&self) -> f32 {
        self.inner.scaled_value()
    }

    fn set_scaled_value(&self, value: f32) {
        self.inner.set_scaled_value(value);
        self.forward();
    }

    fn on_value_changed(&self, callback: ChangeCallback) -> Subscription {
        self.inner.on_value_changed(callback)
    }
}

type WaveformSubscribers = Arc<Mutex<Vec<(u64, WaveformCallback)>>>;

pub struct StandaloneRuntime {
    config: AudioConfig,
    params: Vec<(String, Arc<StandaloneParameter>)>,
    worker_tx: WorkerSlot,
    worker: Mutex<Option<WorkerHandle>>,
    dispatch: Mutex<Option<JoinHandle<()>>>,
    subscribers: WaveformSubscribers,
    next_subscriber_id: AtomicU64,
    initialized: AtomicBool,
    audio_loaded: AtomicBool,
    playing: AtomicBool,
}

impl StandaloneRuntime {
    pub fn new(config: AudioConfig) -> Self {
        let worker_tx: WorkerSlot = Arc::new(Mutex::new(None));
        let params = default_parameters()
            .into_iter()
            .map(|(id, props, default)| {
                (
                    id.to_string(),
                    Arc::new(StandaloneParameter {
                        id: id.to_string(),
                        inner: Parameter::new(props, default),
                        worker: Arc::clone(&worker_tx),
                    }),
                )
            })
            .collect();

        Self {
            config,
            params,
            worker_tx,
            worker: Mutex::new(None),
            dispatch: Mutex::new(None),
            subscribers: Arc::new(Mutex::new(Vec::new())),
            next_subscriber_id: AtomicU64::new(0),
            initialized: AtomicBool::new(false),
            audio_loaded: AtomicBool::new(false),
            playing: AtomicBool::new(false),
        }
    }

    /// Load the DSP module and bring up the audio worker. A failure here is
    /// final: the runtime stays uninitialized and must be reconstructed.
    pub fn initialize(&self, module_bytes: Vec<u8>) -> Result<(), RuntimeError> {
        let (handle, replies) = worker::spawn(module_bytes, self.config.clone());
        if let Err(e) = worker::await_ready(&replies, INIT_TIMEOUT) {
            // Leave the thread to wind down on its own; joining here could
            // block past the deadline we just enforced.
            handle.detach();
            return Err(e);
        }

        *self.worker_tx.lock() = Some(handle.command_sender());
        *self.worker.lock() = Some(handle);

        let subscribers = Arc::clone(&self.subscribers);
        let dispatch = thread::spawn(move || {
            while let Ok(reply) = replies.recv() {
                if let ReplyMessage::Waveform(snapshot) = reply {
                    let snapshot = Arc::new(snapshot);
                    for (_, callback) in subscribers.lock().iter() {
                        callback(Arc::clone(&snapshot));
                    }
                }
            }
        });
        *self.dispatch.lock() = Some(dispatch);

        // Push current values so the module starts from the cached state.
        for (_, param) in &self.params {
            param.forward();
        }

        self.initialized.store(true, Ordering::SeqCst);
        info!("Standalone runtime initialized");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Apply a wire-format control message, for frontends that speak the
    /// worker protocol directly.
    pub fn handle_message(&self, message: ControlMessage) -> Result<(), RuntimeError> {
        match message {
            ControlMessage::Init { module } => self.initialize(module),
            ControlMessage::SetParam { param, value } => {
                self.set_parameter(&param, value);
                Ok(())
            }
        }
    }

    pub fn get_parameter(&self, id: &str) -> Option<Arc<dyn ParameterState>> {
        self.params
            .iter()
            .find(|(param_id, _)| param_id == id)
            .map(|(_, param)| Arc::clone(param) as Arc<dyn ParameterState>)
    }

    pub fn parameter_ids(&self) -> Vec<String> {
        self.params.iter().map(|(id, _)| id.clone()).collect()
    }

    pub fn set_parameter(&self, id: &str, value: f32) {
        match self.params.iter().find(|(param_id, _)| param_id == id) {
            Some((_, param)) => param.set_scaled_value(value),
            None => debug!("Ignoring write to unknown parameter '{}'", id),
        }
    }

    pub fn on_waveform_data(&self, callback: WaveformCallback) -> Subscription {
        let id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().push((id, callback));

        let subscribers = Arc::clone(&self.subscribers);
        Subscription::new(move || {
            subscribers.lock().retain(|(sub_id, _)| *sub_id != id);
        })
    }

    pub fn load_audio_file(&self, path: &Path) -> Result<SampleInfo, RuntimeError> {
        if !self.is_initialized() {
            return Err(RuntimeError::NotInitialized);
        }
        let sample = AudioSample::load(path).map_err(RuntimeError::LoadFailure)?;
        let info = sample.info.clone();
        self.send(WorkerCommand::LoadSample(Box::new(sample)));
        self.audio_loaded.store(true, Ordering::SeqCst);
        self.playing.store(false, Ordering::SeqCst);
        Ok(info)
    }

    pub fn play(&self) {
        if !self.audio_loaded.load(Ordering::SeqCst) {
            warn!("Play requested with no audio loaded");
            return;
        }
        self.send(WorkerCommand::Play);
        self.playing.store(true, Ordering::SeqCst);
    }

    pub fn stop(&self) {
        self.send(WorkerCommand::Stop);
        self.playing.store(false, Ordering::SeqCst);
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    pub fn has_audio_loaded(&self) -> bool {
        self.audio_loaded.load(Ordering::SeqCst)
    }

    fn send(&self, command: WorkerCommand) {
        if let Some(sender) = self.worker_tx.lock().as_ref() {
            let _ = sender.send(command);
        }
    }
}

impl Default for StandaloneRuntime {
    fn default() -> Self {
        Self::new(AudioConfig::default())
    }
}

impl Drop for StandaloneRuntime {
    fn drop(&mut self) {
        *self.worker_tx.lock() = None;
        // Dropping the handle shuts the worker down, which closes the reply
        // channel and ends the dispatch thread.
        *self.worker.lock() = None;
        if let Some(dispatch) = self.dispatch.lock().take() {
            let _ = dispatch.join();
        }
    }
}

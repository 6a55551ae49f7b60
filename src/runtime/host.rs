//! Runtime backed by a native plugin host
//!
//! Under a plugin host the authoritative parameter values and the waveform
//! stream live on the host side. This module projects them through the same
//! interface the standalone runtime offers: [`HostParam`] and
//! [`HostBackend`] are the seams a concrete host integration implements.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::params::{ChangeCallback, ParameterProperties, ParameterState, Subscription};
use crate::runtime::WaveformCallback;
use crate::dsp::waveform::WaveformSnapshot;

/// One host-owned parameter. Values cross this boundary normalized; scaling
/// happens on our side from the properties record.
pub trait HostParam: Send + Sync {
    fn properties(&self) -> ParameterProperties;
    fn normalized_value(&self) -> f32;
    fn set_normalized_value(&self, value: f32);
    fn add_listener(&self, listener: ChangeCallback) -> u64;
    fn remove_listener(&self, id: u64);
}

/// The host connection: parameter lookup plus the waveform event feed.
pub trait HostBackend: Send + Sync {
    fn parameter(&self, id: &str) -> Option<Arc<dyn HostParam>>;
    fn add_waveform_listener(&self, listener: WaveformCallback) -> u64;
    fn remove_waveform_listener(&self, id: u64);
}

/// Projects one [`HostParam`] as a [`ParameterState`].
struct HostParameterState {
    param: Arc<dyn HostParam>,
}

impl ParameterState for HostParameterState {
    fn properties(&self) -> ParameterProperties {
        self.param.properties()
    }

    fn normalized_value(&self) -> f32 {
        self.param.normalized_value()
    }

    fn set_normalized_value(&self, value: f32) {
        self.param.set_normalized_value(value.clamp(0.0, 1.0));
    }

    fn scaled_value(&self) -> f32 {
        self.param
            .properties()
            .normalized_to_scaled(self.param.normalized_value())
    }

    fn set_scaled_value(&self, value: f32) {
        let normalized = self.param.properties().scaled_to_normalized(value);
        self.set_normalized_value(normalized);
    }

    fn on_value_changed(&self, callback: ChangeCallback) -> Subscription {
        let id = self.param.add_listener(callback);
        let param = Arc::clone(&self.param);
        Subscription::new(move || param.remove_listener(id))
    }
}

type Subscribers = Arc<Mutex<Vec<(u64, WaveformCallback)>>>;

// Shared waveform fan-out: one backend listener serves every subscriber,
// attached on the first subscription and detached with the last.
struct WaveformFanout {
    backend: Arc<dyn HostBackend>,
    subscribers: Subscribers,
    backend_listener: Mutex<Option<u64>>,
    next_id: AtomicU64,
}

impl WaveformFanout {
    fn new(backend: Arc<dyn HostBackend>) -> Self {
        Self {
            backend,
            subscribers: Arc::new(Mutex::new(Vec::new())),
            backend_listener: Mutex::new(None),
            next_id: AtomicU64::new(0),
        }
    }

    fn subscribe(self: &Arc<Self>, callback: WaveformCallback) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut subscribers = self.subscribers.lock();
            subscribers.push((id, callback));

            let mut listener = self.backend_listener.lock();
            if listener.is_none() {
                let subscribers = Arc::clone(&self.subscribers);
                let backend_id = self.backend.add_waveform_listener(Box::new(
                    move |snapshot: Arc<WaveformSnapshot>| {
                        for (_, callback) in subscribers.lock().iter() {
                            callback(Arc::clone(&snapshot));
                        }
                    },
                ));
                *listener = Some(backend_id);
            }
        }

        let fanout = Arc::clone(self);
        Subscription::new(move || fanout.unsubscribe(id))
    }

    fn unsubscribe(&self, id: u64) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|(sub_id, _)| *sub_id != id);
        if subscribers.is_empty() {
            if let Some(backend_id) = self.backend_listener.lock().take() {
                self.backend.remove_waveform_listener(backend_id);
            }
        }
    }
}

pub struct HostRuntime {
    backend: Arc<dyn HostBackend>,
    // Parameter projections are created once per id and shared.
    params: Mutex<HashMap<String, Arc<HostParameterState>>>,
    fanout: Arc<WaveformFanout>,
}

impl HostRuntime {
    pub fn new(backend: Arc<dyn HostBackend>) -> Self {
        Self {
            backend: Arc::clone(&backend),
            params: Mutex::new(HashMap::new()),
            fanout: Arc::new(WaveformFanout::new(backend)),
        }
    }

    pub fn get_parameter(&self, id: &str) -> Option<Arc<dyn ParameterState>> {
        let mut params = self.params.lock();
        if let Some(state) = params.get(id) {
            return Some(Arc::clone(state) as Arc<dyn ParameterState>);
        }
        let param = self.backend.parameter(id)?;
        let state = Arc::new(HostParameterState { param });
        params.insert(id.to_string(), Arc::clone(&state));
        Some(state)
    }

    pub fn set_parameter(&self, id: &str, value: f32) {
        match self.get_parameter(id) {
            Some(param) => param.set_scaled_value(value),
            None => log::debug!("Ignoring write to unknown host parameter '{}'", id),
        }
    }

    pub fn on_waveform_data(&self, callback: WaveformCallback) -> Subscription {
        self.fanout.subscribe(callback)
    }
}

//! Parameter descriptors and change-notified parameter state
//!
//! Both runtime variants expose parameters through the same [`ParameterState`]
//! contract: values can be read and written either normalized (0.0-1.0) or
//! scaled (real-world units), and every mutation notifies subscribers with the
//! new normalized value.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

/// Static description of one parameter: range, display metadata, step interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterProperties {
    pub start: f32,
    pub end: f32,
    pub name: String,
    pub label: String,
    pub interval: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skew: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_steps: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameter_index: Option<u32>,
}

impl ParameterProperties {
    pub fn new(name: &str, label: &str, start: f32, end: f32, interval: f32) -> Self {
        Self {
            start,
            end,
            name: name.to_string(),
            label: label.to_string(),
            interval,
            skew: None,
            num_steps: None,
            parameter_index: None,
        }
    }

    /// Map a normalized value (0.0-1.0) to the parameter's unit range.
    pub fn normalized_to_scaled(&self, normalized: f32) -> f32 {
        self.start + normalized * (self.end - self.start)
    }

    /// Map a scaled value back to 0.0-1.0.
    pub fn scaled_to_normalized(&self, scaled: f32) -> f32 {
        let span = self.end - self.start;
        if span.abs() < f32::EPSILON {
            0.0
        } else {
            (scaled - self.start) / span
        }
    }

    /// Format a scaled value for display: whole numbers for stepped
    /// parameters, one decimal place otherwise.
    pub fn display_value(&self, scaled: f32) -> String {
        if self.interval >= 1.0 {
            format!("{}", scaled.round() as i64)
        } else {
            format!("{:.1}", scaled)
        }
    }
}

/// Callback invoked with the new normalized value after a parameter change.
pub type ChangeCallback = Box<dyn Fn(f32) + Send + Sync>;

/// RAII handle returned by subscription methods; dropping it (or calling
/// [`Subscription::unsubscribe`]) removes the underlying listener.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn unsubscribe(self) {
        // Drop runs the cancel closure.
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

/// Uniform parameter access shared by both runtime variants.
pub trait ParameterState: Send + Sync {
    fn properties(&self) -> ParameterProperties;
    fn normalized_value(&self) -> f32;
    fn set_normalized_value(&self, value: f32);
    fn scaled_value(&self) -> f32;
    fn set_scaled_value(&self, value: f32);
    fn on_value_changed(&self, callback: ChangeCallback) -> Subscription;
}

// f32 values live in AtomicU32 as raw bit patterns for lock-free access.
#[inline]
fn f32_to_u32(f: f32) -> u32 {
    f.to_bits()
}

#[inline]
fn u32_to_f32(u: u32) -> f32 {
    f32::from_bits(u)
}

type SubscriberList = Arc<Mutex<Vec<(u64, ChangeCallback)>>>;

/// Locally owned parameter value with change notification. The standalone
/// runtime keeps one of these per parameter as its source of truth; the
/// host-backed runtime projects host-owned state instead.
pub struct Parameter {
    props: ParameterProperties,
    value_bits: AtomicU32,
    subscribers: SubscriberList,
    next_subscriber_id: AtomicU64,
}

impl Parameter {
    pub fn new(props: ParameterProperties, default_scaled: f32) -> Self {
        Self {
            props,
            value_bits: AtomicU32::new(f32_to_u32(default_scaled)),
            subscribers: Arc::new(Mutex::new(Vec::new())),
            next_subscriber_id: AtomicU64::new(0),
        }
    }

    fn notify(&self, normalized: f32) {
        for (_, callback) in self.subscribers.lock().iter() {
            callback(normalized);
        }
    }
}

impl ParameterState for Parameter {
    fn properties(&self) -> ParameterProperties {
        self.props.clone()
    }

    fn normalized_value(&self) -> f32 {
        self.props.scaled_to_normalized(self.scaled_value())
    }

    fn set_normalized_value(&self, value: f32) {
        let clamped = value.clamp(0.0, 1.0);
        self.set_scaled_value(self.props.normalized_to_scaled(clamped));
    }

    fn scaled_value(&self) -> f32 {
        u32_to_f32(self.value_bits.load(Ordering::Relaxed))
    }

    fn set_scaled_value(&self, value: f32) {
        self.value_bits.store(f32_to_u32(value), Ordering::Relaxed);
        self.notify(self.props.scaled_to_normalized(value));
    }

    fn on_value_changed(&self, callback: ChangeCallback) -> Subscription {
        let id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().push((id, callback));

        let subscribers = Arc::clone(&self.subscribers);
        Subscription::new(move || {
            subscribers.lock().retain(|(sub_id, _)| *sub_id != id);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn delay_time_props() -> ParameterProperties {
        ParameterProperties::new("Delay Time", "ms", 0.0, 2000.0, 1.0)
    }

    fn feedback_props() -> ParameterProperties {
        ParameterProperties::new("Feedback", "%", 0.0, 100.0, 0.1)
    }

    #[test]
    fn test_normalized_round_trip() {
        for props in [delay_time_props(), feedback_props()] {
            let param = Parameter::new(props, 0.0);
            for n in [0.0, 0.15, 0.5, 0.99, 1.0] {
                param.set_normalized_value(n);
                assert!((param.normalized_value() - n).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn test_normalized_clamping() {
        let param = Parameter::new(delay_time_props(), 300.0);

        param.set_normalized_value(-0.5);
        assert_eq!(param.scaled_value(), 0.0);

        param.set_normalized_value(1.7);
        assert_eq!(param.scaled_value(), 2000.0);
    }

    #[test]
    fn test_scaled_mapping() {
        let props = delay_time_props();
        assert_eq!(props.normalized_to_scaled(0.5), 1000.0);
        assert_eq!(props.scaled_to_normalized(500.0), 0.25);
    }

    #[test]
    fn test_display_rounding() {
        let stepped = delay_time_props();
        assert_eq!(stepped.display_value(299.7), "300");

        let continuous = feedback_props();
        assert_eq!(continuous.display_value(30.0), "30.0");
        assert_eq!(continuous.display_value(29.96), "30.0");
    }

    #[test]
    fn test_subscribers_receive_normalized_value() {
        let param = Parameter::new(feedback_props(), 30.0);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen_clone = Arc::clone(&seen);
        let _sub = param.on_value_changed(Box::new(move |n| {
            seen_clone.lock().push(n);
        }));

        param.set_scaled_value(50.0);
        param.set_normalized_value(0.25);

        let values = seen.lock();
        assert_eq!(values.len(), 2);
        assert!((values[0] - 0.5).abs() < 1e-6);
        assert!((values[1] - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_unsubscribe_stops_notifications() {
        let param = Parameter::new(feedback_props(), 30.0);
        let calls = Arc::new(AtomicUsize::new(0));

        let calls_clone = Arc::clone(&calls);
        let sub = param.on_value_changed(Box::new(move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        }));

        param.set_scaled_value(10.0);
        sub.unsubscribe();
        param.set_scaled_value(20.0);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

//! Worker thread owning the module, bridge, and output stream
//!
//! The worker performs the whole init sequence (device, module load, stream
//! start) and reports exactly one `Ready` or `Error` reply. Afterwards it
//! shuttles commands into the audio callback through an SPSC ring and
//! forwards emitted waveform snapshots back out as replies. Any init failure
//! is final; the thread exits and the worker is never reused.

use cpal::traits::{DeviceTrait, StreamTrait};
use log::{error, info, warn};
use ringbuf::{traits::*, HeapRb};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::audition::{AudioSample, SamplePlayer};
use crate::device::{self, AudioConfig};
use crate::dsp::bridge::{AudioBridge, MAX_BLOCK_SIZE};
use crate::dsp::module::WasmDsp;
use crate::messages::ReplyMessage;
use crate::runtime::RuntimeError;

/// How long initialization may take before the controlling side gives up.
pub const INIT_TIMEOUT: Duration = Duration::from_secs(5);

const COMMAND_RING_CAPACITY: usize = 64;
const SNAPSHOT_RING_CAPACITY: usize = 8;
const WORKER_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Commands accepted by a running worker.
pub enum WorkerCommand {
    SetParam { param: String, value: f32 },
    LoadSample(Box<AudioSample>),
    Play,
    Stop,
    Shutdown,
}

// Commands crossing into the audio callback.
enum RtCommand {
    Param { name: String, value: f32 },
    LoadSample(Box<AudioSample>),
    Play,
    Stop,
}

/// Handle to a spawned worker. Dropping it shuts the worker down.
pub struct WorkerHandle {
    commands: Sender<WorkerCommand>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn send(&self, command: WorkerCommand) {
        // Fire and forget: a dead worker just drops the message.
        let _ = self.commands.send(command);
    }

    pub fn command_sender(&self) -> Sender<WorkerCommand> {
        self.commands.clone()
    }

    /// Ask the worker to stop without waiting for it. Used when init has
    /// already missed its deadline and joining would block again.
    pub(crate) fn detach(mut self) {
        let _ = self.commands.send(WorkerCommand::Shutdown);
        self.thread = None;
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        let _ = self.commands.send(WorkerCommand::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Spawn the worker. Replies (the `Ready`/`Error` handshake followed by
/// waveform traffic) arrive on the returned receiver.
pub fn spawn(module_bytes: Vec<u8>, config: AudioConfig) -> (WorkerHandle, Receiver<ReplyMessage>) {
    let (command_tx, command_rx) = mpsc::channel();
    let (reply_tx, reply_rx) = mpsc::channel();

    let thread = thread::spawn(move || run(module_bytes, config, command_rx, reply_tx));

    (
        WorkerHandle {
            commands: command_tx,
            thread: Some(thread),
        },
        reply_rx,
    )
}

/// Block until the worker reports `Ready` or `Error`, bounded by `timeout`.
pub fn await_ready(
    replies: &Receiver<ReplyMessage>,
    timeout: Duration,
) -> Result<(), RuntimeError> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(RuntimeError::InitTimeout);
        }
        match replies.recv_timeout(remaining) {
            Ok(ReplyMessage::Ready) => return Ok(()),
            Ok(ReplyMessage::Error { message }) => return Err(RuntimeError::LoadFailure(message)),
            // Not expected before the handshake, but harmless.
            Ok(ReplyMessage::Waveform(_)) => continue,
            Err(RecvTimeoutError::Timeout) => return Err(RuntimeError::InitTimeout),
            Err(RecvTimeoutError::Disconnected) => {
                return Err(RuntimeError::LoadFailure("worker exited".to_string()))
            }
        }
    }
}

fn run(
    module_bytes: Vec<u8>,
    config: AudioConfig,
    commands: Receiver<WorkerCommand>,
    replies: Sender<ReplyMessage>,
) {
    let fail = |replies: &Sender<ReplyMessage>, message: String| {
        error!("Worker init failed: {}", message);
        let _ = replies.send(ReplyMessage::Error { message });
    };

    let device = match device::default_output_device() {
        Ok(d) => d,
        Err(e) => return fail(&replies, e),
    };
    let stream_config = match device::output_stream_config(&device, &config) {
        Ok(c) => c,
        Err(e) => return fail(&replies, e),
    };
    let sample_rate = stream_config.sample_rate.0;
    let channels = stream_config.channels as usize;

    let dsp = match WasmDsp::load(&module_bytes, sample_rate as f32, MAX_BLOCK_SIZE) {
        Ok(d) => d,
        Err(e) => return fail(&replies, e),
    };

    let mut bridge = AudioBridge::new();
    bridge.install_module(dsp);
    let mut player = SamplePlayer::new();

    let (mut rt_producer, mut rt_consumer) =
        HeapRb::<RtCommand>::new(COMMAND_RING_CAPACITY).split();
    let (mut snap_producer, mut snap_consumer) =
        HeapRb::<crate::dsp::waveform::WaveformSnapshot>::new(SNAPSHOT_RING_CAPACITY).split();

    let mut input_scratch = vec![0.0f32; MAX_BLOCK_SIZE * 2];

    let stream = match device.build_output_stream(
        &stream_config,
        move |data: &mut [f32], _| {
            while let Some(command) = rt_consumer.try_pop() {
                match command {
                    RtCommand::Param { name, value } => bridge.set_parameter(&name, value),
                    RtCommand::LoadSample(sample) => player.load(*sample, sample_rate),
                    RtCommand::Play => player.play(),
                    RtCommand::Stop => player.stop(),
                }
            }

            let frames = (data.len() / channels).min(MAX_BLOCK_SIZE);
            for i in 0..frames {
                let frame = player.next_frame();
                input_scratch[i * 2] = frame.left;
                input_scratch[i * 2 + 1] = frame.right;
            }

            let block = frames * channels;
            if let Some(snapshot) =
                bridge.process(&input_scratch[..frames * 2], 2, &mut data[..block], channels)
            {
                // Drop the frame if the consumer is behind.
                let _ = snap_producer.try_push(snapshot);
            }
            data[block..].fill(0.0);
        },
        |e| warn!("Audio stream error: {}", e),
        None,
    ) {
        Ok(s) => s,
        Err(e) => return fail(&replies, format!("Failed to build output stream: {}", e)),
    };

    if let Err(e) = stream.play() {
        return fail(&replies, format!("Failed to start output stream: {}", e));
    }

    info!(
        "Worker ready: {} Hz, {} channels, block limit {}",
        sample_rate, channels, MAX_BLOCK_SIZE
    );
    if replies.send(ReplyMessage::Ready).is_err() {
        return;
    }

    loop {
        while let Some(snapshot) = snap_consumer.try_pop() {
            if replies.send(ReplyMessage::Waveform(snapshot)).is_err() {
                return;
            }
        }
        match commands.recv_timeout(WORKER_POLL_INTERVAL) {
            Ok(WorkerCommand::SetParam { param, value }) => {
                let _ = rt_producer.try_push(RtCommand::Param { name: param, value });
            }
            Ok(WorkerCommand::LoadSample(sample)) => {
                let _ = rt_producer.try_push(RtCommand::LoadSample(sample));
            }
            Ok(WorkerCommand::Play) => {
                let _ = rt_producer.try_push(RtCommand::Play);
            }
            Ok(WorkerCommand::Stop) => {
                let _ = rt_producer.try_push(RtCommand::Stop);
            }
            Ok(WorkerCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => continue,
        }
    }
    info!("Worker shutting down");
    drop(stream);
}

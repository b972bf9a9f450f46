//! Audio capture from input devices
//!
//! [`CaptureStream`] wraps one open input stream for one device and one
//! activity. The cpal backend keeps each `cpal::Stream` on a dedicated thread,
//! since streams are not `Send` on every platform; the control side talks to
//! that thread over a small command channel.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::{bounded, Sender};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::buffer::Frame;
use crate::audio::device::{DeviceCatalog, DeviceId, StreamParams};
use crate::constants::STREAM_OPEN_TIMEOUT_MS;
use crate::error::AudioError;

/// Raw sample callback, runs on the driver thread
pub type DataCallback = Box<dyn FnMut(&[f32]) + Send + 'static>;

/// Asynchronous stream error callback, runs on the driver thread
pub type ErrorCallback = Box<dyn FnMut(String) + Send + 'static>;

/// Receiver of frames from a [`CaptureStream`]
///
/// Called on the driver thread: must not block or do I/O.
pub type FrameSink = Box<dyn FnMut(Frame<'_>) + Send + 'static>;

/// Backend handle for one open input stream
pub trait InputStream: Send {
    /// Begin delivering data
    fn start(&mut self) -> Result<(), AudioError>;

    /// Stop delivering data and release the device. Idempotent.
    fn stop(&mut self);
}

/// One open input stream bound to a device
pub struct CaptureStream {
    device: DeviceId,
    params: StreamParams,
    inner: Box<dyn InputStream>,
    running: bool,
    frames_delivered: Arc<AtomicU64>,
}

impl CaptureStream {
    /// Open a stream on `device`, routing every delivery into `sink`
    pub fn open(
        catalog: &dyn DeviceCatalog,
        device: &DeviceId,
        params: StreamParams,
        mut sink: FrameSink,
        on_error: ErrorCallback,
    ) -> Result<Self, AudioError> {
        let frames_delivered = Arc::new(AtomicU64::new(0));
        let counter = frames_delivered.clone();
        let id = device.clone();
        let channels = params.channels;

        let on_data: DataCallback = Box::new(move |samples: &[f32]| {
            let sequence = counter.fetch_add(1, Ordering::Relaxed);
            sink(Frame {
                device: &id,
                samples,
                channels,
                sequence,
            });
        });

        let inner = catalog.open(device, params, on_data, on_error)?;
        tracing::debug!(device = %device, channels, "Stream opened");

        Ok(Self {
            device: device.clone(),
            params,
            inner,
            running: false,
            frames_delivered,
        })
    }

    /// Start capturing audio
    pub fn start(&mut self) -> Result<(), AudioError> {
        if self.running {
            return Ok(());
        }
        self.inner.start()?;
        self.running = true;
        tracing::debug!(device = %self.device, "Stream started");
        Ok(())
    }

    /// Stop capturing audio. Safe after a failed start and when repeated.
    pub fn stop(&mut self) {
        self.inner.stop();
        if self.running {
            tracing::debug!(device = %self.device, "Stream stopped");
        }
        self.running = false;
    }

    /// Check if capture is running
    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn device(&self) -> &DeviceId {
        &self.device
    }

    /// Get channel count
    pub fn channels(&self) -> u16 {
        self.params.channels
    }

    /// Get sample rate
    pub fn sample_rate(&self) -> u32 {
        self.params.sample_rate
    }

    /// Deliveries seen so far
    pub fn frames_delivered(&self) -> u64 {
        self.frames_delivered.load(Ordering::Relaxed)
    }
}

impl Drop for CaptureStream {
    fn drop(&mut self) {
        self.stop();
    }
}

enum StreamCommand {
    Play(Sender<Result<(), AudioError>>),
    Stop,
}

/// cpal input stream owned by its own thread
pub struct CpalInputStream {
    device: DeviceId,
    commands: Option<Sender<StreamCommand>>,
    thread_handle: Option<JoinHandle<()>>,
}

impl CpalInputStream {
    /// Build the stream on a dedicated thread and wait for the driver's verdict
    pub fn open(
        id: DeviceId,
        device: cpal::Device,
        params: StreamParams,
        mut on_data: DataCallback,
        mut on_error: ErrorCallback,
    ) -> Result<Self, AudioError> {
        let config = StreamConfig {
            channels: params.channels,
            sample_rate: cpal::SampleRate(params.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);
        let (command_tx, command_rx) = bounded::<StreamCommand>(4);
        let thread_id = id.clone();
        let error_id = id.clone();

        let handle = thread::Builder::new()
            .name(format!("capture-{}", id))
            .spawn(move || {
                let stream = device.build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| on_data(data),
                    move |err| match device_lost(err) {
                        Ok(reason) => on_error(reason),
                        Err(glitch) => {
                            tracing::warn!(device = %error_id, "Stream error, still capturing: {}", glitch);
                        }
                    },
                    None,
                );

                let stream = match stream {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(AudioError::DeviceOpen {
                            device: thread_id,
                            reason: e.to_string(),
                        }));
                        return;
                    }
                };

                // Stream lives until Stop or until the handle is dropped
                while let Ok(command) = command_rx.recv() {
                    match command {
                        StreamCommand::Play(reply) => {
                            let result = stream
                                .play()
                                .map_err(|e| AudioError::StreamError(e.to_string()));
                            let _ = reply.send(result);
                        }
                        StreamCommand::Stop => break,
                    }
                }

                if let Err(e) = stream.pause() {
                    tracing::debug!(device = %thread_id, "Pause before close failed: {}", e);
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        let mut stream = Self {
            device: id.clone(),
            commands: Some(command_tx),
            thread_handle: Some(handle),
        };

        match ready_rx.recv_timeout(Duration::from_millis(STREAM_OPEN_TIMEOUT_MS)) {
            Ok(Ok(())) => Ok(stream),
            Ok(Err(e)) => {
                stream.stop();
                Err(e)
            }
            Err(_) => {
                // Leave a hung driver thread behind rather than block the caller
                stream.commands = None;
                stream.thread_handle = None;
                Err(AudioError::DeviceOpen {
                    device: id,
                    reason: "timed out waiting for the driver".to_string(),
                })
            }
        }
    }
}

/// Split driver errors into device loss (`Ok`) and recoverable glitches (`Err`)
///
/// Only a vanished device ends the stream; cpal keeps delivering after a
/// backend-specific error such as an xrun.
fn device_lost(err: cpal::StreamError) -> Result<String, String> {
    match err {
        cpal::StreamError::DeviceNotAvailable => Ok(err.to_string()),
        cpal::StreamError::BackendSpecific { err } => Err(err.description),
    }
}

impl InputStream for CpalInputStream {
    fn start(&mut self) -> Result<(), AudioError> {
        let commands = self
            .commands
            .as_ref()
            .ok_or_else(|| AudioError::StreamError(format!("{} is closed", self.device)))?;

        let (reply_tx, reply_rx) = bounded(1);
        commands
            .send(StreamCommand::Play(reply_tx))
            .map_err(|_| AudioError::StreamError(format!("{} stream thread exited", self.device)))?;

        reply_rx
            .recv_timeout(Duration::from_millis(STREAM_OPEN_TIMEOUT_MS))
            .map_err(|_| AudioError::StreamError(format!("{} did not start in time", self.device)))?
    }

    fn stop(&mut self) {
        if let Some(commands) = self.commands.take() {
            let _ = commands.send(StreamCommand::Stop);
        }
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                tracing::warn!(device = %self.device, "Capture thread panicked");
            }
        }
    }
}

impl Drop for CpalInputStream {
    fn drop(&mut self) {
        self.stop();
    }
}

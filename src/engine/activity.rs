//! One capture activity: its streams, its buffers and its generation gate
//!
//! Every start opens a new generation. Sinks remember the generation they
//! were registered under and only write while it is still the live one, so a
//! callback that races a stop can never touch a buffer afterwards.

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::audio::buffer::{Frame, RingBuffer, SessionBuffer};
use crate::audio::capture::{CaptureStream, ErrorCallback, FrameSink};
use crate::audio::device::{DeviceCatalog, DeviceId, StreamParams};
use crate::engine::ActivityKind;
use crate::error::{AudioError, EngineError};

/// Storage a capture sink writes into
pub(crate) trait CaptureBuffer: Send + 'static {
    fn write(&mut self, samples: &[f32]);

    /// Frames currently held
    fn frames(&self) -> usize;

    /// Fixed window size, if the buffer has one
    fn capacity(&self) -> Option<usize> {
        None
    }

    fn set_attached(&mut self, _attached: bool) {}
}

impl CaptureBuffer for RingBuffer {
    fn write(&mut self, samples: &[f32]) {
        self.push(samples);
    }

    fn frames(&self) -> usize {
        self.len()
    }

    fn capacity(&self) -> Option<usize> {
        Some(RingBuffer::capacity(self))
    }

    fn set_attached(&mut self, attached: bool) {
        RingBuffer::set_attached(self, attached);
    }
}

impl CaptureBuffer for SessionBuffer {
    fn write(&mut self, samples: &[f32]) {
        self.append(samples);
    }

    fn frames(&self) -> usize {
        self.len()
    }
}

/// Asynchronous stream error, tagged with where it came from
#[derive(Debug, Clone)]
pub(crate) struct StreamEvent {
    pub kind: ActivityKind,
    pub generation: u64,
    pub device: DeviceId,
    pub reason: String,
}

/// Buffer and naming data for one device of an activity
pub(crate) struct DeviceSlot<B> {
    pub name: String,
    pub channels: u16,
    pub buffer: Arc<Mutex<B>>,
}

pub(crate) struct Activity<B> {
    kind: ActivityKind,
    live: Arc<AtomicU64>,
    generation: u64,
    active: bool,
    streams: BTreeMap<DeviceId, CaptureStream>,
    slots: BTreeMap<DeviceId, DeviceSlot<B>>,
    /// Failures of the live generation, at most one per stream
    failures: Option<Receiver<StreamEvent>>,
}

impl<B: CaptureBuffer> Activity<B> {
    pub fn new(kind: ActivityKind) -> Self {
        Self {
            kind,
            live: Arc::new(AtomicU64::new(0)),
            generation: 0,
            active: false,
            streams: BTreeMap::new(),
            slots: BTreeMap::new(),
            failures: None,
        }
    }

    /// Open and start a stream per device, or nothing at all
    pub fn start(
        &mut self,
        catalog: &dyn DeviceCatalog,
        devices: &[DeviceId],
        sample_rate: u32,
        make_buffer: &mut dyn FnMut(u16) -> B,
    ) -> Result<(), EngineError> {
        if self.active {
            return Err(EngineError::AlreadyActive(self.kind));
        }
        if devices.is_empty() {
            return Err(EngineError::NoDevices(self.kind));
        }

        let generation = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        // Every stream reports at most once, so this can never fill up
        let (failures_tx, failures_rx) = bounded(devices.len());
        let mut streams = BTreeMap::new();
        let mut slots = BTreeMap::new();

        for device in devices {
            if streams.contains_key(device) {
                continue;
            }
            match self.open_device(
                catalog,
                device,
                sample_rate,
                generation,
                &failures_tx,
                make_buffer,
            ) {
                Ok((stream, slot)) => {
                    streams.insert(device.clone(), stream);
                    slots.insert(device.clone(), slot);
                }
                Err(source) => {
                    self.abort(streams);
                    return Err(EngineError::DeviceOpen {
                        kind: self.kind,
                        device: device.clone(),
                        source,
                    });
                }
            }
        }

        let mut failed = None;
        for (device, stream) in streams.iter_mut() {
            if let Err(source) = stream.start() {
                failed = Some((device.clone(), source));
                break;
            }
        }
        if let Some((device, source)) = failed {
            self.abort(streams);
            return Err(EngineError::DeviceOpen {
                kind: self.kind,
                device,
                source,
            });
        }

        for slot in slots.values() {
            slot.buffer.lock().set_attached(true);
        }

        tracing::info!(kind = %self.kind, devices = streams.len(), generation, "Activity started");
        self.generation = generation;
        self.streams = streams;
        self.slots = slots;
        self.failures = Some(failures_rx);
        self.active = true;
        Ok(())
    }

    fn open_device(
        &self,
        catalog: &dyn DeviceCatalog,
        device: &DeviceId,
        sample_rate: u32,
        generation: u64,
        failures: &Sender<StreamEvent>,
        make_buffer: &mut dyn FnMut(u16) -> B,
    ) -> Result<(CaptureStream, DeviceSlot<B>), AudioError> {
        let caps = catalog.capabilities(device)?;
        let channels = caps.capture_channels();
        if channels == 0 {
            return Err(AudioError::DeviceOpen {
                device: device.clone(),
                reason: "device has no input channels".to_string(),
            });
        }

        let buffer = Arc::new(Mutex::new(make_buffer(channels)));
        let sink = dispatch_sink(buffer.clone(), self.live.clone(), generation);
        let on_error = failure_reporter(failures.clone(), self.kind, generation, device.clone());
        let params = StreamParams {
            channels,
            sample_rate,
        };

        let stream = CaptureStream::open(catalog, device, params, sink, on_error)?;
        Ok((
            stream,
            DeviceSlot {
                name: caps.name,
                channels,
                buffer,
            },
        ))
    }

    /// Tear down a half-started activity
    fn abort(&self, streams: BTreeMap<DeviceId, CaptureStream>) {
        self.live.fetch_add(1, Ordering::SeqCst);
        for (device, mut stream) in streams {
            stream.stop();
            tracing::debug!(kind = %self.kind, device = %device, "Closed stream after failed start");
        }
    }

    /// Stop every stream and hand back the buffers
    pub fn stop(&mut self) -> BTreeMap<DeviceId, DeviceSlot<B>> {
        if !self.active {
            return BTreeMap::new();
        }

        self.live.fetch_add(1, Ordering::SeqCst);
        // Taking each lock once waits out any sink that passed the gate check
        for slot in self.slots.values() {
            slot.buffer.lock().set_attached(false);
        }

        for (device, mut stream) in std::mem::take(&mut self.streams) {
            stream.stop();
            tracing::debug!(kind = %self.kind, device = %device, frames = stream.frames_delivered(), "Stream closed");
        }

        self.active = false;
        self.failures = None;
        tracing::info!(kind = %self.kind, generation = self.generation, "Activity stopped");
        std::mem::take(&mut self.slots)
    }

    /// Drop a failed device's stream, keeping what it already captured
    ///
    /// Returns the number of streams still running, or `None` if the device
    /// was not part of the live generation.
    pub fn remove_device(&mut self, generation: u64, device: &DeviceId) -> Option<usize> {
        if !self.active || generation != self.generation {
            return None;
        }
        let mut stream = self.streams.remove(device)?;
        stream.stop();
        if let Some(slot) = self.slots.get(device) {
            slot.buffer.lock().set_attached(false);
        }
        Some(self.streams.len())
    }

    /// Take every failure reported since the last call
    pub fn drain_failures(&self) -> Vec<StreamEvent> {
        self.failures
            .as_ref()
            .map(|failures| failures.try_iter().collect())
            .unwrap_or_default()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Devices with a running stream
    pub fn devices(&self) -> Vec<DeviceId> {
        self.streams.keys().cloned().collect()
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    pub fn slots(&self) -> &BTreeMap<DeviceId, DeviceSlot<B>> {
        &self.slots
    }

    pub fn slot_name(&self, device: &DeviceId) -> Option<&str> {
        self.slots.get(device).map(|slot| slot.name.as_str())
    }
}

impl<B> Drop for Activity<B> {
    fn drop(&mut self) {
        self.live.fetch_add(1, Ordering::SeqCst);
    }
}

fn dispatch_sink<B: CaptureBuffer>(
    buffer: Arc<Mutex<B>>,
    live: Arc<AtomicU64>,
    generation: u64,
) -> FrameSink {
    Box::new(move |frame: Frame<'_>| {
        let mut buffer = buffer.lock();
        if live.load(Ordering::Acquire) == generation {
            buffer.write(frame.samples);
        }
    })
}

fn failure_reporter(
    failures: Sender<StreamEvent>,
    kind: ActivityKind,
    generation: u64,
    device: DeviceId,
) -> ErrorCallback {
    let mut reported = false;
    Box::new(move |reason: String| {
        // Drivers may keep raising errors for a lost device; only the first counts
        if reported {
            return;
        }
        reported = true;
        let _ = failures.try_send(StreamEvent {
            kind,
            generation,
            device: device.clone(),
            reason,
        });
    })
}

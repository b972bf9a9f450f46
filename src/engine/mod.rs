//! Multi-device capture engine
//!
//! Owns the streams and buffers of the two independent activities:
//! recording (one [`SessionBuffer`] per device) and buffering (one
//! [`RingBuffer`] per device). A device may back both at once through two
//! separately opened streams; frames of the two are only time-proximate.

mod activity;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::audio::buffer::{CapturedAudio, RingBuffer, SessionBuffer};
use crate::audio::device::{DeviceCatalog, DeviceId};
use crate::constants::{DEFAULT_BUFFER_MINUTES, SAMPLE_RATE, SESSION_BLOCK_SECONDS};
use crate::error::EngineError;

use activity::{Activity, CaptureBuffer, DeviceSlot, StreamEvent};

/// The two capture lifecycles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    Recording,
    Buffering,
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActivityKind::Recording => f.write_str("recording"),
            ActivityKind::Buffering => f.write_str("buffering"),
        }
    }
}

/// Per-start capture parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivityParams {
    pub sample_rate: u32,
    /// Instant-replay window, used by buffering only
    pub buffer_minutes: u32,
}

impl Default for ActivityParams {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            buffer_minutes: DEFAULT_BUFFER_MINUTES,
        }
    }
}

impl ActivityParams {
    /// Ring buffer window in sample frames
    pub fn ring_capacity_frames(&self) -> usize {
        self.sample_rate as usize * self.buffer_minutes as usize * 60
    }
}

/// Audio collected for one device, ready for export
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceAudio {
    pub device: DeviceId,
    pub name: String,
    pub audio: CapturedAudio,
}

/// Device lost while its activity kept running
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamFailure {
    pub kind: ActivityKind,
    pub device: DeviceId,
    pub name: String,
    pub reason: String,
    /// Streams of the activity still running after this failure
    pub remaining: usize,
}

/// Fill state of one device buffer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BufferStatus {
    pub kind: ActivityKind,
    pub device: DeviceId,
    pub channels: u16,
    pub frames: usize,
    pub capacity: Option<usize>,
}

/// Owner of every capture stream and buffer
pub struct CaptureEngine {
    catalog: Arc<dyn DeviceCatalog>,
    recording: Activity<SessionBuffer>,
    buffering: Activity<RingBuffer>,
    /// Session buffers of a stopped recording awaiting drain
    finished_sessions: BTreeMap<DeviceId, DeviceSlot<SessionBuffer>>,
}

impl CaptureEngine {
    pub fn new(catalog: Arc<dyn DeviceCatalog>) -> Self {
        Self {
            catalog,
            recording: Activity::new(ActivityKind::Recording),
            buffering: Activity::new(ActivityKind::Buffering),
            finished_sessions: BTreeMap::new(),
        }
    }

    pub fn catalog(&self) -> &Arc<dyn DeviceCatalog> {
        &self.catalog
    }

    /// Open and start one stream per device for `kind`
    ///
    /// All or nothing: if any device fails to open or start, the streams
    /// already opened by this call are closed and the error is returned.
    pub fn start_activity(
        &mut self,
        kind: ActivityKind,
        devices: &[DeviceId],
        params: ActivityParams,
    ) -> Result<(), EngineError> {
        let catalog = self.catalog.as_ref();
        let sample_rate = params.sample_rate;
        match kind {
            ActivityKind::Recording => {
                let block_frames = sample_rate as usize * SESSION_BLOCK_SECONDS;
                self.recording.start(
                    catalog,
                    devices,
                    sample_rate,
                    &mut |channels| SessionBuffer::new(channels, block_frames),
                )
            }
            ActivityKind::Buffering => {
                let capacity = params.ring_capacity_frames();
                self.buffering.start(
                    catalog,
                    devices,
                    sample_rate,
                    &mut |channels| RingBuffer::new(capacity, channels),
                )
            }
        }
    }

    /// Stop every stream of `kind`
    ///
    /// Recording buffers are kept for [`drain_sessions`](Self::drain_sessions);
    /// ring buffers are discarded.
    pub fn stop_activity(&mut self, kind: ActivityKind) {
        match kind {
            ActivityKind::Recording => {
                let slots = self.recording.stop();
                self.finished_sessions.extend(slots);
            }
            ActivityKind::Buffering => {
                for slot in self.buffering.stop().into_values() {
                    slot.buffer.lock().clear();
                }
            }
        }
    }

    /// Take the audio of the last stopped recording, resetting its buffers
    pub fn drain_sessions(&mut self) -> Vec<DeviceAudio> {
        std::mem::take(&mut self.finished_sessions)
            .into_iter()
            .map(|(device, slot)| DeviceAudio {
                audio: slot.buffer.lock().drain(),
                name: slot.name,
                device,
            })
            .collect()
    }

    /// Copy every live ring buffer without interrupting capture
    pub fn snapshot_buffers(&self) -> Vec<DeviceAudio> {
        self.buffering
            .slots()
            .iter()
            .map(|(device, slot)| DeviceAudio {
                device: device.clone(),
                name: slot.name.clone(),
                audio: slot.buffer.lock().snapshot(),
            })
            .collect()
    }

    /// Remove a failed device from `kind`, leaving the other devices running
    pub fn handle_stream_failure(
        &mut self,
        kind: ActivityKind,
        device: &DeviceId,
        reason: impl Into<String>,
    ) -> Option<StreamFailure> {
        let generation = match kind {
            ActivityKind::Recording => self.recording.generation(),
            ActivityKind::Buffering => self.buffering.generation(),
        };
        self.remove_failed(kind, generation, device, reason.into())
    }

    fn remove_failed(
        &mut self,
        kind: ActivityKind,
        generation: u64,
        device: &DeviceId,
        reason: String,
    ) -> Option<StreamFailure> {
        let (remaining, name) = match kind {
            ActivityKind::Recording => (
                self.recording.remove_device(generation, device)?,
                self.recording.slot_name(device),
            ),
            ActivityKind::Buffering => (
                self.buffering.remove_device(generation, device)?,
                self.buffering.slot_name(device),
            ),
        };
        let name = name.unwrap_or(device.as_str()).to_string();

        tracing::error!(kind = %kind, device = %device, remaining, "Stream failed: {}", reason);
        Some(StreamFailure {
            kind,
            device: device.clone(),
            name,
            reason,
            remaining,
        })
    }

    /// Apply every queued asynchronous stream failure
    ///
    /// Failures from streams of an earlier generation are ignored.
    pub fn poll_stream_failures(&mut self) -> Vec<StreamFailure> {
        let mut events: Vec<StreamEvent> = self.recording.drain_failures();
        events.extend(self.buffering.drain_failures());
        events
            .into_iter()
            .filter_map(|event| {
                self.remove_failed(event.kind, event.generation, &event.device, event.reason)
            })
            .collect()
    }

    pub fn is_active(&self, kind: ActivityKind) -> bool {
        match kind {
            ActivityKind::Recording => self.recording.is_active(),
            ActivityKind::Buffering => self.buffering.is_active(),
        }
    }

    /// Devices with a running stream for `kind`
    pub fn active_devices(&self, kind: ActivityKind) -> Vec<DeviceId> {
        match kind {
            ActivityKind::Recording => self.recording.devices(),
            ActivityKind::Buffering => self.buffering.devices(),
        }
    }

    pub fn stream_count(&self, kind: ActivityKind) -> usize {
        match kind {
            ActivityKind::Recording => self.recording.stream_count(),
            ActivityKind::Buffering => self.buffering.stream_count(),
        }
    }

    /// Fill state of every buffer of `kind`
    pub fn buffer_status(&self, kind: ActivityKind) -> Vec<BufferStatus> {
        match kind {
            ActivityKind::Recording => collect_status(kind, self.recording.slots()),
            ActivityKind::Buffering => collect_status(kind, self.buffering.slots()),
        }
    }
}

impl Drop for CaptureEngine {
    fn drop(&mut self) {
        self.stop_activity(ActivityKind::Recording);
        self.stop_activity(ActivityKind::Buffering);
    }
}

fn collect_status<B: CaptureBuffer>(
    kind: ActivityKind,
    slots: &BTreeMap<DeviceId, DeviceSlot<B>>,
) -> Vec<BufferStatus> {
    slots
        .iter()
        .map(|(device, slot)| {
            let buffer = slot.buffer.lock();
            BufferStatus {
                kind,
                device: device.clone(),
                channels: slot.channels,
                frames: buffer.frames(),
                capacity: buffer.capacity(),
            }
        })
        .collect()
}

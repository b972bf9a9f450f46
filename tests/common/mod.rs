//! In-memory device catalog for integration tests
//!
//! Streams never run on their own; tests push audio with [`FakeCatalog::deliver`]
//! and raise driver errors with [`FakeCatalog::fail`].

#![allow(dead_code)]

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use multitrack_recorder::audio::capture::{DataCallback, ErrorCallback, InputStream};
use multitrack_recorder::audio::device::{
    DeviceCapabilities, DeviceCatalog, DeviceId, StreamParams,
};
use multitrack_recorder::error::AudioError;

#[derive(Debug, Clone)]
struct FakeDevice {
    name: String,
    channels: u16,
    fail_open: bool,
    fail_start: bool,
}

struct StreamState {
    device: DeviceId,
    channels: u16,
    started: AtomicBool,
    closed: AtomicBool,
    on_data: Mutex<DataCallback>,
    on_error: Mutex<ErrorCallback>,
}

struct FakeStream {
    state: Arc<StreamState>,
    fail_start: bool,
}

impl InputStream for FakeStream {
    fn start(&mut self) -> Result<(), AudioError> {
        if self.fail_start {
            return Err(AudioError::StreamError(format!(
                "{} refused to start",
                self.state.device
            )));
        }
        self.state.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) {
        self.state.started.store(false, Ordering::SeqCst);
        self.state.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakeCatalog {
    devices: Mutex<BTreeMap<DeviceId, FakeDevice>>,
    streams: Mutex<Vec<Arc<StreamState>>>,
}

impl FakeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_devices(devices: &[(&str, &str, u16)]) -> Arc<Self> {
        let catalog = Self::new();
        for (id, name, channels) in devices {
            catalog.add_device(id, name, *channels);
        }
        Arc::new(catalog)
    }

    pub fn add_device(&self, id: &str, name: &str, channels: u16) {
        self.devices.lock().insert(
            DeviceId::new(id),
            FakeDevice {
                name: name.to_string(),
                channels,
                fail_open: false,
                fail_start: false,
            },
        );
    }

    /// Make every later open of `id` fail, including probes
    pub fn set_fail_open(&self, id: &str, fail: bool) {
        if let Some(device) = self.devices.lock().get_mut(&DeviceId::new(id)) {
            device.fail_open = fail;
        }
    }

    /// Let `id` open but refuse to start
    pub fn set_fail_start(&self, id: &str, fail: bool) {
        if let Some(device) = self.devices.lock().get_mut(&DeviceId::new(id)) {
            device.fail_start = fail;
        }
    }

    fn matching(&self, id: &str, open: bool) -> Vec<Arc<StreamState>> {
        let device = DeviceId::new(id);
        self.streams
            .lock()
            .iter()
            .filter(|s| s.device == device && s.closed.load(Ordering::SeqCst) != open)
            .filter(|s| !open || s.started.load(Ordering::SeqCst))
            .cloned()
            .collect()
    }

    /// Feed interleaved samples to every running stream of `id`
    pub fn deliver(&self, id: &str, samples: &[f32]) -> usize {
        let streams = self.matching(id, true);
        for stream in &streams {
            let mut on_data = stream.on_data.lock();
            (*on_data)(samples);
        }
        streams.len()
    }

    /// Feed samples through callbacks of streams already closed, like a
    /// driver callback racing a stop
    pub fn deliver_late(&self, id: &str, samples: &[f32]) -> usize {
        let streams = self.matching(id, false);
        for stream in &streams {
            let mut on_data = stream.on_data.lock();
            (*on_data)(samples);
        }
        streams.len()
    }

    /// Raise a driver error on every running stream of `id`
    pub fn fail(&self, id: &str, reason: &str) -> usize {
        let streams = self.matching(id, true);
        for stream in &streams {
            let mut on_error = stream.on_error.lock();
            (*on_error)(reason.to_string());
        }
        streams.len()
    }

    /// Raise a driver error from streams that were already closed
    pub fn fail_closed(&self, id: &str, reason: &str) -> usize {
        let streams = self.matching(id, false);
        for stream in &streams {
            let mut on_error = stream.on_error.lock();
            (*on_error)(reason.to_string());
        }
        streams.len()
    }

    /// Streams opened and not yet stopped
    pub fn open_streams(&self) -> usize {
        self.streams
            .lock()
            .iter()
            .filter(|s| !s.closed.load(Ordering::SeqCst))
            .count()
    }

    /// Channel counts streams of `id` were opened with, oldest first
    pub fn opened_channels(&self, id: &str) -> Vec<u16> {
        let device = DeviceId::new(id);
        self.streams
            .lock()
            .iter()
            .filter(|s| s.device == device)
            .map(|s| s.channels)
            .collect()
    }
}

impl DeviceCatalog for FakeCatalog {
    fn capabilities(&self, device: &DeviceId) -> Result<DeviceCapabilities, AudioError> {
        let devices = self.devices.lock();
        let entry = devices
            .get(device)
            .ok_or_else(|| AudioError::DeviceNotFound(device.to_string()))?;
        Ok(DeviceCapabilities {
            name: entry.name.clone(),
            max_input_channels: entry.channels,
        })
    }

    fn open(
        &self,
        device: &DeviceId,
        params: StreamParams,
        on_data: DataCallback,
        on_error: ErrorCallback,
    ) -> Result<Box<dyn InputStream>, AudioError> {
        let entry = self
            .devices
            .lock()
            .get(device)
            .cloned()
            .ok_or_else(|| AudioError::DeviceNotFound(device.to_string()))?;
        if entry.fail_open {
            return Err(AudioError::DeviceOpen {
                device: device.clone(),
                reason: "device busy".to_string(),
            });
        }

        let state = Arc::new(StreamState {
            device: device.clone(),
            channels: params.channels,
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            on_data: Mutex::new(on_data),
            on_error: Mutex::new(on_error),
        });
        self.streams.lock().push(state.clone());
        Ok(Box::new(FakeStream {
            state,
            fail_start: entry.fail_start,
        }))
    }
}

/// `seconds` of a constant mono signal at 44.1 kHz
pub fn mono_seconds(seconds: usize, value: f32) -> Vec<f32> {
    vec![value; seconds * 44_100]
}

//! Mode controller: the recording / buffering state machine
//!
//! ```text
//!            toggle_recording                      toggle_buffering
//!   Idle ◀──────────────────▶ Recording    Idle ◀──────────────────▶ Buffering
//!     │                          ▲  │                                  │  ▲
//!     │ toggle_recording         │  │ toggle_buffering                 │  │
//!     │ (instant replay on)      │  ▼                 toggle_recording │  │
//!     └──────────────────▶ RecordingAndBuffering ◀─────────────────────┘  │
//!                                 │ toggle_recording (explicit buffering) │
//!                                 └───────────────────────────────────────┘
//! ```
//!
//! Every trigger (UI button, hotkey, timer) goes through the same operations,
//! and settings that cannot change mid-activity are rejected before anything
//! is touched.

mod runtime;

pub use runtime::{Command, ControlHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::audio::device::{DeviceCatalog, DeviceId};
use crate::config::RecorderConfig;
use crate::constants::{MAX_BUFFER_MINUTES, MIN_BUFFER_MINUTES, SAMPLE_RATE};
use crate::engine::{ActivityKind, ActivityParams, CaptureEngine, DeviceAudio, StreamFailure};
use crate::export::{ExportJob, ExportKind, ExportReport, ExportWorker, ExportWriter};
use crate::error::ModeError;

/// Exactly one of these holds at any instant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModeState {
    Idle,
    Buffering,
    Recording,
    RecordingAndBuffering,
}

impl ModeState {
    pub fn from_flags(recording: bool, buffering: bool) -> Self {
        match (recording, buffering) {
            (false, false) => ModeState::Idle,
            (false, true) => ModeState::Buffering,
            (true, false) => ModeState::Recording,
            (true, true) => ModeState::RecordingAndBuffering,
        }
    }

    pub fn is_recording(self) -> bool {
        matches!(self, ModeState::Recording | ModeState::RecordingAndBuffering)
    }

    pub fn is_buffering(self) -> bool {
        matches!(self, ModeState::Buffering | ModeState::RecordingAndBuffering)
    }

    pub fn name(self) -> &'static str {
        match self {
            ModeState::Idle => "idle",
            ModeState::Buffering => "buffering",
            ModeState::Recording => "recording",
            ModeState::RecordingAndBuffering => "recording+buffering",
        }
    }
}

/// Why buffering is running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BufferingOrigin {
    /// Started on its own; outlives a recording
    Explicit,
    /// Started by a recording with instant replay on; ends with it
    WithRecording,
}

/// User-adjustable settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeSettings {
    pub sample_rate: u32,
    pub output_dir: PathBuf,
    pub buffer_minutes: u32,
    pub instant_replay: bool,
    pub timer_seconds: Option<u32>,
}

impl ModeSettings {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        let defaults = RecorderConfig::default();
        Self {
            sample_rate: SAMPLE_RATE,
            output_dir: output_dir.into(),
            buffer_minutes: defaults.buffer_minutes,
            instant_replay: defaults.instant_replay,
            timer_seconds: defaults.timer_seconds,
        }
    }
}

impl From<&RecorderConfig> for ModeSettings {
    fn from(config: &RecorderConfig) -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            output_dir: config.output_dir.clone(),
            buffer_minutes: config.buffer_minutes,
            instant_replay: config.instant_replay,
            timer_seconds: config.timer_seconds,
        }
    }
}

/// A selected device that failed its open/close probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedDevice {
    pub device: DeviceId,
    pub reason: String,
}

/// Notifications for status display and the user
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ControllerEvent {
    StateChanged { state: ModeState },
    /// Devices left out of a recording because their probe failed
    DevicesSkipped { devices: Vec<SkippedDevice> },
    DeviceFailed(StreamFailure),
    TimerExpired,
    Exported(ExportReport),
    CommandRejected { command: String, error: String },
}

pub struct ModeController {
    engine: CaptureEngine,
    exporter: ExportWorker,
    settings: ModeSettings,
    selected: Vec<DeviceId>,
    buffering_origin: Option<BufferingOrigin>,
    recording_deadline: Option<Instant>,
    state: ModeState,
    events_tx: Sender<ControllerEvent>,
}

impl ModeController {
    /// Create a controller and the receiver for its notifications
    ///
    /// The receiver is the only one: events sent after it is dropped are
    /// discarded rather than queued.
    pub fn new(
        catalog: Arc<dyn DeviceCatalog>,
        settings: ModeSettings,
    ) -> std::io::Result<(Self, Receiver<ControllerEvent>)> {
        let (events_tx, events_rx) = unbounded();
        let report_tx = events_tx.clone();
        let exporter = ExportWorker::spawn(
            ExportWriter::new(settings.sample_rate),
            Box::new(move |report| {
                let _ = report_tx.send(ControllerEvent::Exported(report));
            }),
        )?;

        let controller = Self {
            engine: CaptureEngine::new(catalog),
            exporter,
            settings,
            selected: Vec::new(),
            buffering_origin: None,
            recording_deadline: None,
            state: ModeState::Idle,
            events_tx,
        };
        Ok((controller, events_rx))
    }

    pub fn state(&self) -> ModeState {
        self.state
    }

    pub fn settings(&self) -> &ModeSettings {
        &self.settings
    }

    pub fn engine(&self) -> &CaptureEngine {
        &self.engine
    }

    pub fn selected_devices(&self) -> &[DeviceId] {
        &self.selected
    }

    /// Replace the selection used by the next activity start
    pub fn select_devices(&mut self, devices: impl IntoIterator<Item = DeviceId>) {
        self.selected.clear();
        for device in devices {
            if !self.selected.contains(&device) {
                self.selected.push(device);
            }
        }
    }

    /// Directory for the next export; created on demand
    pub fn set_output_dir(&mut self, dir: impl Into<PathBuf>) {
        self.settings.output_dir = dir.into();
    }

    pub fn output_dir(&self) -> &Path {
        &self.settings.output_dir
    }

    /// Whether starting a recording also starts buffering
    pub fn set_instant_replay(&mut self, enabled: bool) {
        self.settings.instant_replay = enabled;
    }

    /// Auto-stop recordings after `seconds`; `None` disables the timer
    pub fn set_timer(&mut self, seconds: Option<u32>) -> Result<(), ModeError> {
        if self.state.is_recording() {
            return Err(ModeError::Busy(
                "timer cannot change while recording".to_string(),
            ));
        }
        if seconds == Some(0) {
            return Err(ModeError::Validation(
                "timer must be a positive number of seconds".to_string(),
            ));
        }
        self.settings.timer_seconds = seconds;
        Ok(())
    }

    pub fn buffer_duration_minutes(&self) -> u32 {
        self.settings.buffer_minutes
    }

    /// Change the instant-replay window; rejected while buffering
    pub fn set_buffer_duration_minutes(&mut self, minutes: u32) -> Result<(), ModeError> {
        if self.state.is_buffering() {
            return Err(ModeError::Busy(format!(
                "buffer duration cannot change while buffering, keeping {} min",
                self.settings.buffer_minutes
            )));
        }
        if !(MIN_BUFFER_MINUTES..=MAX_BUFFER_MINUTES).contains(&minutes) {
            return Err(ModeError::Validation(format!(
                "buffer duration must be {}-{} minutes",
                MIN_BUFFER_MINUTES, MAX_BUFFER_MINUTES
            )));
        }
        self.settings.buffer_minutes = minutes;
        Ok(())
    }

    /// Seconds left before the timer stops the recording
    pub fn remaining_timer_seconds(&self) -> Option<u64> {
        self.recording_deadline.map(|deadline| {
            let left = deadline.saturating_duration_since(Instant::now());
            // Round up so the display reaches 0 only at expiry
            left.as_secs() + u64::from(left.subsec_nanos() > 0)
        })
    }

    pub fn toggle_recording(&mut self) -> Result<ModeState, ModeError> {
        if self.state.is_recording() {
            self.stop_recording()
        } else {
            self.start_recording()
        }
    }

    pub fn toggle_buffering(&mut self) -> Result<ModeState, ModeError> {
        if self.state.is_buffering() {
            self.stop_buffering()
        } else {
            self.start_buffering()
        }
    }

    /// Probe the selection and start recording on every device that passes
    pub fn start_recording(&mut self) -> Result<ModeState, ModeError> {
        if self.state.is_recording() {
            return Ok(self.state);
        }
        if self.selected.is_empty() {
            return Err(ModeError::Validation(
                "select at least one input device".to_string(),
            ));
        }

        let (working, skipped) = self.probe_selection();
        if working.is_empty() {
            return Err(ModeError::NoWorkingDevices {
                failures: skipped
                    .into_iter()
                    .map(|s| (s.device, s.reason))
                    .collect(),
            });
        }

        let params = self.params();
        self.engine
            .start_activity(ActivityKind::Recording, &working, params)?;
        self.selected = working;
        if !skipped.is_empty() {
            for device in &skipped {
                tracing::warn!(device = %device.device, "Not recording: {}", device.reason);
            }
            self.emit(ControllerEvent::DevicesSkipped { devices: skipped });
        }

        self.recording_deadline = self
            .settings
            .timer_seconds
            .map(|seconds| Instant::now() + Duration::from_secs(u64::from(seconds)));

        if self.settings.instant_replay && !self.engine.is_active(ActivityKind::Buffering) {
            match self
                .engine
                .start_activity(ActivityKind::Buffering, &self.selected, params)
            {
                Ok(()) => self.buffering_origin = Some(BufferingOrigin::WithRecording),
                Err(e) => {
                    tracing::error!("Instant replay unavailable: {}", e);
                    self.emit(ControllerEvent::CommandRejected {
                        command: "start_buffering".to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }

        Ok(self.refresh_state())
    }

    /// Stop recording and queue the session for export
    pub fn stop_recording(&mut self) -> Result<ModeState, ModeError> {
        if !self.state.is_recording() {
            return Ok(self.state);
        }

        self.engine.stop_activity(ActivityKind::Recording);
        self.recording_deadline = None;
        if self.buffering_origin == Some(BufferingOrigin::WithRecording) {
            self.engine.stop_activity(ActivityKind::Buffering);
            self.buffering_origin = None;
        }

        let sessions = self.engine.drain_sessions();
        let state = self.refresh_state();
        self.submit_export(ExportKind::Recording, sessions)?;
        Ok(state)
    }

    /// Start buffering the selection; a no-op while already buffering
    pub fn start_buffering(&mut self) -> Result<ModeState, ModeError> {
        if self.state.is_buffering() {
            return Ok(self.state);
        }
        if self.selected.is_empty() {
            return Err(ModeError::Validation(
                "select at least one input device to buffer".to_string(),
            ));
        }

        let params = self.params();
        self.engine
            .start_activity(ActivityKind::Buffering, &self.selected, params)?;
        self.buffering_origin = Some(BufferingOrigin::Explicit);
        Ok(self.refresh_state())
    }

    /// Stop buffering and discard the window
    pub fn stop_buffering(&mut self) -> Result<ModeState, ModeError> {
        if !self.state.is_buffering() {
            return Ok(self.state);
        }
        self.engine.stop_activity(ActivityKind::Buffering);
        self.buffering_origin = None;
        Ok(self.refresh_state())
    }

    /// Export a snapshot of every ring buffer; capture keeps running
    pub fn save_buffer_now(&mut self) -> Result<(), ModeError> {
        if !self.state.is_buffering() {
            return Err(ModeError::Validation(
                "instant replay buffering is not active".to_string(),
            ));
        }
        let snapshots = self.engine.snapshot_buffers();
        self.submit_export(ExportKind::Buffer, snapshots)
    }

    /// Apply queued device failures and the recording timer
    pub fn poll(&mut self) {
        for failure in self.engine.poll_stream_failures() {
            self.on_stream_failure(failure);
        }

        let expired = self
            .recording_deadline
            .map_or(false, |deadline| Instant::now() >= deadline);
        if expired {
            tracing::info!("Recording timer expired");
            self.emit(ControllerEvent::TimerExpired);
            if let Err(e) = self.stop_recording() {
                self.reject("stop_recording", &e);
            }
        }
    }

    /// Remove a failed device synchronously, as if its stream had reported it
    pub fn handle_device_failure(&mut self, kind: ActivityKind, device: &DeviceId, reason: &str) {
        if let Some(failure) = self.engine.handle_stream_failure(kind, device, reason) {
            self.on_stream_failure(failure);
        }
    }

    fn on_stream_failure(&mut self, failure: StreamFailure) {
        let kind = failure.kind;
        let emptied = failure.remaining == 0;
        self.selected.retain(|device| device != &failure.device);
        self.emit(ControllerEvent::DeviceFailed(failure));

        if !emptied {
            return;
        }
        tracing::warn!(kind = %kind, "Every device failed, stopping");
        let result = match kind {
            ActivityKind::Recording => self.stop_recording(),
            ActivityKind::Buffering => self.stop_buffering(),
        };
        if let Err(e) = result {
            self.reject("auto_stop", &e);
        }
    }

    /// Finish any recording, drop buffering and flush pending exports
    pub fn shutdown(&mut self) {
        if let Err(e) = self.stop_recording() {
            tracing::error!("Final recording export failed: {}", e);
        }
        let _ = self.stop_buffering();
        self.exporter.shutdown();
    }

    pub(crate) fn reject(&self, command: &str, error: &ModeError) {
        tracing::warn!(command, "Rejected: {}", error);
        self.emit(ControllerEvent::CommandRejected {
            command: command.to_string(),
            error: error.to_string(),
        });
    }

    fn probe_selection(&self) -> (Vec<DeviceId>, Vec<SkippedDevice>) {
        let catalog = self.engine.catalog();
        let mut working = Vec::new();
        let mut skipped = Vec::new();
        for device in &self.selected {
            match catalog.probe(device) {
                Ok(()) => working.push(device.clone()),
                Err(e) => skipped.push(SkippedDevice {
                    device: device.clone(),
                    reason: e.to_string(),
                }),
            }
        }
        (working, skipped)
    }

    fn params(&self) -> ActivityParams {
        ActivityParams {
            sample_rate: self.settings.sample_rate,
            buffer_minutes: self.settings.buffer_minutes,
        }
    }

    fn submit_export(
        &self,
        kind: ExportKind,
        captures: Vec<DeviceAudio>,
    ) -> Result<(), ModeError> {
        self.exporter
            .submit(ExportJob {
                kind,
                output_dir: self.settings.output_dir.clone(),
                captures,
            })
            .map_err(|_| ModeError::ExportUnavailable)
    }

    fn refresh_state(&mut self) -> ModeState {
        let state = ModeState::from_flags(
            self.engine.is_active(ActivityKind::Recording),
            self.engine.is_active(ActivityKind::Buffering),
        );
        if state != self.state {
            tracing::info!(from = self.state.name(), to = state.name(), "Mode changed");
            self.state = state;
            self.emit(ControllerEvent::StateChanged { state });
        }
        state
    }

    fn emit(&self, event: ControllerEvent) {
        let _ = self.events_tx.send(event);
    }
}

impl Drop for ModeController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

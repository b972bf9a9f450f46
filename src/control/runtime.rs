//! Control thread
//!
//! Owns the [`ModeController`] and serialises every trigger through one
//! command queue, so buttons, hotkeys and the CLI all look the same to it.
//! Between commands it polls for device failures and the recording timer.

use crossbeam_channel::{select, tick, unbounded, Receiver, Sender};
use std::path::PathBuf;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::{ControllerEvent, ModeController};
use crate::audio::device::DeviceId;
use crate::constants::CONTROL_TICK_MS;

/// Requests accepted by the control thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    ToggleRecording,
    ToggleBuffering,
    SaveBufferNow,
    SetBufferMinutes(u32),
    SelectDevices(Vec<DeviceId>),
    SetOutputDir(PathBuf),
    SetTimer(Option<u32>),
    SetInstantReplay(bool),
    Shutdown,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::ToggleRecording => "toggle_recording",
            Command::ToggleBuffering => "toggle_buffering",
            Command::SaveBufferNow => "save_buffer_now",
            Command::SetBufferMinutes(_) => "set_buffer_minutes",
            Command::SelectDevices(_) => "select_devices",
            Command::SetOutputDir(_) => "set_output_dir",
            Command::SetTimer(_) => "set_timer",
            Command::SetInstantReplay(_) => "set_instant_replay",
            Command::Shutdown => "shutdown",
        }
    }
}

/// Handle to a running control thread
pub struct ControlHandle {
    commands: Sender<Command>,
    events: Receiver<ControllerEvent>,
    thread_handle: Option<JoinHandle<()>>,
}

impl ControlHandle {
    /// Move `controller` onto its own thread, publishing on `events`
    pub fn spawn(
        mut controller: ModeController,
        events: Receiver<ControllerEvent>,
    ) -> std::io::Result<Self> {
        let (commands_tx, commands_rx) = unbounded::<Command>();

        let handle = thread::Builder::new()
            .name("recorder-control".to_string())
            .spawn(move || {
                let ticker = tick(Duration::from_millis(CONTROL_TICK_MS));
                loop {
                    select! {
                        recv(commands_rx) -> command => match command {
                            Ok(Command::Shutdown) | Err(_) => break,
                            Ok(command) => execute(&mut controller, command),
                        },
                        recv(ticker) -> _ => controller.poll(),
                    }
                }
                tracing::info!("Control thread shutting down");
                controller.shutdown();
            })?;

        Ok(Self {
            commands: commands_tx,
            events,
            thread_handle: Some(handle),
        })
    }

    /// Queue a command; returns false once the control thread is gone
    pub fn send(&self, command: Command) -> bool {
        self.commands.send(command).is_ok()
    }

    pub fn events(&self) -> &Receiver<ControllerEvent> {
        &self.events
    }

    /// Stop the control thread, finishing any recording and pending exports
    pub fn shutdown(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                tracing::error!("Control thread panicked");
            }
        }
    }
}

impl Drop for ControlHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn execute(controller: &mut ModeController, command: Command) {
    let name = command.name();
    let result = match command {
        Command::ToggleRecording => controller.toggle_recording().map(|_| ()),
        Command::ToggleBuffering => controller.toggle_buffering().map(|_| ()),
        Command::SaveBufferNow => controller.save_buffer_now(),
        Command::SetBufferMinutes(minutes) => controller.set_buffer_duration_minutes(minutes),
        Command::SelectDevices(devices) => {
            controller.select_devices(devices);
            Ok(())
        }
        Command::SetOutputDir(dir) => {
            controller.set_output_dir(dir);
            Ok(())
        }
        Command::SetTimer(seconds) => controller.set_timer(seconds),
        Command::SetInstantReplay(enabled) => {
            controller.set_instant_replay(enabled);
            Ok(())
        }
        Command::Shutdown => Ok(()),
    };

    if let Err(e) = result {
        controller.reject(name, &e);
    }
}

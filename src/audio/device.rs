//! Audio device enumeration and management
//!
//! The capture core only talks to devices through [`DeviceCatalog`]; the cpal
//! implementation lives here alongside the listing and naming helpers.

use cpal::traits::{DeviceTrait, HostTrait};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::audio::capture::{CpalInputStream, DataCallback, ErrorCallback, InputStream};
use crate::constants::{MAX_CHANNELS, SAMPLE_RATE};
use crate::error::AudioError;

/// Opaque, process-stable handle for an input device
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Id for a cpal input device with the given name
    pub fn input(name: &str) -> Self {
        Self(format!("input:{}", name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// What the capture core needs to know about a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCapabilities {
    pub name: String,
    pub max_input_channels: u16,
}

impl DeviceCapabilities {
    /// Channels a stream on this device is opened with
    pub fn capture_channels(&self) -> u16 {
        self.max_input_channels.min(MAX_CHANNELS)
    }
}

/// Parameters for opening one input stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamParams {
    pub channels: u16,
    pub sample_rate: u32,
}

/// Listing entry for device selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: DeviceId,
    pub name: String,
    pub max_input_channels: u16,
    pub is_default: bool,
}

/// Name-based device filter for the selection list
///
/// The default matches virtual line inputs: names containing both "line"
/// and "virtual" but not "output". Matching is case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceFilter {
    /// Ignore the name rules and list every input device
    pub show_all: bool,
    /// Every one of these must appear in the name
    pub name_must_contain: Vec<String>,
    /// None of these may appear in the name
    pub name_must_not_contain: Vec<String>,
}

impl Default for DeviceFilter {
    fn default() -> Self {
        Self {
            show_all: false,
            name_must_contain: vec!["line".to_string(), "virtual".to_string()],
            name_must_not_contain: vec!["output".to_string()],
        }
    }
}

impl DeviceFilter {
    /// Filter that lets every input device through
    pub fn all() -> Self {
        Self {
            show_all: true,
            ..Self::default()
        }
    }

    pub fn matches(&self, name: &str) -> bool {
        if self.show_all {
            return true;
        }
        let name = name.to_lowercase();
        self.name_must_contain
            .iter()
            .all(|needle| name.contains(&needle.to_lowercase()))
            && !self
                .name_must_not_contain
                .iter()
                .any(|needle| name.contains(&needle.to_lowercase()))
    }
}

/// Source of devices and streams for the capture engine
pub trait DeviceCatalog: Send + Sync {
    /// Report name and input channel count of a device
    fn capabilities(&self, device: &DeviceId) -> Result<DeviceCapabilities, AudioError>;

    /// Open (but do not start) an input stream delivering f32 samples
    fn open(
        &self,
        device: &DeviceId,
        params: StreamParams,
        on_data: DataCallback,
        on_error: ErrorCallback,
    ) -> Result<Box<dyn InputStream>, AudioError>;

    /// Check that a device can be opened for capture, then release it
    fn probe(&self, device: &DeviceId) -> Result<(), AudioError> {
        let caps = self.capabilities(device)?;
        if caps.max_input_channels == 0 {
            return Err(AudioError::DeviceOpen {
                device: device.clone(),
                reason: "device has no input channels".to_string(),
            });
        }
        let params = StreamParams {
            channels: 1,
            sample_rate: SAMPLE_RATE,
        };
        let mut stream = self.open(device, params, Box::new(|_| {}), Box::new(|_| {}))?;
        stream.stop();
        Ok(())
    }
}

/// Replace every non-alphanumeric character with `_`
pub fn safe_device_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect()
}

/// [`DeviceCatalog`] backed by the default cpal host
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalCatalog;

impl CpalCatalog {
    pub fn new() -> Self {
        Self
    }

    /// List input devices passing `filter`
    pub fn list_devices(&self, filter: &DeviceFilter) -> Vec<DeviceInfo> {
        let host = cpal::default_host();
        let default_name = host.default_input_device().and_then(|d| d.name().ok());

        let devices = match host.input_devices() {
            Ok(devices) => devices,
            Err(e) => {
                tracing::warn!("Failed to enumerate input devices: {}", e);
                return Vec::new();
            }
        };

        let mut listed = Vec::new();
        for device in devices {
            let Ok(name) = device.name() else {
                continue;
            };
            let max_input_channels = max_input_channels(&device);
            if max_input_channels == 0 || !filter.matches(&name) {
                continue;
            }
            listed.push(DeviceInfo {
                id: DeviceId::input(&name),
                is_default: default_name.as_ref() == Some(&name),
                name,
                max_input_channels,
            });
        }
        listed
    }

    /// Resolve an id to a cpal device
    pub fn device(&self, id: &DeviceId) -> Result<cpal::Device, AudioError> {
        let host = cpal::default_host();
        let name = id.as_str().strip_prefix("input:").unwrap_or(id.as_str());

        let devices = host
            .input_devices()
            .map_err(|e| AudioError::CpalError(e.to_string()))?;

        for device in devices {
            if device.name().map(|n| n == name).unwrap_or(false) {
                return Ok(device);
            }
        }

        Err(AudioError::DeviceNotFound(id.to_string()))
    }
}

impl DeviceCatalog for CpalCatalog {
    fn capabilities(&self, id: &DeviceId) -> Result<DeviceCapabilities, AudioError> {
        let device = self.device(id)?;
        Ok(DeviceCapabilities {
            name: device.name().unwrap_or_else(|_| "Unknown".to_string()),
            max_input_channels: max_input_channels(&device),
        })
    }

    fn open(
        &self,
        id: &DeviceId,
        params: StreamParams,
        on_data: DataCallback,
        on_error: ErrorCallback,
    ) -> Result<Box<dyn InputStream>, AudioError> {
        let device = self.device(id)?;
        let stream = CpalInputStream::open(id.clone(), device, params, on_data, on_error)?;
        Ok(Box::new(stream))
    }
}

/// Highest input channel count over the device's supported configs
fn max_input_channels(device: &cpal::Device) -> u16 {
    device
        .supported_input_configs()
        .map(|configs| configs.map(|c| c.channels()).max().unwrap_or(0))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_device_name() {
        assert_eq!(
            safe_device_name("Line 1 (Virtual Audio Cable)"),
            "Line_1__Virtual_Audio_Cable_"
        );
        assert_eq!(safe_device_name("Mic-2"), "Mic_2");
        assert_eq!(safe_device_name("Микрофон"), "Микрофон");
    }

    #[test]
    fn test_default_filter_matches_virtual_line_inputs() {
        let filter = DeviceFilter::default();
        assert!(filter.matches("Line 1 (Virtual Audio Cable)"));
        assert!(!filter.matches("Line Output (Virtual Audio Cable)"));
        assert!(!filter.matches("Line In (Realtek Audio)"));
        assert!(!filter.matches("USB Microphone"));
    }

    #[test]
    fn test_show_all_filter() {
        let filter = DeviceFilter::all();
        assert!(filter.matches("USB Microphone"));
    }

    #[test]
    fn test_capture_channels_capped() {
        let caps = DeviceCapabilities {
            name: "Interface".to_string(),
            max_input_channels: 8,
        };
        assert_eq!(caps.capture_channels(), 2);

        let mono = DeviceCapabilities {
            name: "Mic".to_string(),
            max_input_channels: 1,
        };
        assert_eq!(mono.capture_channels(), 1);
    }

    #[test]
    fn test_device_id_input_prefix() {
        let id = DeviceId::input("Mic");
        assert_eq!(id.as_str(), "input:Mic");
        assert_eq!(id.to_string(), "input:Mic");
    }
}

//! Audio subsystem module

pub mod buffer;
pub mod capture;
pub mod device;

pub use buffer::{CapturedAudio, Frame, RingBuffer, SessionBuffer};
pub use capture::{CaptureStream, FrameSink, InputStream};
pub use device::{safe_device_name, CpalCatalog, DeviceCatalog, DeviceFilter, DeviceId, DeviceInfo};

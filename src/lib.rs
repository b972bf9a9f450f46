//! # Multitrack Recorder
//!
//! Simultaneous capture from several input devices with two overlapping
//! modes: full-session recording to disk and a rolling instant-replay window.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                        DRIVER THREADS (one per stream)                   │
//! │  ┌────────────┐   ┌────────────┐   ┌────────────┐   ┌────────────┐       │
//! │  │ Device A   │   │ Device B   │   │ Device A   │   │ Device B   │       │
//! │  │ (record)   │   │ (record)   │   │ (buffer)   │   │ (buffer)   │       │
//! │  └─────┬──────┘   └─────┬──────┘   └─────┬──────┘   └─────┬──────┘       │
//! │        │ frame sink     │                │                │              │
//! │        ▼                ▼                ▼                ▼              │
//! │  ┌───────────────────────────┐   ┌───────────────────────────┐           │
//! │  │ SessionBuffer per device  │   │ RingBuffer per device     │           │
//! │  │ (unbounded, 1 s blocks)   │   │ (last N minutes)          │           │
//! │  └─────────────┬─────────────┘   └─────────────┬─────────────┘           │
//! └────────────────┼───────────────────────────────┼─────────────────────────┘
//!                  │ drain (stop)                  │ snapshot (save)
//!                  ▼                               ▼
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                            CONTROL THREAD                                │
//! │   Command ──▶ ModeController ──▶ CaptureEngine (start / stop / failures) │
//! │                     │                                                    │
//! │                     ▼                                                    │
//! │              ExportWorker thread ──▶ {recording|buffer}_{name}_{ts}.wav  │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod config;
pub mod control;
pub mod engine;
pub mod error;
pub mod export;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Fixed capture sample rate for every stream
    pub const SAMPLE_RATE: u32 = 44_100;

    /// Upper bound on channels opened per device
    pub const MAX_CHANNELS: u16 = 2;

    /// Default instant-replay window in minutes
    pub const DEFAULT_BUFFER_MINUTES: u32 = 2;

    /// Smallest accepted instant-replay window in minutes
    pub const MIN_BUFFER_MINUTES: u32 = 1;

    /// Largest accepted instant-replay window in minutes
    pub const MAX_BUFFER_MINUTES: u32 = 20;

    /// Session buffers grow in blocks of this many seconds of audio
    pub const SESSION_BLOCK_SECONDS: usize = 1;

    /// How long to wait for a driver to build or start a stream (ms)
    pub const STREAM_OPEN_TIMEOUT_MS: u64 = 3_000;

    /// Control thread housekeeping interval (ms)
    pub const CONTROL_TICK_MS: u64 = 200;

    /// Name of the folder created under the user's audio directory
    pub const OUTPUT_FOLDER_NAME: &str = "MultiTrackRecorder";
}

//! Export of captured audio to WAV files
//!
//! One file per device per export event, named
//! `{recording|buffer}_{safe device name}_{YYYYMMDD_HHMMSS}.wav`, written as
//! 32-bit float PCM at the capture sample rate and the device's channel count.

mod worker;

pub use worker::{ExportJob, ExportWorker, ReportCallback};

use chrono::{DateTime, Local};
use hound::{SampleFormat, WavSpec, WavWriter};
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::audio::buffer::CapturedAudio;
use crate::audio::device::{safe_device_name, DeviceId};
use crate::engine::DeviceAudio;
use crate::error::ExportError;

/// What an export came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportKind {
    Recording,
    Buffer,
}

impl ExportKind {
    /// File name prefix
    pub fn prefix(self) -> &'static str {
        match self {
            ExportKind::Recording => "recording",
            ExportKind::Buffer => "buffer",
        }
    }
}

/// A file written for one device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SavedFile {
    pub device: DeviceId,
    pub name: String,
    pub path: PathBuf,
    pub frames: usize,
    pub channels: u16,
}

/// A device whose file could not be written
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedExport {
    pub device: DeviceId,
    pub name: String,
    pub reason: String,
}

/// Outcome of one export event, covering every device
#[derive(Debug, Clone, Serialize)]
pub struct ExportReport {
    pub kind: ExportKind,
    pub output_dir: PathBuf,
    pub created_at: DateTime<Local>,
    pub saved: Vec<SavedFile>,
    pub failed: Vec<FailedExport>,
    /// Devices that had nothing to export
    pub skipped: Vec<DeviceId>,
}

impl ExportReport {
    fn new(kind: ExportKind, output_dir: &Path, created_at: DateTime<Local>) -> Self {
        Self {
            kind,
            output_dir: output_dir.to_path_buf(),
            created_at,
            saved: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
        }
    }

    pub fn paths(&self) -> Vec<&Path> {
        self.saved.iter().map(|file| file.path.as_path()).collect()
    }

    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }

    /// One-line human readable summary
    pub fn summary(&self) -> String {
        let mut summary = format!(
            "{} export to {}: {} saved",
            self.kind.prefix(),
            self.output_dir.display(),
            self.saved.len()
        );
        if !self.failed.is_empty() {
            let failed: Vec<String> = self
                .failed
                .iter()
                .map(|f| format!("{} ({})", f.name, f.reason))
                .collect();
            summary.push_str(&format!(", failed: {}", failed.join("; ")));
        }
        if !self.skipped.is_empty() {
            summary.push_str(&format!(", {} empty", self.skipped.len()));
        }
        summary
    }
}

/// Writes captured audio to WAV files
#[derive(Debug, Clone, Copy)]
pub struct ExportWriter {
    sample_rate: u32,
}

impl ExportWriter {
    pub fn new(sample_rate: u32) -> Self {
        Self { sample_rate }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Write the drained session buffers of a finished recording
    pub fn export_session(&self, sessions: &[DeviceAudio], output_dir: &Path) -> ExportReport {
        self.export(ExportKind::Recording, sessions, output_dir)
    }

    /// Write ring buffer snapshots
    pub fn export_buffer(&self, snapshots: &[DeviceAudio], output_dir: &Path) -> ExportReport {
        self.export(ExportKind::Buffer, snapshots, output_dir)
    }

    pub fn export(
        &self,
        kind: ExportKind,
        captures: &[DeviceAudio],
        output_dir: &Path,
    ) -> ExportReport {
        let now = Local::now();
        let timestamp = now.format("%Y%m%d_%H%M%S").to_string();
        let mut report = ExportReport::new(kind, output_dir, now);

        let (empty, pending): (Vec<&DeviceAudio>, Vec<&DeviceAudio>) = captures
            .iter()
            .partition(|capture| capture.audio.frame_count() == 0);
        report.skipped = empty.into_iter().map(|c| c.device.clone()).collect();

        if pending.is_empty() {
            tracing::info!(kind = kind.prefix(), "Nothing to export");
            return report;
        }

        if let Err(source) = fs::create_dir_all(output_dir) {
            let err = ExportError::CreateDir {
                path: output_dir.to_path_buf(),
                source,
            };
            tracing::error!("{}", err);
            report.failed = pending
                .into_iter()
                .map(|capture| FailedExport {
                    device: capture.device.clone(),
                    name: capture.name.clone(),
                    reason: err.to_string(),
                })
                .collect();
            return report;
        }

        let mut taken = HashSet::new();
        for capture in pending {
            let path = unique_path(
                output_dir,
                kind.prefix(),
                &safe_device_name(&capture.name),
                &timestamp,
                &mut taken,
            );

            match write_wav(&path, &capture.audio, self.sample_rate) {
                Ok(frames) => {
                    tracing::info!(device = %capture.device, path = %path.display(), frames, "Saved");
                    report.saved.push(SavedFile {
                        device: capture.device.clone(),
                        name: capture.name.clone(),
                        path,
                        frames,
                        channels: capture.audio.channels(),
                    });
                }
                Err(err) => {
                    tracing::error!(device = %capture.device, "{}", err);
                    if path.exists() {
                        let _ = fs::remove_file(&path);
                    }
                    report.failed.push(FailedExport {
                        device: capture.device.clone(),
                        name: capture.name.clone(),
                        reason: err.to_string(),
                    });
                }
            }
        }

        report
    }
}

/// `{prefix}_{safe_name}_{timestamp}.wav`, with `_N` added on collision
pub fn file_name(prefix: &str, safe_name: &str, timestamp: &str, attempt: usize) -> String {
    if attempt == 0 {
        format!("{}_{}_{}.wav", prefix, safe_name, timestamp)
    } else {
        format!("{}_{}_{}_{}.wav", prefix, safe_name, timestamp, attempt)
    }
}

fn unique_path(
    dir: &Path,
    prefix: &str,
    safe_name: &str,
    timestamp: &str,
    taken: &mut HashSet<PathBuf>,
) -> PathBuf {
    let mut attempt = 0;
    loop {
        let path = dir.join(file_name(prefix, safe_name, timestamp, attempt));
        if !taken.contains(&path) && !path.exists() {
            taken.insert(path.clone());
            return path;
        }
        attempt += 1;
    }
}

/// Write interleaved audio as 32-bit float WAV, returning the frame count
pub fn write_wav(path: &Path, audio: &CapturedAudio, sample_rate: u32) -> Result<usize, ExportError> {
    let wav_spec = WavSpec {
        channels: audio.channels(),
        sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let wrap = |source: hound::Error| ExportError::Write {
        path: path.to_path_buf(),
        source,
    };

    let mut writer = WavWriter::create(path, wav_spec).map_err(wrap)?;
    let frames = audio.frame_count();
    // A partial trailing frame cannot be represented in the container
    for sample in audio.samples().take(frames * audio.channels() as usize) {
        writer.write_sample(sample).map_err(wrap)?;
    }
    writer.finalize().map_err(wrap)?;
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capture(device: &str, name: &str, channels: u16, samples: Vec<f32>) -> DeviceAudio {
        DeviceAudio {
            device: DeviceId::new(device),
            name: name.to_string(),
            audio: CapturedAudio::new(channels, vec![samples]),
        }
    }

    #[test]
    fn test_file_name_format() {
        assert_eq!(
            file_name("buffer", "Line_1", "20240101_120000", 0),
            "buffer_Line_1_20240101_120000.wav"
        );
        assert_eq!(
            file_name("recording", "Mic", "20240101_120000", 2),
            "recording_Mic_20240101_120000_2.wav"
        );
    }

    #[test]
    fn test_export_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let samples: Vec<f32> = (0..2000).map(|i| (i as f32 / 1000.0) - 1.0).collect();
        let audio = CapturedAudio::new(2, vec![samples[..500].to_vec(), samples[500..].to_vec()]);
        let captures = vec![DeviceAudio {
            device: DeviceId::new("input:Mic"),
            name: "Mic (USB)".to_string(),
            audio,
        }];

        let report = ExportWriter::new(44_100).export_session(&captures, dir.path());
        assert_eq!(report.saved.len(), 1);
        assert!(!report.has_failures());

        let saved = &report.saved[0];
        assert_eq!(saved.frames, 1000);
        let file_name = saved.path.file_name().unwrap().to_string_lossy().to_string();
        assert!(file_name.starts_with("recording_Mic__USB__"));
        assert!(file_name.ends_with(".wav"));

        let mut reader = hound::WavReader::open(&saved.path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 2);
        assert_eq!(spec.sample_rate, 44_100);
        assert_eq!(spec.sample_format, SampleFormat::Float);
        let read: Vec<f32> = reader.samples::<f32>().map(|s| s.unwrap()).collect();
        assert_eq!(read, samples);
    }

    #[test]
    fn test_empty_devices_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let captures = vec![
            capture("a", "A", 1, vec![0.5; 100]),
            capture("b", "B", 1, Vec::new()),
        ];

        let report = ExportWriter::new(44_100).export_buffer(&captures, dir.path());
        assert_eq!(report.saved.len(), 1);
        assert_eq!(report.skipped, vec![DeviceId::new("b")]);
        assert!(report.saved[0]
            .path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("buffer_A_"));
    }

    #[test]
    fn test_same_safe_name_does_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let captures = vec![
            capture("a", "Line:1", 1, vec![0.1; 10]),
            capture("b", "Line 1", 1, vec![0.2; 10]),
        ];

        let report = ExportWriter::new(44_100).export_session(&captures, dir.path());
        assert_eq!(report.saved.len(), 2);
        assert_ne!(report.saved[0].path, report.saved[1].path);
    }

    #[test]
    fn test_output_directory_created() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("nested").join("out");
        let captures = vec![capture("a", "A", 1, vec![0.0; 10])];

        let report = ExportWriter::new(44_100).export_session(&captures, &nested);
        assert_eq!(report.saved.len(), 1);
        assert!(nested.is_dir());
    }

    #[test]
    fn test_unwritable_directory_reports_every_device() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, b"x").unwrap();
        let captures = vec![
            capture("a", "A", 1, vec![0.0; 10]),
            capture("b", "B", 1, vec![0.0; 10]),
        ];

        let report = ExportWriter::new(44_100).export_session(&captures, &blocker);
        assert!(report.saved.is_empty());
        assert_eq!(report.failed.len(), 2);
        assert!(report.summary().contains("failed"));
    }

    #[test]
    fn test_one_failed_device_does_not_stop_the_others() {
        let dir = tempfile::tempdir().unwrap();
        // No filesystem accepts a file name this long
        let unwritable = "x".repeat(300);
        let captures = vec![
            capture("a", &unwritable, 1, vec![0.1; 10]),
            capture("b", "Line 2", 1, vec![0.2; 10]),
        ];

        let report = ExportWriter::new(44_100).export_session(&captures, dir.path());
        assert_eq!(report.saved.len(), 1);
        assert_eq!(report.saved[0].device, DeviceId::new("b"));
        assert!(report.saved[0].path.is_file());
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].device, DeviceId::new("a"));
        assert!(report.has_failures());
        assert!(report.summary().contains(&format!("failed: {} (", unwritable)));
    }

    #[test]
    fn test_partial_trailing_frame_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("odd.wav");
        let audio = CapturedAudio::new(2, vec![vec![0.1, 0.2, 0.3]]);

        let frames = write_wav(&path, &audio, 44_100).unwrap();
        assert_eq!(frames, 1);
        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.len(), 2);
    }
}

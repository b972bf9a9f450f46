//! Background export thread
//!
//! Stop and save requests only hand buffers over; file I/O happens here.

use crossbeam_channel::{unbounded, Sender};
use std::path::PathBuf;
use std::thread::{self, JoinHandle};

use super::{ExportKind, ExportReport, ExportWriter};
use crate::engine::DeviceAudio;
use crate::error::ExportError;

/// Called with every finished report, on the export thread
pub type ReportCallback = Box<dyn Fn(ExportReport) + Send + 'static>;

/// One queued export event
pub struct ExportJob {
    pub kind: ExportKind,
    pub output_dir: PathBuf,
    pub captures: Vec<DeviceAudio>,
}

/// Thread draining a queue of [`ExportJob`]s in submission order
pub struct ExportWorker {
    jobs: Option<Sender<ExportJob>>,
    thread_handle: Option<JoinHandle<()>>,
}

impl ExportWorker {
    pub fn spawn(writer: ExportWriter, on_report: ReportCallback) -> std::io::Result<Self> {
        let (jobs_tx, jobs_rx) = unbounded::<ExportJob>();

        let handle = thread::Builder::new()
            .name("export-writer".to_string())
            .spawn(move || {
                for job in jobs_rx {
                    let report = writer.export(job.kind, &job.captures, &job.output_dir);
                    tracing::info!("{}", report.summary());
                    on_report(report);
                }
                tracing::debug!("Export worker exiting");
            })?;

        Ok(Self {
            jobs: Some(jobs_tx),
            thread_handle: Some(handle),
        })
    }

    /// Queue a job without waiting for it
    pub fn submit(&self, job: ExportJob) -> Result<(), ExportError> {
        let jobs = self.jobs.as_ref().ok_or(ExportError::WorkerGone)?;
        jobs.send(job).map_err(|_| ExportError::WorkerGone)
    }

    /// Finish queued jobs and stop the thread
    pub fn shutdown(&mut self) {
        self.jobs = None;
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                tracing::error!("Export worker panicked");
            }
        }
    }
}

impl Drop for ExportWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

//! Output sink: per-run append-only logs shared by all batch workers.
//!
//! Each file has one handle behind its own lock. Files are created fresh per
//! run with a timestamp suffix and never reopened, so a rerun can't clobber
//! an earlier run's output. Write failures are logged, never propagated.

use std::fs::{File, OpenOptions};
use std::io::{LineWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};

use cidcheck_core::ProbeResult;

use crate::batcher::Batch;
use crate::progress::ProgressRecord;

pub const NOT_FOUND_PREFIX: &str = "cid-check.failed.cids";
pub const PROGRESS_PREFIX: &str = "cid-check.progress";
pub const DEBUG_PREFIX: &str = "cid-check.debug";

struct LogFile {
    path: PathBuf,
    writer: Mutex<LineWriter<File>>,
}

impl LogFile {
    fn create(dir: &Path, prefix: &str, timestamp: u64) -> Result<Self> {
        let path = dir.join(format!("{prefix}.{timestamp}"));
        let file = OpenOptions::new()
            .append(true)
            .create_new(true)
            .open(&path)
            .with_context(|| format!("failed to create output file {}", path.display()))?;
        Ok(Self {
            path,
            writer: Mutex::new(LineWriter::new(file)),
        })
    }

    fn append(&self, line: &str) {
        let mut w = match self.writer.lock() {
            Ok(w) => w,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = writeln!(w, "{line}") {
            tracing::warn!(path = %self.path.display(), error = %e, "output write failed");
        }
    }

    fn flush(&self) {
        let mut w = match self.writer.lock() {
            Ok(w) => w,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = w.flush() {
            tracing::warn!(path = %self.path.display(), error = %e, "output flush failed");
        }
    }
}

/// Where batch workers deliver results and progress events.
pub trait ResultSink: Send + Sync {
    fn record(&self, result: &ProbeResult);
    fn batch_dispatched(&self, batch: &Batch);
    fn batch_completed(&self, batch: &Batch);
}

pub struct OutputSink {
    not_found: LogFile,
    progress: LogFile,
    debug: Option<LogFile>,
}

impl OutputSink {
    /// Create this run's files under `dir`. Fails if any already exists.
    pub fn create(dir: &Path, timestamp: u64, debug: bool) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create output dir {}", dir.display()))?;
        Ok(Self {
            not_found: LogFile::create(dir, NOT_FOUND_PREFIX, timestamp)?,
            progress: LogFile::create(dir, PROGRESS_PREFIX, timestamp)?,
            debug: if debug {
                Some(LogFile::create(dir, DEBUG_PREFIX, timestamp)?)
            } else {
                None
            },
        })
    }

    pub fn not_found_path(&self) -> &Path {
        &self.not_found.path
    }

    pub fn progress_path(&self) -> &Path {
        &self.progress.path
    }

    pub fn debug_path(&self) -> Option<&Path> {
        self.debug.as_ref().map(|d| d.path.as_path())
    }

    pub fn flush(&self) {
        self.not_found.flush();
        self.progress.flush();
        if let Some(debug) = &self.debug {
            debug.flush();
        }
    }
}

impl ResultSink for OutputSink {
    fn record(&self, result: &ProbeResult) {
        if !result.found {
            self.not_found.append(&result.cid.to_string());
        }
        if let Some(debug) = &self.debug {
            match serde_json::to_string(result) {
                Ok(line) => debug.append(&line),
                Err(e) => tracing::warn!(error = %e, "failed to encode debug record"),
            }
        }
    }

    fn batch_dispatched(&self, batch: &Batch) {
        self.progress
            .append(&ProgressRecord::dispatched(batch).to_line());
    }

    fn batch_completed(&self, batch: &Batch) {
        self.progress
            .append(&ProgressRecord::completed(batch).to_line());
    }
}

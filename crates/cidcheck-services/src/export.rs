//! Export pipeline: archives selected CIDs through an external command.
//!
//! Runs on its own semaphore, separate from the probe pool. `submit` waits
//! for a free slot, so a slow exporter pushes back on the probe workers
//! instead of queueing without bound. Failures are logged and counted; they
//! never affect probe results.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use cidcheck_core::config::{ExportConfig, ExportSelection};
use cidcheck_core::{ContentId, Outcome, ProbeResult};

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("exporter exited with code {code}: {stderr}")]
    Failed { code: i32, stderr: String },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Produces an archive for one CID and stores it locally.
pub trait Exporter: Send + Sync {
    fn export<'a>(&'a self, cid: &'a ContentId) -> BoxFuture<'a, Result<PathBuf, ExportError>>;
}

/// Runs `<program> <args..> <cid>` and writes its stdout to `<out_dir>/<cid>.car`.
pub struct CommandExporter {
    program: String,
    args: Vec<String>,
    out_dir: PathBuf,
}

impl CommandExporter {
    pub fn new(program: impl Into<String>, args: Vec<String>, out_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args,
            out_dir: out_dir.into(),
        }
    }

    pub fn from_config(config: &ExportConfig) -> Self {
        Self::new(
            config.program.clone(),
            config.args.clone(),
            config.out_dir.clone(),
        )
    }
}

impl Exporter for CommandExporter {
    fn export<'a>(&'a self, cid: &'a ContentId) -> BoxFuture<'a, Result<PathBuf, ExportError>> {
        Box::pin(async move {
            let name = cid.to_string();
            let output = tokio::process::Command::new(&self.program)
                .args(&self.args)
                .arg(&name)
                .output()
                .await
                .map_err(|source| ExportError::Spawn {
                    program: self.program.clone(),
                    source,
                })?;

            if !output.status.success() {
                return Err(ExportError::Failed {
                    code: output.status.code().unwrap_or(-1),
                    stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                });
            }

            let path = self.out_dir.join(format!("{name}.car"));
            tokio::fs::write(&path, &output.stdout)
                .await
                .map_err(|source| ExportError::Write {
                    path: path.clone(),
                    source,
                })?;
            Ok(path)
        })
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ExportStats {
    pub exported: usize,
    pub failed: usize,
}

pub struct ExportPipeline {
    exporter: Arc<dyn Exporter>,
    selection: ExportSelection,
    semaphore: Arc<Semaphore>,
    tasks: Mutex<JoinSet<()>>,
    exported: Arc<AtomicUsize>,
    failed: Arc<AtomicUsize>,
    cancel: CancellationToken,
}

impl ExportPipeline {
    pub fn new(
        exporter: Arc<dyn Exporter>,
        selection: ExportSelection,
        concurrency: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            exporter,
            selection,
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
            tasks: Mutex::new(JoinSet::new()),
            exported: Arc::new(AtomicUsize::new(0)),
            failed: Arc::new(AtomicUsize::new(0)),
            cancel,
        }
    }

    pub fn selects(&self, result: &ProbeResult) -> bool {
        match self.selection {
            ExportSelection::NotFound => result.outcome() == Outcome::NotFound,
            ExportSelection::Found => result.outcome() == Outcome::Found,
        }
    }

    /// Queue an export if the result is selected. Waits for a free slot.
    pub async fn offer(&self, result: &ProbeResult) {
        if self.selects(result) {
            self.submit(result.cid.clone()).await;
        }
    }

    pub async fn submit(&self, cid: ContentId) {
        let permit = tokio::select! {
            _ = self.cancel.cancelled() => return,
            p = self.semaphore.clone().acquire_owned() => match p {
                Ok(p) => p,
                Err(_) => return, // semaphore closed
            },
        };

        let exporter = self.exporter.clone();
        let exported = self.exported.clone();
        let failed = self.failed.clone();

        let mut tasks = self.tasks.lock().await;
        // Reap finished exports so the set doesn't grow with the run.
        while tasks.try_join_next().is_some() {}
        tasks.spawn(async move {
            match exporter.export(&cid).await {
                Ok(path) => {
                    exported.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(%cid, path = %path.display(), "exported");
                }
                Err(e) => {
                    failed.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(%cid, error = %e, "export failed");
                }
            }
            drop(permit);
        });
    }

    /// Wait for every queued export to finish.
    pub async fn finish(&self) -> ExportStats {
        let mut tasks = self.tasks.lock().await;
        while let Some(res) = tasks.join_next().await {
            if let Err(e) = res {
                self.failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(error = %e, "export task panicked");
            }
        }
        ExportStats {
            exported: self.exported.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

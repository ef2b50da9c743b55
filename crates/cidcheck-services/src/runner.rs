//! One probing run: setup, dispatch, teardown.
//!
//! Setup failures (unreadable input, unreachable peer, uncreatable output
//! files) are returned as errors. Anything that goes wrong after the
//! dispatcher starts is captured per CID and the run completes.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use cidcheck_core::config::CheckConfig;

use crate::correlator::Correlator;
use crate::dispatcher::{DispatchSettings, Dispatcher, RunSummary};
use crate::export::{CommandExporter, ExportPipeline, ExportStats, Exporter};
use crate::input::{load_cid_file, start_index};
use crate::sink::OutputSink;
use crate::tcp_session::{PeerAddr, TcpSession};
use crate::Session;

#[derive(Debug, Clone)]
pub struct RunRequest {
    pub peer: PeerAddr,
    pub cid_file: PathBuf,
    /// 1-indexed line to start from.
    pub offset: usize,
    pub config: CheckConfig,
}

#[derive(Debug)]
pub struct RunReport {
    pub summary: RunSummary,
    pub export: Option<ExportStats>,
    pub not_found_path: PathBuf,
    pub progress_path: PathBuf,
    pub debug_path: Option<PathBuf>,
    pub cancelled: bool,
}

pub async fn run(request: RunRequest, cancel: CancellationToken) -> Result<RunReport> {
    let exporter = Arc::new(CommandExporter::from_config(&request.config.export));
    run_with_exporter(request, exporter, cancel).await
}

/// `run` with the export stage's archive producer supplied by the caller.
pub async fn run_with_exporter(
    request: RunRequest,
    exporter: Arc<dyn Exporter>,
    cancel: CancellationToken,
) -> Result<RunReport> {
    let RunRequest {
        peer,
        cid_file,
        offset,
        config,
    } = request;

    let cids = load_cid_file(&cid_file).context("failed to load CID list")?;
    let start = start_index(offset);
    if start >= cids.len() && !cids.is_empty() {
        tracing::warn!(offset, cids = cids.len(), "offset is past the end of the CID list");
    }
    tracing::info!(file = %cid_file.display(), cids = cids.len(), offset, "loaded CID list");

    let correlator = Correlator::new(peer.id.clone(), config.probe.stream_capacity, cancel.clone());
    let session = Arc::new(
        TcpSession::connect(
            &peer,
            correlator.clone(),
            config.probe.dial_timeout(),
            cancel.clone(),
        )
        .await
        .with_context(|| format!("failed to connect to {}", peer.id))?,
    );

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock is before the unix epoch")?
        .as_millis() as u64;
    let sink = Arc::new(OutputSink::create(
        &config.output.dir,
        timestamp,
        config.output.debug_log,
    )?);

    let export = if config.export.enabled {
        std::fs::create_dir_all(&config.export.out_dir).with_context(|| {
            format!("failed to create export dir {}", config.export.out_dir.display())
        })?;
        Some(Arc::new(ExportPipeline::new(
            exporter,
            config.export.selection,
            config.export.concurrency,
            cancel.clone(),
        )))
    } else {
        None
    };

    let dispatcher = Dispatcher::new(
        session.clone(),
        correlator,
        sink.clone(),
        export.clone(),
        DispatchSettings::from(&config.probe),
        cancel.clone(),
    );
    let summary = dispatcher.run(&cids, start).await;

    let export_stats = match &export {
        Some(pipeline) => Some(pipeline.finish().await),
        None => None,
    };
    sink.flush();
    session.close().await;

    let cancelled = cancel.is_cancelled();
    if cancelled {
        tracing::warn!("run cancelled, unresolved CIDs were recorded as unresponded");
    }
    tracing::info!(%summary, "run complete");

    Ok(RunReport {
        summary,
        export: export_stats,
        not_found_path: sink.not_found_path().to_path_buf(),
        progress_path: sink.progress_path().to_path_buf(),
        debug_path: sink.debug_path().map(|p| p.to_path_buf()),
        cancelled,
    })
}

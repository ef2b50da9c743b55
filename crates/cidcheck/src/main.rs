//! cidcheck: probe one peer for a list of CIDs and record what it lacks.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;

use cidcheck_core::config::{CheckConfig, ExportSelection};
use cidcheck_services::{PeerAddr, RunRequest};

#[derive(Parser, Debug)]
#[command(version, about = "Ask a single peer which CIDs it has")]
struct Cli {
    /// Target peer, as `<peer-id>@<host:port>`.
    #[arg(long)]
    peer: String,

    /// Newline-delimited list of CIDs.
    #[arg(long)]
    cid_file: PathBuf,

    /// Batches in flight at once.
    #[arg(short = 'k', long, visible_aliases = ["goroutines", "gs"])]
    concurrency: Option<usize>,

    /// 1-indexed line of the CID file to start from.
    #[arg(short = 'o', long, default_value_t = 1)]
    offset: usize,

    /// Export absent CIDs to `.car` archives via the configured program.
    #[arg(short = 'd', long)]
    dagexport: bool,

    /// Export CIDs the peer has instead of the ones it lacks.
    #[arg(long, requires = "dagexport")]
    export_found: bool,

    #[arg(long)]
    batch_size: Option<usize>,

    /// Per-batch reply timeout, in seconds.
    #[arg(long)]
    timeout: Option<u64>,

    /// Write every probe result to a JSON-lines debug log.
    #[arg(long)]
    debug: bool,

    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Start after the last contiguous completed batch in `--progress-log`.
    #[arg(long, requires = "progress_log", conflicts_with = "offset")]
    resume: bool,

    #[arg(long)]
    progress_log: Option<PathBuf>,

    /// Config file; defaults to $CIDCHECK_CONFIG or the XDG location.
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Cli {
    /// Flags win over env and file settings.
    fn apply(&self, config: &mut CheckConfig) {
        if let Some(k) = self.concurrency {
            config.probe.concurrency = k;
        }
        if let Some(b) = self.batch_size {
            config.probe.batch_size = b;
        }
        if let Some(t) = self.timeout {
            config.probe.batch_timeout_secs = t;
        }
        if self.debug {
            config.output.debug_log = true;
        }
        if let Some(dir) = &self.output_dir {
            config.output.dir = dir.clone();
        }
        if self.dagexport {
            config.export.enabled = true;
        }
        if self.export_found {
            config.export.selection = ExportSelection::Found;
        }
    }

    /// 1-indexed line to start probing from.
    fn start_offset(&self) -> Result<usize> {
        if !self.resume {
            return Ok(self.offset);
        }
        let Some(path) = &self.progress_log else {
            anyhow::bail!("--resume needs --progress-log");
        };
        let offset = cidcheck_services::resume_offset_from_file(path)
            .with_context(|| format!("failed to read progress log {}", path.display()))?;
        match offset {
            Some(o) => {
                tracing::info!(offset = o, log = %path.display(), "resuming");
                Ok(o)
            }
            None => {
                tracing::warn!(log = %path.display(), "progress log has no records, starting from line 1");
                Ok(1)
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => CheckConfig::load_from(path),
        None => CheckConfig::load(),
    }
    .context("failed to load config")?;
    cli.apply(&mut config);
    config.validate()?;

    let request = RunRequest {
        peer: cli.peer.parse::<PeerAddr>().context("bad --peer")?,
        cid_file: cli.cid_file.clone(),
        offset: cli.start_offset()?,
        config,
    };

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted, finishing in-flight batches");
                cancel.cancel();
            }
        });
    }

    let report = cidcheck_services::run(request, cancel).await?;

    println!("{}", report.summary);
    if let Some(export) = report.export {
        println!("exported: {}\texport failures: {}", export.exported, export.failed);
    }
    println!("not found: {}", report.not_found_path.display());
    println!("progress: {}", report.progress_path.display());
    if let Some(debug) = report.debug_path {
        println!("debug: {}", debug.display());
    }
    if report.cancelled {
        anyhow::bail!("run was interrupted");
    }
    Ok(())
}

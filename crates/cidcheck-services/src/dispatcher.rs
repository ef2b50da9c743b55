//! Dispatcher: bounded-concurrency batch workers.
//!
//! Each batch gets one worker. The worker subscribes to the correlator,
//! sends its want-have query, then classifies every reply on its stream
//! until the batch is resolved, the batch timeout passes, the stream fails,
//! or the run is cancelled. Every path ends with one result per CID.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use cidcheck_core::config::ProbeConfig;
use cidcheck_core::{ContentId, Outcome, ProbeResult, Query};

use crate::batcher::{batches, Batch};
use crate::correlator::{Correlator, CorrelatorEvent};
use crate::export::ExportPipeline;
use crate::pending::PendingBatch;
use crate::session::{Session, SessionError};
use crate::sink::ResultSink;

#[derive(Debug, Clone, Copy)]
pub struct DispatchSettings {
    pub batch_size: usize,
    pub concurrency: usize,
    pub batch_timeout: Duration,
    pub send_timeout: Duration,
}

impl From<&ProbeConfig> for DispatchSettings {
    fn from(c: &ProbeConfig) -> Self {
        Self {
            batch_size: c.batch_size,
            concurrency: c.concurrency,
            batch_timeout: c.batch_timeout(),
            send_timeout: c.send_timeout(),
        }
    }
}

/// Per-run tallies.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub batches: usize,
    pub total: usize,
    pub found: usize,
    pub not_found: usize,
    pub unresponded: usize,
    pub errored: usize,
    /// Signals that contradicted an earlier classification and were ignored.
    pub conflicts: usize,
}

impl RunSummary {
    fn add(&mut self, result: &ProbeResult) {
        self.total += 1;
        match result.outcome() {
            Outcome::Found => self.found += 1,
            Outcome::NotFound => self.not_found += 1,
            Outcome::Unresponded => self.unresponded += 1,
            Outcome::Errored => self.errored += 1,
        }
    }

    fn merge(&mut self, other: RunSummary) {
        self.batches += other.batches;
        self.total += other.total;
        self.found += other.found;
        self.not_found += other.not_found;
        self.unresponded += other.unresponded;
        self.errored += other.errored;
        self.conflicts += other.conflicts;
    }
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "batches: {}\tcids: {}\tfound: {}\tnot found: {}\tunresponded: {}\terrors: {}\tconflicts: {}",
            self.batches,
            self.total,
            self.found,
            self.not_found,
            self.unresponded,
            self.errored,
            self.conflicts
        )
    }
}

/// Everything one batch produced.
#[derive(Debug)]
pub struct BatchOutcome {
    pub results: Vec<ProbeResult>,
    pub conflicts: usize,
    /// Abandoned because the run was cancelled. Such a batch is not
    /// recorded as completed, so a resumed run probes it again.
    pub cancelled: bool,
}

/// Shared, cheaply cloned state handed to every batch worker.
#[derive(Clone)]
struct BatchWorker {
    session: Arc<dyn Session>,
    correlator: Arc<Correlator>,
    sink: Arc<dyn ResultSink>,
    export: Option<Arc<ExportPipeline>>,
    settings: DispatchSettings,
    cancel: CancellationToken,
}

pub struct Dispatcher {
    worker: BatchWorker,
}

impl Dispatcher {
    pub fn new(
        session: Arc<dyn Session>,
        correlator: Arc<Correlator>,
        sink: Arc<dyn ResultSink>,
        export: Option<Arc<ExportPipeline>>,
        settings: DispatchSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            worker: BatchWorker {
                session,
                correlator,
                sink,
                export,
                settings,
                cancel,
            },
        }
    }

    /// Probe `cids[start..]`. Returns once every batch has recorded a result
    /// for each of its CIDs.
    pub async fn run(&self, cids: &[ContentId], start: usize) -> RunSummary {
        let settings = self.worker.settings;
        let semaphore = Arc::new(Semaphore::new(settings.concurrency.max(1)));
        let mut tasks: JoinSet<RunSummary> = JoinSet::new();
        let mut summary = RunSummary::default();

        let planned = batches(cids, start, settings.batch_size);
        tracing::info!(
            cids = cids.len().saturating_sub(start),
            batches = planned.len(),
            concurrency = settings.concurrency,
            "dispatch starting"
        );

        for batch in planned {
            // Admission blocks once `concurrency` batches are in flight.
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => break, // semaphore closed
            };
            while let Some(done) = tasks.try_join_next() {
                collect(&mut summary, done);
            }

            self.worker.sink.batch_dispatched(&batch);
            let worker = self.worker.clone();
            tasks.spawn(async move {
                let s = worker.run_batch(batch).await;
                drop(permit);
                s
            });
        }

        while let Some(done) = tasks.join_next().await {
            collect(&mut summary, done);
        }
        summary
    }
}

fn collect(summary: &mut RunSummary, done: Result<RunSummary, tokio::task::JoinError>) {
    match done {
        Ok(s) => summary.merge(s),
        Err(e) => tracing::error!(error = %e, "batch worker panicked"),
    }
}

impl BatchWorker {
    async fn run_batch(&self, batch: Batch) -> RunSummary {
        let started = std::time::Instant::now();
        let outcome = probe_batch(
            self.session.as_ref(),
            &self.correlator,
            &batch,
            self.settings,
            &self.cancel,
        )
        .await;

        let mut summary = RunSummary {
            batches: 1,
            conflicts: outcome.conflicts,
            ..Default::default()
        };
        for result in &outcome.results {
            summary.add(result);
            self.sink.record(result);
            if let Some(export) = &self.export {
                export.offer(result).await;
            }
        }
        if !outcome.cancelled {
            self.sink.batch_completed(&batch);
        }

        tracing::info!(
            batch = batch.seq,
            lines = %format!("{}-{}", batch.first_line(), batch.last_line()),
            haves = summary.found,
            dont_haves = summary.not_found,
            unresolved = summary.unresponded + summary.errored,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "batch complete"
        );
        summary
    }
}

enum Stop {
    Resolved,
    Timeout,
    Cancelled,
    Failed(String),
}

/// Run one batch to completion against the shared reply stream.
pub async fn probe_batch(
    session: &dyn Session,
    correlator: &Arc<Correlator>,
    batch: &Batch,
    settings: DispatchSettings,
    cancel: &CancellationToken,
) -> BatchOutcome {
    // Subscribe before sending so no early reply is missed.
    let mut stream = correlator.subscribe();
    let mut pending = PendingBatch::new(&batch.cids);
    let mut results = Vec::with_capacity(batch.cids.len());

    let sent = tokio::select! {
        _ = cancel.cancelled() => Err(None),
        r = tokio::time::timeout(settings.send_timeout, session.send(Query::want_have(&batch.cids))) => {
            match r {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(Some(e)),
                Err(_) => Err(Some(SessionError::SendTimeout)),
            }
        }
    };
    match sent {
        Ok(()) => {}
        Err(Some(e)) => {
            tracing::warn!(batch = batch.seq, error = %e, "query send failed");
            results.extend(pending.abandon(false, Some(&e.to_string())));
            return BatchOutcome {
                results,
                conflicts: 0,
                cancelled: false,
            };
        }
        Err(None) => {
            results.extend(pending.abandon(false, Some("cancelled")));
            return BatchOutcome {
                results,
                conflicts: 0,
                cancelled: true,
            };
        }
    }

    let deadline = tokio::time::Instant::now() + settings.batch_timeout;
    let target = session.target();

    let stop = loop {
        if pending.is_resolved() {
            break Stop::Resolved;
        }
        let event = tokio::select! {
            _ = cancel.cancelled() => break Stop::Cancelled,
            _ = tokio::time::sleep_until(deadline) => break Stop::Timeout,
            ev = stream.recv() => ev,
        };
        match event.as_deref() {
            None => break Stop::Failed("reply stream closed".to_string()),
            Some(CorrelatorEvent::Reply(reply)) => {
                let (resolved, applied) = pending.apply(reply);
                if !resolved.is_empty() {
                    tracing::debug!(
                        batch = batch.seq,
                        haves = applied.haves,
                        dont_haves = applied.dont_haves,
                        pending = pending.pending_len(),
                        "reply applied"
                    );
                }
                results.extend(resolved);
            }
            Some(CorrelatorEvent::Mismatch { expected, got }) if expected == target => {
                break Stop::Failed(format!("expected peer {expected}, got {got}"));
            }
            Some(CorrelatorEvent::Mismatch { .. }) => {}
            Some(CorrelatorEvent::TransportError(e)) => break Stop::Failed(e.to_string()),
        }
    };

    let cancelled = matches!(stop, Stop::Cancelled);
    match stop {
        Stop::Resolved => {}
        // Nothing named these CIDs before the deadline.
        Stop::Timeout => {
            tracing::debug!(
                batch = batch.seq,
                unresolved = pending.pending_len(),
                "batch timed out"
            );
            results.extend(pending.abandon(false, None));
        }
        Stop::Cancelled => results.extend(pending.abandon(false, Some("cancelled"))),
        Stop::Failed(reason) => {
            tracing::warn!(batch = batch.seq, reason = %reason, "batch abandoned");
            let responded = pending.saw_reply();
            results.extend(pending.abandon(responded, Some(&reason)));
        }
    }

    BatchOutcome {
        results,
        conflicts: pending.conflicts(),
        cancelled,
    }
}

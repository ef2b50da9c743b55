//! cidcheck-services: the probing pipeline.
//!
//! Batching, the peer session, reply correlation, per-batch
//! classification, output logs, the optional export stage, and the
//! run orchestration that ties them together.

pub mod batcher;
pub mod correlator;
pub mod dispatcher;
pub mod export;
pub mod input;
pub mod pending;
pub mod progress;
pub mod runner;
pub mod session;
pub mod sink;
pub mod tcp_session;

pub use batcher::{batches, Batch};
pub use correlator::{Correlator, CorrelatorEvent, Subscription};
pub use dispatcher::{probe_batch, BatchOutcome, DispatchSettings, Dispatcher, RunSummary};
pub use export::{CommandExporter, ExportError, ExportPipeline, ExportStats, Exporter};
pub use input::{load_cid_file, parse_cid_list, start_index, InputError};
pub use pending::PendingBatch;
pub use progress::{resume_offset, resume_offset_from_file, ProgressRecord};
pub use runner::{run, run_with_exporter, RunReport, RunRequest};
pub use session::{ReplyHandler, Session, SessionError};
pub use sink::{OutputSink, ResultSink};
pub use tcp_session::{PeerAddr, TcpSession};

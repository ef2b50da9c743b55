//! cidcheck-core: shared types, message encoding, and configuration.
//! All other cidcheck crates depend on this one.

pub mod cid;
pub mod config;
pub mod message;
pub mod result;

pub use cid::{CidError, ContentId, PeerIdentity};
pub use message::{Frame, Query, Reply};
pub use result::{Outcome, ProbeResult};

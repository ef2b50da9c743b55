//! Terminal per-CID probe outcome.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cid::ContentId;

/// Created once when a CID leaves its pending batch; never mutated after.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub cid: ContentId,
    pub found: bool,
    /// The peer sent a signal that covered this CID's batch.
    pub responded: bool,
    pub error: Option<String>,
    #[serde(rename = "elapsed_ms", with = "millis")]
    pub elapsed: Duration,
}

/// Coarse classification used for tallies and export selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Found,
    NotFound,
    Unresponded,
    Errored,
}

impl ProbeResult {
    pub fn found(cid: ContentId, elapsed: Duration) -> Self {
        Self {
            cid,
            found: true,
            responded: true,
            error: None,
            elapsed,
        }
    }

    pub fn not_found(cid: ContentId, elapsed: Duration) -> Self {
        Self {
            cid,
            found: false,
            responded: true,
            error: None,
            elapsed,
        }
    }

    /// Abandoned without a resolving signal.
    pub fn unresolved(
        cid: ContentId,
        responded: bool,
        error: Option<String>,
        elapsed: Duration,
    ) -> Self {
        Self {
            cid,
            found: false,
            responded,
            error,
            elapsed,
        }
    }

    pub fn outcome(&self) -> Outcome {
        if self.found {
            Outcome::Found
        } else if self.error.is_some() {
            Outcome::Errored
        } else if self.responded {
            Outcome::NotFound
        } else {
            Outcome::Unresponded
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

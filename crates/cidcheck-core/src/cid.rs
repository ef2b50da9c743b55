//! Content and peer identifiers.
//!
//! `ContentId` is the correlation key for the whole probe: replies carry no
//! request ID, so equality of content identifiers is the only thing linking
//! an inbound reply to the batch that asked for it.

use std::fmt;
use std::str::FromStr;

use cid::multihash::Multihash;
use cid::Cid;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

const RAW_CODEC: u64 = 0x55;
const SHA2_256: u64 = 0x12;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CidError {
    #[error("invalid content identifier {input:?}: {reason}")]
    Invalid { input: String, reason: String },
    #[error("empty peer identity")]
    EmptyPeer,
}

/// Self-describing content identifier (CIDv0 or CIDv1).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentId(Cid);

impl ContentId {
    pub fn from_cid(cid: Cid) -> Self {
        Self(cid)
    }

    /// CIDv1 with the raw codec over a sha2-256 digest.
    pub fn from_raw_digest(digest: &[u8; 32]) -> Result<Self, CidError> {
        let hash = Multihash::<64>::wrap(SHA2_256, digest).map_err(|e| CidError::Invalid {
            input: format!("{digest:02x?}"),
            reason: e.to_string(),
        })?;
        Ok(Self(Cid::new_v1(RAW_CODEC, hash)))
    }

    pub fn as_cid(&self) -> &Cid {
        &self.0
    }
}

impl FromStr for ContentId {
    type Err = CidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Cid::from_str(s.trim())
            .map(Self)
            .map_err(|e| CidError::Invalid {
                input: s.to_string(),
                reason: e.to_string(),
            })
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentId({})", self.0)
    }
}

// Serialized as the canonical string form so frames and logs stay readable.
impl Serialize for ContentId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ContentId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Opaque identity of the remote peer. Fixed for the lifetime of a run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerIdentity(String);

impl PeerIdentity {
    pub fn new(id: impl Into<String>) -> Result<Self, CidError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(CidError::EmptyPeer);
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

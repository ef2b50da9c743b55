//! Query and reply messages exchanged with the probed peer.
//!
//! On the line transport every message is one JSON object terminated by
//! `\n`, tagged by `type`. A reply is attributed to the peer named in `from`;
//! there is no request identifier, so replies are matched to queries by
//! content alone.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::cid::{ContentId, PeerIdentity};

/// What the sender wants back for an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WantType {
    /// Presence only. The peer answers HAVE or DONT_HAVE.
    Have,
    /// Full block transfer. Never sent by the prober.
    Block,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WantEntry {
    pub cid: ContentId,
    pub want_type: WantType,
    /// Ask the peer to answer DONT_HAVE explicitly instead of staying silent.
    pub send_dont_have: bool,
}

/// Outbound want-have query for one batch. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    entries: Vec<WantEntry>,
}

impl Query {
    /// Build a presence-only query, preserving batch order.
    pub fn want_have(cids: &[ContentId]) -> Self {
        Self {
            entries: cids
                .iter()
                .map(|cid| WantEntry {
                    cid: cid.clone(),
                    want_type: WantType::Have,
                    send_dont_have: true,
                })
                .collect(),
        }
    }

    pub fn entries(&self) -> &[WantEntry] {
        &self.entries
    }
}

/// Inbound presence signals from the peer.
///
/// The three sets are disjoint within one reply. `blocks` carries the
/// identifiers of returned content bodies; a block implies "have".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    #[serde(default)]
    pub haves: Vec<ContentId>,
    #[serde(default)]
    pub dont_haves: Vec<ContentId>,
    #[serde(default)]
    pub blocks: Vec<ContentId>,
}

impl Reply {
    /// True if any identifier in the reply is in `wanted`.
    pub fn overlaps(&self, wanted: &HashSet<ContentId>) -> bool {
        self.blocks
            .iter()
            .chain(&self.haves)
            .chain(&self.dont_haves)
            .any(|c| wanted.contains(c))
    }
}

/// One line on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    Query(Query),
    Reply {
        from: PeerIdentity,
        #[serde(flatten)]
        reply: Reply,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl Frame {
    /// Encode as a single newline-terminated line.
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(line)
    }

    pub fn decode(line: &str) -> Result<Self, FrameError> {
        Ok(serde_json::from_str(line.trim_end())?)
    }
}

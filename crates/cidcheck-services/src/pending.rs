//! Pending batch: per-batch classification of presence signals.
//!
//! Owned by exactly one batch worker. A CID leaves the pending set the first
//! time any reply names it; later signals for it are ignored, and counted as
//! conflicts when they disagree with the first classification.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use cidcheck_core::{ContentId, ProbeResult, Reply};

pub struct PendingBatch {
    /// Batch order, used when abandoning.
    members: Vec<ContentId>,
    pending: HashSet<ContentId>,
    /// First classification of every resolved member (true = found).
    resolved: HashMap<ContentId, bool>,
    started: Instant,
    saw_reply: bool,
    conflicts: usize,
}

/// Counts from one `apply`, for the batch summary line.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Applied {
    pub haves: usize,
    pub dont_haves: usize,
}

impl PendingBatch {
    pub fn new(cids: &[ContentId]) -> Self {
        Self {
            members: cids.to_vec(),
            pending: cids.iter().cloned().collect(),
            resolved: HashMap::with_capacity(cids.len()),
            started: Instant::now(),
            saw_reply: false,
            conflicts: 0,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Whether any reply touching this batch has arrived.
    pub fn saw_reply(&self) -> bool {
        self.saw_reply
    }

    pub fn conflicts(&self) -> usize {
        self.conflicts
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Classify one reply. Blocks and haves are applied before dont-haves,
    /// so a CID named in both within a single reply resolves as found.
    pub fn apply(&mut self, reply: &Reply) -> (Vec<ProbeResult>, Applied) {
        let mut out = Vec::new();
        let mut applied = Applied::default();
        if !reply.overlaps(&self.pending) && !self.mentions_resolved(reply) {
            return (out, applied);
        }
        self.saw_reply = true;
        let elapsed = self.elapsed();

        for cid in reply.blocks.iter().chain(&reply.haves) {
            if self.resolve(cid, true) {
                applied.haves += 1;
                out.push(ProbeResult::found(cid.clone(), elapsed));
            }
        }
        for cid in &reply.dont_haves {
            if self.resolve(cid, false) {
                applied.dont_haves += 1;
                out.push(ProbeResult::not_found(cid.clone(), elapsed));
            }
        }
        (out, applied)
    }

    /// Resolve every remaining member as not found, in batch order.
    pub fn abandon(&mut self, responded: bool, error: Option<&str>) -> Vec<ProbeResult> {
        let elapsed = self.elapsed();
        let pending = &mut self.pending;
        self.members
            .iter()
            .filter(|c| pending.remove(*c))
            .map(|c| {
                ProbeResult::unresolved(c.clone(), responded, error.map(str::to_string), elapsed)
            })
            .collect()
    }

    fn mentions_resolved(&self, reply: &Reply) -> bool {
        reply
            .blocks
            .iter()
            .chain(&reply.haves)
            .chain(&reply.dont_haves)
            .any(|c| self.resolved.contains_key(c))
    }

    /// Returns true if `cid` was pending and is now resolved.
    fn resolve(&mut self, cid: &ContentId, found: bool) -> bool {
        if self.pending.remove(cid) {
            self.resolved.insert(cid.clone(), found);
            return true;
        }
        if let Some(first) = self.resolved.get(cid) {
            if *first != found {
                self.conflicts += 1;
                tracing::debug!(%cid, first_found = *first, "conflicting signal ignored");
            }
        }
        false
    }
}

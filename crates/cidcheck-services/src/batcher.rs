//! Batcher: splits the CID list into contiguous, fixed-size batches.

use cidcheck_core::ContentId;

/// One contiguous slice of the input, with its position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// Sequence number within this run, starting at 0.
    pub seq: usize,
    /// 0-based index of the first CID in the full input.
    pub start: usize,
    pub cids: Vec<ContentId>,
}

impl Batch {
    /// 1-indexed input line of the first CID.
    pub fn first_line(&self) -> usize {
        self.start + 1
    }

    /// 1-indexed input line of the last CID.
    pub fn last_line(&self) -> usize {
        self.start + self.cids.len()
    }
}

/// Lazy iterator over `[offset, end)` in steps of `size`.
pub struct Batches<'a> {
    cids: &'a [ContentId],
    next: usize,
    size: usize,
    seq: usize,
}

/// Batches covering `cids[offset..]`. An offset past the end yields nothing.
/// A `size` of zero is treated as one.
pub fn batches(cids: &[ContentId], offset: usize, size: usize) -> Batches<'_> {
    Batches {
        cids,
        next: offset.min(cids.len()),
        size: size.max(1),
        seq: 0,
    }
}

impl Iterator for Batches<'_> {
    type Item = Batch;

    fn next(&mut self) -> Option<Batch> {
        if self.next >= self.cids.len() {
            return None;
        }
        let start = self.next;
        let end = (start + self.size).min(self.cids.len());
        self.next = end;
        let seq = self.seq;
        self.seq += 1;
        Some(Batch {
            seq,
            start,
            cids: self.cids[start..end].to_vec(),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.cids.len() - self.next;
        let n = remaining.div_ceil(self.size);
        (n, Some(n))
    }
}

impl ExactSizeIterator for Batches<'_> {}

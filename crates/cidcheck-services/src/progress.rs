//! Progress log records and resume-offset recovery.
//!
//! One tab-separated line per event:
//!   dispatched <seq> <first_line> <last_line> <cid,cid,...>
//!   completed  <seq> <first_line> <last_line>
//! Line numbers are 1-indexed positions in the input file.

use std::path::Path;

use crate::batcher::Batch;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressRecord {
    Dispatched {
        seq: usize,
        first_line: usize,
        last_line: usize,
        cids: Vec<String>,
    },
    Completed {
        seq: usize,
        first_line: usize,
        last_line: usize,
    },
}

impl ProgressRecord {
    pub fn dispatched(batch: &Batch) -> Self {
        Self::Dispatched {
            seq: batch.seq,
            first_line: batch.first_line(),
            last_line: batch.last_line(),
            cids: batch.cids.iter().map(|c| c.to_string()).collect(),
        }
    }

    pub fn completed(batch: &Batch) -> Self {
        Self::Completed {
            seq: batch.seq,
            first_line: batch.first_line(),
            last_line: batch.last_line(),
        }
    }

    pub fn to_line(&self) -> String {
        match self {
            Self::Dispatched {
                seq,
                first_line,
                last_line,
                cids,
            } => format!("dispatched\t{seq}\t{first_line}\t{last_line}\t{}", cids.join(",")),
            Self::Completed {
                seq,
                first_line,
                last_line,
            } => format!("completed\t{seq}\t{first_line}\t{last_line}"),
        }
    }

    pub fn parse(line: &str) -> Option<Self> {
        let mut fields = line.trim_end().split('\t');
        let kind = fields.next()?;
        let seq = fields.next()?.parse().ok()?;
        let first_line = fields.next()?.parse().ok()?;
        let last_line = fields.next()?.parse().ok()?;
        match kind {
            "dispatched" => Some(Self::Dispatched {
                seq,
                first_line,
                last_line,
                cids: fields
                    .next()
                    .unwrap_or("")
                    .split(',')
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
            }),
            "completed" => Some(Self::Completed {
                seq,
                first_line,
                last_line,
            }),
            _ => None,
        }
    }
}

/// The 1-indexed offset to restart from: one past the longest contiguous
/// run of completed batches, counted from the earliest line the log covers.
/// `None` if the log has no usable records.
pub fn resume_offset(records: &[ProgressRecord]) -> Option<usize> {
    let start = records
        .iter()
        .map(|r| match r {
            ProgressRecord::Dispatched { first_line, .. }
            | ProgressRecord::Completed { first_line, .. } => *first_line,
        })
        .min()?;

    let mut completed: Vec<(usize, usize)> = records
        .iter()
        .filter_map(|r| match r {
            ProgressRecord::Completed {
                first_line,
                last_line,
                ..
            } => Some((*first_line, *last_line)),
            _ => None,
        })
        .collect();
    completed.sort_unstable();

    let mut next = start;
    for (first, last) in completed {
        if first > next {
            break;
        }
        next = next.max(last + 1);
    }
    Some(next)
}

/// Read a progress log from disk and compute its resume offset.
pub fn resume_offset_from_file(path: &Path) -> std::io::Result<Option<usize>> {
    let text = std::fs::read_to_string(path)?;
    let records: Vec<ProgressRecord> = text
        .lines()
        .filter_map(|line| {
            let rec = ProgressRecord::parse(line);
            if rec.is_none() && !line.trim().is_empty() {
                tracing::warn!(line, "skipping unreadable progress record");
            }
            rec
        })
        .collect();
    Ok(resume_offset(&records))
}

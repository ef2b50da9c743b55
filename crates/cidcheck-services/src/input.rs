//! CID input file loading.
//!
//! Newline-delimited CID strings. Trailing blank lines are tolerated; a blank
//! or unparsable line anywhere else is a setup error naming its line number.

use std::path::{Path, PathBuf};

use cidcheck_core::{CidError, ContentId};

#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("line {line}: empty line inside CID list")]
    Blank { line: usize },
    #[error("line {line}: {source}")]
    Invalid { line: usize, source: CidError },
}

pub fn load_cid_file(path: &Path) -> Result<Vec<ContentId>, InputError> {
    let text = std::fs::read_to_string(path).map_err(|source| InputError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_cid_list(&text)
}

pub fn parse_cid_list(text: &str) -> Result<Vec<ContentId>, InputError> {
    let lines: Vec<&str> = text.lines().collect();
    let end = lines
        .iter()
        .rposition(|l| !l.trim().is_empty())
        .map_or(0, |i| i + 1);

    lines[..end]
        .iter()
        .enumerate()
        .map(|(i, raw)| {
            let line = i + 1;
            if raw.trim().is_empty() {
                return Err(InputError::Blank { line });
            }
            raw.parse()
                .map_err(|source| InputError::Invalid { line, source })
        })
        .collect()
}

/// Convert a 1-indexed line offset to a 0-based start index.
/// Offsets below 1 start from the beginning.
pub fn start_index(offset: usize) -> usize {
    offset.saturating_sub(1)
}

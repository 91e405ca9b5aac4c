//! Exact token counting over a single file.
//!
//! Content is split on ASCII whitespace (including vertical tab) and each
//! token is compared byte-for-byte with the query. No substring, case folding
//! or regex.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    /// The file could not be opened. Callers treat this as fatal.
    #[error("cannot open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed reading {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Count the whitespace-delimited tokens in `path` that equal `token`.
pub fn count_token(path: &Path, token: &str) -> Result<u64, SearchError> {
    let file = File::open(path).map_err(|source| SearchError::Open {
        path: path.to_path_buf(),
        source,
    })?;

    count_in_reader(BufReader::new(file), token).map_err(|source| SearchError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Line-at-a-time counting over any buffered reader.
pub fn count_in_reader<R: BufRead>(mut reader: R, token: &str) -> io::Result<u64> {
    let needle = token.as_bytes();
    if needle.is_empty() {
        return Ok(0);
    }

    let mut line = Vec::new();
    let mut count = 0u64;
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            break;
        }
        count += line
            .split(is_separator)
            .filter(|word| *word == needle)
            .count() as u64;
    }

    Ok(count)
}

/// Space, tab, newline, vertical tab, form feed, carriage return.
///
/// `u8::is_ascii_whitespace` leaves out vertical tab.
fn is_separator(byte: &u8) -> bool {
    byte.is_ascii_whitespace() || *byte == b'\x0B'
}

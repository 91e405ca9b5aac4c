//! Interactive query lines.

/// Largest query, in bytes, that is broadcast to workers.
pub const MAX_QUERY_BYTES: usize = 1024;

/// A non-empty query of at most [`MAX_QUERY_BYTES`] bytes with no trailing newline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query(String);

impl Query {
    /// Build a query from one raw input line.
    ///
    /// Exactly one trailing `\n` is stripped; nothing else is unescaped or
    /// trimmed. Returns `None` for an empty line. Oversized input is cut at
    /// the last character boundary that fits.
    pub fn from_line(line: &str) -> Option<Self> {
        let text = strip_newline(line);
        if text.is_empty() {
            return None;
        }

        if text.len() <= MAX_QUERY_BYTES {
            return Some(Self(text.to_string()));
        }

        let mut end = MAX_QUERY_BYTES;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        tracing::warn!(
            len = text.len(),
            max = MAX_QUERY_BYTES,
            "Query truncated to maximum length"
        );
        Some(Self(text[..end].to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Strip exactly one trailing newline, if present.
pub fn strip_newline(line: &str) -> &str {
    line.strip_suffix('\n').unwrap_or(line)
}

//! Header/body boundary detection.

use crate::error::{Error, Result};

/// Position of the blank line separating headers from the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Boundary {
    /// End of the header block, including the last header line's terminator.
    pub header_end: usize,
    /// Start of the body, just past the blank line.
    pub body_start: usize,
}

/// A message split into its header block and body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitMessage<'a> {
    /// Header lines, each with its line terminator.
    pub headers: &'a [u8],
    /// Everything after the blank separator line.
    pub body: &'a [u8],
}

/// Finds the first blank line, accepting both `\n\n` and `\n\r\n`.
///
/// A message that starts with a blank line has an empty header block.
#[must_use]
pub fn find_boundary(text: &[u8]) -> Option<Boundary> {
    if text.starts_with(b"\r\n") {
        return Some(Boundary {
            header_end: 0,
            body_start: 2,
        });
    }
    if text.starts_with(b"\n") {
        return Some(Boundary {
            header_end: 0,
            body_start: 1,
        });
    }

    let lf = find(text, b"\n\n").map(|pos| Boundary {
        header_end: pos + 1,
        body_start: pos + 2,
    });
    let crlf = find(text, b"\n\r\n").map(|pos| Boundary {
        header_end: pos + 1,
        body_start: pos + 3,
    });

    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.header_end <= b.header_end { a } else { b }),
        (a, b) => a.or(b),
    }
}

/// Returns the header block of `text`, or all of it when no blank line exists.
#[must_use]
pub fn header_block(text: &[u8]) -> &[u8] {
    find_boundary(text).map_or(text, |b| &text[..b.header_end])
}

/// Splits message text into header block and body.
///
/// # Errors
///
/// Returns [`Error::MissingBoundary`] if no blank line separates the two.
pub fn split_message(text: &[u8]) -> Result<SplitMessage<'_>> {
    let boundary = find_boundary(text).ok_or(Error::MissingBoundary(text.len()))?;
    Ok(SplitMessage {
        headers: &text[..boundary.header_end],
        body: &text[boundary.body_start..],
    })
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn test_split_crlf() {
        let split = split_message(b"A: 1\r\nB: 2\r\n\r\nbody\r\n").unwrap();
        assert_eq!(split.headers, b"A: 1\r\nB: 2\r\n");
        assert_eq!(split.body, b"body\r\n");
    }

    #[test]
    fn test_split_lf() {
        let split = split_message(b"A: 1\nB: 2\n\nbody\n").unwrap();
        assert_eq!(split.headers, b"A: 1\nB: 2\n");
        assert_eq!(split.body, b"body\n");
    }

    #[test]
    fn test_earliest_separator_wins() {
        let text = b"A: 1\n\nbody\r\n\r\nmore";
        let split = split_message(text).unwrap();
        assert_eq!(split.headers, b"A: 1\n");
        assert_eq!(split.body, b"body\r\n\r\nmore");

        let text = b"A: 1\r\n\r\nbody\n\nmore";
        let split = split_message(text).unwrap();
        assert_eq!(split.body, b"body\n\nmore");
    }

    #[test]
    fn test_body_keeps_leading_blank_lines() {
        let split = split_message(b"A: 1\r\n\r\n\r\nbody").unwrap();
        assert_eq!(split.body, b"\r\nbody");
    }

    #[test]
    fn test_empty_body() {
        let split = split_message(b"A: 1\r\n\r\n").unwrap();
        assert_eq!(split.body, b"");
    }

    #[test]
    fn test_leading_blank_line() {
        let split = split_message(b"\r\nbody").unwrap();
        assert_eq!(split.headers, b"");
        assert_eq!(split.body, b"body");
    }

    #[test]
    fn test_missing_boundary() {
        assert_eq!(
            split_message(b"A: 1\r\nB: 2\r\n"),
            Err(Error::MissingBoundary(12))
        );
        assert!(split_message(b"").is_err());
    }

    #[test]
    fn test_header_block_without_boundary() {
        assert_eq!(header_block(b"A: 1\r\nB: 2"), b"A: 1\r\nB: 2");
        assert_eq!(header_block(b"A: 1\r\n\r\nbody"), b"A: 1\r\n");
    }

    #[test]
    fn test_folded_header_then_blank() {
        let text = b"X-Spam-Status: Yes,\r\n  hits=7\r\n\r\nbody";
        let split = split_message(text).unwrap();
        assert_eq!(
            crate::retrieve_field(split.headers, "X-Spam-Status"),
            b"Yes,\r\n  hits=7"
        );
        assert_eq!(split.body, b"body");
    }
}

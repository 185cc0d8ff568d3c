//! Header field lookup on raw header blocks.

/// Compares two header field names case-insensitively.
#[must_use]
pub fn field_name_eq(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

/// Finds the offset of `name:` at the start of a header line.
///
/// A match only counts when it sits at offset 0 of the block or directly
/// after a `\n`, so `Subject` never matches inside `A-Subject:` or inside
/// another field's value.
#[must_use]
pub fn find_field(block: &[u8], name: &str) -> Option<usize> {
    let name = name.as_bytes();
    if name.is_empty() || block.len() <= name.len() {
        return None;
    }

    (0..block.len() - name.len())
        .filter(|&pos| pos == 0 || block[pos - 1] == b'\n')
        .find(|&pos| {
            block[pos..pos + name.len()].eq_ignore_ascii_case(name)
                && block[pos + name.len()] == b':'
        })
}

/// Retrieves the value of a header field from a raw header block.
///
/// Exactly one space after the colon is skipped. The value runs to the end
/// of its line and through any folded continuation lines (lines starting
/// with a space or tab), which are returned verbatim including their line
/// terminators. The terminator of the final line is not part of the value.
///
/// A missing field, an empty block and an empty field name all yield an
/// empty value.
///
/// ```
/// use spamgate_mime::retrieve_field;
///
/// let block = b"A-Subject: x\nSubject: hi\n";
/// assert_eq!(retrieve_field(block, "Subject"), b"hi");
/// assert_eq!(retrieve_field(block, "Missing"), b"");
/// ```
#[must_use]
pub fn retrieve_field<'a>(block: &'a [u8], name: &str) -> &'a [u8] {
    let Some(pos) = find_field(block, name) else {
        tracing::trace!(field = name, "field not found");
        return &[];
    };

    let mut start = pos + name.len() + 1;
    if block.get(start) == Some(&b' ') {
        start += 1;
    }

    let end = value_end(block, start);
    tracing::trace!(field = name, len = end - start, "field found");
    &block[start..end]
}

/// Returns the exclusive end of a (possibly folded) value starting at `from`.
fn value_end(block: &[u8], from: usize) -> usize {
    let mut idx = from;
    loop {
        let Some(offset) = block[idx..].iter().position(|&b| b == b'\n') else {
            return block.len();
        };
        let newline = idx + offset;

        if matches!(block.get(newline + 1), Some(b' ' | b'\t')) {
            idx = newline + 1;
            continue;
        }

        return if newline > from && block[newline - 1] == b'\r' {
            newline - 1
        } else {
            newline
        };
    }
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
    use proptest::prelude::*;

    #[test]
    fn test_anchored_match_skips_suffix() {
        let block = b"A-Subject: x\nSubject: hi\n\n";
        assert_eq!(retrieve_field(block, "Subject"), b"hi");
    }

    #[test]
    fn test_match_inside_value_ignored() {
        let block = b"X-Note: see Subject: fake\nSubject: real\n";
        assert_eq!(retrieve_field(block, "Subject"), b"real");
    }

    #[test]
    fn test_folded_value() {
        let block = b"X-Spam-Status: Yes,\n  hits=7\n\n";
        assert_eq!(retrieve_field(block, "X-Spam-Status"), b"Yes,\n  hits=7");
    }

    #[test]
    fn test_folded_value_crlf() {
        let block = b"X-Spam-Status: Yes,\r\n\thits=7\r\nX-Other: a\r\n";
        assert_eq!(retrieve_field(block, "X-Spam-Status"), b"Yes,\r\n\thits=7");
        assert_eq!(retrieve_field(block, "X-Other"), b"a");
    }

    #[test]
    fn test_multiple_continuations_stop_at_next_field() {
        let block = b"Received: one\n two\n three\nFrom: a@b\n";
        assert_eq!(retrieve_field(block, "Received"), b"one\n two\n three");
        assert_eq!(retrieve_field(block, "From"), b"a@b");
    }

    #[test]
    fn test_case_insensitive() {
        let block = b"x-spam-flag: YES\n";
        assert_eq!(retrieve_field(block, "X-Spam-Flag"), b"YES");
    }

    #[test]
    fn test_first_occurrence_wins() {
        let block = b"Subject: first\nSubject: second\n";
        assert_eq!(retrieve_field(block, "Subject"), b"first");
    }

    #[test]
    fn test_empty_inputs() {
        assert_eq!(retrieve_field(b"", "Subject"), b"");
        assert_eq!(retrieve_field(b"Subject: hi\n", ""), b"");
    }

    #[test]
    fn test_unterminated_last_line() {
        assert_eq!(retrieve_field(b"From: a\nSubject: tail", "Subject"), b"tail");
    }

    #[test]
    fn test_genuinely_empty_value() {
        assert_eq!(retrieve_field(b"Subject:\nFrom: a\n", "Subject"), b"");
        assert_eq!(retrieve_field(b"Subject:\r\nFrom: a\r\n", "Subject"), b"");
        assert_eq!(retrieve_field(b"Subject:", "Subject"), b"");
        assert_eq!(retrieve_field(b"Subject: ", "Subject"), b"");
    }

    #[test]
    fn test_only_one_space_skipped() {
        assert_eq!(retrieve_field(b"Subject:  hi\n", "Subject"), b" hi");
        assert_eq!(retrieve_field(b"Subject:hi\n", "Subject"), b"hi");
    }

    #[test]
    fn test_name_without_colon_not_matched() {
        assert_eq!(retrieve_field(b"Subjectx: hi\n", "Subject"), b"");
        assert_eq!(find_field(b"Subject", "Subject"), None);
    }

    #[test]
    fn test_field_name_eq() {
        assert!(field_name_eq("Content-Type", "content-type"));
        assert!(!field_name_eq("Content-Type", "Content-Typo"));
    }

    proptest! {
        #[test]
        fn prop_never_panics(block in proptest::collection::vec(any::<u8>(), 0..512), name in "[A-Za-z-]{0,16}") {
            let _ = retrieve_field(&block, &name);
        }

        #[test]
        fn prop_value_roundtrip(name in "X-[A-Za-z]{1,12}", value in "[A-Za-z0-9=.,;]{0,40}") {
            let block = format!("Other: z\r\n{name}: {value}\r\nLast: y\r\n");
            prop_assert_eq!(retrieve_field(block.as_bytes(), &name), value.as_bytes());
        }

        #[test]
        fn prop_value_within_block(block in "[A-Za-z: \t\r\n]{0,200}") {
            let value = retrieve_field(block.as_bytes(), "A");
            prop_assert!(value.len() <= block.len());
        }
    }
}

//! Header fields the gateway tracks across a message.

use spamgate_mime::field_name_eq;

/// A header field whose original value is remembered for reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackedField {
    /// `X-Spam-Status`
    Status,
    /// `X-Spam-Flag`
    Flag,
    /// `X-Spam-Report`
    Report,
    /// `X-Spam-Prev-Content-Type`
    PrevContentType,
    /// `X-Spam-Level`
    Level,
    /// `X-Spam-Checker-Version`
    CheckerVersion,
    /// `Subject`
    Subject,
    /// `Content-Type`
    ContentType,
}

impl TrackedField {
    /// Fields written by the classifier; inbound copies are never forwarded.
    pub const CLASSIFIER_OUTPUT: [Self; 6] = [
        Self::Status,
        Self::Flag,
        Self::Report,
        Self::PrevContentType,
        Self::Level,
        Self::CheckerVersion,
    ];

    const ALL: [Self; 8] = [
        Self::Status,
        Self::Flag,
        Self::Report,
        Self::PrevContentType,
        Self::Level,
        Self::CheckerVersion,
        Self::Subject,
        Self::ContentType,
    ];

    /// Returns the canonical header name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Status => "X-Spam-Status",
            Self::Flag => "X-Spam-Flag",
            Self::Report => "X-Spam-Report",
            Self::PrevContentType => "X-Spam-Prev-Content-Type",
            Self::Level => "X-Spam-Level",
            Self::CheckerVersion => "X-Spam-Checker-Version",
            Self::Subject => "Subject",
            Self::ContentType => "Content-Type",
        }
    }

    /// Looks up a header name, ignoring case.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|field| field_name_eq(field.name(), name))
    }

    /// Returns true if inbound occurrences are withheld from the classifier.
    #[must_use]
    pub const fn is_suppressed(self) -> bool {
        !matches!(self, Self::Subject | Self::ContentType)
    }

    const fn index(self) -> usize {
        self as usize
    }
}

/// Original values of the tracked fields, first occurrence only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedFields {
    values: [Option<Vec<u8>>; 8],
}

impl CapturedFields {
    /// Creates an empty capture set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `value` unless the field was already seen.
    ///
    /// Returns true if the value was recorded.
    pub fn capture(&mut self, field: TrackedField, value: &[u8]) -> bool {
        let slot = &mut self.values[field.index()];
        if slot.is_some() {
            return false;
        }
        *slot = Some(value.to_vec());
        true
    }

    /// Returns the captured value, or an empty slice if the field was absent.
    #[must_use]
    pub fn get(&self, field: TrackedField) -> &[u8] {
        self.values[field.index()].as_deref().unwrap_or_default()
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

    #[test]
    fn test_from_name() {
        assert_eq!(TrackedField::from_name("x-spam-flag"), Some(TrackedField::Flag));
        assert_eq!(
            TrackedField::from_name("X-SPAM-CHECKER-VERSION"),
            Some(TrackedField::CheckerVersion)
        );
        assert_eq!(TrackedField::from_name("subject"), Some(TrackedField::Subject));
        assert_eq!(TrackedField::from_name("X-Spam-Virus"), None);
        assert_eq!(TrackedField::from_name("X-Spam-Stat"), None);
    }

    #[test]
    fn test_suppression() {
        for field in TrackedField::CLASSIFIER_OUTPUT {
            assert!(field.is_suppressed());
        }
        assert!(!TrackedField::Subject.is_suppressed());
        assert!(!TrackedField::ContentType.is_suppressed());
    }

    #[test]
    fn test_first_capture_wins() {
        let mut captured = CapturedFields::new();
        assert_eq!(captured.get(TrackedField::Flag), b"");
        assert!(captured.capture(TrackedField::Flag, b"YES"));
        assert!(!captured.capture(TrackedField::Flag, b"NO"));
        assert_eq!(captured.get(TrackedField::Flag), b"YES");
        assert_eq!(captured.get(TrackedField::Status), b"");
    }
}

//! Results handed back to the transport layer.

/// Outcome of a callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Keep processing this message.
    Continue,
    /// Accept without further callbacks (allowlisted connection).
    Accept,
    /// Reject the message permanently.
    Reject(Rejection),
    /// Reject the message temporarily; the MTA will retry.
    TempFail,
}

impl Verdict {
    /// Returns true for verdicts that end the current message.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Continue)
    }
}

/// SMTP reply sent with a rejection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// Three-digit SMTP reply code.
    pub code: &'static str,
    /// RFC 3463 enhanced status code.
    pub enhanced: &'static str,
    /// Human-readable reply text.
    pub text: &'static str,
}

impl Rejection {
    /// Reply used when the classifier's verdict triggers rejection.
    pub const BLOCKED: Self = Self {
        code: "550",
        enhanced: "5.7.1",
        text: "Blocked by SpamAssassin",
    };
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.code, self.enhanced, self.text)
    }
}

/// A header edit the MTA must apply before delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderMutation {
    /// Append a new header.
    Add {
        /// Header name.
        name: String,
        /// Header value.
        value: Vec<u8>,
    },
    /// Replace the value of an existing header occurrence.
    Change {
        /// Header name.
        name: String,
        /// 1-based occurrence index.
        index: u32,
        /// New header value.
        value: Vec<u8>,
    },
    /// Delete an existing header occurrence.
    Remove {
        /// Header name.
        name: String,
        /// 1-based occurrence index.
        index: u32,
    },
}

impl HeaderMutation {
    /// Returns the header name this mutation touches.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Add { name, .. } | Self::Change { name, .. } | Self::Remove { name, .. } => name,
        }
    }
}

/// Everything the transport needs at end of message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EomOutcome {
    /// Final verdict for the message.
    pub verdict: Verdict,
    /// Header edits, in the order they must be applied.
    pub mutations: Vec<HeaderMutation>,
    /// Replacement for the whole body, if any.
    pub body: Option<Vec<u8>>,
}

impl EomOutcome {
    /// An outcome carrying only a verdict.
    #[must_use]
    pub const fn verdict(verdict: Verdict) -> Self {
        Self {
            verdict,
            mutations: Vec::new(),
            body: None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal() {
        assert!(!Verdict::Continue.is_terminal());
        assert!(Verdict::Accept.is_terminal());
        assert!(Verdict::TempFail.is_terminal());
        assert!(Verdict::Reject(Rejection::BLOCKED).is_terminal());
    }

    #[test]
    fn test_rejection_display() {
        assert_eq!(
            Rejection::BLOCKED.to_string(),
            "550 5.7.1 Blocked by SpamAssassin"
        );
    }

    #[test]
    fn test_mutation_name() {
        let m = HeaderMutation::Remove {
            name: "X-Spam-Flag".into(),
            index: 1,
        };
        assert_eq!(m.name(), "X-Spam-Flag");
    }
}

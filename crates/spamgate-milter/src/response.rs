//! Filter → MTA responses.

use bytes::{BufMut, BytesMut};
use spamgate_core::{EomOutcome, HeaderMutation, Rejection, Verdict};

use crate::negotiate::Negotiation;

/// Largest body chunk a single `b` response may carry.
pub const MAX_BODY_CHUNK: usize = 65535;

/// A filter response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// `O` - negotiated options
    Negotiate(Negotiation),
    /// `c` - continue
    Continue,
    /// `a` - accept the message (or connection) without further filtering
    Accept,
    /// `t` - temporary failure
    TempFail,
    /// `y` - reply with an explicit SMTP code
    ReplyCode(Rejection),
    /// `h` - add a header
    AddHeader {
        /// Field name
        name: String,
        /// Field value
        value: Vec<u8>,
    },
    /// `m` - change (or, with an empty value, delete) a header
    ChangeHeader {
        /// 1-based occurrence index
        index: u32,
        /// Field name
        name: String,
        /// New value; empty deletes the header
        value: Vec<u8>,
    },
    /// `b` - one chunk of the replacement body
    ReplaceBody(Vec<u8>),
}

impl Response {
    /// Returns the response code byte.
    #[must_use]
    pub const fn code(&self) -> u8 {
        match self {
            Self::Negotiate(_) => b'O',
            Self::Continue => b'c',
            Self::Accept => b'a',
            Self::TempFail => b't',
            Self::ReplyCode(_) => b'y',
            Self::AddHeader { .. } => b'h',
            Self::ChangeHeader { .. } => b'm',
            Self::ReplaceBody(_) => b'b',
        }
    }

    /// Appends the response payload (without length or code) to `buf`.
    pub fn encode_payload(&self, buf: &mut BytesMut) {
        match self {
            Self::Negotiate(options) => options.encode(buf),
            Self::Continue | Self::Accept | Self::TempFail => {}
            Self::ReplyCode(rejection) => {
                buf.extend_from_slice(rejection.to_string().as_bytes());
                buf.put_u8(0);
            }
            Self::AddHeader { name, value } => {
                put_cstr(buf, name.as_bytes());
                put_cstr(buf, value);
            }
            Self::ChangeHeader { index, name, value } => {
                buf.put_u32(*index);
                put_cstr(buf, name.as_bytes());
                put_cstr(buf, value);
            }
            Self::ReplaceBody(chunk) => buf.extend_from_slice(chunk),
        }
    }

    /// Maps a callback verdict onto its response.
    #[must_use]
    pub fn from_verdict(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Continue => Self::Continue,
            Verdict::Accept => Self::Accept,
            Verdict::TempFail => Self::TempFail,
            Verdict::Reject(rejection) => Self::ReplyCode(rejection),
        }
    }

    /// Maps a header mutation onto its response.
    #[must_use]
    pub fn from_mutation(mutation: HeaderMutation) -> Self {
        match mutation {
            HeaderMutation::Add { name, value } => Self::AddHeader { name, value },
            HeaderMutation::Change { name, index, value } => {
                Self::ChangeHeader { index, name, value }
            }
            HeaderMutation::Remove { name, index } => Self::ChangeHeader {
                index,
                name,
                value: Vec::new(),
            },
        }
    }

    /// Expands an end-of-message outcome into the responses that carry it:
    /// header edits, body chunks, then the final verdict.
    #[must_use]
    pub fn sequence_for(outcome: EomOutcome) -> Vec<Self> {
        let EomOutcome {
            verdict,
            mutations,
            body,
        } = outcome;

        let mut responses: Vec<Self> = mutations.into_iter().map(Self::from_mutation).collect();
        match body {
            Some(body) if body.is_empty() => responses.push(Self::ReplaceBody(body)),
            Some(body) => responses.extend(
                body.chunks(MAX_BODY_CHUNK)
                    .map(|chunk| Self::ReplaceBody(chunk.to_vec())),
            ),
            None => {}
        }
        responses.push(Self::from_verdict(verdict));
        responses
    }
}

fn put_cstr(buf: &mut BytesMut, s: &[u8]) {
    buf.extend_from_slice(s);
    buf.put_u8(0);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;

    fn payload(response: &Response) -> Vec<u8> {
        let mut buf = BytesMut::new();
        response.encode_payload(&mut buf);
        buf.to_vec()
    }

    #[test]
    fn test_reply_code() {
        let response = Response::from_verdict(Verdict::Reject(Rejection::BLOCKED));
        assert_eq!(response.code(), b'y');
        assert_eq!(payload(&response), b"550 5.7.1 Blocked by SpamAssassin\0");
    }

    #[test]
    fn test_header_responses() {
        let add = Response::from_mutation(HeaderMutation::Add {
            name: "X-Spam-Flag".into(),
            value: b"YES".to_vec(),
        });
        assert_eq!(add.code(), b'h');
        assert_eq!(payload(&add), b"X-Spam-Flag\0YES\0");

        let change = Response::from_mutation(HeaderMutation::Change {
            name: "Subject".into(),
            index: 1,
            value: b"[SPAM] hi".to_vec(),
        });
        assert_eq!(change.code(), b'm');
        assert_eq!(payload(&change), b"\0\0\0\x01Subject\0[SPAM] hi\0");

        let remove = Response::from_mutation(HeaderMutation::Remove {
            name: "X-Spam-Flag".into(),
            index: 1,
        });
        assert_eq!(payload(&remove), b"\0\0\0\x01X-Spam-Flag\0\0");
    }

    #[test]
    fn test_sequence_splits_body() {
        let outcome = EomOutcome {
            verdict: Verdict::Continue,
            mutations: vec![HeaderMutation::Add {
                name: "X-Spam-Flag".into(),
                value: b"YES".to_vec(),
            }],
            body: Some(vec![b'x'; MAX_BODY_CHUNK + 10]),
        };
        let responses = Response::sequence_for(outcome);
        let codes: Vec<u8> = responses.iter().map(Response::code).collect();
        assert_eq!(codes, b"hbbc");
        assert!(matches!(&responses[1], Response::ReplaceBody(c) if c.len() == MAX_BODY_CHUNK));
        assert!(matches!(&responses[2], Response::ReplaceBody(c) if c.len() == 10));
    }

    #[test]
    fn test_sequence_verdict_only() {
        let responses = Response::sequence_for(EomOutcome::verdict(Verdict::TempFail));
        assert_eq!(responses, vec![Response::TempFail]);
    }

    #[test]
    fn test_empty_body_replacement() {
        let outcome = EomOutcome {
            verdict: Verdict::Continue,
            mutations: Vec::new(),
            body: Some(Vec::new()),
        };
        assert_eq!(
            Response::sequence_for(outcome),
            vec![Response::ReplaceBody(Vec::new()), Response::Continue]
        );
    }
}

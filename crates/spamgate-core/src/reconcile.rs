//! Turns the classifier's annotated copy of a message into a verdict and a
//! minimal set of header edits.

use spamgate_mime::{header_block, retrieve_field, split_message};

use crate::config::{Config, RejectPolicy};
use crate::error::Result;
use crate::fields::{CapturedFields, TrackedField};
use crate::verdict::{EomOutcome, HeaderMutation, Rejection, Verdict};

/// Fields reconciled after the reject decision, in application order.
const ANNOTATIONS: [TrackedField; 4] = [
    TrackedField::Report,
    TrackedField::PrevContentType,
    TrackedField::Level,
    TrackedField::CheckerVersion,
];

/// Compares the classifier's copy of the message with the original.
///
/// `returned` is the full text the classifier wrote back. Flag and status
/// are reconciled first so the reject policy sees them; a rejection carries
/// no edits. Subject, Content-Type and the body are only replaced when
/// rewriting is enabled and the classifier flagged the message.
///
/// # Errors
///
/// Returns [`crate::Error::BodyBoundary`] if the body must be replaced but
/// the returned text has no header/body separator.
pub fn reconcile(
    config: &Config,
    captured: &CapturedFields,
    returned: &[u8],
) -> Result<EomOutcome> {
    let headers = header_block(returned);
    let mut mutations = Vec::new();

    let flag = retrieve_field(headers, TrackedField::Flag.name());
    let status = retrieve_field(headers, TrackedField::Status.name());
    mutations.extend(decide(TrackedField::Flag, captured.get(TrackedField::Flag), flag));
    mutations.extend(decide(TrackedField::Status, captured.get(TrackedField::Status), status));

    if let Some(policy) = config.reject
        && should_reject(policy, flag, status)
    {
        tracing::info!(policy = ?policy, "rejecting message");
        return Ok(EomOutcome::verdict(Verdict::Reject(Rejection::BLOCKED)));
    }

    for field in ANNOTATIONS {
        let new = retrieve_field(headers, field.name());
        mutations.extend(decide(field, captured.get(field), new));
    }

    let mut body = None;
    if config.rewrite_enabled && !flag.is_empty() {
        for field in [TrackedField::Subject, TrackedField::ContentType] {
            let new = retrieve_field(headers, field.name());
            mutations.extend(decide(field, captured.get(field), new));
        }
        let message = split_message(returned)?;
        tracing::debug!(bytes = message.body.len(), "replacing body");
        body = Some(message.body.to_vec());
    }

    Ok(EomOutcome {
        verdict: Verdict::Continue,
        mutations,
        body,
    })
}

/// Picks the edit that turns `original` into `new`, if any.
///
/// A change to an empty value is a removal; a value appearing where there
/// was none is an addition.
#[must_use]
pub fn decide(field: TrackedField, original: &[u8], new: &[u8]) -> Option<HeaderMutation> {
    let name = field.name().to_string();
    let mutation = if original == new {
        None
    } else if original.is_empty() {
        (!new.is_empty()).then(|| HeaderMutation::Add {
            name,
            value: new.to_vec(),
        })
    } else if new.is_empty() {
        Some(HeaderMutation::Remove { name, index: 1 })
    } else {
        Some(HeaderMutation::Change {
            name,
            index: 1,
            value: new.to_vec(),
        })
    };

    tracing::debug!(
        field = field.name(),
        action = mutation.as_ref().map_or("none", action_name),
        "reconciled header"
    );
    mutation
}

fn action_name(mutation: &HeaderMutation) -> &'static str {
    match mutation {
        HeaderMutation::Add { .. } => "add",
        HeaderMutation::Change { .. } => "change",
        HeaderMutation::Remove { .. } => "remove",
    }
}

fn should_reject(policy: RejectPolicy, flag: &[u8], status: &[u8]) -> bool {
    match policy {
        RejectPolicy::Flagged => !flag.is_empty(),
        RejectPolicy::Score(threshold) => match extract_score(status) {
            Some(score) => {
                tracing::debug!(score, threshold, "classifier score");
                score >= threshold
            }
            None => {
                tracing::warn!(
                    status = %String::from_utf8_lossy(status),
                    "could not extract score"
                );
                false
            }
        },
    }
}

/// Reads the number following the first `hits=` token of a status value.
#[must_use]
pub fn extract_score(status: &[u8]) -> Option<f64> {
    const TOKEN: &[u8] = b"hits=";
    let start = status
        .windows(TOKEN.len())
        .position(|w| w == TOKEN)?
        + TOKEN.len();
    let rest = &status[start..];
    let len = rest
        .iter()
        .enumerate()
        .take_while(|&(i, &b)| b.is_ascii_digit() || b == b'.' || (i == 0 && (b == b'-' || b == b'+')))
        .count();
    std::str::from_utf8(&rest[..len]).ok()?.parse().ok()
}

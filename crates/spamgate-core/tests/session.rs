//! Integration tests for the session engine.
//!
//! Stub classifiers are `/bin/sh` scripts that either echo the message or
//! print a canned SpamAssassin-style result.

use std::sync::Arc;

use spamgate_core::{
    Config, ConnectionContext, HeaderMutation, RejectPolicy, Rejection, SessionState, Verdict,
};

const SPAM_RESULT: &str = "cat >/dev/null; printf '\
X-Spam-Flag: YES\\r\\n\
X-Spam-Status: Yes, hits=12.0 required=5.0 tests=LOTS\\r\\n\
X-Spam-Level: ************\\r\\n\
Subject: [SPAM] hello\\r\\n\
Content-Type: text/plain\\r\\n\
\\r\\n\
Spam detection report\\r\\n'";

fn config_for(script: &str) -> Config {
    Config::builder()
        .classifier_path("/bin/sh")
        .classifier_args(["-c", script])
        .build()
        .unwrap()
}

fn context(config: Config) -> ConnectionContext {
    let mut ctx = ConnectionContext::new(Arc::new(config));
    assert_eq!(
        ctx.on_connect("mx.example.com", Some("192.0.2.7".parse().unwrap())),
        Verdict::Continue
    );
    ctx
}

/// Delivers a complete small message up to (not including) end of message.
fn deliver(ctx: &mut ConnectionContext) {
    assert_eq!(ctx.on_sender("<alice@example.com>"), Verdict::Continue);
    assert_eq!(ctx.on_recipient("<bob@example.com>"), Verdict::Continue);
    assert_eq!(ctx.on_header("From", b"alice@example.com"), Verdict::Continue);
    assert_eq!(ctx.on_header("Subject", b"hello"), Verdict::Continue);
    assert_eq!(ctx.on_header("X-Spam-Flag", b"NO"), Verdict::Continue);
    assert_eq!(ctx.on_header("X-Spam-Virus", b"No"), Verdict::Continue);
    assert_eq!(ctx.on_end_of_headers(), Verdict::Continue);
    assert_eq!(ctx.on_body_chunk(b"Hi Bob,\r\n"), Verdict::Continue);
    assert_eq!(ctx.on_body_chunk(b"bye\r\n"), Verdict::Continue);
}

/// Checks that `pid` has been waited for and no longer exists.
fn assert_reaped(pid: u32) {
    if cfg!(target_os = "linux") {
        assert!(
            !std::path::Path::new(&format!("/proc/{pid}")).exists(),
            "process {pid} still exists"
        );
    }
}

#[test]
fn test_classifier_sees_assembled_stream() {
    let dir = tempfile::tempdir().unwrap();
    let copy = dir.path().join("seen.eml");
    let script = format!("tee '{}'", copy.display());
    let mut ctx = context(config_for(&script));

    deliver(&mut ctx);
    let outcome = ctx.on_end_of_message();

    let seen = std::fs::read(&copy).unwrap();
    assert_eq!(
        seen,
        b"X-Envelope-From: <alice@example.com>\r\n\
X-Envelope-To: <bob@example.com>\r\n\
Received: from [192.0.2.7]\r\n\
From: alice@example.com\r\n\
Subject: hello\r\n\
X-Spam-Virus: No\r\n\
\r\n\
Hi Bob,\r\n\
bye\r\n"
            .to_vec()
    );

    // The echoed copy has no flag, so the inbound one is removed.
    assert_eq!(outcome.verdict, Verdict::Continue);
    assert_eq!(
        outcome.mutations,
        vec![HeaderMutation::Remove {
            name: "X-Spam-Flag".into(),
            index: 1
        }]
    );
    assert!(outcome.body.is_none());
    assert!(ctx.session().is_none());
}

#[test]
fn test_spam_is_rewritten() {
    let mut ctx = context(config_for(SPAM_RESULT));
    deliver(&mut ctx);
    let outcome = ctx.on_end_of_message();

    assert_eq!(outcome.verdict, Verdict::Continue);
    let names: Vec<&str> = outcome.mutations.iter().map(HeaderMutation::name).collect();
    assert_eq!(
        names,
        vec![
            "X-Spam-Flag",
            "X-Spam-Status",
            "X-Spam-Level",
            "Subject",
            "Content-Type"
        ]
    );
    assert_eq!(
        outcome.mutations[0],
        HeaderMutation::Change {
            name: "X-Spam-Flag".into(),
            index: 1,
            value: b"YES".to_vec()
        }
    );
    assert_eq!(
        outcome.mutations[4],
        HeaderMutation::Add {
            name: "Content-Type".into(),
            value: b"text/plain".to_vec()
        }
    );
    assert_eq!(outcome.body.as_deref(), Some(&b"Spam detection report\r\n"[..]));
}

#[test]
fn test_reject_threshold() {
    let mut config = config_for(SPAM_RESULT);
    config.reject = Some(RejectPolicy::Score(10.0));
    let mut ctx = context(config);
    deliver(&mut ctx);
    let outcome = ctx.on_end_of_message();
    assert_eq!(outcome.verdict, Verdict::Reject(Rejection::BLOCKED));
    assert!(outcome.mutations.is_empty());

    let mut config = config_for(SPAM_RESULT);
    config.reject = Some(RejectPolicy::Score(15.0));
    let mut ctx = context(config);
    deliver(&mut ctx);
    assert_eq!(ctx.on_end_of_message().verdict, Verdict::Continue);
}

#[test]
fn test_connection_serves_several_messages() {
    let mut ctx = context(config_for(SPAM_RESULT));
    for _ in 0..3 {
        deliver(&mut ctx);
        assert_eq!(ctx.on_end_of_message().verdict, Verdict::Continue);
    }
    ctx.on_close();
    assert!(ctx.session().is_none());
}

#[test]
fn test_missing_body_boundary_tempfails() {
    let script = "cat >/dev/null; printf 'X-Spam-Flag: YES\\r\\n'";
    let mut ctx = context(config_for(script));
    deliver(&mut ctx);
    assert_eq!(ctx.on_end_of_message().verdict, Verdict::TempFail);

    // The next message on the connection is unaffected.
    assert_eq!(ctx.on_sender("<carol@example.com>"), Verdict::Continue);
}

#[test]
fn test_classifier_dying_tempfails_message() {
    let mut ctx = context(config_for("head -c 1000 >/dev/null"));
    assert_eq!(ctx.on_sender("<alice@example.com>"), Verdict::Continue);
    assert_eq!(ctx.on_recipient("<bob@example.com>"), Verdict::Continue);
    assert_eq!(ctx.on_end_of_headers(), Verdict::Continue);

    let pid = ctx.session().unwrap().conduit().pid().unwrap();
    let body = vec![b'x'; 4 * 1024 * 1024];
    assert_eq!(ctx.on_body_chunk(&body), Verdict::TempFail);
    assert!(ctx.session().is_none());
    assert_reaped(pid);
}

#[test]
fn test_abort_from_every_state() {
    type Step = fn(&mut ConnectionContext);
    let steps: [(SessionState, Step); 4] = [
        (SessionState::FromSet, |_| {}),
        (SessionState::Headers, |ctx| {
            ctx.on_header("Subject", b"hi");
        }),
        (SessionState::EndOfHeaders, |ctx| {
            ctx.on_header("Subject", b"hi");
            ctx.on_end_of_headers();
        }),
        (SessionState::Body, |ctx| {
            ctx.on_header("Subject", b"hi");
            ctx.on_end_of_headers();
            ctx.on_body_chunk(b"partial body\r\n");
        }),
    ];

    for (expected, advance) in steps {
        for with_recipient in [false, true] {
            let mut ctx = context(config_for("cat"));
            ctx.on_sender("<alice@example.com>");
            if with_recipient {
                ctx.on_recipient("<bob@example.com>");
            }
            advance(&mut ctx);

            let session = ctx.session().unwrap();
            assert_eq!(session.state(), expected);
            let pid = session.conduit().pid();
            assert_eq!(pid.is_some(), session.is_connected());

            ctx.on_abort();

            assert!(ctx.session().is_none());
            if let Some(pid) = pid {
                assert_reaped(pid);
            }
        }
    }
}

#[test]
fn test_abort_then_new_message() {
    let mut ctx = context(config_for(SPAM_RESULT));
    ctx.on_sender("<alice@example.com>");
    ctx.on_recipient("<bob@example.com>");
    ctx.on_abort();

    deliver(&mut ctx);
    let outcome = ctx.on_end_of_message();
    assert_eq!(outcome.verdict, Verdict::Continue);
    assert!(outcome.body.is_some());
}

//! Integration tests for the classifier conduit.
//!
//! Each test drives a real `/bin/sh` child standing in for the classifier.

use spamgate_core::{ClassifierConduit, ConduitState, FaultKind};

fn sh(script: &str) -> Vec<String> {
    vec!["/bin/sh".into(), "-c".into(), script.into()]
}

/// Runs `input` through a fresh conduit and returns what came back.
fn round_trip(script: &str, input: &[u8]) -> Vec<u8> {
    let mut conduit = ClassifierConduit::new();
    conduit.connect(&sh(script)).unwrap();
    conduit.write(input).unwrap();
    conduit.half_close().unwrap();
    conduit.drain().unwrap();
    assert!(conduit.finish().unwrap().success());
    assert_eq!(conduit.state(), ConduitState::Terminated);
    conduit.output().to_vec()
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
fn test_echo_message() {
    let message = b"From: a@example.com\r\nSubject: hi\r\n\r\nline one\r\nline two\r\n";
    assert_eq!(round_trip("cat", message), message);
}

#[test]
fn test_large_message_through_echo() {
    let message: Vec<u8> = (0..2 * 1024 * 1024).map(|i| b"abcdefgh\r\n"[i % 10]).collect();
    assert_eq!(round_trip("cat", &message), message);
}

#[test]
fn test_unsolicited_preamble_does_not_deadlock() {
    let script = "head -c 65536 /dev/zero | tr '\\0' x; cat";
    let message = vec![b'm'; 4 * 1024 * 1024];

    let output = round_trip(script, &message);

    assert_eq!(output.len(), 65536 + message.len());
    assert!(output[..65536].iter().all(|&b| b == b'x'));
    assert!(output[65536..].iter().all(|&b| b == b'm'));
}

#[test]
fn test_output_larger_than_input() {
    let output = round_trip("cat; head -c 300000 /dev/zero", b"short");
    assert_eq!(output.len(), 5 + 300_000);
    assert_eq!(&output[..5], b"short");
}

#[test]
fn test_classifier_exit_mid_stream() {
    let mut conduit = ClassifierConduit::new().with_wait_slice(100);
    conduit.connect(&sh("head -c 16 >/dev/null")).unwrap();
    let pid = conduit.pid().unwrap();

    let err = conduit.write(&vec![b'x'; 4 * 1024 * 1024]).unwrap_err();

    assert_eq!(err.kind(), FaultKind::Io);
    assert!(err.to_string().starts_with("write error"));
    assert_eq!(conduit.state(), ConduitState::Failed);
    assert_eq!(conduit.open_descriptors(), 0);
    assert!(!conduit.is_running());
    assert_reaped(pid);
}

#[test]
fn test_missing_classifier() {
    let mut conduit = ClassifierConduit::new();
    let err = conduit
        .connect(&["/nonexistent/bin/spamc".to_string()])
        .unwrap_err();

    assert_eq!(err.kind(), FaultKind::IpcSetup);
    assert_eq!(conduit.state(), ConduitState::Unconnected);
    assert_eq!(conduit.open_descriptors(), 0);
}

#[test]
fn test_drop_kills_and_reaps() {
    let mut conduit = ClassifierConduit::new();
    conduit.connect(&sh("exec sleep 60")).unwrap();
    let pid = conduit.pid().unwrap();
    drop(conduit);
    assert_reaped(pid);
}

#[test]
fn test_cleanup_from_every_state() {
    let stages: [fn(&mut ClassifierConduit); 4] = [
        |_| {},
        |c| c.write(b"partial").unwrap(),
        |c| c.half_close().unwrap(),
        |c| {
            c.half_close().unwrap();
            c.drain().unwrap();
        },
    ];

    for stage in stages {
        let mut conduit = ClassifierConduit::new();
        conduit.connect(&sh("cat")).unwrap();
        let pid = conduit.pid().unwrap();
        stage(&mut conduit);

        conduit.cleanup();

        assert_eq!(conduit.state(), ConduitState::Terminated);
        assert_eq!(conduit.open_descriptors(), 0);
        assert!(!conduit.is_running());
        assert_reaped(pid);
    }
}

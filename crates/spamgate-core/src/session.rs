//! Per-message state machine and the per-connection context that drives it.
//!
//! The transport calls one [`ConnectionContext`] method per protocol event,
//! strictly in order. Each message gets a fresh [`Session`] on the envelope
//! sender; the session spawns its classifier lazily, on the first recipient
//! or at end of headers, whichever comes first.
//!
//! Faults never escape a callback. They are logged once and turned into a
//! [`Verdict::TempFail`] for the current message; the session is torn down
//! and the connection stays usable for the next one.

use std::net::IpAddr;
use std::sync::Arc;

use crate::conduit::{ClassifierConduit, classifier_argv};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::fields::{CapturedFields, TrackedField};
use crate::reconcile::reconcile;
use crate::verdict::{EomOutcome, Verdict};

/// Where a message is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Envelope sender recorded.
    FromSet,
    /// Receiving header fields.
    Headers,
    /// Header block complete.
    EndOfHeaders,
    /// Receiving body chunks.
    Body,
    /// Classifier output being reconciled.
    EndOfMessage,
    /// Resources released; the session is finished.
    Closed,
}

/// State of one message on one connection.
#[derive(Debug)]
pub struct Session {
    state: SessionState,
    sender: String,
    recipient: Option<String>,
    recipient_count: usize,
    peer: String,
    captured: CapturedFields,
    conduit: ClassifierConduit,
    connected: bool,
    staged: Vec<u8>,
}

impl Session {
    /// Starts a message from `sender`, received from `peer`.
    #[must_use]
    pub fn new(sender: impl Into<String>, peer: impl Into<String>) -> Self {
        Self {
            state: SessionState::FromSet,
            sender: sender.into(),
            recipient: None,
            recipient_count: 0,
            peer: peer.into(),
            captured: CapturedFields::new(),
            conduit: ClassifierConduit::new(),
            connected: false,
            staged: Vec::new(),
        }
    }

    /// Returns the lifecycle state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Returns the envelope sender.
    #[must_use]
    pub fn sender(&self) -> &str {
        &self.sender
    }

    /// Returns the first envelope recipient.
    #[must_use]
    pub fn recipient(&self) -> Option<&str> {
        self.recipient.as_deref()
    }

    /// Returns how many recipients were seen.
    #[must_use]
    pub const fn recipient_count(&self) -> usize {
        self.recipient_count
    }

    /// Returns the original values of the tracked fields.
    #[must_use]
    pub const fn captured(&self) -> &CapturedFields {
        &self.captured
    }

    /// Returns the classifier conduit.
    #[must_use]
    pub const fn conduit(&self) -> &ClassifierConduit {
        &self.conduit
    }

    /// Returns true once the connect latch has fired.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.connected
    }

    fn add_recipient(&mut self, config: &Config, recipient: &str) -> Result<()> {
        self.recipient_count += 1;
        if self.recipient_count > 1 {
            return Ok(());
        }
        self.recipient = Some(recipient.to_string());
        self.connect(config)
    }

    fn add_header(&mut self, name: &str, value: &[u8]) -> Result<()> {
        self.expect_state(&[SessionState::FromSet, SessionState::Headers], "header")?;
        self.state = SessionState::Headers;

        if let Some(field) = TrackedField::from_name(name) {
            self.captured.capture(field, value);
            if field.is_suppressed() {
                tracing::debug!(field = field.name(), "suppressing inbound header");
                return Ok(());
            }
        }

        let mut line = Vec::with_capacity(name.len() + value.len() + 4);
        line.extend_from_slice(name.as_bytes());
        line.extend_from_slice(b": ");
        line.extend_from_slice(value);
        line.extend_from_slice(b"\r\n");
        self.forward(&line)
    }

    fn end_headers(&mut self, config: &Config) -> Result<()> {
        self.expect_state(
            &[SessionState::FromSet, SessionState::Headers],
            "end of headers",
        )?;
        self.connect(config)?;
        self.forward(b"\r\n")?;
        self.state = SessionState::EndOfHeaders;
        Ok(())
    }

    fn add_body(&mut self, chunk: &[u8]) -> Result<()> {
        self.expect_state(&[SessionState::EndOfHeaders, SessionState::Body], "body")?;
        self.state = SessionState::Body;
        self.forward(chunk)
    }

    fn finish(&mut self, config: &Config) -> Result<EomOutcome> {
        if matches!(self.state, SessionState::FromSet | SessionState::Headers) {
            self.end_headers(config)?;
        }
        self.expect_state(
            &[SessionState::EndOfHeaders, SessionState::Body],
            "end of message",
        )?;
        self.state = SessionState::EndOfMessage;

        self.conduit.half_close()?;
        self.conduit.drain()?;
        let status = self.conduit.finish()?;
        if !status.success() {
            tracing::debug!(%status, "classifier exited unsuccessfully");
        }

        let outcome = reconcile(config, &self.captured, self.conduit.output())?;
        self.release();
        Ok(outcome)
    }

    /// Fires the connect latch: spawns the classifier, sends the envelope
    /// pseudo-headers and flushes anything staged before the spawn.
    fn connect(&mut self, config: &Config) -> Result<()> {
        if self.connected {
            return Ok(());
        }
        self.connected = true;

        let argv = classifier_argv(config, self.recipient.as_deref(), self.recipient_count);
        self.conduit.connect(&argv)?;

        let preamble = self.preamble();
        self.conduit.write(&preamble)?;
        let staged = std::mem::take(&mut self.staged);
        if !staged.is_empty() {
            self.conduit.write(&staged)?;
        }
        Ok(())
    }

    /// Envelope headers plus a forged `Received:` line so the classifier
    /// sees the connecting address.
    fn preamble(&self) -> Vec<u8> {
        let mut text = format!("X-Envelope-From: {}\r\n", self.sender);
        if let Some(recipient) = &self.recipient {
            text.push_str(&format!("X-Envelope-To: {recipient}\r\n"));
        }
        text.push_str(&format!("Received: from [{}]\r\n", self.peer));
        text.into_bytes()
    }

    fn forward(&mut self, bytes: &[u8]) -> Result<()> {
        if self.connected {
            self.conduit.write(bytes)
        } else {
            self.staged.extend_from_slice(bytes);
            Ok(())
        }
    }

    fn expect_state(&self, allowed: &[SessionState], event: &str) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(Error::InvalidState(format!(
                "{event} while {:?}",
                self.state
            )))
        }
    }

    /// Releases the classifier and closes the session.
    pub fn release(&mut self) {
        self.conduit.cleanup();
        self.staged.clear();
        self.state = SessionState::Closed;
    }
}

/// Everything the gateway knows about one MTA connection.
#[derive(Debug)]
pub struct ConnectionContext {
    config: Arc<Config>,
    peer: Option<IpAddr>,
    peer_text: String,
    bypass: bool,
    session: Option<Session>,
}

impl ConnectionContext {
    /// Creates the context for a new connection.
    #[must_use]
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            peer: None,
            peer_text: "unknown".to_string(),
            bypass: false,
            session: None,
        }
    }

    /// Returns the configuration this context was built with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the connecting address, if it is an IP peer.
    #[must_use]
    pub const fn peer(&self) -> Option<IpAddr> {
        self.peer
    }

    /// Returns true if the peer is allowlisted.
    #[must_use]
    pub const fn is_bypassed(&self) -> bool {
        self.bypass
    }

    /// Returns the message in progress.
    #[must_use]
    pub const fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// A client connected. Allowlisted peers are accepted for the whole
    /// connection.
    pub fn on_connect(&mut self, hostname: &str, peer: Option<IpAddr>) -> Verdict {
        tracing::trace!(hostname, ?peer, "connect");
        self.peer = peer;
        self.peer_text = peer.map_or_else(|| hostname.to_string(), |ip| ip.to_string());

        if peer.is_some_and(|ip| self.config.ignore_networks.contains(ip)) {
            tracing::info!(peer = %self.peer_text, "peer is in the ignore list, accepting");
            self.bypass = true;
            return Verdict::Accept;
        }
        Verdict::Continue
    }

    /// `MAIL FROM`: starts a new message.
    pub fn on_sender(&mut self, sender: &str) -> Verdict {
        tracing::trace!(sender, "envelope sender");
        if self.bypass {
            return Verdict::Accept;
        }
        if let Some(mut previous) = self.session.take() {
            tracing::debug!(state = ?previous.state(), "discarding unfinished message");
            previous.release();
        }
        self.session = Some(Session::new(sender, self.peer_text.clone()));
        Verdict::Continue
    }

    /// `RCPT TO`: the first recipient fires the connect latch.
    pub fn on_recipient(&mut self, recipient: &str) -> Verdict {
        tracing::trace!(recipient, "envelope recipient");
        let config = Arc::clone(&self.config);
        self.step("recipient", |session| session.add_recipient(&config, recipient))
    }

    /// One header field.
    pub fn on_header(&mut self, name: &str, value: &[u8]) -> Verdict {
        tracing::trace!(name, len = value.len(), "header");
        self.step("header", |session| session.add_header(name, value))
    }

    /// The header block is complete.
    pub fn on_end_of_headers(&mut self) -> Verdict {
        tracing::trace!("end of headers");
        let config = Arc::clone(&self.config);
        self.step("end of headers", |session| session.end_headers(&config))
    }

    /// One chunk of body bytes.
    pub fn on_body_chunk(&mut self, chunk: &[u8]) -> Verdict {
        tracing::trace!(bytes = chunk.len(), "body chunk");
        self.step("body", |session| session.add_body(chunk))
    }

    /// End of message: classify and reconcile.
    pub fn on_end_of_message(&mut self) -> EomOutcome {
        tracing::trace!("end of message");
        if self.bypass {
            return EomOutcome::verdict(Verdict::Accept);
        }
        let Some(mut session) = self.session.take() else {
            self.report("end of message", &no_session());
            return EomOutcome::verdict(Verdict::TempFail);
        };

        match session.finish(&self.config) {
            Ok(outcome) => {
                tracing::debug!(
                    verdict = ?outcome.verdict,
                    mutations = outcome.mutations.len(),
                    body = outcome.body.is_some(),
                    "message classified"
                );
                outcome
            }
            Err(e) => {
                self.report("end of message", &e);
                session.release();
                EomOutcome::verdict(Verdict::TempFail)
            }
        }
    }

    /// The MTA abandoned the current message.
    pub fn on_abort(&mut self) {
        tracing::trace!("abort");
        if let Some(mut session) = self.session.take() {
            session.release();
        }
    }

    /// The connection is closing.
    pub fn on_close(&mut self) {
        tracing::trace!(peer = %self.peer_text, "close");
        self.on_abort();
    }

    /// Runs one fallible step against the current session.
    fn step(&mut self, event: &'static str, f: impl FnOnce(&mut Session) -> Result<()>) -> Verdict {
        if self.bypass {
            return Verdict::Accept;
        }
        let result = match self.session.as_mut() {
            Some(session) => f(session),
            None => Err(no_session()),
        };
        match result {
            Ok(()) => Verdict::Continue,
            Err(e) => {
                self.report(event, &e);
                self.on_abort();
                Verdict::TempFail
            }
        }
    }

    fn report(&self, event: &'static str, error: &Error) {
        tracing::error!(
            event,
            kind = ?error.kind(),
            peer = %self.peer_text,
            error = %error,
            "tempfailing message"
        );
    }
}

fn no_session() -> Error {
    Error::InvalidState("no message in progress".into())
}

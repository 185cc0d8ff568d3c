//! # spamgate-core
//!
//! Session engine for a content-filtering mail gateway.
//!
//! A transport layer (the milter protocol in `spamgate-milter`) feeds
//! protocol events into a [`ConnectionContext`]. For every message the
//! context streams the assembled text through a [`ClassifierConduit`] to an
//! external classifier such as `spamc`, then reconciles the classifier's
//! annotated copy against the original to produce a [`Verdict`], a list of
//! [`HeaderMutation`]s and an optional body replacement.
//!
//! ## Features
//!
//! - **Deadlock-free conduit**: writes to the classifier are interleaved
//!   with reads of its output under a bounded readiness wait
//! - **Leak-free teardown**: every exit path closes both pipes and kills
//!   and reaps the child
//! - **Minimal edits**: headers are only added, changed or removed when the
//!   classifier's value differs from the original
//! - **Typed faults**: every failure is an [`Error`] with a [`FaultKind`];
//!   callbacks downgrade them to a temporary failure
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use spamgate_core::{Config, ConnectionContext, Verdict};
//!
//! let config = Config::builder().default_user("spamd").build().unwrap();
//! let mut ctx = ConnectionContext::new(Arc::new(config));
//!
//! ctx.on_connect("mx.example.com", Some("192.0.2.10".parse().unwrap()));
//! ctx.on_sender("<alice@example.com>");
//! ctx.on_recipient("<bob@example.com>");
//! ctx.on_header("Subject", b"hello");
//! ctx.on_end_of_headers();
//! ctx.on_body_chunk(b"Hi Bob\r\n");
//!
//! let outcome = ctx.on_end_of_message();
//! if let Verdict::Reject(reply) = &outcome.verdict {
//!     println!("rejected: {reply}");
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod allowlist;
pub mod conduit;
pub mod config;
mod error;
pub mod fields;
pub mod reconcile;
pub mod session;
pub mod verdict;

pub use allowlist::{Network, NetworkAllowlist};
pub use conduit::{ClassifierConduit, ConduitState};
pub use config::{Config, ConfigBuilder, RejectPolicy};
pub use error::{Error, FaultKind, Result};
pub use fields::{CapturedFields, TrackedField};
pub use session::{ConnectionContext, Session, SessionState};
pub use verdict::{EomOutcome, HeaderMutation, Rejection, Verdict};

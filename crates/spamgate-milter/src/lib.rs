//! # spamgate-milter
//!
//! Sendmail/Postfix milter protocol transport for the spamgate session
//! engine.
//!
//! The MTA drives the filter over a unix or TCP socket with length-prefixed
//! packets. This crate decodes those packets into [`Command`]s, feeds them
//! to a [`spamgate_core::ConnectionContext`], and encodes the verdicts,
//! header edits and body replacement back as [`Response`]s.
//!
//! ## Features
//!
//! - **Protocol versions 2 to 6** with option negotiation
//! - **Unix and TCP listeners** in sendmail's `unix:`/`inet:` syntax
//! - **Ordered dispatch**: one task per connection, blocking classifier work
//!   on the blocking pool
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use spamgate_core::Config;
//! use spamgate_milter::SocketSpec;
//!
//! # async fn example() -> spamgate_milter::Result<()> {
//! let spec: SocketSpec = "unix:/var/run/spamgate.sock".parse()?;
//! spamgate_milter::run(&spec, Arc::new(Config::default())).await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod command;
mod error;
pub mod framed;
pub mod listener;
pub mod negotiate;
pub mod response;
pub mod server;

pub use command::Command;
pub use error::{Error, Result};
pub use framed::{FramedStream, MAX_PACKET_SIZE, Packet};
pub use listener::{SocketSpec, remove_stale_socket, run};
pub use negotiate::{Actions, Negotiation, ProtocolFlags};
pub use response::Response;
pub use server::{MilterConnection, serve};

//! Per-connection milter dispatch.
//!
//! Each MTA connection is served by one task. Callbacks into the session
//! engine block on the classifier, so they run on the blocking pool; the
//! [`ConnectionContext`] moves into the blocking task and back, which keeps
//! events for one connection strictly ordered.

use std::sync::Arc;

use spamgate_core::{Config, ConnectionContext, EomOutcome, Verdict};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::command::Command;
use crate::error::{Error, Result};
use crate::framed::FramedStream;
use crate::negotiate::Negotiation;
use crate::response::Response;

/// Whether the connection loop keeps going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

/// Serves one MTA connection until it quits or disconnects.
///
/// # Errors
///
/// Returns an error on I/O failure or protocol violation. The message in
/// progress, if any, is aborted first.
pub async fn serve<S>(stream: S, config: Arc<Config>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut connection = MilterConnection::new(stream, config);
    let result = connection.run().await;
    connection.close().await;
    result
}

/// One MTA connection.
pub struct MilterConnection<S> {
    framed: FramedStream<S>,
    config: Arc<Config>,
    context: Option<ConnectionContext>,
}

impl<S> MilterConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps a freshly accepted stream.
    pub fn new(stream: S, config: Arc<Config>) -> Self {
        Self {
            framed: FramedStream::new(stream),
            context: Some(ConnectionContext::new(Arc::clone(&config))),
            config,
        }
    }

    /// Reads and dispatches packets until the MTA quits or disconnects.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure or protocol violation.
    pub async fn run(&mut self) -> Result<()> {
        while let Some(packet) = self.framed.read_packet().await? {
            let command = Command::decode(packet.code, packet.payload)?;
            if self.handle(command).await? == Flow::Quit {
                break;
            }
        }
        Ok(())
    }

    async fn handle(&mut self, command: Command) -> Result<Flow> {
        match command {
            Command::Negotiate(offer) => {
                let answer = Negotiation::answer(&offer)?;
                self.reply(Response::Negotiate(answer)).await?;
            }
            Command::Macro { .. } => {}
            Command::Connect { hostname, peer } => {
                let verdict = self.call(move |ctx| ctx.on_connect(&hostname, peer)).await?;
                self.reply_verdict(verdict).await?;
            }
            Command::Helo { .. } | Command::Data | Command::Unknown(_) => {
                self.reply(Response::Continue).await?;
            }
            Command::Mail { args } => {
                let sender = args.into_iter().next().unwrap_or_default();
                let verdict = self.call(move |ctx| ctx.on_sender(&sender)).await?;
                self.reply_verdict(verdict).await?;
            }
            Command::Rcpt { args } => {
                let recipient = args.into_iter().next().unwrap_or_default();
                let verdict = self.call(move |ctx| ctx.on_recipient(&recipient)).await?;
                self.reply_verdict(verdict).await?;
            }
            Command::Header { name, value } => {
                let verdict = self.call(move |ctx| ctx.on_header(&name, &value)).await?;
                self.reply_verdict(verdict).await?;
            }
            Command::EndOfHeaders => {
                let verdict = self.call(ConnectionContext::on_end_of_headers).await?;
                self.reply_verdict(verdict).await?;
            }
            Command::Body(chunk) => {
                let verdict = self.call(move |ctx| ctx.on_body_chunk(&chunk)).await?;
                self.reply_verdict(verdict).await?;
            }
            Command::EndOfMessage(chunk) => {
                let outcome = self
                    .call(move |ctx| {
                        if !chunk.is_empty() {
                            let verdict = ctx.on_body_chunk(&chunk);
                            if verdict.is_terminal() {
                                return EomOutcome::verdict(verdict);
                            }
                        }
                        ctx.on_end_of_message()
                    })
                    .await?;
                for response in Response::sequence_for(outcome) {
                    self.reply(response).await?;
                }
            }
            Command::Abort => {
                self.call(ConnectionContext::on_abort).await?;
            }
            Command::QuitNewConnection => {
                self.call(ConnectionContext::on_close).await?;
                self.context = Some(ConnectionContext::new(Arc::clone(&self.config)));
                tracing::debug!("connection reset for a new client");
            }
            Command::Quit => return Ok(Flow::Quit),
        }
        Ok(Flow::Continue)
    }

    /// Runs a session callback on the blocking pool.
    async fn call<F, T>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut ConnectionContext) -> T + Send + 'static,
        T: Send + 'static,
    {
        let mut context = self
            .context
            .take()
            .ok_or_else(|| Error::protocol("connection context lost"))?;
        let (context, value) = tokio::task::spawn_blocking(move || {
            let value = f(&mut context);
            (context, value)
        })
        .await?;
        self.context = Some(context);
        Ok(value)
    }

    async fn reply_verdict(&mut self, verdict: Verdict) -> Result<()> {
        self.reply(Response::from_verdict(verdict)).await
    }

    async fn reply(&mut self, response: Response) -> Result<()> {
        self.framed.write_response(&response).await
    }

    /// Releases the message in progress and the connection's resources.
    pub async fn close(&mut self) {
        if self.context.is_none() {
            return;
        }
        if let Err(e) = self.call(ConnectionContext::on_close).await {
            tracing::warn!(error = %e, "failed to close connection context");
        }
    }

    /// Returns the connection context, unless a callback is in flight.
    pub const fn context(&self) -> Option<&ConnectionContext> {
        self.context.as_ref()
    }
}

//! `spamgate` - SpamAssassin milter
//!
//! Listens for sendmail/Postfix milter connections, pipes each message
//! through spamc and applies the verdict.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod cli;
mod logging;

use std::sync::Arc;

use clap::Parser;
use spamgate_milter::SocketSpec;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info};

use cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.debug.as_deref())?;

    let config = Arc::new(cli.resolve_config()?);
    info!(
        version = env!("CARGO_PKG_VERSION"),
        socket = %cli.socket,
        classifier = %config.classifier_path,
        "starting spamgate"
    );
    if !config.ignore_networks.is_empty() {
        info!(networks = config.ignore_networks.len(), "ignoring trusted networks");
    }

    let mut terminate = signal(SignalKind::terminate())?;
    let outcome = tokio::select! {
        result = spamgate_milter::run(&cli.socket, config) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted");
            Ok(())
        }
        _ = terminate.recv() => {
            info!("terminated");
            Ok(())
        }
    };

    if let SocketSpec::Unix(path) = &cli.socket
        && let Err(e) = spamgate_milter::remove_stale_socket(path)
    {
        error!(error = %e, "failed to remove socket");
    }
    info!("exiting");

    Ok(outcome?)
}

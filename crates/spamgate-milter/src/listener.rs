//! Listening socket for MTA connections.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use spamgate_core::Config;
use tokio::net::{TcpListener, UnixListener};

use crate::error::{Error, Result};
use crate::server::serve;

/// Where the filter listens, in sendmail's `X` option syntax.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketSpec {
    /// `unix:/path`, `local:/path` or a bare path.
    Unix(PathBuf),
    /// `inet:port@host` or `inet6:port@host`.
    Inet {
        /// Host to bind.
        host: String,
        /// Port to bind.
        port: u16,
    },
}

impl FromStr for SocketSpec {
    type Err = Error;

    fn from_str(spec: &str) -> Result<Self> {
        let (scheme, rest) = spec.split_once(':').unwrap_or(("unix", spec));
        match scheme {
            "unix" | "local" if !rest.is_empty() => Ok(Self::Unix(PathBuf::from(rest))),
            "inet" | "inet6" => {
                let (port, host) = rest.split_once('@').unwrap_or((rest, "localhost"));
                let port = port
                    .parse()
                    .map_err(|_| Error::InvalidSocket(format!("{spec}: bad port {port:?}")))?;
                let host = host.trim_start_matches('[').trim_end_matches(']');
                Ok(Self::Inet {
                    host: host.to_string(),
                    port,
                })
            }
            _ => Err(Error::InvalidSocket(spec.to_string())),
        }
    }
}

impl fmt::Display for SocketSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix(path) => write!(f, "unix:{}", path.display()),
            Self::Inet { host, port } => write!(f, "inet:{port}@{host}"),
        }
    }
}

/// Accepts MTA connections forever, one task per connection.
///
/// A stale unix socket file is removed before binding.
///
/// # Errors
///
/// Returns an error if the socket cannot be bound or accepting fails.
pub async fn run(spec: &SocketSpec, config: Arc<Config>) -> Result<()> {
    match spec {
        SocketSpec::Unix(path) => {
            remove_stale_socket(path)?;
            let listener = UnixListener::bind(path)?;
            tracing::info!(socket = %spec, "listening");
            loop {
                let (stream, _) = listener.accept().await?;
                spawn_connection(stream, Arc::clone(&config), "local".to_string());
            }
        }
        SocketSpec::Inet { host, port } => {
            let listener = TcpListener::bind((host.as_str(), *port)).await?;
            tracing::info!(socket = %spec, "listening");
            loop {
                let (stream, addr) = listener.accept().await?;
                spawn_connection(stream, Arc::clone(&config), addr.to_string());
            }
        }
    }
}

/// Removes the unix socket file, if any.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be removed.
pub fn remove_stale_socket(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            tracing::debug!(path = %path.display(), "removed stale socket");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn spawn_connection<S>(stream: S, config: Arc<Config>, mta: String)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        tracing::debug!(%mta, "MTA connected");
        match serve(stream, config).await {
            Ok(()) => tracing::debug!(%mta, "MTA disconnected"),
            Err(e) => tracing::warn!(%mta, error = %e, "MTA connection failed"),
        }
    });
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_unix() {
        assert_eq!(
            "unix:/var/run/spamgate.sock".parse::<SocketSpec>().unwrap(),
            SocketSpec::Unix("/var/run/spamgate.sock".into())
        );
        assert_eq!(
            "local:/tmp/s".parse::<SocketSpec>().unwrap(),
            SocketSpec::Unix("/tmp/s".into())
        );
        assert_eq!(
            "/tmp/bare.sock".parse::<SocketSpec>().unwrap(),
            SocketSpec::Unix("/tmp/bare.sock".into())
        );
    }

    #[test]
    fn test_parse_inet() {
        assert_eq!(
            "inet:8890@127.0.0.1".parse::<SocketSpec>().unwrap(),
            SocketSpec::Inet {
                host: "127.0.0.1".into(),
                port: 8890
            }
        );
        assert_eq!(
            "inet6:8890@[::1]".parse::<SocketSpec>().unwrap(),
            SocketSpec::Inet {
                host: "::1".into(),
                port: 8890
            }
        );
        assert_eq!(
            "inet:8890".parse::<SocketSpec>().unwrap(),
            SocketSpec::Inet {
                host: "localhost".into(),
                port: 8890
            }
        );
    }

    #[test]
    fn test_parse_invalid() {
        assert!("inet:notaport@host".parse::<SocketSpec>().is_err());
        assert!("tcp:1@host".parse::<SocketSpec>().is_err());
        assert!("unix:".parse::<SocketSpec>().is_err());
    }

    #[test]
    fn test_display() {
        let spec = SocketSpec::Inet {
            host: "127.0.0.1".into(),
            port: 25,
        };
        assert_eq!(spec.to_string(), "inet:25@127.0.0.1");
    }

    #[test]
    fn test_remove_stale_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("milter.sock");
        remove_stale_socket(&path).unwrap();
        std::fs::write(&path, b"").unwrap();
        remove_stale_socket(&path).unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_unix_listener_accepts() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("milter.sock");
        std::fs::write(&path, b"stale").unwrap();

        let spec = SocketSpec::Unix(path.clone());
        let config = Arc::new(Config::default());
        let server = tokio::spawn(async move { run(&spec, config).await });

        let mut stream = loop {
            match tokio::net::UnixStream::connect(&path).await {
                Ok(stream) => break stream,
                Err(_) => tokio::time::sleep(std::time::Duration::from_millis(10)).await,
            }
        };
        stream
            .write_all(&[0, 0, 0, 13, b'O', 0, 0, 0, 6, 0, 0, 0, 0x3f, 0, 0, 0, 0])
            .await
            .unwrap();
        let mut reply = [0u8; 17];
        stream.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply[4], b'O');

        server.abort();
    }
}

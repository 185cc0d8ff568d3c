//! Command line interface.

use std::path::PathBuf;

use clap::Parser;
use spamgate_core::{Config, ConfigBuilder, RejectPolicy};
use spamgate_milter::SocketSpec;

/// SpamAssassin milter: pipes each message through spamc and applies its
/// verdict.
#[derive(Debug, Parser)]
#[command(name = "spamgate", version, about)]
pub struct Cli {
    /// Socket to listen on: `unix:/path`, `local:/path`, a bare path, or
    /// `inet:port@host`
    #[arg(short = 'p', long = "socket", value_name = "SOCKET")]
    pub socket: SocketSpec,

    /// Debug flags: 1, 2, 3 or a list of FUNC, POLL, UORI, STR, MISC, NET,
    /// SPAMC, ALL
    #[arg(short = 'd', long = "debug", value_name = "FLAGS")]
    pub debug: Option<String>,

    /// Remote spamd host passed to spamc as `-d`
    #[arg(short = 'D', long = "spamd-host", value_name = "HOST")]
    pub remote_host: Option<String>,

    /// Skip checks for these networks, e.g. 192.168.12.5,10.0.0.0/8
    #[arg(short = 'i', long = "ignore", value_name = "NETWORKS")]
    pub ignore: Vec<String>,

    /// Don't modify the body, Content-Type or Subject
    #[arg(short = 'm', long = "no-modify")]
    pub no_modify: bool,

    /// Reject messages scoring at or above this value; -1 rejects anything
    /// flagged as spam
    #[arg(
        short = 'r',
        long = "reject",
        value_name = "SCORE",
        allow_negative_numbers = true
    )]
    pub reject: Option<f64>,

    /// Pass the recipient's username to spamc, or this user when there are
    /// several recipients
    #[arg(short = 'u', long = "default-user", value_name = "USER")]
    pub default_user: Option<String>,

    /// Classifier executable
    #[arg(short = 's', long = "spamc", value_name = "PATH")]
    pub classifier: Option<String>,

    /// JSON configuration file; command line flags take precedence
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Extra arguments passed to spamc
    #[arg(last = true, value_name = "SPAMC_ARGS")]
    pub classifier_args: Vec<String>,
}

impl Cli {
    /// Resolves the effective configuration: the file (if any) overlaid with
    /// command line flags.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be loaded, a network entry is
    /// invalid, or the result fails validation.
    pub fn resolve_config(&self) -> anyhow::Result<Config> {
        let mut base = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };
        if !self.classifier_args.is_empty() {
            base.classifier_args.clear();
        }

        let mut networks = base.ignore_networks.clone();
        for entry in &self.ignore {
            networks.extend_from_text(entry)?;
        }

        let mut builder = ConfigBuilder::from_config(base).ignore_networks(networks);
        if let Some(path) = &self.classifier {
            builder = builder.classifier_path(path);
        }
        if let Some(host) = &self.remote_host {
            builder = builder.remote_host(host);
        }
        if let Some(user) = &self.default_user {
            builder = builder.default_user(user);
        }
        if let Some(threshold) = self.reject {
            builder = builder.reject(RejectPolicy::from_threshold(threshold));
        }
        if self.no_modify {
            builder = builder.rewrite_enabled(false);
        }
        if !self.classifier_args.is_empty() {
            builder = builder.classifier_args(&self.classifier_args);
        }

        Ok(builder.build()?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("spamgate").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_minimal() {
        let cli = parse(&["-p", "/var/run/spamgate.sock"]);
        assert_eq!(cli.socket, SocketSpec::Unix("/var/run/spamgate.sock".into()));
        assert_eq!(cli.resolve_config().unwrap(), Config::default());
    }

    #[test]
    fn test_socket_required() {
        assert!(Cli::try_parse_from(["spamgate", "-m"]).is_err());
    }

    #[test]
    fn test_historical_flags() {
        let cli = parse(&[
            "-p",
            "inet:8890@127.0.0.1",
            "-d",
            "1",
            "-D",
            "scanner",
            "-i",
            "10.0.0.0/8",
            "-i",
            "192.168.12.5,172.16.0.0/255.255.0.0",
            "-m",
            "-r",
            "-1",
            "-u",
            "spamd",
            "--",
            "-s",
            "500000",
        ]);
        let config = cli.resolve_config().unwrap();

        assert_eq!(cli.debug.as_deref(), Some("1"));
        assert_eq!(config.remote_host.as_deref(), Some("scanner"));
        assert_eq!(config.default_user.as_deref(), Some("spamd"));
        assert_eq!(config.reject, Some(RejectPolicy::Flagged));
        assert!(!config.rewrite_enabled);
        assert_eq!(config.ignore_networks.len(), 3);
        assert!(config.ignore_networks.contains("172.16.4.4".parse().unwrap()));
        assert_eq!(config.classifier_args, vec!["-s", "500000"]);
    }

    #[test]
    fn test_score_threshold() {
        let cli = parse(&["-p", "/tmp/s", "-r", "15"]);
        assert_eq!(
            cli.resolve_config().unwrap().reject,
            Some(RejectPolicy::Score(15.0))
        );
    }

    #[test]
    fn test_invalid_network() {
        let cli = parse(&["-p", "/tmp/s", "-i", "10.0.0.0/33"]);
        assert!(cli.resolve_config().is_err());
    }

    #[test]
    fn test_flags_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spamgate.json");
        std::fs::write(
            &path,
            r#"{"classifier_path": "/opt/spamc", "default_user": "nobody", "ignore_networks": ["127.0.0.1"]}"#,
        )
        .unwrap();

        let cli = parse(&[
            "-p",
            "/tmp/s",
            "-c",
            path.to_str().unwrap(),
            "-u",
            "spamd",
            "-i",
            "10.0.0.0/8",
        ]);
        let config = cli.resolve_config().unwrap();
        assert_eq!(config.classifier_path, "/opt/spamc");
        assert_eq!(config.default_user.as_deref(), Some("spamd"));
        assert_eq!(config.ignore_networks.len(), 2);
    }
}

//! Gateway configuration.
//!
//! Resolved once before the first connection and shared read-only (behind an
//! `Arc`) by every session afterwards.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::allowlist::NetworkAllowlist;
use crate::error::{Error, Result};

/// Default classifier executable, looked up on `PATH`.
pub const DEFAULT_CLASSIFIER: &str = "spamc";

/// When to reject a message outright instead of tagging it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectPolicy {
    /// Reject anything the classifier flags.
    Flagged,
    /// Reject when the classifier's score is at or above the threshold.
    Score(f64),
}

impl RejectPolicy {
    /// Builds a policy from the historical `-r` argument, where `-1` means
    /// "reject anything flagged".
    #[must_use]
    #[allow(clippy::float_cmp)] // -1 is an exact sentinel
    pub fn from_threshold(threshold: f64) -> Self {
        if threshold == -1.0 {
            Self::Flagged
        } else {
            Self::Score(threshold)
        }
    }
}

/// Gateway configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Classifier executable.
    pub classifier_path: String,
    /// Remote classifier host passed as `-d`.
    pub remote_host: Option<String>,
    /// Default username for `-u`; enables per-recipient routing when set.
    pub default_user: Option<String>,
    /// Reject policy; `None` disables rejection.
    pub reject: Option<RejectPolicy>,
    /// Whether Subject, Content-Type and the body may be rewritten.
    pub rewrite_enabled: bool,
    /// Peers whose connections skip classification.
    pub ignore_networks: NetworkAllowlist,
    /// Extra arguments appended to the classifier command line.
    pub classifier_args: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            classifier_path: DEFAULT_CLASSIFIER.to_string(),
            remote_host: None,
            default_user: None,
            reject: None,
            rewrite_enabled: true,
            ignore_networks: NetworkAllowlist::new(),
            classifier_args: Vec::new(),
        }
    }
}

impl Config {
    /// Creates a configuration builder.
    #[must_use]
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Parses a JSON configuration document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is malformed or fails validation.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json(&text)
    }

    /// Checks the invariants the session engine relies on.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first violated invariant.
    pub fn validate(&self) -> Result<()> {
        if self.classifier_path.is_empty() {
            return Err(Error::Config("classifier path is empty".into()));
        }
        if self.default_user.as_deref() == Some("") {
            return Err(Error::Config("default user is empty".into()));
        }
        match self.reject {
            Some(RejectPolicy::Score(threshold)) if !threshold.is_finite() => Err(Error::Config(
                format!("reject threshold {threshold} is not finite"),
            )),
            _ => Ok(()),
        }
    }

    /// Returns true if per-recipient username routing is enabled.
    #[must_use]
    pub const fn routes_by_recipient(&self) -> bool {
        self.default_user.is_some()
    }
}

/// Builder for [`Config`].
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Creates a builder with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from an existing configuration, e.g. one loaded from a file.
    #[must_use]
    pub const fn from_config(config: Config) -> Self {
        Self { config }
    }

    /// Sets the classifier executable.
    #[must_use]
    pub fn classifier_path(mut self, path: impl Into<String>) -> Self {
        self.config.classifier_path = path.into();
        self
    }

    /// Sets the remote classifier host.
    #[must_use]
    pub fn remote_host(mut self, host: impl Into<String>) -> Self {
        self.config.remote_host = Some(host.into());
        self
    }

    /// Enables per-recipient routing with the given default username.
    #[must_use]
    pub fn default_user(mut self, user: impl Into<String>) -> Self {
        self.config.default_user = Some(user.into());
        self
    }

    /// Sets the reject policy.
    #[must_use]
    pub const fn reject(mut self, policy: RejectPolicy) -> Self {
        self.config.reject = Some(policy);
        self
    }

    /// Enables or disables Subject/Content-Type/body rewriting.
    #[must_use]
    pub const fn rewrite_enabled(mut self, enabled: bool) -> Self {
        self.config.rewrite_enabled = enabled;
        self
    }

    /// Sets the ignored networks.
    #[must_use]
    pub fn ignore_networks(mut self, networks: NetworkAllowlist) -> Self {
        self.config.ignore_networks = networks;
        self
    }

    /// Appends arguments passed verbatim to the classifier.
    #[must_use]
    pub fn classifier_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config
            .classifier_args
            .extend(args.into_iter().map(Into::into));
        self
    }

    /// Validates and builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is inconsistent.
    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.classifier_path, "spamc");
        assert!(config.rewrite_enabled);
        assert!(config.reject.is_none());
        assert!(!config.routes_by_recipient());
    }

    #[test]
    fn test_builder() {
        let config = Config::builder()
            .classifier_path("/usr/bin/spamc")
            .remote_host("scanner.example.com")
            .default_user("spamd")
            .reject(RejectPolicy::Score(10.0))
            .rewrite_enabled(false)
            .ignore_networks(NetworkAllowlist::parse("127.0.0.1").unwrap())
            .classifier_args(["-s", "1048576"])
            .build()
            .unwrap();

        assert_eq!(config.remote_host.as_deref(), Some("scanner.example.com"));
        assert!(config.routes_by_recipient());
        assert_eq!(config.reject, Some(RejectPolicy::Score(10.0)));
        assert_eq!(config.classifier_args, vec!["-s", "1048576"]);
        assert_eq!(config.ignore_networks.len(), 1);
    }

    #[test]
    fn test_threshold_sentinel() {
        assert_eq!(RejectPolicy::from_threshold(-1.0), RejectPolicy::Flagged);
        assert_eq!(RejectPolicy::from_threshold(15.0), RejectPolicy::Score(15.0));
    }

    #[test]
    fn test_validation() {
        assert!(Config::builder().classifier_path("").build().is_err());
        assert!(Config::builder().default_user("").build().is_err());
        assert!(
            Config::builder()
                .reject(RejectPolicy::Score(f64::NAN))
                .build()
                .is_err()
        );
    }

    #[test]
    fn test_from_json() {
        let config = Config::from_json(
            r#"{
                "classifier_path": "/opt/spamc",
                "reject": {"score": 12.5},
                "ignore_networks": ["10.0.0.0/8", "192.168.0.0/16 127.0.0.1"],
                "classifier_args": ["-x"]
            }"#,
        )
        .unwrap();

        assert_eq!(config.classifier_path, "/opt/spamc");
        assert_eq!(config.reject, Some(RejectPolicy::Score(12.5)));
        assert_eq!(config.ignore_networks.len(), 3);
        assert!(config.rewrite_enabled);

        let flagged = Config::from_json(r#"{"reject": "flagged"}"#).unwrap();
        assert_eq!(flagged.reject, Some(RejectPolicy::Flagged));
    }

    #[test]
    fn test_from_json_rejects_unknown_and_bad_networks() {
        assert!(Config::from_json(r#"{"classifer_path": "x"}"#).is_err());
        assert!(Config::from_json(r#"{"ignore_networks": ["10.0.0.0/99"]}"#).is_err());
    }

    #[test]
    fn test_load_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"remote_host": "spamd.local"}}"#).unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.remote_host.as_deref(), Some("spamd.local"));

        assert!(Config::load(Path::new("/nonexistent/spamgate.json")).is_err());
    }
}

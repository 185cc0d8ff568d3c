//! Logging setup.
//!
//! `RUST_LOG` wins when set. Otherwise the `-d` flag selects what to log,
//! either as a legacy level (`1`, `2`, `3`) or as a list of category tokens.

use anyhow::bail;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Baseline filter when no categories are enabled.
const BASE_FILTER: &str = "info";

/// A debug category selectable with `-d`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    /// Callback entry and exit.
    Func,
    /// Readiness waits on the classifier pipes.
    Poll,
    /// Header update-or-insert decisions.
    Uori,
    /// Header text parsing.
    Str,
    /// Everything else worth knowing.
    Misc,
    /// Allowlist checks.
    Net,
    /// Classifier process and pipe traffic.
    Spamc,
}

impl Category {
    const ALL: [Self; 7] = [
        Self::Func,
        Self::Poll,
        Self::Uori,
        Self::Str,
        Self::Misc,
        Self::Net,
        Self::Spamc,
    ];

    /// Looks up a token, ignoring case.
    #[must_use]
    pub fn from_token(token: &str) -> Option<Self> {
        let category = match token.to_ascii_uppercase().as_str() {
            "FUNC" => Self::Func,
            "POLL" => Self::Poll,
            "UORI" => Self::Uori,
            "STR" => Self::Str,
            "MISC" => Self::Misc,
            "NET" => Self::Net,
            "SPAMC" => Self::Spamc,
            _ => return None,
        };
        Some(category)
    }

    /// Filter directives enabling this category.
    #[must_use]
    pub const fn directives(self) -> &'static [&'static str] {
        match self {
            Self::Func => &["spamgate_core::session=trace"],
            Self::Poll => &["spamgate_core::conduit::readiness=trace"],
            Self::Uori => &["spamgate_core::reconcile=debug"],
            Self::Str => &["spamgate_mime=trace"],
            Self::Misc => &["spamgate=debug", "spamgate_milter=debug"],
            Self::Net => &["spamgate_core::allowlist=debug"],
            Self::Spamc => &["spamgate_core::conduit=trace"],
        }
    }
}

/// Expands a `-d` argument into the categories it enables.
///
/// # Errors
///
/// Returns an error naming the first unknown token.
pub fn parse_flags(flags: &str) -> anyhow::Result<Vec<Category>> {
    let level = match flags.trim() {
        "1" => Some(1),
        "2" => Some(2),
        "3" => Some(3),
        _ => None,
    };
    if let Some(level) = level {
        let mut categories = vec![Category::Misc, Category::Func];
        if level >= 2 {
            categories.push(Category::Poll);
        }
        if level >= 3 {
            categories.extend([Category::Uori, Category::Str]);
        }
        return Ok(categories);
    }

    let mut categories = Vec::new();
    for token in flags.split([',', ' ']).filter(|t| !t.is_empty()) {
        if token.eq_ignore_ascii_case("ALL") {
            return Ok(Category::ALL.to_vec());
        }
        match Category::from_token(token) {
            Some(category) => categories.push(category),
            None => bail!("invalid debug token {token:?}"),
        }
    }
    Ok(categories)
}

/// Builds the filter string for a `-d` argument.
///
/// # Errors
///
/// Returns an error if the argument contains an unknown token.
pub fn filter_for(flags: Option<&str>) -> anyhow::Result<String> {
    let mut directives = vec![BASE_FILTER];
    if let Some(flags) = flags {
        for category in parse_flags(flags)? {
            directives.extend_from_slice(category.directives());
        }
    }
    Ok(directives.join(","))
}

/// Installs the global subscriber.
///
/// # Errors
///
/// Returns an error if the `-d` argument is invalid.
pub fn init(flags: Option<&str>) -> anyhow::Result<()> {
    let fallback = filter_for(flags)?;
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&fallback)))
        .with(tracing_subscriber::fmt::layer())
        .init();
    Ok(())
}

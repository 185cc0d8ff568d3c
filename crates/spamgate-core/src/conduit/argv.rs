//! Classifier command line construction.

use crate::config::Config;

/// Builds `[classifier, (-u user)?, (-d host)?, passthrough...]`.
///
/// With per-recipient routing enabled, a message with exactly one recipient
/// is scanned as that recipient's local user; any other recipient count
/// falls back to the configured default user.
#[must_use]
pub fn classifier_argv(
    config: &Config,
    recipient: Option<&str>,
    recipient_count: usize,
) -> Vec<String> {
    let mut argv = Vec::with_capacity(5 + config.classifier_args.len());
    argv.push(config.classifier_path.clone());

    if let Some(default_user) = &config.default_user {
        let user = recipient
            .filter(|_| recipient_count == 1)
            .and_then(local_user)
            .unwrap_or(default_user.as_str());
        argv.push("-u".to_string());
        argv.push(user.to_string());
    }

    if let Some(host) = &config.remote_host {
        argv.push("-d".to_string());
        argv.push(host.clone());
    }

    argv.extend(config.classifier_args.iter().cloned());
    argv
}

/// Extracts `user` from `<user@example.com>` or `user@example.com`.
fn local_user(recipient: &str) -> Option<&str> {
    let addr = recipient.trim().trim_start_matches('<').trim_end_matches('>');
    let user = addr.split_once('@').map_or(addr, |(user, _)| user);
    (!user.is_empty()).then_some(user)
}

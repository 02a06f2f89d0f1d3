//! Input validation utilities

use regex::Regex;
use once_cell::sync::Lazy;

/// Regex for a single DNS label
static DNS_LABEL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9]([a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?$").unwrap()
});

/// Regex for acme.sh DNS plugin names (dns_cf, dns_aws, ...)
static DNS_PLUGIN_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^dns_[a-zA-Z0-9_]+$").unwrap()
});

/// Regex for environment variable names
static ENV_NAME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap()
});

/// Loose email check, acme.sh and the CA do the real validation
static EMAIL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap()
});

/// Validate a domain name, optionally allowing a leading `*.` wildcard
pub fn validate_domain(domain: &str, allow_wildcard: bool) -> bool {
    let name = match domain.strip_prefix("*.") {
        Some(rest) if allow_wildcard => rest,
        Some(_) => return false,
        None => domain,
    };

    if name.is_empty() || name.len() > 253 {
        return false;
    }

    let labels: Vec<&str> = name.split('.').collect();
    labels.len() >= 2 && labels.iter().all(|label| DNS_LABEL_REGEX.is_match(label))
}

/// Validate an acme.sh DNS plugin name
pub fn validate_dns_plugin(plugin: &str) -> bool {
    plugin.len() <= 64 && DNS_PLUGIN_REGEX.is_match(plugin)
}

/// Validate an environment variable name used for DNS credentials
pub fn validate_env_name(name: &str) -> bool {
    ENV_NAME_REGEX.is_match(name)
}

/// Validate an account email address
pub fn validate_email(email: &str) -> bool {
    email.len() <= 254 && EMAIL_REGEX.is_match(email)
}

/// Validate a local user name
pub fn validate_username(user: &str) -> bool {
    !user.is_empty()
        && user.len() <= 32
        && !user.starts_with('-')
        && user
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
}

//! acme.sh output parsing
//!
//! acme.sh reports most conditions only as log text. Every recognised
//! condition is listed once in [`MARKERS`]; the reconcilers only ever see the
//! resulting [`Notice`], so a new marker is a one-line change here.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use super::process::CommandOutput;
use crate::models::Notice;

/// acme.sh operations whose output is parsed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Info,
    Issue,
    Renew,
    Register,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Info => "info",
            Operation::Issue => "issue",
            Operation::Renew => "renew",
            Operation::Register => "register",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerKind {
    AlreadyValid,
    RegistrationRequired,
    NotIssued,
    RenewalNotDue,
}

/// A substring of acme.sh output and what it means for some operations
#[derive(Debug)]
pub struct Marker {
    pub operations: &'static [Operation],
    pub needle: &'static str,
    pub kind: MarkerKind,
}

/// Recognised markers, first match wins
pub static MARKERS: &[Marker] = &[
    Marker {
        operations: &[Operation::Issue, Operation::Renew],
        needle: "Please update your account with an email address first",
        kind: MarkerKind::RegistrationRequired,
    },
    Marker {
        operations: &[Operation::Issue, Operation::Renew],
        needle: "--register-account",
        kind: MarkerKind::RegistrationRequired,
    },
    Marker {
        operations: &[Operation::Renew, Operation::Info],
        needle: "is not an issued domain",
        kind: MarkerKind::NotIssued,
    },
    Marker {
        operations: &[Operation::Renew],
        needle: "Next renewal time is",
        kind: MarkerKind::RenewalNotDue,
    },
    Marker {
        operations: &[Operation::Issue],
        needle: "Next renewal time is",
        kind: MarkerKind::AlreadyValid,
    },
    Marker {
        operations: &[Operation::Issue],
        needle: "Domains not changed",
        kind: MarkerKind::AlreadyValid,
    },
];

static NEXT_RENEWAL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Next renewal time is:?\s*([^\r\n]+)").unwrap()
});

static INFO_LINE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^\s*([A-Za-z_][A-Za-z0-9_]*)=['"]?([^'"]*)['"]?\s*$"#).unwrap()
});

/// The renewal time as printed by acme.sh, if any
pub fn next_renewal_text(text: &str) -> Option<String> {
    NEXT_RENEWAL_REGEX
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().trim_end_matches('.').to_string())
        .filter(|s| !s.is_empty())
}

/// Map a failed invocation to an informational notice, if a marker matches
pub fn classify_failure(operation: Operation, output: &CommandOutput) -> Option<Notice> {
    let text = output.combined();

    MARKERS
        .iter()
        .filter(|m| m.operations.contains(&operation))
        .find(|m| text.contains(m.needle))
        .map(|m| match m.kind {
            MarkerKind::AlreadyValid => Notice::AlreadyValid {
                next_renewal: next_renewal_text(&text),
            },
            MarkerKind::RegistrationRequired => Notice::RegistrationRequired,
            MarkerKind::NotIssued => Notice::NotIssued,
            MarkerKind::RenewalNotDue => Notice::RenewalNotDue {
                next_renewal: next_renewal_text(&text),
            },
        })
}

/// Fields of interest from `acme.sh --info -d DOMAIN`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InfoReport {
    pub next_renew_time: Option<DateTime<Utc>>,
}

impl InfoReport {
    /// acme.sh records a renewal time only after a completed issue
    pub fn issued(&self) -> bool {
        self.next_renew_time.is_some()
    }
}

/// Parse the `KEY=value` lines printed by `--info`
pub fn parse_info(stdout: &str) -> InfoReport {
    let mut report = InfoReport::default();

    for line in stdout.lines() {
        let Some(caps) = INFO_LINE_REGEX.captures(line) else {
            continue;
        };
        let value = caps[2].trim();
        if &caps[1] == "Le_NextRenewTime" {
            report.next_renew_time = value
                .parse::<i64>()
                .ok()
                .and_then(|secs| DateTime::from_timestamp(secs, 0));
        }
    }

    report
}

/// `ACCOUNT_THUMBPRINT` printed by `--register-account`
pub fn parse_account_thumbprint(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .filter_map(|line| {
            let line = line.rsplit("] ").next().unwrap_or(line);
            INFO_LINE_REGEX.captures(line)
        })
        .find(|caps| &caps[1] == "ACCOUNT_THUMBPRINT")
        .map(|caps| caps[2].trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Version string from `acme.sh --version`, e.g. `v3.0.7`
pub fn parse_version(stdout: &str) -> Option<String> {
    let lines: Vec<&str> = stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    lines
        .iter()
        .rev()
        .find(|l| {
            l.strip_prefix('v')
                .and_then(|rest| rest.chars().next())
                .is_some_and(|c| c.is_ascii_digit())
        })
        .or_else(|| lines.last())
        .map(|l| l.to_string())
}

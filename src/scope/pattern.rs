//! Domain pattern parsing and matching
//!
//! Three pattern forms are recognised:
//!
//! - `example.com`: exact hostname
//! - `*.example.com`: exactly one extra label (`api.example.com`)
//! - `**.example.com`: one or more extra labels (`a.b.example.com`)
//!
//! The bare base domain never matches a wildcard pattern.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

use super::ScopeError;

const MAX_HOSTNAME_LEN: usize = 253;

/// Shape of a scope pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    /// Hostname must equal the pattern domain
    Exact,
    /// `*.domain`: exactly one label prepended
    SingleWildcard,
    /// `**.domain`: any number (at least one) of labels prepended
    MultiWildcard,
}

impl PatternKind {
    fn prefix(&self) -> &'static str {
        match self {
            Self::Exact => "",
            Self::SingleWildcard => "*.",
            Self::MultiWildcard => "**.",
        }
    }
}

/// Which configured list a pattern came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceList {
    Include,
    Exclude,
}

impl fmt::Display for SourceList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Include => write!(f, "include"),
            Self::Exclude => write!(f, "exclude"),
        }
    }
}

/// A single parsed scope rule. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopePattern {
    kind: PatternKind,
    domain: String,
    source: SourceList,
}

impl ScopePattern {
    /// Parse a pattern string such as `*.example.com`
    pub fn parse(raw: &str, source: SourceList) -> Result<Self, ScopeError> {
        let pattern = raw.trim().to_lowercase();

        if pattern.is_empty() {
            return Err(ScopeError::invalid(raw, "pattern is empty"));
        }

        let (kind, domain) = if let Some(rest) = pattern.strip_prefix("**.") {
            (PatternKind::MultiWildcard, rest)
        } else if let Some(rest) = pattern.strip_prefix("*.") {
            (PatternKind::SingleWildcard, rest)
        } else {
            (PatternKind::Exact, pattern.as_str())
        };

        validate_domain(domain).map_err(|reason| ScopeError::invalid(raw, reason))?;

        Ok(Self {
            kind,
            domain: domain.to_string(),
            source,
        })
    }

    /// Build an exact include pattern for a hostname taken from a seed URL
    pub fn exact_include(host: &str) -> Result<Self, ScopeError> {
        let domain = host.trim().trim_end_matches('.').to_lowercase();
        validate_domain(&domain).map_err(|reason| ScopeError::invalid(host, reason))?;

        Ok(Self {
            kind: PatternKind::Exact,
            domain,
            source: SourceList::Include,
        })
    }

    pub fn kind(&self) -> PatternKind {
        self.kind
    }

    /// Domain suffix (without any wildcard prefix)
    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn source(&self) -> SourceList {
        self.source
    }

    /// Check a lower-cased hostname against this pattern
    pub fn matches(&self, host: &str) -> bool {
        match self.kind {
            PatternKind::Exact => host == self.domain,
            PatternKind::SingleWildcard => {
                subdomain_prefix(host, &self.domain).is_some_and(|prefix| !prefix.contains('.'))
            }
            PatternKind::MultiWildcard => subdomain_prefix(host, &self.domain).is_some(),
        }
    }
}

impl fmt::Display for ScopePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind.prefix(), self.domain)
    }
}

/// Labels that `host` carries in front of `suffix`, if it is a strict subdomain.
fn subdomain_prefix<'a>(host: &'a str, suffix: &str) -> Option<&'a str> {
    let prefix = host.strip_suffix(suffix)?.strip_suffix('.')?;
    if prefix.is_empty() || prefix.split('.').any(str::is_empty) {
        return None;
    }
    Some(prefix)
}

fn validate_domain(domain: &str) -> Result<(), String> {
    static LABEL_RE: OnceLock<Regex> = OnceLock::new();
    let label_re = LABEL_RE.get_or_init(|| {
        Regex::new(r"^[a-z0-9_]([a-z0-9_-]{0,61}[a-z0-9_])?$").expect("Invalid regex pattern")
    });

    if domain.is_empty() {
        return Err("domain part is empty".to_string());
    }

    if domain.len() > MAX_HOSTNAME_LEN {
        return Err(format!("domain exceeds {MAX_HOSTNAME_LEN} characters"));
    }

    if domain.contains('*') {
        return Err("wildcards are only allowed as a leading '*.' or '**.'".to_string());
    }

    if domain.contains("://") || domain.contains('/') || domain.contains(':') {
        return Err("pattern must be a bare domain without scheme, port or path".to_string());
    }

    for label in domain.split('.') {
        if !label_re.is_match(label) {
            return Err(format!("invalid domain label '{label}'"));
        }
    }

    Ok(())
}

//! Scope engine
//!
//! Decides per URL whether it belongs to the crawl. Exclusion always overrides
//! inclusion; both lists are evaluated in full so diagnostics can report every
//! matching rule.
//!
//! The engine is immutable after construction and shared through `Arc`.

pub mod pattern;

pub use pattern::{PatternKind, ScopePattern, SourceList};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

use crate::utils::{extract_host, normalize_url};

// ============================================================================
// Errors
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScopeError {
    #[error("Invalid scope pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Seed URL '{url}' has no usable hostname")]
    InvalidSeed { url: String },
}

impl ScopeError {
    pub(crate) fn invalid(pattern: &str, reason: impl Into<String>) -> Self {
        Self::InvalidPattern {
            pattern: pattern.to_string(),
            reason: reason.into(),
        }
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// What to do when no include patterns are configured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultPolicy {
    /// Each seed URL's hostname becomes an implicit exact include
    #[default]
    SeedDomains,
    /// Everything not excluded is in scope
    AllowAll,
    /// Nothing is in scope
    DenyAll,
}

impl fmt::Display for DefaultPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SeedDomains => write!(f, "seed_domains"),
            Self::AllowAll => write!(f, "allow_all"),
            Self::DenyAll => write!(f, "deny_all"),
        }
    }
}

/// Scope configuration as written in the config file and carried by checkpoints
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScopeConfig {
    /// Include patterns (`example.com`, `*.example.com`, `**.example.com`)
    pub include: Vec<String>,

    /// Exclude patterns; any match puts a URL out of scope
    pub exclude: Vec<String>,

    /// Behaviour when `include` is empty
    pub default_policy: DefaultPolicy,
}

impl ScopeConfig {
    pub fn new(include: Vec<String>, exclude: Vec<String>) -> Self {
        Self {
            include,
            exclude,
            default_policy: DefaultPolicy::default(),
        }
    }

    /// Parse every pattern without building an engine
    pub fn validate(&self) -> Result<(), ScopeError> {
        for raw in &self.include {
            ScopePattern::parse(raw, SourceList::Include)?;
        }
        for raw in &self.exclude {
            ScopePattern::parse(raw, SourceList::Exclude)?;
        }
        Ok(())
    }

    /// SHA-256 over the canonical form: trimmed, lower-cased, sorted, de-duplicated
    /// lists plus the default policy. List order does not change the fingerprint.
    pub fn fingerprint(&self) -> String {
        fn canonical(list: &[String]) -> Vec<String> {
            let mut out: Vec<String> = list.iter().map(|p| p.trim().to_lowercase()).collect();
            out.sort();
            out.dedup();
            out
        }

        let mut hasher = Sha256::new();
        for pattern in canonical(&self.include) {
            hasher.update(b"+");
            hasher.update(pattern.as_bytes());
            hasher.update(b"\n");
        }
        for pattern in canonical(&self.exclude) {
            hasher.update(b"-");
            hasher.update(pattern.as_bytes());
            hasher.update(b"\n");
        }
        hasher.update(self.default_policy.to_string().as_bytes());

        format!("{:x}", hasher.finalize())
    }
}

// ============================================================================
// Decisions
// ============================================================================

/// Why a URL was accepted or rejected
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "pattern", rename_all = "snake_case")]
pub enum DecisionReason {
    NoMatch,
    IncludedBy(ScopePattern),
    ExcludedBy(ScopePattern),
    AllowedByDefault,
}

/// Outcome of evaluating one URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeDecision {
    pub in_scope: bool,
    pub reason: DecisionReason,
    /// Hostname that was evaluated (`None` when the URL has no host)
    pub domain: Option<String>,
    pub matched_include: Vec<ScopePattern>,
    pub matched_exclude: Vec<ScopePattern>,
}

impl ScopeDecision {
    fn unparseable() -> Self {
        Self {
            in_scope: false,
            reason: DecisionReason::NoMatch,
            domain: None,
            matched_include: Vec::new(),
            matched_exclude: Vec::new(),
        }
    }
}

/// Evaluate a URL against explicit pattern lists.
///
/// `in_scope` holds iff at least one include matched and no exclude matched.
pub fn evaluate(url: &str, include: &[ScopePattern], exclude: &[ScopePattern]) -> ScopeDecision {
    let Some(domain) = extract_host(url) else {
        return ScopeDecision::unparseable();
    };

    let matched_include: Vec<ScopePattern> =
        include.iter().filter(|p| p.matches(&domain)).cloned().collect();
    let matched_exclude: Vec<ScopePattern> =
        exclude.iter().filter(|p| p.matches(&domain)).cloned().collect();

    let (in_scope, reason) = if let Some(first) = matched_exclude.first() {
        (false, DecisionReason::ExcludedBy(first.clone()))
    } else if let Some(first) = matched_include.first() {
        (true, DecisionReason::IncludedBy(first.clone()))
    } else {
        (false, DecisionReason::NoMatch)
    };

    ScopeDecision {
        in_scope,
        reason,
        domain: Some(domain),
        matched_include,
        matched_exclude,
    }
}

/// Diagnostic report for a single URL
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeReport {
    pub url: String,
    /// Frontier identity key, `None` if the URL would be refused at enqueue
    pub normalized: Option<String>,
    pub decision: ScopeDecision,
}

impl fmt::Display for ScopeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verdict = if self.decision.in_scope && self.normalized.is_some() {
            "IN SCOPE"
        } else {
            "OUT OF SCOPE"
        };
        writeln!(f, "{verdict}: {}", self.url)?;
        writeln!(
            f,
            "  normalized: {}",
            self.normalized.as_deref().unwrap_or("(not crawlable)")
        )?;
        writeln!(
            f,
            "  domain:     {}",
            self.decision.domain.as_deref().unwrap_or("(none)")
        )?;
        for pattern in &self.decision.matched_include {
            writeln!(f, "  include:    {pattern}")?;
        }
        for pattern in &self.decision.matched_exclude {
            writeln!(f, "  exclude:    {pattern}")?;
        }
        if self.decision.reason == DecisionReason::AllowedByDefault {
            writeln!(f, "  allowed by default policy")?;
        }
        Ok(())
    }
}

/// Configured patterns and counts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeSummary {
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
    pub include_count: usize,
    pub exclude_count: usize,
    pub default_policy: DefaultPolicy,
    /// Include list was derived from the seed hostnames
    pub implicit_includes: bool,
}

// ============================================================================
// Engine
// ============================================================================

/// Parsed, immutable scope rules
#[derive(Debug, Clone)]
pub struct ScopeEngine {
    include: Vec<ScopePattern>,
    exclude: Vec<ScopePattern>,
    default_policy: DefaultPolicy,
    implicit_includes: bool,
}

impl ScopeEngine {
    /// Build the engine from configuration and the job's seed URLs.
    ///
    /// Seeds are only consulted when `include` is empty and the policy is
    /// `seed_domains`.
    pub fn new(config: &ScopeConfig, seeds: &[String]) -> Result<Self, ScopeError> {
        let mut include = parse_list(&config.include, SourceList::Include)?;
        let exclude = parse_list(&config.exclude, SourceList::Exclude)?;

        for pattern in &include {
            let overlaps = exclude
                .iter()
                .any(|ex| ex.kind() == pattern.kind() && ex.domain() == pattern.domain());
            if overlaps {
                tracing::warn!(
                    pattern = %pattern,
                    "Pattern appears in both include and exclude lists; exclusion wins"
                );
            }
        }

        let mut implicit_includes = false;
        if include.is_empty() && config.default_policy == DefaultPolicy::SeedDomains {
            let mut seen = HashSet::new();
            for seed in seeds {
                let host = extract_host(seed).ok_or_else(|| ScopeError::InvalidSeed {
                    url: seed.clone(),
                })?;
                if seen.insert(host.clone()) {
                    include.push(ScopePattern::exact_include(&host)?);
                }
            }
            implicit_includes = true;
        }

        Ok(Self {
            include,
            exclude,
            default_policy: config.default_policy,
            implicit_includes,
        })
    }

    /// Decide whether `url` is in scope
    pub fn evaluate(&self, url: &str) -> ScopeDecision {
        let mut decision = evaluate(url, &self.include, &self.exclude);

        if self.include.is_empty()
            && self.default_policy == DefaultPolicy::AllowAll
            && decision.domain.is_some()
            && decision.matched_exclude.is_empty()
        {
            decision.in_scope = true;
            decision.reason = DecisionReason::AllowedByDefault;
        }

        decision
    }

    pub fn is_in_scope(&self, url: &str) -> bool {
        self.evaluate(url).in_scope
    }

    /// Full diagnostic for one URL
    pub fn test_url(&self, url: &str) -> ScopeReport {
        ScopeReport {
            url: url.to_string(),
            normalized: normalize_url(url),
            decision: self.evaluate(url),
        }
    }

    /// Keep only in-scope URLs, preserving order
    pub fn filter_urls<'a, I>(&self, urls: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        urls.into_iter()
            .filter(|url| self.is_in_scope(url))
            .map(str::to_string)
            .collect()
    }

    pub fn summary(&self) -> ScopeSummary {
        ScopeSummary {
            include_patterns: self.include.iter().map(ToString::to_string).collect(),
            exclude_patterns: self.exclude.iter().map(ToString::to_string).collect(),
            include_count: self.include.len(),
            exclude_count: self.exclude.len(),
            default_policy: self.default_policy,
            implicit_includes: self.implicit_includes,
        }
    }

    pub fn include_patterns(&self) -> &[ScopePattern] {
        &self.include
    }

    pub fn exclude_patterns(&self) -> &[ScopePattern] {
        &self.exclude
    }
}

/// Parse a list, collapsing duplicates (first occurrence kept)
fn parse_list(raw: &[String], source: SourceList) -> Result<Vec<ScopePattern>, ScopeError> {
    let mut seen = HashSet::new();
    let mut patterns = Vec::with_capacity(raw.len());

    for item in raw {
        let pattern = ScopePattern::parse(item, source)?;
        if seen.insert(pattern.to_string()) {
            patterns.push(pattern);
        }
    }

    Ok(patterns)
}

//! Frontier entries and their lease state machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::models::WorkerId;

/// Lifecycle of a frontier entry
///
/// ```text
/// Pending ──lease──▶ Leased ──success──▶ Done
///    ▲                 │
///    └──expiry/failure─┤
///                      └──retries exhausted──▶ Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryState {
    Pending,
    Leased,
    Done,
    Failed,
}

impl EntryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Leased => "leased",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One URL in the frontier, keyed by its normalized form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontierEntry {
    /// Normalized URL (identity key)
    pub url: String,

    /// Link distance from the nearest seed
    pub depth: u32,

    /// Page the URL was discovered on (`None` for seeds)
    pub parent_url: Option<String>,

    pub discovered_at: DateTime<Utc>,

    pub state: EntryState,

    pub lease_owner: Option<WorkerId>,

    pub lease_expires_at: Option<DateTime<Utc>>,

    /// Failed attempts, lease expiries included
    #[serde(default)]
    pub attempts: u32,

    /// Monotonic discovery order
    pub sequence: u64,

    #[serde(default)]
    pub last_error: Option<String>,

    /// What the worker reported about the fetched page (title, content type)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl FrontierEntry {
    pub fn new(url: String, depth: u32, parent_url: Option<String>, sequence: u64) -> Self {
        Self {
            url,
            depth,
            parent_url,
            discovered_at: Utc::now(),
            state: EntryState::Pending,
            lease_owner: None,
            lease_expires_at: None,
            attempts: 0,
            sequence,
            last_error: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn lease_to(&mut self, worker: &WorkerId, expires_at: DateTime<Utc>) {
        self.state = EntryState::Leased;
        self.lease_owner = Some(worker.clone());
        self.lease_expires_at = Some(expires_at);
    }

    pub fn clear_lease(&mut self) {
        self.lease_owner = None;
        self.lease_expires_at = None;
    }

    pub fn is_held_by(&self, worker: &WorkerId) -> bool {
        self.state == EntryState::Leased && self.lease_owner.as_ref() == Some(worker)
    }

    pub fn is_lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.state == EntryState::Leased && self.lease_expires_at.is_some_and(|at| at <= now)
    }

    /// Count one failed attempt and move to Pending, or Failed once
    /// `max_retries` retries are spent. Returns the new state.
    pub fn record_failure(&mut self, error: impl Into<String>, max_retries: u32) -> EntryState {
        self.clear_lease();
        self.attempts += 1;
        self.last_error = Some(error.into());
        self.state = if self.attempts > max_retries {
            EntryState::Failed
        } else {
            EntryState::Pending
        };
        self.state
    }

    pub fn mark_done(&mut self) {
        self.clear_lease();
        self.state = EntryState::Done;
        self.last_error = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_and_ownership() {
        let worker = WorkerId::new("w1").unwrap();
        let other = WorkerId::new("w2").unwrap();
        let mut entry = FrontierEntry::new("https://example.com/".into(), 0, None, 0);

        let expires = Utc::now() + chrono::Duration::seconds(30);
        entry.lease_to(&worker, expires);

        assert!(entry.is_held_by(&worker));
        assert!(!entry.is_held_by(&other));
        assert!(!entry.is_lease_expired(Utc::now()));
        assert!(entry.is_lease_expired(expires));
    }

    #[test]
    fn test_record_failure_until_exhausted() {
        let mut entry = FrontierEntry::new("https://example.com/".into(), 0, None, 0);

        assert_eq!(entry.record_failure("timeout", 2), EntryState::Pending);
        assert_eq!(entry.record_failure("timeout", 2), EntryState::Pending);
        assert_eq!(entry.record_failure("timeout", 2), EntryState::Failed);
        assert_eq!(entry.attempts, 3);
        assert_eq!(entry.last_error.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_mark_done_clears_lease() {
        let worker = WorkerId::new("w1").unwrap();
        let mut entry = FrontierEntry::new("https://example.com/".into(), 1, None, 3);
        entry.lease_to(&worker, Utc::now());
        entry.mark_done();

        assert_eq!(entry.state, EntryState::Done);
        assert!(entry.lease_owner.is_none());
        assert!(entry.lease_expires_at.is_none());
    }
}

//! In-memory frontier state and transactional changesets
//!
//! Mutations are planned on a [`Transaction`] overlay that reads through to the
//! current [`FrontierState`]. The resulting [`Changeset`] is committed to the
//! persistence backend first and only then applied in memory, so a failed commit
//! leaves the state untouched.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

use super::entry::{EntryState, FrontierEntry};
use super::{FrontierStats, LeasePriority};
use crate::models::WorkerId;

/// Complete, serializable frontier content: every entry plus the visited set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontierSnapshot {
    /// Entries ordered by discovery sequence
    pub entries: Vec<FrontierEntry>,

    /// Visited URLs, sorted
    pub visited: Vec<String>,

    /// Next discovery sequence number to hand out
    pub next_sequence: u64,
}

impl FrontierSnapshot {
    /// Return every Leased entry to Pending with its lease fields cleared
    pub fn release_all_leases(&mut self) -> usize {
        let mut released = 0;
        for entry in &mut self.entries {
            if entry.state == EntryState::Leased {
                entry.state = EntryState::Pending;
                entry.clear_lease();
                released += 1;
            }
        }
        released
    }

    pub fn count(&self, state: EntryState) -> usize {
        self.entries.iter().filter(|e| e.state == state).count()
    }
}

/// Upserted entries and visited additions produced by one transaction
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Changeset {
    pub entries: Vec<FrontierEntry>,
    pub visited: Vec<String>,
    pub next_sequence: u64,
}

impl Changeset {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.visited.is_empty()
    }
}

// ============================================================================
// Frontier State
// ============================================================================

/// Entries with a pending index ordered by lease priority
#[derive(Debug, Default)]
pub struct FrontierState {
    entries: HashMap<String, FrontierEntry>,

    /// (rank, sequence) -> url for every Pending entry
    pending: BTreeMap<(u64, u64), String>,

    /// URLs currently Leased
    leased: HashSet<String>,

    visited: HashSet<String>,

    next_sequence: u64,

    priority: LeasePriority,
}

impl FrontierState {
    pub fn new(priority: LeasePriority) -> Self {
        Self {
            priority,
            ..Default::default()
        }
    }

    pub fn from_snapshot(snapshot: FrontierSnapshot, priority: LeasePriority) -> Self {
        let mut state = Self::new(priority);
        let max_seq = snapshot.entries.iter().map(|e| e.sequence + 1).max().unwrap_or(0);

        state.next_sequence = snapshot.next_sequence.max(max_seq);
        state.visited = snapshot.visited.into_iter().collect();
        for entry in snapshot.entries {
            state.upsert(entry);
        }
        state
    }

    pub fn snapshot(&self) -> FrontierSnapshot {
        let mut entries: Vec<FrontierEntry> = self.entries.values().cloned().collect();
        entries.sort_by_key(|e| e.sequence);

        let mut visited: Vec<String> = self.visited.iter().cloned().collect();
        visited.sort();

        FrontierSnapshot {
            entries,
            visited,
            next_sequence: self.next_sequence,
        }
    }

    pub fn apply(&mut self, changeset: Changeset) {
        for entry in changeset.entries {
            self.upsert(entry);
        }
        self.visited.extend(changeset.visited);
        self.next_sequence = self.next_sequence.max(changeset.next_sequence);
    }

    fn rank(&self, entry: &FrontierEntry) -> (u64, u64) {
        match self.priority {
            LeasePriority::Fifo => (0, entry.sequence),
            LeasePriority::ShallowestFirst => (u64::from(entry.depth), entry.sequence),
        }
    }

    fn upsert(&mut self, entry: FrontierEntry) {
        if let Some(previous) = self.entries.get(&entry.url) {
            let key = self.rank(previous);
            self.pending.remove(&key);
            self.leased.remove(&entry.url);
        }

        match entry.state {
            EntryState::Pending => {
                let key = self.rank(&entry);
                self.pending.insert(key, entry.url.clone());
            }
            EntryState::Leased => {
                self.leased.insert(entry.url.clone());
            }
            EntryState::Done | EntryState::Failed => {}
        }

        self.entries.insert(entry.url.clone(), entry);
    }

    pub fn get(&self, url: &str) -> Option<&FrontierEntry> {
        self.entries.get(url)
    }

    pub fn is_visited(&self, url: &str) -> bool {
        self.visited.contains(url)
    }

    /// Pending URLs in lease order
    pub fn pending_urls(&self) -> impl Iterator<Item = &String> {
        self.pending.values()
    }

    /// Leased entries in no particular order
    pub fn leased_entries(&self) -> impl Iterator<Item = &FrontierEntry> {
        self.leased.iter().filter_map(|url| self.entries.get(url))
    }

    /// Number of leases held per worker
    pub fn leases_by_worker(&self) -> HashMap<WorkerId, usize> {
        let mut counts = HashMap::new();
        for entry in self.leased_entries() {
            if let Some(owner) = &entry.lease_owner {
                *counts.entry(owner.clone()).or_insert(0) += 1;
            }
        }
        counts
    }

    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    pub fn stats(&self) -> FrontierStats {
        let mut stats = FrontierStats {
            pending: self.pending.len(),
            leased: self.leased.len(),
            visited: self.visited.len(),
            total: self.entries.len(),
            ..Default::default()
        };
        for entry in self.entries.values() {
            match entry.state {
                EntryState::Done => stats.done += 1,
                EntryState::Failed => stats.failed += 1,
                EntryState::Pending | EntryState::Leased => {}
            }
        }
        stats
    }
}

// ============================================================================
// Transaction
// ============================================================================

/// Write overlay over a borrowed [`FrontierState`]
pub struct Transaction<'a> {
    base: &'a FrontierState,
    entries: HashMap<String, FrontierEntry>,
    visited: HashSet<String>,
    next_sequence: u64,
}

impl<'a> Transaction<'a> {
    pub fn new(base: &'a FrontierState) -> Self {
        Self {
            base,
            entries: HashMap::new(),
            visited: HashSet::new(),
            next_sequence: base.next_sequence,
        }
    }

    pub fn get(&self, url: &str) -> Option<&FrontierEntry> {
        self.entries.get(url).or_else(|| self.base.get(url))
    }

    /// URL already has an entry or was visited
    pub fn knows(&self, url: &str) -> bool {
        self.get(url).is_some() || self.visited.contains(url) || self.base.is_visited(url)
    }

    pub fn put(&mut self, entry: FrontierEntry) {
        self.entries.insert(entry.url.clone(), entry);
    }

    pub fn visit(&mut self, url: &str) {
        if !self.base.is_visited(url) {
            self.visited.insert(url.to_string());
        }
    }

    pub fn alloc_sequence(&mut self) -> u64 {
        let seq = self.next_sequence;
        self.next_sequence += 1;
        seq
    }

    pub fn into_changeset(self) -> Changeset {
        let mut entries: Vec<FrontierEntry> = self.entries.into_values().collect();
        entries.sort_by_key(|e| e.sequence);

        let mut visited: Vec<String> = self.visited.into_iter().collect();
        visited.sort();

        Changeset {
            entries,
            visited,
            next_sequence: self.next_sequence,
        }
    }
}

//! In-memory frontier backend

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

use super::{FrontierBackend, StorageError};
use crate::frontier::{Changeset, FrontierEntry, FrontierSnapshot};
use crate::models::JobId;

#[derive(Debug, Default)]
struct JobData {
    entries: HashMap<String, FrontierEntry>,
    visited: HashSet<String>,
    next_sequence: u64,
}

impl JobData {
    fn from_snapshot(snapshot: &FrontierSnapshot) -> Self {
        Self {
            entries: snapshot
                .entries
                .iter()
                .map(|e| (e.url.clone(), e.clone()))
                .collect(),
            visited: snapshot.visited.iter().cloned().collect(),
            next_sequence: snapshot.next_sequence,
        }
    }

    fn to_snapshot(&self) -> FrontierSnapshot {
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
}

/// Keeps every job's frontier in process memory
#[derive(Debug, Default)]
pub struct MemoryBackend {
    jobs: RwLock<HashMap<JobId, JobData>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FrontierBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn load(&self, job_id: &JobId) -> Result<Option<FrontierSnapshot>, StorageError> {
        Ok(self.jobs.read().await.get(job_id).map(JobData::to_snapshot))
    }

    async fn commit(&self, job_id: &JobId, changeset: &Changeset) -> Result<(), StorageError> {
        let mut jobs = self.jobs.write().await;
        let data = jobs.entry(job_id.clone()).or_default();

        for entry in &changeset.entries {
            data.entries.insert(entry.url.clone(), entry.clone());
        }
        data.visited.extend(changeset.visited.iter().cloned());
        data.next_sequence = data.next_sequence.max(changeset.next_sequence);

        Ok(())
    }

    async fn replace(
        &self,
        job_id: &JobId,
        snapshot: &FrontierSnapshot,
    ) -> Result<(), StorageError> {
        self.jobs
            .write()
            .await
            .insert(job_id.clone(), JobData::from_snapshot(snapshot));
        Ok(())
    }

    async fn clear(&self, job_id: &JobId) -> Result<(), StorageError> {
        self.jobs.write().await.remove(job_id);
        Ok(())
    }
}

//! Redis frontier backend
//!
//! Layout per job, under the configured key prefix:
//!
//! - `{prefix}:{job}:entries`: hash of normalized URL to JSON entry
//! - `{prefix}:{job}:visited`: set of visited URLs
//! - `{prefix}:{job}:meta`: hash holding `next_sequence`
//!
//! Every commit is one MULTI/EXEC pipeline.

use async_trait::async_trait;
use deadpool_redis::{Config as PoolConfig, Pool, Runtime};
use redis::AsyncCommands;
use std::collections::HashMap;

use super::{FrontierBackend, StorageError};
use crate::frontier::{Changeset, FrontierEntry, FrontierSnapshot};
use crate::models::JobId;

const NEXT_SEQUENCE_FIELD: &str = "next_sequence";

/// Shared frontier state in Redis
pub struct RedisBackend {
    pool: Pool,
    key_prefix: String,
}

impl RedisBackend {
    /// Create the connection pool and verify the server answers PING
    pub async fn connect(url: &str, pool_size: usize, key_prefix: &str) -> Result<Self, StorageError> {
        let pool = PoolConfig::from_url(url)
            .builder()
            .map_err(|e| StorageError::Pool(format!("Failed to create pool builder: {e}")))?
            .max_size(pool_size)
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| StorageError::Pool(format!("Failed to create Redis pool: {e}")))?;

        let backend = Self {
            pool,
            key_prefix: key_prefix.to_string(),
        };

        let mut conn = backend.conn().await?;
        let _: String = redis::cmd("PING").query_async(&mut *conn).await?;

        tracing::info!(url = %url, "Connected to Redis frontier backend");
        Ok(backend)
    }

    async fn conn(&self) -> Result<deadpool_redis::Connection, StorageError> {
        self.pool
            .get()
            .await
            .map_err(|e| StorageError::Pool(e.to_string()))
    }

    fn key(&self, job_id: &JobId, suffix: &str) -> String {
        format!("{}:{}:{}", self.key_prefix, job_id, suffix)
    }

    fn encode_entries(entries: &[FrontierEntry]) -> Result<Vec<(String, String)>, StorageError> {
        entries
            .iter()
            .map(|e| Ok((e.url.clone(), serde_json::to_string(e)?)))
            .collect()
    }

    fn queue_writes(
        &self,
        pipe: &mut redis::Pipeline,
        job_id: &JobId,
        entries: &[(String, String)],
        visited: &[String],
        next_sequence: u64,
    ) {
        if !entries.is_empty() {
            pipe.hset_multiple(self.key(job_id, "entries"), entries).ignore();
        }
        if !visited.is_empty() {
            pipe.sadd(self.key(job_id, "visited"), visited).ignore();
        }
        pipe.hset(self.key(job_id, "meta"), NEXT_SEQUENCE_FIELD, next_sequence)
            .ignore();
    }
}

#[async_trait]
impl FrontierBackend for RedisBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn load(&self, job_id: &JobId) -> Result<Option<FrontierSnapshot>, StorageError> {
        let mut conn = self.conn().await?;

        let next_sequence: Option<u64> = conn
            .hget(self.key(job_id, "meta"), NEXT_SEQUENCE_FIELD)
            .await?;
        let Some(next_sequence) = next_sequence else {
            return Ok(None);
        };

        let raw: HashMap<String, String> = conn.hgetall(self.key(job_id, "entries")).await?;
        let mut entries = raw
            .values()
            .map(|data| serde_json::from_str::<FrontierEntry>(data))
            .collect::<Result<Vec<_>, _>>()?;
        entries.sort_by_key(|e| e.sequence);

        let mut visited: Vec<String> = conn.smembers(self.key(job_id, "visited")).await?;
        visited.sort();

        Ok(Some(FrontierSnapshot {
            entries,
            visited,
            next_sequence,
        }))
    }

    async fn commit(&self, job_id: &JobId, changeset: &Changeset) -> Result<(), StorageError> {
        let entries = Self::encode_entries(&changeset.entries)?;
        let mut conn = self.conn().await?;

        let mut pipe = redis::pipe();
        pipe.atomic();
        self.queue_writes(
            &mut pipe,
            job_id,
            &entries,
            &changeset.visited,
            changeset.next_sequence,
        );

        let _: () = pipe.query_async(&mut *conn).await?;
        Ok(())
    }

    async fn replace(
        &self,
        job_id: &JobId,
        snapshot: &FrontierSnapshot,
    ) -> Result<(), StorageError> {
        let entries = Self::encode_entries(&snapshot.entries)?;
        let mut conn = self.conn().await?;

        let mut pipe = redis::pipe();
        pipe.atomic()
            .del(self.key(job_id, "entries"))
            .ignore()
            .del(self.key(job_id, "visited"))
            .ignore()
            .del(self.key(job_id, "meta"))
            .ignore();
        self.queue_writes(
            &mut pipe,
            job_id,
            &entries,
            &snapshot.visited,
            snapshot.next_sequence,
        );

        let _: () = pipe.query_async(&mut *conn).await?;
        Ok(())
    }

    async fn clear(&self, job_id: &JobId) -> Result<(), StorageError> {
        let mut conn = self.conn().await?;
        let keys = vec![
            self.key(job_id, "entries"),
            self.key(job_id, "visited"),
            self.key(job_id, "meta"),
        ];
        let _: () = conn.del(keys).await?;
        Ok(())
    }
}

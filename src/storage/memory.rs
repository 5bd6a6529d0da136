//! In-memory storage with per-entry expiry

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;

use super::{ActorStore, DeliveryStore, InboxRecord, InboxStore};
use crate::error::Result;
use crate::federation::{DeliveryJob, JobId};
use crate::vocab::Actor;

/// Entry with an expiry
#[derive(Debug, Clone)]
struct Expiring<T> {
    value: T,
    stored_at: Instant,
    ttl: Duration,
}

impl<T> Expiring<T> {
    fn new(value: T, ttl: Duration) -> Self {
        Self {
            value,
            stored_at: Instant::now(),
            ttl,
        }
    }

    fn is_valid(&self) -> bool {
        self.stored_at.elapsed() < self.ttl
    }
}

/// Finished jobs are kept this long by default
pub const DEFAULT_JOB_RETENTION: Duration = Duration::from_secs(86_400);

/// Job with the instant it reached a terminal state
#[derive(Debug, Clone)]
struct StoredJob {
    job: DeliveryJob,
    finished_at: Option<Instant>,
}

/// Thread-safe in-memory implementation of every storage contract.
pub struct MemoryStore {
    jobs: RwLock<HashMap<JobId, StoredJob>>,
    job_retention: Duration,
    inbox: RwLock<HashMap<String, Expiring<InboxRecord>>>,
    actors: RwLock<HashMap<String, Expiring<Arc<Actor>>>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            job_retention: DEFAULT_JOB_RETENTION,
            inbox: RwLock::new(HashMap::new()),
            actors: RwLock::new(HashMap::new()),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep finished jobs for `retention` before `prune_expired` drops them.
    pub fn with_job_retention(mut self, retention: Duration) -> Self {
        self.job_retention = retention;
        self
    }

    /// Drop expired inbox records, actors and finished jobs past their
    /// retention.
    ///
    /// Should be called periodically.
    pub async fn prune_expired(&self) {
        let removed_jobs = {
            let mut jobs = self.jobs.write().await;
            let before = jobs.len();
            let retention = self.job_retention;
            jobs.retain(|_, stored| {
                stored
                    .finished_at
                    .is_none_or(|finished| finished.elapsed() < retention)
            });
            before - jobs.len()
        };
        let removed_records = {
            let mut inbox = self.inbox.write().await;
            let before = inbox.len();
            inbox.retain(|_, record| record.is_valid());
            before - inbox.len()
        };
        let removed_actors = {
            let mut actors = self.actors.write().await;
            let before = actors.len();
            actors.retain(|_, actor| actor.is_valid());
            before - actors.len()
        };

        if removed_records > 0 || removed_actors > 0 || removed_jobs > 0 {
            tracing::info!(
                inbox_records = removed_records,
                actors = removed_actors,
                jobs = removed_jobs,
                "Pruned expired store entries"
            );
        }
    }

    /// Get store statistics
    pub async fn stats(&self) -> StoreStats {
        StoreStats {
            jobs: self.jobs.read().await.len(),
            inbox_records: self.inbox.read().await.len(),
            cached_actors: self.actors.read().await.len(),
        }
    }

    /// Every persisted job, in no particular order
    pub async fn jobs(&self) -> Vec<DeliveryJob> {
        self.jobs
            .read()
            .await
            .values()
            .map(|stored| stored.job.clone())
            .collect()
    }
}

/// Store statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStats {
    pub jobs: usize,
    /// Inbox records, including expired ones not yet pruned
    pub inbox_records: usize,
    /// Cached actors, including expired ones not yet pruned
    pub cached_actors: usize,
}

#[async_trait::async_trait]
impl DeliveryStore for MemoryStore {
    async fn put_job(&self, job: &DeliveryJob) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        let finished_at = match jobs.get(&job.id).and_then(|stored| stored.finished_at) {
            Some(finished) if job.state.is_terminal() => Some(finished),
            _ => job.state.is_terminal().then(Instant::now),
        };
        jobs.insert(
            job.id,
            StoredJob {
                job: job.clone(),
                finished_at,
            },
        );
        Ok(())
    }

    async fn get_job(&self, id: &JobId) -> Result<Option<DeliveryJob>> {
        Ok(self.jobs.read().await.get(id).map(|stored| stored.job.clone()))
    }

    async fn jobs_for_activity(&self, activity_id: &str) -> Result<Vec<DeliveryJob>> {
        Ok(self
            .jobs
            .read()
            .await
            .values()
            .filter(|stored| stored.job.activity.activity_id == activity_id)
            .map(|stored| stored.job.clone())
            .collect())
    }
}

#[async_trait::async_trait]
impl InboxStore for MemoryStore {
    async fn get_record(&self, activity_id: &str) -> Result<Option<InboxRecord>> {
        let inbox = self.inbox.read().await;
        Ok(inbox
            .get(activity_id)
            .filter(|record| record.is_valid())
            .map(|record| record.value.clone()))
    }

    async fn insert_if_absent(&self, record: InboxRecord, ttl: Duration) -> Result<bool> {
        let mut inbox = self.inbox.write().await;
        if inbox
            .get(&record.activity_id)
            .is_some_and(|existing| existing.is_valid())
        {
            return Ok(false);
        }
        inbox.insert(record.activity_id.clone(), Expiring::new(record, ttl));
        Ok(true)
    }
}

#[async_trait::async_trait]
impl ActorStore for MemoryStore {
    async fn get_actor(&self, actor_id: &str) -> Result<Option<Arc<Actor>>> {
        let actors = self.actors.read().await;
        match actors.get(actor_id) {
            Some(cached) if cached.is_valid() => Ok(Some(cached.value.clone())),
            Some(_) => {
                tracing::debug!(actor = %actor_id, "Actor cache entry expired");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put_actor(&self, actor: Arc<Actor>, ttl: Duration) -> Result<()> {
        let mut actors = self.actors.write().await;
        actors.insert(actor.id.clone(), Expiring::new(actor, ttl));
        Ok(())
    }

    async fn remove_actor(&self, actor_id: &str) -> Result<()> {
        self.actors.write().await.remove(actor_id);
        Ok(())
    }
}

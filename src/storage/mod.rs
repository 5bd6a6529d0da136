//! Storage contract consumed by the federation engine
//!
//! The engine needs key-value-with-expiry semantics only:
//! - delivery jobs, persisted on every state transition and kept for a
//!   retention window once finished
//! - inbox dedupe records with a retention window
//! - remote actors cached with a TTL
//!
//! `MemoryStore` implements all three for single-process deployments and
//! tests; hosts plug in their own persistence by implementing the traits.

mod memory;

pub use memory::{MemoryStore, StoreStats};

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::federation::{DeliveryJob, JobId};
use crate::vocab::Actor;

/// Dedupe record for an inbound activity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboxRecord {
    pub activity_id: String,
    pub received_at: DateTime<Utc>,
}

impl InboxRecord {
    pub fn new(activity_id: impl Into<String>) -> Self {
        Self {
            activity_id: activity_id.into(),
            received_at: Utc::now(),
        }
    }
}

/// Persistence for outbound delivery jobs.
#[async_trait::async_trait]
pub trait DeliveryStore: Send + Sync {
    /// Insert or replace a job.
    async fn put_job(&self, job: &DeliveryJob) -> Result<()>;

    async fn get_job(&self, id: &JobId) -> Result<Option<DeliveryJob>>;

    /// Every retained job of one activity, in no particular order.
    async fn jobs_for_activity(&self, activity_id: &str) -> Result<Vec<DeliveryJob>>;
}

/// Inbox dedupe records.
#[async_trait::async_trait]
pub trait InboxStore: Send + Sync {
    async fn get_record(&self, activity_id: &str) -> Result<Option<InboxRecord>>;

    /// Atomically insert a record unless an unexpired one exists.
    ///
    /// Returns `true` when this call inserted the record.
    async fn insert_if_absent(&self, record: InboxRecord, ttl: Duration) -> Result<bool>;
}

/// Remote actor cache.
#[async_trait::async_trait]
pub trait ActorStore: Send + Sync {
    /// Cached actor, if present and unexpired
    async fn get_actor(&self, actor_id: &str) -> Result<Option<Arc<Actor>>>;

    async fn put_actor(&self, actor: Arc<Actor>, ttl: Duration) -> Result<()>;

    async fn remove_actor(&self, actor_id: &str) -> Result<()>;
}

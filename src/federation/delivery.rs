//! Activity delivery
//!
//! Turns an outgoing activity into one job per destination inbox and
//! drives each job through its state machine on a bounded worker pool.
//!
//! - The activity is canonicalized once; every attempt reuses the bytes.
//! - A dispatcher task pulls ready job ids from a queue. Retries are put
//!   back on the queue by timer tasks.
//! - A job is claimed (`Pending`/`Retrying` → `InFlight`) under the job
//!   table lock, so only one attempt per job runs at a time.
//! - Store writes happen under the same lock, so persisted order matches
//!   transition order.
//! - Finished jobs leave the job table once observers are notified; the
//!   `DeliveryStore` answers for them afterwards.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use tokio::sync::{Mutex, RwLock, Semaphore, mpsc};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Instant;

use super::job::{DeliveryJob, Destination, JobId, JobState, PreparedActivity};
use super::keys::KeyStore;
use super::rate_limit::{HostLimiter, extract_domain};
use super::resolver::ActorResolver;
use super::retry::RetryPolicy;
use super::signature::sign_request_with_digest;
use super::transport::DeliveryTransport;
use crate::config::{AppConfig, DeliveryConfig, FederationConfig};
use crate::error::{AppError, Result};
use crate::metrics::{DELIVERY_ATTEMPTS_TOTAL, DELIVERY_JOBS_TOTAL};
use crate::storage::DeliveryStore;
use crate::vocab::{Activity, is_public_collection};

/// Notified when a job reaches a terminal state.
#[async_trait]
pub trait DeliveryObserver: Send + Sync {
    async fn on_delivered(&self, job: &DeliveryJob);

    /// `error` is always `AppError::DeliveryAbandoned`.
    async fn on_abandoned(&self, job: &DeliveryJob, error: &AppError);
}

/// Observer that only logs
pub struct LoggingObserver;

#[async_trait]
impl DeliveryObserver for LoggingObserver {
    async fn on_delivered(&self, job: &DeliveryJob) {
        tracing::info!(
            job_id = %job.id,
            activity = %job.activity.activity_id,
            inbox = %job.destination.as_str(),
            attempts = job.attempts,
            "Delivered activity"
        );
    }

    async fn on_abandoned(&self, job: &DeliveryJob, error: &AppError) {
        tracing::warn!(
            job_id = %job.id,
            activity = %job.activity.activity_id,
            error = %error,
            "Abandoned delivery"
        );
    }
}

/// Engine tuning
#[derive(Debug, Clone)]
pub struct DeliveryOptions {
    pub policy: RetryPolicy,
    /// Concurrent attempts across all hosts
    pub workers: usize,
    pub max_concurrent_per_host: usize,
    /// Collapse recipients onto their shared inbox
    pub use_shared_inbox: bool,
}

impl DeliveryOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            policy: RetryPolicy::from_config(&config.delivery),
            workers: config.delivery.workers,
            max_concurrent_per_host: config.delivery.max_concurrent_per_host,
            use_shared_inbox: config.federation.use_shared_inbox,
        }
    }
}

impl Default for DeliveryOptions {
    fn default() -> Self {
        let delivery = DeliveryConfig::default();
        Self {
            policy: RetryPolicy::from_config(&delivery),
            workers: delivery.workers,
            max_concurrent_per_host: delivery.max_concurrent_per_host,
            use_shared_inbox: FederationConfig::default().use_shared_inbox,
        }
    }
}

struct JobSlot {
    job: DeliveryJob,
    /// Running attempt or pending retry timer
    abort: Option<AbortHandle>,
}

enum Attempt {
    Sent,
    /// Another job for the same activity already delivered to the inbox
    Covered,
    Failed(AppError),
}

struct Inner {
    keys: Arc<KeyStore>,
    resolver: Arc<ActorResolver>,
    transport: Arc<dyn DeliveryTransport>,
    store: Arc<dyn DeliveryStore>,
    observer: Arc<dyn DeliveryObserver>,
    policy: RetryPolicy,
    use_shared_inbox: bool,
    jobs: Mutex<HashMap<JobId, JobSlot>>,
    blocked_hosts: RwLock<HashSet<String>>,
    host_limiter: HostLimiter,
    workers: Arc<Semaphore>,
    queue: mpsc::UnboundedSender<JobId>,
    dispatcher: std::sync::Mutex<Option<JoinHandle<()>>>,
}

/// Outbound delivery engine. Cheap to clone.
#[derive(Clone)]
pub struct DeliveryEngine {
    inner: Arc<Inner>,
}

impl DeliveryEngine {
    /// Create the engine and start its dispatcher.
    ///
    /// # Panics
    /// When called outside a Tokio runtime.
    pub fn new(
        keys: Arc<KeyStore>,
        resolver: Arc<ActorResolver>,
        transport: Arc<dyn DeliveryTransport>,
        store: Arc<dyn DeliveryStore>,
        observer: Arc<dyn DeliveryObserver>,
        options: DeliveryOptions,
    ) -> Self {
        let (queue, receiver) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            keys,
            resolver,
            transport,
            store,
            observer,
            policy: options.policy,
            use_shared_inbox: options.use_shared_inbox,
            jobs: Mutex::new(HashMap::new()),
            blocked_hosts: RwLock::new(HashSet::new()),
            host_limiter: HostLimiter::new(options.max_concurrent_per_host),
            workers: Arc::new(Semaphore::new(options.workers.max(1))),
            queue,
            dispatcher: std::sync::Mutex::new(None),
        });

        let handle = tokio::spawn(run_dispatcher(Arc::downgrade(&inner), receiver));
        if let Ok(mut dispatcher) = inner.dispatcher.lock() {
            *dispatcher = Some(handle);
        }

        Self { inner }
    }

    /// Create one job per destination inbox and schedule them.
    ///
    /// The public collection and the sending actor are never delivered
    /// to. Recipients sharing an inbox get a single job. Recipients that
    /// cannot be resolved right now get a job addressed to the actor that
    /// resolves again on each attempt; recipients that are not valid
    /// actors get a job that is abandoned immediately.
    ///
    /// # Errors
    /// - `MalformedVocabulary` if the activity has no `id` or `actor`
    /// - `KeyNotFound` if the actor has no local key
    /// - `Canonicalization` if the activity cannot be encoded
    pub async fn enqueue_delivery(
        &self,
        activity: &Activity,
        recipients: &[String],
    ) -> Result<Vec<JobId>> {
        let inner = &self.inner;

        activity
            .id()
            .ok_or_else(|| AppError::MalformedVocabulary("activity has no `id`".to_string()))?;
        let actor_id = activity
            .actor_id()
            .ok_or_else(|| AppError::MalformedVocabulary("activity has no `actor`".to_string()))?;
        inner.keys.get_signing_key(actor_id).await?;

        let prepared = Arc::new(PreparedActivity::prepare(activity)?);

        let mut seen = HashSet::new();
        let targets: Vec<&str> = recipients
            .iter()
            .map(String::as_str)
            .filter(|r| !is_public_collection(r) && *r != actor_id)
            .filter(|r| seen.insert(*r))
            .collect();

        let resolved = join_all(targets.iter().map(|r| inner.resolver.resolve(r))).await;

        let mut inboxes = HashSet::new();
        let mut planned: Vec<(Destination, Option<String>)> = Vec::new();
        for (recipient, result) in targets.iter().zip(resolved) {
            match result {
                Ok(actor) => {
                    let inbox = actor.delivery_inbox(inner.use_shared_inbox).to_string();
                    if inboxes.insert(inbox.clone()) {
                        planned.push((Destination::Inbox(inbox), None));
                    }
                }
                Err(e) if e.is_retryable() => {
                    tracing::info!(recipient = %recipient, error = %e, "Recipient unreachable, will resolve at delivery time");
                    planned.push((Destination::Actor(recipient.to_string()), None));
                }
                Err(e) => {
                    planned.push((Destination::Actor(recipient.to_string()), Some(e.to_string())));
                }
            }
        }

        let blocked = inner.blocked_hosts.read().await.clone();
        let mut ids = Vec::with_capacity(planned.len());
        let mut scheduled = Vec::new();
        let mut abandoned = Vec::new();
        {
            let mut jobs = inner.jobs.lock().await;
            for (destination, failure) in planned {
                let mut job = DeliveryJob::new(prepared.clone(), destination);
                if let Some(reason) = failure {
                    job.abandon(reason);
                } else if blocked.contains(&job.host()) {
                    job.abandon(format!("destination {} is blocked", job.host()));
                }

                inner.persist(&job).await;
                ids.push(job.id);
                if job.state == JobState::Abandoned {
                    abandoned.push(job);
                } else {
                    scheduled.push(job.id);
                    jobs.insert(job.id, JobSlot { job, abort: None });
                }
            }
        }

        tracing::info!(
            activity = %prepared.activity_id,
            digest = %prepared.digest_hex,
            jobs = ids.len(),
            recipients = recipients.len(),
            "Enqueued delivery"
        );

        for job in &abandoned {
            inner.notify_terminal(job).await;
        }
        for id in scheduled {
            inner.schedule(id);
        }

        Ok(ids)
    }

    /// Stop delivering to `host`: abort its running attempts, abandon its
    /// outstanding jobs and abandon any later job for it.
    pub async fn block_destination(&self, host: &str) {
        let inner = &self.inner;
        let host = extract_domain(host);
        inner.blocked_hosts.write().await.insert(host.clone());

        let mut abandoned = Vec::new();
        {
            let mut jobs = inner.jobs.lock().await;
            for slot in jobs.values_mut() {
                if slot.job.state.is_terminal() || slot.job.host() != host {
                    continue;
                }
                if let Some(abort) = slot.abort.take() {
                    abort.abort();
                }
                slot.job.abandon(format!("destination {} is blocked", host));
                inner.persist(&slot.job).await;
                abandoned.push(slot.job.clone());
            }
        }

        tracing::warn!(host = %host, abandoned = abandoned.len(), "Blocked delivery destination");
        for job in &abandoned {
            inner.finish(job).await;
        }
    }

    pub async fn unblock_destination(&self, host: &str) {
        self.inner
            .blocked_hosts
            .write()
            .await
            .remove(&extract_domain(host));
    }

    /// Forget per-host limiters with no outstanding requests.
    pub fn prune_idle_hosts(&self) {
        self.inner.host_limiter.prune_idle();
    }

    /// Current snapshot of a job. Finished jobs are read back from the
    /// store while it retains them.
    pub async fn job(&self, id: &JobId) -> Option<DeliveryJob> {
        let active = self
            .inner
            .jobs
            .lock()
            .await
            .get(id)
            .map(|slot| slot.job.clone());
        match active {
            Some(job) => Some(job),
            None => match self.inner.store.get_job(id).await {
                Ok(job) => job,
                Err(e) => {
                    tracing::warn!(job_id = %id, error = %e, "Failed to load delivery job");
                    None
                }
            },
        }
    }

    pub async fn jobs_for_activity(&self, activity_id: &str) -> Vec<DeliveryJob> {
        let stored = self
            .inner
            .store
            .jobs_for_activity(activity_id)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(activity = %activity_id, error = %e, "Failed to load delivery jobs");
                Vec::new()
            });
        let mut by_id: HashMap<JobId, DeliveryJob> =
            stored.into_iter().map(|job| (job.id, job)).collect();

        for slot in self.inner.jobs.lock().await.values() {
            if slot.job.activity.activity_id == activity_id {
                by_id.insert(slot.job.id, slot.job.clone());
            }
        }

        let mut jobs: Vec<DeliveryJob> = by_id.into_values().collect();
        jobs.sort_by_key(|job| job.id);
        jobs
    }

    /// Jobs not yet delivered or abandoned
    pub async fn active_jobs(&self) -> usize {
        self.inner.jobs.lock().await.len()
    }

    /// Stop the dispatcher and abort outstanding attempts and retry timers.
    ///
    /// Jobs keep their last state; a host with durable storage can requeue
    /// non-terminal jobs on restart.
    pub async fn shutdown(&self) {
        if let Ok(mut dispatcher) = self.inner.dispatcher.lock() {
            if let Some(handle) = dispatcher.take() {
                handle.abort();
            }
        }

        let mut jobs = self.inner.jobs.lock().await;
        let mut aborted = 0;
        for slot in jobs.values_mut() {
            if let Some(abort) = slot.abort.take() {
                abort.abort();
                aborted += 1;
            }
        }
        tracing::info!(aborted, "Delivery engine stopped");
    }
}

async fn run_dispatcher(inner: Weak<Inner>, mut receiver: mpsc::UnboundedReceiver<JobId>) {
    while let Some(id) = receiver.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.dispatch(id).await;
    }
    tracing::debug!("Delivery dispatcher exited");
}

impl Inner {
    fn schedule(&self, id: JobId) {
        if self.queue.send(id).is_err() {
            tracing::warn!(job_id = %id, "Delivery queue closed, job not scheduled");
        }
    }

    async fn persist(&self, job: &DeliveryJob) {
        if let Err(e) = self.store.put_job(job).await {
            tracing::error!(job_id = %job.id, error = %e, "Failed to persist delivery job");
        }
    }

    /// Claim a job and start its attempt.
    async fn dispatch(self: Arc<Self>, id: JobId) {
        let mut jobs = self.jobs.lock().await;
        let Some(slot) = jobs.get_mut(&id) else {
            return;
        };
        if !slot.job.claim() {
            tracing::debug!(job_id = %id, state = %slot.job.state, "Job not claimable, skipping");
            return;
        }
        self.persist(&slot.job).await;

        let job = slot.job.clone();
        let inner = self.clone();
        // The attempt records its result under this lock, so the abort
        // handle is in place before the attempt can finish.
        let handle = tokio::spawn(async move {
            let attempt = inner.attempt(&job).await;
            inner.record(job.id, attempt).await;
        });
        slot.abort = Some(handle.abort_handle());
    }

    async fn attempt(&self, job: &DeliveryJob) -> Attempt {
        let inbox = match &job.destination {
            Destination::Inbox(inbox) => inbox.clone(),
            Destination::Actor(actor_id) => match self.resolve_late(job, actor_id).await {
                Ok(Some(inbox)) => inbox,
                Ok(None) => return Attempt::Covered,
                Err(e) => return Attempt::Failed(e),
            },
        };

        match self.send(job, &inbox).await {
            Ok(()) => Attempt::Sent,
            Err(e) => Attempt::Failed(e),
        }
    }

    /// Resolve an actor-addressed job. `None` if another job of the same
    /// activity has already delivered to the resolved inbox; a job that is
    /// still pending or retrying does not count.
    async fn resolve_late(&self, job: &DeliveryJob, actor_id: &str) -> Result<Option<String>> {
        let actor = self.resolver.resolve(actor_id).await?;
        let inbox = actor.delivery_inbox(self.use_shared_inbox).to_string();
        let target = Destination::Inbox(inbox.clone());

        let siblings = self
            .store
            .jobs_for_activity(&job.activity.activity_id)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(job_id = %job.id, error = %e, "Failed to load sibling jobs");
                Vec::new()
            });
        let covered = siblings.iter().any(|other| {
            other.id != job.id && other.destination == target && other.state == JobState::Delivered
        });
        if covered {
            return Ok(None);
        }

        if let Some(slot) = self.jobs.lock().await.get_mut(&job.id) {
            slot.job.resolve_destination(inbox.clone());
        }
        Ok(Some(inbox))
    }

    async fn send(&self, job: &DeliveryJob, inbox: &str) -> Result<()> {
        let host = extract_domain(inbox);
        let _host_permit = self.host_limiter.acquire(&host).await?;
        let _worker = self
            .workers
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| AppError::Internal(e.into()))?;

        if self.blocked_hosts.read().await.contains(&host) {
            return Err(AppError::Forbidden(format!("destination {} is blocked", host)));
        }

        let key_pair = self.keys.get_signing_key(&job.activity.actor_id).await?;
        let headers = sign_request_with_digest(
            "POST",
            inbox,
            Some(&job.activity.digest_header),
            &key_pair,
            Utc::now(),
        )?;

        tracing::debug!(job_id = %job.id, inbox = %inbox, attempt = job.attempts, "Sending activity");
        self.transport
            .post(inbox, job.activity.body.clone(), &headers)
            .await
    }

    async fn record(&self, id: JobId, attempt: Attempt) {
        let (snapshot, outcome) = {
            let mut jobs = self.jobs.lock().await;
            let Some(slot) = jobs.get_mut(&id) else {
                return;
            };
            slot.abort = None;
            // Blocked or shut down while the attempt ran.
            if slot.job.state != JobState::InFlight {
                return;
            }

            let outcome = match attempt {
                Attempt::Sent => {
                    slot.job.mark_delivered();
                    "delivered"
                }
                Attempt::Covered => {
                    tracing::info!(job_id = %id, "Inbox covered by existing job");
                    slot.job.mark_delivered();
                    "covered"
                }
                Attempt::Failed(e) if e.is_retryable() && self.policy.should_retry(slot.job.attempts) => {
                    let delay = self.policy.delay_for_attempt(slot.job.attempts);
                    tracing::info!(
                        job_id = %id,
                        attempt = slot.job.attempts,
                        retry_in_secs = delay.as_secs_f64(),
                        error = %e,
                        "Delivery failed, retrying"
                    );
                    slot.job.mark_retrying(e.to_string(), Instant::now() + delay);

                    let queue = self.queue.clone();
                    let timer = tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = queue.send(id);
                    });
                    slot.abort = Some(timer.abort_handle());
                    "retry"
                }
                Attempt::Failed(e) => {
                    slot.job.abandon(e.to_string());
                    "abandoned"
                }
            };

            self.persist(&slot.job).await;
            (slot.job.clone(), outcome)
        };

        DELIVERY_ATTEMPTS_TOTAL.with_label_values(&[outcome]).inc();
        if snapshot.state.is_terminal() {
            self.finish(&snapshot).await;
        }
    }

    /// Notify observers of a terminal job, then drop it from the table.
    async fn finish(&self, job: &DeliveryJob) {
        self.notify_terminal(job).await;
        self.jobs.lock().await.remove(&job.id);
    }

    async fn notify_terminal(&self, job: &DeliveryJob) {
        DELIVERY_JOBS_TOTAL
            .with_label_values(&[job.state.as_str()])
            .inc();
        match job.state {
            JobState::Delivered => self.observer.on_delivered(job).await,
            JobState::Abandoned => {
                let error = job.abandoned_error();
                self.observer.on_abandoned(job, &error).await;
            }
            _ => {}
        }
    }
}

//! Remote actor resolution with caching and single-flight fetches
//!
//! Concurrent callers asking for the same uncached actor share one network
//! fetch. The flight is removed from the in-flight map by whichever caller
//! observes its completion first, and only if the map still holds that
//! same flight. The map lock is never held across a store or network
//! call, so unrelated actors do not wait on each other.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tokio::sync::Mutex;

use super::fetch::ActorFetcher;
use crate::error::{AppError, Result};
use crate::metrics::{ACTOR_FETCHES_TOTAL, CACHE_HITS_TOTAL, CACHE_MISSES_TOTAL};
use crate::storage::ActorStore;
use crate::vocab::{Actor, PublicKey, VocabularyObject};

/// Shareable failure of a fetch flight
#[derive(Debug, Clone)]
enum ResolveError {
    Unreachable(String),
    Invalid(String),
}

impl From<ResolveError> for AppError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::Unreachable(msg) => AppError::ActorUnreachable(msg),
            ResolveError::Invalid(msg) => AppError::ActorInvalid(msg),
        }
    }
}

type Flight = Shared<BoxFuture<'static, std::result::Result<Arc<Actor>, ResolveError>>>;

/// Resolves actor URIs to validated actor documents.
pub struct ActorResolver {
    store: Arc<dyn ActorStore>,
    fetcher: Arc<dyn ActorFetcher>,
    ttl: Duration,
    in_flight: Mutex<HashMap<String, Flight>>,
}

impl ActorResolver {
    pub fn new(store: Arc<dyn ActorStore>, fetcher: Arc<dyn ActorFetcher>, ttl: Duration) -> Self {
        Self {
            store,
            fetcher,
            ttl,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Cached actor if fresh, otherwise fetched and cached.
    ///
    /// # Errors
    /// - `ActorUnreachable` for transient fetch failures (nothing cached)
    /// - `ActorInvalid` if the document is not a usable actor
    pub async fn resolve(&self, actor_id: &str) -> Result<Arc<Actor>> {
        if let Some(actor) = self.store.get_actor(actor_id).await? {
            CACHE_HITS_TOTAL.with_label_values(&["actor"]).inc();
            tracing::debug!(actor = %actor_id, "Actor cache hit");
            return Ok(actor);
        }

        CACHE_MISSES_TOTAL.with_label_values(&["actor"]).inc();
        tracing::debug!(actor = %actor_id, "Actor cache miss, fetching");
        self.fetch_shared(actor_id).await
    }

    /// Resolve the actor owning `key_id` and the advertised key.
    ///
    /// If the cached actor does not advertise the key, the actor is
    /// refetched once before giving up.
    pub async fn resolve_key(&self, key_id: &str) -> Result<(Arc<Actor>, PublicKey)> {
        let actor_id = key_id.split('#').next().unwrap_or(key_id);

        let actor = self.resolve(actor_id).await?;
        if let Some(key) = actor.public_key(key_id) {
            let key = key.clone();
            return Self::check_owner(actor, key);
        }

        tracing::info!(key_id = %key_id, "Unknown key id, refetching actor");
        let actor = self.refresh(actor_id).await?;
        let key = actor
            .public_key(key_id)
            .cloned()
            .ok_or_else(|| AppError::SignatureInvalid(format!("unknown key `{}`", key_id)))?;
        Self::check_owner(actor, key)
    }

    fn check_owner(actor: Arc<Actor>, key: PublicKey) -> Result<(Arc<Actor>, PublicKey)> {
        if key.owner != actor.id {
            return Err(AppError::SignatureInvalid(format!(
                "key `{}` is owned by `{}`, not `{}`",
                key.id, key.owner, actor.id
            )));
        }
        Ok((actor, key))
    }

    /// Drop any cached copy and fetch again.
    pub async fn refresh(&self, actor_id: &str) -> Result<Arc<Actor>> {
        self.store.remove_actor(actor_id).await?;
        self.fetch_shared(actor_id).await
    }

    pub async fn invalidate(&self, actor_id: &str) -> Result<()> {
        self.store.remove_actor(actor_id).await
    }

    /// Number of fetches currently in flight
    pub async fn in_flight(&self) -> usize {
        self.in_flight.lock().await.len()
    }

    async fn fetch_shared(&self, actor_id: &str) -> Result<Arc<Actor>> {
        let joined = self.in_flight.lock().await.get(actor_id).cloned();
        let flight = match joined {
            Some(flight) => flight,
            None => {
                // A flight that finished since the caller's cache miss has
                // already stored the actor.
                if let Some(actor) = self.store.get_actor(actor_id).await? {
                    return Ok(actor);
                }
                self.in_flight
                    .lock()
                    .await
                    .entry(actor_id.to_string())
                    .or_insert_with(|| {
                        fetch_and_store(
                            self.store.clone(),
                            self.fetcher.clone(),
                            actor_id.to_string(),
                            self.ttl,
                        )
                        .boxed()
                        .shared()
                    })
                    .clone()
            }
        };

        let result = flight.clone().await;

        {
            let mut in_flight = self.in_flight.lock().await;
            if in_flight
                .get(actor_id)
                .is_some_and(|current| current.ptr_eq(&flight))
            {
                in_flight.remove(actor_id);
            }
        }

        result.map_err(AppError::from)
    }
}

async fn fetch_and_store(
    store: Arc<dyn ActorStore>,
    fetcher: Arc<dyn ActorFetcher>,
    actor_id: String,
    ttl: Duration,
) -> std::result::Result<Arc<Actor>, ResolveError> {
    let result = fetch_actor(fetcher.as_ref(), &actor_id).await;

    let label = match &result {
        Ok(_) => "success",
        Err(ResolveError::Unreachable(_)) => "unreachable",
        Err(ResolveError::Invalid(_)) => "invalid",
    };
    ACTOR_FETCHES_TOTAL.with_label_values(&[label]).inc();

    match result {
        Ok(actor) => {
            let actor = Arc::new(actor);
            if let Err(e) = store.put_actor(actor.clone(), ttl).await {
                tracing::warn!(actor = %actor_id, error = %e, "Failed to cache actor");
            }
            tracing::debug!(actor = %actor_id, "Fetched actor");
            Ok(actor)
        }
        Err(e) => {
            tracing::warn!(actor = %actor_id, error = ?e, "Actor fetch failed");
            Err(e)
        }
    }
}

async fn fetch_actor(
    fetcher: &dyn ActorFetcher,
    actor_id: &str,
) -> std::result::Result<Actor, ResolveError> {
    let document = fetcher.fetch_actor(actor_id).await.map_err(|e| match e {
        AppError::ActorUnreachable(msg) => ResolveError::Unreachable(msg),
        e if e.is_retryable() => ResolveError::Unreachable(e.to_string()),
        e => ResolveError::Invalid(e.to_string()),
    })?;

    let object = VocabularyObject::from_json(&document)
        .map_err(|e| ResolveError::Invalid(e.to_string()))?;
    let actor = Actor::from_object(object).map_err(|e| ResolveError::Invalid(e.to_string()))?;

    if actor.id != actor_id {
        return Err(ResolveError::Invalid(format!(
            "document id `{}` does not match `{}`",
            actor.id, actor_id
        )));
    }
    if actor.public_keys.is_empty() {
        return Err(ResolveError::Invalid(format!(
            "actor `{}` advertises no public key",
            actor_id
        )));
    }

    Ok(actor)
}

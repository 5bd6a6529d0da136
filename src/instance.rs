//! Local instance actor
//!
//! The binary publishes a single service actor. It answers Follow requests
//! with an Accept, tracks its followers, and keeps the activities it sent in
//! an in-memory outbox served through `ActorDispatcher`.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{HandlerError, Result};
use crate::federation::{ActivityHandler, ActorDispatcher, DeliveryEngine};
use crate::vocab::{Activity, ObjectType, Page, VocabularyObject, builder};

/// Outbox page size
pub const OUTBOX_PAGE_SIZE: usize = 20;

/// The local service actor and its state
pub struct InstanceActor {
    handle: String,
    base_url: String,
    document: VocabularyObject,
    /// Newest first
    outbox: RwLock<Vec<VocabularyObject>>,
    followers: RwLock<BTreeSet<String>>,
}

impl InstanceActor {
    pub fn new(base_url: &str, handle: &str, name: &str, public_key_pem: &str) -> Self {
        let base_url = base_url.trim_end_matches('/').to_string();
        let actor_uri = actor_uri(&base_url, handle);
        let shared_inbox = format!("{}/inbox", base_url);
        let document = builder::actor(
            ObjectType::Service,
            &actor_uri,
            handle,
            name,
            public_key_pem,
            Some(&shared_inbox),
        );

        Self {
            handle: handle.to_string(),
            base_url,
            document,
            outbox: RwLock::new(Vec::new()),
            followers: RwLock::new(BTreeSet::new()),
        }
    }

    pub fn handle(&self) -> &str {
        &self.handle
    }

    pub fn actor_uri(&self) -> String {
        actor_uri(&self.base_url, &self.handle)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn followers(&self) -> Vec<String> {
        self.followers.read().await.iter().cloned().collect()
    }

    /// Record an activity sent by this actor.
    pub async fn record_outbox(&self, activity: &Activity) {
        self.outbox
            .write()
            .await
            .insert(0, activity.as_object().clone());
    }

    pub async fn outbox_len(&self) -> usize {
        self.outbox.read().await.len()
    }
}

fn actor_uri(base_url: &str, handle: &str) -> String {
    format!("{}/users/{}", base_url, handle)
}

#[async_trait]
impl ActorDispatcher for InstanceActor {
    async fn dispatch_actor(&self, handle: &str) -> Result<Option<VocabularyObject>> {
        Ok((handle == self.handle).then(|| self.document.clone()))
    }

    async fn dispatch_outbox(
        &self,
        handle: &str,
        cursor: Option<&str>,
    ) -> Result<Option<Page<VocabularyObject>>> {
        if handle != self.handle {
            return Ok(None);
        }

        // Cursors are offsets into the newest-first outbox.
        let start = match cursor {
            Some(cursor) => match cursor.parse::<usize>() {
                Ok(start) => start,
                Err(_) => return Ok(None),
            },
            None => 0,
        };

        let outbox = self.outbox.read().await;
        let end = (start + OUTBOX_PAGE_SIZE).min(outbox.len());
        let items = outbox.get(start..end).map(<[_]>::to_vec).unwrap_or_default();

        Ok(Some(Page {
            prev_cursor: (start > 0).then(|| start.saturating_sub(OUTBOX_PAGE_SIZE).to_string()),
            next_cursor: (end < outbox.len()).then(|| end.to_string()),
            items,
        }))
    }

    async fn outbox_first_cursor(&self, handle: &str) -> Result<Option<String>> {
        Ok((handle == self.handle).then(|| "0".to_string()))
    }

    async fn outbox_last_cursor(&self, handle: &str) -> Result<Option<String>> {
        if handle != self.handle {
            return Ok(None);
        }
        let len = self.outbox.read().await.len();
        let last = len.saturating_sub(1) / OUTBOX_PAGE_SIZE * OUTBOX_PAGE_SIZE;
        Ok(Some(last.to_string()))
    }

    async fn count_outbox(&self, handle: &str) -> Result<Option<u64>> {
        if handle != self.handle {
            return Ok(None);
        }
        Ok(Some(self.outbox.read().await.len() as u64))
    }
}

/// Handles activities addressed to the instance actor.
///
/// - `Follow` of the actor: the follower is recorded and an `Accept` is
///   delivered back
/// - `Undo` of such a `Follow`: the follower is removed
/// - anything else is logged and acknowledged
pub struct InstanceHandler {
    instance: Arc<InstanceActor>,
    delivery: DeliveryEngine,
}

impl InstanceHandler {
    pub fn new(instance: Arc<InstanceActor>, delivery: DeliveryEngine) -> Self {
        Self { instance, delivery }
    }

    async fn accept_follow(&self, follow: &Activity) -> std::result::Result<(), HandlerError> {
        let follower = follow
            .actor_id()
            .ok_or_else(|| HandlerError::Failed("Follow has no actor".to_string()))?
            .to_string();

        let actor_uri = self.instance.actor_uri();
        let accept = builder::accept(
            &builder::new_activity_id(self.instance.base_url()),
            &actor_uri,
            follow,
        )
        .map_err(|e| HandlerError::Other(e.into()))?;

        self.instance.followers.write().await.insert(follower.clone());
        self.instance.record_outbox(&accept).await;

        let jobs = self
            .delivery
            .enqueue_delivery(&accept, std::slice::from_ref(&follower))
            .await
            .map_err(|e| HandlerError::Other(e.into()))?;

        tracing::info!(follower = %follower, jobs = jobs.len(), "Accepted follow");
        Ok(())
    }
}

#[async_trait]
impl ActivityHandler for InstanceHandler {
    async fn handle_activity(&self, activity: Activity) -> std::result::Result<(), HandlerError> {
        let actor_uri = self.instance.actor_uri();

        match activity.kind() {
            ObjectType::Follow if activity.object_id() == Some(actor_uri.as_str()) => {
                self.accept_follow(&activity).await
            }
            ObjectType::Undo => {
                let undone_follow = activity
                    .object()
                    .and_then(|node| node.as_object())
                    .is_some_and(|object| {
                        object.kind() == Some(ObjectType::Follow)
                            && object.first_node("object").and_then(|n| n.id())
                                == Some(actor_uri.as_str())
                    });
                if let (true, Some(follower)) = (undone_follow, activity.actor_id()) {
                    self.instance.followers.write().await.remove(follower);
                    tracing::info!(follower = %follower, "Follower removed");
                }
                Ok(())
            }
            other => {
                tracing::debug!(kind = %other, id = ?activity.id(), "Ignoring activity");
                Ok(())
            }
        }
    }
}

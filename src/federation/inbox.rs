//! Inbound activity processing
//!
//! Verifies, deduplicates and dispatches activities POSTed to an inbox.
//! An activity id is only accepted from an actor on the same origin, so a
//! signer cannot claim (and thereby suppress) another server's ids.
//! The dedupe record is written before the application handler runs and is
//! kept even if the handler fails, so a redelivery of the same activity is
//! reported as a duplicate rather than handled twice.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use chrono::Utc;

use super::resolver::ActorResolver;
use super::signature::{SignedRequest, key_id_matches_actor, verify_request};
use crate::error::{AppError, HandlerError, Result};
use crate::metrics::{ACTIVITIES_RECEIVED, INBOX_DUPLICATES_TOTAL};
use crate::storage::{InboxRecord, InboxStore};
use crate::vocab::{Activity, VocabularyObject};

/// Application callback for accepted activities.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ActivityHandler: Send + Sync {
    async fn handle_activity(&self, activity: Activity) -> std::result::Result<(), HandlerError>;
}

/// Raw inbound request
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: String,
    /// Path and query exactly as received
    pub path_and_query: String,
    pub headers: http::HeaderMap,
    pub body: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboxOutcome {
    /// Verified, recorded and handled
    Accepted,
    /// Already seen within the retention window
    Duplicate,
}

pub struct InboxProcessor {
    resolver: Arc<ActorResolver>,
    store: Arc<dyn InboxStore>,
    handler: Arc<dyn ActivityHandler>,
    max_clock_skew_secs: u64,
    retention: Duration,
}

impl InboxProcessor {
    pub fn new(
        resolver: Arc<ActorResolver>,
        store: Arc<dyn InboxStore>,
        handler: Arc<dyn ActivityHandler>,
        max_clock_skew_secs: u64,
        retention: Duration,
    ) -> Self {
        Self {
            resolver,
            store,
            handler,
            max_clock_skew_secs,
            retention,
        }
    }

    /// Process one inbound delivery.
    ///
    /// # Errors
    /// - `SignatureMissing`, `SignatureMalformed`, `SignatureInvalid`,
    ///   `SignatureExpired`, `DigestMismatch` for authentication failures
    /// - `ActorUnreachable` / `ActorInvalid` if the signer cannot be resolved
    /// - `MalformedVocabulary` for unusable documents
    /// - `SignatureInvalid` if the key or the activity id does not belong
    ///   to the activity's actor
    /// - `Handler` if the application handler fails (the activity stays
    ///   recorded)
    pub async fn receive(&self, request: InboundRequest) -> Result<InboxOutcome> {
        if !request.headers.contains_key("signature") {
            crate::metrics::SIGNATURE_FAILURES_TOTAL
                .with_label_values(&["signature_missing"])
                .inc();
            return Err(AppError::SignatureMissing);
        }

        let signed = SignedRequest {
            method: &request.method,
            path_and_query: &request.path_and_query,
            headers: &request.headers,
            body: Some(&request.body[..]),
        };
        let verified =
            verify_request(&self.resolver, &signed, self.max_clock_skew_secs, Utc::now()).await?;

        let document = VocabularyObject::from_slice(&request.body)?;
        let activity_id = document
            .id()
            .ok_or_else(|| AppError::MalformedVocabulary("activity has no `id`".to_string()))?
            .to_string();

        let activity = Activity::from_object(document)?;
        let actor_id = activity
            .actor_id()
            .ok_or_else(|| AppError::MalformedVocabulary("activity has no `actor`".to_string()))?;
        if !key_id_matches_actor(&verified.key_id, actor_id) || verified.owner != actor_id {
            return Err(AppError::SignatureInvalid(format!(
                "key `{}` does not belong to actor `{}`",
                verified.key_id, actor_id
            )));
        }
        if !same_origin(&activity_id, actor_id) {
            crate::metrics::SIGNATURE_FAILURES_TOTAL
                .with_label_values(&["foreign_activity_id"])
                .inc();
            return Err(AppError::SignatureInvalid(format!(
                "activity `{}` is not on the origin of actor `{}`",
                activity_id, actor_id
            )));
        }

        if self.store.get_record(&activity_id).await?.is_some() {
            INBOX_DUPLICATES_TOTAL.inc();
            tracing::debug!(activity = %activity_id, "Duplicate activity");
            return Ok(InboxOutcome::Duplicate);
        }

        let inserted = self
            .store
            .insert_if_absent(InboxRecord::new(&activity_id), self.retention)
            .await?;
        if !inserted {
            INBOX_DUPLICATES_TOTAL.inc();
            tracing::debug!(activity = %activity_id, "Duplicate activity (concurrent delivery)");
            return Ok(InboxOutcome::Duplicate);
        }

        let kind = activity.kind().to_string();
        ACTIVITIES_RECEIVED.with_label_values(&[kind.as_str()]).inc();
        tracing::info!(activity = %activity_id, kind = %kind, actor = %actor_id, "Accepted activity");

        if let Err(e) = self.handler.handle_activity(activity).await {
            tracing::error!(activity = %activity_id, error = %e, "Activity handler failed");
            return Err(AppError::Handler(e));
        }

        Ok(InboxOutcome::Accepted)
    }
}

/// Scheme, host and port of both URIs match.
fn same_origin(a: &str, b: &str) -> bool {
    match (url::Url::parse(a), url::Url::parse(b)) {
        (Ok(a), Ok(b)) => a.origin().is_tuple() && a.origin() == b.origin(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::federation::keys::KeyPair;
    use crate::federation::signature::sign_request;
    use crate::federation::test_support::{FakeFetcher, actor_document};
    use crate::storage::MemoryStore;
    use http::HeaderValue;
    use serde_json::json;

    const BOB: &str = "https://b.example/users/bob";
    const EVE: &str = "https://e.example/users/eve";

    struct Fixture {
        processor: InboxProcessor,
        store: Arc<MemoryStore>,
        bob: KeyPair,
        eve: KeyPair,
    }

    fn fixture(handler: MockActivityHandler) -> Fixture {
        let bob = KeyPair::generate(BOB, 1024).expect("bob key");
        let eve = KeyPair::generate(EVE, 1024).expect("eve key");
        let fetcher = Arc::new(
            FakeFetcher::new()
                .with_document(BOB, actor_document(BOB, &bob.public_key_pem))
                .with_document(EVE, actor_document(EVE, &eve.public_key_pem)),
        );
        let store = Arc::new(MemoryStore::new());
        let resolver = Arc::new(ActorResolver::new(
            store.clone(),
            fetcher,
            Duration::from_secs(3600),
        ));
        let processor = InboxProcessor::new(
            resolver,
            store.clone(),
            Arc::new(handler),
            300,
            Duration::from_secs(3600),
        );
        Fixture {
            processor,
            store,
            bob,
            eve,
        }
    }

    fn signed(body: &serde_json::Value, key_pair: &KeyPair) -> InboundRequest {
        let body = serde_json::to_vec(body).expect("json");
        let headers = sign_request("POST", "https://a.example/inbox", Some(&body), key_pair)
            .expect("signed");

        let mut map = http::HeaderMap::new();
        map.insert("host", HeaderValue::from_static("a.example"));
        map.insert("date", HeaderValue::from_str(&headers.date).expect("date"));
        map.insert(
            "digest",
            HeaderValue::from_str(headers.digest.as_deref().expect("digest")).expect("digest"),
        );
        map.insert(
            "signature",
            HeaderValue::from_str(&headers.signature).expect("signature"),
        );

        InboundRequest {
            method: "POST".to_string(),
            path_and_query: "/inbox".to_string(),
            headers: map,
            body: Bytes::from(body),
        }
    }

    fn follow(id: &str, actor: &str) -> serde_json::Value {
        json!({
            "@context": "https://www.w3.org/ns/activitystreams",
            "type": "Follow",
            "id": id,
            "actor": actor,
            "object": "https://a.example/users/alice"
        })
    }

    #[tokio::test]
    async fn duplicate_delivery_is_handled_once() {
        let mut handler = MockActivityHandler::new();
        handler.expect_handle_activity().times(1).returning(|_| Ok(()));
        let f = fixture(handler);

        let body = follow("https://b.example/activities/1", BOB);
        let first = f.processor.receive(signed(&body, &f.bob)).await.expect("first");
        let second = f.processor.receive(signed(&body, &f.bob)).await.expect("second");

        assert_eq!(first, InboxOutcome::Accepted);
        assert_eq!(second, InboxOutcome::Duplicate);
    }

    #[tokio::test]
    async fn handler_failure_keeps_the_record() {
        let mut handler = MockActivityHandler::new();
        handler
            .expect_handle_activity()
            .times(1)
            .returning(|_| Err(HandlerError::Failed("database down".to_string())));
        let f = fixture(handler);

        let body = follow("https://b.example/activities/2", BOB);
        assert!(matches!(
            f.processor.receive(signed(&body, &f.bob)).await,
            Err(AppError::Handler(_))
        ));
        assert!(
            f.store
                .get_record("https://b.example/activities/2")
                .await
                .expect("get")
                .is_some()
        );
        assert_eq!(
            f.processor.receive(signed(&body, &f.bob)).await.expect("redelivery"),
            InboxOutcome::Duplicate
        );
    }

    #[tokio::test]
    async fn missing_signature_is_rejected() {
        let mut handler = MockActivityHandler::new();
        handler.expect_handle_activity().never();
        let f = fixture(handler);

        let mut request = signed(&follow("https://b.example/activities/3", BOB), &f.bob);
        request.headers.remove("signature");
        assert!(matches!(
            f.processor.receive(request).await,
            Err(AppError::SignatureMissing)
        ));
    }

    #[tokio::test]
    async fn tampered_body_is_rejected() {
        let mut handler = MockActivityHandler::new();
        handler.expect_handle_activity().never();
        let f = fixture(handler);

        let mut request = signed(&follow("https://b.example/activities/4", BOB), &f.bob);
        let tampered = serde_json::to_vec(&follow("https://b.example/activities/4", EVE))
            .expect("json");
        request.body = Bytes::from(tampered);
        assert!(matches!(
            f.processor.receive(request).await,
            Err(AppError::DigestMismatch)
        ));
        assert_eq!(f.store.stats().await.inbox_records, 0);
    }

    #[tokio::test]
    async fn activity_signed_by_another_actor_is_rejected() {
        let mut handler = MockActivityHandler::new();
        handler.expect_handle_activity().never();
        let f = fixture(handler);

        // Eve signs an activity claiming to be from Bob.
        let request = signed(&follow("https://b.example/activities/5", BOB), &f.eve);
        assert!(matches!(
            f.processor.receive(request).await,
            Err(AppError::SignatureInvalid(_))
        ));
        assert_eq!(f.store.stats().await.inbox_records, 0);
    }

    #[tokio::test]
    async fn activity_without_id_is_malformed() {
        let mut handler = MockActivityHandler::new();
        handler.expect_handle_activity().never();
        let f = fixture(handler);

        let body = json!({
            "type": "Follow",
            "actor": BOB,
            "object": "https://a.example/users/alice"
        });
        assert!(matches!(
            f.processor.receive(signed(&body, &f.bob)).await,
            Err(AppError::MalformedVocabulary(_))
        ));
    }

    #[tokio::test]
    async fn activity_id_on_a_foreign_origin_is_rejected() {
        let mut handler = MockActivityHandler::new();
        handler.expect_handle_activity().times(1).returning(|_| Ok(()));
        let f = fixture(handler);

        // Eve signs her own Follow but reuses an id under Bob's server.
        let squatted = follow("https://b.example/activities/9", EVE);
        assert!(matches!(
            f.processor.receive(signed(&squatted, &f.eve)).await,
            Err(AppError::SignatureInvalid(_))
        ));
        assert_eq!(f.store.stats().await.inbox_records, 0);

        let genuine = follow("https://b.example/activities/9", BOB);
        assert_eq!(
            f.processor.receive(signed(&genuine, &f.bob)).await.expect("bob"),
            InboxOutcome::Accepted
        );
    }

    #[tokio::test]
    async fn foreign_signer_cannot_learn_recorded_ids() {
        let mut handler = MockActivityHandler::new();
        handler.expect_handle_activity().times(1).returning(|_| Ok(()));
        let f = fixture(handler);

        let body = follow("https://b.example/activities/10", BOB);
        f.processor.receive(signed(&body, &f.bob)).await.expect("bob");

        // Same id, Eve's key: rejected rather than reported as a duplicate.
        let replay = follow("https://b.example/activities/10", EVE);
        assert!(matches!(
            f.processor.receive(signed(&replay, &f.eve)).await,
            Err(AppError::SignatureInvalid(_))
        ));
    }

    #[test]
    fn origin_comparison_includes_scheme_and_port() {
        assert!(same_origin("https://b.example/a/1", "https://b.example/users/bob"));
        assert!(!same_origin("http://b.example/a/1", "https://b.example/users/bob"));
        assert!(!same_origin("https://b.example:8443/a/1", "https://b.example/users/bob"));
        assert!(!same_origin("urn:uuid:1", "https://b.example/users/bob"));
    }
}

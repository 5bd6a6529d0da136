//! Hand-written fakes for the network seams

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use serde_json::{Value, json};

use super::fetch::ActorFetcher;
use super::signature::SignatureHeaders;
use super::transport::DeliveryTransport;
use crate::error::{AppError, Result};

/// Minimal actor document with one key.
pub fn actor_document(id: &str, public_key_pem: &str) -> Value {
    json!({
        "@context": ["https://www.w3.org/ns/activitystreams", "https://w3id.org/security/v1"],
        "type": "Person",
        "id": id,
        "inbox": format!("{}/inbox", id),
        "publicKey": {
            "id": format!("{}#main-key", id),
            "owner": id,
            "publicKeyPem": public_key_pem,
        }
    })
}

/// Actor document advertising a shared inbox.
pub fn actor_document_with_shared_inbox(id: &str, public_key_pem: &str, shared_inbox: &str) -> Value {
    let mut document = actor_document(id, public_key_pem);
    document["endpoints"] = json!({ "sharedInbox": shared_inbox });
    document
}

/// Serves canned documents and counts fetches. Unknown actors are
/// unreachable.
#[derive(Default)]
pub struct FakeFetcher {
    documents: Mutex<HashMap<String, Value>>,
    invalid: Mutex<Vec<String>>,
    calls: Mutex<HashMap<String, usize>>,
    delay: Option<Duration>,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(self, id: &str, document: Value) -> Self {
        self.set_document(id, document);
        self
    }

    pub fn with_invalid(self, id: &str) -> Self {
        self.invalid
            .lock()
            .expect("lock")
            .push(id.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_document(&self, id: &str, document: Value) {
        self.documents
            .lock()
            .expect("lock")
            .insert(id.to_string(), document);
    }

    pub fn calls(&self, id: &str) -> usize {
        self.calls
            .lock()
            .expect("lock")
            .get(id)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl ActorFetcher for FakeFetcher {
    async fn fetch_actor(&self, actor_id: &str) -> Result<Value> {
        *self
            .calls
            .lock()
            .expect("lock")
            .entry(actor_id.to_string())
            .or_default() += 1;

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.invalid.lock().expect("lock").iter().any(|id| id == actor_id) {
            return Err(AppError::ActorInvalid(format!("{}: HTTP 410", actor_id)));
        }

        self.documents
            .lock()
            .expect("lock")
            .get(actor_id)
            .cloned()
            .ok_or_else(|| AppError::ActorUnreachable(format!("{}: connection refused", actor_id)))
    }
}

/// A request seen by `ScriptedTransport`
#[derive(Debug, Clone)]
pub struct TransportCall {
    pub inbox: String,
    pub body: Bytes,
    pub headers: SignatureHeaders,
}

/// Answers each POST with the next scripted status for its inbox, falling
/// back to a default status. Tracks peak concurrency.
pub struct ScriptedTransport {
    scripts: Mutex<HashMap<String, VecDeque<u16>>>,
    default_status: u16,
    delay: Option<Duration>,
    calls: Mutex<Vec<TransportCall>>,
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new(default_status: u16) -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            default_status,
            delay: None,
            calls: Mutex::new(Vec::new()),
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn with_script(self, inbox: &str, statuses: &[u16]) -> Self {
        self.scripts
            .lock()
            .expect("lock")
            .insert(inbox.to_string(), statuses.iter().copied().collect());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().expect("lock").clone()
    }

    pub fn calls_to(&self, inbox: &str) -> usize {
        self.calls
            .lock()
            .expect("lock")
            .iter()
            .filter(|call| call.inbox == inbox)
            .count()
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeliveryTransport for ScriptedTransport {
    async fn post(&self, inbox: &str, body: Bytes, headers: &SignatureHeaders) -> Result<()> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        self.calls.lock().expect("lock").push(TransportCall {
            inbox: inbox.to_string(),
            body,
            headers: headers.clone(),
        });

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let status = self
            .scripts
            .lock()
            .expect("lock")
            .get_mut(inbox)
            .and_then(VecDeque::pop_front)
            .unwrap_or(self.default_status);

        self.current.fetch_sub(1, Ordering::SeqCst);

        if (200..300).contains(&status) {
            Ok(())
        } else {
            Err(AppError::Transport {
                status: Some(status),
                message: format!("{} answered HTTP {}", inbox, status),
            })
        }
    }
}

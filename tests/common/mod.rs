//! Common test utilities for E2E tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use fedikit::config::{
    AppConfig, DeliveryConfig, FederationConfig, InstanceConfig, LoggingConfig, ServerConfig,
};
use fedikit::federation::{ActorDispatcher, DeliveryJob, JobState, sign_request};
use fedikit::instance::{InstanceActor, InstanceHandler};
use fedikit::{AppState, Federation};
use tokio::net::TcpListener;

pub const HANDLE: &str = "relay";

/// Test server instance
pub struct TestServer {
    pub addr: String,
    pub domain: String,
    pub federation: Arc<Federation>,
    pub instance: Arc<InstanceActor>,
    pub client: reqwest::Client,
}

/// Loopback configuration with fast retries.
pub fn test_config(domain: &str) -> AppConfig {
    AppConfig {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            domain: domain.to_string(),
            protocol: "http".to_string(),
        },
        instance: InstanceConfig {
            actor_handle: HANDLE.to_string(),
            actor_name: "Test Relay".to_string(),
            private_key_path: None,
        },
        federation: FederationConfig {
            allow_private_hosts: true,
            fetch_timeout_secs: 5,
            ..FederationConfig::default()
        },
        delivery: DeliveryConfig {
            max_attempts: 3,
            initial_backoff_secs: 0.05,
            max_backoff_secs: 0.2,
            jitter_ratio: 0.0,
            request_timeout_secs: 5,
            ..DeliveryConfig::default()
        },
        logging: LoggingConfig {
            level: "debug".to_string(),
            format: "pretty".to_string(),
        },
    }
}

impl TestServer {
    /// Create a new test server instance
    pub async fn new() -> Self {
        fedikit::metrics::init_metrics();

        // Bind first so the public domain can carry the assigned port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let domain = addr.to_string();

        let config = test_config(&domain);
        let base_url = config.server.base_url();
        let federation = Arc::new(Federation::builder(config).build().unwrap());

        let actor_uri = format!("{}/users/{}", base_url, HANDLE);
        let key_pair = federation.keys().generate(&actor_uri, 1024).await.unwrap();
        let instance = Arc::new(InstanceActor::new(
            &base_url,
            HANDLE,
            "Test Relay",
            &key_pair.public_key_pem,
        ));
        let handler = Arc::new(InstanceHandler::new(
            instance.clone(),
            federation.delivery().clone(),
        ));

        let state = AppState::new(federation.clone(), handler, instance.clone());
        let app = fedikit::build_router(state);

        // Spawn server in background
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap();

        Self {
            addr: base_url,
            domain,
            federation,
            instance,
            client,
        }
    }

    /// Get base URL for API requests
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    pub fn actor_uri(&self) -> String {
        self.instance.actor_uri()
    }

    pub fn inbox_url(&self) -> String {
        format!("{}/inbox", self.actor_uri())
    }

    /// POST `body` to `inbox_url`, signed with this server's actor key.
    pub async fn post_signed(&self, inbox_url: &str, body: &serde_json::Value) -> reqwest::Response {
        let body = serde_json::to_vec(body).unwrap();
        self.post_signed_bytes(inbox_url, body, |request| request).await
    }

    /// Sign `body`, let `tamper` adjust the request, then send it.
    pub async fn post_signed_bytes(
        &self,
        inbox_url: &str,
        body: Vec<u8>,
        tamper: impl FnOnce(reqwest::RequestBuilder) -> reqwest::RequestBuilder,
    ) -> reqwest::Response {
        let key_pair = self
            .federation
            .keys()
            .get_signing_key(&self.actor_uri())
            .await
            .unwrap();
        let headers = sign_request("POST", inbox_url, Some(&body[..]), &key_pair).unwrap();

        let request = self
            .client
            .post(inbox_url)
            .header("Content-Type", "application/activity+json")
            .header("Date", &headers.date)
            .header("Digest", headers.digest.clone().unwrap())
            .header("Signature", &headers.signature)
            .body(body);

        tamper(request).send().await.unwrap()
    }

    /// Unique activity id under this server.
    pub fn activity_id(&self, name: &str) -> String {
        format!("{}/activities/{}-{}", self.addr, name, ulid::Ulid::new())
    }

    /// Newest activity in the local outbox.
    pub async fn latest_outbox_id(&self) -> Option<String> {
        let page = self
            .instance
            .dispatch_outbox(HANDLE, None)
            .await
            .unwrap()?;
        page.items.first().and_then(|item| item.id()).map(str::to_string)
    }

    /// Wait until every job for `activity_id` is terminal.
    pub async fn wait_for_jobs(&self, activity_id: &str) -> Vec<DeliveryJob> {
        for _ in 0..500 {
            let jobs = self
                .federation
                .delivery()
                .jobs_for_activity(activity_id)
                .await;
            if !jobs.is_empty() && jobs.iter().all(|job| job.state.is_terminal()) {
                return jobs;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("delivery of {activity_id} did not finish");
    }
}

/// A `Create{Note}` from `sender`, addressed to `recipient`.
pub fn create_note(id: &str, sender: &str, recipient: &str) -> serde_json::Value {
    serde_json::json!({
        "@context": "https://www.w3.org/ns/activitystreams",
        "type": "Create",
        "id": id,
        "actor": sender,
        "to": [recipient],
        "object": {
            "type": "Note",
            "id": format!("{}/note", id),
            "attributedTo": sender,
            "content": "<p>hello</p>",
            "to": [recipient]
        }
    })
}

/// Port with nothing listening on it.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

pub fn assert_state(jobs: &[DeliveryJob], state: JobState) {
    assert!(
        jobs.iter().all(|job| job.state == state),
        "expected all jobs {state}, got {:?}",
        jobs.iter().map(|job| job.state).collect::<Vec<_>>()
    );
}

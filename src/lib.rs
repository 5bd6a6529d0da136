//! fedikit - ActivityPub federation engine
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      API Layer (Axum)                        │
//! │  - Inbox / shared inbox                                     │
//! │  - Actor and outbox documents                               │
//! │  - WebFinger, metrics                                       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Federation Engine                         │
//! │  - Inbox Processor (verify, dedupe, dispatch)               │
//! │  - Delivery Engine (jobs, retries, per-host limits)         │
//! │  - Actor Resolver, Signature Codec, Key Store               │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Storage Contract                         │
//! │  - Delivery jobs, inbox records, cached actors              │
//! │  - In-memory TTL implementation                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `vocab`: Activity Vocabulary model and builders
//! - `canonical`: canonical JSON encoding and digests
//! - `federation`: keys, signatures, resolver, delivery, inbox
//! - `storage`: storage contract and in-memory implementation
//! - `instance`: the local service actor run by the binary
//! - `api`: HTTP handlers
//! - `config`: Configuration management
//! - `error`: Error types

pub mod api;
pub mod canonical;
pub mod config;
pub mod error;
pub mod federation;
pub mod instance;
pub mod metrics;
pub mod storage;
pub mod vocab;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::error::Result;
use crate::federation::{
    ActivityHandler, ActorDispatcher, ActorFetcher, ActorResolver, DeliveryEngine,
    DeliveryObserver, DeliveryOptions, DeliveryTransport, HttpActorFetcher, HttpTransport,
    InboxProcessor, JobId, KeyStore, LoggingObserver,
};
use crate::storage::{ActorStore, DeliveryStore, InboxStore, MemoryStore};
use crate::vocab::Activity;

/// Engine context
///
/// Owns the Key Store, the Actor Resolver cache and the Delivery Engine.
/// Nothing here is process-global; dropping the context (after
/// `shutdown`) releases everything it started.
pub struct Federation {
    config: Arc<AppConfig>,
    keys: Arc<KeyStore>,
    resolver: Arc<ActorResolver>,
    delivery: DeliveryEngine,
    inbox_store: Arc<dyn InboxStore>,
    /// Set when the default in-memory store is in use
    memory_store: Option<Arc<MemoryStore>>,
}

impl Federation {
    pub fn builder(config: AppConfig) -> FederationBuilder {
        FederationBuilder::new(config)
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn keys(&self) -> &Arc<KeyStore> {
        &self.keys
    }

    pub fn resolver(&self) -> &Arc<ActorResolver> {
        &self.resolver
    }

    pub fn delivery(&self) -> &DeliveryEngine {
        &self.delivery
    }

    /// Inbox processor handing accepted activities to `handler`.
    pub fn inbox_processor(&self, handler: Arc<dyn ActivityHandler>) -> InboxProcessor {
        InboxProcessor::new(
            self.resolver.clone(),
            self.inbox_store.clone(),
            handler,
            self.config.federation.max_clock_skew_secs,
            self.config.federation.inbox_retention(),
        )
    }

    /// Submit an activity for delivery to the given actors.
    pub async fn enqueue_delivery(
        &self,
        activity: &Activity,
        recipients: &[String],
    ) -> Result<Vec<JobId>> {
        self.delivery.enqueue_delivery(activity, recipients).await
    }

    /// Evict expired inbox records and cached actors from the in-memory
    /// store, and idle per-host delivery limiters.
    pub async fn prune_expired(&self) {
        if let Some(store) = &self.memory_store {
            store.prune_expired().await;
        }
        self.delivery.prune_idle_hosts();
    }

    pub async fn shutdown(&self) {
        self.delivery.shutdown().await;
    }
}

/// Assembles a `Federation` from configuration and optional overrides.
///
/// Every collaborator defaults to the production implementation: HTTP
/// fetcher and transport, a shared `MemoryStore`, and a logging observer.
pub struct FederationBuilder {
    config: AppConfig,
    keys: Option<Arc<KeyStore>>,
    fetcher: Option<Arc<dyn ActorFetcher>>,
    transport: Option<Arc<dyn DeliveryTransport>>,
    observer: Option<Arc<dyn DeliveryObserver>>,
    actor_store: Option<Arc<dyn ActorStore>>,
    inbox_store: Option<Arc<dyn InboxStore>>,
    delivery_store: Option<Arc<dyn DeliveryStore>>,
}

impl FederationBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            keys: None,
            fetcher: None,
            transport: None,
            observer: None,
            actor_store: None,
            inbox_store: None,
            delivery_store: None,
        }
    }

    pub fn keys(mut self, keys: Arc<KeyStore>) -> Self {
        self.keys = Some(keys);
        self
    }

    pub fn fetcher(mut self, fetcher: Arc<dyn ActorFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn DeliveryTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn DeliveryObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn actor_store(mut self, store: Arc<dyn ActorStore>) -> Self {
        self.actor_store = Some(store);
        self
    }

    pub fn inbox_store(mut self, store: Arc<dyn InboxStore>) -> Self {
        self.inbox_store = Some(store);
        self
    }

    pub fn delivery_store(mut self, store: Arc<dyn DeliveryStore>) -> Self {
        self.delivery_store = Some(store);
        self
    }

    /// Build the context and start the delivery dispatcher.
    ///
    /// Must be called inside a Tokio runtime.
    ///
    /// # Errors
    /// `Config` for invalid configuration, `HttpClient` if the default
    /// HTTP client cannot be built.
    pub fn build(self) -> Result<Federation> {
        self.config.validate()?;

        let memory = Arc::new(
            MemoryStore::new().with_job_retention(self.config.delivery.job_retention()),
        );
        let uses_memory = self.actor_store.is_none()
            || self.inbox_store.is_none()
            || self.delivery_store.is_none();

        let actor_store = self
            .actor_store
            .unwrap_or_else(|| memory.clone() as Arc<dyn ActorStore>);
        let inbox_store = self
            .inbox_store
            .unwrap_or_else(|| memory.clone() as Arc<dyn InboxStore>);
        let delivery_store = self
            .delivery_store
            .unwrap_or_else(|| memory.clone() as Arc<dyn DeliveryStore>);
        let memory_store = uses_memory.then_some(memory);

        let fetcher: Arc<dyn ActorFetcher> = match self.fetcher {
            Some(fetcher) => fetcher,
            None => Arc::new(HttpActorFetcher::new(&self.config.federation)?),
        };
        let transport: Arc<dyn DeliveryTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(&self.config)?),
        };

        let keys = self.keys.unwrap_or_default();
        let resolver = Arc::new(ActorResolver::new(
            actor_store,
            fetcher,
            self.config.federation.actor_cache_ttl(),
        ));
        let delivery = DeliveryEngine::new(
            keys.clone(),
            resolver.clone(),
            transport,
            delivery_store,
            self.observer.unwrap_or_else(|| Arc::new(LoggingObserver)),
            DeliveryOptions::from_config(&self.config),
        );

        tracing::info!(
            workers = self.config.delivery.workers,
            per_host = self.config.delivery.max_concurrent_per_host,
            "Federation engine started"
        );

        Ok(Federation {
            config: Arc::new(self.config),
            keys,
            resolver,
            delivery,
            inbox_store,
            memory_store,
        })
    }
}

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub federation: Arc<Federation>,
    pub inbox: Arc<InboxProcessor>,
    /// Publishes local actors and outboxes
    pub dispatcher: Arc<dyn ActorDispatcher>,
}

impl AppState {
    pub fn new(
        federation: Arc<Federation>,
        handler: Arc<dyn ActivityHandler>,
        dispatcher: Arc<dyn ActorDispatcher>,
    ) -> Self {
        let inbox = Arc::new(federation.inbox_processor(handler));
        Self {
            federation,
            inbox,
            dispatcher,
        }
    }

    pub fn config(&self) -> &AppConfig {
        self.federation.config()
    }
}

/// Build the Axum router with all routes.
///
/// This is shared by the binary and integration tests to keep route
/// composition consistent across environments.
pub fn build_router(state: AppState) -> axum::Router {
    use axum::Router;
    use tower_http::{compression::CompressionLayer, trace::TraceLayer};

    let cors_layer = build_cors_layer(&state.config().server);

    Router::new()
        .route("/health", axum::routing::get(health_check))
        .merge(api::wellknown_router())
        .merge(api::activitypub_router())
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer)
        .with_state(state)
        .merge(api::metrics_router())
}

fn build_cors_layer(server: &crate::config::ServerConfig) -> tower_http::cors::CorsLayer {
    use axum::http::HeaderValue;
    use tower_http::cors::{Any, CorsLayer};

    if !server.protocol.eq_ignore_ascii_case("https") {
        return CorsLayer::permissive();
    }

    let allowed_origin = server.base_url();
    match HeaderValue::from_str(&allowed_origin) {
        Ok(origin) => CorsLayer::new()
            .allow_origin([origin])
            .allow_methods(Any)
            .allow_headers(Any),
        Err(error) => {
            tracing::error!(
                %error,
                origin = %allowed_origin,
                "Failed to parse CORS origin from server base URL; denying cross-origin requests"
            );
            CorsLayer::new().allow_methods(Any).allow_headers(Any)
        }
    }
}

async fn health_check() -> &'static str {
    "OK"
}

//! fedikit binary entry point
//!
//! Runs the federation engine with a single local service actor that
//! accepts follows.

use std::sync::Arc;

use fedikit::instance::{InstanceActor, InstanceHandler};
use fedikit::{AppState, Federation, config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How often expired inbox records and cached actors are evicted
const PRUNE_INTERVAL_SECS: u64 = 600;

/// Application entry point
///
/// # Setup
/// 1. Initialize tracing/logging
/// 2. Initialize metrics
/// 3. Load configuration from file and environment
/// 4. Build the federation engine and the instance actor
/// 5. Start HTTP server and background pruning
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize tracing/logging
    let log_format =
        std::env::var("FEDIKIT__LOGGING__FORMAT").unwrap_or_else(|_| "pretty".to_string());

    if log_format == "json" {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "fedikit=info,tower_http=debug".into()),
            )
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "fedikit=info,tower_http=debug".into()),
            )
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }

    tracing::info!("Starting fedikit...");

    // 2. Initialize metrics
    fedikit::metrics::init_metrics();

    // 3. Load configuration
    let config = config::AppConfig::load()?;
    tracing::info!(
        domain = %config.server.domain,
        protocol = %config.server.protocol,
        "Configuration loaded"
    );

    // 4. Build engine and instance actor
    let federation = Arc::new(Federation::builder(config.clone()).build()?);

    let base_url = config.server.base_url();
    let actor_uri = format!("{}/users/{}", base_url, config.instance.actor_handle);
    let key_pair = match &config.instance.private_key_path {
        Some(path) => {
            federation
                .keys()
                .load_or_generate(
                    &actor_uri,
                    std::path::Path::new(path),
                    fedikit::federation::DEFAULT_KEY_BITS,
                )
                .await?
        }
        None => {
            tracing::warn!("instance.private_key_path is unset; using a key that lasts one run");
            federation
                .keys()
                .generate(&actor_uri, fedikit::federation::DEFAULT_KEY_BITS)
                .await?
        }
    };
    let instance = Arc::new(InstanceActor::new(
        &base_url,
        &config.instance.actor_handle,
        &config.instance.actor_name,
        &key_pair.public_key_pem,
    ));
    let handler = Arc::new(InstanceHandler::new(
        instance.clone(),
        federation.delivery().clone(),
    ));
    tracing::info!(actor = %actor_uri, "Instance actor ready");

    let state = AppState::new(federation.clone(), handler, instance);
    let app = fedikit::build_router(state);

    // 5. Start HTTP server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);
    tracing::info!("Public URL: {}", base_url);

    spawn_prune_task(federation.clone());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    federation.shutdown().await;
    Ok(())
}

/// Spawn background eviction of expired records
fn spawn_prune_task(federation: Arc<Federation>) {
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(PRUNE_INTERVAL_SECS));
        // The first tick completes immediately.
        interval.tick().await;

        loop {
            interval.tick().await;
            federation.prune_expired().await;
            tracing::debug!("Pruned expired records");
        }
    });

    tracing::info!("Prune task spawned");
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

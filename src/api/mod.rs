//! API layer
//!
//! HTTP handlers for:
//! - ActivityPub (actor, inbox, outbox)
//! - WebFinger discovery
//! - Metrics (Prometheus)

mod activitypub;
pub mod metrics;
mod wellknown;

pub use activitypub::activitypub_router;
pub use metrics::metrics_router;
pub use wellknown::wellknown_router;

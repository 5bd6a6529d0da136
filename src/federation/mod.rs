//! ActivityPub federation module
//!
//! Handles:
//! - Local key pairs (Key Store)
//! - HTTP Signatures and body digests
//! - Remote actor resolution with caching and single-flight fetches
//! - Outbound delivery (jobs, retry policy, per-host limits, transport)
//! - Inbound activity processing
//! - WebFinger

mod delivery;
mod dispatcher;
mod fetch;
mod inbox;
mod job;
mod keys;
mod rate_limit;
mod resolver;
mod retry;
mod signature;
mod transport;
mod webfinger;

#[cfg(test)]
pub(crate) mod test_support;

pub use delivery::{DeliveryEngine, DeliveryObserver, DeliveryOptions, LoggingObserver};
pub use dispatcher::{ActorDispatcher, outbox_document};
pub use fetch::{
    ACTIVITY_JSON, ActorFetcher, HttpActorFetcher, MAX_REDIRECTS, build_http_client,
    check_destination, extract_remote_host, get_checked, read_json_limited, redirect_target,
};
pub use inbox::{ActivityHandler, InboundRequest, InboxOutcome, InboxProcessor};
pub use job::{DeliveryJob, Destination, JobId, JobState, PreparedActivity};
pub use keys::{DEFAULT_KEY_BITS, KeyPair, KeyStore};
pub use rate_limit::{HostLimiter, extract_domain};
pub use resolver::ActorResolver;
pub use retry::RetryPolicy;
pub use signature::{
    HTTP_DATE_FORMAT, ParsedSignature, SignatureHeaders, SignedRequest, VerifiedSignature,
    generate_digest, key_id_matches_actor, parse_signature_header, sign_request,
    sign_request_with_digest, verify_request, verify_signature,
};
pub use transport::{DeliveryTransport, HttpTransport};
pub use webfinger::{
    JRD_JSON, WebFingerLink, WebFingerResponse, WebFingerResult, actor_uri_from_jrd,
    generate_webfinger_response, lookup as lookup_webfinger, parse_address, resolve_webfinger,
    webfinger_url,
};

#[cfg(test)]
pub use inbox::MockActivityHandler;

//! Remote actor fetching
//!
//! `ActorFetcher` is the network seam used by the resolver. The HTTP
//! implementation refuses local and private destinations unless the
//! deployment explicitly allows them. Redirects are followed here rather
//! than by the client, so every hop is checked the same way, and bodies
//! are read up to a byte limit.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::{DEFAULT_MAX_DOCUMENT_BYTES, FederationConfig};
use crate::error::{AppError, Result};
use crate::metrics::FEDERATION_REQUEST_DURATION_SECONDS;

pub const ACTIVITY_JSON: &str = "application/activity+json";
/// Redirect hops followed by `get_checked`
pub const MAX_REDIRECTS: usize = 3;
const ACCEPT_ACTIVITY: &str =
    "application/activity+json, application/ld+json; profile=\"https://www.w3.org/ns/activitystreams\"";

/// Fetches actor documents by URI.
#[async_trait]
pub trait ActorFetcher: Send + Sync {
    /// Fetch the raw document at `actor_id`.
    ///
    /// # Errors
    /// `ActorUnreachable` for transient failures, `ActorInvalid` when the
    /// peer answered but the document cannot be used.
    async fn fetch_actor(&self, actor_id: &str) -> Result<serde_json::Value>;
}

fn is_disallowed_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_multicast()
                || v4.is_unspecified()
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unique_local()
                || v6.is_unicast_link_local()
                || v6.is_multicast()
                || v6.is_unspecified()
        }
    }
}

fn is_disallowed_host(host: &str) -> bool {
    let normalized = host
        .trim_start_matches('[')
        .trim_end_matches(']')
        .trim_end_matches('.')
        .to_ascii_lowercase();
    if normalized == "localhost" || normalized.ends_with(".localhost") {
        return true;
    }

    normalized
        .parse::<IpAddr>()
        .map(is_disallowed_ip)
        .unwrap_or(false)
}

async fn validate_resolved_host_ips(host: &str, port: u16) -> Result<()> {
    let normalized = host.trim_end_matches('.').to_ascii_lowercase();

    let mut resolved_any = false;
    let lookup = tokio::net::lookup_host((normalized.as_str(), port))
        .await
        .map_err(|e| AppError::Transport {
            status: None,
            message: format!("failed to resolve {}: {}", host, e),
        })?;

    for addr in lookup {
        resolved_any = true;
        if is_disallowed_ip(addr.ip()) {
            return Err(AppError::Forbidden(format!(
                "{} resolves to a private address",
                host
            )));
        }
    }

    if !resolved_any {
        return Err(AppError::Transport {
            status: None,
            message: format!("no DNS records for {}", host),
        });
    }

    Ok(())
}

/// Extract and validate the host of a remote URI.
///
/// This rejects non-HTTP(S) URLs and obvious local/private hosts.
pub fn extract_remote_host(uri: &str) -> Result<String> {
    let without_fragment = uri.split('#').next().unwrap_or(uri);
    let parsed = url::Url::parse(without_fragment)
        .map_err(|e| AppError::Validation(format!("Invalid URL: {}", e)))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(AppError::Validation(format!(
                "Unsupported URL scheme: {}",
                scheme
            )));
        }
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| AppError::Validation("Missing host in URL".to_string()))?
        .to_ascii_lowercase();

    if is_disallowed_host(&host) {
        return Err(AppError::Forbidden(format!("{} is a local address", host)));
    }

    Ok(host)
}

/// Refuse requests to local or private destinations, including hosts
/// that look public but resolve internally.
pub async fn check_destination(uri: &str, allow_private_hosts: bool) -> Result<()> {
    if allow_private_hosts {
        let parsed =
            url::Url::parse(uri).map_err(|e| AppError::Validation(format!("Invalid URL: {}", e)))?;
        return match parsed.scheme() {
            "http" | "https" => Ok(()),
            scheme => Err(AppError::Validation(format!(
                "Unsupported URL scheme: {}",
                scheme
            ))),
        };
    }

    let host = extract_remote_host(uri)?;
    let port = url::Url::parse(uri)
        .ok()
        .and_then(|u| u.port_or_known_default())
        .ok_or_else(|| AppError::Validation("Missing port in URL".to_string()))?;
    validate_resolved_host_ips(&host, port).await
}

/// Build the outbound HTTP client shared by fetcher and transport.
///
/// The client never follows redirects itself; `get_checked` does, and
/// deliveries treat a redirect as a failed attempt.
pub fn build_http_client(config: &FederationConfig, timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(config.user_agent.clone())
        .timeout(timeout)
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .map_err(AppError::HttpClient)
}

/// Target of a redirect from `current`, checked like the first request.
pub async fn redirect_target(
    current: &url::Url,
    location: &str,
    allow_private_hosts: bool,
) -> Result<url::Url> {
    let next = current
        .join(location)
        .map_err(|e| AppError::Validation(format!("Invalid redirect from {}: {}", current, e)))?;
    check_destination(next.as_str(), allow_private_hosts).await?;
    Ok(next)
}

/// GET `uri`, following up to `MAX_REDIRECTS` redirects by hand.
///
/// Returns the final URL and response; the status is not checked.
///
/// # Errors
/// - `Forbidden` / `Validation` if any hop fails `check_destination`
/// - `Transport` if a request gets no answer
/// - `Validation` for a bad `Location` or too many redirects
pub async fn get_checked(
    client: &reqwest::Client,
    uri: &str,
    accept: &str,
    allow_private_hosts: bool,
) -> Result<(url::Url, reqwest::Response)> {
    check_destination(uri, allow_private_hosts).await?;
    let mut current =
        url::Url::parse(uri).map_err(|e| AppError::Validation(format!("Invalid URL: {}", e)))?;

    for _ in 0..=MAX_REDIRECTS {
        let response = client
            .get(current.clone())
            .header(reqwest::header::ACCEPT, accept)
            .send()
            .await
            .map_err(|e| AppError::Transport {
                status: None,
                message: format!("{}: {}", current, e),
            })?;

        if !response.status().is_redirection() {
            return Ok((current, response));
        }

        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| {
                AppError::Validation(format!("{}: redirect without Location", current))
            })?
            .to_string();
        let next = redirect_target(&current, &location, allow_private_hosts).await?;
        tracing::debug!(from = %current, to = %next, "Following redirect");
        current = next;
    }

    Err(AppError::Validation(format!(
        "{}: more than {} redirects",
        uri, MAX_REDIRECTS
    )))
}

/// Read a JSON body of at most `max_bytes`.
///
/// # Errors
/// `Validation` if the body is larger than the limit or is not JSON,
/// `Transport` if the connection fails mid-body.
pub async fn read_json_limited(
    mut response: reqwest::Response,
    max_bytes: usize,
) -> Result<serde_json::Value> {
    let too_large = || AppError::Validation(format!("document exceeds {} bytes", max_bytes));

    if response
        .content_length()
        .is_some_and(|length| length > max_bytes as u64)
    {
        return Err(too_large());
    }

    let mut bytes = Vec::new();
    while let Some(chunk) = response.chunk().await.map_err(|e| AppError::Transport {
        status: None,
        message: format!("failed to read body: {}", e),
    })? {
        if bytes.len() + chunk.len() > max_bytes {
            return Err(too_large());
        }
        bytes.extend_from_slice(&chunk);
    }

    serde_json::from_slice(&bytes)
        .map_err(|e| AppError::Validation(format!("invalid JSON: {}", e)))
}

fn unreachable_or_invalid(actor_id: &str, error: AppError) -> AppError {
    match error {
        AppError::Transport { message, .. } => AppError::ActorUnreachable(message),
        other => AppError::ActorInvalid(format!("{}: {}", actor_id, other)),
    }
}

/// `ActorFetcher` over HTTP
#[derive(Clone)]
pub struct HttpActorFetcher {
    client: reqwest::Client,
    allow_private_hosts: bool,
    max_document_bytes: usize,
}

impl HttpActorFetcher {
    pub fn new(config: &FederationConfig) -> Result<Self> {
        let client = build_http_client(config, Duration::from_secs(config.fetch_timeout_secs))?;
        Ok(Self::with_client(client, config.allow_private_hosts)
            .with_max_document_bytes(config.max_document_bytes))
    }

    /// `client` should come from `build_http_client`; a client that
    /// follows redirects itself bypasses the per-hop checks.
    pub fn with_client(client: reqwest::Client, allow_private_hosts: bool) -> Self {
        Self {
            client,
            allow_private_hosts,
            max_document_bytes: DEFAULT_MAX_DOCUMENT_BYTES,
        }
    }

    pub fn with_max_document_bytes(mut self, max_document_bytes: usize) -> Self {
        self.max_document_bytes = max_document_bytes;
        self
    }
}

#[async_trait]
impl ActorFetcher for HttpActorFetcher {
    async fn fetch_actor(&self, actor_id: &str) -> Result<serde_json::Value> {
        let timer = FEDERATION_REQUEST_DURATION_SECONDS
            .with_label_values(&["fetch"])
            .start_timer();
        let (_, response) = get_checked(
            &self.client,
            actor_id,
            ACCEPT_ACTIVITY,
            self.allow_private_hosts,
        )
        .await
        .map_err(|e| unreachable_or_invalid(actor_id, e))?;
        timer.observe_duration();

        let status = response.status();
        if !status.is_success() {
            let message = format!("{}: HTTP {}", actor_id, status);
            return Err(if crate::error::is_retryable_status(status.as_u16()) {
                AppError::ActorUnreachable(message)
            } else {
                AppError::ActorInvalid(message)
            });
        }

        read_json_limited(response, self.max_document_bytes)
            .await
            .map_err(|e| unreachable_or_invalid(actor_id, e))
    }
}

//! WebFinger protocol implementation
//!
//! Used to discover ActivityPub actor URIs from `user@domain` addresses,
//! and to answer the same query for local actors.

use serde::{Deserialize, Serialize};

use super::fetch::{ACTIVITY_JSON, get_checked, read_json_limited};
use crate::config::DEFAULT_MAX_DOCUMENT_BYTES;
use crate::error::{AppError, Result};

pub const JRD_JSON: &str = "application/jrd+json";
const PROFILE_PAGE_REL: &str = "http://webfinger.net/rel/profile-page";

/// WebFinger result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebFingerResult {
    /// Subject (acct:user@domain)
    pub subject: String,
    /// ActivityPub actor URI
    pub actor_uri: String,
    /// Profile page URL (optional)
    pub profile_url: Option<String>,
}

/// WebFinger JRD response
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebFingerResponse {
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aliases: Option<Vec<String>>,
    #[serde(default)]
    pub links: Vec<WebFingerLink>,
}

/// WebFinger link
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebFingerLink {
    pub rel: String,
    #[serde(rename = "type")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
}

/// Split `user@domain` (optionally prefixed with `@` or `acct:`).
pub fn parse_address(address: &str) -> Result<(&str, &str)> {
    let acct = address
        .strip_prefix("acct:")
        .unwrap_or(address)
        .trim_start_matches('@');

    match acct.split_once('@') {
        Some((user, domain))
            if !user.is_empty() && !domain.is_empty() && !domain.contains('@') =>
        {
            Ok((user, domain))
        }
        _ => Err(AppError::Validation(format!(
            "Invalid account address: {}",
            address
        ))),
    }
}

/// WebFinger query URL for an address, on the given origin.
///
/// `origin` is normally `https://{domain}`.
pub fn webfinger_url(origin: &str, address: &str) -> Result<String> {
    let (user, domain) = parse_address(address)?;
    let mut url = url::Url::parse(origin)
        .and_then(|u| u.join("/.well-known/webfinger"))
        .map_err(|e| AppError::Validation(format!("Invalid URL: {}", e)))?;
    url.query_pairs_mut()
        .append_pair("resource", &format!("acct:{}@{}", user, domain));
    Ok(url.into())
}

/// Pick the ActivityPub actor link out of a JRD document.
pub fn actor_uri_from_jrd(jrd: &WebFingerResponse) -> Option<&str> {
    jrd.links
        .iter()
        .find(|link| {
            link.rel == "self"
                && link
                    .link_type
                    .as_deref()
                    .is_some_and(|t| t == ACTIVITY_JSON || t.starts_with("application/ld+json"))
        })
        .and_then(|link| link.href.as_deref())
}

/// Resolve an address to ActivityPub actor
///
/// # Example
/// ```ignore
/// let result = resolve_webfinger("user@mastodon.social", &client).await?;
/// println!("Actor: {}", result.actor_uri);
/// ```
pub async fn resolve_webfinger(
    address: &str,
    http_client: &reqwest::Client,
) -> Result<WebFingerResult> {
    let (_, domain) = parse_address(address)?;
    let url = webfinger_url(&format!("https://{}", domain), address)?;
    lookup(&url, http_client, false).await
}

/// Perform a WebFinger query against an explicit URL.
///
/// Redirects are followed with the same destination checks as the first
/// request, provided `http_client` does not follow them itself.
pub async fn lookup(
    url: &str,
    http_client: &reqwest::Client,
    allow_private_hosts: bool,
) -> Result<WebFingerResult> {
    let (_, response) = get_checked(http_client, url, JRD_JSON, allow_private_hosts)
        .await
        .map_err(|e| match e {
            AppError::Transport { message, .. } => AppError::ActorUnreachable(message),
            other => other,
        })?;

    let status = response.status();
    if !status.is_success() {
        let message = format!("{}: HTTP {}", url, status);
        return Err(if crate::error::is_retryable_status(status.as_u16()) {
            AppError::ActorUnreachable(message)
        } else {
            AppError::ActorInvalid(message)
        });
    }

    let document = read_json_limited(response, DEFAULT_MAX_DOCUMENT_BYTES)
        .await
        .map_err(|e| AppError::ActorInvalid(format!("{}: {}", url, e)))?;
    let jrd: WebFingerResponse = serde_json::from_value(document)
        .map_err(|e| AppError::ActorInvalid(format!("{}: invalid JRD: {}", url, e)))?;

    let actor_uri = actor_uri_from_jrd(&jrd)
        .ok_or_else(|| AppError::ActorInvalid(format!("{}: no ActivityPub self link", url)))?
        .to_string();
    let profile_url = jrd
        .links
        .iter()
        .find(|link| link.rel == PROFILE_PAGE_REL)
        .and_then(|link| link.href.clone());

    tracing::debug!(subject = %jrd.subject, actor = %actor_uri, "Resolved WebFinger address");

    Ok(WebFingerResult {
        subject: jrd.subject,
        actor_uri,
        profile_url,
    })
}

/// Generate WebFinger response for a local account.
pub fn generate_webfinger_response(username: &str, domain: &str, base_url: &str) -> WebFingerResponse {
    let subject = format!("acct:{}@{}", username, domain);
    let actor_url = format!("{}/users/{}", base_url.trim_end_matches('/'), username);

    WebFingerResponse {
        subject,
        aliases: Some(vec![actor_url.clone()]),
        links: vec![
            WebFingerLink {
                rel: "self".to_string(),
                link_type: Some(ACTIVITY_JSON.to_string()),
                href: Some(actor_url.clone()),
                template: None,
            },
            WebFingerLink {
                rel: PROFILE_PAGE_REL.to_string(),
                link_type: Some("text/html".to_string()),
                href: Some(actor_url),
                template: None,
            },
        ],
    }
}

//! Well-known endpoints
//!
//! - /.well-known/webfinger
//! - /.well-known/host-meta

use axum::{
    Router,
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;

use crate::AppState;
use crate::error::AppError;
use crate::federation::{JRD_JSON, generate_webfinger_response, parse_address};

/// Create well-known router
///
/// Routes:
/// - GET /.well-known/webfinger
/// - GET /.well-known/host-meta
pub fn wellknown_router() -> Router<AppState> {
    Router::new()
        .route("/.well-known/webfinger", get(webfinger))
        .route("/.well-known/host-meta", get(host_meta))
}

/// WebFinger query parameters
#[derive(Debug, Deserialize)]
struct WebFingerQuery {
    resource: String,
}

/// Local handle named by a WebFinger resource.
///
/// Accepts `acct:handle@domain` and the actor URI itself.
fn local_handle<'a>(resource: &'a str, domain: &str, base_url: &str) -> Result<&'a str, AppError> {
    if resource.starts_with("acct:") {
        let (handle, resource_domain) = parse_address(resource)?;
        // Domain verification
        if !resource_domain.eq_ignore_ascii_case(domain) {
            return Err(AppError::NotFound);
        }
        return Ok(handle);
    }

    let prefix = format!("{}/users/", base_url.trim_end_matches('/'));
    match resource.strip_prefix(&prefix) {
        Some(handle) if !handle.is_empty() && !handle.contains('/') => Ok(handle),
        Some(_) => Err(AppError::NotFound),
        None if resource.starts_with("http://") || resource.starts_with("https://") => {
            Err(AppError::NotFound)
        }
        None => Err(AppError::Validation(
            "Resource must be an acct: address or actor URI".to_string(),
        )),
    }
}

/// GET /.well-known/webfinger
///
/// Responds to WebFinger queries for local actors.
///
/// Query: ?resource=acct:handle@domain
async fn webfinger(
    State(state): State<AppState>,
    Query(query): Query<WebFingerQuery>,
) -> Result<Response, AppError> {
    let server = &state.config().server;
    let base_url = server.base_url();
    let handle = local_handle(&query.resource, &server.domain, &base_url)?;

    if state.dispatcher.dispatch_actor(handle).await?.is_none() {
        return Err(AppError::NotFound);
    }

    let jrd = generate_webfinger_response(handle, &server.domain, &base_url);
    let body = serde_json::to_vec(&jrd).map_err(|e| AppError::Internal(e.into()))?;

    Ok(([(header::CONTENT_TYPE, JRD_JSON)], body).into_response())
}

/// GET /.well-known/host-meta
///
/// Returns host-meta XML for WebFinger discovery.
async fn host_meta(State(state): State<AppState>) -> impl IntoResponse {
    let base_url = state.config().server.base_url();
    let xml = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<XRD xmlns="http://docs.oasis-open.org/ns/xri/xrd-1.0">
  <Link rel="lrdd" template="{}/.well-known/webfinger?resource={{uri}}"/>
</XRD>"#,
        base_url
    );

    ([(header::CONTENT_TYPE, "application/xrd+xml")], xml)
}

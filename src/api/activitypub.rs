//! ActivityPub endpoints
//!
//! - Actor document
//! - Inbox (activity receiving), personal and shared
//! - Outbox collection and pages

use axum::body::Bytes;
use axum::{
    Router,
    extract::{OriginalUri, Path, Query, State},
    http::{HeaderMap, Method, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;

use crate::AppState;
use crate::error::AppError;
use crate::federation::{ACTIVITY_JSON, InboundRequest, InboxOutcome, outbox_document};
use crate::metrics::{FEDERATION_REQUEST_DURATION_SECONDS, HTTP_REQUESTS_TOTAL};
use crate::vocab::VocabularyObject;

/// Create ActivityPub router
///
/// Routes:
/// - GET /users/:handle - Actor document
/// - POST /users/:handle/inbox - Personal inbox
/// - POST /inbox - Shared inbox
/// - GET /users/:handle/outbox - Outbox
pub fn activitypub_router() -> Router<AppState> {
    Router::new()
        .route("/users/:handle", get(actor))
        .route("/users/:handle/inbox", post(inbox))
        .route("/inbox", post(shared_inbox))
        .route("/users/:handle/outbox", get(outbox))
}

/// Activity Streams document served as `application/activity+json`.
struct ActivityJson(VocabularyObject);

impl IntoResponse for ActivityJson {
    fn into_response(self) -> Response {
        match serde_json::to_vec(&self.0.to_json()) {
            Ok(body) => ([(header::CONTENT_TYPE, ACTIVITY_JSON)], body).into_response(),
            Err(e) => AppError::Internal(e.into()).into_response(),
        }
    }
}

/// Whether the client accepts an Activity Streams representation.
///
/// A missing Accept header counts as acceptance.
fn accepts_activity_json(headers: &HeaderMap) -> bool {
    let Some(accept) = headers.get(header::ACCEPT).and_then(|v| v.to_str().ok()) else {
        return true;
    };

    accept.split(',').any(|range| {
        let media_type = range
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        matches!(
            media_type.as_str(),
            "application/activity+json" | "application/ld+json" | "application/json" | "*/*"
        )
    })
}

fn require_activity_json(headers: &HeaderMap) -> Result<(), AppError> {
    if accepts_activity_json(headers) {
        Ok(())
    } else {
        Err(AppError::NotAcceptable)
    }
}

/// GET /users/:handle
///
/// Returns ActivityPub Actor document.
///
/// Content-Type: application/activity+json
async fn actor(
    State(state): State<AppState>,
    Path(handle): Path<String>,
    headers: HeaderMap,
) -> Result<ActivityJson, AppError> {
    require_activity_json(&headers)?;

    let document = state
        .dispatcher
        .dispatch_actor(&handle)
        .await?
        .ok_or(AppError::NotFound)?;

    HTTP_REQUESTS_TOTAL
        .with_label_values(&["GET", "/users/:handle", "200"])
        .inc();

    Ok(ActivityJson(document))
}

#[derive(Debug, Deserialize)]
struct OutboxQuery {
    cursor: Option<String>,
}

/// GET /users/:handle/outbox
///
/// Without `cursor`, returns the OrderedCollection; with it, the page.
async fn outbox(
    State(state): State<AppState>,
    Path(handle): Path<String>,
    Query(query): Query<OutboxQuery>,
    headers: HeaderMap,
) -> Result<ActivityJson, AppError> {
    require_activity_json(&headers)?;

    let outbox_uri = format!("{}/users/{}/outbox", state.config().server.base_url(), handle);
    let document = outbox_document(
        state.dispatcher.as_ref(),
        &handle,
        &outbox_uri,
        query.cursor.as_deref(),
    )
    .await?;

    HTTP_REQUESTS_TOTAL
        .with_label_values(&["GET", "/users/:handle/outbox", "200"])
        .inc();

    Ok(ActivityJson(document))
}

/// POST /users/:handle/inbox
///
/// Receives incoming ActivityPub activities.
///
/// # Steps
/// 1. Check the handle is a local actor
/// 2. Verify, dedupe and dispatch through the inbox processor
async fn inbox(
    State(state): State<AppState>,
    Path(handle): Path<String>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    if state.dispatcher.dispatch_actor(&handle).await?.is_none() {
        return Err(AppError::NotFound);
    }

    receive(&state, "/users/:handle/inbox", method, uri, headers, body).await
}

/// POST /inbox
///
/// Shared inbox for all actors on this instance.
async fn shared_inbox(
    State(state): State<AppState>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    receive(&state, "/inbox", method, uri, headers, body).await
}

/// 202 for a newly accepted activity, 200 for a duplicate.
async fn receive(
    state: &AppState,
    endpoint: &str,
    method: Method,
    uri: axum::http::Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    let _timer = FEDERATION_REQUEST_DURATION_SECONDS
        .with_label_values(&["inbound"])
        .start_timer();

    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| uri.path().to_string());

    let request = InboundRequest {
        method: method.as_str().to_string(),
        path_and_query,
        headers,
        body,
    };

    let status = match state.inbox.receive(request).await {
        Ok(InboxOutcome::Accepted) => StatusCode::ACCEPTED,
        Ok(InboxOutcome::Duplicate) => StatusCode::OK,
        Err(e) => {
            if matches!(
                e,
                AppError::SignatureMissing
                    | AppError::SignatureMalformed(_)
                    | AppError::SignatureInvalid(_)
                    | AppError::SignatureExpired { .. }
                    | AppError::DigestMismatch
            ) {
                tracing::warn!(endpoint, reason = e.kind(), error = %e, "Rejected inbound signature");
            }
            return Err(e);
        }
    };

    HTTP_REQUESTS_TOTAL
        .with_label_values(&["POST", endpoint, status.as_str()])
        .inc();

    Ok(status)
}

//! Delivery jobs and their state machine
//!
//! ```text
//! Pending ──claim──▶ InFlight ──2xx──────────▶ Delivered
//!    ▲                  │ ──retryable────────▶ Retrying ──timer──▶ (claim)
//!    │                  │ ──permanent/limit──▶ Abandoned
//! ```
//!
//! `Delivered` and `Abandoned` are terminal.

use std::fmt;

use axum::body::Bytes;
use chrono::{DateTime, Utc};
use tokio::time::Instant;

use crate::canonical::canonicalize;
use crate::error::{AppError, Result};
use crate::vocab::Activity;

pub type JobId = ulid::Ulid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    Pending,
    InFlight,
    Delivered,
    Retrying,
    Abandoned,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Delivered | JobState::Abandoned)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::InFlight => "in_flight",
            JobState::Delivered => "delivered",
            JobState::Retrying => "retrying",
            JobState::Abandoned => "abandoned",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a job sends its activity
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Destination {
    /// A resolved inbox URI
    Inbox(String),
    /// An actor whose inbox is resolved at attempt time
    Actor(String),
}

impl Destination {
    pub fn as_str(&self) -> &str {
        match self {
            Destination::Inbox(uri) | Destination::Actor(uri) => uri,
        }
    }
}

/// Activity serialized once for every delivery attempt.
#[derive(Debug, Clone)]
pub struct PreparedActivity {
    pub activity_id: String,
    pub actor_id: String,
    /// Canonical bytes sent as the request body
    pub body: Bytes,
    /// `SHA-256=<base64>` of `body`
    pub digest_header: String,
    pub digest_hex: String,
}

impl PreparedActivity {
    /// Canonicalize the wire form of an activity. Blind recipients never
    /// leave the process.
    pub fn prepare(activity: &Activity) -> Result<Self> {
        let activity_id = activity
            .id()
            .ok_or_else(|| AppError::MalformedVocabulary("activity has no `id`".to_string()))?
            .to_string();
        let actor_id = activity
            .actor_id()
            .ok_or_else(|| AppError::MalformedVocabulary("activity has no `actor`".to_string()))?
            .to_string();

        let canonical = canonicalize(&activity.without_blind_recipients())?;
        let digest_header = canonical.digest_header();
        let digest_hex = canonical.digest_hex();

        Ok(Self {
            activity_id,
            actor_id,
            body: Bytes::from(canonical.bytes),
            digest_header,
            digest_hex,
        })
    }
}

/// One activity addressed to one destination
#[derive(Debug, Clone)]
pub struct DeliveryJob {
    pub id: JobId,
    pub activity: std::sync::Arc<PreparedActivity>,
    pub destination: Destination,
    pub state: JobState,
    /// Number of send attempts started
    pub attempts: u32,
    /// Earliest time the next attempt may start
    pub next_attempt_at: Option<Instant>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DeliveryJob {
    pub fn new(activity: std::sync::Arc<PreparedActivity>, destination: Destination) -> Self {
        let now = Utc::now();
        Self {
            id: ulid::Ulid::new(),
            activity,
            destination,
            state: JobState::Pending,
            attempts: 0,
            next_attempt_at: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `InFlight` and count the attempt.
    ///
    /// Returns `false` (leaving the job untouched) unless the job is
    /// `Pending` or `Retrying`, so only one caller can own an attempt.
    pub fn claim(&mut self) -> bool {
        if !matches!(self.state, JobState::Pending | JobState::Retrying) {
            return false;
        }
        self.state = JobState::InFlight;
        self.attempts += 1;
        self.next_attempt_at = None;
        self.touch();
        true
    }

    pub fn mark_delivered(&mut self) {
        self.state = JobState::Delivered;
        self.last_error = None;
        self.touch();
    }

    pub fn mark_retrying(&mut self, error: String, next_attempt_at: Instant) {
        self.state = JobState::Retrying;
        self.last_error = Some(error);
        self.next_attempt_at = Some(next_attempt_at);
        self.touch();
    }

    /// Terminal failure. No-op on a job that already reached a terminal state.
    pub fn abandon(&mut self, error: String) {
        if self.state.is_terminal() {
            return;
        }
        self.state = JobState::Abandoned;
        self.last_error = Some(error);
        self.next_attempt_at = None;
        self.touch();
    }

    /// Retarget an actor-addressed job once its inbox is known.
    pub fn resolve_destination(&mut self, inbox: String) {
        self.destination = Destination::Inbox(inbox);
        self.touch();
    }

    /// Host (with non-default port) the job is addressed to
    pub fn host(&self) -> String {
        super::rate_limit::extract_domain(self.destination.as_str())
    }

    /// Terminal error value reported to observers
    pub fn abandoned_error(&self) -> AppError {
        AppError::DeliveryAbandoned {
            inbox: self.destination.as_str().to_string(),
            attempts: self.attempts,
            last_error: self
                .last_error
                .clone()
                .unwrap_or_else(|| "unknown error".to_string()),
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

//! Outbound inbox POSTs

use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;

use super::fetch::{ACTIVITY_JSON, build_http_client, check_destination};
use super::signature::SignatureHeaders;
use crate::config::AppConfig;
use crate::error::{AppError, Result};
use crate::metrics::FEDERATION_REQUEST_DURATION_SECONDS;

/// Sends a signed activity body to an inbox.
#[async_trait]
pub trait DeliveryTransport: Send + Sync {
    /// POST `body` to `inbox` with the given signature headers.
    ///
    /// # Errors
    /// `Transport { status: Some(code) }` for a non-2xx answer,
    /// `Transport { status: None }` when no answer was received.
    async fn post(&self, inbox: &str, body: Bytes, headers: &SignatureHeaders) -> Result<()>;
}

/// `DeliveryTransport` over HTTP
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    allow_private_hosts: bool,
}

impl HttpTransport {
    pub fn new(config: &AppConfig) -> Result<Self> {
        let client = build_http_client(
            &config.federation,
            Duration::from_secs(config.delivery.request_timeout_secs),
        )?;
        Ok(Self::with_client(client, config.federation.allow_private_hosts))
    }

    pub fn with_client(client: reqwest::Client, allow_private_hosts: bool) -> Self {
        Self {
            client,
            allow_private_hosts,
        }
    }
}

#[async_trait]
impl DeliveryTransport for HttpTransport {
    async fn post(&self, inbox: &str, body: Bytes, headers: &SignatureHeaders) -> Result<()> {
        check_destination(inbox, self.allow_private_hosts).await?;

        let mut request = self
            .client
            .post(inbox)
            .header(reqwest::header::CONTENT_TYPE, ACTIVITY_JSON)
            .header(reqwest::header::DATE, &headers.date)
            .header("Signature", &headers.signature);

        if let Some(digest) = &headers.digest {
            request = request.header("Digest", digest);
        }

        let timer = FEDERATION_REQUEST_DURATION_SECONDS
            .with_label_values(&["deliver"])
            .start_timer();
        let response = request.body(body).send().await.map_err(|e| AppError::Transport {
            status: None,
            message: format!("{}: {}", inbox, e),
        })?;
        timer.observe_duration();

        // Redirects are not followed: the signature covers the original
        // request target.
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Transport {
                status: Some(status.as_u16()),
                message: format!("{} answered HTTP {}", inbox, status),
            });
        }

        Ok(())
    }
}

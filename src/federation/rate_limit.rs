//! Per-host concurrency limits for outbound delivery
//!
//! Each destination host gets its own semaphore so one slow or flooded
//! peer cannot take every worker.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{AppError, Result};

/// Bounds concurrent requests per destination host
pub struct HostLimiter {
    per_host: usize,
    hosts: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl HostLimiter {
    pub fn new(per_host: usize) -> Self {
        Self {
            per_host: per_host.max(1),
            hosts: Mutex::new(HashMap::new()),
        }
    }

    fn semaphore(&self, host: &str) -> Result<Arc<Semaphore>> {
        let mut hosts = self
            .hosts
            .lock()
            .map_err(|_| AppError::Internal(anyhow::anyhow!("host limiter lock poisoned")))?;
        Ok(hosts
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_host)))
            .clone())
    }

    /// Wait for a request slot for `host`. The slot is released when the
    /// permit is dropped.
    pub async fn acquire(&self, host: &str) -> Result<OwnedSemaphorePermit> {
        self.semaphore(host)?
            .acquire_owned()
            .await
            .map_err(|e| AppError::Internal(e.into()))
    }

    /// Slots currently free for `host`
    pub fn available(&self, host: &str) -> usize {
        self.hosts
            .lock()
            .ok()
            .and_then(|hosts| hosts.get(host).map(|s| s.available_permits()))
            .unwrap_or(self.per_host)
    }

    /// Forget hosts with no outstanding requests.
    ///
    /// Should be called periodically.
    pub fn prune_idle(&self) {
        let Ok(mut hosts) = self.hosts.lock() else {
            return;
        };
        let per_host = self.per_host;
        let before = hosts.len();
        // Only this map holds a reference when nobody is waiting or active.
        hosts.retain(|_, semaphore| {
            Arc::strong_count(semaphore) > 1 || semaphore.available_permits() < per_host
        });
        let removed = before - hosts.len();
        if removed > 0 {
            tracing::debug!("Pruned {} idle host limiters", removed);
        }
    }

    pub fn tracked_hosts(&self) -> usize {
        self.hosts.lock().map(|hosts| hosts.len()).unwrap_or(0)
    }
}

fn default_port_for_scheme(scheme: &str) -> Option<u16> {
    if scheme.eq_ignore_ascii_case("http") {
        Some(80)
    } else if scheme.eq_ignore_ascii_case("https") {
        Some(443)
    } else {
        None
    }
}

fn format_domain_key(host: &str, port: Option<u16>, scheme: &str) -> String {
    let normalized_host = host
        .trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .trim_end_matches('.')
        .to_ascii_lowercase();
    let normalized_port = port.filter(|p| Some(*p) != default_port_for_scheme(scheme));

    match normalized_port {
        Some(port) if normalized_host.contains(':') => format!("[{}]:{}", normalized_host, port),
        Some(port) => format!("{}:{}", normalized_host, port),
        None => normalized_host,
    }
}

/// Extract domain from actor URI or URL
pub fn extract_domain(uri: &str) -> String {
    let trimmed = uri.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    if let Ok(parsed) = url::Url::parse(trimmed) {
        if let Some(host) = parsed.host_str() {
            return format_domain_key(host, parsed.port(), parsed.scheme());
        }
    }

    let fallback = trimmed.split("://").nth(1).unwrap_or(trimmed);
    let authority = fallback
        .split('/')
        .next()
        .unwrap_or(fallback)
        .split('?')
        .next()
        .unwrap_or(fallback)
        .split('#')
        .next()
        .unwrap_or(fallback)
        .trim();
    if authority.is_empty() {
        return String::new();
    }

    if let Ok(parsed_authority) = url::Url::parse(&format!("https://{}", authority)) {
        if let Some(host) = parsed_authority.host_str() {
            return format_domain_key(host, parsed_authority.port(), "https");
        }
    }

    authority.trim_end_matches('.').to_ascii_lowercase()
}

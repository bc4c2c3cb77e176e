use std::time::Duration;

use rand::Rng;
use reqwest::StatusCode;
use reqwest::blocking::Client;
use thiserror::Error;

use crate::domain::events::{EmissionOutcome, PendingEvent};

const HTTP_TIMEOUT_SECONDS: u64 = 10;

/// Seam over the remote ledger. `emit` performs the full bounded-retry
/// protocol for one event and reports the final outcome; it never panics.
pub trait EventClient {
    fn emit(&self, event: &PendingEvent) -> EmissionOutcome;
}

#[derive(Debug, Error)]
pub enum LedgerClientError {
    #[error("failed to build http client: {0}")]
    Build(#[from] reqwest::Error),
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_jitter_max_ms: u64,
}

impl RetryPolicy {
    /// Delay after the failed attempt with the given zero-based index:
    /// `base * 2^attempt + random(0, jitter_max)`.
    fn delay_after(&self, attempt: u32) -> Duration {
        let base = self
            .backoff_base_ms
            .saturating_mul(1_u64 << attempt.min(16));
        let jitter = if self.backoff_jitter_max_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..self.backoff_jitter_max_ms)
        };
        Duration::from_millis(base.saturating_add(jitter))
    }
}

enum AttemptResult {
    Delivered,
    AuthRequired,
    Retryable(String),
    Fatal(String),
}

pub struct HttpEventClient {
    http: Client,
    base_url: String,
    auth_token: Option<String>,
    policy: RetryPolicy,
}

impl HttpEventClient {
    pub fn new(
        base_url: &str,
        auth_token: Option<String>,
        policy: RetryPolicy,
    ) -> Result<Self, LedgerClientError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECONDS))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token,
            policy,
        })
    }

    fn endpoint_for(&self, event: &PendingEvent) -> String {
        if event.requires_session_id {
            format!("{}/session-events", self.base_url)
        } else {
            format!("{}/pre-session-events", self.base_url)
        }
    }

    fn send_once(&self, url: &str, event: &PendingEvent) -> AttemptResult {
        let mut request = self
            .http
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(event.body().to_string());

        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = match request.send() {
            Ok(response) => response,
            Err(error) => return AttemptResult::Retryable(format!("network error: {error}")),
        };

        let status = response.status();

        if status.is_success() {
            // An already-deduplicated delivery is still a delivery.
            if let Ok(body) = response.json::<serde_json::Value>()
                && body["status"] == "already_processed"
            {
                tracing::debug!(event_id = %event.event_id, "ledger already processed event");
            }
            return AttemptResult::Delivered;
        }

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return AttemptResult::AuthRequired;
        }

        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return AttemptResult::Retryable(format!("status {status}"));
        }

        AttemptResult::Fatal(format!("status {status}"))
    }
}

impl EventClient for HttpEventClient {
    fn emit(&self, event: &PendingEvent) -> EmissionOutcome {
        let url = self.endpoint_for(event);
        let mut last_failure = String::new();

        for attempt in 0..self.policy.max_attempts {
            if attempt > 0 {
                std::thread::sleep(self.policy.delay_after(attempt - 1));
            }

            match self.send_once(&url, event) {
                AttemptResult::Delivered => {
                    tracing::info!(
                        event_id = %event.event_id,
                        event = %event.event_name,
                        attempt = attempt + 1,
                        "event delivered"
                    );
                    return EmissionOutcome::Delivered;
                }
                AttemptResult::AuthRequired => {
                    tracing::warn!(event_id = %event.event_id, "ledger rejected credentials");
                    return EmissionOutcome::AuthRequired;
                }
                AttemptResult::Fatal(detail) => {
                    tracing::warn!(event_id = %event.event_id, detail = %detail, "non-retryable emission failure");
                    return EmissionOutcome::Failed(detail);
                }
                AttemptResult::Retryable(detail) => {
                    tracing::warn!(
                        event_id = %event.event_id,
                        attempt = attempt + 1,
                        max_attempts = self.policy.max_attempts,
                        detail = %detail,
                        "emission attempt failed"
                    );
                    last_failure = detail;
                }
            }
        }

        EmissionOutcome::Failed(last_failure)
    }
}

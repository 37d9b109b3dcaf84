//! Readiness polling.
//!
//! Listener sockets are open before the server finishes warming up, so a
//! successful `start` says nothing about readiness. The poller probes the
//! health URL at a fixed interval until it answers 200, the wait budget is
//! spent, or shutdown is signaled.

use crate::errors::HarnessError;
use crate::settings::HarnessSettings;
use reqwest::StatusCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Terminal outcome of [`ReadinessPoller::wait_until_ready`].
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    TimedOut,
    Cancelled,
}

/// Bounded, interval-based readiness prober.
#[derive(Debug, Clone)]
pub struct ReadinessPoller {
    client: reqwest::Client,
    poll_interval: Duration,
    max_wait: Duration,
}

impl ReadinessPoller {
    /// Build a poller.
    ///
    /// `attempt_timeout` must be shorter than `poll_interval` and
    /// `max_wait` must be non-zero; the wait is always bounded.
    pub fn new(
        poll_interval: Duration,
        max_wait: Duration,
        attempt_timeout: Duration,
    ) -> Result<Self, HarnessError> {
        if attempt_timeout >= poll_interval {
            return Err(HarnessError::Configuration(format!(
                "Probe timeout {attempt_timeout:?} must be shorter than poll interval {poll_interval:?}"
            )));
        }
        if max_wait.is_zero() {
            return Err(HarnessError::Configuration(
                "Readiness wait budget must be greater than zero".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(attempt_timeout)
            .build()
            .map_err(|e| {
                HarnessError::Configuration(format!("Failed to create HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            poll_interval,
            max_wait,
        })
    }

    pub fn from_settings(settings: &HarnessSettings) -> Result<Self, HarnessError> {
        Self::new(
            settings.poll_interval,
            settings.max_wait,
            settings.attempt_timeout,
        )
    }

    #[must_use]
    pub fn max_wait(&self) -> Duration {
        self.max_wait
    }

    /// One probe. Only an explicit 200 counts; everything else is "not yet".
    pub async fn probe(&self, url: &str) -> bool {
        match self.client.get(url).send().await {
            Ok(response) => {
                let status = response.status();
                // Drain the body so the connection can be reused.
                if let Err(e) = response.bytes().await {
                    debug!(url = %url, error = %e, "Failed to drain readiness response");
                }
                if status != StatusCode::OK {
                    debug!(url = %url, status = %status, "Readiness probe: not ready");
                }
                status == StatusCode::OK
            }
            Err(e) => {
                debug!(url = %url, error = %e, "Readiness probe failed");
                false
            }
        }
    }

    /// Probe `url` every poll interval until it answers 200.
    ///
    /// The first probe happens one interval after the call.
    pub async fn wait_until_ready(&self, url: &str, cancel: &CancellationToken) -> Readiness {
        let polling = async {
            let mut attempts: u32 = 0;
            loop {
                tokio::time::sleep(self.poll_interval).await;
                attempts += 1;
                if self.probe(url).await {
                    return attempts;
                }
            }
        };

        tokio::select! {
            () = cancel.cancelled() => Readiness::Cancelled,
            result = tokio::time::timeout(self.max_wait, polling) => match result {
                Ok(attempts) => {
                    info!(url = %url, attempts, "Server ready");
                    Readiness::Ready
                }
                Err(_) => Readiness::TimedOut,
            },
        }
    }
}

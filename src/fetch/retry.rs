//! Retry of transient transport failures with exponential backoff

use std::time::Duration;

use tracing::{debug, warn};
use url::Url;

use super::client::{Page, PageClient, TransportError};

/// Gateway statuses that usually clear up on their own.
const TRANSIENT_STATUSES: [u16; 3] = [502, 503, 504];

/// Retry policy configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(15),
            backoff_multiplier: 2.5,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// A single attempt.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }
}

/// Decides whether to retry a page read and how long to wait
pub trait RetryPolicy: Send + Sync {
    fn should_retry(&self, attempt: u32, outcome: &Result<Page, TransportError>) -> bool;
    fn delay(&self, attempt: u32) -> Duration;
}

pub struct ExponentialBackoff {
    config: RetryConfig,
}

impl ExponentialBackoff {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn should_retry(&self, attempt: u32, outcome: &Result<Page, TransportError>) -> bool {
        if attempt >= self.config.max_attempts {
            return false;
        }
        match outcome {
            Ok(page) => TRANSIENT_STATUSES.contains(&page.status),
            Err(error) => error.is_transient(),
        }
    }

    fn delay(&self, attempt: u32) -> Duration {
        let base_delay = self.config.initial_delay.as_millis() as f64;
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let exponential_delay = base_delay * self.config.backoff_multiplier.powi(exponent);

        let mut delay = Duration::from_millis(exponential_delay as u64).min(self.config.max_delay);

        if self.config.jitter {
            // Up to 25% on top, so hosts are not hit in lockstep
            let jitter = (delay.as_millis() as f64 * 0.25 * rand::random::<f64>()) as u64;
            delay += Duration::from_millis(jitter);
        }

        delay
    }
}

/// Read `url`, retrying while the policy allows.
///
/// The last outcome is returned as is, so a final 503 is still a page.
pub async fn get_with_retry(
    client: &dyn PageClient,
    url: &Url,
    policy: &dyn RetryPolicy,
) -> Result<Page, TransportError> {
    let mut attempt = 0;

    loop {
        attempt += 1;
        let outcome = client.get(url).await;

        if !policy.should_retry(attempt, &outcome) {
            if attempt > 1 && outcome.as_ref().is_ok_and(Page::is_success) {
                debug!(url = %url, attempt, "page read after retry");
            }
            return outcome;
        }

        let delay = policy.delay(attempt);
        warn!(
            url = %url,
            attempt,
            delay_ms = delay.as_millis() as u64,
            status = outcome.as_ref().ok().map(|page| page.status),
            error = outcome.as_ref().err().map(tracing::field::display),
            "retrying page read after delay"
        );
        tokio::time::sleep(delay).await;
    }
}

//! Re-validation of stale registrations.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use crate::error::StoreError;
use crate::metrics::{CrawlPassTimer, METRICS};
use crate::pipeline::{Pipeline, UrlLocks};
use crate::registration::Registration;
use crate::store::RegistrationStore;

/// Counts for one crawler pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CrawlSummary {
    pub checked: usize,
    pub valid: usize,
    pub invalid: usize,
    /// Registrations whose pass hit a store or engine failure.
    pub failed: usize,
    /// Skipped because another pass refreshed them meanwhile.
    pub skipped: usize,
}

pub struct Crawler {
    registrations: Arc<dyn RegistrationStore>,
    pipeline: Arc<Pipeline>,
    locks: UrlLocks,
}

impl Crawler {
    pub fn new(registrations: Arc<dyn RegistrationStore>, pipeline: Arc<Pipeline>, locks: UrlLocks) -> Self {
        Self {
            registrations,
            pipeline,
            locks,
        }
    }

    /// Re-check every registration read before `stale_before`.
    pub async fn crawl(&self, stale_before: DateTime<Utc>) -> Result<CrawlSummary, StoreError> {
        self.crawl_until(stale_before, &CancellationToken::new()).await
    }

    /// Like [`Crawler::crawl`], stopping between registrations once `cancel`
    /// fires. Unvisited registrations stay stale for the next pass.
    #[instrument(skip_all, fields(stale_before = %stale_before))]
    pub async fn crawl_until(
        &self,
        stale_before: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<CrawlSummary, StoreError> {
        let _timer = CrawlPassTimer::start();
        let stale = self.registrations.find_read_before(stale_before).await?;
        info!(registrations = stale.len(), "crawl pass started");

        let mut summary = CrawlSummary::default();
        for registration in stale {
            if cancel.is_cancelled() {
                info!(checked = summary.checked, "crawl pass cancelled");
                break;
            }
            self.check(registration, stale_before, &mut summary).await;
        }

        info!(
            checked = summary.checked,
            valid = summary.valid,
            invalid = summary.invalid,
            failed = summary.failed,
            "crawl pass finished"
        );
        Ok(summary)
    }

    /// One registration. Failures are logged and counted, never returned.
    async fn check(&self, registration: Registration, stale_before: DateTime<Utc>, summary: &mut CrawlSummary) {
        let url = registration.url().clone();
        let _guard = self.locks.lock(&url).await;

        // An ingestion may have refreshed it while we waited.
        let registration = match self.registrations.find_by_url(&url).await {
            Ok(Some(current)) if current.date_read() >= stale_before => {
                summary.skipped += 1;
                return;
            }
            Ok(Some(current)) => current,
            Ok(None) => registration,
            Err(error) => {
                error!(url = %url, %error, "could not reload registration");
                summary.failed += 1;
                return;
            }
        };

        summary.checked += 1;
        let updated = match self.pipeline.run(&url, registration.records()).await {
            Ok(pass) => {
                if pass.valid {
                    summary.valid += 1;
                } else {
                    summary.invalid += 1;
                }
                METRICS.record_crawl(pass.status_code, pass.valid);
                registration.read(pass.records, pass.status_code, pass.valid, Utc::now())
            }
            Err(error) => {
                // Re-stamp so the registration does not come up again right away.
                summary.failed += 1;
                error!(url = %url, %error, "crawl of registration failed");
                registration.read(
                    registration.records().to_vec(),
                    registration.status_code(),
                    registration.valid_until().is_none(),
                    Utc::now(),
                )
            }
        };

        if let Err(error) = self.registrations.store(&updated).await {
            error!(url = %url, %error, "could not store registration");
        } else if updated.valid_until() != registration.valid_until() {
            info!(url = %url, status = %updated.status(), "registration status changed");
        }
    }
}

/// Runs a crawl pass every `interval` over registrations older than `ttl`.
pub struct Scheduler {
    crawler: Arc<Crawler>,
    interval: Duration,
    ttl: chrono::Duration,
}

impl Scheduler {
    pub fn new(crawler: Arc<Crawler>, interval: Duration, ttl: Duration) -> Self {
        Self {
            crawler,
            interval,
            ttl: chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX),
        }
    }

    /// Loop until `cancel` fires. A pass in progress finishes the registration
    /// at hand before returning.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(interval_secs = self.interval.as_secs(), "crawl scheduler started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let stale_before = Utc::now()
                        .checked_sub_signed(self.ttl)
                        .unwrap_or(DateTime::<Utc>::MIN_UTC);
                    if let Err(error) = self.crawler.crawl_until(stale_before, &cancel).await {
                        error!(%error, "crawl pass failed");
                    }
                }
            }
        }
        info!("crawl scheduler stopped");
    }
}

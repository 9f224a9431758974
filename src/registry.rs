//! Ingestion boundary.
//!
//! [`Registry::ingest`] creates or refreshes a registration synchronously.
//! [`Registry::validate_only`] validates a URL or an inline payload without
//! touching any store.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, instrument};
use url::Url;

use crate::allow_list::DomainAllowList;
use crate::error::{FetchError, IngestError};
use crate::fetch::{Page, parse_page};
use crate::metrics::METRICS;
use crate::pipeline::{Pipeline, UrlLocks};
use crate::registration::{Registration, RegistrationStatus};
use crate::store::RegistrationStore;
use crate::validate::{ValidationOutcome, ValidationReport};

/// Base for relative IRIs in inline payloads.
pub const INLINE_BASE: &str = "https://dataset-register.invalid/inline";

/// What an ingestion request produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReport {
    pub accepted: bool,
    pub records: Vec<String>,
    pub status: Option<RegistrationStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_errors: Option<ValidationReport>,
}

/// Payload for [`Registry::validate_only`].
#[derive(Debug, Clone)]
pub enum Source {
    Url(String),
    Inline { body: String, media_type: String },
}

pub struct Registry {
    allow_list: DomainAllowList,
    registrations: Arc<dyn RegistrationStore>,
    pipeline: Arc<Pipeline>,
    locks: UrlLocks,
}

pub(crate) fn parse_url(url: &str) -> Result<Url, IngestError> {
    let parsed = Url::parse(url.trim()).map_err(|e| IngestError::InvalidUrl {
        url: url.to_owned(),
        message: e.to_string(),
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(IngestError::InvalidUrl {
            url: url.to_owned(),
            message: format!("unsupported scheme {}", parsed.scheme()),
        });
    }
    Ok(parsed)
}

impl Registry {
    pub fn new(
        allow_list: DomainAllowList,
        registrations: Arc<dyn RegistrationStore>,
        pipeline: Arc<Pipeline>,
        locks: UrlLocks,
    ) -> Self {
        Self {
            allow_list,
            registrations,
            pipeline,
            locks,
        }
    }

    pub fn allow_list(&self) -> &DomainAllowList {
        &self.allow_list
    }

    /// Register `url`, or refresh its registration.
    ///
    /// A registration is only created when the URL validates. For a known URL
    /// every outcome is recorded, and fetch failures are returned after that.
    #[instrument(skip(self))]
    pub async fn ingest(&self, url: &str) -> Result<IngestReport, IngestError> {
        let url = parse_url(url)?;
        if !self.allow_list.is_allowed(&url).await? {
            METRICS.record_ingestion(false);
            return Err(IngestError::UrlNotAllowed {
                url: url.to_string(),
            });
        }

        let _guard = self.locks.lock(&url).await;
        let existing = self.registrations.find_by_url(&url).await?;
        let previous = existing.as_ref().map_or(&[][..], Registration::records);
        let pass = self.pipeline.run(&url, previous).await?;
        METRICS.record_ingestion(pass.valid);

        let now = Utc::now();
        let registration = match (&existing, pass.valid) {
            (Some(existing), _) => Some(existing.read(pass.records.clone(), pass.status_code, pass.valid, now)),
            (None, true) => Some(Registration::new(url.clone(), pass.records.clone(), pass.status_code, now)),
            (None, false) => None,
        };
        if let Some(registration) = &registration {
            self.registrations.store(registration).await?;
        }
        info!(
            accepted = pass.valid,
            records = pass.records.len(),
            registered = registration.is_some(),
            "ingestion finished"
        );

        if let Some(failure) = pass.failure {
            return Err(failure.into());
        }

        Ok(IngestReport {
            accepted: pass.valid,
            records: pass.records.iter().map(|id| id.as_str().to_owned()).collect(),
            status: registration.as_ref().map(Registration::status),
            validation_errors: pass
                .validation
                .as_ref()
                .filter(|outcome| !outcome.is_valid())
                .and_then(ValidationOutcome::errors)
                .cloned(),
        })
    }

    /// Validate without registering. Skips the allow-list.
    #[instrument(skip_all)]
    pub async fn validate_only(&self, source: Source) -> Result<ValidationOutcome, IngestError> {
        let graph = match source {
            Source::Url(url) => {
                let url = parse_url(&url)?;
                self.pipeline.fetcher().dereference(&url).await?
            }
            Source::Inline { body, media_type } => {
                let page = Page {
                    url: Url::parse(INLINE_BASE).map_err(|e| {
                        IngestError::Fetch(FetchError::no_record(INLINE_BASE, e.to_string()))
                    })?,
                    status: 200,
                    content_type: Some(media_type),
                    body: body.into_bytes(),
                    link_next: None,
                };
                parse_page(&page)?
            }
        };

        let (_, outcome) = self.pipeline.validate(graph).await?;
        Ok(outcome)
    }
}

//! One dereference, validate, extract, rate and store pass over a URL.
//!
//! Ingestion and the crawler both run [`Pipeline::run`] and turn the
//! resulting [`Pass`] into a registration.

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use indexmap::IndexSet;
use oxigraph::model::{Graph, NamedNode};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::error::{FetchError, IngestError};
use crate::extract::Record;
use crate::fetch::Fetcher;
use crate::rating::RatingEngine;
use crate::store::{RatingStore, RecordStore};
use crate::validate::{ValidationOutcome, Validator};

/// What one pass over a URL found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pass {
    pub status_code: u16,
    pub valid: bool,
    /// Record ids the registration should vouch for.
    pub records: Vec<NamedNode>,
    /// Top-level validation, when the URL could be read.
    pub validation: Option<ValidationOutcome>,
    pub failure: Option<FetchError>,
}

impl Pass {
    fn failed(error: FetchError, previous: &[NamedNode]) -> Self {
        Self {
            status_code: error.status_code(),
            valid: false,
            records: previous.to_vec(),
            validation: None,
            failure: Some(error),
        }
    }
}

pub struct Pipeline {
    fetcher: Arc<dyn Fetcher>,
    validator: Arc<dyn Validator>,
    rating: RatingEngine,
    records: Arc<dyn RecordStore>,
    ratings: Arc<dyn RatingStore>,
}

impl Pipeline {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        validator: Arc<dyn Validator>,
        rating: RatingEngine,
        records: Arc<dyn RecordStore>,
        ratings: Arc<dyn RatingStore>,
    ) -> Self {
        Self {
            fetcher,
            validator,
            rating,
            records,
            ratings,
        }
    }

    pub fn fetcher(&self) -> &Arc<dyn Fetcher> {
        &self.fetcher
    }

    /// Run one pass. `previous` are the ids currently vouched for; they are
    /// kept whenever the pass cannot establish a new list.
    ///
    /// Fetch failures end up in the returned [`Pass`]; only store and
    /// validation engine failures are errors.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn run(&self, url: &Url, previous: &[NamedNode]) -> Result<Pass, IngestError> {
        let graph = match self.fetcher.dereference(url).await {
            Ok(graph) => graph,
            Err(error) => {
                info!(status_code = error.status_code(), kind = error.kind(), %error, "dereference failed");
                return Ok(Pass::failed(error, previous));
            }
        };

        let (_, outcome) = self.validate(graph).await?;
        if !outcome.is_valid() {
            info!(outcome = outcome.label(), "URL does not hold a valid description");
            return Ok(Pass {
                status_code: 200,
                valid: false,
                records: previous.to_vec(),
                validation: Some(outcome),
                failure: None,
            });
        }

        let mut found: IndexSet<NamedNode> = IndexSet::new();
        let mut stream = self.fetcher.crawl(url);
        while let Some(item) = stream.next().await {
            match item {
                Ok(record) => {
                    if let Some(id) = self.store_record(record).await? {
                        found.insert(id);
                    }
                }
                Err(error) => {
                    warn!(records = found.len(), %error, "crawl failed after some records");
                    let mut records: IndexSet<NamedNode> = previous.iter().cloned().collect();
                    records.extend(found);
                    return Ok(Pass {
                        status_code: error.status_code(),
                        valid: false,
                        records: records.into_iter().collect(),
                        validation: Some(outcome),
                        failure: Some(error),
                    });
                }
            }
        }

        info!(records = found.len(), "pass complete");
        Ok(Pass {
            status_code: 200,
            valid: true,
            records: found.into_iter().collect(),
            validation: Some(outcome),
            failure: None,
        })
    }

    /// Run the shape engine on the blocking pool; the graph is handed back.
    pub async fn validate(&self, graph: Graph) -> Result<(Graph, ValidationOutcome), IngestError> {
        let validator = Arc::clone(&self.validator);
        tokio::task::spawn_blocking(move || -> anyhow::Result<(Graph, ValidationOutcome)> {
            let outcome = validator.validate(&graph)?;
            Ok((graph, outcome))
        })
        .await
        .map_err(|e| IngestError::Validation(e.into()))?
        .map_err(IngestError::Validation)
    }

    /// Validate one record and store it with its rating when valid.
    async fn store_record(&self, record: Record) -> Result<Option<NamedNode>, IngestError> {
        let (id, graph) = record.into_parts();
        let (graph, outcome) = self.validate(graph).await?;
        let record = Record::new(id, graph);
        let ValidationOutcome::Valid { errors } = &outcome else {
            debug!(record = %record.id(), outcome = outcome.label(), "skipping record");
            return Ok(None);
        };

        let rating = self.rating.rate(errors);
        self.records.store(&record).await?;
        self.ratings.store(record.id(), &rating).await?;
        debug!(record = %record.id(), score = rating.score, "record stored");
        Ok(Some(record.id().clone()))
    }
}

/// Serializes passes over the same URL.
#[derive(Clone, Default)]
pub struct UrlLocks {
    locks: Arc<parking_lot::Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl UrlLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive use of `url`.
    pub async fn lock(&self, url: &Url) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock();
            // Drop entries nobody holds or waits for.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks
                .entry(url.as_str().to_owned())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_url_is_serialized() -> anyhow::Result<()> {
        let locks = UrlLocks::new();
        let url = Url::parse("https://example.org/catalog")?;

        let guard = locks.lock(&url).await;
        let waiting = {
            let locks = locks.clone();
            let url = url.clone();
            tokio::spawn(async move {
                let _guard = locks.lock(&url).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiting.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiting).await??;
        Ok(())
    }

    #[tokio::test]
    async fn test_other_urls_do_not_wait() -> anyhow::Result<()> {
        let locks = UrlLocks::new();
        let _a = locks.lock(&Url::parse("https://a.example.org/")?).await;
        tokio::time::timeout(
            Duration::from_secs(1),
            locks.lock(&Url::parse("https://b.example.org/")?),
        )
        .await?;
        Ok(())
    }
}

//! Graph-store backed persistence.
//!
//! Each store contract is an `#[async_trait]` repository. [`GraphStore`]
//! implements all of them on one oxigraph store: registrations, ratings and
//! allowed domains live in their own named graphs, and every record lives in
//! a named graph identified by the record IRI. `store()` calls are atomic
//! replaces of the identifier's statements.

mod domains;
mod ratings;
mod records;
mod registrations;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use oxigraph::model::{Graph, NamedNode};
use oxigraph::sparql::QueryResults;
use oxigraph::store::Store;
use std::path::Path;
use tokio::task;
use url::Url;

use crate::error::StoreError;
use crate::extract::Record;
use crate::rating::Rating;
use crate::registration::Registration;

#[async_trait]
pub trait RegistrationStore: Send + Sync {
    /// Insert or replace the registration for its URL.
    async fn store(&self, registration: &Registration) -> Result<(), StoreError>;

    /// Registrations last read before `date`, oldest first.
    async fn find_read_before(&self, date: DateTime<Utc>) -> Result<Vec<Registration>, StoreError>;

    async fn find_by_url(&self, url: &Url) -> Result<Option<Registration>, StoreError>;
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert or replace the statements of one record.
    async fn store(&self, record: &Record) -> Result<(), StoreError>;

    async fn count_records(&self) -> Result<u64, StoreError>;

    /// Distinct publisher names over all records.
    async fn count_publishers(&self) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait AllowedDomainStore: Send + Sync {
    async fn contains(&self, domain: &str) -> Result<bool, StoreError>;

    async fn count(&self) -> Result<u64, StoreError>;

    async fn add(&self, domain: &str) -> Result<(), StoreError>;
}

#[async_trait]
pub trait RatingStore: Send + Sync {
    /// Insert or replace the rating of one record.
    async fn store(&self, record: &NamedNode, rating: &Rating) -> Result<(), StoreError>;

    async fn find(&self, record: &NamedNode) -> Result<Option<Rating>, StoreError>;
}

/// One oxigraph store shared by every store contract.
#[derive(Clone)]
pub struct GraphStore {
    store: Store,
}

impl GraphStore {
    pub fn in_memory() -> Result<Self, StoreError> {
        Ok(Self {
            store: Store::new().map_err(storage)?,
        })
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Ok(Self {
            store: Store::open(path).map_err(storage)?,
        })
    }

    /// Open at `path`, or in memory when no path is configured.
    pub fn from_config(path: Option<&Path>) -> Result<Self, StoreError> {
        match path {
            Some(path) => Self::open(path),
            None => Self::in_memory(),
        }
    }

    /// Run blocking store work off the async runtime.
    async fn run<T, F>(&self, work: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Store) -> Result<T, StoreError> + Send + 'static,
    {
        let store = self.store.clone();
        task::spawn_blocking(move || work(&store)).await?
    }

    /// Cheap liveness probe for readiness checks.
    pub async fn ping(&self) -> Result<(), StoreError> {
        self.run(|store| store.len().map(|_| ()).map_err(storage)).await
    }

    /// All statements of one named graph.
    pub async fn named_graph(&self, name: NamedNode) -> Result<Graph, StoreError> {
        self.run(move |store| {
            let mut graph = Graph::new();
            for quad in store.quads_for_pattern(None, None, None, Some(name.as_ref().into())) {
                let quad = quad.map_err(storage)?;
                graph.insert(quad.as_ref());
            }
            Ok(graph)
        })
        .await
    }
}

pub(crate) fn storage(error: impl std::fmt::Display) -> StoreError {
    StoreError::Storage(error.to_string())
}

pub(crate) fn query_error(error: impl std::fmt::Display) -> StoreError {
    StoreError::Query(error.to_string())
}

/// N-Triples body for an `INSERT DATA` block.
pub(crate) fn triples_block<'a>(triples: impl IntoIterator<Item = oxigraph::model::TripleRef<'a>>) -> String {
    let mut block = String::new();
    for triple in triples {
        block.push_str(&triple.to_string());
        block.push_str(" .\n");
    }
    block
}

pub(crate) fn update(store: &Store, update: &str) -> Result<(), StoreError> {
    #[allow(deprecated)]
    store.update(update).map_err(query_error)
}

/// Evaluate a query with a single `?n` count binding.
pub(crate) fn count(store: &Store, query: &str) -> Result<u64, StoreError> {
    #[allow(deprecated)]
    let results = store.query(query).map_err(query_error)?;
    let QueryResults::Solutions(mut solutions) = results else {
        return Err(StoreError::Query("count query did not return solutions".into()));
    };
    let Some(solution) = solutions.next() else {
        return Ok(0);
    };
    let solution = solution.map_err(query_error)?;
    match solution.get("n") {
        Some(oxigraph::model::Term::Literal(literal)) => {
            literal.value().parse().map_err(|e| StoreError::Corrupt {
                subject: "count".into(),
                message: format!("{e}"),
            })
        }
        _ => Ok(0),
    }
}

pub(crate) fn timestamp(when: DateTime<Utc>) -> String {
    when.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

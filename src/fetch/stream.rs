use std::collections::{HashSet, VecDeque};

use futures::StreamExt;
use futures::stream::{self, BoxStream};
use tracing::{debug, warn};
use url::Url;

use super::HttpFetcher;
use crate::error::{FetchError, classify_engine_message};
use crate::extract::{Record, RecordGrouper};
use crate::metrics::METRICS;

/// Crawl state carried between pulls.
struct Crawl {
    fetcher: HttpFetcher,
    queue: VecDeque<Url>,
    visited: HashSet<Url>,
    pages: usize,
    grouper: RecordGrouper,
    ready: VecDeque<Record>,
    done: bool,
}

impl Crawl {
    fn new(fetcher: HttpFetcher, url: Url) -> Self {
        Self {
            fetcher,
            queue: VecDeque::from([url]),
            visited: HashSet::new(),
            pages: 0,
            grouper: RecordGrouper::new(),
            ready: VecDeque::new(),
            done: false,
        }
    }

    fn next_url(&mut self) -> Option<Url> {
        if self.pages >= self.fetcher.max_pages() {
            if !self.queue.is_empty() {
                warn!(pages = self.pages, "page limit reached, not following further pages");
            }
            return None;
        }
        while let Some(url) = self.queue.pop_front() {
            if self.visited.insert(url.clone()) {
                return Some(url);
            }
            debug!(url = %url, "page already read");
        }
        None
    }

    /// Read one more page and move its completed records to `ready`.
    async fn advance(&mut self) -> Result<(), FetchError> {
        let Some(url) = self.next_url() else {
            self.ready.extend(self.grouper.finish());
            self.done = true;
            return Ok(());
        };

        let (graph, next) = self.fetcher.read_page(&url).await?;
        self.pages += 1;
        let extractor = self.fetcher.extractor().clone();
        let triples = tokio::task::spawn_blocking(move || extractor.construct(&graph))
            .await
            .map_err(|e| FetchError::no_record(url.as_str(), e.to_string()))?
            .map_err(|e| classify_engine_message(url.as_str(), &format!("{e:#}")))?;
        debug!(url = %url, page = self.pages, statements = triples.len(), "page extracted");

        for triple in triples {
            self.ready.extend(self.grouper.push(triple));
        }
        self.queue.extend(next);
        Ok(())
    }
}

/// Records from `url` and every page reachable through continuation links.
///
/// Each pull reads at most as many pages as it takes to complete one record.
/// On failure, records already yielded stand, the partly accumulated record is
/// dropped and the error ends the stream.
pub(super) fn records(fetcher: HttpFetcher, url: Url) -> BoxStream<'static, Result<Record, FetchError>> {
    stream::unfold(Crawl::new(fetcher, url), |mut crawl| async move {
        loop {
            if let Some(record) = crawl.ready.pop_front() {
                return Some((Ok(record), crawl));
            }
            if crawl.done {
                return None;
            }
            if let Err(error) = crawl.advance().await {
                METRICS.record_fetch_failure(error.kind());
                crawl.done = true;
                crawl.ready.clear();
                crawl.grouper = RecordGrouper::new();
                return Some((Err(error), crawl));
            }
        }
    })
    .boxed()
}

//! Dereferencing and crawling of registration URLs.
//!
//! [`Fetcher::dereference`] reads one URL into a normalized graph.
//! [`Fetcher::crawl`] follows the URL and its continuation pages and yields
//! the records found on them as a pull-based stream.

pub mod client;
pub mod normalize;
pub mod retry;
mod stream;

pub use client::{Page, PageClient, ReqwestClient, TransportError};
pub use retry::{ExponentialBackoff, RetryConfig, RetryPolicy};

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use once_cell::sync::Lazy;
use oxigraph::io::{RdfFormat, RdfParser};
use oxigraph::model::{Graph, Term, Triple};
use scraper::{Html, Selector};
use tracing::{debug, instrument};
use url::Url;

use crate::error::FetchError;
use crate::extract::{Extractor, Record};
use crate::metrics::METRICS;
use crate::vocab::{HYDRA_NEXT, HYDRA_NEXT_PAGE};

static JSON_LD_SCRIPT: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"script[type="application/ld+json"]"#).expect("json-ld script selector")
});

pub const DEFAULT_MAX_PAGES: usize = 100;

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Read `url` once into a normalized graph.
    async fn dereference(&self, url: &Url) -> Result<Graph, FetchError>;

    /// Records at `url` and its continuation pages, in order.
    ///
    /// The stream ends after the first error.
    fn crawl(&self, url: &Url) -> BoxStream<'static, Result<Record, FetchError>>;
}

/// Fetcher over a [`PageClient`], normally HTTP.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Arc<dyn PageClient>,
    retry: Arc<dyn RetryPolicy>,
    extractor: Extractor,
    max_pages: usize,
}

impl HttpFetcher {
    pub fn new(client: Arc<dyn PageClient>, extractor: Extractor) -> Self {
        Self {
            client,
            retry: Arc::new(ExponentialBackoff::default()),
            extractor,
            max_pages: DEFAULT_MAX_PAGES,
        }
    }

    pub fn with_retry(mut self, retry: Arc<dyn RetryPolicy>) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    /// One page read and parsed, plus its continuation links.
    pub(crate) async fn read_page(&self, url: &Url) -> Result<(Graph, Vec<Url>), FetchError> {
        let page = retry::get_with_retry(self.client.as_ref(), url, self.retry.as_ref())
            .await
            .map_err(FetchError::from)?;
        let graph = parse_page(&page)?;
        let next = next_pages(&page, &graph);
        Ok((graph, next))
    }

    pub(crate) fn extractor(&self) -> &Extractor {
        &self.extractor
    }

    pub(crate) fn max_pages(&self) -> usize {
        self.max_pages
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    #[instrument(skip_all, fields(url = %url))]
    async fn dereference(&self, url: &Url) -> Result<Graph, FetchError> {
        match self.read_page(url).await {
            Ok((graph, _)) => {
                debug!(statements = graph.len(), "dereferenced");
                Ok(graph)
            }
            Err(error) => {
                METRICS.record_fetch_failure(error.kind());
                Err(error)
            }
        }
    }

    fn crawl(&self, url: &Url) -> BoxStream<'static, Result<Record, FetchError>> {
        stream::records(self.clone(), url.clone())
    }
}

/// Parse a response body by its media type.
///
/// Non-2xx pages fail with their status. The result has schema.org in its
/// secure form and holds at least one statement.
pub fn parse_page(page: &Page) -> Result<Graph, FetchError> {
    let url = page.url.as_str();
    if !page.is_success() {
        return Err(FetchError::http(
            url,
            page.status,
            format!("HTTP status {}", page.status),
        ));
    }

    let media_type = page.media_type().unwrap_or_default();
    let graph = match media_type.as_str() {
        "text/html" | "application/xhtml+xml" => parse_html(page)?,
        "application/json" | "application/ld+json" => parse_json_ld(&page.url, &page.body)?,
        other => {
            let format = RdfFormat::from_media_type(other)
                .ok_or_else(|| FetchError::invalid_content_type(url, other))?;
            parse_rdf(&page.url, format, &page.body)?
        }
    };

    let graph = normalize::secure_schema_namespace(&graph);
    if graph.is_empty() {
        return Err(FetchError::no_record(url, "response holds no statements"));
    }
    Ok(graph)
}

fn parse_rdf(base: &Url, format: RdfFormat, body: &[u8]) -> Result<Graph, FetchError> {
    let url = base.as_str();
    let parser = RdfParser::from_format(format)
        .with_base_iri(url)
        .map_err(|e| FetchError::no_record(url, e.to_string()))?;

    let mut graph = Graph::new();
    for quad in parser.for_slice(body) {
        let quad = quad.map_err(|e| FetchError::no_record(url, e.to_string()))?;
        graph.insert(&Triple::from(quad));
    }
    Ok(graph)
}

fn parse_json_ld(base: &Url, body: &[u8]) -> Result<Graph, FetchError> {
    let url = base.as_str();
    let document: serde_json::Value =
        serde_json::from_slice(body).map_err(|e| FetchError::no_record(url, e.to_string()))?;
    let document = serde_json::to_vec(&normalize::inline_schema_contexts(document))
        .map_err(|e| FetchError::no_record(url, e.to_string()))?;
    let format = RdfFormat::from_media_type("application/ld+json")
        .ok_or_else(|| FetchError::invalid_content_type(url, "application/ld+json"))?;
    parse_rdf(base, format, &document)
}

/// Every `application/ld+json` script block of an HTML page.
fn parse_html(page: &Page) -> Result<Graph, FetchError> {
    let url = page.url.as_str();
    let html = Html::parse_document(&String::from_utf8_lossy(&page.body));

    let mut graph = Graph::new();
    let mut blocks = 0;
    for script in html.select(&JSON_LD_SCRIPT) {
        blocks += 1;
        let text: String = script.text().collect();
        for triple in parse_json_ld(&page.url, text.as_bytes())?.iter() {
            graph.insert(triple);
        }
    }
    if blocks == 0 {
        return Err(FetchError::no_record(url, "no JSON-LD found in HTML page"));
    }
    Ok(graph)
}

/// Continuation pages: hydra links in the payload and a `Link` header.
fn next_pages(page: &Page, graph: &Graph) -> Vec<Url> {
    let mut next = Vec::new();
    for predicate in [HYDRA_NEXT, HYDRA_NEXT_PAGE] {
        for triple in graph.triples_for_predicate(predicate) {
            if let Term::NamedNode(target) = triple.object.into_owned() {
                if let Ok(target) = page.url.join(target.as_str()) {
                    next.push(target);
                }
            }
        }
    }
    next.extend(page.link_next.clone());
    let mut seen = HashSet::new();
    next.retain(|target| matches!(target.scheme(), "http" | "https") && seen.insert(target.clone()));
    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn page(content_type: &str, body: &str) -> Page {
        Page {
            url: Url::parse("https://example.org/catalog").unwrap(),
            status: 200,
            content_type: Some(content_type.to_owned()),
            body: body.as_bytes().to_vec(),
            link_next: None,
        }
    }

    #[test]
    fn test_non_success_is_http_error() {
        let mut gone = page("text/turtle", "");
        gone.status = 404;
        assert_matches!(
            parse_page(&gone),
            Err(FetchError::Http { status_code: 404, .. })
        );
    }

    #[test]
    fn test_unknown_media_type() {
        assert_matches!(
            parse_page(&page("application/pdf", "%PDF")),
            Err(FetchError::InvalidContentType { media_type, .. }) if media_type == "application/pdf"
        );
    }

    #[test]
    fn test_turtle_with_relative_iris_and_insecure_schema() {
        let graph = parse_page(&page(
            "text/turtle; charset=utf-8",
            r#"<d/1> a <http://schema.org/Dataset> ; <http://schema.org/name> "One" ."#,
        ))
        .unwrap();
        let rendered: Vec<String> = graph.iter().map(|t| t.to_string()).collect();
        assert!(rendered.iter().any(|t| t.starts_with("<https://example.org/d/1>")));
        assert!(rendered.iter().all(|t| !t.contains("http://schema.org/")));
    }

    #[test]
    fn test_json_ld_with_schema_context() {
        let graph = parse_page(&page(
            "application/ld+json",
            r#"{"@context": "https://schema.org/", "@id": "https://example.org/d/1",
                "@type": "Dataset", "name": "One"}"#,
        ))
        .unwrap();
        assert!(
            graph
                .iter()
                .any(|t| t.object.to_string() == "<https://schema.org/Dataset>")
        );
    }

    #[test]
    fn test_html_with_json_ld() {
        let html = r#"<html><head>
            <script type="application/ld+json">
              {"@context": "http://schema.org", "@id": "https://example.org/d/1", "@type": "Dataset"}
            </script>
            </head><body></body></html>"#;
        let graph = parse_page(&page("text/html", html)).unwrap();
        assert_eq!(graph.len(), 1);

        assert_matches!(
            parse_page(&page("text/html", "<html><body>nothing</body></html>")),
            Err(FetchError::NoRecordFoundAtUrl { .. })
        );
    }

    #[test]
    fn test_malformed_payload_is_no_record() {
        assert_matches!(
            parse_page(&page("text/turtle", "<a> <b> ")),
            Err(FetchError::NoRecordFoundAtUrl { .. })
        );
        assert_matches!(
            parse_page(&page("text/turtle", "")),
            Err(FetchError::NoRecordFoundAtUrl { .. })
        );
    }

    #[test]
    fn test_next_pages() {
        let mut first = page(
            "text/turtle",
            r#"<https://example.org/catalog> <http://www.w3.org/ns/hydra/core#next> <?page=2> ."#,
        );
        first.link_next = Some(Url::parse("https://example.org/catalog?page=2").unwrap());
        let graph = parse_page(&first).unwrap();
        let next: Vec<String> = next_pages(&first, &graph).into_iter().map(String::from).collect();
        assert_eq!(next, ["https://example.org/catalog?page=2"]);
    }
}

mod support;

use std::sync::Arc;

use anyhow::Result;
use assert_matches::assert_matches;
use dataset_register::store::{GraphStore, RegistrationStore};
use dataset_register::{AppState, FetchError, IngestError, RegisterConfig};
use support::{CATALOG_URL, StaticPages, minimal_dataset, page, register, test_config};
use url::Url;

const PAGE_2: &str = "https://example.org/catalog?page=2";
const PAGE_3: &str = "https://example.org/catalog?page=3";

fn hydra_page(dataset: &str, this: &str, next: &str) -> String {
    format!(
        "{}\n<{this}> <http://www.w3.org/ns/hydra/core#next> <{next}> .",
        minimal_dataset(dataset)
    )
}

fn sorted(mut records: Vec<String>) -> Vec<String> {
    records.sort();
    records
}

#[tokio::test]
async fn records_from_every_page_are_registered() -> Result<()> {
    let pages = StaticPages::new();
    pages.serve_turtle(
        CATALOG_URL,
        &hydra_page("https://example.org/dataset/1", CATALOG_URL, PAGE_2),
    );
    pages.serve_turtle(PAGE_2, &minimal_dataset("https://example.org/dataset/2"));
    let state = register(pages).await?;

    let report = state.registry().ingest(CATALOG_URL).await?;
    assert!(report.accepted);
    assert_eq!(
        sorted(report.records),
        ["https://example.org/dataset/1", "https://example.org/dataset/2"]
    );
    Ok(())
}

#[tokio::test]
async fn cyclic_next_links_are_read_once() -> Result<()> {
    let pages = StaticPages::new();
    pages.serve_turtle(
        CATALOG_URL,
        &hydra_page("https://example.org/dataset/1", CATALOG_URL, PAGE_2),
    );
    pages.serve_turtle(
        PAGE_2,
        &hydra_page("https://example.org/dataset/2", PAGE_2, CATALOG_URL),
    );
    let state = register(pages.clone()).await?;

    let report = state.registry().ingest(CATALOG_URL).await?;
    assert_eq!(report.records.len(), 2);
    assert_eq!(pages.hits(PAGE_2), 1);
    Ok(())
}

#[tokio::test]
async fn link_header_continues_the_crawl() -> Result<()> {
    let pages = StaticPages::new();
    let mut first = page(
        CATALOG_URL,
        200,
        "text/turtle",
        &minimal_dataset("https://example.org/dataset/1"),
    );
    first.link_next = Some(Url::parse(PAGE_2)?);
    pages.serve_page(first);
    pages.serve_turtle(PAGE_2, &minimal_dataset("https://example.org/dataset/2"));
    let state = register(pages).await?;

    let report = state.registry().ingest(CATALOG_URL).await?;
    assert_eq!(report.records.len(), 2);
    Ok(())
}

#[tokio::test]
async fn crawl_stops_at_max_pages() -> Result<()> {
    let pages = StaticPages::new();
    pages.serve_turtle(
        CATALOG_URL,
        &hydra_page("https://example.org/dataset/1", CATALOG_URL, PAGE_2),
    );
    pages.serve_turtle(
        PAGE_2,
        &hydra_page("https://example.org/dataset/2", PAGE_2, PAGE_3),
    );
    pages.serve_turtle(PAGE_3, &minimal_dataset("https://example.org/dataset/3"));

    let config = RegisterConfig {
        max_pages: 2,
        ..test_config()
    };
    let state = AppState::with_client(Arc::new(config), GraphStore::in_memory()?, pages.clone()).await?;

    let report = state.registry().ingest(CATALOG_URL).await?;
    assert_eq!(report.records.len(), 2);
    assert_eq!(pages.hits(PAGE_3), 0);
    Ok(())
}

#[tokio::test]
async fn failing_continuation_page_is_a_fetch_error() -> Result<()> {
    let pages = StaticPages::new();
    pages.serve_turtle(
        CATALOG_URL,
        &hydra_page("https://example.org/dataset/1", CATALOG_URL, PAGE_2),
    );
    pages.serve_status(PAGE_2, 500);
    let state = register(pages).await?;

    let result = state.registry().ingest(CATALOG_URL).await;
    assert_matches!(
        result,
        Err(IngestError::Fetch(FetchError::Http { status_code: 500, url, .. })) if url == PAGE_2
    );
    assert!(
        state
            .store()
            .find_by_url(&Url::parse(CATALOG_URL)?)
            .await?
            .is_none(),
        "an incomplete crawl does not create a registration"
    );
    Ok(())
}

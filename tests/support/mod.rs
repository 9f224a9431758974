#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use dataset_register::fetch::{Page, PageClient, TransportError};
use dataset_register::store::GraphStore;
use dataset_register::{AppState, RegisterConfig};
use parking_lot::RwLock;
use url::Url;

pub const CATALOG_URL: &str = "https://example.org/catalog";

/// Serves canned pages by URL; anything unknown answers 404.
#[derive(Default)]
pub struct StaticPages {
    pages: RwLock<HashMap<String, Page>>,
    refused: RwLock<HashSet<String>>,
    hits: RwLock<HashMap<String, usize>>,
}

impl StaticPages {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn serve(&self, url: &str, content_type: &str, body: &str) {
        self.serve_page(page(url, 200, content_type, body));
    }

    pub fn serve_turtle(&self, url: &str, body: &str) {
        self.serve(url, "text/turtle", body);
    }

    pub fn serve_status(&self, url: &str, status: u16) {
        self.serve_page(page(url, status, "text/plain", ""));
    }

    pub fn serve_page(&self, page: Page) {
        self.refused.write().remove(page.url.as_str());
        self.pages.write().insert(page.url.to_string(), page);
    }

    /// Fail every request for `url` before any response, like a refused connection.
    pub fn refuse(&self, url: &str) {
        self.refused.write().insert(url.to_owned());
    }

    pub fn hits(&self, url: &str) -> usize {
        self.hits.read().get(url).copied().unwrap_or_default()
    }
}

#[async_trait]
impl PageClient for StaticPages {
    async fn get(&self, url: &Url) -> Result<Page, TransportError> {
        *self.hits.write().entry(url.to_string()).or_default() += 1;
        if self.refused.read().contains(url.as_str()) {
            return Err(TransportError::Connect {
                url: url.to_string(),
                message: "connection refused".to_owned(),
            });
        }
        Ok(self
            .pages
            .read()
            .get(url.as_str())
            .cloned()
            .unwrap_or_else(|| page(url.as_str(), 404, "text/plain", "")))
    }
}

pub fn page(url: &str, status: u16, content_type: &str, body: &str) -> Page {
    Page {
        url: Url::parse(url).expect("fixture URL"),
        status,
        content_type: Some(content_type.to_owned()),
        body: body.as_bytes().to_vec(),
        link_next: None,
    }
}

pub fn test_config() -> RegisterConfig {
    RegisterConfig {
        allowed_domains: vec!["example.org".to_owned()],
        fetch_attempts: 1,
        ..RegisterConfig::default()
    }
}

/// In-memory register reading pages from `pages`, with example.org allowed.
pub async fn register(pages: Arc<StaticPages>) -> Result<AppState> {
    AppState::with_client(Arc::new(test_config()), GraphStore::in_memory()?, pages).await
}

/// Name, license and publisher only.
pub fn minimal_dataset(id: &str) -> String {
    format!(
        r#"
        @prefix schema: <https://schema.org/> .
        <{id}> a schema:Dataset ;
            schema:name "Letters" ;
            schema:license <https://creativecommons.org/licenses/by/4.0/> ;
            schema:publisher [ a schema:Organization ; schema:name "Archive" ] .
        "#
    )
}

/// Every property the rating looks at.
pub fn complete_dataset(id: &str) -> String {
    format!(
        r#"
        @prefix schema: <https://schema.org/> .
        <{id}> a schema:Dataset ;
            schema:name "Letters"@en ;
            schema:description "Letters sent between 1800 and 1850"@en ;
            schema:license <https://creativecommons.org/licenses/by/4.0/> ;
            schema:publisher [ a schema:Organization ; schema:name "Archive" ] ;
            schema:creator [ a schema:Person ; schema:name "Clerk" ] ;
            schema:dateCreated "2019-01-01" ;
            schema:datePublished "2020-01-01" ;
            schema:dateModified "2021-01-01" ;
            schema:keywords "letters" ;
            schema:spatialCoverage "Amsterdam" ;
            schema:temporalCoverage "1800/1850" ;
            schema:inLanguage "nl" ;
            schema:distribution [
                a schema:DataDownload ;
                schema:contentUrl <https://example.org/letters.csv> ;
                schema:encodingFormat "text/csv"
            ] .
        "#
    )
}

/// A dataset without a license.
pub fn unlicensed_dataset(id: &str) -> String {
    format!(
        r#"
        @prefix schema: <https://schema.org/> .
        <{id}> a schema:Dataset ;
            schema:name "Letters" ;
            schema:publisher [ a schema:Organization ; schema:name "Archive" ] .
        "#
    )
}

//! HTTP transport for the fetcher.

use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{ACCEPT, CONTENT_TYPE, LINK};
use thiserror::Error;
use url::Url;

use crate::error::FetchError;

/// Media types we can parse, RDF first, HTML last.
pub const ACCEPT_HEADER: &str = "application/ld+json, text/turtle;q=0.95, application/n-triples;q=0.9, \
     application/n-quads;q=0.9, application/trig;q=0.9, application/rdf+xml;q=0.85, \
     application/json;q=0.8, text/html;q=0.7, */*;q=0.1";

static LINK_NEXT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<([^>]*)>\s*((?:;\s*[A-Za-z-]+\s*=\s*(?:"[^"]*"|[^;,]*)\s*)*)"#)
        .expect("link header regex")
});

/// One HTTP response, fully read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    /// Final URL after redirects.
    pub url: Url,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
    /// Target of a `Link: <..>; rel="next"` header, resolved against `url`.
    pub link_next: Option<Url>,
}

impl Page {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Essence of the content type: lower-cased, parameters dropped.
    pub fn media_type(&self) -> Option<String> {
        self.content_type.as_deref().map(media_type_essence)
    }
}

pub fn media_type_essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Transport failures that happen before any response was read.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("could not connect to {url}: {message}")]
    Connect { url: String, message: String },

    #[error("request to {url} failed: {message}")]
    Other { url: String, message: String },
}

impl TransportError {
    /// Worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Connect { .. })
    }

    pub fn url(&self) -> &str {
        match self {
            Self::Timeout { url } | Self::Connect { url, .. } | Self::Other { url, .. } => url,
        }
    }
}

/// No response means nothing to read: the URL is treated as holding no record.
impl From<TransportError> for FetchError {
    fn from(error: TransportError) -> Self {
        let message = error.to_string();
        let url = match error {
            TransportError::Timeout { url }
            | TransportError::Connect { url, .. }
            | TransportError::Other { url, .. } => url,
        };
        FetchError::NoRecordFoundAtUrl { url, message }
    }
}

/// Reads one page. Non-2xx responses are pages too, not errors.
#[async_trait]
pub trait PageClient: Send + Sync {
    async fn get(&self, url: &Url) -> Result<Page, TransportError>;
}

pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    pub fn new(user_agent: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }

    fn transport_error(url: &Url, error: reqwest::Error) -> TransportError {
        let url = url.to_string();
        if error.is_timeout() {
            TransportError::Timeout { url }
        } else if error.is_connect() {
            TransportError::Connect {
                url,
                message: error.to_string(),
            }
        } else {
            TransportError::Other {
                url,
                message: error.to_string(),
            }
        }
    }
}

#[async_trait]
impl PageClient for ReqwestClient {
    async fn get(&self, url: &Url) -> Result<Page, TransportError> {
        let response = self
            .client
            .get(url.clone())
            .header(ACCEPT, ACCEPT_HEADER)
            .send()
            .await
            .map_err(|e| Self::transport_error(url, e))?;

        let final_url = response.url().clone();
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let link_next = response
            .headers()
            .get_all(LINK)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .find_map(|value| link_next(&final_url, value));
        let body = response
            .bytes()
            .await
            .map_err(|e| Self::transport_error(url, e))?
            .to_vec();

        tracing::debug!(url = %final_url, status, bytes = body.len(), "page read");
        Ok(Page {
            url: final_url,
            status,
            content_type,
            body,
            link_next,
        })
    }
}

/// The `rel="next"` target of one `Link` header value.
pub fn link_next(base: &Url, header: &str) -> Option<Url> {
    LINK_NEXT.captures_iter(header).find_map(|link| {
        let params = link.get(2).map_or("", |m| m.as_str());
        let is_next = params.split(';').any(|param| {
            let Some((name, value)) = param.split_once('=') else {
                return false;
            };
            name.trim().eq_ignore_ascii_case("rel")
                && value
                    .trim()
                    .trim_matches('"')
                    .split_ascii_whitespace()
                    .any(|rel| rel.eq_ignore_ascii_case("next"))
        });
        if !is_next {
            return None;
        }
        base.join(link.get(1)?.as_str().trim()).ok()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_transport_failures_never_carry_a_status() {
        let failures = [
            TransportError::Timeout {
                url: "https://example.org/404/catalog".to_owned(),
            },
            TransportError::Connect {
                url: "https://example.org/data/status-2024-404.ttl".to_owned(),
                message: "connection refused".to_owned(),
            },
            TransportError::Other {
                url: "https://example.org/catalog".to_owned(),
                message: "HTTP status server error (503 Service Unavailable)".to_owned(),
            },
        ];
        for failure in failures {
            let url = failure.url().to_owned();
            let error = FetchError::from(failure);
            assert_matches!(&error, FetchError::NoRecordFoundAtUrl { url: u, .. } if *u == url);
            assert_eq!(error.status_code(), 200);
        }
    }

    #[test]
    fn test_link_next() {
        let base = Url::parse("https://example.org/catalog?page=1").unwrap();
        assert_eq!(
            link_next(&base, r#"<?page=2>; rel="next""#).map(String::from),
            Some("https://example.org/catalog?page=2".to_owned())
        );
        assert_eq!(
            link_next(
                &base,
                r#"<https://example.org/a>; rel="prev", <https://example.org/c?p=3>; rel=next"#
            )
            .map(String::from),
            Some("https://example.org/c?p=3".to_owned())
        );
        assert_eq!(
            link_next(&base, r#"<https://example.org/x>; rel="first next""#).map(String::from),
            Some("https://example.org/x".to_owned())
        );
        assert!(link_next(&base, r#"<https://example.org/a>; rel="nextpage""#).is_none());
        assert!(link_next(&base, r#"<https://example.org/a>; rel="prev""#).is_none());
    }

    #[test]
    fn test_media_type_essence() {
        assert_eq!(media_type_essence("Text/Turtle; charset=UTF-8"), "text/turtle");
        assert_eq!(media_type_essence("application/ld+json"), "application/ld+json");
    }
}

//! Error taxonomy for the register.
//!
//! - [`FetchError`]: expected, recoverable failures while dereferencing or
//!   crawling a URL. The crawler degrades on them; the ingestion boundary maps
//!   them to client-class outcomes.
//! - [`StoreError`]: graph store failures.
//! - [`IngestError`]: everything the ingestion boundary can refuse with.
//!
//! Validation failures are not errors; they are a normal pipeline outcome.

use axum::http::StatusCode;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use thiserror::Error;

/// Failure to obtain records from a URL.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum FetchError {
    #[error("HTTP error {status_code} for {url}: {message}")]
    #[serde(rename_all = "camelCase")]
    Http {
        url: String,
        status_code: u16,
        message: String,
    },

    #[error("no dataset description found at {url}: {message}")]
    NoRecordFoundAtUrl { url: String, message: String },

    #[error("unsupported content type {media_type:?} at {url}")]
    #[serde(rename_all = "camelCase")]
    InvalidContentType { url: String, media_type: String },
}

impl FetchError {
    pub fn http(url: impl Into<String>, status_code: u16, message: impl Into<String>) -> Self {
        FetchError::Http {
            url: url.into(),
            status_code,
            message: message.into(),
        }
    }

    pub fn no_record(url: impl Into<String>, message: impl Into<String>) -> Self {
        FetchError::NoRecordFoundAtUrl {
            url: url.into(),
            message: message.into(),
        }
    }

    pub fn invalid_content_type(url: impl Into<String>, media_type: impl Into<String>) -> Self {
        FetchError::InvalidContentType {
            url: url.into(),
            media_type: media_type.into(),
        }
    }

    /// Status code a registration records after this failure.
    ///
    /// Only HTTP errors carry a real status; the other kinds mean the URL was
    /// reachable but served nothing usable.
    pub fn status_code(&self) -> u16 {
        match self {
            FetchError::Http { status_code, .. } => *status_code,
            FetchError::NoRecordFoundAtUrl { .. } | FetchError::InvalidContentType { .. } => 200,
        }
    }

    /// Label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Http { .. } => "http_error",
            FetchError::NoRecordFoundAtUrl { .. } => "no_record_found",
            FetchError::InvalidContentType { .. } => "invalid_content_type",
        }
    }

    pub fn url(&self) -> &str {
        match self {
            FetchError::Http { url, .. }
            | FetchError::NoRecordFoundAtUrl { url, .. }
            | FetchError::InvalidContentType { url, .. } => url,
        }
    }
}

static NOT_FOUND: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b404\b").expect("static regex is valid"));
static HTTP_STATUS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)HTTP status (?:[a-z ]+ )?\(?(\d{3})\b").expect("static regex is valid"));
static MEDIA_TYPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)unrecogni[sz]ed media type:?\s*(\S+)").expect("static regex is valid")
});

/// Translate a free-text failure message from a fetch or parse engine.
///
/// Only used where the engine gives nothing better than a message, and only
/// for messages that do not embed the request URL; transport failures convert
/// through their structured form instead. Anything the table does not
/// recognise becomes [`FetchError::NoRecordFoundAtUrl`].
pub fn classify_engine_message(url: &str, message: &str) -> FetchError {
    if let Some(captures) = MEDIA_TYPE.captures(message) {
        return FetchError::invalid_content_type(url, captures[1].trim_end_matches([',', '.', ';']));
    }
    if NOT_FOUND.is_match(message) {
        return FetchError::http(url, 404, message);
    }
    if let Some(code) = HTTP_STATUS
        .captures(message)
        .and_then(|captures| captures[1].parse::<u16>().ok())
    {
        return FetchError::http(url, code, message);
    }
    FetchError::no_record(url, message)
}

/// Graph store failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("graph store failure: {0}")]
    Storage(String),

    #[error("SPARQL evaluation failed: {0}")]
    Query(String),

    #[error("malformed stored data for {subject}: {message}")]
    Corrupt { subject: String, message: String },

    #[error("graph store task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Reasons the ingestion boundary refuses or fails a request.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("invalid URL {url}: {message}")]
    InvalidUrl { url: String, message: String },

    #[error("URL {url} is not on an allowed domain")]
    UrlNotAllowed { url: String },

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("validation engine failed: {0}")]
    Validation(#[source] anyhow::Error),
}

impl IngestError {
    /// HTTP status a front end should answer with.
    ///
    /// Fetch failures are the submitter's problem and never map to 5xx.
    pub fn http_status(&self) -> StatusCode {
        match self {
            IngestError::InvalidUrl { .. } => StatusCode::BAD_REQUEST,
            IngestError::UrlNotAllowed { .. } => StatusCode::FORBIDDEN,
            IngestError::Fetch(FetchError::Http { .. }) => StatusCode::NOT_FOUND,
            IngestError::Fetch(FetchError::NoRecordFoundAtUrl { .. }) => StatusCode::NOT_FOUND,
            IngestError::Fetch(FetchError::InvalidContentType { .. }) => {
                StatusCode::UNSUPPORTED_MEDIA_TYPE
            }
            IngestError::Store(_) | IngestError::Validation(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Error category for metrics.
    pub fn category(&self) -> &'static str {
        match self {
            IngestError::InvalidUrl { .. } | IngestError::UrlNotAllowed { .. } => "client_error",
            IngestError::Fetch(_) => "fetch_error",
            IngestError::Store(_) => "store_error",
            IngestError::Validation(_) => "validation_engine_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const URL: &str = "https://example.org/dataset";

    #[test]
    fn not_found_message_becomes_http_404() {
        let error = classify_engine_message(URL, "Could not retrieve https://example.org/dataset (404)");
        assert_matches!(error, FetchError::Http { status_code: 404, .. });
    }

    #[test]
    fn http_status_message_keeps_code() {
        let error = classify_engine_message(URL, "Could not retrieve: HTTP status 503 received");
        assert_matches!(error, FetchError::Http { status_code: 503, .. });

        let error = classify_engine_message(
            URL,
            "HTTP status server error (502 Bad Gateway) for url (https://example.org/dataset)",
        );
        assert_matches!(error, FetchError::Http { status_code: 502, .. });
    }

    #[test]
    fn unrecognized_media_type_is_extracted() {
        let error = classify_engine_message(URL, "Unrecognized media type: text/plain");
        assert_eq!(error, FetchError::invalid_content_type(URL, "text/plain"));
    }

    #[test]
    fn anything_else_means_no_record() {
        for message in ["", "unexpected end of input", "connection reset by peer", "HTTP 40"] {
            assert_matches!(
                classify_engine_message(URL, message),
                FetchError::NoRecordFoundAtUrl { .. },
                "message {message:?}"
            );
        }
    }

    #[test]
    fn media_type_wins_over_status_pattern() {
        let error = classify_engine_message(URL, "HTTP status 200: unrecognized media type: image/png");
        assert_matches!(error, FetchError::InvalidContentType { media_type, .. } if media_type == "image/png");
    }

    #[test]
    fn fetch_failures_never_map_to_server_errors() {
        let errors = [
            FetchError::http(URL, 500, "boom"),
            FetchError::no_record(URL, "empty"),
            FetchError::invalid_content_type(URL, "text/plain"),
        ];
        for error in errors {
            let status = IngestError::from(error).http_status();
            assert!(!status.is_server_error(), "{status}");
        }
    }

    #[test]
    fn status_code_for_reachable_failures_is_ok() {
        assert_eq!(FetchError::no_record(URL, "x").status_code(), 200);
        assert_eq!(FetchError::http(URL, 410, "gone").status_code(), 410);
    }
}

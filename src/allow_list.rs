//! Registrable-domain allow-list.
//!
//! A URL is allowed when the public-suffix-aware registrable domain of its host
//! is in the [`AllowedDomainStore`]. Subdomains of an allowed domain therefore
//! pass; hosts that merely embed an allowed name do not.

use std::sync::Arc;

use url::{Host, Url};

use crate::error::StoreError;
use crate::store::AllowedDomainStore;

/// The registrable domain of `url`, lower-cased.
///
/// `None` for IP hosts, hosts that are a bare public suffix and URLs without
/// a host.
pub fn registrable_domain(url: &Url) -> Option<String> {
    let Some(Host::Domain(host)) = url.host() else {
        return None;
    };
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    if host.is_empty() || host.split('.').any(str::is_empty) {
        return None;
    }
    psl::domain_str(&host).map(str::to_owned)
}

/// Whether `domain` is itself a registrable domain, e.g. `example.org` but
/// not `data.example.org` or `co.uk`.
pub fn is_registrable(domain: &str) -> bool {
    let domain = domain.trim_end_matches('.').to_ascii_lowercase();
    !domain.split('.').any(str::is_empty) && psl::domain_str(&domain) == Some(domain.as_str())
}

#[derive(Clone)]
pub struct DomainAllowList {
    store: Arc<dyn AllowedDomainStore>,
}

impl DomainAllowList {
    pub fn new(store: Arc<dyn AllowedDomainStore>) -> Self {
        Self { store }
    }

    pub async fn is_allowed(&self, url: &Url) -> Result<bool, StoreError> {
        let Some(domain) = registrable_domain(url) else {
            tracing::debug!(url = %url, "no registrable domain");
            return Ok(false);
        };
        self.store.contains(&domain).await
    }

    pub async fn allow(&self, domain: &str) -> Result<(), StoreError> {
        self.store.add(domain).await
    }
}

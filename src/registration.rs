//! Registration lifecycle.
//!
//! A [`Registration`] is the persisted record of one accepted URL. It is an
//! immutable value: every re-check produces a new instance through
//! [`Registration::read`].

use chrono::{DateTime, Utc};
use oxigraph::model::NamedNode;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use url::Url;

/// Derived state of a registration.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RegistrationStatus {
    Valid,
    Invalid,
    Gone,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    url: Url,
    date_posted: DateTime<Utc>,
    date_read: DateTime<Utc>,
    valid_until: Option<DateTime<Utc>>,
    status_code: u16,
    records: Vec<NamedNode>,
}

impl Registration {
    /// First acceptance of a URL.
    pub fn new(url: Url, records: Vec<NamedNode>, status_code: u16, when: DateTime<Utc>) -> Self {
        Self {
            url,
            date_posted: when,
            date_read: when,
            valid_until: None,
            status_code,
            records,
        }
    }

    /// Rebuild a registration from persisted fields.
    pub fn restore(
        url: Url,
        date_posted: DateTime<Utc>,
        date_read: DateTime<Utc>,
        valid_until: Option<DateTime<Utc>>,
        status_code: u16,
        records: Vec<NamedNode>,
    ) -> Self {
        Self {
            url,
            date_posted,
            date_read,
            valid_until,
            status_code,
            records,
        }
    }

    /// Result of re-checking the URL at `when`.
    ///
    /// `valid_until` marks the onset of invalidity: it is kept if already set,
    /// set to `when` on the first failed check and cleared on success.
    pub fn read(
        &self,
        records: Vec<NamedNode>,
        status_code: u16,
        is_valid: bool,
        when: DateTime<Utc>,
    ) -> Self {
        let valid_until = if is_valid {
            None
        } else {
            Some(self.valid_until.unwrap_or(when))
        };

        Self {
            url: self.url.clone(),
            date_posted: self.date_posted,
            date_read: when,
            valid_until,
            status_code,
            records,
        }
    }

    /// Invalid wins over gone: a URL that stopped validating stays invalid
    /// whatever status it answers with.
    pub fn status(&self) -> RegistrationStatus {
        if self.valid_until.is_some() {
            RegistrationStatus::Invalid
        } else if !(200..300).contains(&self.status_code) {
            RegistrationStatus::Gone
        } else {
            RegistrationStatus::Valid
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn date_posted(&self) -> DateTime<Utc> {
        self.date_posted
    }

    pub fn date_read(&self) -> DateTime<Utc> {
        self.date_read
    }

    pub fn valid_until(&self) -> Option<DateTime<Utc>> {
        self.valid_until
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn records(&self) -> &[NamedNode] {
        &self.records
    }
}

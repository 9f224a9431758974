use async_trait::async_trait;
use chrono::{DateTime, Utc};
use oxigraph::model::vocab::xsd;
use oxigraph::model::{
    GraphNameRef, Literal, NamedNode, NamedNodeRef, NamedOrBlankNodeRef, Term, Triple,
};
use oxigraph::sparql::QueryResults;
use url::Url;

use super::{GraphStore, RegistrationStore, query_error, storage, timestamp, triples_block, update};
use crate::error::StoreError;
use crate::registration::Registration;
use crate::vocab::{RDF_TYPE, REGISTRATIONS_GRAPH};

const ENTRY_POINT: NamedNodeRef<'static> = NamedNodeRef::new_unchecked("https://schema.org/EntryPoint");
const DATE_POSTED: NamedNodeRef<'static> = NamedNodeRef::new_unchecked("https://schema.org/datePosted");
const DATE_READ: NamedNodeRef<'static> = NamedNodeRef::new_unchecked("https://schema.org/dateRead");
const VALID_UNTIL: NamedNodeRef<'static> = NamedNodeRef::new_unchecked("https://schema.org/validUntil");
const STATUS: NamedNodeRef<'static> =
    NamedNodeRef::new_unchecked("https://w3id.org/dataset-register#statusCode");
const ABOUT: NamedNodeRef<'static> = NamedNodeRef::new_unchecked("https://schema.org/about");

fn registration_triples(registration: &Registration) -> Vec<Triple> {
    let subject = NamedNode::new_unchecked(registration.url().as_str());
    let date = |when: DateTime<Utc>| Literal::new_typed_literal(timestamp(when), xsd::DATE_TIME);

    let mut triples = vec![
        Triple::new(subject.clone(), RDF_TYPE, ENTRY_POINT.into_owned()),
        Triple::new(subject.clone(), DATE_POSTED, date(registration.date_posted())),
        Triple::new(subject.clone(), DATE_READ, date(registration.date_read())),
        Triple::new(
            subject.clone(),
            STATUS,
            Literal::new_typed_literal(registration.status_code().to_string(), xsd::INTEGER),
        ),
    ];
    if let Some(valid_until) = registration.valid_until() {
        triples.push(Triple::new(subject.clone(), VALID_UNTIL, date(valid_until)));
    }
    for record in registration.records() {
        triples.push(Triple::new(subject.clone(), ABOUT, record.clone()));
    }
    triples
}

fn parse_date(subject: &str, literal: &Literal) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(literal.value())
        .map(|date| date.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt {
            subject: subject.to_owned(),
            message: format!("invalid date {}: {e}", literal.value()),
        })
}

fn load(store: &oxigraph::store::Store, url: &Url) -> Result<Option<Registration>, StoreError> {
    let subject = NamedNode::new_unchecked(url.as_str());
    let graph = NamedNodeRef::new_unchecked(REGISTRATIONS_GRAPH);

    let mut date_posted = None;
    let mut date_read = None;
    let mut valid_until = None;
    let mut status_code = None;
    let mut records = Vec::new();

    for quad in store.quads_for_pattern(
        Some(NamedOrBlankNodeRef::from(&subject)),
        None,
        None,
        Some(GraphNameRef::NamedNode(graph)),
    ) {
        let quad = quad.map_err(storage)?;
        let predicate = quad.predicate.as_ref();
        match (&quad.object, predicate) {
            (Term::Literal(literal), p) if p == DATE_POSTED => {
                date_posted = Some(parse_date(url.as_str(), literal)?)
            }
            (Term::Literal(literal), p) if p == DATE_READ => {
                date_read = Some(parse_date(url.as_str(), literal)?)
            }
            (Term::Literal(literal), p) if p == VALID_UNTIL => {
                valid_until = Some(parse_date(url.as_str(), literal)?)
            }
            (Term::Literal(literal), p) if p == STATUS => {
                status_code = Some(literal.value().parse::<u16>().map_err(|e| {
                    StoreError::Corrupt {
                        subject: url.to_string(),
                        message: format!("invalid status code: {e}"),
                    }
                })?)
            }
            (Term::NamedNode(record), p) if p == ABOUT => records.push(record.clone()),
            _ => {}
        }
    }

    let (Some(date_posted), Some(date_read), Some(status_code)) = (date_posted, date_read, status_code)
    else {
        return Ok(None);
    };
    // Store order is not insertion order.
    records.sort_by(|a: &NamedNode, b| a.as_str().cmp(b.as_str()));

    Ok(Some(Registration::restore(
        url.clone(),
        date_posted,
        date_read,
        valid_until,
        status_code,
        records,
    )))
}

#[async_trait]
impl RegistrationStore for GraphStore {
    async fn store(&self, registration: &Registration) -> Result<(), StoreError> {
        let subject = registration.url().as_str().to_owned();
        let triples = registration_triples(registration);
        let statement = format!(
            "DELETE WHERE {{ GRAPH <{REGISTRATIONS_GRAPH}> {{ <{subject}> ?p ?o }} }};\n\
             INSERT DATA {{ GRAPH <{REGISTRATIONS_GRAPH}> {{\n{}}} }}",
            triples_block(triples.iter().map(Triple::as_ref))
        );
        self.run(move |store| update(store, &statement)).await
    }

    async fn find_read_before(&self, date: DateTime<Utc>) -> Result<Vec<Registration>, StoreError> {
        let query = format!(
            "SELECT ?url WHERE {{ GRAPH <{REGISTRATIONS_GRAPH}> {{ \
               ?url <{DATE_READ}> ?read . \
               FILTER(?read < \"{}\"^^<http://www.w3.org/2001/XMLSchema#dateTime>) \
             }} }} ORDER BY ?read ?url",
            timestamp(date),
            DATE_READ = DATE_READ.as_str(),
        );

        self.run(move |store| {
            #[allow(deprecated)]
            let results = store.query(query.as_str()).map_err(query_error)?;
            let QueryResults::Solutions(solutions) = results else {
                return Err(StoreError::Query("expected solutions".into()));
            };

            let mut registrations = Vec::new();
            for solution in solutions {
                let solution = solution.map_err(query_error)?;
                let Some(Term::NamedNode(node)) = solution.get("url") else {
                    continue;
                };
                let url = Url::parse(node.as_str()).map_err(|e| StoreError::Corrupt {
                    subject: node.as_str().to_owned(),
                    message: e.to_string(),
                })?;
                if let Some(registration) = load(store, &url)? {
                    registrations.push(registration);
                }
            }
            Ok(registrations)
        })
        .await
    }

    async fn find_by_url(&self, url: &Url) -> Result<Option<Registration>, StoreError> {
        let url = url.clone();
        self.run(move |store| load(store, &url)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn registration(url: &str, when: DateTime<Utc>) -> Registration {
        Registration::new(
            Url::parse(url).unwrap(),
            vec![
                NamedNode::new("https://example.org/dataset/2").unwrap(),
                NamedNode::new("https://example.org/dataset/1").unwrap(),
            ],
            200,
            when,
        )
    }

    #[tokio::test]
    async fn round_trips_and_replaces() -> anyhow::Result<()> {
        let store = GraphStore::in_memory()?;
        let posted = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let first = registration("https://example.org/catalog", posted);
        RegistrationStore::store(&store, &first).await?;

        let failed = first.read(vec![], 404, false, posted + Duration::days(1));
        RegistrationStore::store(&store, &failed).await?;

        let found = store.find_by_url(first.url()).await?.unwrap();
        assert_eq!(found, failed);
        assert!(found.records().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn records_come_back_sorted() -> anyhow::Result<()> {
        let store = GraphStore::in_memory()?;
        let when = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        RegistrationStore::store(&store, &registration("https://example.org/catalog", when)).await?;

        let found = store
            .find_by_url(&Url::parse("https://example.org/catalog")?)
            .await?
            .unwrap();
        let ids: Vec<&str> = found.records().iter().map(NamedNode::as_str).collect();
        assert_eq!(ids, ["https://example.org/dataset/1", "https://example.org/dataset/2"]);
        Ok(())
    }

    #[tokio::test]
    async fn finds_only_stale_registrations() -> anyhow::Result<()> {
        let store = GraphStore::in_memory()?;
        let old = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let fresh = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        RegistrationStore::store(&store, &registration("https://a.example.org/", old)).await?;
        RegistrationStore::store(&store, &registration("https://b.example.org/", fresh)).await?;

        let stale = store
            .find_read_before(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap())
            .await?;
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].url().as_str(), "https://a.example.org/");

        assert!(
            store
                .find_by_url(&Url::parse("https://c.example.org/")?)
                .await?
                .is_none()
        );
        Ok(())
    }
}

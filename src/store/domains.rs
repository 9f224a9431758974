use async_trait::async_trait;
use oxigraph::model::{GraphNameRef, Literal, NamedNodeRef, QuadRef};

use super::{AllowedDomainStore, GraphStore, storage, update};
use crate::error::StoreError;
use crate::vocab::ALLOWED_DOMAINS_GRAPH;

const ALLOW_LIST: NamedNodeRef<'static> =
    NamedNodeRef::new_unchecked("https://w3id.org/dataset-register#allowList");
const DOMAIN: NamedNodeRef<'static> =
    NamedNodeRef::new_unchecked("https://w3id.org/dataset-register#domain");

fn normalize(domain: &str) -> String {
    domain.trim().trim_end_matches('.').to_ascii_lowercase()
}

#[async_trait]
impl AllowedDomainStore for GraphStore {
    async fn contains(&self, domain: &str) -> Result<bool, StoreError> {
        let domain = normalize(domain);
        self.run(move |store| {
            let literal = Literal::new_simple_literal(domain);
            store
                .contains(QuadRef::new(
                    ALLOW_LIST,
                    DOMAIN,
                    literal.as_ref(),
                    GraphNameRef::NamedNode(NamedNodeRef::new_unchecked(ALLOWED_DOMAINS_GRAPH)),
                ))
                .map_err(storage)
        })
        .await
    }

    async fn count(&self) -> Result<u64, StoreError> {
        self.run(|store| {
            let mut count = 0;
            for quad in store.quads_for_pattern(
                Some(ALLOW_LIST.into()),
                Some(DOMAIN),
                None,
                Some(GraphNameRef::NamedNode(NamedNodeRef::new_unchecked(ALLOWED_DOMAINS_GRAPH))),
            ) {
                quad.map_err(storage)?;
                count += 1;
            }
            Ok(count)
        })
        .await
    }

    async fn add(&self, domain: &str) -> Result<(), StoreError> {
        let literal = Literal::new_simple_literal(normalize(domain));
        let statement = format!(
            "INSERT DATA {{ GRAPH <{ALLOWED_DOMAINS_GRAPH}> {{ {ALLOW_LIST} {DOMAIN} {literal} }} }}"
        );
        self.run(move |store| update(store, &statement)).await
    }
}

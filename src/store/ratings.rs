use async_trait::async_trait;
use oxigraph::model::{GraphNameRef, NamedNode, NamedNodeRef, NamedOrBlankNode, NamedOrBlankNodeRef, Term};
use oxigraph::store::Store;

use super::{GraphStore, RatingStore, storage, update};
use crate::error::StoreError;
use crate::rating::{Penalty, Rating};
use crate::vocab::{RATINGS_GRAPH, REGISTER_NS as REGISTER, SCHEMA_NS as SCHEMA};

fn literal(value: &str) -> String {
    Term::from(oxigraph::model::Literal::new_simple_literal(value)).to_string()
}

fn integer(value: u32) -> String {
    format!("\"{value}\"^^<http://www.w3.org/2001/XMLSchema#integer>")
}

fn rating_statements(record: &str, rating: &Rating) -> String {
    let mut body = format!(
        "<{record}> <{SCHEMA}contentRating> _:rating .\n\
         _:rating a <{SCHEMA}Rating> ;\n\
           <{SCHEMA}ratingValue> {} ;\n\
           <{SCHEMA}worstRating> {} ;\n\
           <{SCHEMA}bestRating> {} ;\n\
           <{SCHEMA}ratingExplanation> {} .\n",
        integer(rating.score),
        integer(rating.worst_rating),
        integer(rating.best_rating),
        literal(&rating.explanation),
    );
    for (index, penalty) in rating.penalties.iter().enumerate() {
        body.push_str(&format!(
            "_:rating <{REGISTER}penalty> _:penalty{index} .\n\
             _:penalty{index} <{REGISTER}path> <{}> ;\n\
               <{REGISTER}score> {} ;\n\
               <{REGISTER}position> {} .\n",
            penalty.path,
            integer(penalty.score),
            integer(u32::try_from(index).unwrap_or(u32::MAX)),
        ));
    }
    body
}

fn object(store: &Store, subject: NamedOrBlankNodeRef<'_>, predicate: &str) -> Result<Option<Term>, StoreError> {
    let predicate = NamedNode::new_unchecked(predicate);
    let graph = NamedNodeRef::new_unchecked(RATINGS_GRAPH);
    match store
        .quads_for_pattern(Some(subject), Some(predicate.as_ref()), None, Some(GraphNameRef::NamedNode(graph)))
        .next()
    {
        Some(quad) => Ok(Some(quad.map_err(storage)?.object)),
        None => Ok(None),
    }
}

fn number(store: &Store, subject: NamedOrBlankNodeRef<'_>, predicate: &str) -> Result<u32, StoreError> {
    match object(store, subject, predicate)? {
        Some(Term::Literal(value)) => value.value().parse().map_err(|e| StoreError::Corrupt {
            subject: predicate.to_owned(),
            message: format!("{e}"),
        }),
        _ => Err(StoreError::Corrupt {
            subject: predicate.to_owned(),
            message: "missing rating value".into(),
        }),
    }
}

fn load(store: &Store, record: &NamedNode) -> Result<Option<Rating>, StoreError> {
    let Some(Term::BlankNode(node)) = object(store, record.into(), &format!("{SCHEMA}contentRating"))? else {
        return Ok(None);
    };
    let rating = NamedOrBlankNode::from(node);
    let rating = rating.as_ref();

    let explanation = match object(store, rating, &format!("{SCHEMA}ratingExplanation"))? {
        Some(Term::Literal(value)) => value.value().to_owned(),
        _ => String::new(),
    };

    let penalty_predicate = NamedNode::new_unchecked(format!("{REGISTER}penalty"));
    let graph = NamedNodeRef::new_unchecked(RATINGS_GRAPH);
    let mut penalties = Vec::new();
    for quad in store.quads_for_pattern(
        Some(rating),
        Some(penalty_predicate.as_ref()),
        None,
        Some(GraphNameRef::NamedNode(graph)),
    ) {
        let Term::BlankNode(penalty) = quad.map_err(storage)?.object else {
            continue;
        };
        let penalty = NamedOrBlankNode::from(penalty);
        let path = match object(store, penalty.as_ref(), &format!("{REGISTER}path"))? {
            Some(Term::NamedNode(path)) => path.into_string(),
            _ => continue,
        };
        let position = number(store, penalty.as_ref(), &format!("{REGISTER}position"))?;
        let score = number(store, penalty.as_ref(), &format!("{REGISTER}score"))?;
        penalties.push((position, Penalty { path, score }));
    }
    penalties.sort_by_key(|(position, _)| *position);

    Ok(Some(Rating {
        score: number(store, rating, &format!("{SCHEMA}ratingValue"))?,
        worst_rating: number(store, rating, &format!("{SCHEMA}worstRating"))?,
        best_rating: number(store, rating, &format!("{SCHEMA}bestRating"))?,
        explanation,
        penalties: penalties.into_iter().map(|(_, penalty)| penalty).collect(),
    }))
}

#[async_trait]
impl RatingStore for GraphStore {
    async fn store(&self, record: &NamedNode, rating: &Rating) -> Result<(), StoreError> {
        let id = record.as_str();
        let statement = format!(
            "DELETE WHERE {{ GRAPH <{RATINGS_GRAPH}> {{ <{id}> <{SCHEMA}contentRating> ?r . ?r <{REGISTER}penalty> ?p . ?p ?pp ?po }} }};\n\
             DELETE WHERE {{ GRAPH <{RATINGS_GRAPH}> {{ <{id}> <{SCHEMA}contentRating> ?r . ?r ?p ?o }} }};\n\
             INSERT DATA {{ GRAPH <{RATINGS_GRAPH}> {{\n{}}} }}",
            rating_statements(id, rating)
        );
        self.run(move |store| update(store, &statement)).await
    }

    async fn find(&self, record: &NamedNode) -> Result<Option<Rating>, StoreError> {
        let record = record.clone();
        self.run(move |store| load(store, &record)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rating(score: u32, explanation: &str, paths: &[&str]) -> Rating {
        Rating {
            score,
            worst_rating: 25,
            best_rating: 100,
            explanation: explanation.to_owned(),
            penalties: paths
                .iter()
                .map(|path| Penalty {
                    path: (*path).to_owned(),
                    score: 5,
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn stored_rating_is_replaced() -> anyhow::Result<()> {
        let store = GraphStore::in_memory()?;
        let record = NamedNode::new("https://example.org/d/1")?;

        let first = rating(
            90,
            "http://purl.org/dc/terms/modified, http://purl.org/dc/terms/language",
            &["http://purl.org/dc/terms/modified", "http://purl.org/dc/terms/language"],
        );
        RatingStore::store(&store, &record, &first).await?;
        assert_eq!(store.find(&record).await?, Some(first));

        let second = rating(100, "", &[]);
        RatingStore::store(&store, &record, &second).await?;
        assert_eq!(store.find(&record).await?, Some(second));

        // Only the second rating's statements remain.
        let graph = store
            .named_graph(NamedNode::new(RATINGS_GRAPH)?)
            .await?;
        assert_eq!(graph.len(), 6);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_record_has_no_rating() -> anyhow::Result<()> {
        let store = GraphStore::in_memory()?;
        assert!(store.find(&NamedNode::new("https://example.org/none")?).await?.is_none());
        Ok(())
    }
}

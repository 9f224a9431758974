//! Payload normalization before and after parsing.

use oxigraph::model::{Graph, Literal, NamedNode, NamedOrBlankNode, Term, Triple};
use serde_json::{Map, Value, json};

use crate::vocab::{SCHEMA_INSECURE_NS, SCHEMA_NS};

/// Remote context IRIs that are replaced by an inline `@vocab` context.
const SCHEMA_CONTEXTS: [&str; 6] = [
    "https://schema.org",
    "https://schema.org/",
    "http://schema.org",
    "http://schema.org/",
    "https://schema.org/docs/jsonldcontext.jsonld",
    "http://schema.org/docs/jsonldcontext.jsonld",
];

fn is_schema_context(value: &str) -> bool {
    SCHEMA_CONTEXTS.contains(&value.trim())
}

fn inline_context(context: Value) -> Value {
    match context {
        Value::String(iri) if is_schema_context(&iri) => json!({ "@vocab": SCHEMA_NS }),
        Value::Array(items) => Value::Array(items.into_iter().map(inline_context).collect()),
        other => other,
    }
}

/// Replace schema.org context references so parsing needs no network.
///
/// Applies to every `@context`, nested ones included.
pub fn inline_schema_contexts(document: Value) -> Value {
    match document {
        Value::Object(object) => Value::Object(
            object
                .into_iter()
                .map(|(key, value)| {
                    let value = if key == "@context" {
                        inline_context(value)
                    } else {
                        inline_schema_contexts(value)
                    };
                    (key, value)
                })
                .collect::<Map<_, _>>(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(inline_schema_contexts).collect()),
        other => other,
    }
}

fn secure_iri(iri: &str) -> Option<NamedNode> {
    iri.strip_prefix(SCHEMA_INSECURE_NS)
        .map(|local| NamedNode::new_unchecked(format!("{SCHEMA_NS}{local}")))
}

fn secure_node(node: NamedNode) -> NamedNode {
    secure_iri(node.as_str()).unwrap_or(node)
}

fn secure_term(term: Term) -> Term {
    match term {
        Term::NamedNode(node) => secure_node(node).into(),
        Term::Literal(literal) => {
            let datatype = literal.datatype();
            match secure_iri(datatype.as_str()) {
                Some(datatype) => Literal::new_typed_literal(literal.value(), datatype).into(),
                None => literal.into(),
            }
        }
        other => other,
    }
}

/// Rewrite `http://schema.org/` to `https://schema.org/` in subjects,
/// predicates, object IRIs and literal datatypes.
pub fn secure_schema_namespace(graph: &Graph) -> Graph {
    let mut secured = Graph::new();
    for triple in graph.iter() {
        let triple = triple.into_owned();
        let subject = match triple.subject {
            NamedOrBlankNode::NamedNode(node) => secure_node(node).into(),
            other => other,
        };
        secured.insert(&Triple::new(
            subject,
            secure_node(triple.predicate),
            secure_term(triple.object),
        ));
    }
    secured
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxigraph::model::vocab::rdf;

    #[test]
    fn test_inline_schema_contexts() {
        let document = json!({
            "@context": "https://schema.org/",
            "@type": "Dataset",
            "hasPart": [{ "@context": ["http://schema.org", { "ex": "https://example.org/" }] }],
            "about": { "@context": "https://example.org/context.jsonld" }
        });
        let inlined = inline_schema_contexts(document);

        assert_eq!(inlined["@context"], json!({ "@vocab": "https://schema.org/" }));
        assert_eq!(
            inlined["hasPart"][0]["@context"],
            json!([{ "@vocab": "https://schema.org/" }, { "ex": "https://example.org/" }])
        );
        assert_eq!(
            inlined["about"]["@context"],
            json!("https://example.org/context.jsonld")
        );
    }

    #[test]
    fn test_secure_schema_namespace() {
        let mut graph = Graph::new();
        let subject = NamedNode::new_unchecked("https://example.org/d/1");
        graph.insert(&Triple::new(
            subject.clone(),
            rdf::TYPE,
            NamedNode::new_unchecked("http://schema.org/Dataset"),
        ));
        graph.insert(&Triple::new(
            subject.clone(),
            NamedNode::new_unchecked("http://schema.org/dateCreated"),
            Literal::new_typed_literal("2024-01-01", NamedNode::new_unchecked("http://schema.org/Date")),
        ));

        let secured = secure_schema_namespace(&graph);
        let rendered: Vec<String> = secured.iter().map(|t| t.to_string()).collect();
        assert_eq!(secured.len(), 2);
        assert!(rendered.iter().all(|t| !t.contains("http://schema.org/")));
        assert!(rendered.iter().any(|t| t.contains("<https://schema.org/Dataset>")));
        assert!(
            rendered
                .iter()
                .any(|t| t.contains("\"2024-01-01\"^^<https://schema.org/Date>"))
        );
    }
}

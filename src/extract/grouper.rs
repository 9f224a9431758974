use oxigraph::model::{Graph, NamedNode, NamedOrBlankNode, Term, Triple};

use super::Record;
use crate::vocab::{DCAT_DATASET, RDF_TYPE};

/// Streaming record boundary detector.
///
/// Statements arrive grouped by dataset, each group opening with the
/// dataset's type statement (see [`super::Extractor::construct`]). A record
/// boundary is a statement
/// typing a *different* subject as `dcat:Dataset`; the accumulated statements
/// are flushed as one record at that point and once more at stream end.
#[derive(Debug, Default)]
pub struct RecordGrouper {
    current: Option<NamedNode>,
    buffer: Graph,
}

impl RecordGrouper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one statement; returns the previous record when it starts a new one.
    pub fn push(&mut self, triple: Triple) -> Option<Record> {
        let flushed = match starts_record(&triple) {
            Some(subject) if self.current.as_ref() != Some(subject) => {
                let subject = subject.clone();
                self.flush_into(Some(subject))
            }
            _ => None,
        };
        self.buffer.insert(&triple);
        flushed
    }

    /// Flush the record being accumulated, if any.
    pub fn finish(&mut self) -> Option<Record> {
        self.flush_into(None)
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_none() && self.buffer.is_empty()
    }

    fn flush_into(&mut self, next: Option<NamedNode>) -> Option<Record> {
        let previous = std::mem::replace(&mut self.current, next);
        let graph = std::mem::take(&mut self.buffer);
        match previous {
            Some(id) => Some(Record::new(id, graph)),
            None => {
                if !graph.is_empty() {
                    tracing::debug!(
                        statements = graph.len(),
                        "dropping statements that precede the first dataset"
                    );
                }
                None
            }
        }
    }
}

fn starts_record(triple: &Triple) -> Option<&NamedNode> {
    match (&triple.subject, &triple.object) {
        (NamedOrBlankNode::NamedNode(subject), Term::NamedNode(object))
            if triple.predicate.as_ref() == RDF_TYPE && object.as_ref() == DCAT_DATASET =>
        {
            Some(subject)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxigraph::model::Literal;

    fn typed(subject: &str) -> Triple {
        Triple::new(
            NamedNode::new_unchecked(subject),
            RDF_TYPE.into_owned(),
            DCAT_DATASET.into_owned(),
        )
    }

    fn titled(subject: &str, title: &str) -> Triple {
        Triple::new(
            NamedNode::new_unchecked(subject),
            NamedNode::new_unchecked("http://purl.org/dc/terms/title"),
            Literal::new_simple_literal(title),
        )
    }

    #[test]
    fn new_subject_flushes_previous_record() {
        let mut grouper = RecordGrouper::new();
        assert!(grouper.push(typed("https://example.org/a")).is_none());
        assert!(grouper.push(titled("https://example.org/a", "A")).is_none());
        // Repeated type statement for the same subject is not a boundary.
        assert!(grouper.push(typed("https://example.org/a")).is_none());

        let first = grouper.push(typed("https://example.org/b")).unwrap();
        assert_eq!(first.id().as_str(), "https://example.org/a");
        assert_eq!(first.graph().len(), 2);

        grouper.push(titled("https://example.org/b", "B"));
        let second = grouper.finish().unwrap();
        assert_eq!(second.id().as_str(), "https://example.org/b");
        assert_eq!(second.graph().len(), 2);

        assert!(grouper.finish().is_none());
        assert!(grouper.is_empty());
    }

    #[test]
    fn empty_stream_flushes_nothing() {
        assert!(RecordGrouper::new().finish().is_none());
    }
}

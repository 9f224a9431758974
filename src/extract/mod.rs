//! Metadata extraction.
//!
//! A page of RDF is loaded into a scratch store and the extraction query maps
//! whatever dataset descriptions it holds (schema.org or DCAT) onto one DCAT
//! shape. The constructed statements are canonicalized, laid out one dataset
//! at a time and then partitioned into records by [`RecordGrouper`].

pub mod canonical;
mod grouper;

pub use canonical::Canonicalizer;
pub use grouper::RecordGrouper;

use std::collections::{HashSet, VecDeque};

use anyhow::{Context, Result, anyhow};
use oxigraph::model::{
    Graph, GraphNameRef, NamedNode, NamedNodeRef, NamedOrBlankNodeRef, QuadRef, TermRef, Triple,
};
use oxigraph::sparql::QueryResults;
use oxigraph::store::Store;

use crate::vocab::{DCAT_DATASET, RDF_TYPE, RECORD_TYPES};

/// An independently addressable metadata record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    id: NamedNode,
    graph: Graph,
}

impl Record {
    pub fn new(id: NamedNode, graph: Graph) -> Self {
        Self { id, graph }
    }

    pub fn id(&self) -> &NamedNode {
        &self.id
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Take the record apart, e.g. to move its graph to another thread.
    pub fn into_parts(self) -> (NamedNode, Graph) {
        (self.id, self.graph)
    }
}

/// Maps schema.org and DCAT dataset descriptions onto DCAT.
///
/// Each property sits in its own UNION branch so a solution binds at most one
/// optional value; the empty branch keeps datasets without any properties.
/// The output is deduplicated and in no particular order.
pub const EXTRACTION_QUERY: &str = r#"
PREFIX dcat: <http://www.w3.org/ns/dcat#>
PREFIX dct: <http://purl.org/dc/terms/>
PREFIX foaf: <http://xmlns.com/foaf/0.1/>
PREFIX schema: <https://schema.org/>

CONSTRUCT {
  ?dataset a dcat:Dataset ;
    dct:title ?title ;
    dct:description ?description ;
    dct:identifier ?identifier ;
    dct:license ?license ;
    dct:language ?language ;
    dcat:keyword ?keyword ;
    dct:spatial ?spatial ;
    dct:temporal ?temporal ;
    dct:created ?created ;
    dct:issued ?issued ;
    dct:modified ?modified ;
    dcat:landingPage ?landingPage ;
    dct:creator ?creator ;
    dct:publisher ?publisher ;
    dcat:distribution ?distribution .
  ?creator a foaf:Agent ;
    foaf:name ?creatorName .
  ?publisher a foaf:Agent ;
    foaf:name ?publisherName .
  ?distribution a dcat:Distribution ;
    dcat:accessURL ?accessURL ;
    dcat:mediaType ?mediaType ;
    dct:format ?format ;
    dcat:byteSize ?byteSize ;
    dct:title ?distributionTitle ;
    dct:description ?distributionDescription ;
    dct:license ?distributionLicense .
}
WHERE {
  VALUES ?type { schema:Dataset dcat:Dataset }
  ?dataset a ?type .
  FILTER(!isBlank(?dataset))
  {
    {}
    UNION { ?dataset schema:name|dct:title ?title }
    UNION { ?dataset schema:description|dct:description ?description }
    UNION { ?dataset schema:identifier|dct:identifier ?identifier FILTER(isLiteral(?identifier) || isIRI(?identifier)) }
    UNION { ?dataset schema:license|dct:license ?license }
    UNION { ?dataset schema:inLanguage|dct:language ?language }
    UNION { ?dataset schema:keywords|dcat:keyword ?keyword }
    UNION { ?dataset schema:spatialCoverage|dct:spatial ?spatial }
    UNION { ?dataset schema:temporalCoverage|dct:temporal ?temporal }
    UNION { ?dataset schema:dateCreated|dct:created ?created }
    UNION { ?dataset schema:datePublished|dct:issued ?issued }
    UNION { ?dataset schema:dateModified|dct:modified ?modified }
    UNION { ?dataset schema:url|dcat:landingPage ?landingPage }
    UNION {
      ?dataset schema:creator|dct:creator ?creator .
      OPTIONAL { ?creator schema:name|foaf:name ?creatorName }
    }
    UNION {
      ?dataset schema:publisher|dct:publisher ?publisher .
      OPTIONAL { ?publisher schema:name|foaf:name ?publisherName }
    }
    UNION {
      ?dataset schema:distribution|dcat:distribution ?distribution .
      {
        {}
        UNION { ?distribution schema:contentUrl|dcat:accessURL ?accessURL }
        UNION { ?distribution schema:encodingFormat|dcat:mediaType ?mediaType }
        UNION { ?distribution dct:format ?format }
        UNION { ?distribution schema:contentSize|dcat:byteSize ?byteSize }
        UNION { ?distribution schema:name|dct:title ?distributionTitle }
        UNION { ?distribution schema:description|dct:description ?distributionDescription }
        UNION { ?distribution schema:license|dct:license ?distributionLicense }
      }
    }
  }
}
"#;

/// Runs the extraction query and canonicalizes its output.
#[derive(Debug, Clone, Default)]
pub struct Extractor {
    canonicalizer: Canonicalizer,
}

impl Extractor {
    pub fn new(canonicalizer: Canonicalizer) -> Self {
        Self { canonicalizer }
    }

    pub fn canonicalizer(&self) -> &Canonicalizer {
        &self.canonicalizer
    }

    /// Constructed, canonicalized statements for one page, in record order.
    ///
    /// Datasets come in IRI order. Each opens with its `dcat:Dataset` type
    /// statement, followed by every statement reachable from it. Nodes shared
    /// by several datasets, such as a common publisher, are repeated for each.
    pub fn construct(&self, page: &Graph) -> Result<Vec<Triple>> {
        let constructed = self.constructed_graph(page)?;

        let mut datasets: Vec<NamedNodeRef<'_>> = constructed
            .subjects_for_predicate_object(RDF_TYPE, DCAT_DATASET)
            .filter_map(|subject| match subject {
                NamedOrBlankNodeRef::NamedNode(node) => Some(node),
                NamedOrBlankNodeRef::BlankNode(_) => None,
            })
            .collect();
        datasets.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        let boundaries: HashSet<NamedNodeRef<'_>> = datasets.iter().copied().collect();

        let mut ordered = Vec::with_capacity(constructed.len());
        for dataset in datasets {
            ordered.push(Triple::new(
                dataset.into_owned(),
                RDF_TYPE.into_owned(),
                DCAT_DATASET.into_owned(),
            ));
            ordered.extend(reachable(&constructed, dataset, &boundaries));
        }
        Ok(ordered)
    }

    fn constructed_graph(&self, page: &Graph) -> Result<Graph> {
        let store = Store::new().context("failed to create scratch store")?;
        for triple in page {
            store
                .insert(QuadRef::new(
                    triple.subject,
                    triple.predicate,
                    triple.object,
                    GraphNameRef::DefaultGraph,
                ))
                .context("failed to load page into scratch store")?;
        }

        #[allow(deprecated)]
        let results = store
            .query(EXTRACTION_QUERY)
            .map_err(|e| anyhow!("extraction query failed: {e}"))?;

        let QueryResults::Graph(triples) = results else {
            return Err(anyhow!("extraction query did not return a graph"));
        };

        let mut graph = Graph::new();
        for triple in triples {
            let triple = triple.map_err(|e| anyhow!("extraction query failed: {e}"))?;
            graph.insert(&self.canonicalizer.canonicalize(triple));
        }
        Ok(graph)
    }

    /// All records held by one page.
    pub fn records(&self, page: &Graph) -> Result<Vec<Record>> {
        let mut grouper = RecordGrouper::new();
        let mut records = Vec::new();
        for triple in self.construct(page)? {
            records.extend(grouper.push(triple));
        }
        records.extend(grouper.finish());
        Ok(records)
    }
}

/// Statements reachable from `root`, its own type statement excepted.
///
/// Other datasets are not entered; the statement linking to one is kept.
fn reachable<'a>(
    graph: &'a Graph,
    root: NamedNodeRef<'a>,
    datasets: &HashSet<NamedNodeRef<'a>>,
) -> Vec<Triple> {
    let root_node = NamedOrBlankNodeRef::from(root);
    let mut visited: HashSet<NamedOrBlankNodeRef<'a>> = HashSet::from([root_node]);
    let mut queue = VecDeque::from([root_node]);
    let mut triples = Vec::new();

    while let Some(node) = queue.pop_front() {
        for triple in graph.triples_for_subject(node) {
            if node == root_node
                && triple.predicate == RDF_TYPE
                && triple.object == TermRef::from(DCAT_DATASET)
            {
                continue;
            }
            let next = match triple.object {
                TermRef::NamedNode(target) if !datasets.contains(&target) => {
                    Some(NamedOrBlankNodeRef::from(target))
                }
                TermRef::BlankNode(target) => Some(NamedOrBlankNodeRef::from(target)),
                _ => None,
            };
            if let Some(next) = next {
                if visited.insert(next) {
                    queue.push_back(next);
                }
            }
            triples.push(triple.into_owned());
        }
    }
    triples
}

/// Non-blank subjects typed as a dataset.
pub fn record_ids(graph: &Graph) -> Vec<NamedNode> {
    let mut ids: Vec<NamedNode> = Vec::new();
    for record_type in RECORD_TYPES {
        for subject in graph.subjects_for_predicate_object(RDF_TYPE, TermRef::from(record_type)) {
            if let NamedOrBlankNodeRef::NamedNode(node) = subject {
                let node = node.into_owned();
                if !ids.contains(&node) {
                    ids.push(node);
                }
            }
        }
    }
    ids
}

//! Namespace constants shared by the extractor, validator and stores.

use oxigraph::model::NamedNodeRef;

pub const SH_NS: &str = "http://www.w3.org/ns/shacl#";
pub const SCHEMA_NS: &str = "https://schema.org/";
pub const SCHEMA_INSECURE_NS: &str = "http://schema.org/";
pub const DCAT_NS: &str = "http://www.w3.org/ns/dcat#";
pub const DCT_NS: &str = "http://purl.org/dc/terms/";
pub const REGISTER_NS: &str = "https://w3id.org/dataset-register#";

pub const RDF_TYPE: NamedNodeRef<'static> =
    NamedNodeRef::new_unchecked("http://www.w3.org/1999/02/22-rdf-syntax-ns#type");

/// The registry's own record type; every extracted record carries it.
pub const DCAT_DATASET: NamedNodeRef<'static> =
    NamedNodeRef::new_unchecked("http://www.w3.org/ns/dcat#Dataset");

pub const SCHEMA_DATASET: NamedNodeRef<'static> =
    NamedNodeRef::new_unchecked("https://schema.org/Dataset");

/// Types that make a graph count as a metadata record at all.
pub const RECORD_TYPES: [NamedNodeRef<'static>; 2] = [SCHEMA_DATASET, DCAT_DATASET];

pub const HYDRA_NEXT: NamedNodeRef<'static> =
    NamedNodeRef::new_unchecked("http://www.w3.org/ns/hydra/core#next");

pub const HYDRA_NEXT_PAGE: NamedNodeRef<'static> =
    NamedNodeRef::new_unchecked("http://www.w3.org/ns/hydra/core#nextPage");

/// Named graphs the stores write into.
pub const REGISTRATIONS_GRAPH: &str = "https://w3id.org/dataset-register/graph/registrations";
pub const RATINGS_GRAPH: &str = "https://w3id.org/dataset-register/graph/ratings";
pub const ALLOWED_DOMAINS_GRAPH: &str = "https://w3id.org/dataset-register/graph/allowed-domains";

pub fn dct(local: &str) -> String {
    format!("{DCT_NS}{local}")
}

pub fn dcat(local: &str) -> String {
    format!("{DCAT_NS}{local}")
}

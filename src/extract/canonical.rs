//! Literal canonicalization applied to every extracted statement.
//!
//! The rules form an ordered table keyed on predicate. Each rule rewrites the
//! object of a matching statement and leaves values already in canonical form
//! untouched, so running the table twice is a no-op.

use once_cell::sync::Lazy;
use oxigraph::model::vocab::xsd;
use oxigraph::model::{Literal, NamedNode, Term, Triple};
use regex::Regex;
use url::Url;

const DCT_CREATED: &str = "http://purl.org/dc/terms/created";
const DCT_ISSUED: &str = "http://purl.org/dc/terms/issued";
const DCT_MODIFIED: &str = "http://purl.org/dc/terms/modified";
const DCT_LICENSE: &str = "http://purl.org/dc/terms/license";
const DCT_FORMAT: &str = "http://purl.org/dc/terms/format";
const DCT_TITLE: &str = "http://purl.org/dc/terms/title";
const DCT_DESCRIPTION: &str = "http://purl.org/dc/terms/description";
const DCAT_MEDIA_TYPE: &str = "http://www.w3.org/ns/dcat#mediaType";
const DCAT_BYTE_SIZE: &str = "http://www.w3.org/ns/dcat#byteSize";
const DCAT_KEYWORD: &str = "http://www.w3.org/ns/dcat#keyword";
const FOAF_NAME: &str = "http://xmlns.com/foaf/0.1/name";

pub const IANA_MEDIA_TYPES: &str = "https://www.iana.org/assignments/media-types/";

const IANA_PREFIXES: [&str; 4] = [
    IANA_MEDIA_TYPES,
    "http://www.iana.org/assignments/media-types/",
    "https://iana.org/assignments/media-types/",
    "http://iana.org/assignments/media-types/",
];

type Rewrite = fn(&Canonicalizer, Term) -> Term;

struct Rule {
    name: &'static str,
    predicates: &'static [&'static str],
    rewrite: Rewrite,
}

/// Order matters: keywords are turned into literals before the language rule
/// tags them.
static RULES: &[Rule] = &[
    Rule {
        name: "dates",
        predicates: &[DCT_CREATED, DCT_ISSUED, DCT_MODIFIED],
        rewrite: type_date,
    },
    Rule {
        name: "license",
        predicates: &[DCT_LICENSE],
        rewrite: canonical_license,
    },
    Rule {
        name: "media-type",
        predicates: &[DCAT_MEDIA_TYPE, DCT_FORMAT],
        rewrite: iana_media_type,
    },
    Rule {
        name: "byte-size",
        predicates: &[DCAT_BYTE_SIZE],
        rewrite: byte_size,
    },
    Rule {
        name: "keyword-iri",
        predicates: &[DCAT_KEYWORD],
        rewrite: keyword_literal,
    },
    Rule {
        name: "default-language",
        predicates: &[DCT_TITLE, DCT_DESCRIPTION, DCAT_KEYWORD, FOAF_NAME],
        rewrite: default_language,
    },
];

static DATE_TIME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{4}-\d{2}-\d{2})[T ](\d{2}:\d{2})(:\d{2}(?:\.\d+)?)?(Z|[+-]\d{2}:\d{2})?$")
        .expect("static regex is valid")
});
static DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("static regex is valid"));
static MEDIA_TYPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z0-9][A-Za-z0-9!#$&^_.+-]*)/([A-Za-z0-9][A-Za-z0-9!#$&^_.+-]*)$")
        .expect("static regex is valid")
});
static BYTE_SIZE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(\d+)(?:\.(\d+))?\s*(b|kb|mb|gb|tb)?\s*$").expect("static regex is valid")
});

/// Applies the rewrite table to statements.
#[derive(Debug, Clone)]
pub struct Canonicalizer {
    default_language: String,
}

impl Default for Canonicalizer {
    fn default() -> Self {
        Self::new("en")
    }
}

impl Canonicalizer {
    pub fn new(default_language: impl Into<String>) -> Self {
        Self {
            default_language: default_language.into().to_ascii_lowercase(),
        }
    }

    pub fn default_language(&self) -> &str {
        &self.default_language
    }

    pub fn canonicalize(&self, triple: Triple) -> Triple {
        let Triple {
            subject,
            predicate,
            mut object,
        } = triple;

        for rule in RULES {
            if rule.predicates.contains(&predicate.as_str()) {
                object = (rule.rewrite)(self, object);
                tracing::trace!(rule = rule.name, predicate = %predicate, "applied canonical rule");
            }
        }

        Triple::new(subject, predicate, object)
    }
}

/// A literal without datatype or language tag.
fn simple_value(term: &Term) -> Option<&str> {
    match term {
        Term::Literal(literal)
            if literal.language().is_none() && literal.datatype() == xsd::STRING =>
        {
            Some(literal.value())
        }
        _ => None,
    }
}

fn type_date(_: &Canonicalizer, object: Term) -> Term {
    let Some(value) = simple_value(&object).map(str::trim) else {
        return object;
    };

    if let Some(parts) = DATE_TIME.captures(value) {
        let seconds = parts.get(3).map_or(":00", |m| m.as_str());
        let zone = parts.get(4).map_or("", |m| m.as_str());
        let lexical = format!("{}T{}{seconds}{zone}", &parts[1], &parts[2]);
        return Literal::new_typed_literal(lexical, xsd::DATE_TIME).into();
    }
    if DATE.is_match(value) {
        return Literal::new_typed_literal(value, xsd::DATE).into();
    }
    object
}

fn canonical_license(_: &Canonicalizer, object: Term) -> Term {
    let candidate = match &object {
        Term::NamedNode(node) => node.as_str(),
        Term::Literal(_) => match simple_value(&object) {
            Some(value) => value.trim(),
            None => return object,
        },
        _ => return object,
    };

    match canonical_license_iri(candidate) {
        Some(iri) => NamedNode::new_unchecked(iri).into(),
        None => object,
    }
}

/// `https`, lower-case host without `www.`, no trailing slash, no query.
/// Creative Commons legal code and translated deed suffixes are dropped.
pub fn canonical_license_iri(raw: &str) -> Option<String> {
    let url = Url::parse(raw).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    let host = url.host_str()?.to_ascii_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host).to_owned();

    let mut segments: Vec<&str> = url
        .path_segments()
        .map(|segments| segments.filter(|s| !s.is_empty()).collect())
        .unwrap_or_default();

    if host == "creativecommons.org" {
        while let Some(last) = segments.last() {
            let is_suffix = *last == "legalcode"
                || *last == "deed"
                || last.starts_with("legalcode.")
                || last.starts_with("deed.");
            if !is_suffix {
                break;
            }
            segments.pop();
        }
    }

    let mut canonical = format!("https://{host}");
    for segment in segments {
        canonical.push('/');
        canonical.push_str(segment);
    }
    Some(canonical)
}

fn iana_media_type(_: &Canonicalizer, object: Term) -> Term {
    let raw = match &object {
        Term::NamedNode(node) => {
            let iri = node.as_str();
            let Some(rest) = IANA_PREFIXES
                .iter()
                .find_map(|prefix| iri.strip_prefix(*prefix))
            else {
                return object;
            };
            rest
        }
        Term::Literal(_) => match simple_value(&object) {
            Some(value) => value,
            None => return object,
        },
        _ => return object,
    };

    match iana_media_type_iri(raw) {
        Some(iri) => NamedNode::new_unchecked(iri).into(),
        None => object,
    }
}

/// `text/csv; charset=utf-8` becomes the IANA registry IRI for `text/csv`.
pub fn iana_media_type_iri(raw: &str) -> Option<String> {
    let essence = raw.split(';').next()?.trim();
    let captures = MEDIA_TYPE.captures(essence)?;
    Some(format!(
        "{IANA_MEDIA_TYPES}{}/{}",
        captures[1].to_ascii_lowercase(),
        captures[2].to_ascii_lowercase()
    ))
}

fn byte_size(_: &Canonicalizer, object: Term) -> Term {
    let Term::Literal(literal) = &object else {
        return object;
    };
    if literal.language().is_some() {
        return object;
    }
    match parse_byte_size(literal.value()) {
        Some(bytes) => {
            let canonical = Literal::new_typed_literal(bytes.to_string(), xsd::INTEGER);
            if &canonical == literal {
                object
            } else {
                canonical.into()
            }
        }
        None => object,
    }
}

/// Parse `12`, `1.5 MB`, `300kB` into bytes using decimal multiples.
pub fn parse_byte_size(raw: &str) -> Option<u128> {
    let captures = BYTE_SIZE.captures(raw)?;
    let exponent = match captures.get(3).map(|m| m.as_str().to_ascii_lowercase()) {
        None => 0,
        Some(unit) => match unit.as_str() {
            "b" => 0,
            "kb" => 1,
            "mb" => 2,
            "gb" => 3,
            "tb" => 4,
            _ => return None,
        },
    };
    let multiplier = 1000u128.checked_pow(exponent)?;
    let whole: u128 = captures[1].parse().ok()?;
    let mut bytes = whole.checked_mul(multiplier)?;

    if let Some(fraction) = captures.get(2) {
        let digits = fraction.as_str();
        let scale = 10u128.checked_pow(u32::try_from(digits.len()).ok()?)?;
        let numerator: u128 = digits.parse().ok()?;
        bytes = bytes.checked_add(numerator.checked_mul(multiplier)? / scale)?;
    }
    Some(bytes)
}

fn keyword_literal(_: &Canonicalizer, object: Term) -> Term {
    match object {
        Term::NamedNode(node) => Literal::new_simple_literal(node.into_string()).into(),
        other => other,
    }
}

fn default_language(canonicalizer: &Canonicalizer, object: Term) -> Term {
    match simple_value(&object) {
        Some(value) => Literal::new_language_tagged_literal_unchecked(
            value,
            canonicalizer.default_language.as_str(),
        )
        .into(),
        None => object,
    }
}

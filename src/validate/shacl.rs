//! SHACL (Shapes Constraint Language) validation of dataset records.
//!
//! # Components
//!
//! - **ShapeValidator**: loads shapes once and validates record graphs
//! - **ShapeDiscovery**: reads node and property shapes out of a shapes store
//! - **ConstraintChecker**: checks property constraints for one focus node
//! - **ValidationReport**: findings, with nested `details` for `sh:node`
//!
//! Supported constraint components: `sh:minCount`, `sh:maxCount`,
//! `sh:datatype`, `sh:class`, `sh:nodeKind`, `sh:node`, `sh:pattern`,
//! `sh:minLength`, `sh:maxLength`, `sh:minInclusive`, `sh:maxInclusive`,
//! `sh:in` and `sh:uniqueLang`. Paths must be single predicates.
//!
//! # Example
//!
//! ```rust,ignore
//! let validator = ShapeValidator::from_turtle(include_str!("../../shapes/register.ttl"))?;
//! let report = validator.validate(&record_graph)?;
//! if !report.conforms() {
//!     for result in report.violations() {
//!         println!("{}: {}", result.focus_node(), result.message());
//!     }
//! }
//! ```

use anyhow::{Context, Result};
use oxigraph::io::{RdfFormat, RdfSerializer};
use oxigraph::model::vocab::rdf;
use oxigraph::model::*;
use oxigraph::store::Store;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

use indexmap::IndexSet;

use crate::vocab::SH_NS;

/// `sh:node` nesting deeper than this is reported instead of followed.
const MAX_NODE_DEPTH: usize = 8;

// =============================================================================
// Severity Levels
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Violation,
}

impl Severity {
    pub fn from_iri(iri: NamedNodeRef<'_>) -> Self {
        match iri.as_str() {
            "http://www.w3.org/ns/shacl#Info" => Severity::Info,
            "http://www.w3.org/ns/shacl#Warning" => Severity::Warning,
            _ => Severity::Violation,
        }
    }

    pub fn to_iri(self) -> NamedNode {
        match self {
            Severity::Info => sh("Info"),
            Severity::Warning => sh("Warning"),
            Severity::Violation => sh("Violation"),
        }
    }
}

fn sh(local: &str) -> NamedNode {
    NamedNode::new_unchecked(format!("{SH_NS}{local}"))
}

fn component(name: &str) -> String {
    format!("{SH_NS}{name}ConstraintComponent")
}

/// Stable textual key for a focus node.
fn node_key(node: NamedOrBlankNodeRef<'_>) -> String {
    match node {
        NamedOrBlankNodeRef::NamedNode(node) => node.as_str().to_owned(),
        NamedOrBlankNodeRef::BlankNode(node) => format!("_:{}", node.as_str()),
    }
}

// =============================================================================
// Validation Result
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    /// The node that caused the finding
    focus_node: String,
    /// Predicate IRI of the property shape, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    result_path: Option<String>,
    /// Offending value in N-Triples form
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<String>,
    message: String,
    severity: Severity,
    source_shape: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    source_constraint: Option<String>,
    /// Findings on the value node for `sh:node` constraints
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    details: Vec<ValidationResult>,
}

impl ValidationResult {
    pub fn new(
        focus_node: impl Into<String>,
        message: impl Into<String>,
        severity: Severity,
        source_shape: impl Into<String>,
    ) -> Self {
        Self {
            focus_node: focus_node.into(),
            result_path: None,
            value: None,
            message: message.into(),
            severity,
            source_shape: source_shape.into(),
            source_constraint: None,
            details: Vec::new(),
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.result_path = Some(path.into());
        self
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_constraint(mut self, constraint: impl Into<String>) -> Self {
        self.source_constraint = Some(constraint.into());
        self
    }

    pub fn with_details(mut self, details: Vec<ValidationResult>) -> Self {
        self.details = details;
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn focus_node(&self) -> &str {
        &self.focus_node
    }

    pub fn result_path(&self) -> Option<&str> {
        self.result_path.as_deref()
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn source_shape(&self) -> &str {
        &self.source_shape
    }

    pub fn source_constraint(&self) -> Option<&str> {
        self.source_constraint.as_deref()
    }

    pub fn details(&self) -> &[ValidationResult] {
        &self.details
    }

    /// True when this finding or any nested detail is a violation.
    pub fn has_violation(&self) -> bool {
        self.severity == Severity::Violation || self.details.iter().any(Self::has_violation)
    }
}

// =============================================================================
// Validation Report
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    conforms: bool,
    results: Vec<ValidationResult>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self {
            conforms: true,
            results: Vec::new(),
        }
    }

    pub fn add_result(&mut self, result: ValidationResult) {
        if result.has_violation() {
            self.conforms = false;
        }
        self.results.push(result);
    }

    pub fn conforms(&self) -> bool {
        self.conforms
    }

    pub fn results(&self) -> &[ValidationResult] {
        &self.results
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn violations(&self) -> impl Iterator<Item = &ValidationResult> {
        self.results.iter().filter(|r| r.has_violation())
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ValidationResult> {
        self.results
            .iter()
            .filter(|r| r.severity == Severity::Warning)
    }

    /// Top-level findings that do not make the record invalid.
    pub fn advisories(&self) -> impl Iterator<Item = &ValidationResult> {
        self.results.iter().filter(|r| !r.has_violation())
    }

    pub fn violation_count(&self) -> usize {
        self.violations().count()
    }

    pub fn warning_count(&self) -> usize {
        self.warnings().count()
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize validation report")
    }

    /// The report as `sh:ValidationReport` statements.
    pub fn to_graph(&self) -> Graph {
        let mut graph = Graph::new();
        let report = BlankNode::default();
        graph.insert(TripleRef::new(&report, rdf::TYPE, &sh("ValidationReport")));
        graph.insert(TripleRef::new(
            &report,
            &sh("conforms"),
            &Literal::from(self.conforms),
        ));
        for result in &self.results {
            let node = result_to_graph(result, &mut graph);
            graph.insert(TripleRef::new(&report, &sh("result"), &node));
        }
        graph
    }

    pub fn to_turtle(&self) -> Result<String> {
        let mut serializer = RdfSerializer::from_format(RdfFormat::Turtle)
            .with_prefix("sh", SH_NS)
            .context("Invalid prefix")?
            .for_writer(Vec::new());
        for triple in self.to_graph().iter() {
            serializer
                .serialize_triple(triple)
                .context("Failed to serialize validation report")?;
        }
        let bytes = serializer
            .finish()
            .context("Failed to serialize validation report")?;
        String::from_utf8(bytes).context("Serialized report is not UTF-8")
    }
}

impl Default for ValidationReport {
    fn default() -> Self {
        Self::new()
    }
}

fn result_to_graph(result: &ValidationResult, graph: &mut Graph) -> BlankNode {
    let node = BlankNode::default();
    graph.insert(TripleRef::new(&node, rdf::TYPE, &sh("ValidationResult")));

    let focus: Term = match result.focus_node.strip_prefix("_:") {
        Some(_) => BlankNode::default().into(),
        None => NamedNode::new_unchecked(result.focus_node.clone()).into(),
    };
    graph.insert(TripleRef::new(&node, &sh("focusNode"), &focus));
    graph.insert(TripleRef::new(
        &node,
        &sh("resultMessage"),
        &Literal::new_simple_literal(&result.message),
    ));
    graph.insert(TripleRef::new(
        &node,
        &sh("resultSeverity"),
        &result.severity.to_iri(),
    ));
    if !result.source_shape.starts_with("_:") {
        graph.insert(TripleRef::new(
            &node,
            &sh("sourceShape"),
            &NamedNode::new_unchecked(result.source_shape.clone()),
        ));
    }
    if let Some(path) = &result.result_path {
        graph.insert(TripleRef::new(
            &node,
            &sh("resultPath"),
            &NamedNode::new_unchecked(path.clone()),
        ));
    }
    if let Some(constraint) = &result.source_constraint {
        graph.insert(TripleRef::new(
            &node,
            &sh("sourceConstraintComponent"),
            &NamedNode::new_unchecked(constraint.clone()),
        ));
    }
    if let Some(value) = &result.value {
        graph.insert(TripleRef::new(
            &node,
            &sh("value"),
            &Literal::new_simple_literal(value),
        ));
    }
    for detail in &result.details {
        let detail_node = result_to_graph(detail, graph);
        graph.insert(TripleRef::new(&node, &sh("detail"), &detail_node));
    }
    node
}

// =============================================================================
// Shapes
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeKind {
    Iri,
    BlankNode,
    Literal,
    BlankNodeOrIri,
    BlankNodeOrLiteral,
    IriOrLiteral,
}

impl NodeKind {
    fn from_iri(iri: &NamedNode) -> Option<Self> {
        let local = iri.as_str().strip_prefix(SH_NS)?;
        Some(match local {
            "IRI" => NodeKind::Iri,
            "BlankNode" => NodeKind::BlankNode,
            "Literal" => NodeKind::Literal,
            "BlankNodeOrIRI" => NodeKind::BlankNodeOrIri,
            "BlankNodeOrLiteral" => NodeKind::BlankNodeOrLiteral,
            "IRIOrLiteral" => NodeKind::IriOrLiteral,
            _ => return None,
        })
    }

    fn matches(self, term: &Term) -> bool {
        let (iri, blank, literal) = match term {
            Term::NamedNode(_) => (true, false, false),
            Term::BlankNode(_) => (false, true, false),
            Term::Literal(_) => (false, false, true),
            #[allow(unreachable_patterns)]
            _ => (false, false, false),
        };
        match self {
            NodeKind::Iri => iri,
            NodeKind::BlankNode => blank,
            NodeKind::Literal => literal,
            NodeKind::BlankNodeOrIri => blank || iri,
            NodeKind::BlankNodeOrLiteral => blank || literal,
            NodeKind::IriOrLiteral => iri || literal,
        }
    }
}

#[derive(Debug, Clone)]
struct PropertyShape {
    path: NamedNode,
    severity: Option<Severity>,
    datatype: Option<NamedNode>,
    class: Option<NamedNode>,
    node_kind: Option<NodeKind>,
    node: Option<NamedOrBlankNode>,
    min_count: Option<usize>,
    max_count: Option<usize>,
    pattern: Option<Regex>,
    min_length: Option<usize>,
    max_length: Option<usize>,
    min_inclusive: Option<f64>,
    max_inclusive: Option<f64>,
    in_values: Vec<Term>,
    unique_lang: bool,
    message: Option<String>,
}

impl PropertyShape {
    fn new(path: NamedNode) -> Self {
        Self {
            path,
            severity: None,
            datatype: None,
            class: None,
            node_kind: None,
            node: None,
            min_count: None,
            max_count: None,
            pattern: None,
            min_length: None,
            max_length: None,
            min_inclusive: None,
            max_inclusive: None,
            in_values: Vec::new(),
            unique_lang: false,
            message: None,
        }
    }

    fn message_or(&self, default: impl FnOnce() -> String) -> String {
        self.message.clone().unwrap_or_else(default)
    }
}

#[derive(Debug, Clone)]
struct NodeShape {
    id: NamedOrBlankNode,
    target_classes: Vec<NamedNode>,
    target_nodes: Vec<NamedNode>,
    target_subjects_of: Vec<NamedNode>,
    target_objects_of: Vec<NamedNode>,
    properties: Vec<PropertyShape>,
    severity: Severity,
}

impl NodeShape {
    fn new(id: NamedOrBlankNode) -> Self {
        Self {
            id,
            target_classes: Vec::new(),
            target_nodes: Vec::new(),
            target_subjects_of: Vec::new(),
            target_objects_of: Vec::new(),
            properties: Vec::new(),
            severity: Severity::Violation,
        }
    }

    fn has_targets(&self) -> bool {
        !(self.target_classes.is_empty()
            && self.target_nodes.is_empty()
            && self.target_subjects_of.is_empty()
            && self.target_objects_of.is_empty())
    }

    fn key(&self) -> String {
        node_key(self.id.as_ref())
    }

    fn applies_to(&self, node: NamedOrBlankNodeRef<'_>, data: &Graph) -> bool {
        if let NamedOrBlankNodeRef::NamedNode(named) = node {
            if self.target_nodes.iter().any(|t| t.as_ref() == named) {
                return true;
            }
        }
        if self
            .target_classes
            .iter()
            .any(|class| data.contains(TripleRef::new(node, rdf::TYPE, class)))
        {
            return true;
        }
        if self
            .target_subjects_of
            .iter()
            .any(|p| data.object_for_subject_predicate(node, p).is_some())
        {
            return true;
        }
        let object: TermRef<'_> = match node {
            NamedOrBlankNodeRef::NamedNode(node) => node.into(),
            NamedOrBlankNodeRef::BlankNode(node) => node.into(),
        };
        self.target_objects_of
            .iter()
            .any(|p| data.subject_for_predicate_object(p, object).is_some())
    }
}

// =============================================================================
// Shape Discovery
// =============================================================================

pub struct ShapeDiscovery<'a> {
    shapes_store: &'a Store,
}

impl<'a> ShapeDiscovery<'a> {
    pub fn new(shapes_store: &'a Store) -> Self {
        Self { shapes_store }
    }

    /// Every `sh:NodeShape` plus every shape referenced through `sh:node`.
    fn load_all_node_shapes(&self) -> Result<Vec<NodeShape>> {
        let mut ids: Vec<NamedOrBlankNode> = Vec::new();
        let node_shape = sh("NodeShape");

        for quad in self.shapes_store.quads_for_pattern(
            None,
            Some(rdf::TYPE),
            Some(node_shape.as_ref().into()),
            None,
        ) {
            let quad = quad?;
            if !ids.contains(&quad.subject) {
                ids.push(quad.subject);
            }
        }

        let sh_node = sh("node");
        for quad in self
            .shapes_store
            .quads_for_pattern(None, Some(sh_node.as_ref()), None, None)
        {
            let id = match quad?.object {
                Term::NamedNode(node) => NamedOrBlankNode::from(node),
                Term::BlankNode(node) => NamedOrBlankNode::from(node),
                _ => continue,
            };
            if !ids.contains(&id) {
                ids.push(id);
            }
        }

        ids.into_iter().map(|id| self.load_node_shape(id)).collect()
    }

    fn load_node_shape(&self, shape_id: NamedOrBlankNode) -> Result<NodeShape> {
        let mut shape = NodeShape::new(shape_id.clone());
        let id = shape_id.as_ref();

        if let Some(severity) = self.get_named_node_value(id, "severity")? {
            shape.severity = Severity::from_iri(severity.as_ref());
        }
        shape.target_classes = self.get_named_node_values(id, "targetClass")?;
        shape.target_nodes = self.get_named_node_values(id, "targetNode")?;
        shape.target_subjects_of = self.get_named_node_values(id, "targetSubjectsOf")?;
        shape.target_objects_of = self.get_named_node_values(id, "targetObjectsOf")?;
        shape.properties = self.load_property_shapes(id)?;

        Ok(shape)
    }

    fn load_property_shapes(&self, shape_id: NamedOrBlankNodeRef<'_>) -> Result<Vec<PropertyShape>> {
        let mut properties = Vec::new();
        let sh_property = sh("property");

        for quad in self.shapes_store.quads_for_pattern(
            Some(shape_id),
            Some(sh_property.as_ref()),
            None,
            None,
        ) {
            let prop_id = match quad?.object {
                Term::NamedNode(node) => NamedOrBlankNode::from(node),
                Term::BlankNode(node) => NamedOrBlankNode::from(node),
                _ => continue,
            };
            if let Some(prop) = self.load_property_shape(prop_id.as_ref())? {
                properties.push(prop);
            }
        }

        Ok(properties)
    }

    fn load_property_shape(&self, id: NamedOrBlankNodeRef<'_>) -> Result<Option<PropertyShape>> {
        // Only single-predicate paths are supported.
        let Some(Term::NamedNode(path)) = self.get_object(id, "path")? else {
            return Ok(None);
        };

        let mut prop = PropertyShape::new(path);
        prop.severity = self
            .get_named_node_value(id, "severity")?
            .map(|iri| Severity::from_iri(iri.as_ref()));
        prop.datatype = self.get_named_node_value(id, "datatype")?;
        prop.class = self.get_named_node_value(id, "class")?;
        prop.node_kind = self
            .get_named_node_value(id, "nodeKind")?
            .as_ref()
            .and_then(NodeKind::from_iri);
        prop.node = match self.get_object(id, "node")? {
            Some(Term::NamedNode(node)) => Some(node.into()),
            Some(Term::BlankNode(node)) => Some(node.into()),
            _ => None,
        };
        prop.min_count = self.get_integer_value(id, "minCount")?;
        prop.max_count = self.get_integer_value(id, "maxCount")?;
        prop.min_length = self.get_integer_value(id, "minLength")?;
        prop.max_length = self.get_integer_value(id, "maxLength")?;
        prop.pattern = self
            .get_string_value(id, "pattern")?
            .map(|pattern| Regex::new(&pattern).context("Invalid sh:pattern"))
            .transpose()?;
        prop.min_inclusive = self.get_number_value(id, "minInclusive")?;
        prop.max_inclusive = self.get_number_value(id, "maxInclusive")?;
        prop.message = self.get_string_value(id, "message")?;
        prop.unique_lang = self.get_string_value(id, "uniqueLang")?.as_deref() == Some("true");
        if let Some(list_head) = self.get_object(id, "in")? {
            prop.in_values = self.parse_rdf_list(list_head)?;
        }

        Ok(Some(prop))
    }

    fn get_object(&self, subject: NamedOrBlankNodeRef<'_>, local: &str) -> Result<Option<Term>> {
        let predicate = sh(local);
        match self
            .shapes_store
            .quads_for_pattern(Some(subject), Some(predicate.as_ref()), None, None)
            .next()
        {
            Some(quad) => Ok(Some(quad?.object)),
            None => Ok(None),
        }
    }

    fn get_string_value(
        &self,
        subject: NamedOrBlankNodeRef<'_>,
        local: &str,
    ) -> Result<Option<String>> {
        match self.get_object(subject, local)? {
            Some(Term::Literal(lit)) => Ok(Some(lit.value().to_owned())),
            _ => Ok(None),
        }
    }

    fn get_integer_value(
        &self,
        subject: NamedOrBlankNodeRef<'_>,
        local: &str,
    ) -> Result<Option<usize>> {
        self.get_string_value(subject, local)?
            .map(|s| s.parse::<usize>().with_context(|| format!("sh:{local} is not an integer")))
            .transpose()
    }

    fn get_number_value(
        &self,
        subject: NamedOrBlankNodeRef<'_>,
        local: &str,
    ) -> Result<Option<f64>> {
        self.get_string_value(subject, local)?
            .map(|s| s.parse::<f64>().with_context(|| format!("sh:{local} is not a number")))
            .transpose()
    }

    fn get_named_node_value(
        &self,
        subject: NamedOrBlankNodeRef<'_>,
        local: &str,
    ) -> Result<Option<NamedNode>> {
        match self.get_object(subject, local)? {
            Some(Term::NamedNode(node)) => Ok(Some(node)),
            _ => Ok(None),
        }
    }

    fn get_named_node_values(
        &self,
        subject: NamedOrBlankNodeRef<'_>,
        local: &str,
    ) -> Result<Vec<NamedNode>> {
        let predicate = sh(local);
        let mut values = Vec::new();
        for quad in
            self.shapes_store
                .quads_for_pattern(Some(subject), Some(predicate.as_ref()), None, None)
        {
            if let Term::NamedNode(node) = quad?.object {
                values.push(node);
            }
        }
        Ok(values)
    }

    fn parse_rdf_list(&self, head: Term) -> Result<Vec<Term>> {
        let mut values = Vec::new();
        let mut current = head;
        let mut seen = HashSet::new();

        while let Term::BlankNode(node) = current {
            if !seen.insert(node.clone()) {
                break;
            }
            let subject = NamedOrBlankNodeRef::from(&node);
            if let Some(quad) = self
                .shapes_store
                .quads_for_pattern(Some(subject), Some(rdf::FIRST), None, None)
                .next()
            {
                values.push(quad?.object);
            }
            match self
                .shapes_store
                .quads_for_pattern(Some(subject), Some(rdf::REST), None, None)
                .next()
            {
                Some(quad) => current = quad?.object,
                None => break,
            }
        }

        Ok(values)
    }
}

// =============================================================================
// Constraint Checker
// =============================================================================

pub struct ConstraintChecker<'a> {
    data: &'a Graph,
    shapes: &'a HashMap<String, NodeShape>,
}

impl<'a> ConstraintChecker<'a> {
    fn new(data: &'a Graph, shapes: &'a HashMap<String, NodeShape>) -> Self {
        Self { data, shapes }
    }

    fn check_shape(
        &self,
        focus_node: NamedOrBlankNodeRef<'_>,
        shape: &NodeShape,
        depth: usize,
    ) -> Vec<ValidationResult> {
        shape
            .properties
            .iter()
            .flat_map(|property| {
                let severity = property.severity.unwrap_or(shape.severity);
                self.check_property(focus_node, property, shape, depth)
                    .into_iter()
                    .map(move |result| result.with_severity(severity))
            })
            .collect()
    }

    /// Check all constraints of one property shape for a focus node.
    fn check_property(
        &self,
        focus_node: NamedOrBlankNodeRef<'_>,
        property: &PropertyShape,
        shape: &NodeShape,
        depth: usize,
    ) -> Vec<ValidationResult> {
        let mut results = Vec::new();
        let values: Vec<Term> = self
            .data
            .objects_for_subject_predicate(focus_node, &property.path)
            .map(TermRef::into_owned)
            .collect();

        let finding = |message: String, constraint: &str| {
            ValidationResult::new(node_key(focus_node), message, Severity::Violation, shape.key())
                .with_path(property.path.as_str())
                .with_constraint(component(constraint))
        };

        if let Some(min_count) = property.min_count {
            if values.len() < min_count {
                results.push(finding(
                    property.message_or(|| {
                        format!("Property {} must have at least {min_count} value(s)", property.path)
                    }),
                    "MinCount",
                ));
            }
        }

        if let Some(max_count) = property.max_count {
            if values.len() > max_count {
                results.push(finding(
                    property.message_or(|| {
                        format!("Property {} must have at most {max_count} value(s)", property.path)
                    }),
                    "MaxCount",
                ));
            }
        }

        for value in &values {
            for (message, constraint) in self.check_value(value, property) {
                results.push(finding(message, constraint).with_value(value.to_string()));
            }
            if let Some(result) = self.check_node(focus_node, value, property, shape, depth) {
                results.push(result);
            }
        }

        if property.unique_lang {
            let mut seen_langs = HashSet::new();
            for value in &values {
                if let Term::Literal(lit) = value {
                    if let Some(lang) = lit.language() {
                        if !seen_langs.insert(lang.to_ascii_lowercase()) {
                            results.push(
                                finding(
                                    property.message_or(|| {
                                        format!("Language tag {lang} is used more than once")
                                    }),
                                    "UniqueLang",
                                )
                                .with_value(value.to_string()),
                            );
                        }
                    }
                }
            }
        }

        results
    }

    /// Value-level constraints; returns `(message, component)` for each failure.
    fn check_value(&self, value: &Term, property: &PropertyShape) -> Vec<(String, &'static str)> {
        let mut failures = Vec::new();

        if let Some(expected) = &property.datatype {
            let matches = matches!(value, Term::Literal(lit) if lit.datatype() == expected.as_ref());
            if !matches {
                failures.push((
                    property.message_or(|| format!("Value must have datatype {expected}")),
                    "Datatype",
                ));
            }
        }

        if let Some(expected) = &property.class {
            let is_instance = match value {
                Term::NamedNode(node) => self.data.contains(TripleRef::new(node, rdf::TYPE, expected)),
                Term::BlankNode(node) => self.data.contains(TripleRef::new(node, rdf::TYPE, expected)),
                _ => false,
            };
            if !is_instance {
                failures.push((
                    property.message_or(|| format!("Value must be an instance of {expected}")),
                    "Class",
                ));
            }
        }

        if let Some(kind) = property.node_kind {
            if !kind.matches(value) {
                failures.push((
                    property.message_or(|| format!("Value does not have node kind {kind:?}")),
                    "NodeKind",
                ));
            }
        }

        let lexical = match value {
            Term::Literal(lit) => Some(lit.value()),
            Term::NamedNode(node) => Some(node.as_str()),
            _ => None,
        };

        if let Some(lexical) = lexical {
            if let Some(pattern) = &property.pattern {
                if !pattern.is_match(lexical) {
                    failures.push((
                        property.message_or(|| format!("Value must match pattern: {pattern}")),
                        "Pattern",
                    ));
                }
            }
            let length = lexical.chars().count();
            if let Some(min_length) = property.min_length {
                if length < min_length {
                    failures.push((
                        property.message_or(|| {
                            format!("Value must have at least {min_length} characters")
                        }),
                        "MinLength",
                    ));
                }
            }
            if let Some(max_length) = property.max_length {
                if length > max_length {
                    failures.push((
                        property.message_or(|| {
                            format!("Value must have at most {max_length} characters")
                        }),
                        "MaxLength",
                    ));
                }
            }
        }

        if let Term::Literal(lit) = value {
            let number = lit.value().parse::<f64>().ok();
            if let (Some(min), Some(number)) = (property.min_inclusive, number) {
                if number < min {
                    failures.push((
                        property.message_or(|| format!("Value must be >= {min}")),
                        "MinInclusive",
                    ));
                }
            }
            if let (Some(max), Some(number)) = (property.max_inclusive, number) {
                if number > max {
                    failures.push((
                        property.message_or(|| format!("Value must be <= {max}")),
                        "MaxInclusive",
                    ));
                }
            }
        }

        if !property.in_values.is_empty() && !property.in_values.contains(value) {
            failures.push((
                property.message_or(|| {
                    let allowed: Vec<String> =
                        property.in_values.iter().map(ToString::to_string).collect();
                    format!("Value must be one of: {}", allowed.join(", "))
                }),
                "In",
            ));
        }

        failures
    }

    /// `sh:node`: the value must conform to another shape. Its findings are
    /// kept as nested details.
    fn check_node(
        &self,
        focus_node: NamedOrBlankNodeRef<'_>,
        value: &Term,
        property: &PropertyShape,
        shape: &NodeShape,
        depth: usize,
    ) -> Option<ValidationResult> {
        let node_shape_id = property.node.as_ref()?;
        let nested = self.shapes.get(&node_key(node_shape_id.as_ref()))?;

        let value_node: NamedOrBlankNodeRef<'_> = match value {
            Term::NamedNode(node) => node.into(),
            Term::BlankNode(node) => node.into(),
            _ => {
                return Some(
                    ValidationResult::new(
                        node_key(focus_node),
                        property.message_or(|| {
                            format!("Value of {} must be a node conforming to {}", property.path, nested.key())
                        }),
                        Severity::Violation,
                        shape.key(),
                    )
                    .with_path(property.path.as_str())
                    .with_value(value.to_string())
                    .with_constraint(component("Node")),
                );
            }
        };

        let details = if depth >= MAX_NODE_DEPTH {
            vec![ValidationResult::new(
                node_key(value_node),
                "Shape nesting is too deep to validate",
                Severity::Violation,
                nested.key(),
            )]
        } else {
            self.check_shape(value_node, nested, depth + 1)
        };

        if details.is_empty() {
            return None;
        }

        Some(
            ValidationResult::new(
                node_key(focus_node),
                property.message_or(|| {
                    format!("Value of {} does not conform to {}", property.path, nested.key())
                }),
                Severity::Violation,
                shape.key(),
            )
            .with_path(property.path.as_str())
            .with_value(value.to_string())
            .with_constraint(component("Node"))
            .with_details(details),
        )
    }
}

// =============================================================================
// Shape Validator
// =============================================================================

pub struct ShapeValidator {
    shapes: HashMap<String, NodeShape>,
    /// Shapes with targets, in load order.
    targeted: Vec<String>,
}

impl ShapeValidator {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read shapes file {}", path.as_ref().display()))?;
        Self::from_turtle(&content)
    }

    pub fn from_turtle(turtle: &str) -> Result<Self> {
        let shapes_store = Store::new()?;
        shapes_store
            .load_from_reader(RdfFormat::Turtle, turtle.as_bytes())
            .context("Failed to parse shapes")?;

        let loaded = ShapeDiscovery::new(&shapes_store).load_all_node_shapes()?;
        let mut targeted: Vec<String> = loaded
            .iter()
            .filter(|shape| shape.has_targets())
            .map(NodeShape::key)
            .collect();
        targeted.sort();
        let shapes = loaded.into_iter().map(|shape| (shape.key(), shape)).collect();

        Ok(Self { shapes, targeted })
    }

    pub fn shape_count(&self) -> usize {
        self.shapes.len()
    }

    /// Validate every targeted node of a data graph.
    pub fn validate(&self, data: &Graph) -> Result<ValidationReport> {
        let mut report = ValidationReport::new();
        let checker = ConstraintChecker::new(data, &self.shapes);

        // Objects can be targets of sh:targetObjectsOf.
        let mut subjects: IndexSet<NamedOrBlankNodeRef<'_>> =
            data.iter().map(|triple| triple.subject).collect();
        subjects.extend(data.iter().filter_map(|triple| match triple.object {
            TermRef::NamedNode(node) => Some(NamedOrBlankNodeRef::from(node)),
            TermRef::BlankNode(node) => Some(NamedOrBlankNodeRef::from(node)),
            _ => None,
        }));

        for key in &self.targeted {
            let Some(shape) = self.shapes.get(key) else {
                continue;
            };
            for subject in &subjects {
                if shape.applies_to(*subject, data) {
                    for result in checker.check_shape(*subject, shape, 0) {
                        report.add_result(result);
                    }
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHAPES: &str = r#"
        @prefix sh: <http://www.w3.org/ns/shacl#> .
        @prefix ex: <https://example.org/> .
        @prefix xsd: <http://www.w3.org/2001/XMLSchema#> .

        ex:ThingShape a sh:NodeShape ;
            sh:targetClass ex:Thing ;
            sh:property [ sh:path ex:name ; sh:minCount 1 ; sh:datatype xsd:string ] ;
            sh:property [ sh:path ex:note ; sh:minCount 1 ; sh:severity sh:Warning ] ;
            sh:property [ sh:path ex:part ; sh:node ex:PartShape ; sh:nodeKind sh:BlankNodeOrIRI ; sh:severity sh:Warning ] .

        ex:PartShape
            sh:property [ sh:path ex:url ; sh:minCount 1 ] .
    "#;

    fn validator() -> ShapeValidator {
        ShapeValidator::from_turtle(SHAPES).unwrap()
    }

    fn parse_data(turtle: &str) -> Graph {
        let mut graph = Graph::new();
        for quad in oxigraph::io::RdfParser::from_format(RdfFormat::Turtle).for_slice(turtle.as_bytes()) {
            graph.insert(&Triple::from(quad.unwrap()));
        }
        graph
    }

    #[test]
    fn test_severity_conversion() {
        let iri = Severity::Violation.to_iri();
        assert_eq!(iri.as_str(), "http://www.w3.org/ns/shacl#Violation");
        assert_eq!(Severity::from_iri(iri.as_ref()), Severity::Violation);
        assert_eq!(Severity::from_iri(Severity::Warning.to_iri().as_ref()), Severity::Warning);
    }

    #[test]
    fn test_validation_report() {
        let mut report = ValidationReport::new();
        assert!(report.conforms());

        report.add_result(ValidationResult::new(
            "http://example.org/node1",
            "Test warning",
            Severity::Warning,
            "http://example.org/shape1",
        ));
        assert!(report.conforms());

        let nested = ValidationResult::new("_:b0", "inner", Severity::Violation, "_:s")
            .with_path("https://example.org/url");
        report.add_result(
            ValidationResult::new("http://example.org/node1", "outer", Severity::Warning, "_:s")
                .with_details(vec![nested]),
        );
        assert!(!report.conforms());
        assert_eq!(report.violation_count(), 1);
        assert_eq!(report.advisories().count(), 1);
    }

    #[test]
    fn referenced_shapes_are_loaded() {
        assert_eq!(validator().shape_count(), 2);
    }

    #[test]
    fn property_severity_overrides_shape_severity() {
        let validator = validator();
        let data = parse_data(r#"@prefix ex: <https://example.org/> .
                   ex:a a ex:Thing ; ex:name "A" ."#);

        let report = validator.validate(&data).unwrap();
        assert!(report.conforms());
        let paths: Vec<_> = report.results().iter().filter_map(|r| r.result_path()).collect();
        assert_eq!(paths, ["https://example.org/note"]);
        assert_eq!(report.results()[0].severity(), Severity::Warning);
    }

    #[test]
    fn nodes_seen_as_subject_and_object_are_checked_once() {
        let validator = validator();
        let data = parse_data(r#"@prefix ex: <https://example.org/> .
                   ex:a a ex:Thing ; ex:name "A" .
                   ex:b ex:rel ex:a .
                   ex:c ex:rel ex:a ."#);

        let report = validator.validate(&data).unwrap();
        assert_eq!(report.results().len(), 1);
        assert_eq!(report.results()[0].focus_node(), "https://example.org/a");
    }

    #[test]
    fn nested_violation_makes_report_non_conforming() {
        let validator = validator();
        let data = parse_data(r#"@prefix ex: <https://example.org/> .
                   ex:a a ex:Thing ; ex:name "A" ; ex:note "n" ; ex:part [ ex:label "no url" ] ."#);

        let report = validator.validate(&data).unwrap();
        assert!(!report.conforms());
        let outer = &report.results()[0];
        assert_eq!(outer.severity(), Severity::Warning);
        assert_eq!(outer.details().len(), 1);
        assert_eq!(outer.details()[0].result_path(), Some("https://example.org/url"));
    }

    #[test]
    fn wrong_datatype_is_a_violation() {
        let validator = validator();
        let data = parse_data(r#"@prefix ex: <https://example.org/> .
                   ex:a a ex:Thing ; ex:name 42 ; ex:note "n" ."#);

        let report = validator.validate(&data).unwrap();
        let violation = report.violations().next().unwrap();
        assert_eq!(
            violation.source_constraint(),
            Some("http://www.w3.org/ns/shacl#DatatypeConstraintComponent")
        );
    }

    #[test]
    fn report_renders_as_turtle() {
        let mut report = ValidationReport::new();
        report.add_result(
            ValidationResult::new("https://example.org/a", "missing", Severity::Warning, "https://example.org/S")
                .with_path("https://example.org/note"),
        );
        let turtle = report.to_turtle().unwrap();
        assert!(turtle.contains("sh:ValidationReport"));
        assert!(turtle.contains("<https://example.org/note>"));
    }
}

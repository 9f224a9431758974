//! Record validation.
//!
//! [`Validator`] is the seam between the pipeline and the shape engine. The
//! default implementation, [`ShaclValidator`], runs the bundled shapes through
//! [`shacl::ShapeValidator`].

pub mod shacl;

pub use shacl::{Severity, ValidationReport, ValidationResult};

use anyhow::{Context, Result};
use oxigraph::model::Graph;
use serde::Serialize;
use std::path::Path;

use crate::extract::record_ids;
use crate::metrics::METRICS;

/// Shapes shipped with the register.
pub const DEFAULT_SHAPES: &str = include_str!("../../shapes/register.ttl");

/// Result of validating one graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum ValidationOutcome {
    /// Conforms; `errors` holds the advisory findings.
    Valid { errors: ValidationReport },
    Invalid { errors: ValidationReport },
    /// The graph holds no dataset description at all.
    NoRecord,
}

impl ValidationOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationOutcome::Valid { .. })
    }

    pub fn errors(&self) -> Option<&ValidationReport> {
        match self {
            ValidationOutcome::Valid { errors } | ValidationOutcome::Invalid { errors } => {
                Some(errors)
            }
            ValidationOutcome::NoRecord => None,
        }
    }

    /// Label for metrics and logs.
    pub fn label(&self) -> &'static str {
        match self {
            ValidationOutcome::Valid { .. } => "valid",
            ValidationOutcome::Invalid { .. } => "invalid",
            ValidationOutcome::NoRecord => "no_record",
        }
    }
}

pub trait Validator: Send + Sync {
    fn validate(&self, graph: &Graph) -> Result<ValidationOutcome>;
}

/// SHACL-backed [`Validator`].
pub struct ShaclValidator {
    engine: shacl::ShapeValidator,
}

impl ShaclValidator {
    pub fn new(engine: shacl::ShapeValidator) -> Self {
        Self { engine }
    }

    pub fn with_default_shapes() -> Result<Self> {
        shacl::ShapeValidator::from_turtle(DEFAULT_SHAPES)
            .map(Self::new)
            .context("bundled shapes failed to load")
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        shacl::ShapeValidator::from_file(path).map(Self::new)
    }
}

impl Validator for ShaclValidator {
    fn validate(&self, graph: &Graph) -> Result<ValidationOutcome> {
        let outcome = if record_ids(graph).is_empty() {
            ValidationOutcome::NoRecord
        } else {
            let report = self.engine.validate(graph)?;
            if report.conforms() {
                ValidationOutcome::Valid { errors: report }
            } else {
                ValidationOutcome::Invalid { errors: report }
            }
        };

        METRICS.record_validation(outcome.label());
        tracing::debug!(
            outcome = outcome.label(),
            findings = outcome.errors().map_or(0, |e| e.results().len()),
            "validated graph"
        );
        Ok(outcome)
    }
}

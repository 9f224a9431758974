mod support;

use anyhow::Result;
use assert_matches::assert_matches;
use dataset_register::validate::{ShaclValidator, ValidationOutcome, Validator};
use oxigraph::io::{RdfFormat, RdfParser};
use oxigraph::model::{Graph, Triple};
use support::{complete_dataset, minimal_dataset, unlicensed_dataset};

const DATASET: &str = "https://example.org/dataset/letters";

fn parse(turtle: &str) -> Result<Graph> {
    let mut graph = Graph::new();
    for quad in RdfParser::from_format(RdfFormat::Turtle).for_slice(turtle.as_bytes()) {
        graph.insert(&Triple::from(quad?));
    }
    Ok(graph)
}

#[test]
fn warnings_alone_keep_a_description_valid() -> Result<()> {
    let validator = ShaclValidator::with_default_shapes()?;
    let outcome = validator.validate(&parse(&minimal_dataset(DATASET))?)?;

    let ValidationOutcome::Valid { errors } = outcome else {
        panic!("expected a valid outcome, got {outcome:?}");
    };
    assert!(errors.conforms());
    assert_eq!(errors.violation_count(), 0);
    assert!(errors.warning_count() >= 5);
    Ok(())
}

#[test]
fn complete_description_has_no_findings() -> Result<()> {
    let validator = ShaclValidator::with_default_shapes()?;
    let outcome = validator.validate(&parse(&complete_dataset(DATASET))?)?;
    assert_matches!(outcome, ValidationOutcome::Valid { errors } if errors.is_empty());
    Ok(())
}

#[test]
fn missing_license_is_a_violation() -> Result<()> {
    let validator = ShaclValidator::with_default_shapes()?;
    let outcome = validator.validate(&parse(&unlicensed_dataset(DATASET))?)?;

    let ValidationOutcome::Invalid { errors } = outcome else {
        panic!("expected an invalid outcome, got {outcome:?}");
    };
    let paths: Vec<_> = errors.violations().filter_map(|r| r.result_path()).collect();
    assert_eq!(paths, ["https://schema.org/license"]);
    Ok(())
}

#[test]
fn nested_violation_under_a_warning_makes_the_description_invalid() -> Result<()> {
    let turtle = format!(
        r#"{}
        @prefix schema: <https://schema.org/> .
        <{DATASET}> schema:distribution [ a schema:DataDownload ; schema:encodingFormat "text/csv" ] .
        "#,
        minimal_dataset(DATASET)
    );
    let validator = ShaclValidator::with_default_shapes()?;
    let outcome = validator.validate(&parse(&turtle)?)?;

    let ValidationOutcome::Invalid { errors } = outcome else {
        panic!("expected an invalid outcome, got {outcome:?}");
    };
    let distribution = errors
        .violations()
        .find(|r| r.result_path() == Some("https://schema.org/distribution"))
        .expect("distribution finding");
    assert!(
        distribution
            .details()
            .iter()
            .any(|d| d.result_path() == Some("https://schema.org/contentUrl"))
    );
    Ok(())
}

#[test]
fn publisher_without_name_is_invalid() -> Result<()> {
    let turtle = format!(
        r#"
        @prefix schema: <https://schema.org/> .
        <{DATASET}> a schema:Dataset ;
            schema:name "Letters" ;
            schema:license <https://creativecommons.org/licenses/by/4.0/> ;
            schema:publisher [ a schema:Organization ] .
        "#
    );
    let validator = ShaclValidator::with_default_shapes()?;
    let outcome = validator.validate(&parse(&turtle)?)?;
    assert!(!outcome.is_valid());
    Ok(())
}

#[test]
fn graph_without_datasets_holds_no_record() -> Result<()> {
    let validator = ShaclValidator::with_default_shapes()?;
    let graph = parse("<https://example.org/a> <https://schema.org/name> \"a\" .")?;
    assert_eq!(validator.validate(&graph)?, ValidationOutcome::NoRecord);
    Ok(())
}

#[test]
fn report_renders_as_turtle() -> Result<()> {
    let validator = ShaclValidator::with_default_shapes()?;
    let outcome = validator.validate(&parse(&unlicensed_dataset(DATASET))?)?;
    let errors = outcome.errors().expect("report");

    let turtle = errors.to_turtle()?;
    assert!(turtle.contains("ValidationReport"));
    let reparsed = parse(&turtle)?;
    assert_eq!(reparsed.len(), errors.to_graph().len());
    Ok(())
}

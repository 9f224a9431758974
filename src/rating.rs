//! Deterministic quality rating of valid records.
//!
//! A rating starts at 100 and loses the weight of every penalty rule whose
//! paths are all among the paths flagged by advisory findings.

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::validate::ValidationReport;
use crate::vocab::{dcat, dct};

pub const BEST_RATING: u32 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Penalty {
    pub path: String,
    pub score: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rating {
    pub score: u32,
    pub worst_rating: u32,
    pub best_rating: u32,
    pub explanation: String,
    pub penalties: Vec<Penalty>,
}

/// A group of paths that is penalized once, when all of them are missing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PenaltyRule {
    paths: Vec<String>,
    weight: u32,
}

impl PenaltyRule {
    pub fn new<I, S>(paths: I, weight: u32) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
            weight,
        }
    }

    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    fn applies(&self, violated: &IndexSet<&str>) -> bool {
        !self.paths.is_empty() && self.paths.iter().all(|p| violated.contains(p.as_str()))
    }
}

#[derive(Debug, Clone)]
pub struct RatingEngine {
    rules: Vec<PenaltyRule>,
}

impl Default for RatingEngine {
    fn default() -> Self {
        Self::new(vec![
            PenaltyRule::new([dct("description")], 20),
            PenaltyRule::new([dcat("distribution")], 20),
            PenaltyRule::new([dct("creator")], 10),
            PenaltyRule::new([dct("created"), dct("issued")], 10),
            PenaltyRule::new([dct("modified")], 5),
            PenaltyRule::new([dcat("keyword"), dct("spatial"), dct("temporal")], 5),
            PenaltyRule::new([dct("language")], 5),
        ])
    }
}

impl RatingEngine {
    pub fn new(rules: Vec<PenaltyRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[PenaltyRule] {
        &self.rules
    }

    pub fn worst_rating(&self) -> u32 {
        BEST_RATING.saturating_sub(self.rules.iter().map(PenaltyRule::weight).sum())
    }

    /// Rate the advisory findings of a valid record.
    pub fn rate(&self, report: &ValidationReport) -> Rating {
        let violated: IndexSet<&str> = report
            .advisories()
            .filter_map(|result| result.result_path())
            .collect();

        let penalties: Vec<Penalty> = self
            .rules
            .iter()
            .filter(|rule| rule.applies(&violated))
            .map(|rule| Penalty {
                path: rule.paths[0].clone(),
                score: rule.weight,
            })
            .collect();

        let lost: u32 = penalties.iter().map(|p| p.score).sum();
        let explanation = penalties
            .iter()
            .map(|p| p.path.as_str())
            .collect::<Vec<_>>()
            .join(", ");

        Rating {
            score: BEST_RATING.saturating_sub(lost),
            worst_rating: self.worst_rating(),
            best_rating: BEST_RATING,
            explanation,
            penalties,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::{Severity, ValidationResult};
    use crate::vocab::DCT_NS;
    use proptest::prelude::*;

    fn report(paths: &[&str]) -> ValidationReport {
        let mut report = ValidationReport::new();
        for path in paths {
            report.add_result(
                ValidationResult::new("https://example.org/d", "missing", Severity::Warning, "_:s")
                    .with_path(*path),
            );
        }
        report
    }

    fn all_rule_paths() -> Vec<String> {
        RatingEngine::default()
            .rules()
            .iter()
            .flat_map(|r| r.paths().to_vec())
            .collect()
    }

    #[test]
    fn default_rules_have_expected_worst_rating() {
        assert_eq!(RatingEngine::default().worst_rating(), 25);
    }

    #[test]
    fn no_findings_is_best_rating() {
        let rating = RatingEngine::default().rate(&report(&[]));
        assert_eq!(rating.score, 100);
        assert!(rating.explanation.is_empty());
        assert!(rating.penalties.is_empty());
    }

    #[test]
    fn all_paths_missing_is_worst_rating() {
        let paths = all_rule_paths();
        let refs: Vec<&str> = paths.iter().map(String::as_str).collect();
        let rating = RatingEngine::default().rate(&report(&refs));
        assert_eq!(rating.score, rating.worst_rating);
        assert_eq!(rating.score, 25);
        assert_eq!(rating.penalties.len(), 7);
    }

    #[test]
    fn multi_path_rule_needs_every_path() {
        let created = format!("{DCT_NS}created");
        let issued = format!("{DCT_NS}issued");

        let only_created = RatingEngine::default().rate(&report(&[created.as_str()]));
        assert_eq!(only_created.score, 100);

        let both = RatingEngine::default().rate(&report(&[created.as_str(), issued.as_str()]));
        assert_eq!(both.score, 90);
        assert_eq!(both.explanation, created);
    }

    #[test]
    fn explanation_follows_rule_order() {
        let language = format!("{DCT_NS}language");
        let description = format!("{DCT_NS}description");
        let rating = RatingEngine::default().rate(&report(&[language.as_str(), description.as_str()]));
        assert_eq!(rating.score, 75);
        assert_eq!(rating.explanation, format!("{description}, {language}"));
    }

    #[test]
    fn violations_do_not_count_as_advisories() {
        let mut report = ValidationReport::new();
        report.add_result(
            ValidationResult::new("https://example.org/d", "missing", Severity::Violation, "_:s")
                .with_path(format!("{DCT_NS}description")),
        );
        assert_eq!(RatingEngine::default().rate(&report).score, 100);
    }

    proptest! {
        #[test]
        fn rating_is_deterministic_and_bounded(mask in proptest::collection::vec(any::<bool>(), 10)) {
            let paths = all_rule_paths();
            let chosen: Vec<&str> = paths
                .iter()
                .zip(mask)
                .filter(|(_, keep)| *keep)
                .map(|(p, _)| p.as_str())
                .collect();
            let engine = RatingEngine::default();
            let first = engine.rate(&report(&chosen));
            let second = engine.rate(&report(&chosen));

            prop_assert_eq!(&first, &second);
            prop_assert!(first.score >= first.worst_rating && first.score <= first.best_rating);
            let lost: u32 = first.penalties.iter().map(|p| p.score).sum();
            prop_assert_eq!(first.score, 100 - lost);
        }
    }
}

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::{
    canonical::{canonical_id_for_statement, normalize_statement},
    config::SessionConfig,
    domain::hypothesis::{RootSeed, H_NOA_ID, H_UND_ID},
};

const VAGUE_MARKERS: [&str; 6] = [
    "something",
    "somehow",
    "some reason",
    "unknown reasons",
    "unclear",
    "etc",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationIssueCode {
    EmptyStatement,
    VagueStatement,
    MissingExclusionClause,
    DuplicateCanonicalId,
    ReservedRootId,
    StandaloneHypothesis,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub code: ValidationIssueCode,
    pub root_id: String,
    pub detail: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Pre-credit screening for anti-vagueness and standalone-hypothesis
/// problems. Nothing here spends credits or touches a port.
pub fn validate_hypothesis_set(seeds: &[RootSeed], _config: &SessionConfig) -> ValidationReport {
    let mut issues = Vec::new();
    let mut seen_canonical: BTreeSet<String> = BTreeSet::new();

    for seed in seeds {
        let normalized = normalize_statement(&seed.statement);
        if normalized.is_empty() {
            issues.push(ValidationIssue {
                code: ValidationIssueCode::EmptyStatement,
                root_id: seed.root_id.clone(),
                detail: "statement normalizes to the empty string".to_string(),
            });
            continue;
        }
        if normalized.split(' ').count() < 2 {
            issues.push(ValidationIssue {
                code: ValidationIssueCode::VagueStatement,
                root_id: seed.root_id.clone(),
                detail: "statement is a single token; name a mechanism, not a label".to_string(),
            });
        }
        if let Some(marker) = VAGUE_MARKERS
            .iter()
            .find(|marker| normalized.contains(*marker))
        {
            issues.push(ValidationIssue {
                code: ValidationIssueCode::VagueStatement,
                root_id: seed.root_id.clone(),
                detail: format!("statement leans on the vague marker '{marker}'"),
            });
        }
        if seed.exclusion_clause.trim().is_empty() {
            issues.push(ValidationIssue {
                code: ValidationIssueCode::MissingExclusionClause,
                root_id: seed.root_id.clone(),
                detail: "every named root needs an exclusion clause".to_string(),
            });
        }
        if seed.root_id == H_NOA_ID || seed.root_id == H_UND_ID {
            issues.push(ValidationIssue {
                code: ValidationIssueCode::ReservedRootId,
                root_id: seed.root_id.clone(),
                detail: "absorber ids are reserved".to_string(),
            });
        }
        let canonical_id = canonical_id_for_statement(&seed.statement);
        if !seen_canonical.insert(canonical_id) {
            issues.push(ValidationIssue {
                code: ValidationIssueCode::DuplicateCanonicalId,
                root_id: seed.root_id.clone(),
                detail: "statement collides with another root after normalization".to_string(),
            });
        }
    }

    if seeds.len() == 1 {
        issues.push(ValidationIssue {
            code: ValidationIssueCode::StandaloneHypothesis,
            root_id: seeds[0].root_id.clone(),
            detail: "a single named root cannot be contrasted; add rivals or absorber-only scoping"
                .to_string(),
        });
    }

    ValidationReport { issues }
}

#[cfg(test)]
mod tests {
    use super::{validate_hypothesis_set, ValidationIssueCode};
    use crate::{config::SessionConfig, domain::hypothesis::RootSeed};

    fn seed(root_id: &str, statement: &str, exclusion: &str) -> RootSeed {
        RootSeed {
            root_id: root_id.to_string(),
            statement: statement.to_string(),
            exclusion_clause: exclusion.to_string(),
            components: Vec::new(),
            story_cardinality: None,
        }
    }

    #[test]
    fn a_clean_pair_of_roots_passes() {
        let report = validate_hypothesis_set(
            &[
                seed("H1", "Fuel starvation in the left tank", "Not an ignition fault"),
                seed("H2", "Ignition coil failure", "Not a fuel fault"),
            ],
            &SessionConfig::default(),
        );
        assert!(report.is_clean());
    }

    #[test]
    fn vague_markers_are_surfaced() {
        let report = validate_hypothesis_set(
            &[
                seed("H1", "Something went wrong somehow", "Not the others"),
                seed("H2", "Ignition coil failure", "Not a fuel fault"),
            ],
            &SessionConfig::default(),
        );
        assert!(report
            .issues
            .iter()
            .any(|issue| issue.code == ValidationIssueCode::VagueStatement));
    }

    #[test]
    fn missing_exclusion_clause_is_an_issue() {
        let report = validate_hypothesis_set(
            &[
                seed("H1", "Fuel starvation in the left tank", ""),
                seed("H2", "Ignition coil failure", "Not a fuel fault"),
            ],
            &SessionConfig::default(),
        );
        assert!(report
            .issues
            .iter()
            .any(|issue| issue.code == ValidationIssueCode::MissingExclusionClause));
    }

    #[test]
    fn a_standalone_hypothesis_is_flagged() {
        let report = validate_hypothesis_set(
            &[seed("H1", "Fuel starvation in the left tank", "Not the rest")],
            &SessionConfig::default(),
        );
        assert!(report
            .issues
            .iter()
            .any(|issue| issue.code == ValidationIssueCode::StandaloneHypothesis));
    }

    #[test]
    fn duplicate_statements_collide_on_canonical_id() {
        let report = validate_hypothesis_set(
            &[
                seed("H1", "Fuel starvation", "Not ignition"),
                seed("H2", "  FUEL   starvation. ", "Not ignition either"),
            ],
            &SessionConfig::default(),
        );
        assert!(report
            .issues
            .iter()
            .any(|issue| issue.code == ValidationIssueCode::DuplicateCanonicalId));
    }
}

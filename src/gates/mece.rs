use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::{hypothesis::HypothesisSet, types::pair_key};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeceAssessment {
    pub left_root_id: String,
    pub right_root_id: String,
    pub overlap_score: u8,
    #[serde(default)]
    pub discriminator: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeceIssueCode {
    PairOverlapExceedsThreshold,
    MissingDiscriminator,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeceIssue {
    pub code: MeceIssueCode,
    pub left_root_id: String,
    pub right_root_id: String,
    pub detail: String,
}

/// Certifies mutual exclusivity over every unordered named-root pair.
/// Assessed pairs must sit at or under the overlap threshold and carry a
/// discriminator; unassessed pairs fall back to the roots' exclusion
/// clauses. The returned issue list is empty iff the certificate holds.
pub fn check_mece_certificate(
    set: &HypothesisSet,
    assessments: &[MeceAssessment],
    max_pair_overlap: u8,
) -> Vec<MeceIssue> {
    let mut by_pair: BTreeMap<String, &MeceAssessment> = BTreeMap::new();
    for assessment in assessments {
        let (Some(left), Some(right)) = (
            set.roots.get(&assessment.left_root_id),
            set.roots.get(&assessment.right_root_id),
        ) else {
            continue;
        };
        by_pair.insert(pair_key(&left.canonical_id, &right.canonical_id), assessment);
    }

    let named = set.named_in_canonical_order();
    let mut issues = Vec::new();
    for (index, left_id) in named.iter().enumerate() {
        for right_id in &named[index + 1..] {
            let left = &set.roots[left_id];
            let right = &set.roots[right_id];
            let key = pair_key(&left.canonical_id, &right.canonical_id);

            match by_pair.get(&key) {
                Some(assessment) => {
                    if assessment.overlap_score > max_pair_overlap {
                        issues.push(MeceIssue {
                            code: MeceIssueCode::PairOverlapExceedsThreshold,
                            left_root_id: left_id.clone(),
                            right_root_id: right_id.clone(),
                            detail: format!(
                                "overlap score {} exceeds threshold {}",
                                assessment.overlap_score, max_pair_overlap
                            ),
                        });
                    }
                    if assessment.discriminator.trim().is_empty() {
                        issues.push(MeceIssue {
                            code: MeceIssueCode::MissingDiscriminator,
                            left_root_id: left_id.clone(),
                            right_root_id: right_id.clone(),
                            detail: "assessed pair has an empty discriminator".to_string(),
                        });
                    }
                }
                None => {
                    if left.exclusion_clause.trim().is_empty()
                        || right.exclusion_clause.trim().is_empty()
                    {
                        issues.push(MeceIssue {
                            code: MeceIssueCode::MissingDiscriminator,
                            left_root_id: left_id.clone(),
                            right_root_id: right_id.clone(),
                            detail: "no assessment and at least one empty exclusion clause"
                                .to_string(),
                        });
                    }
                }
            }
        }
    }
    issues
}

#[cfg(test)]
mod tests {
    use super::{check_mece_certificate, MeceAssessment, MeceIssueCode};
    use crate::{
        config::SessionConfig,
        domain::hypothesis::{HypothesisSet, RootSeed},
    };

    fn two_roots() -> HypothesisSet {
        let seeds: Vec<RootSeed> = ["Alpha mechanism", "Beta mechanism"]
            .iter()
            .enumerate()
            .map(|(index, statement)| RootSeed {
                root_id: format!("H{}", index + 1),
                statement: statement.to_string(),
                exclusion_clause: format!("Not {statement}"),
                components: Vec::new(),
                story_cardinality: None,
            })
            .collect();
        HypothesisSet::bootstrap(&seeds, &SessionConfig::default()).expect("bootstrap succeeds")
    }

    #[test]
    fn clean_pairs_certify() {
        let set = two_roots();
        let issues = check_mece_certificate(
            &set,
            &[MeceAssessment {
                left_root_id: "H1".to_string(),
                right_root_id: "H2".to_string(),
                overlap_score: 0,
                discriminator: "fuel state separates the two".to_string(),
            }],
            0,
        );
        assert!(issues.is_empty());
    }

    #[test]
    fn overlap_beyond_threshold_is_a_typed_issue() {
        let set = two_roots();
        let issues = check_mece_certificate(
            &set,
            &[MeceAssessment {
                left_root_id: "H1".to_string(),
                right_root_id: "H2".to_string(),
                overlap_score: 2,
                discriminator: "weak".to_string(),
            }],
            0,
        );
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].code, MeceIssueCode::PairOverlapExceedsThreshold);
    }

    #[test]
    fn unassessed_pairs_fall_back_to_exclusion_clauses() {
        let set = two_roots();
        assert!(check_mece_certificate(&set, &[], 0).is_empty());
    }

    #[test]
    fn empty_discriminator_fails_the_certificate() {
        let set = two_roots();
        let issues = check_mece_certificate(
            &set,
            &[MeceAssessment {
                left_root_id: "H1".to_string(),
                right_root_id: "H2".to_string(),
                overlap_score: 0,
                discriminator: "   ".to_string(),
            }],
            0,
        );
        assert_eq!(issues[0].code, MeceIssueCode::MissingDiscriminator);
    }
}

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    canonical::normalize_quote,
    config::QuoteFidelityMode,
    domain::types::{
        DiscriminatorDirection, DiscriminatorRecord, EvidenceBundle, EvidenceId, PairKey,
    },
};

/// Session-scoped record of which direction each evidence id has been used
/// in, per pair. A later use in the opposite direction invalidates the
/// offending discriminator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiscriminatorLedger {
    directions: BTreeMap<(EvidenceId, PairKey), DiscriminatorDirection>,
}

impl DiscriminatorLedger {
    pub fn conflicts(
        &self,
        evidence_id: &str,
        pair: &str,
        direction: DiscriminatorDirection,
    ) -> bool {
        self.directions
            .get(&(evidence_id.to_string(), pair.to_string()))
            .is_some_and(|prior| *prior != direction)
    }

    pub fn commit(&mut self, evidence_id: &str, pair: &str, direction: DiscriminatorDirection) {
        self.directions
            .entry((evidence_id.to_string(), pair.to_string()))
            .or_insert(direction);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscriminatorRejection {
    pub record_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteFinding {
    pub record_id: String,
    pub matched: bool,
    pub blocked: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiscriminatorValidation {
    pub accepted: Vec<DiscriminatorRecord>,
    pub rejections: Vec<DiscriminatorRejection>,
    pub quote_findings: Vec<QuoteFinding>,
}

/// Validates typed discriminator payloads against the bound pair, the
/// evidence bundle, and the directional-use ledger. Accepted records are
/// committed to the ledger; everything else is dropped with a typed reason.
pub fn validate_discriminators(
    records: &[DiscriminatorRecord],
    bound_pair: Option<&PairKey>,
    evidence: &EvidenceBundle,
    ledger: &mut DiscriminatorLedger,
    quote_mode: QuoteFidelityMode,
) -> DiscriminatorValidation {
    let mut outcome = DiscriminatorValidation::default();

    for record in records {
        if record.id.trim().is_empty() {
            outcome.rejections.push(DiscriminatorRejection {
                record_id: record.id.clone(),
                reason: "discriminator id is empty".to_string(),
            });
            continue;
        }
        if let Some(pair) = bound_pair {
            if &record.pair_key != pair {
                outcome.rejections.push(DiscriminatorRejection {
                    record_id: record.id.clone(),
                    reason: format!(
                        "discriminator pair '{}' does not match the bound pair '{}'",
                        record.pair_key, pair
                    ),
                });
                continue;
            }
        }
        if record.evidence_ids.is_empty() {
            outcome.rejections.push(DiscriminatorRejection {
                record_id: record.id.clone(),
                reason: "discriminator references no evidence ids".to_string(),
            });
            continue;
        }
        if let Some(missing) = record
            .evidence_ids
            .iter()
            .find(|evidence_id| !evidence.contains(evidence_id))
        {
            outcome.rejections.push(DiscriminatorRejection {
                record_id: record.id.clone(),
                reason: format!("referenced evidence id '{missing}' is not in the bundle"),
            });
            continue;
        }
        if let Some(conflicting) = record
            .evidence_ids
            .iter()
            .find(|evidence_id| ledger.conflicts(evidence_id, &record.pair_key, record.direction))
        {
            outcome.rejections.push(DiscriminatorRejection {
                record_id: record.id.clone(),
                reason: format!(
                    "evidence id '{conflicting}' was already used in the opposite direction for this pair"
                ),
            });
            continue;
        }

        if let Some(quote) = &record.quote {
            let matched = quote_matches_evidence(quote, &record.evidence_ids, evidence);
            let blocked = !matched && quote_mode == QuoteFidelityMode::Strict;
            outcome.quote_findings.push(QuoteFinding {
                record_id: record.id.clone(),
                matched,
                blocked,
            });
            if blocked {
                continue;
            }
        }

        for evidence_id in &record.evidence_ids {
            ledger.commit(evidence_id, &record.pair_key, record.direction);
        }
        outcome.accepted.push(record.clone());
    }

    outcome
}

fn quote_matches_evidence(
    quote: &str,
    evidence_ids: &[EvidenceId],
    evidence: &EvidenceBundle,
) -> bool {
    let normalized_quote = normalize_quote(quote);
    if normalized_quote.is_empty() {
        return false;
    }
    evidence_ids.iter().any(|evidence_id| {
        evidence
            .text_of(evidence_id)
            .map(normalize_quote)
            .is_some_and(|text| text.contains(&normalized_quote))
    })
}

#[cfg(test)]
mod tests {
    use super::{validate_discriminators, DiscriminatorLedger};
    use crate::{
        config::QuoteFidelityMode,
        domain::types::{
            DiscriminatorDirection, DiscriminatorKind, DiscriminatorRecord, EvidenceBundle,
            EvidenceItem,
        },
    };

    fn bundle() -> EvidenceBundle {
        let mut bundle = EvidenceBundle::default();
        bundle.items.insert(
            "ev1".to_string(),
            EvidenceItem {
                id: "ev1".to_string(),
                text: "The fuel valve was found closed after recovery.".to_string(),
                source: None,
            },
        );
        bundle
    }

    fn record(id: &str, direction: DiscriminatorDirection, quote: Option<&str>) -> DiscriminatorRecord {
        DiscriminatorRecord {
            id: id.to_string(),
            pair_key: "pair:hyp:a|hyp:b".to_string(),
            direction,
            kind: DiscriminatorKind::Support,
            evidence_ids: vec!["ev1".to_string()],
            quote: quote.map(str::to_string),
        }
    }

    #[test]
    fn a_well_formed_record_is_accepted_and_committed() {
        let mut ledger = DiscriminatorLedger::default();
        let outcome = validate_discriminators(
            &[record("d1", DiscriminatorDirection::Left, None)],
            Some(&"pair:hyp:a|hyp:b".to_string()),
            &bundle(),
            &mut ledger,
            QuoteFidelityMode::Advisory,
        );
        assert_eq!(outcome.accepted.len(), 1);
        assert!(outcome.rejections.is_empty());
        assert!(ledger.conflicts("ev1", "pair:hyp:a|hyp:b", DiscriminatorDirection::Right));
    }

    #[test]
    fn pair_mismatch_is_rejected_under_authoritative_binding() {
        let mut ledger = DiscriminatorLedger::default();
        let outcome = validate_discriminators(
            &[record("d1", DiscriminatorDirection::Left, None)],
            Some(&"pair:hyp:a|hyp:c".to_string()),
            &bundle(),
            &mut ledger,
            QuoteFidelityMode::Advisory,
        );
        assert!(outcome.accepted.is_empty());
        assert!(outcome.rejections[0].reason.contains("bound pair"));
    }

    #[test]
    fn unknown_evidence_ids_are_rejected() {
        let mut ledger = DiscriminatorLedger::default();
        let mut bad = record("d1", DiscriminatorDirection::Left, None);
        bad.evidence_ids = vec!["ev-missing".to_string()];
        let outcome = validate_discriminators(
            &[bad],
            None,
            &bundle(),
            &mut ledger,
            QuoteFidelityMode::Advisory,
        );
        assert!(outcome.rejections[0].reason.contains("ev-missing"));
    }

    #[test]
    fn conflicting_directional_reuse_invalidates_the_later_record() {
        let mut ledger = DiscriminatorLedger::default();
        let first = validate_discriminators(
            &[record("d1", DiscriminatorDirection::Left, None)],
            None,
            &bundle(),
            &mut ledger,
            QuoteFidelityMode::Advisory,
        );
        assert_eq!(first.accepted.len(), 1);

        let second = validate_discriminators(
            &[record("d2", DiscriminatorDirection::Right, None)],
            None,
            &bundle(),
            &mut ledger,
            QuoteFidelityMode::Advisory,
        );
        assert!(second.accepted.is_empty());
        assert!(second.rejections[0].reason.contains("opposite direction"));
    }

    #[test]
    fn strict_mode_blocks_a_mismatched_quote() {
        let mut ledger = DiscriminatorLedger::default();
        let outcome = validate_discriminators(
            &[record(
                "d1",
                DiscriminatorDirection::Left,
                Some("the valve was wide open"),
            )],
            None,
            &bundle(),
            &mut ledger,
            QuoteFidelityMode::Strict,
        );
        assert!(outcome.accepted.is_empty());
        assert!(outcome.quote_findings[0].blocked);
    }

    #[test]
    fn advisory_mode_keeps_the_record_but_flags_it() {
        let mut ledger = DiscriminatorLedger::default();
        let outcome = validate_discriminators(
            &[record(
                "d1",
                DiscriminatorDirection::Left,
                Some("the valve was wide open"),
            )],
            None,
            &bundle(),
            &mut ledger,
            QuoteFidelityMode::Advisory,
        );
        assert_eq!(outcome.accepted.len(), 1);
        assert!(!outcome.quote_findings[0].matched);
        assert!(!outcome.quote_findings[0].blocked);
    }

    #[test]
    fn typographic_variants_of_a_faithful_quote_match() {
        let mut ledger = DiscriminatorLedger::default();
        let outcome = validate_discriminators(
            &[record(
                "d1",
                DiscriminatorDirection::Left,
                Some("fuel valve was found\u{00A0}closed"),
            )],
            None,
            &bundle(),
            &mut ledger,
            QuoteFidelityMode::Strict,
        );
        assert_eq!(outcome.accepted.len(), 1);
        assert!(outcome.quote_findings[0].matched);
    }
}

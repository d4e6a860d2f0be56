use serde::{Deserialize, Serialize};

pub type RootId = String;
pub type NodeKey = String;
pub type CanonicalId = String;
pub type PairKey = String;
pub type EvidenceId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RootStatus {
    Unscoped,
    Scoped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeRole {
    Nec,
    Evid,
    Unscoped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecompType {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Entailment {
    Supports,
    Contradicts,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationKind {
    Decompose,
    Evaluate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StopReason {
    CreditsExhausted,
    FrontierConfident,
    ClosureGatesUnmet,
    EpistemicallyExhausted,
    MeceCertificateFailed,
    PolicyConfigIncompatible,
    NoLegalOp,
    ContenderSpaceInvalid,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscriminatorKind {
    Absence,
    Support,
    Contradiction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscriminatorDirection {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PairVerdict {
    FavorsLeft,
    FavorsRight,
    Unresolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CertificationStatus {
    Certified,
    Abstain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rubric {
    pub a: u8,
    pub b: u8,
    pub c: u8,
    pub d: u8,
}

impl Rubric {
    pub fn new(a: u8, b: u8, c: u8, d: u8) -> Self {
        Self { a, b, c, d }
    }

    pub fn total(&self) -> u8 {
        self.a + self.b + self.c + self.d
    }

    pub fn has_zero_score(&self) -> bool {
        self.a == 0 || self.b == 0 || self.c == 0 || self.d == 0
    }

    pub fn is_in_range(&self) -> bool {
        [self.a, self.b, self.c, self.d]
            .iter()
            .all(|score| *score <= 2)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscriminatorRecord {
    pub id: String,
    pub pair_key: PairKey,
    pub direction: DiscriminatorDirection,
    pub kind: DiscriminatorKind,
    #[serde(default)]
    pub evidence_ids: Vec<EvidenceId>,
    #[serde(default)]
    pub quote: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub id: EvidenceId,
    pub text: String,
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvidenceBundle {
    #[serde(default)]
    pub items: std::collections::BTreeMap<EvidenceId, EvidenceItem>,
}

impl EvidenceBundle {
    pub fn contains(&self, evidence_id: &str) -> bool {
        self.items.contains_key(evidence_id)
    }

    pub fn text_of(&self, evidence_id: &str) -> Option<&str> {
        self.items.get(evidence_id).map(|item| item.text.as_str())
    }
}

/// Unordered pair key over canonical ids; both orderings map to one key.
pub fn pair_key(left_canonical: &str, right_canonical: &str) -> PairKey {
    if left_canonical <= right_canonical {
        format!("pair:{}|{}", left_canonical, right_canonical)
    } else {
        format!("pair:{}|{}", right_canonical, left_canonical)
    }
}

#[cfg(test)]
mod tests {
    use super::{pair_key, Rubric, StopReason};

    #[test]
    fn pair_key_is_order_independent() {
        assert_eq!(pair_key("hyp:a", "hyp:b"), pair_key("hyp:b", "hyp:a"));
    }

    #[test]
    fn rubric_totals_and_guardrail_flags() {
        let rubric = Rubric::new(2, 2, 0, 1);
        assert_eq!(rubric.total(), 5);
        assert!(rubric.has_zero_score());
        assert!(rubric.is_in_range());
        assert!(!Rubric::new(2, 2, 2, 2).has_zero_score());
        assert!(!Rubric::new(3, 0, 0, 0).is_in_range());
    }

    #[test]
    fn stop_reasons_serialize_to_the_closed_enumeration() {
        let encoded = serde_json::to_string(&StopReason::MeceCertificateFailed)
            .expect("stop reason serializes");
        assert_eq!(encoded, "\"MECE_CERTIFICATE_FAILED\"");
    }
}

use crate::domain::types::{DecompType, Rubric};

pub const ZERO_SCORE_CAP: f64 = 0.55;
pub const UNSCOPED_CHILD_CAP: f64 = 0.40;

const K_TABLE: [(u8, f64); 5] = [(0, 0.15), (2, 0.35), (4, 0.55), (6, 0.75), (8, 0.90)];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KDerivation {
    pub k: f64,
    pub guardrail_triggered: bool,
}

/// Maps a rubric total onto the fixed k table, interpolating odd totals.
/// Any individual zero score caps the result at 0.55.
pub fn rubric_to_k(rubric: &Rubric) -> KDerivation {
    let total = rubric.total().min(8);
    let base = interpolate_total(total);
    if rubric.has_zero_score() && base > ZERO_SCORE_CAP {
        KDerivation {
            k: ZERO_SCORE_CAP,
            guardrail_triggered: true,
        }
    } else {
        KDerivation {
            k: base,
            guardrail_triggered: false,
        }
    }
}

fn interpolate_total(total: u8) -> f64 {
    for window in K_TABLE.windows(2) {
        let (lo_total, lo_k) = window[0];
        let (hi_total, hi_k) = window[1];
        if total == lo_total {
            return lo_k;
        }
        if total < hi_total {
            let span = (hi_total - lo_total) as f64;
            let offset = (total - lo_total) as f64;
            return lo_k + (hi_k - lo_k) * offset / span;
        }
    }
    K_TABLE[K_TABLE.len() - 1].1
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChildConfidence {
    pub canonical_id: String,
    pub p: f64,
    pub k: f64,
    pub guardrail_triggered: bool,
    pub unscoped: bool,
}

/// Parent confidence after decomposition. AND takes the weakest child; OR
/// takes the child that carries the max p (canonical-id tie-break) and
/// inherits its guardrail flag. Any UNSCOPED child caps the parent at 0.40.
pub fn propagate_parent_k(decomp: DecompType, children: &[ChildConfidence]) -> KDerivation {
    if children.is_empty() {
        return KDerivation {
            k: 0.15,
            guardrail_triggered: false,
        };
    }

    let mut derived = match decomp {
        DecompType::And => {
            let mut weakest = &children[0];
            for child in &children[1..] {
                if child.k < weakest.k {
                    weakest = child;
                }
            }
            KDerivation {
                k: weakest.k,
                guardrail_triggered: weakest.guardrail_triggered,
            }
        }
        DecompType::Or => {
            let mut decisive = &children[0];
            for child in &children[1..] {
                let stronger = child.p > decisive.p
                    || (child.p == decisive.p && child.canonical_id < decisive.canonical_id);
                if stronger {
                    decisive = child;
                }
            }
            KDerivation {
                k: decisive.k,
                guardrail_triggered: decisive.guardrail_triggered,
            }
        }
    };

    if children.iter().any(|child| child.unscoped) && derived.k > UNSCOPED_CHILD_CAP {
        derived.k = UNSCOPED_CHILD_CAP;
    }
    derived
}

#[cfg(test)]
mod tests {
    use super::{propagate_parent_k, rubric_to_k, ChildConfidence};
    use crate::domain::types::{DecompType, Rubric};

    fn child(canonical_id: &str, p: f64, k: f64) -> ChildConfidence {
        ChildConfidence {
            canonical_id: canonical_id.to_string(),
            p,
            k,
            guardrail_triggered: false,
            unscoped: false,
        }
    }

    #[test]
    fn table_anchors_map_exactly() {
        for (rubric, expected) in [
            (Rubric::new(2, 2, 2, 2), 0.90),
            (Rubric::new(2, 2, 1, 1), 0.75),
            (Rubric::new(1, 1, 1, 1), 0.55),
            (Rubric::new(1, 1, 2, 2), 0.75),
        ] {
            let derived = rubric_to_k(&rubric);
            assert!((derived.k - expected).abs() < 1e-12, "rubric {rubric:?}");
            assert!(!derived.guardrail_triggered);
        }
    }

    #[test]
    fn odd_totals_interpolate_linearly() {
        assert!((rubric_to_k(&Rubric::new(1, 1, 1, 0)).k - 0.45).abs() < 1e-12);
        assert!((rubric_to_k(&Rubric::new(1, 1, 1, 2)).k - 0.65).abs() < 1e-12);
    }

    #[test]
    fn any_zero_score_caps_k() {
        let derived = rubric_to_k(&Rubric::new(2, 2, 2, 0));
        assert_eq!(derived.k, 0.55);
        assert!(derived.guardrail_triggered);

        let low_total = rubric_to_k(&Rubric::new(1, 1, 0, 0));
        assert!((low_total.k - 0.35).abs() < 1e-12);
        assert!(!low_total.guardrail_triggered);
    }

    #[test]
    fn and_propagation_takes_the_weakest_child() {
        let derived = propagate_parent_k(
            DecompType::And,
            &[child("node:a", 0.9, 0.75), child("node:b", 0.8, 0.35)],
        );
        assert_eq!(derived.k, 0.35);
    }

    #[test]
    fn or_propagation_follows_the_max_p_child_with_canonical_tie_break() {
        let mut decisive = child("node:a", 0.8, 0.55);
        decisive.guardrail_triggered = true;
        let derived = propagate_parent_k(
            DecompType::Or,
            &[child("node:b", 0.8, 0.90), decisive.clone()],
        );
        assert_eq!(derived.k, decisive.k);
        assert!(derived.guardrail_triggered);
    }

    #[test]
    fn unscoped_children_cap_the_parent() {
        let mut unscoped = child("node:u", 0.5, 0.15);
        unscoped.unscoped = true;
        let derived = propagate_parent_k(
            DecompType::And,
            &[child("node:a", 0.9, 0.90), unscoped],
        );
        assert!(derived.k <= 0.40);
    }
}

use serde::{Deserialize, Serialize};

use crate::{config::SessionConfig, domain::hypothesis::HypothesisSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClosureIssueCode {
    WinnerMarginBelowMinimum,
    DecompositionDepthShallow,
    AdjudicationIncomplete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosureIssue {
    pub code: ClosureIssueCode,
    pub target_id: String,
    pub detail: String,
}

/// Decision-contract closure gates, evaluated when confidence reaches the
/// effective threshold. An empty issue list certifies the winner.
pub fn check_closure(
    set: &HypothesisSet,
    config: &SessionConfig,
    unresolved_active_pairs: &[String],
) -> Vec<ClosureIssue> {
    let contract = &config.decision_contract;
    if !contract.enabled {
        return Vec::new();
    }

    let mut issues = Vec::new();
    let Some(winner_id) = set.leader().cloned() else {
        return issues;
    };

    let winner_p = set.p_ledger(&winner_id);
    let runner_up_p = set
        .named_in_canonical_order()
        .iter()
        .filter(|root_id| **root_id != winner_id)
        .map(|root_id| set.p_ledger(root_id))
        .fold(0.0, f64::max);
    let margin = winner_p - runner_up_p;
    if margin + 1e-12 < contract.min_winner_margin {
        issues.push(ClosureIssue {
            code: ClosureIssueCode::WinnerMarginBelowMinimum,
            target_id: winner_id.clone(),
            detail: format!(
                "winner margin {margin:.4} is below the contract minimum {:.4}",
                contract.min_winner_margin
            ),
        });
    }

    if contract.min_decomposition_depth > 0 {
        let winner = &set.roots[&winner_id];
        for (slot_key, slot_id) in &winner.obligations {
            let depth = set.arena.depth_below(*slot_id);
            if depth < contract.min_decomposition_depth {
                issues.push(ClosureIssue {
                    code: ClosureIssueCode::DecompositionDepthShallow,
                    target_id: format!("{winner_id}:{slot_key}"),
                    detail: format!(
                        "slot depth {depth} is below the contract minimum {}",
                        contract.min_decomposition_depth
                    ),
                });
            }
        }
    }

    if contract.require_adjudication_complete {
        for pair in unresolved_active_pairs {
            issues.push(ClosureIssue {
                code: ClosureIssueCode::AdjudicationIncomplete,
                target_id: pair.clone(),
                detail: "active-set pair is still unresolved".to_string(),
            });
        }
    }

    issues
}

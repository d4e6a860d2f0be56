use serde::{Deserialize, Serialize};

use crate::{
    domain::{
        hypothesis::RootHypothesis,
        node::NodeId,
        types::{
            pair_key, DiscriminatorDirection, OperationKind, PairKey, RootId, RootStatus,
            StopReason,
        },
    },
    engine::EngineState,
    gates::{check_closure, ClosureIssue},
    policy::aggregate::effective_slot_p,
    ports::ContrastiveContext,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedOperation {
    pub kind: OperationKind,
    pub root_id: RootId,
    #[serde(default)]
    pub slot_key: Option<String>,
    #[serde(default)]
    pub node_id: Option<NodeId>,
    #[serde(default)]
    pub contrastive: Option<ContrastiveContext>,
    #[serde(default)]
    pub pair_value: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct SchedulingStep {
    pub operation: Option<PlannedOperation>,
    pub deferred_pairs: Vec<PairKey>,
    pub pair_selected: Option<(PairKey, f64)>,
    /// Set when the only reason no operation exists is the counterevidence
    /// reservation blocking regular work.
    pub blocked_by_reservation: bool,
}

/// Deterministic operation choice: counterevidence window first, then the
/// pair-adjudication queue, then the leader/frontier sweep in canonical
/// order. No randomness, no dependence on unrecorded oracle state.
pub(crate) fn choose_operation(state: &mut EngineState) -> SchedulingStep {
    let mut step = SchedulingStep::default();

    if state.in_counterevidence_window() {
        step.operation = counterevidence_probe(state);
        step.blocked_by_reservation = step.operation.is_none();
        return step;
    }

    if state.queue.enabled() {
        let (task, deferred) = state.queue.next_task(&state.set);
        step.deferred_pairs = deferred;
        if let Some(task) = task {
            state
                .queue
                .mark_targeted(&task.pair_key, task.target_side);
            step.pair_selected = Some((task.pair_key.clone(), task.elimination_value));
            let target = &state.set.roots[&task.target_root_id];
            let contrastive = ContrastiveContext {
                pair_key: task.pair_key.clone(),
                left_root_id: task.left_root_id.clone(),
                right_root_id: task.right_root_id.clone(),
                target_side: task.target_side,
                discriminator_spec: None,
                counterevidence_probe: false,
            };
            step.operation = Some(if task.bootstrap {
                PlannedOperation {
                    kind: OperationKind::Decompose,
                    root_id: task.target_root_id.clone(),
                    slot_key: None,
                    node_id: None,
                    contrastive: Some(contrastive),
                    pair_value: Some(task.elimination_value),
                }
            } else {
                let (slot_key, node_id) = evaluation_target(state, target);
                PlannedOperation {
                    kind: OperationKind::Evaluate,
                    root_id: task.target_root_id.clone(),
                    slot_key,
                    node_id,
                    contrastive: Some(contrastive),
                    pair_value: Some(task.elimination_value),
                }
            });
            if step.operation.as_ref().is_some_and(|op| {
                op.kind == OperationKind::Evaluate && op.node_id.is_none()
            }) {
                // The target root has no evaluable slot; fall through to the
                // frontier sweep rather than burn the credit.
                step.operation = None;
                step.pair_selected = None;
            } else {
                return step;
            }
        }
    }

    let frontier = state.set.frontier(state.config.epsilon);
    // Roots with unevaluated required material come before re-evaluation of
    // already-assessed slots.
    let mut reevaluation_fallback: Option<PlannedOperation> = None;
    for root_id in frontier {
        let root = &state.set.roots[&root_id];
        if root.k_root >= state.tau_effective {
            continue;
        }
        let missing = root.missing_required_slots(&state.config.required_slots);
        let scoping_needed = root.status == RootStatus::Unscoped || !missing.is_empty();
        if scoping_needed {
            if state.config.required_slots.is_empty() {
                continue;
            }
            step.operation = Some(PlannedOperation {
                kind: OperationKind::Decompose,
                root_id,
                slot_key: None,
                node_id: None,
                contrastive: None,
                pair_value: None,
            });
            return step;
        }
        // Decision contracts with a depth requirement schedule slot
        // decomposition ahead of evaluation.
        let contract = &state.config.decision_contract;
        if contract.enabled && contract.min_decomposition_depth > 0 {
            let shallow = root
                .obligations
                .iter()
                .filter(|(slot_key, _)| state.config.required_slots.contains(slot_key))
                .find(|(_, slot_id)| {
                    state.set.arena.depth_below(**slot_id) < contract.min_decomposition_depth
                })
                .map(|(slot_key, slot_id)| (slot_key.clone(), *slot_id));
            if let Some((slot_key, slot_id)) = shallow {
                step.operation = Some(PlannedOperation {
                    kind: OperationKind::Decompose,
                    root_id,
                    slot_key: Some(slot_key),
                    node_id: Some(slot_id),
                    contrastive: None,
                    pair_value: None,
                });
                return step;
            }
        }
        let (slot_key, node_id) = evaluation_target(state, root);
        if let Some(target_id) = node_id {
            let operation = PlannedOperation {
                kind: OperationKind::Evaluate,
                root_id,
                slot_key,
                node_id,
                contrastive: None,
                pair_value: None,
            };
            let unevaluated = state
                .set
                .arena
                .get(target_id)
                .is_some_and(|node| !node.evaluated);
            if unevaluated {
                step.operation = Some(operation);
                return step;
            }
            if reevaluation_fallback.is_none() {
                reevaluation_fallback = Some(operation);
            }
        }
    }

    step.operation = reevaluation_fallback;
    step
}

/// Slot choice inside a root: lowest current k with canonical-id tie-break,
/// unless the VOI-lite score of an unevaluated slot beats it. A slot that
/// has unevaluated children delegates to its lowest-k unevaluated child.
fn evaluation_target(
    state: &EngineState,
    root: &RootHypothesis,
) -> (Option<String>, Option<NodeId>) {
    let arena = &state.set.arena;
    let mut ordered_slots: Vec<(&String, NodeId)> = root
        .obligations
        .iter()
        .filter(|(slot_key, _)| state.config.required_slots.contains(slot_key))
        .map(|(slot_key, node_id)| (slot_key, *node_id))
        .collect();
    if ordered_slots.is_empty() {
        return (None, None);
    }
    ordered_slots.sort_by(|a, b| {
        let node_a = arena.get(a.1);
        let node_b = arena.get(b.1);
        let (ka, ca) = node_a.map(|n| (n.k, n.canonical_id.clone())).unwrap_or((1.0, String::new()));
        let (kb, cb) = node_b.map(|n| (n.k, n.canonical_id.clone())).unwrap_or((1.0, String::new()));
        ka.partial_cmp(&kb)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| ca.cmp(&cb))
    });

    let default_choice = ordered_slots[0];
    let default_score = score_slot(state, root, default_choice.1);

    let mut chosen = default_choice;
    if state.config.lambda_voi > 0.0 {
        let mut best_unevaluated: Option<((&String, NodeId), f64)> = None;
        for &(slot_key, node_id) in &ordered_slots {
            let Some(node) = arena.get(node_id) else {
                continue;
            };
            if node.evaluated {
                continue;
            }
            let score = score_slot(state, root, node_id);
            let better = match &best_unevaluated {
                None => true,
                Some((_, best_score)) => score > *best_score,
            };
            if better {
                best_unevaluated = Some(((slot_key, node_id), score));
            }
        }
        if let Some(((slot_key, node_id), score)) = best_unevaluated {
            if score > default_score {
                chosen = (slot_key, node_id);
            }
        }
    }

    let (slot_key, slot_id) = chosen;
    // Prefer the weakest unevaluated child once the slot is decomposed.
    let child = arena
        .children_in_key_order(slot_id)
        .into_iter()
        .filter_map(|child_id| arena.get(child_id).map(|node| (child_id, node)))
        .filter(|(_, node)| !node.evaluated)
        .min_by(|(_, a), (_, b)| {
            a.k.partial_cmp(&b.k)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.canonical_id.cmp(&b.canonical_id))
        })
        .map(|(child_id, _)| child_id);

    (Some(slot_key.clone()), Some(child.unwrap_or(slot_id)))
}

/// VOI-lite: information need plus leverage of the slot on the root
/// multiplier, weighted by lambda.
fn score_slot(state: &EngineState, root: &RootHypothesis, slot_id: NodeId) -> f64 {
    let arena = &state.set.arena;
    let Some(slot) = arena.get(slot_id) else {
        return 0.0;
    };
    let mut impact = 1.0;
    for (_, other_id) in root.obligations.iter() {
        if *other_id != slot_id {
            impact *= effective_slot_p(arena, *other_id);
        }
    }
    (1.0 - slot.k) + state.config.lambda_voi * impact
}

fn counterevidence_probe(state: &EngineState) -> Option<PlannedOperation> {
    let leader = state.set.leader()?.clone();
    let named = state.set.named_in_canonical_order();
    let runner_up = named
        .iter()
        .filter(|root_id| **root_id != leader && !state.set.roots[*root_id].retired)
        .max_by(|a, b| {
            state
                .set
                .p_ledger(a)
                .partial_cmp(&state.set.p_ledger(b))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    state.set.roots[*b]
                        .canonical_id
                        .cmp(&state.set.roots[*a].canonical_id)
                })
        })?
        .clone();

    let leader_root = &state.set.roots[&leader];
    if leader_root.status != RootStatus::Scoped {
        return None;
    }
    // Probe the leader's strongest claim: highest effective slot p.
    let (slot_key, slot_id) = leader_root
        .obligations
        .iter()
        .filter(|(slot_key, _)| state.config.required_slots.contains(slot_key))
        .max_by(|a, b| {
            let pa = effective_slot_p(&state.set.arena, *a.1);
            let pb = effective_slot_p(&state.set.arena, *b.1);
            pa.partial_cmp(&pb)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.0.cmp(a.0))
        })
        .map(|(slot_key, node_id)| (slot_key.clone(), *node_id))?;

    let leader_canonical = &state.set.roots[&leader].canonical_id;
    let runner_canonical = &state.set.roots[&runner_up].canonical_id;
    let key = pair_key(leader_canonical, runner_canonical);
    let (left, right, side) = if leader_canonical <= runner_canonical {
        (leader.clone(), runner_up.clone(), DiscriminatorDirection::Left)
    } else {
        (runner_up.clone(), leader.clone(), DiscriminatorDirection::Right)
    };

    Some(PlannedOperation {
        kind: OperationKind::Evaluate,
        root_id: leader,
        slot_key: Some(slot_key),
        node_id: Some(slot_id),
        contrastive: Some(ContrastiveContext {
            pair_key: key,
            left_root_id: left,
            right_root_id: right,
            target_side: side,
            discriminator_spec: None,
            counterevidence_probe: true,
        }),
        pair_value: None,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct StopDecision {
    pub reason: StopReason,
    pub closure_issues: Vec<ClosureIssue>,
}

/// Stop evaluation at the top of each scheduler turn. `no_legal_op` carries
/// the outcome of the most recent operation choice.
pub(crate) fn check_stop(
    state: &mut EngineState,
    no_legal_op: bool,
    blocked_by_reservation: bool,
) -> Option<StopDecision> {
    let frontier = state.set.frontier(state.config.epsilon);
    let frontier_confident = !frontier.is_empty()
        && frontier
            .iter()
            .all(|root_id| state.set.roots[root_id].k_root >= state.tau_effective);

    let closure_issues = if frontier_confident {
        let unresolved = if state.queue.enabled() {
            state.queue.unresolved_active_pairs(&state.set)
        } else {
            Vec::new()
        };
        check_closure(&state.set, &state.config, &unresolved)
    } else {
        Vec::new()
    };

    if frontier_confident && closure_issues.is_empty() {
        return Some(StopDecision {
            reason: StopReason::FrontierConfident,
            closure_issues: Vec::new(),
        });
    }

    if state.credits_remaining == 0 {
        return Some(StopDecision {
            reason: StopReason::CreditsExhausted,
            closure_issues,
        });
    }

    if frontier_confident {
        if no_legal_op {
            return Some(StopDecision {
                reason: StopReason::ClosureGatesUnmet,
                closure_issues,
            });
        }
        return None;
    }

    if no_legal_op {
        if blocked_by_reservation {
            return Some(StopDecision {
                reason: StopReason::NoLegalOp,
                closure_issues: Vec::new(),
            });
        }
        return Some(StopDecision {
            reason: StopReason::EpistemicallyExhausted,
            closure_issues: Vec::new(),
        });
    }

    None
}

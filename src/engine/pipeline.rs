use serde_json::json;

use crate::{
    canonical::canonical_node_id,
    config::ReasoningMode,
    domain::{
        audit::{AuditEventKind, AuditRecorder},
        node::{Node, NodeId},
        types::{Entailment, NodeRole, PairVerdict, RootStatus},
    },
    engine::{scheduler::PlannedOperation, EngineState},
    error::{internal_error, EngineError},
    gates::{frame_adequacy_score, resolve_effective_tau},
    policy::{
        abstention::dynamic_abstention_mass,
        aggregate::{compositional_regularizer, effective_slot_p, root_multiplier},
        damping::{damped_update, enforce_absorbers},
        delta::{
            apply_conservative_delta, apply_contradiction_floor, bound_non_discriminative_drift,
        },
        rubric::{propagate_parent_k, rubric_to_k, ChildConfidence, UNSCOPED_CHILD_CAP},
    },
    ports::{DecompositionOutcome, EvaluationOutcome},
};

/// Materializes a decomposition outcome. Scoping never moves the ledger:
/// new NEC material is neutral until evaluated.
pub(crate) fn apply_decomposition(
    state: &mut EngineState,
    recorder: &mut AuditRecorder,
    ts: u64,
    op: &PlannedOperation,
    outcome: &DecompositionOutcome,
) -> Result<(), EngineError> {
    let credits = state.credits_remaining;
    match outcome {
        DecompositionOutcome::Failure { reason } => {
            recorder.record(
                ts,
                AuditEventKind::DecomposeFailed,
                op.root_id.clone(),
                json!({"reason": reason, "slot_key": op.slot_key}),
                credits,
                credits,
            )?;
            if op.slot_key.is_none() {
                let root = state
                    .set
                    .roots
                    .get_mut(&op.root_id)
                    .ok_or_else(|| internal_error(format!("unknown root '{}'", op.root_id)))?;
                let capped = root.k_root.min(UNSCOPED_CHILD_CAP);
                let changed = capped < root.k_root;
                root.k_root = capped;
                if changed {
                    recorder.record(
                        ts,
                        AuditEventKind::UnscopedCapped,
                        op.root_id.clone(),
                        json!({"k_root": capped}),
                        credits,
                        credits,
                    )?;
                }
            }
            return Ok(());
        }
        DecompositionOutcome::Structure(structure) => {
            match &op.slot_key {
                None => {
                    let required = state.config.required_slots.clone();
                    let root = state
                        .set
                        .roots
                        .get_mut(&op.root_id)
                        .ok_or_else(|| internal_error(format!("unknown root '{}'", op.root_id)))?;
                    let mut created = Vec::new();
                    for slot_key in &required {
                        if root.obligations.contains_key(slot_key) {
                            continue;
                        }
                        let node_key = format!("{}:{}", root.root_id, slot_key);
                        let statement = structure
                            .slot_statements
                            .get(slot_key)
                            .cloned()
                            .unwrap_or_default();
                        let node = Node::unassessed(
                            node_key.clone(),
                            canonical_node_id(&node_key, &statement),
                            statement,
                            NodeRole::Nec,
                            None,
                        );
                        let node_id = state.set.arena.insert(node);
                        root.obligations.insert(slot_key.clone(), node_id);
                        created.push(node_key);
                    }
                    root.status = RootStatus::Scoped;
                    root.scoping_provenance = structure.provenance.clone();
                    recorder.record(
                        ts,
                        AuditEventKind::DecomposeApplied,
                        op.root_id.clone(),
                        json!({"created_slots": created, "provenance": structure.provenance}),
                        credits,
                        credits,
                    )?;
                }
                Some(slot_key) => {
                    let slot_id = state
                        .set
                        .roots
                        .get(&op.root_id)
                        .and_then(|root| root.obligations.get(slot_key))
                        .copied()
                        .ok_or_else(|| {
                            internal_error(format!(
                                "slot '{}:{}' missing during decomposition",
                                op.root_id, slot_key
                            ))
                        })?;
                    let coupling = structure.coupling.clamp(0.0, 1.0);
                    let mut created = Vec::new();
                    for child in &structure.children {
                        let node_key = format!("{}:{}:{}", op.root_id, slot_key, child.key);
                        let node = Node::unassessed(
                            node_key.clone(),
                            canonical_node_id(&node_key, &child.statement),
                            child.statement.clone(),
                            child.role,
                            None,
                        );
                        state.set.arena.attach_child(slot_id, &child.key, node);
                        created.push(node_key);
                    }
                    if let Some(slot) = state.set.arena.get_mut(slot_id) {
                        slot.decomp_type = structure.decomp_type;
                        slot.coupling = coupling;
                    }
                    recorder.record(
                        ts,
                        AuditEventKind::DecomposeApplied,
                        format!("{}:{}", op.root_id, slot_key),
                        json!({
                            "created_children": created,
                            "decomp_type": structure.decomp_type,
                            "coupling": coupling,
                        }),
                        credits,
                        credits,
                    )?;
                }
            }
        }
    }
    refresh_root_confidence(state, recorder, ts, &op.root_id)?;
    Ok(())
}

/// The full EVALUATE contract-enforcement sequence and ledger update. Every
/// divergence from the raw oracle output is audited; probability changes
/// happen nowhere else.
pub(crate) fn apply_evaluation(
    state: &mut EngineState,
    recorder: &mut AuditRecorder,
    ts: u64,
    op: &PlannedOperation,
    outcome: &EvaluationOutcome,
) -> Result<(), EngineError> {
    let credits = state.credits_remaining;
    let node_id = op
        .node_id
        .ok_or_else(|| internal_error("evaluation operation lost its target node"))?;
    let (node_key, p_prev) = {
        let node = state
            .set
            .arena
            .get(node_id)
            .ok_or_else(|| internal_error("evaluation target is not in the arena"))?;
        (node.node_key.clone(), node.p)
    };

    // 1. Clamp the oracle probability into the unit interval.
    let mut p_target = outcome.p;
    if !(0.0..=1.0).contains(&p_target) {
        recorder.record(
            ts,
            AuditEventKind::AnomalyRecorded,
            node_key.clone(),
            json!({"anomaly": "p_out_of_range", "p_raw": p_target}),
            credits,
            credits,
        )?;
        p_target = p_target.clamp(0.0, 1.0);
    }

    // 2. Conservative delta without evidence identifiers.
    let has_evidence = !outcome.evidence_ids.is_empty();
    let delta = apply_conservative_delta(p_prev, p_target, has_evidence);
    if delta.clamped {
        recorder.record(
            ts,
            AuditEventKind::ConservativeDeltaEnforced,
            node_key.clone(),
            json!({"p_prev": p_prev, "p_target": p_target, "p_stored": delta.p}),
            credits,
            credits,
        )?;
    }
    let mut p_new = delta.p;

    // 3. Contradiction entailment carries a minimum penalty.
    if outcome.entailment == Entailment::Contradicts {
        let floored = apply_contradiction_floor(p_prev, p_new);
        if floored.floor_applied {
            recorder.record(
                ts,
                AuditEventKind::ContradictionFloorApplied,
                node_key.clone(),
                json!({"p_prev": p_prev, "p_before_floor": p_new, "p_stored": floored.p}),
                credits,
                credits,
            )?;
        }
        p_new = floored.p;
    }

    // 4 & 6. Typed discriminator validation, including quote fidelity.
    let bound_pair = op.contrastive.as_ref().map(|context| &context.pair_key);
    let validation = crate::adjudication::validate_discriminators(
        &outcome.discriminators,
        bound_pair,
        &state.evidence,
        &mut state.discriminators,
        state.config.quote_fidelity_mode,
    );
    for rejection in &validation.rejections {
        recorder.record(
            ts,
            AuditEventKind::DiscriminatorEvidenceInvalid,
            node_key.clone(),
            json!({"record_id": rejection.record_id, "reason": rejection.reason}),
            credits,
            credits,
        )?;
    }
    for finding in &validation.quote_findings {
        if !finding.matched {
            let kind = if finding.blocked {
                AuditEventKind::QuoteFidelityBlocked
            } else {
                AuditEventKind::QuoteFidelityDegraded
            };
            recorder.record(
                ts,
                kind,
                node_key.clone(),
                json!({"record_id": finding.record_id}),
                credits,
                credits,
            )?;
        }
    }

    // 5. Strict contrastive mode bounds non-discriminative drift.
    if state.config.strict_contrastive && outcome.non_discriminative {
        let drift = bound_non_discriminative_drift(p_prev, p_new, state.config.epsilon_nc);
        if drift.bounded {
            recorder.record(
                ts,
                AuditEventKind::NonDiscriminativeDriftBounded,
                node_key.clone(),
                json!({"p_prev": p_prev, "p_unbounded": p_new, "p_stored": drift.p}),
                credits,
                credits,
            )?;
        }
        p_new = drift.p;
    }
    if state.config.require_typed_discriminator_evidence
        && op.contrastive.is_some()
        && validation.accepted.is_empty()
        && !outcome.non_discriminative
    {
        recorder.record(
            ts,
            AuditEventKind::AnomalyRecorded,
            node_key.clone(),
            json!({"anomaly": "typed_discriminator_required_but_absent"}),
            credits,
            credits,
        )?;
    }

    // 7. Confidence from the rubric, with guardrails.
    let mut k_new = None;
    let mut guardrail = false;
    match &outcome.rubric {
        None => {
            recorder.record(
                ts,
                AuditEventKind::AnomalyRecorded,
                node_key.clone(),
                json!({"anomaly": "rubric_missing"}),
                credits,
                credits,
            )?;
        }
        Some(rubric) => {
            let mut rubric = *rubric;
            if !rubric.is_in_range() {
                recorder.record(
                    ts,
                    AuditEventKind::AnomalyRecorded,
                    node_key.clone(),
                    json!({"anomaly": "rubric_out_of_range", "rubric": rubric}),
                    credits,
                    credits,
                )?;
                rubric.a = rubric.a.min(2);
                rubric.b = rubric.b.min(2);
                rubric.c = rubric.c.min(2);
                rubric.d = rubric.d.min(2);
            }
            let derived = rubric_to_k(&rubric);
            k_new = Some((rubric, derived.k));
            guardrail = derived.guardrail_triggered;
        }
    }

    // Commit the node mutation.
    {
        let node = state
            .set
            .arena
            .get_mut(node_id)
            .ok_or_else(|| internal_error("evaluation target vanished mid-update"))?;
        node.p = p_new;
        node.evaluated = true;
        node.entailment = outcome.entailment;
        node.non_discriminative = outcome.non_discriminative;
        node.evidence_refs = outcome.evidence_ids.clone();
        node.discriminators.extend(validation.accepted.iter().cloned());
        if let Some((rubric, k)) = k_new {
            node.rubric = Some(rubric);
            node.k = k;
            node.guardrail_triggered = guardrail;
        }
    }
    recorder.record(
        ts,
        AuditEventKind::ConfidenceUpdated,
        node_key.clone(),
        json!({
            "p_prev": p_prev,
            "p_stored": p_new,
            "k": state.set.arena.get(node_id).map(|node| node.k),
            "guardrail_triggered": guardrail,
        }),
        credits,
        credits,
    )?;

    // Epistemic signal windows feed abstention and frame adequacy.
    state.signals.recent_evaluations += 1;
    if outcome.entailment == Entailment::Contradicts {
        state.signals.recent_contradictions += 1;
    }
    if outcome.non_discriminative {
        state.signals.recent_non_discriminative += 1;
    }

    // 8. Ledger update: multiplier, regularization, damping, absorbers.
    update_ledger_for_root(state, recorder, ts, op)?;

    // 9. Pair verdict for the bound pair, then retirement against the
    // fresh masses.
    if let Some(context) = &op.contrastive {
        let verdict = state
            .queue
            .absorb_records(&context.pair_key, &validation.accepted);
        recorder.record(
            ts,
            AuditEventKind::PairVerdictUpdated,
            context.pair_key.clone(),
            json!({
                "verdict": verdict,
                "accepted_records": validation.accepted.len(),
            }),
            credits,
            credits,
        )?;
        retire_dominated_contender(state, recorder, ts, context)?;
    }
    if state.queue.enabled() {
        state.signals.unresolved_pairs = state.queue.unresolved_active_pairs(&state.set).len();
        state.signals.feasible_pairs = state.queue.feasible_pair_count(&state.set);
    }

    refresh_root_confidence(state, recorder, ts, &op.root_id)?;
    refresh_frame_cap(state, recorder, ts)?;
    Ok(())
}

/// A resolved pair retires its loser once the loser's mass falls under the
/// active-set ratio floor. Retirement only stops further adjudication and
/// scheduling; the root's record stays in the set.
fn retire_dominated_contender(
    state: &mut EngineState,
    recorder: &mut AuditRecorder,
    ts: u64,
    context: &crate::ports::ContrastiveContext,
) -> Result<(), EngineError> {
    let floor = state.config.pair_adjudication.mass_ratio_floor;
    if !state.queue.enabled() || floor <= 0.0 {
        return Ok(());
    }
    let loser_id = match state.queue.verdict(&context.pair_key) {
        PairVerdict::Unresolved => return Ok(()),
        PairVerdict::FavorsLeft => context.right_root_id.clone(),
        PairVerdict::FavorsRight => context.left_root_id.clone(),
    };
    let Some(leader_id) = state.set.leader().cloned() else {
        return Ok(());
    };
    let leader_mass = state.set.p_ledger(&leader_id);
    let loser_mass = state.set.p_ledger(&loser_id);
    if leader_mass <= 0.0 || loser_mass / leader_mass >= floor {
        return Ok(());
    }
    let Some(loser) = state.set.roots.get_mut(&loser_id) else {
        return Ok(());
    };
    if loser.retired {
        return Ok(());
    }
    loser.retired = true;
    let credits = state.credits_remaining;
    recorder.record(
        ts,
        AuditEventKind::ContenderRetired,
        loser_id,
        json!({
            "pair_key": context.pair_key,
            "loser_mass": loser_mass,
            "leader_mass": leader_mass,
            "mass_ratio_floor": floor,
        }),
        credits,
        credits,
    )?;
    Ok(())
}

fn update_ledger_for_root(
    state: &mut EngineState,
    recorder: &mut AuditRecorder,
    ts: u64,
    op: &PlannedOperation,
) -> Result<(), EngineError> {
    let credits = state.credits_remaining;
    let root = &state.set.roots[&op.root_id];
    let multiplier = root_multiplier(&state.set.arena, root, &state.config.required_slots);
    let p_base = state.set.p_ledger(&op.root_id);
    let mut p_prop = p_base * multiplier;

    let regularizer = compositional_regularizer(root.story_cardinality);
    if regularizer < 1.0 {
        let before = p_prop;
        p_prop *= regularizer;
        recorder.record(
            ts,
            AuditEventKind::CompositionalRegularized,
            op.root_id.clone(),
            json!({
                "story_cardinality": root.story_cardinality,
                "factor": regularizer,
                "p_prop_before": before,
                "p_prop_after": p_prop,
            }),
            credits,
            credits,
        )?;
    }

    let p_damped = damped_update(state.config.alpha, p_base, p_prop);
    state.set.set_p_ledger(&op.root_id, p_damped);
    recorder.record(
        ts,
        AuditEventKind::LedgerUpdated,
        op.root_id.clone(),
        json!({
            "p_base": p_base,
            "multiplier": multiplier,
            "p_prop": p_prop,
            "alpha": state.config.alpha,
            "p_new": p_damped,
        }),
        credits,
        credits,
    )?;

    let und_override = if state.config.dynamic_abstention.enabled {
        let frame = frame_adequacy_score(&state.signals);
        let abstention =
            dynamic_abstention_mass(&state.config.dynamic_abstention, &state.signals, frame);
        recorder.record(
            ts,
            AuditEventKind::DynamicAbstention,
            op.root_id.clone(),
            json!({
                "pressure": abstention.pressure,
                "mass": abstention.mass,
                "frame_adequacy": frame,
            }),
            credits,
            credits,
        )?;
        Some(abstention.mass)
    } else {
        None
    };

    let enforcement = enforce_absorbers(&mut state.set, &state.config, und_override);
    recorder.record(
        ts,
        AuditEventKind::AbsorberEnforced,
        op.root_id.clone(),
        json!({
            "branch": enforcement.branch,
            "named_mass_before": enforcement.named_mass_before,
            "named_mass_after": enforcement.named_mass_after,
            "noa_after": enforcement.noa_after,
            "und_after": enforcement.und_after,
        }),
        credits,
        credits,
    )?;

    state.set.assert_invariants(&state.config)?;
    recorder.record(
        ts,
        AuditEventKind::InvariantSumToOneCheck,
        op.root_id.clone(),
        json!({"total": state.set.ledger_sum()}),
        credits,
        credits,
    )?;
    Ok(())
}

/// Recomputes slot-level propagated confidence and the root's k. The root
/// carries the weakest required obligation; unscoped material caps it.
fn refresh_root_confidence(
    state: &mut EngineState,
    recorder: &mut AuditRecorder,
    ts: u64,
    root_id: &str,
) -> Result<(), EngineError> {
    let credits = state.credits_remaining;
    let Some(root) = state.set.roots.get(root_id) else {
        return Ok(());
    };
    let arena = &state.set.arena;

    let mut k_root = f64::INFINITY;
    let mut capped = root.status == RootStatus::Unscoped;
    let mut slot_updates: Vec<(NodeId, f64, bool)> = Vec::new();

    for slot_key in &state.config.required_slots {
        match root.obligations.get(slot_key) {
            None => {
                capped = true;
            }
            Some(slot_id) => {
                let Some(slot) = arena.get(*slot_id) else {
                    continue;
                };
                let slot_k = if slot.children.is_empty() {
                    slot.k
                } else {
                    let children: Vec<ChildConfidence> = slot
                        .children
                        .values()
                        .filter_map(|child_id| arena.get(*child_id))
                        .map(|child| ChildConfidence {
                            canonical_id: child.canonical_id.clone(),
                            p: if child.role == NodeRole::Nec && !child.evaluated {
                                1.0
                            } else {
                                child.p
                            },
                            k: child.k,
                            guardrail_triggered: child.guardrail_triggered,
                            unscoped: child.role == NodeRole::Unscoped,
                        })
                        .collect();
                    let derived = propagate_parent_k(
                        slot.decomp_type.unwrap_or(crate::domain::types::DecompType::And),
                        &children,
                    );
                    slot_updates.push((*slot_id, derived.k, derived.guardrail_triggered));
                    derived.k
                };
                k_root = k_root.min(slot_k);
            }
        }
    }

    for (slot_id, k, guardrail) in slot_updates {
        if let Some(slot) = state.set.arena.get_mut(slot_id) {
            slot.k = k;
            slot.guardrail_triggered = guardrail;
        }
    }

    let mut k_root = if k_root.is_finite() { k_root } else { 0.15 };
    if capped {
        k_root = k_root.min(UNSCOPED_CHILD_CAP);
    }
    let previous = state.set.roots[root_id].k_root;
    if (k_root - previous).abs() > f64::EPSILON {
        if let Some(root) = state.set.roots.get_mut(root_id) {
            root.k_root = k_root;
        }
        recorder.record(
            ts,
            AuditEventKind::ConfidenceUpdated,
            root_id.to_string(),
            json!({"k_root": k_root, "k_root_prev": previous}),
            credits,
            credits,
        )?;
    }
    Ok(())
}

/// Frame adequacy can trigger a confidence cap mid-run. Explore mode lowers
/// the effective tau and records the adjustment; certify mode leaves tau in
/// place and lets certification abstain instead.
fn refresh_frame_cap(
    state: &mut EngineState,
    recorder: &mut AuditRecorder,
    ts: u64,
) -> Result<(), EngineError> {
    if state.frame_cap_triggered {
        return Ok(());
    }
    let score = frame_adequacy_score(&state.signals);
    if score >= state.config.frame_adequacy.threshold {
        return Ok(());
    }
    state.frame_cap_triggered = true;
    if state.config.reasoning_mode == ReasoningMode::Explore {
        let resolution = resolve_effective_tau(&state.config, true);
        if resolution.adjusted && resolution.tau_effective < state.tau_effective {
            let credits = state.credits_remaining;
            recorder.record(
                ts,
                AuditEventKind::TauAdjusted,
                "session",
                json!({
                    "tau_effective_prev": state.tau_effective,
                    "tau_effective": resolution.tau_effective,
                    "frame_adequacy": score,
                }),
                credits,
                credits,
            )?;
            state.tau_effective = resolution.tau_effective;
        }
    }
    Ok(())
}

pub(crate) fn slot_probability_snapshot(state: &EngineState, root_id: &str) -> serde_json::Value {
    let Some(root) = state.set.roots.get(root_id) else {
        return serde_json::Value::Null;
    };
    let mut slots = serde_json::Map::new();
    for (slot_key, slot_id) in &root.obligations {
        slots.insert(
            slot_key.clone(),
            json!(effective_slot_p(&state.set.arena, *slot_id)),
        );
    }
    serde_json::Value::Object(slots)
}

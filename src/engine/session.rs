use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    config::{ReasoningMode, SessionConfig},
    domain::{
        audit::{AuditEventKind, AuditRecorder, AuditTrace},
        hypothesis::{HypothesisSet, RootSeed, H_UND_ID},
        types::{
            CertificationStatus, DecompType, EvidenceBundle, NodeRole, OperationKind, RootId,
            RootStatus, StopReason,
        },
    },
    engine::{
        pipeline::{apply_decomposition, apply_evaluation, slot_probability_snapshot},
        scheduler::{check_stop, choose_operation, PlannedOperation, StopDecision},
        EngineState,
    },
    error::{internal_error, invalid_request, port_failure, EngineError},
    gates::{
        check_contender_space, check_mece_certificate, resolve_effective_tau, ClosureIssueCode,
        MeceAssessment,
    },
    ports::{
        Clock, DecompositionRequest, EvaluationRequest, NodeSnapshot, RunSessionDeps, SystemClock,
        UuidIdProvider,
    },
    validate::{validate_hypothesis_set, ValidationIssueCode},
};

pub type RootSpec = RootSeed;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRequest {
    pub claim: String,
    pub roots: Vec<RootSeed>,
    #[serde(default)]
    pub evidence: Option<EvidenceBundle>,
    #[serde(default)]
    pub mece_assessments: Vec<MeceAssessment>,
    pub config: SessionConfig,
    pub credits: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub op_type: OperationKind,
    pub target_id: String,
    pub credits_before: u64,
    pub credits_after: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeView {
    pub node_key: String,
    pub statement: String,
    pub role: NodeRole,
    pub p: f64,
    pub k: f64,
    pub evaluated: bool,
    #[serde(default)]
    pub decomp_type: Option<DecompType>,
    pub coupling: f64,
    #[serde(default)]
    pub children: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootView {
    pub root_id: RootId,
    pub statement: String,
    pub exclusion_clause: String,
    pub canonical_id: String,
    pub status: RootStatus,
    pub k_root: f64,
    pub p_ledger: f64,
    pub credits_spent: u64,
    pub retired: bool,
    #[serde(default)]
    pub obligations: BTreeMap<String, NodeView>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionOutput {
    pub root_id: RootId,
    pub p_ledger: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CertificationOutput {
    pub root_id: RootId,
    pub status: CertificationStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionResult {
    pub session_id: String,
    pub roots: BTreeMap<RootId, RootView>,
    pub ledger: BTreeMap<RootId, f64>,
    pub audit: AuditTrace,
    pub stop_reason: StopReason,
    pub credits_remaining: u64,
    pub total_credits_spent: u64,
    pub operation_log: Vec<OperationRecord>,
    #[serde(default)]
    pub selection_output: Option<SelectionOutput>,
    #[serde(default)]
    pub certification_output: Option<CertificationOutput>,
    #[serde(default)]
    pub next_step_guidance: Vec<String>,
}

/// The one public use case: boots the hypothesis set, runs the gate stack,
/// drives the credit-metered scheduler loop, and returns the replayable
/// result. Probability moves only inside the paid update pipeline.
pub async fn run_session(
    request: SessionRequest,
    deps: &RunSessionDeps,
) -> Result<SessionResult, EngineError> {
    request.config.validate()?;
    reject_structural_issues(&request)?;

    let clock: Arc<dyn Clock> = deps
        .clock
        .clone()
        .unwrap_or_else(|| Arc::new(SystemClock));
    let id_provider = deps
        .id_provider
        .clone()
        .unwrap_or_else(|| Arc::new(UuidIdProvider) as Arc<dyn crate::ports::IdProvider>);
    let session_id = id_provider.mint_session_id();

    let set = HypothesisSet::bootstrap(&request.roots, &request.config)?;
    let mut recorder = AuditRecorder::new(deps.audit_sink.clone());
    let credits = request.credits;
    let ts = clock.now_ms();

    tracing::info!(
        target: "session",
        session_id = %session_id,
        roots = request.roots.len(),
        credits,
        profile = %request.config.profile,
        "session_started"
    );

    record_envelope(&mut recorder, ts, &session_id, &request, &set)?;
    recorder.record(
        ts,
        AuditEventKind::InvariantSumToOneCheck,
        session_id.clone(),
        json!({"total": set.ledger_sum()}),
        credits,
        credits,
    )?;

    // Pre-credit gates: contender space, MECE certificate, policy/threshold
    // compatibility. Failures stop before any credit is spent.
    let contender_issues = check_contender_space(&request.roots, request.config.compositional_stories);
    if !contender_issues.is_empty() {
        recorder.record(
            ts,
            AuditEventKind::GateFailed,
            session_id.clone(),
            json!({"gate": "contender_space", "issues": contender_issues}),
            credits,
            credits,
        )?;
        return finish(
            session_id,
            EngineState::new(request.config.clone(), set, EvidenceBundle::default(), credits, request.config.tau),
            recorder,
            ts,
            StopDecision {
                reason: StopReason::ContenderSpaceInvalid,
                closure_issues: Vec::new(),
            },
            Vec::new(),
        );
    }

    let mece_issues =
        check_mece_certificate(&set, &request.mece_assessments, request.config.max_pair_overlap);
    if !mece_issues.is_empty() {
        recorder.record(
            ts,
            AuditEventKind::GateFailed,
            session_id.clone(),
            json!({"gate": "mece_certificate", "issues": mece_issues}),
            credits,
            credits,
        )?;
        return finish(
            session_id,
            EngineState::new(request.config.clone(), set, EvidenceBundle::default(), credits, request.config.tau),
            recorder,
            ts,
            StopDecision {
                reason: StopReason::MeceCertificateFailed,
                closure_issues: Vec::new(),
            },
            Vec::new(),
        );
    }

    let resolution = resolve_effective_tau(&request.config, false);
    if resolution.incompatible {
        recorder.record(
            ts,
            AuditEventKind::GateFailed,
            session_id.clone(),
            json!({
                "gate": "policy_threshold_compatibility",
                "cap": resolution.cap,
                "cap_sources": resolution.cap_sources,
                "tau": request.config.tau,
            }),
            credits,
            credits,
        )?;
        return finish(
            session_id,
            EngineState::new(request.config.clone(), set, EvidenceBundle::default(), credits, request.config.tau),
            recorder,
            ts,
            StopDecision {
                reason: StopReason::PolicyConfigIncompatible,
                closure_issues: Vec::new(),
            },
            Vec::new(),
        );
    }
    if resolution.adjusted {
        recorder.record(
            ts,
            AuditEventKind::TauAdjusted,
            session_id.clone(),
            json!({
                "tau": request.config.tau,
                "tau_effective": resolution.tau_effective,
                "cap_sources": resolution.cap_sources,
            }),
            credits,
            credits,
        )?;
    }

    let evidence = request.evidence.clone().unwrap_or_default();
    let mut state = EngineState::new(
        request.config.clone(),
        set,
        evidence,
        credits,
        resolution.tau_effective,
    );
    let mut operation_log: Vec<OperationRecord> = Vec::new();

    let stop = loop {
        if deps
            .cancellation
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
        {
            let now = clock.now_ms();
            recorder.record(
                now,
                AuditEventKind::CancellationObserved,
                session_id.clone(),
                json!({}),
                state.credits_remaining,
                state.credits_remaining,
            )?;
            break StopDecision {
                reason: StopReason::Cancelled,
                closure_issues: Vec::new(),
            };
        }

        let now = clock.now_ms();
        if state.in_counterevidence_window() && !state.counterevidence_window_entered {
            state.counterevidence_window_entered = true;
            recorder.record(
                now,
                AuditEventKind::CounterevidenceWindowEntered,
                session_id.clone(),
                json!({
                    "reserve": state.config.pair_adjudication.counterevidence_reserve,
                    "credits_remaining": state.credits_remaining,
                }),
                state.credits_remaining,
                state.credits_remaining,
            )?;
        }

        let step = if state.credits_remaining > 0 {
            choose_operation(&mut state)
        } else {
            Default::default()
        };
        for pair in &step.deferred_pairs {
            recorder.record(
                now,
                AuditEventKind::PairDeferred,
                pair.clone(),
                json!({"reason": "pair_budget_exceeded"}),
                state.credits_remaining,
                state.credits_remaining,
            )?;
        }
        if let Some((pair, value)) = &step.pair_selected {
            recorder.record(
                now,
                AuditEventKind::PairSelected,
                pair.clone(),
                json!({"elimination_value": value}),
                state.credits_remaining,
                state.credits_remaining,
            )?;
        }

        if let Some(stop) = check_stop(
            &mut state,
            step.operation.is_none(),
            step.blocked_by_reservation,
        ) {
            break stop;
        }

        let op = step
            .operation
            .ok_or_else(|| internal_error("scheduler yielded no operation and no stop reason"))?;
        execute_operation(
            &mut state,
            &mut recorder,
            deps,
            clock.as_ref(),
            &op,
            &mut operation_log,
        )
        .await?;
    };

    let ts = clock.now_ms();
    finish(session_id, state, recorder, ts, stop, operation_log)
}

fn reject_structural_issues(request: &SessionRequest) -> Result<(), EngineError> {
    let report = validate_hypothesis_set(&request.roots, &request.config);
    for issue in &report.issues {
        match issue.code {
            ValidationIssueCode::EmptyStatement
            | ValidationIssueCode::MissingExclusionClause
            | ValidationIssueCode::DuplicateCanonicalId
            | ValidationIssueCode::ReservedRootId => {
                return Err(invalid_request(format!(
                    "invalid hypothesis set: root '{}': {}",
                    issue.root_id, issue.detail
                )));
            }
            ValidationIssueCode::VagueStatement | ValidationIssueCode::StandaloneHypothesis => {
                tracing::warn!(
                    target: "session",
                    root_id = %issue.root_id,
                    detail = %issue.detail,
                    "hypothesis_set_warning"
                );
            }
        }
    }
    Ok(())
}

fn record_envelope(
    recorder: &mut AuditRecorder,
    ts: u64,
    session_id: &str,
    request: &SessionRequest,
    set: &HypothesisSet,
) -> Result<(), EngineError> {
    let root_hashes: BTreeMap<&RootId, &String> = set
        .named_in_canonical_order()
        .iter()
        .map(|root_id| (root_id, &set.roots[root_id].canonical_id))
        .collect();
    let request_echo = serde_json::to_value(request)
        .map_err(|err| internal_error(format!("failed to serialize request echo: {err}")))?;
    recorder.record(
        ts,
        AuditEventKind::SessionEnvelope,
        session_id.to_string(),
        json!({
            "claim": request.claim,
            "config_hash": request.config.fingerprint(),
            "profile_fingerprint": request.config.profile_fingerprint(),
            "root_hashes": root_hashes,
            "credits": request.credits,
            "arithmetic_discipline": "f64-replay-from-recorded",
            "p_base_semantics": "ledger_at_update",
            "counterevidence_window": "tail",
            "request": request_echo,
        }),
        request.credits,
        request.credits,
    )?;
    Ok(())
}

async fn execute_operation(
    state: &mut EngineState,
    recorder: &mut AuditRecorder,
    deps: &RunSessionDeps,
    clock: &dyn Clock,
    op: &PlannedOperation,
    operation_log: &mut Vec<OperationRecord>,
) -> Result<(), EngineError> {
    let ts = clock.now_ms();
    let target_id = operation_target_id(state, op);

    let outcome_payload = match op.kind {
        OperationKind::Decompose => {
            let statement = match &op.slot_key {
                None => state.set.roots[&op.root_id].statement.clone(),
                Some(_) => op
                    .node_id
                    .and_then(|node_id| state.set.arena.get(node_id))
                    .map(|node| node.statement.clone())
                    .unwrap_or_else(|| state.set.roots[&op.root_id].statement.clone()),
            };
            let request = DecompositionRequest {
                root_id: op.root_id.clone(),
                slot_key: op.slot_key.clone(),
                statement,
                required_slots: state.config.required_slots.clone(),
            };
            match deps.decomposer.decompose(request).await {
                Ok(outcome) => json!({"decomposition": outcome}),
                Err(err) => {
                    return surface_port_failure(state, recorder, ts, &target_id, err);
                }
            }
        }
        OperationKind::Evaluate => {
            let node_id = op
                .node_id
                .ok_or_else(|| internal_error("evaluation operation without a target node"))?;
            let node = state
                .set
                .arena
                .get(node_id)
                .ok_or_else(|| internal_error("evaluation target is not in the arena"))?;
            let request = EvaluationRequest {
                node: NodeSnapshot {
                    node_key: node.node_key.clone(),
                    canonical_id: node.canonical_id.clone(),
                    root_id: op.root_id.clone(),
                    slot_key: op.slot_key.clone().unwrap_or_default(),
                    statement: node.statement.clone(),
                    role: node.role,
                    p: node.p,
                    k: node.k,
                },
                contrastive: op.contrastive.clone(),
                evidence: state.evidence.clone(),
            };
            match deps.evaluator.evaluate(request).await {
                Ok(outcome) => json!({"evaluation": outcome}),
                Err(err) => {
                    return surface_port_failure(state, recorder, ts, &target_id, err);
                }
            }
        }
    };

    let credits_before = state.credits_remaining;
    state.credits_remaining -= 1;
    state.total_credits_spent += 1;
    if let Some(root) = state.set.roots.get_mut(&op.root_id) {
        root.credits_spent += 1;
    }
    recorder.record(
        ts,
        AuditEventKind::OpExecuted,
        target_id.clone(),
        json!({
            "op": op,
            "outcome": outcome_payload,
            "slot_probabilities": slot_probability_snapshot(state, &op.root_id),
        }),
        credits_before,
        state.credits_remaining,
    )?;
    operation_log.push(OperationRecord {
        op_type: op.kind,
        target_id,
        credits_before,
        credits_after: state.credits_remaining,
    });

    match op.kind {
        OperationKind::Decompose => {
            let outcome = serde_json::from_value(outcome_payload["decomposition"].clone())
                .map_err(|err| internal_error(format!("decomposition payload corrupt: {err}")))?;
            apply_decomposition(state, recorder, ts, op, &outcome)
        }
        OperationKind::Evaluate => {
            let outcome = serde_json::from_value(outcome_payload["evaluation"].clone())
                .map_err(|err| internal_error(format!("evaluation payload corrupt: {err}")))?;
            apply_evaluation(state, recorder, ts, op, &outcome)
        }
    }
}

fn operation_target_id(state: &EngineState, op: &PlannedOperation) -> String {
    match (&op.kind, &op.slot_key, op.node_id) {
        (OperationKind::Evaluate, _, Some(node_id)) => state
            .set
            .arena
            .get(node_id)
            .map(|node| node.node_key.clone())
            .unwrap_or_else(|| op.root_id.clone()),
        (OperationKind::Decompose, Some(slot_key), _) => format!("{}:{}", op.root_id, slot_key),
        _ => op.root_id.clone(),
    }
}

fn surface_port_failure(
    state: &mut EngineState,
    recorder: &mut AuditRecorder,
    ts: u64,
    target_id: &str,
    err: EngineError,
) -> Result<(), EngineError> {
    let refunded = state.config.refund_on_port_failure;
    let credits_before = state.credits_remaining;
    if !refunded {
        state.credits_remaining -= 1;
        state.total_credits_spent += 1;
    }
    recorder.record(
        ts,
        AuditEventKind::PortFailure,
        target_id.to_string(),
        json!({"error": err.message, "credit_refunded": refunded}),
        credits_before,
        state.credits_remaining,
    )?;
    if refunded {
        recorder.record(
            ts,
            AuditEventKind::CreditRefunded,
            target_id.to_string(),
            json!({"credits_remaining": state.credits_remaining}),
            state.credits_remaining,
            state.credits_remaining,
        )?;
    }
    Err(port_failure(format!(
        "port failure on '{target_id}': {}",
        err.message
    )))
}

fn finish(
    session_id: String,
    mut state: EngineState,
    mut recorder: AuditRecorder,
    ts: u64,
    stop: StopDecision,
    operation_log: Vec<OperationRecord>,
) -> Result<SessionResult, EngineError> {
    let credits = state.credits_remaining;
    let guidance = next_step_guidance(&state, &stop);

    let selection_output = state.set.leader().map(|leader| SelectionOutput {
        root_id: leader.clone(),
        p_ledger: state.set.p_ledger(leader),
    });

    let certification_output = if stop.reason == StopReason::FrontierConfident
        && state.config.dual_outputs
    {
        let certify_blocked = state.config.reasoning_mode == ReasoningMode::Certify
            && state.frame_cap_triggered
            && state.config.frame_adequacy.cap < state.config.tau;
        let output = match (&selection_output, certify_blocked) {
            (Some(selection), false) => CertificationOutput {
                root_id: selection.root_id.clone(),
                status: CertificationStatus::Certified,
            },
            _ => CertificationOutput {
                root_id: H_UND_ID.to_string(),
                status: CertificationStatus::Abstain,
            },
        };
        if output.status == CertificationStatus::Certified && state.config.decision_contract.enabled
        {
            recorder.record(
                ts,
                AuditEventKind::DecisionContractPassed,
                output.root_id.clone(),
                json!({"min_winner_margin": state.config.decision_contract.min_winner_margin}),
                credits,
                credits,
            )?;
        }
        Some(output)
    } else {
        None
    };

    recorder.record(
        ts,
        AuditEventKind::SessionStopped,
        session_id.clone(),
        json!({
            "stop_reason": stop.reason,
            "final_ledger": state.set.ledger,
            "closure_issues": stop.closure_issues,
            "next_step_guidance": guidance,
            "total_credits_spent": state.total_credits_spent,
        }),
        credits,
        credits,
    )?;

    state.set.assert_invariants(&state.config)?;
    tracing::info!(
        target: "session",
        session_id = %session_id,
        stop_reason = ?stop.reason,
        credits_remaining = credits,
        "session_stopped"
    );

    let roots = state
        .set
        .roots
        .iter()
        .map(|(root_id, root)| {
            let obligations = root
                .obligations
                .iter()
                .filter_map(|(slot_key, node_id)| {
                    state.set.arena.get(*node_id).map(|node| {
                        (
                            slot_key.clone(),
                            NodeView {
                                node_key: node.node_key.clone(),
                                statement: node.statement.clone(),
                                role: node.role,
                                p: node.p,
                                k: node.k,
                                evaluated: node.evaluated,
                                decomp_type: node.decomp_type,
                                coupling: node.coupling,
                                children: node.children.keys().cloned().collect(),
                            },
                        )
                    })
                })
                .collect();
            (
                root_id.clone(),
                RootView {
                    root_id: root.root_id.clone(),
                    statement: root.statement.clone(),
                    exclusion_clause: root.exclusion_clause.clone(),
                    canonical_id: root.canonical_id.clone(),
                    status: root.status,
                    k_root: root.k_root,
                    p_ledger: state.set.p_ledger(root_id),
                    credits_spent: root.credits_spent,
                    retired: root.retired,
                    obligations,
                },
            )
        })
        .collect();

    Ok(SessionResult {
        session_id,
        roots,
        ledger: state.set.ledger.clone(),
        audit: recorder.into_trace(),
        stop_reason: stop.reason,
        credits_remaining: credits,
        total_credits_spent: state.total_credits_spent,
        operation_log,
        selection_output,
        certification_output,
        next_step_guidance: guidance,
    })
}

fn next_step_guidance(state: &EngineState, stop: &StopDecision) -> Vec<String> {
    let mut guidance = Vec::new();
    match stop.reason {
        StopReason::EpistemicallyExhausted => {
            if state.config.required_slots.is_empty() {
                guidance.push(
                    "declare a required slot template so roots can be scoped and evaluated"
                        .to_string(),
                );
            } else {
                guidance.push(
                    "supply additional discriminating evidence or widen the hypothesis set"
                        .to_string(),
                );
            }
        }
        StopReason::NoLegalOp => {
            guidance.push(
                "only reserved counterevidence credits remain; scope the leader or lower the reservation"
                    .to_string(),
            );
        }
        StopReason::ClosureGatesUnmet => {
            for issue in &stop.closure_issues {
                guidance.push(match issue.code {
                    ClosureIssueCode::WinnerMarginBelowMinimum => format!(
                        "grow the winner margin for '{}' with contrastive evaluations",
                        issue.target_id
                    ),
                    ClosureIssueCode::DecompositionDepthShallow => format!(
                        "decompose '{}' further to meet the contract depth",
                        issue.target_id
                    ),
                    ClosureIssueCode::AdjudicationIncomplete => format!(
                        "adjudicate the unresolved pair '{}'",
                        issue.target_id
                    ),
                });
            }
        }
        _ => {}
    }
    guidance
}

use std::sync::Arc;

use abductio_core::{
    config::SessionConfig,
    domain::{
        audit::{trace_from_jsonl, trace_to_jsonl},
        types::{Entailment, EvidenceBundle, EvidenceItem, Rubric},
        RootSeed, H_NOA_ID, H_UND_ID,
    },
    ports::{EvaluationOutcome, RunSessionDeps},
    replay_session, run_session,
    testing::{
        DeterministicDecomposer, DeterministicEvaluator, FixedClock, InMemoryAuditSink,
        SequentialIdProvider,
    },
    ReplayDeps, SessionRequest, SessionResult,
};

fn seed(root_id: &str, statement: &str) -> RootSeed {
    RootSeed {
        root_id: root_id.to_string(),
        statement: statement.to_string(),
        exclusion_clause: format!("No mechanism other than {statement}"),
        components: Vec::new(),
        story_cardinality: None,
    }
}

fn bundle() -> EvidenceBundle {
    let mut bundle = EvidenceBundle::default();
    bundle.items.insert(
        "ev1".to_string(),
        EvidenceItem {
            id: "ev1".to_string(),
            text: "Inspection found the component in a degraded state.".to_string(),
            source: Some("report-12".to_string()),
        },
    );
    bundle
}

fn outcome(p: f64, rubric: Rubric, entailment: Entailment) -> EvaluationOutcome {
    EvaluationOutcome {
        p,
        rubric: Some(rubric),
        evidence_ids: vec!["ev1".to_string()],
        discriminators: Vec::new(),
        non_discriminative: false,
        entailment,
    }
}

async fn recorded_session() -> (SessionResult, Vec<abductio_core::AuditEvent>) {
    let mut config = SessionConfig::default();
    config.required_slots = vec!["availability".to_string(), "feasibility".to_string()];
    let evaluator = DeterministicEvaluator::new()
        .script(
            "H1:availability",
            "",
            outcome(0.92, Rubric::new(2, 2, 2, 1), Entailment::Supports),
        )
        .script(
            "H1:feasibility",
            "",
            outcome(0.85, Rubric::new(2, 2, 1, 1), Entailment::Supports),
        )
        .script(
            "H2:availability",
            "",
            outcome(0.10, Rubric::new(2, 2, 2, 2), Entailment::Contradicts),
        )
        .script(
            "H2:feasibility",
            "",
            outcome(0.45, Rubric::new(1, 1, 1, 1), Entailment::Neutral),
        );
    let request = SessionRequest {
        claim: "Which mechanism failed?".to_string(),
        roots: vec![seed("H1", "Alpha mechanism"), seed("H2", "Beta mechanism")],
        evidence: Some(bundle()),
        mece_assessments: Vec::new(),
        config,
        credits: 8,
    };
    let sink = Arc::new(InMemoryAuditSink::default());
    let deps = RunSessionDeps::new(
        Arc::new(evaluator),
        Arc::new(DeterministicDecomposer::new()),
        sink.clone(),
    )
    .with_clock(Arc::new(FixedClock(1_700_000_000_000)))
    .with_id_provider(Arc::new(SequentialIdProvider::default()));

    let result = run_session(request, &deps).await.expect("session runs");
    (result, sink.events())
}

#[tokio::test]
async fn replay_reproduces_ledger_confidence_and_stop_reason() {
    let (original, trace) = recorded_session().await;

    let replay_sink = Arc::new(InMemoryAuditSink::default());
    let replayed = replay_session(&trace, ReplayDeps::new(replay_sink.clone()))
        .await
        .expect("replay runs");

    assert_eq!(replayed.stop_reason, original.stop_reason);
    for root_id in ["H1", "H2", H_NOA_ID, H_UND_ID] {
        assert!(
            (replayed.ledger[root_id] - original.ledger[root_id]).abs() < 1e-12,
            "replayed ledger mass for {root_id} must match"
        );
    }
    for root_id in ["H1", "H2"] {
        assert!(
            (replayed.roots[root_id].k_root - original.roots[root_id].k_root).abs() < 1e-12
        );
    }
    assert_eq!(replayed.total_credits_spent, original.total_credits_spent);
}

#[tokio::test]
async fn replay_emits_an_identical_audit_event_sequence() {
    let (_, trace) = recorded_session().await;

    let replay_sink = Arc::new(InMemoryAuditSink::default());
    replay_session(&trace, ReplayDeps::new(replay_sink.clone()))
        .await
        .expect("replay runs");

    assert_eq!(replay_sink.events(), trace);
}

#[tokio::test]
async fn replay_survives_the_jsonl_round_trip() {
    let (original, trace) = recorded_session().await;

    let encoded = trace_to_jsonl(&trace).expect("trace encodes");
    let decoded = trace_from_jsonl(&encoded).expect("trace decodes");
    assert_eq!(decoded, trace);

    let replay_sink = Arc::new(InMemoryAuditSink::default());
    let replayed = replay_session(&decoded, ReplayDeps::new(replay_sink))
        .await
        .expect("replay runs");
    assert_eq!(replayed.stop_reason, original.stop_reason);
    assert_eq!(replayed.ledger, original.ledger);
}

#[tokio::test]
async fn replay_rejects_a_trace_without_an_envelope() {
    let (_, trace) = recorded_session().await;
    let headless: Vec<_> = trace.into_iter().skip(1).collect();

    let replay_sink = Arc::new(InMemoryAuditSink::default());
    let err = replay_session(&headless, ReplayDeps::new(replay_sink))
        .await
        .expect_err("headless trace must fail");
    assert!(err.message.contains("envelope"));
}

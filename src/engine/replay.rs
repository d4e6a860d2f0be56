use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::{
    domain::{
        audit::{AuditEvent, AuditEventKind},
        types::StopReason,
    },
    engine::session::{run_session, SessionRequest, SessionResult},
    error::{invalid_request, invariant_violation, port_failure, EngineError},
    ports::{
        AuditSink, Clock, DecompositionOutcome, DecompositionRequest, EvaluationOutcome,
        EvaluationRequest, Evaluator, Decomposer, IdProvider, RunSessionDeps,
    },
    testing::FixedClock,
};

pub struct ReplayDeps {
    pub audit_sink: Arc<dyn AuditSink>,
    pub clock: Option<Arc<dyn Clock>>,
}

impl ReplayDeps {
    pub fn new(audit_sink: Arc<dyn AuditSink>) -> Self {
        Self {
            audit_sink,
            clock: None,
        }
    }
}

struct TraceEvaluator {
    outcomes: Mutex<VecDeque<EvaluationOutcome>>,
}

#[async_trait]
impl Evaluator for TraceEvaluator {
    async fn evaluate(&self, request: EvaluationRequest) -> Result<EvaluationOutcome, EngineError> {
        self.outcomes
            .lock()
            .map_err(|_| port_failure("trace evaluator mutex poisoned"))?
            .pop_front()
            .ok_or_else(|| {
                port_failure(format!(
                    "trace exhausted: no recorded evaluation for '{}'",
                    request.node.node_key
                ))
            })
    }
}

struct TraceDecomposer {
    outcomes: Mutex<VecDeque<DecompositionOutcome>>,
}

#[async_trait]
impl Decomposer for TraceDecomposer {
    async fn decompose(
        &self,
        request: DecompositionRequest,
    ) -> Result<DecompositionOutcome, EngineError> {
        self.outcomes
            .lock()
            .map_err(|_| port_failure("trace decomposer mutex poisoned"))?
            .pop_front()
            .ok_or_else(|| {
                port_failure(format!(
                    "trace exhausted: no recorded decomposition for '{}'",
                    request.root_id
                ))
            })
    }
}

struct FixedIdProvider(String);

impl IdProvider for FixedIdProvider {
    fn mint_session_id(&self) -> String {
        self.0.clone()
    }
}

/// Re-runs a recorded session by feeding the recorded oracle outcomes back
/// through contract enforcement and the update pipeline. The oracles are
/// never called; divergence from the recorded stop reason is an invariant
/// violation, not a silent difference.
pub async fn replay_session(
    trace: &[AuditEvent],
    deps: ReplayDeps,
) -> Result<SessionResult, EngineError> {
    let envelope = trace
        .first()
        .filter(|event| event.kind == AuditEventKind::SessionEnvelope)
        .ok_or_else(|| invalid_request("audit trace does not start with a session envelope"))?;

    let request: SessionRequest =
        serde_json::from_value(envelope.payload["request"].clone()).map_err(|err| {
            invalid_request(format!("session envelope carries no replayable request: {err}"))
        })?;

    let mut evaluations = VecDeque::new();
    let mut decompositions = VecDeque::new();
    for event in trace {
        if event.kind != AuditEventKind::OpExecuted {
            continue;
        }
        let outcome = &event.payload["outcome"];
        if let Some(evaluation) = outcome.get("evaluation") {
            let parsed: EvaluationOutcome = serde_json::from_value(evaluation.clone())
                .map_err(|err| invalid_request(format!("recorded evaluation corrupt: {err}")))?;
            evaluations.push_back(parsed);
        } else if let Some(decomposition) = outcome.get("decomposition") {
            let parsed: DecompositionOutcome = serde_json::from_value(decomposition.clone())
                .map_err(|err| invalid_request(format!("recorded decomposition corrupt: {err}")))?;
            decompositions.push_back(parsed);
        }
    }

    let recorded_stop = trace
        .iter()
        .rev()
        .find(|event| event.kind == AuditEventKind::SessionStopped)
        .and_then(|event| {
            serde_json::from_value::<StopReason>(event.payload["stop_reason"].clone()).ok()
        });

    let clock = deps
        .clock
        .unwrap_or_else(|| Arc::new(FixedClock(envelope.ts)));
    let replay_deps = RunSessionDeps {
        evaluator: Arc::new(TraceEvaluator {
            outcomes: Mutex::new(evaluations),
        }),
        decomposer: Arc::new(TraceDecomposer {
            outcomes: Mutex::new(decompositions),
        }),
        audit_sink: deps.audit_sink,
        clock: Some(clock),
        id_provider: Some(Arc::new(FixedIdProvider(envelope.target_id.clone()))),
        cancellation: None,
    };

    let result = run_session(request, &replay_deps).await?;

    if let Some(recorded) = recorded_stop {
        if recorded != result.stop_reason {
            return Err(invariant_violation(format!(
                "replay diverged: recorded stop reason {recorded:?}, replayed {:?}",
                result.stop_reason
            )));
        }
    }
    Ok(result)
}

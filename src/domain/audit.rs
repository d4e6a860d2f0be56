use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    canonical::canonicalize_json,
    error::{audit_failure, EngineError},
    ports::AuditSink,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventKind {
    SessionEnvelope,
    InvariantSumToOneCheck,
    OpExecuted,
    DecomposeApplied,
    DecomposeFailed,
    UnscopedCapped,
    ConservativeDeltaEnforced,
    ContradictionFloorApplied,
    DiscriminatorEvidenceInvalid,
    NonDiscriminativeDriftBounded,
    QuoteFidelityDegraded,
    QuoteFidelityBlocked,
    ConfidenceUpdated,
    LedgerUpdated,
    AbsorberEnforced,
    DynamicAbstention,
    CompositionalRegularized,
    PairVerdictUpdated,
    PairSelected,
    PairDeferred,
    ContenderRetired,
    ActiveSetLocked,
    CounterevidenceWindowEntered,
    TauAdjusted,
    GateFailed,
    DecisionContractPassed,
    AnomalyRecorded,
    PortFailure,
    CreditRefunded,
    CancellationObserved,
    SimpleClaimModeUsed,
    SimpleClaimOpinionDerived,
    ConfidenceProjectedConservatively,
    SessionStopped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub seq: u64,
    pub ts: u64,
    pub kind: AuditEventKind,
    pub target_id: String,
    pub payload: Value,
    pub credits_before: u64,
    pub credits_after: u64,
}

pub type AuditTrace = Vec<AuditEvent>;

/// Assigns strictly increasing sequence numbers, fans every event out to the
/// session sink, and retains a copy for the result and for replay. A sink
/// failure is a session error, never a silent drop.
pub struct AuditRecorder {
    sink: Arc<dyn AuditSink>,
    events: AuditTrace,
    next_seq: u64,
}

impl AuditRecorder {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self {
            sink,
            events: Vec::new(),
            next_seq: 0,
        }
    }

    pub fn record(
        &mut self,
        ts: u64,
        kind: AuditEventKind,
        target_id: impl Into<String>,
        payload: Value,
        credits_before: u64,
        credits_after: u64,
    ) -> Result<&AuditEvent, EngineError> {
        let event = AuditEvent {
            seq: self.next_seq,
            ts,
            kind,
            target_id: target_id.into(),
            payload: canonicalize_json(&payload),
            credits_before,
            credits_after,
        };
        self.sink
            .append(&event)
            .map_err(|err| audit_failure(format!("audit sink append failed: {err}")))?;
        self.next_seq += 1;
        self.events.push(event);
        Ok(self.events.last().unwrap_or_else(|| unreachable!()))
    }

    pub fn events(&self) -> &[AuditEvent] {
        &self.events
    }

    pub fn into_trace(self) -> AuditTrace {
        self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// JSON-lines form of a trace: the first line is the session envelope, the
/// last the stop terminator, one self-contained event per line.
pub fn trace_to_jsonl(trace: &[AuditEvent]) -> Result<String, EngineError> {
    let mut out = String::new();
    for event in trace {
        let line = serde_json::to_string(event)
            .map_err(|err| audit_failure(format!("failed to encode audit event: {err}")))?;
        out.push_str(&line);
        out.push('\n');
    }
    Ok(out)
}

pub fn trace_from_jsonl(text: &str) -> Result<AuditTrace, EngineError> {
    let mut trace = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let event: AuditEvent = serde_json::from_str(line).map_err(|err| {
            audit_failure(format!("malformed audit line {}: {err}", line_no + 1))
        })?;
        if event.seq != trace.len() as u64 {
            return Err(audit_failure(format!(
                "audit line {} has sequence {} where {} was expected",
                line_no + 1,
                event.seq,
                trace.len()
            )));
        }
        trace.push(event);
    }
    if let Some(first) = trace.first() {
        if first.kind != AuditEventKind::SessionEnvelope {
            return Err(audit_failure(
                "audit trace must begin with a session envelope",
            ));
        }
    }
    Ok(trace)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{trace_from_jsonl, trace_to_jsonl, AuditEventKind, AuditRecorder};
    use crate::testing::InMemoryAuditSink;

    #[test]
    fn recorder_assigns_contiguous_sequence_numbers() {
        let sink = Arc::new(InMemoryAuditSink::default());
        let mut recorder = AuditRecorder::new(sink.clone());

        for credits in [3u64, 2, 1] {
            recorder
                .record(
                    0,
                    AuditEventKind::OpExecuted,
                    "H1",
                    serde_json::json!({"op": "DECOMPOSE"}),
                    credits,
                    credits - 1,
                )
                .expect("append succeeds");
        }

        let seqs: Vec<u64> = recorder.events().iter().map(|event| event.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
        assert_eq!(sink.events().len(), 3);
    }

    #[test]
    fn payloads_are_canonicalized_on_record() {
        let sink = Arc::new(InMemoryAuditSink::default());
        let mut recorder = AuditRecorder::new(sink);
        let event = recorder
            .record(
                0,
                AuditEventKind::LedgerUpdated,
                "H1",
                serde_json::json!({"z": 1, "a": {"y": 2, "b": 3}}),
                1,
                0,
            )
            .expect("append succeeds")
            .clone();
        assert_eq!(
            event.payload.to_string(),
            r#"{"a":{"b":3,"y":2},"z":1}"#
        );
    }

    #[test]
    fn jsonl_round_trip_preserves_the_trace() {
        let sink = Arc::new(InMemoryAuditSink::default());
        let mut recorder = AuditRecorder::new(sink);
        recorder
            .record(
                7,
                AuditEventKind::SessionEnvelope,
                "session",
                serde_json::json!({"config_hash": "cfg:abc"}),
                5,
                5,
            )
            .expect("append succeeds");
        recorder
            .record(
                8,
                AuditEventKind::SessionStopped,
                "session",
                serde_json::json!({"stop_reason": "CREDITS_EXHAUSTED"}),
                0,
                0,
            )
            .expect("append succeeds");

        let trace = recorder.into_trace();
        let text = trace_to_jsonl(&trace).expect("encodes");
        let decoded = trace_from_jsonl(&text).expect("decodes");
        assert_eq!(decoded, trace);
    }

    #[test]
    fn jsonl_decode_rejects_sequence_gaps() {
        let text = concat!(
            r#"{"seq":0,"ts":0,"kind":"SESSION_ENVELOPE","target_id":"s","payload":{},"credits_before":1,"credits_after":1}"#,
            "\n",
            r#"{"seq":2,"ts":0,"kind":"SESSION_STOPPED","target_id":"s","payload":{},"credits_before":0,"credits_after":0}"#,
            "\n"
        );
        let err = trace_from_jsonl(text).expect_err("gap must fail");
        assert!(err.message.contains("sequence"));
    }

    #[test]
    fn jsonl_decode_requires_an_envelope_first() {
        let text = r#"{"seq":0,"ts":0,"kind":"OP_EXECUTED","target_id":"H1","payload":{},"credits_before":1,"credits_after":0}"#;
        let err = trace_from_jsonl(text).expect_err("missing envelope must fail");
        assert!(err.message.contains("envelope"));
    }
}

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::{
    domain::{audit::AuditEvent, types::Entailment},
    error::{port_failure, EngineError},
    ports::{
        AuditSink, Clock, DecomposedChild, Decomposer, DecompositionOutcome, DecompositionRequest,
        DecompositionStructure, EvaluationOutcome, EvaluationRequest, Evaluator, IdProvider,
    },
};

/// Scripted evaluator keyed by `(node_key, pair_key)`; the pair key is empty
/// for non-contrastive calls. Unscripted nodes return a neutral outcome that
/// leaves the ledger untouched through the conservative-delta policy.
#[derive(Debug, Default)]
pub struct DeterministicEvaluator {
    outcomes: BTreeMap<(String, String), EvaluationOutcome>,
    fail_on: Option<String>,
}

impl DeterministicEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(mut self, node_key: &str, pair_key: &str, outcome: EvaluationOutcome) -> Self {
        self.outcomes
            .insert((node_key.to_string(), pair_key.to_string()), outcome);
        self
    }

    /// The evaluator fails with a port error when this node is targeted.
    pub fn fail_on(mut self, node_key: &str) -> Self {
        self.fail_on = Some(node_key.to_string());
        self
    }
}

#[async_trait]
impl Evaluator for DeterministicEvaluator {
    async fn evaluate(&self, request: EvaluationRequest) -> Result<EvaluationOutcome, EngineError> {
        if self.fail_on.as_deref() == Some(request.node.node_key.as_str()) {
            return Err(port_failure(format!(
                "scripted evaluator failure for '{}'",
                request.node.node_key
            )));
        }
        let pair_key = request
            .contrastive
            .as_ref()
            .map(|context| context.pair_key.clone())
            .unwrap_or_default();
        let keyed = self
            .outcomes
            .get(&(request.node.node_key.clone(), pair_key))
            .or_else(|| {
                self.outcomes
                    .get(&(request.node.node_key.clone(), String::new()))
            });
        Ok(keyed.cloned().unwrap_or(EvaluationOutcome {
            p: request.node.p,
            rubric: None,
            evidence_ids: Vec::new(),
            discriminators: Vec::new(),
            non_discriminative: false,
            entailment: Entailment::Neutral,
        }))
    }
}

/// Scripted decomposer keyed by target (`root_id` or `root_id:slot_key`).
/// Unscripted root targets synthesize one statement per required slot.
#[derive(Debug, Default)]
pub struct DeterministicDecomposer {
    outcomes: BTreeMap<String, DecompositionOutcome>,
}

impl DeterministicDecomposer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(mut self, target: &str, outcome: DecompositionOutcome) -> Self {
        self.outcomes.insert(target.to_string(), outcome);
        self
    }

    pub fn script_failure(self, target: &str, reason: &str) -> Self {
        self.script(
            target,
            DecompositionOutcome::Failure {
                reason: reason.to_string(),
            },
        )
    }
}

#[async_trait]
impl Decomposer for DeterministicDecomposer {
    async fn decompose(
        &self,
        request: DecompositionRequest,
    ) -> Result<DecompositionOutcome, EngineError> {
        let target = match &request.slot_key {
            Some(slot_key) => format!("{}:{}", request.root_id, slot_key),
            None => request.root_id.clone(),
        };
        if let Some(outcome) = self.outcomes.get(&target) {
            return Ok(outcome.clone());
        }
        let mut slot_statements = BTreeMap::new();
        for slot_key in &request.required_slots {
            slot_statements.insert(
                slot_key.clone(),
                format!("{} satisfies {}", request.statement, slot_key),
            );
        }
        Ok(DecompositionOutcome::Structure(DecompositionStructure {
            slot_statements,
            children: Vec::new(),
            decomp_type: None,
            coupling: 0.0,
            provenance: Some("deterministic-default".to_string()),
        }))
    }
}

pub fn and_children(children: &[(&str, &str)], coupling: f64) -> DecompositionOutcome {
    DecompositionOutcome::Structure(DecompositionStructure {
        slot_statements: BTreeMap::new(),
        children: children
            .iter()
            .map(|(key, statement)| DecomposedChild {
                key: key.to_string(),
                statement: statement.to_string(),
                role: crate::domain::types::NodeRole::Nec,
            })
            .collect(),
        decomp_type: Some(crate::domain::types::DecompType::And),
        coupling,
        provenance: Some("deterministic-default".to_string()),
    })
}

#[derive(Debug, Default)]
pub struct InMemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl InMemoryAuditSink {
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn append(&self, event: &AuditEvent) -> Result<(), EngineError> {
        self.events
            .lock()
            .map_err(|_| port_failure("audit sink mutex poisoned"))?
            .push(event.clone());
        Ok(())
    }
}

/// Constant clock so two runs of the same session produce byte-identical
/// audit logs.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub u64);

impl Clock for FixedClock {
    fn now_ms(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Default)]
pub struct SequentialIdProvider {
    counter: AtomicU64,
}

impl IdProvider for SequentialIdProvider {
    fn mint_session_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("sess:{n:04}")
    }
}

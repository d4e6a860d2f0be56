use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    domain::{
        audit::AuditEvent,
        types::{
            DecompType, DiscriminatorDirection, DiscriminatorRecord, Entailment, EvidenceBundle,
            EvidenceId, NodeKey, NodeRole, PairKey, RootId, Rubric,
        },
    },
    error::EngineError,
};

/// Immutable view of a node handed to the evaluator. The oracle never sees
/// or touches engine state directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub node_key: NodeKey,
    pub canonical_id: String,
    pub root_id: RootId,
    pub slot_key: String,
    pub statement: String,
    pub role: NodeRole,
    pub p: f64,
    pub k: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContrastiveContext {
    pub pair_key: PairKey,
    pub left_root_id: RootId,
    pub right_root_id: RootId,
    pub target_side: DiscriminatorDirection,
    #[serde(default)]
    pub discriminator_spec: Option<String>,
    #[serde(default)]
    pub counterevidence_probe: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRequest {
    pub node: NodeSnapshot,
    #[serde(default)]
    pub contrastive: Option<ContrastiveContext>,
    #[serde(default)]
    pub evidence: EvidenceBundle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationOutcome {
    pub p: f64,
    #[serde(default)]
    pub rubric: Option<Rubric>,
    #[serde(default)]
    pub evidence_ids: Vec<EvidenceId>,
    #[serde(default)]
    pub discriminators: Vec<DiscriminatorRecord>,
    #[serde(default)]
    pub non_discriminative: bool,
    pub entailment: Entailment,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecompositionRequest {
    pub root_id: RootId,
    /// Present when a slot (rather than the root) is being decomposed.
    #[serde(default)]
    pub slot_key: Option<String>,
    pub statement: String,
    pub required_slots: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecomposedChild {
    pub key: String,
    pub statement: String,
    pub role: NodeRole,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecompositionStructure {
    /// Slot statements for a root target, keyed by slot key.
    #[serde(default)]
    pub slot_statements: BTreeMap<String, String>,
    /// Children for a slot target.
    #[serde(default)]
    pub children: Vec<DecomposedChild>,
    #[serde(default)]
    pub decomp_type: Option<DecompType>,
    #[serde(default)]
    pub coupling: f64,
    #[serde(default)]
    pub provenance: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DecompositionOutcome {
    Structure(DecompositionStructure),
    Failure { reason: String },
}

#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(&self, request: EvaluationRequest) -> Result<EvaluationOutcome, EngineError>;
}

#[async_trait]
pub trait Decomposer: Send + Sync {
    async fn decompose(
        &self,
        request: DecompositionRequest,
    ) -> Result<DecompositionOutcome, EngineError>;
}

/// Must append in call order without reordering or dropping; a failure is a
/// session error, not a recoverable anomaly.
pub trait AuditSink: Send + Sync {
    fn append(&self, event: &AuditEvent) -> Result<(), EngineError>;
}

pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

pub trait IdProvider: Send + Sync {
    fn mint_session_id(&self) -> String;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or(0)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct UuidIdProvider;

impl IdProvider for UuidIdProvider {
    fn mint_session_id(&self) -> String {
        format!("sess:{}", uuid::Uuid::now_v7())
    }
}

pub struct RunSessionDeps {
    pub evaluator: Arc<dyn Evaluator>,
    pub decomposer: Arc<dyn Decomposer>,
    pub audit_sink: Arc<dyn AuditSink>,
    pub clock: Option<Arc<dyn Clock>>,
    pub id_provider: Option<Arc<dyn IdProvider>>,
    /// Checked between operations only; a set flag stops the session with a
    /// clean CANCELLED reason and a full audit flush.
    pub cancellation: Option<Arc<AtomicBool>>,
}

impl RunSessionDeps {
    pub fn new(
        evaluator: Arc<dyn Evaluator>,
        decomposer: Arc<dyn Decomposer>,
        audit_sink: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            evaluator,
            decomposer,
            audit_sink,
            clock: None,
            id_provider: None,
            cancellation: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_id_provider(mut self, id_provider: Arc<dyn IdProvider>) -> Self {
        self.id_provider = Some(id_provider);
        self
    }

    pub fn with_cancellation(mut self, cancellation: Arc<AtomicBool>) -> Self {
        self.cancellation = Some(cancellation);
        self
    }
}

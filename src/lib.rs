pub mod adjudication;
pub mod canonical;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod gates;
pub mod logging;
pub mod policy;
pub mod ports;
pub mod testing;
pub mod validate;

pub use config::{QuoteFidelityMode, ReasoningMode, SessionConfig, WorldMode};
pub use domain::{
    AuditEvent, AuditEventKind, AuditTrace, HypothesisSet, RootHypothesis, StopReason, H_NOA_ID,
    H_UND_ID,
};
pub use engine::replay::ReplayDeps;
pub use engine::{
    replay_session, run_session, run_simple_claim_session, CertificationOutput, RootSpec,
    SelectionOutput, SessionRequest, SessionResult, SimpleClaimLabel, SimpleClaimOpinion,
    SimpleClaimOptions, SimpleClaimResult,
};
pub use error::{EngineError, EngineErrorKind};
pub use ports::{
    AuditSink, Clock, Decomposer, DecompositionOutcome, EvaluationOutcome, Evaluator, IdProvider,
    RunSessionDeps,
};
pub use validate::{validate_hypothesis_set, ValidationReport};

pub mod audit;
pub mod hypothesis;
pub mod node;
pub mod types;

pub use audit::{AuditEvent, AuditEventKind, AuditRecorder, AuditTrace};
pub use hypothesis::{HypothesisSet, RootHypothesis, RootSeed, H_NOA_ID, H_UND_ID};
pub use node::{Node, NodeArena, NodeId};
pub use types::{
    pair_key, CertificationStatus, DecompType, DiscriminatorDirection, DiscriminatorKind,
    DiscriminatorRecord, Entailment, NodeRole, OperationKind, PairVerdict, RootStatus, Rubric,
    StopReason,
};

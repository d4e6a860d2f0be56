use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineErrorKind {
    InvalidRequest,
    ConfigRejected,
    InvariantViolation,
    ContractViolation,
    PortFailure,
    AuditFailure,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineError {
    pub kind: EngineErrorKind,
    pub message: String,
}

impl EngineError {
    pub fn new(kind: EngineErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for EngineError {}

pub fn invalid_request(message: impl Into<String>) -> EngineError {
    EngineError::new(EngineErrorKind::InvalidRequest, message)
}

pub fn config_rejected(message: impl Into<String>) -> EngineError {
    EngineError::new(EngineErrorKind::ConfigRejected, message)
}

pub fn invariant_violation(message: impl Into<String>) -> EngineError {
    EngineError::new(EngineErrorKind::InvariantViolation, message)
}

pub fn contract_violation(message: impl Into<String>) -> EngineError {
    EngineError::new(EngineErrorKind::ContractViolation, message)
}

pub fn port_failure(message: impl Into<String>) -> EngineError {
    EngineError::new(EngineErrorKind::PortFailure, message)
}

pub fn audit_failure(message: impl Into<String>) -> EngineError {
    EngineError::new(EngineErrorKind::AuditFailure, message)
}

pub fn internal_error(message: impl Into<String>) -> EngineError {
    EngineError::new(EngineErrorKind::Internal, message)
}

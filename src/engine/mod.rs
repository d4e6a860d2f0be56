pub mod pipeline;
pub mod replay;
pub mod scheduler;
pub mod session;
pub mod simple_claim;

pub use replay::replay_session;
pub use session::{
    run_session, CertificationOutput, NodeView, OperationRecord, RootSpec, RootView,
    SelectionOutput, SessionRequest, SessionResult,
};
pub use simple_claim::{
    build_simple_claim_request, run_simple_claim_session, SimpleClaimLabel, SimpleClaimOpinion,
    SimpleClaimOptions, SimpleClaimResult, H_NO_ID, H_YES_ID,
};

use crate::{
    adjudication::{DiscriminatorLedger, PairQueue},
    config::SessionConfig,
    domain::hypothesis::HypothesisSet,
    domain::types::EvidenceBundle,
    policy::abstention::EpistemicSignals,
};

/// Mutable session state threaded through the scheduler and the update
/// pipeline. Owned exclusively by one session; nothing here is shared.
pub(crate) struct EngineState {
    pub config: SessionConfig,
    pub set: HypothesisSet,
    pub queue: PairQueue,
    pub discriminators: DiscriminatorLedger,
    pub signals: EpistemicSignals,
    pub evidence: EvidenceBundle,
    pub credits_remaining: u64,
    pub total_credits_spent: u64,
    pub tau_effective: f64,
    pub frame_cap_triggered: bool,
    pub counterevidence_window_entered: bool,
}

impl EngineState {
    pub fn new(
        config: SessionConfig,
        set: HypothesisSet,
        evidence: EvidenceBundle,
        credits: u64,
        tau_effective: f64,
    ) -> Self {
        let queue = PairQueue::new(
            config.pair_adjudication.clone(),
            config.beta,
            config.weight_clamp,
        );
        Self {
            config,
            set,
            queue,
            discriminators: DiscriminatorLedger::default(),
            signals: EpistemicSignals::default(),
            evidence,
            credits_remaining: credits,
            total_credits_spent: 0,
            tau_effective,
            frame_cap_triggered: false,
            counterevidence_window_entered: false,
        }
    }

    /// Credits at the tail of the budget reserved for counterevidence
    /// probes; regular operations stop once only these remain.
    pub fn in_counterevidence_window(&self) -> bool {
        let reserve = self.config.pair_adjudication.counterevidence_reserve;
        reserve > 0 && self.credits_remaining <= reserve
    }
}

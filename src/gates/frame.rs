use crate::{policy::abstention::EpistemicSignals, policy::clamp01};

/// Frame adequacy v2: a [0,1] score for how well the current hypothesis
/// frame is absorbing the evidence. Contradiction and non-discriminative
/// densities erode it fastest; unresolved pair pressure erodes it slower.
pub fn frame_adequacy_score(signals: &EpistemicSignals) -> f64 {
    clamp01(
        1.0 - 0.4 * signals.contradiction_density()
            - 0.4 * signals.non_discriminative_density()
            - 0.2 * signals.unresolved_pair_ratio(),
    )
}

use serde::{Deserialize, Serialize};

use crate::{config::DynamicAbstentionConfig, policy::clamp01};

/// Rolling counters the session keeps for abstention pressure and frame
/// adequacy. All denominators are guarded; an empty window reads as zero
/// pressure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EpistemicSignals {
    pub unresolved_pairs: usize,
    pub feasible_pairs: usize,
    pub recent_evaluations: usize,
    pub recent_contradictions: usize,
    pub recent_non_discriminative: usize,
}

impl EpistemicSignals {
    pub fn unresolved_pair_ratio(&self) -> f64 {
        if self.feasible_pairs == 0 {
            0.0
        } else {
            self.unresolved_pairs as f64 / self.feasible_pairs as f64
        }
    }

    pub fn contradiction_density(&self) -> f64 {
        if self.recent_evaluations == 0 {
            0.0
        } else {
            self.recent_contradictions as f64 / self.recent_evaluations as f64
        }
    }

    pub fn non_discriminative_density(&self) -> f64 {
        if self.recent_evaluations == 0 {
            0.0
        } else {
            self.recent_non_discriminative as f64 / self.recent_evaluations as f64
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AbstentionOutcome {
    pub pressure: f64,
    pub mass: f64,
}

/// Linear pressure over the four epistemic signals, clamped into the
/// configured mass band. The result replaces the fixed H_UND floor.
pub fn dynamic_abstention_mass(
    config: &DynamicAbstentionConfig,
    signals: &EpistemicSignals,
    frame_adequacy: f64,
) -> AbstentionOutcome {
    let pressure = config.weight_unresolved_pairs * signals.unresolved_pair_ratio()
        + config.weight_contradiction_density * signals.contradiction_density()
        + config.weight_non_discriminative * signals.non_discriminative_density()
        + config.weight_frame_inadequacy * clamp01(1.0 - frame_adequacy);
    let mass = pressure.clamp(config.min_mass, config.max_mass);
    AbstentionOutcome { pressure, mass }
}

#[cfg(test)]
mod tests {
    use super::{dynamic_abstention_mass, EpistemicSignals};
    use crate::config::DynamicAbstentionConfig;

    #[test]
    fn empty_windows_read_as_minimum_mass() {
        let config = DynamicAbstentionConfig::default();
        let outcome =
            dynamic_abstention_mass(&config, &EpistemicSignals::default(), 1.0);
        assert_eq!(outcome.pressure, 0.0);
        assert_eq!(outcome.mass, config.min_mass);
    }

    #[test]
    fn pressure_is_the_weighted_signal_sum() {
        let config = DynamicAbstentionConfig::default();
        let signals = EpistemicSignals {
            unresolved_pairs: 2,
            feasible_pairs: 4,
            recent_evaluations: 10,
            recent_contradictions: 4,
            recent_non_discriminative: 2,
        };
        let outcome = dynamic_abstention_mass(&config, &signals, 0.8);
        let expected = 0.25 * 0.5 + 0.25 * 0.4 + 0.25 * 0.2 + 0.25 * 0.2;
        assert!((outcome.pressure - expected).abs() < 1e-12);
        assert!((outcome.mass - expected).abs() < 1e-12);
    }

    #[test]
    fn mass_is_clamped_to_the_configured_band() {
        let config = DynamicAbstentionConfig::default();
        let saturated = EpistemicSignals {
            unresolved_pairs: 8,
            feasible_pairs: 8,
            recent_evaluations: 4,
            recent_contradictions: 4,
            recent_non_discriminative: 4,
        };
        let outcome = dynamic_abstention_mass(&config, &saturated, 0.0);
        assert_eq!(outcome.mass, config.max_mass);
    }
}

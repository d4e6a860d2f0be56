use serde::{Deserialize, Serialize};

use crate::config::{ReasoningMode, SessionConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapSource {
    Profile,
    FrameAdequacy,
    UnvalidatedCalibration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TauResolution {
    pub tau_effective: f64,
    pub cap: f64,
    pub cap_sources: Vec<CapSource>,
    pub adjusted: bool,
    pub incompatible: bool,
}

/// Resolves the effective closure threshold against every active confidence
/// cap. In certify mode a cap below tau is a structural incompatibility; in
/// explore mode tau is lowered to the cap and the adjustment is flagged for
/// the audit stream.
pub fn resolve_effective_tau(config: &SessionConfig, frame_cap_triggered: bool) -> TauResolution {
    let mut cap = config.profile_confidence_cap;
    let mut cap_sources = vec![CapSource::Profile];

    if frame_cap_triggered && config.frame_adequacy.cap < cap {
        cap = config.frame_adequacy.cap;
        cap_sources.push(CapSource::FrameAdequacy);
    }
    if let Some(calibration_cap) = config.forecast_calibration_cap {
        if calibration_cap < cap {
            cap = calibration_cap;
            cap_sources.push(CapSource::UnvalidatedCalibration);
        }
    }

    if cap >= config.tau {
        return TauResolution {
            tau_effective: config.tau,
            cap,
            cap_sources,
            adjusted: false,
            incompatible: false,
        };
    }

    match config.reasoning_mode {
        ReasoningMode::Certify => TauResolution {
            tau_effective: config.tau,
            cap,
            cap_sources,
            adjusted: false,
            incompatible: true,
        },
        ReasoningMode::Explore => TauResolution {
            tau_effective: cap,
            cap,
            cap_sources,
            adjusted: true,
            incompatible: false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::{resolve_effective_tau, CapSource};
    use crate::config::{ReasoningMode, SessionConfig};

    #[test]
    fn unconstrained_tau_passes_through() {
        let config = SessionConfig::default();
        let resolution = resolve_effective_tau(&config, false);
        assert_eq!(resolution.tau_effective, config.tau);
        assert!(!resolution.adjusted);
        assert!(!resolution.incompatible);
    }

    #[test]
    fn explore_mode_lowers_tau_to_the_cap() {
        let mut config = SessionConfig::default();
        config.tau = 0.95;
        config.profile_confidence_cap = 0.80;
        let resolution = resolve_effective_tau(&config, false);
        assert_eq!(resolution.tau_effective, 0.80);
        assert!(resolution.adjusted);
    }

    #[test]
    fn certify_mode_reports_incompatibility() {
        let mut config = SessionConfig::default();
        config.reasoning_mode = ReasoningMode::Certify;
        config.tau = 0.95;
        config.forecast_calibration_cap = Some(0.70);
        let resolution = resolve_effective_tau(&config, false);
        assert!(resolution.incompatible);
        assert!(resolution
            .cap_sources
            .contains(&CapSource::UnvalidatedCalibration));
    }

    #[test]
    fn frame_cap_binds_only_when_triggered() {
        let mut config = SessionConfig::default();
        config.tau = 0.75;
        config.frame_adequacy.cap = 0.60;
        assert!(!resolve_effective_tau(&config, false).adjusted);
        let triggered = resolve_effective_tau(&config, true);
        assert_eq!(triggered.tau_effective, 0.60);
        assert!(triggered.cap_sources.contains(&CapSource::FrameAdequacy));
    }
}

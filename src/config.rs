use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    canonical::fingerprint_value,
    error::{config_rejected, EngineError},
};

pub const DEFAULT_REQUIRED_SLOTS: [&str; 4] = [
    "feasibility",
    "availability",
    "fit_to_key_features",
    "defeater_resistance",
];

fn default_tau() -> f64 {
    0.75
}

fn default_epsilon() -> f64 {
    0.10
}

fn default_gamma_noa() -> f64 {
    0.10
}

fn default_gamma_und() -> f64 {
    0.10
}

fn default_alpha() -> f64 {
    0.60
}

fn default_beta() -> f64 {
    1.0
}

fn default_weight_clamp() -> f64 {
    3.0
}

fn default_lambda_voi() -> f64 {
    0.25
}

fn default_world_mode() -> WorldMode {
    WorldMode::Open
}

fn default_required_slots() -> Vec<String> {
    DEFAULT_REQUIRED_SLOTS
        .iter()
        .map(|slot| slot.to_string())
        .collect()
}

fn default_epsilon_nc() -> f64 {
    0.02
}

fn default_quote_fidelity_mode() -> QuoteFidelityMode {
    QuoteFidelityMode::Advisory
}

fn default_reasoning_mode() -> ReasoningMode {
    ReasoningMode::Explore
}

fn default_profile_tag() -> String {
    "explore".to_string()
}

fn default_profile_confidence_cap() -> f64 {
    0.90
}

fn default_active_set_size() -> usize {
    3
}

fn default_pair_budget() -> usize {
    6
}

fn default_pair_min_margin() -> usize {
    1
}

fn default_pair_min_count() -> usize {
    1
}

fn default_abstention_weight() -> f64 {
    0.25
}

fn default_abstention_min() -> f64 {
    0.02
}

fn default_abstention_max() -> f64 {
    0.35
}

fn default_frame_threshold() -> f64 {
    0.35
}

fn default_frame_cap() -> f64 {
    0.70
}

fn default_min_winner_margin() -> f64 {
    0.10
}

fn default_max_pair_overlap() -> u8 {
    1
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorldMode {
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteFidelityMode {
    Strict,
    Advisory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningMode {
    Explore,
    Certify,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PairAdjudicationConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_active_set_size")]
    pub active_set_size: usize,
    #[serde(default)]
    pub mass_ratio_floor: f64,
    #[serde(default = "default_true")]
    pub sticky_lock: bool,
    #[serde(default = "default_pair_budget")]
    pub pair_budget: usize,
    #[serde(default = "default_true")]
    pub value_prioritization: bool,
    #[serde(default = "default_pair_min_margin")]
    pub min_margin: usize,
    #[serde(default = "default_pair_min_count")]
    pub min_count: usize,
    #[serde(default)]
    pub counterevidence_reserve: u64,
}

impl Default for PairAdjudicationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            active_set_size: default_active_set_size(),
            mass_ratio_floor: 0.0,
            sticky_lock: true,
            pair_budget: default_pair_budget(),
            value_prioritization: true,
            min_margin: default_pair_min_margin(),
            min_count: default_pair_min_count(),
            counterevidence_reserve: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DynamicAbstentionConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_abstention_weight")]
    pub weight_unresolved_pairs: f64,
    #[serde(default = "default_abstention_weight")]
    pub weight_contradiction_density: f64,
    #[serde(default = "default_abstention_weight")]
    pub weight_non_discriminative: f64,
    #[serde(default = "default_abstention_weight")]
    pub weight_frame_inadequacy: f64,
    #[serde(default = "default_abstention_min")]
    pub min_mass: f64,
    #[serde(default = "default_abstention_max")]
    pub max_mass: f64,
}

impl Default for DynamicAbstentionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            weight_unresolved_pairs: default_abstention_weight(),
            weight_contradiction_density: default_abstention_weight(),
            weight_non_discriminative: default_abstention_weight(),
            weight_frame_inadequacy: default_abstention_weight(),
            min_mass: default_abstention_min(),
            max_mass: default_abstention_max(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FrameAdequacyConfig {
    #[serde(default = "default_frame_threshold")]
    pub threshold: f64,
    #[serde(default = "default_frame_cap")]
    pub cap: f64,
}

impl Default for FrameAdequacyConfig {
    fn default() -> Self {
        Self {
            threshold: default_frame_threshold(),
            cap: default_frame_cap(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DecisionContractConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_min_winner_margin")]
    pub min_winner_margin: f64,
    #[serde(default)]
    pub min_decomposition_depth: u32,
    #[serde(default)]
    pub require_adjudication_complete: bool,
}

impl Default for DecisionContractConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_winner_margin: default_min_winner_margin(),
            min_decomposition_depth: 0,
            require_adjudication_complete: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    #[serde(default = "default_tau")]
    pub tau: f64,
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
    #[serde(default = "default_gamma_noa")]
    pub gamma_noa: f64,
    #[serde(default = "default_gamma_und")]
    pub gamma_und: f64,
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    #[serde(default = "default_beta")]
    pub beta: f64,
    #[serde(default = "default_weight_clamp")]
    pub weight_clamp: f64,
    #[serde(default = "default_lambda_voi")]
    pub lambda_voi: f64,
    #[serde(default = "default_world_mode")]
    pub world_mode: WorldMode,
    #[serde(default = "default_required_slots")]
    pub required_slots: Vec<String>,
    #[serde(default = "default_max_pair_overlap")]
    pub max_pair_overlap: u8,
    #[serde(default)]
    pub compositional_stories: bool,
    #[serde(default)]
    pub strict_contrastive: bool,
    #[serde(default = "default_epsilon_nc")]
    pub epsilon_nc: f64,
    #[serde(default)]
    pub require_typed_discriminator_evidence: bool,
    #[serde(default)]
    pub pair_adjudication: PairAdjudicationConfig,
    #[serde(default)]
    pub dynamic_abstention: DynamicAbstentionConfig,
    #[serde(default)]
    pub frame_adequacy: FrameAdequacyConfig,
    #[serde(default)]
    pub forecast_calibration_cap: Option<f64>,
    #[serde(default = "default_quote_fidelity_mode")]
    pub quote_fidelity_mode: QuoteFidelityMode,
    #[serde(default = "default_reasoning_mode")]
    pub reasoning_mode: ReasoningMode,
    #[serde(default = "default_profile_tag")]
    pub profile: String,
    #[serde(default = "default_profile_confidence_cap")]
    pub profile_confidence_cap: f64,
    #[serde(default)]
    pub decision_contract: DecisionContractConfig,
    #[serde(default = "default_true")]
    pub dual_outputs: bool,
    #[serde(default)]
    pub refund_on_port_failure: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tau: default_tau(),
            epsilon: default_epsilon(),
            gamma_noa: default_gamma_noa(),
            gamma_und: default_gamma_und(),
            alpha: default_alpha(),
            beta: default_beta(),
            weight_clamp: default_weight_clamp(),
            lambda_voi: default_lambda_voi(),
            world_mode: default_world_mode(),
            required_slots: default_required_slots(),
            max_pair_overlap: default_max_pair_overlap(),
            compositional_stories: false,
            strict_contrastive: false,
            epsilon_nc: default_epsilon_nc(),
            require_typed_discriminator_evidence: false,
            pair_adjudication: PairAdjudicationConfig::default(),
            dynamic_abstention: DynamicAbstentionConfig::default(),
            frame_adequacy: FrameAdequacyConfig::default(),
            forecast_calibration_cap: None,
            quote_fidelity_mode: default_quote_fidelity_mode(),
            reasoning_mode: default_reasoning_mode(),
            profile: default_profile_tag(),
            profile_confidence_cap: default_profile_confidence_cap(),
            decision_contract: DecisionContractConfig::default(),
            dual_outputs: true,
            refund_on_port_failure: false,
        }
    }
}

impl SessionConfig {
    pub fn from_value(value: Value) -> Result<Self, EngineError> {
        let config: SessionConfig = serde_json::from_value(value)
            .map_err(|err| config_rejected(format!("session config rejected: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_profile(tag: &str) -> Result<Self, EngineError> {
        match tag {
            "explore" => Ok(Self::default()),
            "certify" => {
                let mut config = Self::default();
                config.reasoning_mode = ReasoningMode::Certify;
                config.profile = "certify".to_string();
                config.strict_contrastive = true;
                config.require_typed_discriminator_evidence = true;
                config.quote_fidelity_mode = QuoteFidelityMode::Strict;
                config.pair_adjudication.enabled = true;
                config.decision_contract.enabled = true;
                config.decision_contract.require_adjudication_complete = true;
                Ok(config)
            }
            "forecast" => {
                let mut config = Self::default();
                config.profile = "forecast".to_string();
                config.forecast_calibration_cap = Some(0.85);
                config.dynamic_abstention.enabled = true;
                Ok(config)
            }
            other => Err(config_rejected(format!(
                "unknown reasoning profile '{other}'"
            ))),
        }
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        for (name, value) in [
            ("tau", self.tau),
            ("epsilon", self.epsilon),
            ("gamma_noa", self.gamma_noa),
            ("gamma_und", self.gamma_und),
            ("alpha", self.alpha),
            ("profile_confidence_cap", self.profile_confidence_cap),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(config_rejected(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }
        if self.gamma_noa + self.gamma_und >= 1.0 {
            return Err(config_rejected(
                "absorber prior mass gamma_noa + gamma_und must stay below 1.0",
            ));
        }
        if self.beta <= 0.0 || self.weight_clamp <= 0.0 {
            return Err(config_rejected(
                "beta and weight_clamp must be strictly positive",
            ));
        }
        if self.lambda_voi < 0.0 {
            return Err(config_rejected("lambda_voi must be non-negative"));
        }
        let abstention = &self.dynamic_abstention;
        if abstention.min_mass > abstention.max_mass {
            return Err(config_rejected(
                "dynamic_abstention.min_mass cannot exceed max_mass",
            ));
        }
        if let Some(cap) = self.forecast_calibration_cap {
            if !(0.0..=1.0).contains(&cap) {
                return Err(config_rejected(
                    "forecast_calibration_cap must be within [0, 1]",
                ));
            }
        }
        Ok(())
    }

    pub fn absorber_prior_mass(&self) -> f64 {
        match self.world_mode {
            WorldMode::Open => self.gamma_noa + self.gamma_und,
            WorldMode::Closed => self.gamma_und,
        }
    }

    pub fn fingerprint(&self) -> String {
        let value = serde_json::to_value(self).unwrap_or(Value::Null);
        fingerprint_value("cfg", &value)
    }

    pub fn profile_fingerprint(&self) -> String {
        let value = serde_json::json!({
            "profile": self.profile,
            "reasoning_mode": self.reasoning_mode,
            "strict_contrastive": self.strict_contrastive,
            "quote_fidelity_mode": self.quote_fidelity_mode,
            "pair_adjudication_enabled": self.pair_adjudication.enabled,
            "decision_contract_enabled": self.decision_contract.enabled,
        });
        fingerprint_value("prof", &value)
    }
}

#[cfg(test)]
mod tests {
    use super::{ReasoningMode, SessionConfig, WorldMode};

    #[test]
    fn defaults_cover_every_option() {
        let config = SessionConfig::default();
        assert_eq!(config.tau, 0.75);
        assert_eq!(config.epsilon, 0.10);
        assert_eq!(config.world_mode, WorldMode::Open);
        assert_eq!(config.required_slots.len(), 4);
        assert!(!config.pair_adjudication.enabled);
        assert!(config.dual_outputs);
        config.validate().expect("defaults must validate");
    }

    #[test]
    fn unknown_keys_are_rejected_at_load_time() {
        let err = SessionConfig::from_value(serde_json::json!({
            "tau": 0.8,
            "definitely_not_an_option": true,
        }))
        .expect_err("unknown key must be rejected");
        assert!(err.message.contains("definitely_not_an_option"));
    }

    #[test]
    fn absorber_mass_exceeding_one_is_rejected() {
        let err = SessionConfig::from_value(serde_json::json!({
            "gamma_noa": 0.6,
            "gamma_und": 0.5,
        }))
        .expect_err("absorber mass must stay below 1.0");
        assert!(err.message.contains("gamma"));
    }

    #[test]
    fn certify_profile_enables_the_strict_bundle() {
        let config = SessionConfig::from_profile("certify").expect("profile exists");
        assert_eq!(config.reasoning_mode, ReasoningMode::Certify);
        assert!(config.strict_contrastive);
        assert!(config.pair_adjudication.enabled);
        assert!(config.decision_contract.require_adjudication_complete);
    }

    #[test]
    fn unknown_profile_is_rejected() {
        let err = SessionConfig::from_profile("galaxy-brain").expect_err("unknown profile");
        assert!(err.message.contains("galaxy-brain"));
    }

    #[test]
    fn fingerprints_are_stable_for_identical_configs() {
        let a = SessionConfig::default();
        let b = SessionConfig::default();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.profile_fingerprint(), b.profile_fingerprint());
    }
}

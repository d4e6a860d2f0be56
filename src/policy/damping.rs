use serde::{Deserialize, Serialize};

use crate::{
    config::{SessionConfig, WorldMode},
    domain::hypothesis::{HypothesisSet, H_NOA_ID, H_UND_ID},
    policy::clamp01,
};

/// Damped blend of the previous ledger value and the proposed value.
pub fn damped_update(alpha: f64, p_prev: f64, p_prop: f64) -> f64 {
    clamp01(alpha * p_prev + (1.0 - alpha) * p_prop)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AbsorberBranch {
    SlackToAbsorbers,
    NamedRescaled,
    DynamicAbstention,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbsorberEnforcement {
    pub branch: AbsorberBranch,
    pub named_mass_before: f64,
    pub named_mass_after: f64,
    pub noa_after: f64,
    pub und_after: f64,
}

/// Renormalizes the ledger after a named-root update. With `und_override`
/// (dynamic abstention) H_UND takes that mass first and everything else is
/// scaled into the remainder; otherwise slack flows to the absorbers by the
/// gamma ratio, or named roots rescale down onto the absorber floors.
pub fn enforce_absorbers(
    set: &mut HypothesisSet,
    config: &SessionConfig,
    und_override: Option<f64>,
) -> AbsorberEnforcement {
    let named: Vec<String> = set.named_in_canonical_order().to_vec();
    let named_mass_before: f64 = named.iter().map(|id| set.p_ledger(id)).sum();
    let open_world = set.world_mode() == WorldMode::Open;

    if let Some(und_mass) = und_override {
        let und_mass = clamp01(und_mass);
        let noa_before = if open_world { set.p_ledger(H_NOA_ID) } else { 0.0 };
        let scalable = named_mass_before + noa_before;
        let remainder = (1.0 - und_mass).max(0.0);
        if scalable > 0.0 {
            let factor = remainder / scalable;
            for root_id in &named {
                let current = set.p_ledger(root_id);
                set.set_p_ledger(root_id, clamp01(current * factor));
            }
            if open_world {
                set.set_p_ledger(H_NOA_ID, clamp01(noa_before * factor));
            }
        } else if open_world {
            set.set_p_ledger(H_NOA_ID, remainder);
        }
        set.set_p_ledger(H_UND_ID, und_mass);
        return AbsorberEnforcement {
            branch: AbsorberBranch::DynamicAbstention,
            named_mass_before,
            named_mass_after: named.iter().map(|id| set.p_ledger(id)).sum(),
            noa_after: if open_world { set.p_ledger(H_NOA_ID) } else { 0.0 },
            und_after: set.p_ledger(H_UND_ID),
        };
    }

    if named_mass_before <= 1.0 {
        let slack = 1.0 - named_mass_before;
        if open_world {
            let gamma_total = config.gamma_noa + config.gamma_und;
            let noa_share = if gamma_total > 0.0 {
                config.gamma_noa / gamma_total
            } else {
                0.5
            };
            set.set_p_ledger(H_NOA_ID, slack * noa_share);
            set.set_p_ledger(H_UND_ID, slack * (1.0 - noa_share));
        } else {
            set.set_p_ledger(H_UND_ID, slack);
        }
        AbsorberEnforcement {
            branch: AbsorberBranch::SlackToAbsorbers,
            named_mass_before,
            named_mass_after: named_mass_before,
            noa_after: if open_world { set.p_ledger(H_NOA_ID) } else { 0.0 },
            und_after: set.p_ledger(H_UND_ID),
        }
    } else {
        let floor_total = if open_world {
            config.gamma_noa + config.gamma_und
        } else {
            config.gamma_und
        };
        let target_named = (1.0 - floor_total).max(0.0);
        let factor = target_named / named_mass_before;
        for root_id in &named {
            let current = set.p_ledger(root_id);
            set.set_p_ledger(root_id, clamp01(current * factor));
        }
        if open_world {
            set.set_p_ledger(H_NOA_ID, config.gamma_noa);
        }
        set.set_p_ledger(H_UND_ID, config.gamma_und);
        AbsorberEnforcement {
            branch: AbsorberBranch::NamedRescaled,
            named_mass_before,
            named_mass_after: target_named,
            noa_after: if open_world { config.gamma_noa } else { 0.0 },
            und_after: config.gamma_und,
        }
    }
}

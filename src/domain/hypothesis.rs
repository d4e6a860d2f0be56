use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::{
    canonical::canonical_id_for_statement,
    config::{SessionConfig, WorldMode},
    domain::{
        node::{NodeArena, NodeId},
        types::{CanonicalId, RootId, RootStatus},
    },
    error::{invalid_request, invariant_violation, EngineError},
};

pub const H_NOA_ID: &str = "H_NOA";
pub const H_UND_ID: &str = "H_UND";

pub const LEDGER_SUM_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootHypothesis {
    pub root_id: RootId,
    pub statement: String,
    pub exclusion_clause: String,
    pub canonical_id: CanonicalId,
    pub k_root: f64,
    pub status: RootStatus,
    #[serde(default)]
    pub obligations: BTreeMap<String, NodeId>,
    #[serde(default)]
    pub credits_spent: u64,
    #[serde(default)]
    pub scoping_provenance: Option<String>,
    pub story_cardinality: u32,
    #[serde(default)]
    pub components: Vec<String>,
    #[serde(default)]
    pub retired: bool,
}

impl RootHypothesis {
    fn new(
        root_id: impl Into<RootId>,
        statement: impl Into<String>,
        exclusion_clause: impl Into<String>,
    ) -> Self {
        let statement = statement.into();
        let canonical_id = canonical_id_for_statement(&statement);
        Self {
            root_id: root_id.into(),
            statement,
            exclusion_clause: exclusion_clause.into(),
            canonical_id,
            k_root: 0.15,
            status: RootStatus::Unscoped,
            obligations: BTreeMap::new(),
            credits_spent: 0,
            scoping_provenance: None,
            story_cardinality: 1,
            components: Vec::new(),
            retired: false,
        }
    }

    pub fn is_absorber(&self) -> bool {
        self.root_id == H_NOA_ID || self.root_id == H_UND_ID
    }

    pub fn missing_required_slots(&self, required_slots: &[String]) -> Vec<String> {
        required_slots
            .iter()
            .filter(|slot| !self.obligations.contains_key(*slot))
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootSeed {
    pub root_id: RootId,
    pub statement: String,
    pub exclusion_clause: String,
    #[serde(default)]
    pub components: Vec<String>,
    #[serde(default)]
    pub story_cardinality: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HypothesisSet {
    pub roots: BTreeMap<RootId, RootHypothesis>,
    pub ledger: BTreeMap<RootId, f64>,
    pub arena: NodeArena,
    canonical_order: Vec<RootId>,
    world_mode: WorldMode,
}

impl HypothesisSet {
    /// Builds the bootstrap set: named roots share `1 - gamma` evenly and the
    /// absorbers take their configured prior mass. Canonical order is fixed
    /// here and never depends on request ordering.
    pub fn bootstrap(seeds: &[RootSeed], config: &SessionConfig) -> Result<Self, EngineError> {
        let mut roots: BTreeMap<RootId, RootHypothesis> = BTreeMap::new();
        let mut ledger: BTreeMap<RootId, f64> = BTreeMap::new();
        let mut seen_canonical: BTreeSet<CanonicalId> = BTreeSet::new();

        let count_named = seeds.len();
        let gamma = config.absorber_prior_mass();
        let base_p = if count_named > 0 {
            (1.0 - gamma) / count_named as f64
        } else {
            0.0
        };

        for seed in seeds {
            if seed.root_id == H_NOA_ID || seed.root_id == H_UND_ID {
                return Err(invalid_request(format!(
                    "root id '{}' collides with a reserved absorber id",
                    seed.root_id
                )));
            }
            let mut root = RootHypothesis::new(
                seed.root_id.clone(),
                seed.statement.clone(),
                seed.exclusion_clause.clone(),
            );
            if !seen_canonical.insert(root.canonical_id.clone()) {
                return Err(invalid_request(format!(
                    "root '{}' duplicates the canonical id of another root",
                    seed.root_id
                )));
            }
            root.components = seed.components.clone();
            root.story_cardinality = seed
                .story_cardinality
                .unwrap_or_else(|| (seed.components.len() as u32).max(1));
            if roots.insert(root.root_id.clone(), root).is_some() {
                return Err(invalid_request(format!(
                    "root id '{}' appears more than once",
                    seed.root_id
                )));
            }
            ledger.insert(seed.root_id.clone(), base_p);
        }

        if config.world_mode == WorldMode::Open {
            roots.insert(
                H_NOA_ID.to_string(),
                RootHypothesis::new(H_NOA_ID, "None of the above", "Not any named mechanism"),
            );
            ledger.insert(H_NOA_ID.to_string(), config.gamma_noa);
        }
        roots.insert(
            H_UND_ID.to_string(),
            RootHypothesis::new(H_UND_ID, "Underdetermined", "Evidence cannot separate the contenders"),
        );
        let und_mass = if count_named > 0 {
            config.gamma_und
        } else {
            match config.world_mode {
                WorldMode::Open => 1.0 - config.gamma_noa,
                WorldMode::Closed => 1.0,
            }
        };
        ledger.insert(H_UND_ID.to_string(), und_mass);

        let mut canonical_order: Vec<RootId> = roots
            .values()
            .filter(|root| !root.is_absorber())
            .map(|root| root.root_id.clone())
            .collect();
        canonical_order.sort_by(|a, b| {
            let ca = &roots[a].canonical_id;
            let cb = &roots[b].canonical_id;
            ca.cmp(cb)
        });

        let set = Self {
            roots,
            ledger,
            arena: NodeArena::new(),
            canonical_order,
            world_mode: config.world_mode,
        };
        set.assert_invariants(config)?;
        Ok(set)
    }

    pub fn world_mode(&self) -> WorldMode {
        self.world_mode
    }

    /// Named root ids in canonical-id order. All scheduler iteration uses
    /// this, never request ordering.
    pub fn named_in_canonical_order(&self) -> &[RootId] {
        &self.canonical_order
    }

    pub fn absorber_ids(&self) -> Vec<RootId> {
        match self.world_mode {
            WorldMode::Open => vec![H_NOA_ID.to_string(), H_UND_ID.to_string()],
            WorldMode::Closed => vec![H_UND_ID.to_string()],
        }
    }

    pub fn p_ledger(&self, root_id: &str) -> f64 {
        self.ledger.get(root_id).copied().unwrap_or(0.0)
    }

    pub fn set_p_ledger(&mut self, root_id: &str, value: f64) {
        if let Some(slot) = self.ledger.get_mut(root_id) {
            *slot = value;
        }
    }

    pub fn named_mass(&self) -> f64 {
        self.canonical_order
            .iter()
            .map(|root_id| self.p_ledger(root_id))
            .sum()
    }

    pub fn ledger_sum(&self) -> f64 {
        // Canonical-order summation keeps float accumulation replayable.
        let mut total = 0.0;
        for root_id in &self.canonical_order {
            total += self.p_ledger(root_id);
        }
        for absorber_id in self.absorber_ids() {
            total += self.p_ledger(&absorber_id);
        }
        total
    }

    /// Leader by `p_ledger` over active named roots, canonical-id tie-break.
    pub fn leader(&self) -> Option<&RootId> {
        let mut best: Option<&RootId> = None;
        for root_id in &self.canonical_order {
            if self.roots[root_id].retired {
                continue;
            }
            match best {
                None => best = Some(root_id),
                Some(current) => {
                    if self.p_ledger(root_id) > self.p_ledger(current) + f64::EPSILON {
                        best = Some(root_id);
                    }
                }
            }
        }
        best
    }

    pub fn frontier(&self, epsilon: f64) -> Vec<RootId> {
        let Some(leader) = self.leader() else {
            return Vec::new();
        };
        let bar = self.p_ledger(leader) - epsilon;
        self.canonical_order
            .iter()
            .filter(|root_id| !self.roots[*root_id].retired && self.p_ledger(root_id) >= bar)
            .cloned()
            .collect()
    }

    pub fn assert_invariants(&self, config: &SessionConfig) -> Result<(), EngineError> {
        let total = self.ledger_sum();
        if (total - 1.0).abs() > LEDGER_SUM_TOLERANCE {
            return Err(invariant_violation(format!(
                "ledger sum drifted to {total:.12}, beyond 1e-9 of 1.0"
            )));
        }
        for (root_id, mass) in &self.ledger {
            if !(0.0..=1.0).contains(mass) {
                return Err(invariant_violation(format!(
                    "p_ledger for '{root_id}' is {mass}, outside [0, 1]"
                )));
            }
        }
        let template: BTreeSet<&String> = config.required_slots.iter().collect();
        for root_id in &self.canonical_order {
            let root = &self.roots[root_id];
            if root.status == RootStatus::Scoped {
                let scoped: BTreeSet<&String> = root.obligations.keys().collect();
                if !template.is_subset(&scoped) {
                    return Err(invariant_violation(format!(
                        "scoped root '{root_id}' is missing required template slots"
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{HypothesisSet, RootSeed, H_NOA_ID, H_UND_ID};
    use crate::config::{SessionConfig, WorldMode};

    fn seeds() -> Vec<RootSeed> {
        ["Alpha mechanism", "Beta mechanism", "Gamma mechanism"]
            .iter()
            .enumerate()
            .map(|(index, statement)| RootSeed {
                root_id: format!("H{}", index + 1),
                statement: statement.to_string(),
                exclusion_clause: format!("Not {statement}"),
                components: Vec::new(),
                story_cardinality: None,
            })
            .collect()
    }

    #[test]
    fn bootstrap_splits_mass_between_named_roots_and_absorbers() {
        let config = SessionConfig::default();
        let set = HypothesisSet::bootstrap(&seeds(), &config).expect("bootstrap succeeds");

        let expected = (1.0 - 0.20) / 3.0;
        for root_id in ["H1", "H2", "H3"] {
            assert!((set.p_ledger(root_id) - expected).abs() < 1e-12);
        }
        assert!((set.p_ledger(H_NOA_ID) - 0.10).abs() < 1e-12);
        assert!((set.p_ledger(H_UND_ID) - 0.10).abs() < 1e-12);
        assert!((set.ledger_sum() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn closed_world_drops_the_noa_absorber() {
        let mut config = SessionConfig::default();
        config.world_mode = WorldMode::Closed;
        let set = HypothesisSet::bootstrap(&seeds(), &config).expect("bootstrap succeeds");

        assert!(!set.roots.contains_key(H_NOA_ID));
        assert!((set.p_ledger(H_UND_ID) - 0.10).abs() < 1e-12);
        assert!((set.ledger_sum() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn canonical_order_ignores_request_ordering() {
        let config = SessionConfig::default();
        let forward = HypothesisSet::bootstrap(&seeds(), &config).expect("bootstrap succeeds");
        let mut reversed_seeds = seeds();
        reversed_seeds.reverse();
        let reversed =
            HypothesisSet::bootstrap(&reversed_seeds, &config).expect("bootstrap succeeds");

        assert_eq!(
            forward.named_in_canonical_order(),
            reversed.named_in_canonical_order()
        );
    }

    #[test]
    fn duplicate_canonical_ids_are_rejected() {
        let config = SessionConfig::default();
        let mut duplicated = seeds();
        duplicated[1].statement = "  ALPHA   mechanism. ".to_string();
        let err = HypothesisSet::bootstrap(&duplicated, &config)
            .expect_err("duplicate canonical id must fail");
        assert!(err.message.contains("canonical id"));
    }

    #[test]
    fn reserved_absorber_ids_are_rejected() {
        let config = SessionConfig::default();
        let mut bad = seeds();
        bad[0].root_id = H_UND_ID.to_string();
        let err = HypothesisSet::bootstrap(&bad, &config).expect_err("reserved id must fail");
        assert!(err.message.contains("absorber"));
    }

    #[test]
    fn leader_breaks_ties_by_canonical_id() {
        let config = SessionConfig::default();
        let set = HypothesisSet::bootstrap(&seeds(), &config).expect("bootstrap succeeds");
        let leader = set.leader().expect("leader exists");
        assert_eq!(leader, &set.named_in_canonical_order()[0]);
    }

    #[test]
    fn frontier_is_a_band_below_the_leader() {
        let config = SessionConfig::default();
        let mut set = HypothesisSet::bootstrap(&seeds(), &config).expect("bootstrap succeeds");
        set.set_p_ledger("H1", 0.50);
        set.set_p_ledger("H2", 0.45);
        set.set_p_ledger("H3", 0.30);

        let frontier = set.frontier(0.10);
        assert!(frontier.contains(&"H1".to_string()));
        assert!(frontier.contains(&"H2".to_string()));
        assert!(!frontier.contains(&"H3".to_string()));
    }
}

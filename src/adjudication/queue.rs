use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::{
    adjudication::verdict::compute_pair_verdict,
    config::PairAdjudicationConfig,
    domain::{
        hypothesis::HypothesisSet,
        types::{
            pair_key, DiscriminatorDirection, DiscriminatorRecord, PairKey, PairVerdict, RootId,
            RootStatus,
        },
    },
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairTask {
    pub pair_key: PairKey,
    pub left_root_id: RootId,
    pub right_root_id: RootId,
    pub target_root_id: RootId,
    pub target_side: DiscriminatorDirection,
    pub bootstrap: bool,
    pub elimination_value: f64,
}

#[derive(Debug, Clone, PartialEq)]
struct CandidatePair {
    key: PairKey,
    left: RootId,
    right: RootId,
    value: f64,
}

/// The pair-adjudication queue: tracks verdicts, accepted discriminators,
/// targeting balance, and the churn-sticky lock over the decision-relevant
/// active set.
#[derive(Debug, Clone)]
pub struct PairQueue {
    config: PairAdjudicationConfig,
    beta: f64,
    weight_clamp: f64,
    verdicts: BTreeMap<PairKey, PairVerdict>,
    records: BTreeMap<PairKey, Vec<DiscriminatorRecord>>,
    last_side: BTreeMap<PairKey, DiscriminatorDirection>,
    locked_pairs: BTreeSet<PairKey>,
    announced_deferrals: BTreeSet<PairKey>,
}

impl PairQueue {
    pub fn new(config: PairAdjudicationConfig, beta: f64, weight_clamp: f64) -> Self {
        Self {
            config,
            beta,
            weight_clamp,
            verdicts: BTreeMap::new(),
            records: BTreeMap::new(),
            last_side: BTreeMap::new(),
            locked_pairs: BTreeSet::new(),
            announced_deferrals: BTreeSet::new(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Top-N active roots by ledger mass, canonical-id tie-break, optionally
    /// filtered by the mass-ratio floor against the leader.
    pub fn active_set(&self, set: &HypothesisSet) -> Vec<RootId> {
        let mut candidates: Vec<RootId> = set
            .named_in_canonical_order()
            .iter()
            .filter(|root_id| !set.roots[*root_id].retired)
            .cloned()
            .collect();
        candidates.sort_by(|a, b| {
            set.p_ledger(b)
                .partial_cmp(&set.p_ledger(a))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| set.roots[a].canonical_id.cmp(&set.roots[b].canonical_id))
        });
        let leader_mass = candidates
            .first()
            .map(|root_id| set.p_ledger(root_id))
            .unwrap_or(0.0);
        candidates
            .into_iter()
            .take(self.config.active_set_size.max(1))
            .filter(|root_id| {
                leader_mass <= 0.0
                    || set.p_ledger(root_id) / leader_mass >= self.config.mass_ratio_floor
            })
            .collect()
    }

    fn candidate_pairs(&self, set: &HypothesisSet) -> Vec<CandidatePair> {
        let active = self.active_set(set);
        let mut keys: BTreeSet<(PairKey, RootId, RootId)> = BTreeSet::new();

        for (index, a) in active.iter().enumerate() {
            for b in &active[index + 1..] {
                keys.insert(self.oriented_pair(set, a, b));
            }
        }
        if self.config.sticky_lock {
            // Locked pairs keep their partial work even after falling out of
            // the active set by mass.
            let named: Vec<RootId> = set.named_in_canonical_order().to_vec();
            for (i, a) in named.iter().enumerate() {
                for b in &named[i + 1..] {
                    let oriented = self.oriented_pair(set, a, b);
                    if self.locked_pairs.contains(&oriented.0)
                        && !set.roots[a].retired
                        && !set.roots[b].retired
                    {
                        keys.insert(oriented);
                    }
                }
            }
        }

        keys.into_iter()
            .map(|(key, left, right)| {
                let value = self.elimination_value(set.p_ledger(&left), set.p_ledger(&right));
                CandidatePair {
                    key,
                    left,
                    right,
                    value,
                }
            })
            .collect()
    }

    /// Left is always the root with the lesser canonical id, matching the
    /// unordered pair-key encoding.
    fn oriented_pair(
        &self,
        set: &HypothesisSet,
        a: &RootId,
        b: &RootId,
    ) -> (PairKey, RootId, RootId) {
        let ca = &set.roots[a].canonical_id;
        let cb = &set.roots[b].canonical_id;
        let key = pair_key(ca, cb);
        if ca <= cb {
            (key, a.clone(), b.clone())
        } else {
            (key, b.clone(), a.clone())
        }
    }

    /// Elimination value: how much ledger mass a resolution could free.
    /// Heavy, closely matched pairs rank first; beta scales and W clamps.
    fn elimination_value(&self, p_left: f64, p_right: f64) -> f64 {
        let value = self.beta * p_left.min(p_right) * (1.0 - (p_left - p_right).abs());
        value.clamp(0.0, self.weight_clamp)
    }

    /// Splits candidates into the budget-feasible queue and the deferred
    /// tail. Deferral keys are reported once each for the audit stream.
    fn feasible_pairs(&mut self, set: &HypothesisSet) -> (Vec<CandidatePair>, Vec<PairKey>) {
        let mut candidates = self.candidate_pairs(set);
        if self.config.value_prioritization {
            candidates.sort_by(|a, b| {
                b.value
                    .partial_cmp(&a.value)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.key.cmp(&b.key))
            });
        } else {
            candidates.sort_by(|a, b| a.key.cmp(&b.key));
        }

        let budget = self.config.pair_budget.max(1);
        let deferred: Vec<PairKey> = candidates
            .iter()
            .skip(budget)
            .filter(|pair| !self.announced_deferrals.contains(&pair.key))
            .map(|pair| pair.key.clone())
            .collect();
        for key in &deferred {
            self.announced_deferrals.insert(key.clone());
        }
        candidates.truncate(budget);
        (candidates, deferred)
    }

    /// Draws the next legal adjudication task, alternating target sides so
    /// neither root of a pair can lock the verdict in unilaterally. An
    /// UNSCOPED side is bootstrapped first.
    pub fn next_task(&mut self, set: &HypothesisSet) -> (Option<PairTask>, Vec<PairKey>) {
        let (feasible, deferred) = self.feasible_pairs(set);
        let task = feasible
            .into_iter()
            .find(|pair| {
                self.verdicts
                    .get(&pair.key)
                    .copied()
                    .unwrap_or(PairVerdict::Unresolved)
                    == PairVerdict::Unresolved
            })
            .map(|pair| {
                let left_unscoped = set.roots[&pair.left].status == RootStatus::Unscoped;
                let right_unscoped = set.roots[&pair.right].status == RootStatus::Unscoped;
                let (target_side, bootstrap) = if left_unscoped {
                    (DiscriminatorDirection::Left, true)
                } else if right_unscoped {
                    (DiscriminatorDirection::Right, true)
                } else {
                    let side = match self.last_side.get(&pair.key) {
                        Some(DiscriminatorDirection::Left) => DiscriminatorDirection::Right,
                        Some(DiscriminatorDirection::Right) => DiscriminatorDirection::Left,
                        None => DiscriminatorDirection::Left,
                    };
                    (side, false)
                };
                let target_root_id = match target_side {
                    DiscriminatorDirection::Left => pair.left.clone(),
                    DiscriminatorDirection::Right => pair.right.clone(),
                };
                PairTask {
                    pair_key: pair.key,
                    left_root_id: pair.left,
                    right_root_id: pair.right,
                    target_root_id,
                    target_side,
                    bootstrap,
                    elimination_value: pair.value,
                }
            });
        (task, deferred)
    }

    pub fn mark_targeted(&mut self, pair: &PairKey, side: DiscriminatorDirection) {
        self.last_side.insert(pair.clone(), side);
    }

    /// Folds newly accepted discriminators into the pair's record set,
    /// locks the pair, and recomputes the verdict.
    pub fn absorb_records(
        &mut self,
        pair: &PairKey,
        accepted: &[DiscriminatorRecord],
    ) -> PairVerdict {
        if !accepted.is_empty() {
            self.locked_pairs.insert(pair.clone());
            self.records
                .entry(pair.clone())
                .or_default()
                .extend(accepted.iter().cloned());
        }
        let verdict = compute_pair_verdict(
            self.records.get(pair).map(Vec::as_slice).unwrap_or(&[]),
            self.config.min_margin,
            self.config.min_count,
        );
        self.verdicts.insert(pair.clone(), verdict);
        verdict
    }

    pub fn verdict(&self, pair: &PairKey) -> PairVerdict {
        self.verdicts
            .get(pair)
            .copied()
            .unwrap_or(PairVerdict::Unresolved)
    }

    pub fn unresolved_active_pairs(&mut self, set: &HypothesisSet) -> Vec<PairKey> {
        let (feasible, _) = self.feasible_pairs(set);
        feasible
            .into_iter()
            .filter(|pair| self.verdict(&pair.key) == PairVerdict::Unresolved)
            .map(|pair| pair.key)
            .collect()
    }

    pub fn feasible_pair_count(&mut self, set: &HypothesisSet) -> usize {
        self.feasible_pairs(set).0.len()
    }
}

#[cfg(test)]
mod tests {
    use super::PairQueue;
    use crate::{
        config::{PairAdjudicationConfig, SessionConfig},
        domain::{
            hypothesis::{HypothesisSet, RootSeed},
            types::{
                DiscriminatorDirection, DiscriminatorKind, DiscriminatorRecord, PairVerdict,
                RootStatus,
            },
        },
    };

    fn set_of(count: usize) -> HypothesisSet {
        let statements = [
            "Alpha mechanism",
            "Beta mechanism",
            "Gamma mechanism",
            "Delta mechanism",
        ];
        let seeds: Vec<RootSeed> = statements[..count]
            .iter()
            .enumerate()
            .map(|(index, statement)| RootSeed {
                root_id: format!("H{}", index + 1),
                statement: statement.to_string(),
                exclusion_clause: format!("Not {statement}"),
                components: Vec::new(),
                story_cardinality: None,
            })
            .collect();
        HypothesisSet::bootstrap(&seeds, &SessionConfig::default()).expect("bootstrap succeeds")
    }

    fn queue(config: PairAdjudicationConfig) -> PairQueue {
        PairQueue::new(config, 1.0, 3.0)
    }

    fn enabled_config() -> PairAdjudicationConfig {
        PairAdjudicationConfig {
            enabled: true,
            ..PairAdjudicationConfig::default()
        }
    }

    #[test]
    fn active_set_is_top_n_by_mass() {
        let mut set = set_of(4);
        set.set_p_ledger("H1", 0.30);
        set.set_p_ledger("H2", 0.25);
        set.set_p_ledger("H3", 0.15);
        set.set_p_ledger("H4", 0.10);

        let mut config = enabled_config();
        config.active_set_size = 2;
        let queue = queue(config);
        let active = queue.active_set(&set);
        assert_eq!(active, vec!["H1".to_string(), "H2".to_string()]);
    }

    #[test]
    fn mass_ratio_floor_filters_thin_contenders() {
        let mut set = set_of(3);
        set.set_p_ledger("H1", 0.60);
        set.set_p_ledger("H2", 0.15);
        set.set_p_ledger("H3", 0.05);

        let mut config = enabled_config();
        config.mass_ratio_floor = 0.20;
        let queue = queue(config);
        let active = queue.active_set(&set);
        assert!(active.contains(&"H1".to_string()));
        assert!(active.contains(&"H2".to_string()));
        assert!(!active.contains(&"H3".to_string()));
    }

    #[test]
    fn pairs_beyond_the_budget_are_deferred_once() {
        let set = set_of(4);
        let mut config = enabled_config();
        config.active_set_size = 4;
        config.pair_budget = 2;
        let mut queue = queue(config);

        let (_, first_deferrals) = queue.next_task(&set);
        assert_eq!(first_deferrals.len(), 4);
        let (_, second_deferrals) = queue.next_task(&set);
        assert!(second_deferrals.is_empty());
    }

    #[test]
    fn balanced_targeting_alternates_sides() {
        let mut set = set_of(2);
        for root in set.roots.values_mut() {
            root.status = RootStatus::Scoped;
        }
        let mut queue = queue(enabled_config());

        let (task, _) = queue.next_task(&set);
        let task = task.expect("a pair task is legal");
        assert_eq!(task.target_side, DiscriminatorDirection::Left);
        queue.mark_targeted(&task.pair_key, task.target_side);

        let (second, _) = queue.next_task(&set);
        let second = second.expect("pair still unresolved");
        assert_eq!(second.target_side, DiscriminatorDirection::Right);
    }

    #[test]
    fn an_unscoped_side_is_bootstrapped_first() {
        let mut set = set_of(2);
        let left_id = {
            let named = set.named_in_canonical_order().to_vec();
            named[0].clone()
        };
        for root in set.roots.values_mut() {
            root.status = RootStatus::Scoped;
        }
        set.roots.get_mut(&left_id).expect("root exists").status = RootStatus::Unscoped;

        let mut queue = queue(enabled_config());
        let (task, _) = queue.next_task(&set);
        let task = task.expect("task exists");
        assert!(task.bootstrap);
    }

    #[test]
    fn resolved_pairs_leave_the_queue() {
        let mut set = set_of(2);
        for root in set.roots.values_mut() {
            root.status = RootStatus::Scoped;
        }
        let mut queue = queue(enabled_config());
        let (task, _) = queue.next_task(&set);
        let task = task.expect("task exists");

        let record = DiscriminatorRecord {
            id: "d1".to_string(),
            pair_key: task.pair_key.clone(),
            direction: DiscriminatorDirection::Left,
            kind: DiscriminatorKind::Support,
            evidence_ids: vec!["ev1".to_string()],
            quote: None,
        };
        let verdict = queue.absorb_records(&task.pair_key, &[record]);
        assert_eq!(verdict, PairVerdict::FavorsLeft);

        let (next, _) = queue.next_task(&set);
        assert!(next.is_none());
        assert!(queue.unresolved_active_pairs(&set).is_empty());
    }
}

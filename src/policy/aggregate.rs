use crate::{
    domain::{
        hypothesis::RootHypothesis,
        node::{NodeArena, NodeId},
        types::{DecompType, NodeRole},
    },
    policy::clamp01,
};

/// Soft-AND blend: coupling weights the weakest child against the product of
/// all children.
pub fn soft_and(children_p: &[f64], coupling: f64) -> f64 {
    if children_p.is_empty() {
        return 1.0;
    }
    let min = children_p.iter().copied().fold(f64::INFINITY, f64::min);
    let product: f64 = children_p.iter().product();
    clamp01(coupling * min + (1.0 - coupling) * product)
}

pub fn or_max(children_p: &[f64]) -> f64 {
    children_p.iter().copied().fold(0.0, f64::max)
}

/// Slot probability seen by the root multiplier. A decomposed slot
/// aggregates its children (unassessed NEC children count as 1.0, EVID
/// children never move the parent); a leaf slot contributes its own p.
pub fn effective_slot_p(arena: &NodeArena, slot_id: NodeId) -> f64 {
    let Some(slot) = arena.get(slot_id) else {
        return 1.0;
    };
    if slot.children.is_empty() {
        return slot.p;
    }

    let decomp = slot.decomp_type.unwrap_or(DecompType::And);
    let children_p: Vec<f64> = slot
        .children
        .values()
        .filter_map(|child_id| arena.get(*child_id))
        .filter(|child| child.role != NodeRole::Evid)
        .map(|child| {
            if child.role == NodeRole::Nec && !child.evaluated {
                1.0
            } else {
                child.p
            }
        })
        .collect();

    if children_p.is_empty() {
        return slot.p;
    }
    match decomp {
        DecompType::And => soft_and(&children_p, slot.coupling),
        DecompType::Or => or_max(&children_p),
    }
}

/// Root multiplier: product of the required NEC slot probabilities in slot
/// key order. Missing slots are neutral.
pub fn root_multiplier(
    arena: &NodeArena,
    root: &RootHypothesis,
    required_slots: &[String],
) -> f64 {
    let mut multiplier = 1.0;
    let mut ordered: Vec<&String> = required_slots.iter().collect();
    ordered.sort();
    for slot_key in ordered {
        if let Some(slot_id) = root.obligations.get(slot_key) {
            multiplier *= effective_slot_p(arena, *slot_id);
        }
    }
    clamp01(multiplier)
}

/// Occam discount for compositional stories: each component past the first
/// costs five points of multiplier, floored at one half.
pub fn compositional_regularizer(story_cardinality: u32) -> f64 {
    if story_cardinality <= 1 {
        return 1.0;
    }
    (1.0 - 0.05 * (story_cardinality as f64 - 1.0)).max(0.5)
}

#[cfg(test)]
mod tests {
    use super::{compositional_regularizer, effective_slot_p, or_max, soft_and};
    use crate::domain::{
        node::{Node, NodeArena},
        types::{DecompType, NodeRole},
    };

    #[test]
    fn soft_and_matches_the_reference_points() {
        assert!((soft_and(&[0.5, 0.5], 0.20) - 0.30).abs() < 1e-12);
        assert!((soft_and(&[0.7, 0.9], 0.80) - 0.686).abs() < 1e-12);
    }

    #[test]
    fn or_takes_the_maximum() {
        assert_eq!(or_max(&[0.2, 0.7, 0.4]), 0.7);
    }

    fn slot_with_children(
        arena: &mut NodeArena,
        decomp: DecompType,
        coupling: f64,
        children: &[(NodeRole, f64, bool)],
    ) -> crate::domain::node::NodeId {
        let mut slot = Node::unassessed("r:slot", "node:slot", "slot", NodeRole::Nec, None);
        slot.decomp_type = Some(decomp);
        slot.coupling = coupling;
        let slot_id = arena.insert(slot);
        for (index, (role, p, evaluated)) in children.iter().enumerate() {
            let key = format!("c{index}");
            let mut child = Node::unassessed(
                format!("r:slot:{key}"),
                format!("node:{key}"),
                &key,
                *role,
                None,
            );
            child.p = *p;
            child.evaluated = *evaluated;
            arena.attach_child(slot_id, &key, child);
        }
        slot_id
    }

    #[test]
    fn unassessed_nec_children_are_neutral() {
        let mut arena = NodeArena::new();
        let slot_id = slot_with_children(
            &mut arena,
            DecompType::And,
            0.0,
            &[(NodeRole::Nec, 0.5, true), (NodeRole::Nec, 1.0, false)],
        );
        assert!((effective_slot_p(&arena, slot_id) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn evid_children_do_not_raise_the_parent() {
        let mut arena = NodeArena::new();
        let slot_id = slot_with_children(
            &mut arena,
            DecompType::Or,
            0.0,
            &[(NodeRole::Nec, 0.4, true), (NodeRole::Evid, 0.95, true)],
        );
        assert!((effective_slot_p(&arena, slot_id) - 0.4).abs() < 1e-12);
    }

    #[test]
    fn leaf_slots_contribute_their_own_p() {
        let mut arena = NodeArena::new();
        let mut slot = Node::unassessed("r:slot", "node:slot", "slot", NodeRole::Nec, None);
        slot.p = 0.8;
        slot.evaluated = true;
        let slot_id = arena.insert(slot);
        assert_eq!(effective_slot_p(&arena, slot_id), 0.8);
    }

    #[test]
    fn regularizer_discounts_multi_component_stories() {
        assert_eq!(compositional_regularizer(1), 1.0);
        assert!((compositional_regularizer(3) - 0.90).abs() < 1e-12);
        assert_eq!(compositional_regularizer(20), 0.5);
    }
}

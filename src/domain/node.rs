use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::types::{
    CanonicalId, DecompType, DiscriminatorRecord, Entailment, EvidenceId, NodeKey, NodeRole,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub node_key: NodeKey,
    pub canonical_id: CanonicalId,
    pub statement: String,
    #[serde(default)]
    pub parent: Option<NodeId>,
    pub role: NodeRole,
    pub p: f64,
    pub k: f64,
    #[serde(default)]
    pub rubric: Option<crate::domain::types::Rubric>,
    #[serde(default)]
    pub guardrail_triggered: bool,
    #[serde(default)]
    pub evidence_refs: Vec<EvidenceId>,
    #[serde(default)]
    pub discriminators: Vec<DiscriminatorRecord>,
    #[serde(default)]
    pub decomp_type: Option<DecompType>,
    pub coupling: f64,
    #[serde(default)]
    pub children: BTreeMap<String, NodeId>,
    #[serde(default)]
    pub assumptions: Vec<String>,
    pub entailment: Entailment,
    #[serde(default)]
    pub non_discriminative: bool,
    #[serde(default)]
    pub evaluated: bool,
}

impl Node {
    pub fn unassessed(
        node_key: impl Into<NodeKey>,
        canonical_id: impl Into<CanonicalId>,
        statement: impl Into<String>,
        role: NodeRole,
        parent: Option<NodeId>,
    ) -> Self {
        let role_default_p = match role {
            NodeRole::Nec => 1.0,
            NodeRole::Evid | NodeRole::Unscoped => 0.5,
        };
        Self {
            node_key: node_key.into(),
            canonical_id: canonical_id.into(),
            statement: statement.into(),
            parent,
            role,
            p: role_default_p,
            k: 0.15,
            rubric: None,
            guardrail_triggered: false,
            evidence_refs: Vec::new(),
            discriminators: Vec::new(),
            decomp_type: None,
            coupling: 0.0,
            children: BTreeMap::new(),
            assumptions: Vec::new(),
            entailment: Entailment::Neutral,
            non_discriminative: false,
            evaluated: false,
        }
    }
}

/// Arena-owned node storage. Parent/child references are integer indices so
/// the tree can link both ways without ownership cycles.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeArena {
    nodes: Vec<Node>,
}

impl NodeArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0 as usize)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.0 as usize)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn attach_child(&mut self, parent: NodeId, child_key: &str, child: Node) -> NodeId {
        let child_id = self.insert(child);
        if let Some(child_node) = self.get_mut(child_id) {
            child_node.parent = Some(parent);
        }
        if let Some(parent_node) = self.get_mut(parent) {
            parent_node.children.insert(child_key.to_string(), child_id);
        }
        child_id
    }

    /// Depth of the decomposition tree under `id`; a leaf has depth 0.
    pub fn depth_below(&self, id: NodeId) -> u32 {
        let Some(node) = self.get(id) else {
            return 0;
        };
        node.children
            .values()
            .map(|child| 1 + self.depth_below(*child))
            .max()
            .unwrap_or(0)
    }

    pub fn children_in_key_order(&self, id: NodeId) -> Vec<NodeId> {
        self.get(id)
            .map(|node| node.children.values().copied().collect())
            .unwrap_or_default()
    }
}

//! DEF-name scopes and deep cloning of node graphs.

use std::collections::HashMap;

use indexmap::IndexMap;

use crate::graph::arena::NodeArena;
use crate::models::NodeId;

/// A DEF-name table. Each template use gets a fresh one for its clone.
#[derive(Debug, Clone, Default)]
pub struct Namespace {
    names: IndexMap<String, NodeId>,
}

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `name` to `node`, returning the node it was bound to before.
    pub fn define(&mut self, name: impl Into<String>, node: NodeId) -> Option<NodeId> {
        self.names.insert(name.into(), node)
    }

    pub fn find_node(&self, name: &str) -> Option<NodeId> {
        self.names.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, NodeId)> {
        self.names.iter().map(|(name, id)| (name.as_str(), *id))
    }
}

/// Template node id to cloned node id, produced by [`clone_nodes`].
#[derive(Debug, Clone, Default)]
pub struct IdentityMap {
    map: HashMap<NodeId, NodeId>,
}

impl IdentityMap {
    pub fn get(&self, template: NodeId) -> Option<NodeId> {
        self.map.get(&template).copied()
    }

    /// The clone of `id`, or `id` itself when it was not part of the clone.
    pub fn translate(&self, id: NodeId) -> NodeId {
        self.get(id).unwrap_or(id)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Every node created by the clone.
    pub fn cloned_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.map.values().copied()
    }
}

/// Result of cloning a template's node sequence.
#[derive(Debug, Clone, Default)]
pub struct ClonedNodes {
    /// Clones of the requested roots, in the same order.
    pub roots: Vec<NodeId>,
    /// DEF names of the cloned nodes.
    pub namespace: Namespace,
    pub identity: IdentityMap,
}

/// Deep-copy `roots` and everything reachable from them through node-valued
/// fields into fresh nodes.
///
/// Every source node is copied exactly once, so two references to one node
/// (DEF/USE) come out as two references to one clone. Node references in
/// fields, instance overrides, and routes are rewritten to the clones; a
/// route leaving the copied graph keeps its original target. The source
/// nodes are not modified.
pub fn clone_nodes(arena: &mut NodeArena, roots: &[NodeId]) -> ClonedNodes {
    let order = arena.reachable(roots);

    let mut identity = IdentityMap::default();
    for &id in &order {
        if let Some(copy) = arena.get(id).map(|node| node.duplicate()) {
            let new_id = arena.insert(copy);
            identity.map.insert(id, new_id);
        }
    }

    let mut namespace = Namespace::new();
    for &id in &order {
        let Some(new_id) = identity.get(id) else {
            continue;
        };
        if let Some(node) = arena.get_mut(new_id) {
            node.remap(&|target: NodeId| identity.translate(target));
            if let Some(name) = node.name() {
                namespace.define(name, new_id);
            }
        }
    }

    ClonedNodes {
        roots: roots.iter().filter_map(|id| identity.get(*id)).collect(),
        namespace,
        identity,
    }
}

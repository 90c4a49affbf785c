//! Per-scene node table.
//!
//! Every node of a scene (template graphs, clones, and the scene itself)
//! lives here and is addressed by [`NodeId`]. References between nodes are
//! plain ids, so there are no ownership cycles to break. Released slots are
//! never reused, which keeps stale ids from aliasing new nodes.

use std::collections::HashSet;

use crate::graph::node::Node;
use crate::models::NodeId;

#[derive(Debug, Default)]
pub struct NodeArena {
    slots: Vec<Option<Node>>,
    live: usize,
}

impl NodeArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.slots.len() as u32);
        self.slots.push(Some(node));
        self.live += 1;
        id
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.slots.get(id.index())?.as_ref()
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.slots.get_mut(id.index())?.as_mut()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    /// Take a node out of the table. Its slot stays empty.
    pub fn remove(&mut self, id: NodeId) -> Option<Node> {
        let node = self.slots.get_mut(id.index())?.take();
        if node.is_some() {
            self.live -= 1;
        }
        node
    }

    /// Remove `ids`, along with the clones owned by any instances among them.
    pub fn release(&mut self, ids: impl IntoIterator<Item = NodeId>) {
        let mut pending: Vec<NodeId> = ids.into_iter().collect();
        while let Some(id) = pending.pop() {
            let Some(node) = self.remove(id) else {
                continue;
            };
            if let Some(instance) = node.into_instance() {
                pending.extend(instance.into_clone_ids());
            }
        }
    }

    /// `roots` and every node reachable from them through node-valued
    /// fields, each once, in depth-first order. Missing ids are skipped.
    pub fn reachable(&self, roots: &[NodeId]) -> Vec<NodeId> {
        let mut order: Vec<NodeId> = Vec::new();
        let mut seen: HashSet<NodeId> = HashSet::new();
        let mut stack: Vec<NodeId> = roots.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            let Some(node) = self.get(id) else {
                continue;
            };
            order.push(id);
            for child in node.node_refs().into_iter().rev() {
                if !seen.contains(&child) {
                    stack.push(child);
                }
            }
        }
        order
    }

    /// Id the next inserted node will get.
    pub fn mark(&self) -> NodeId {
        NodeId(self.slots.len() as u32)
    }

    /// Release every node inserted since `mark` was taken.
    pub fn release_since(&mut self, mark: NodeId) {
        let ids: Vec<NodeId> = (mark.0..self.slots.len() as u32).map(NodeId).collect();
        self.release(ids);
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|node| (NodeId(index as u32), node)))
    }
}

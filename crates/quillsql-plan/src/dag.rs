// Copyright 2024 Quill Data Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The plan DAG: a typed graph of plan nodes with labeled edges.
//!
//! Nodes own their payload by value in a single adjacency table keyed by
//! node id, so the ownership graph can never cycle even though the logical
//! graph shape is arbitrary. Both the logical and the physical plan reuse
//! this generic structure, parameterized over their own node-payload type.

use hashbrown::HashMap;
use quillsql_common::{QuillError, Result};

/// A plan node identifier, stable for the lifetime of one `PlanDag`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

/// Edge label: joins use both `Left` and `Right`; unions use many
/// `None`-labeled edges into the same consumer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EdgeLabel {
    Left,
    Right,
    None,
}

#[derive(Clone, Debug)]
struct Edge {
    src: NodeId,
    dst: NodeId,
    label: EdgeLabel,
}

/// A typed graph of plan nodes. Generic over the node payload so the same
/// structure backs both the logical plan (`PlanDag<LogicalStep>`) and the
/// physical plan (`PlanDag<PhysicalNode>`).
#[derive(Clone, Debug)]
pub struct PlanDag<T> {
    nodes: HashMap<NodeId, T>,
    edges: Vec<Edge>,
    next_id: u64,
}

impl<T> Default for PlanDag<T> {
    fn default() -> Self {
        Self {
            nodes: HashMap::new(),
            edges: Vec::new(),
            next_id: 0,
        }
    }
}

impl<T> PlanDag<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh node id and insert its payload. Returns the id so
    /// callers can immediately wire edges to/from it.
    pub fn add_node(&mut self, payload: T) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(id, payload);
        id
    }

    /// Insert a node under a caller-chosen id (used by `copy`/`merge`,
    /// which must preserve id identity across the operation).
    pub fn add_node_with_id(&mut self, id: NodeId, payload: T) {
        self.nodes.insert(id, payload);
        self.next_id = self.next_id.max(id.0 + 1);
    }

    /// Allocate a fresh id without inserting a payload yet. Used by
    /// strategies that need a `NodeId` to pass to `insert_node_before`/
    /// `insert_node_after` (both of which insert the payload themselves)
    /// before they have built the payload to insert.
    pub fn reserve_node_id(&mut self) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        id
    }

    pub fn add_edge(&mut self, src: NodeId, dst: NodeId, label: EdgeLabel) -> Result<()> {
        if !self.nodes.contains_key(&src) || !self.nodes.contains_key(&dst) {
            return Err(QuillError::invalid_internal_state(format!(
                "add_edge references unknown node: {src:?} -> {dst:?}"
            )));
        }
        if matches!(label, EdgeLabel::Left | EdgeLabel::Right) {
            let existing = self
                .edges
                .iter()
                .any(|e| e.dst == dst && std::mem::discriminant(&e.label) == std::mem::discriminant(&label));
            if existing {
                return Err(QuillError::invalid_internal_state(format!(
                    "node {dst:?} already has a {label:?} edge"
                )));
            }
        }
        self.edges.push(Edge { src, dst, label });
        Ok(())
    }

    /// Remove every edge from `src` to `dst`, regardless of label. Used by
    /// strategies that re-thread a node's outgoing edges onto a freshly
    /// inserted chain (e.g. split-conjuncts) rather than leaving the stale
    /// direct edge behind.
    pub fn remove_edge(&mut self, src: NodeId, dst: NodeId) {
        self.edges.retain(|e| !(e.src == src && e.dst == dst));
    }

    pub fn node(&self, id: NodeId) -> Option<&T> {
        self.nodes.get(&id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut T> {
        self.nodes.get_mut(&id)
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Edges terminating at `id`, in insertion order.
    pub fn ingoing_edges(&self, id: NodeId) -> Vec<(NodeId, EdgeLabel)> {
        self.edges
            .iter()
            .filter(|e| e.dst == id)
            .map(|e| (e.src, e.label))
            .collect()
    }

    /// Edges originating at `id`, in insertion order, each paired with the
    /// label it carries to its consumer.
    pub fn outgoing_edges(&self, id: NodeId) -> Vec<(NodeId, EdgeLabel)> {
        self.edges
            .iter()
            .filter(|e| e.src == id)
            .map(|e| (e.dst, e.label))
            .collect()
    }

    /// Nodes with no incoming edges: scans, values, function datasets.
    pub fn get_entry_points(&self) -> Vec<NodeId> {
        self.nodes
            .keys()
            .copied()
            .filter(|id| self.ingoing_edges(*id).is_empty())
            .collect()
    }

    /// Nodes with no outgoing edges: the result sink(s). A well-formed plan
    /// has exactly one; this returns every such node so callers can
    /// detect the invariant violation rather than silently picking one.
    pub fn get_exit_points(&self) -> Vec<NodeId> {
        self.nodes
            .keys()
            .copied()
            .filter(|id| self.outgoing_edges(*id).is_empty())
            .collect()
    }

    /// Kahn's algorithm over the edge list; no allocation beyond the
    /// in-degree map and a work queue.
    pub fn is_acyclic(&self) -> bool {
        let mut indegree: HashMap<NodeId, usize> = self.nodes.keys().map(|id| (*id, 0)).collect();
        for edge in &self.edges {
            *indegree.entry(edge.dst).or_insert(0) += 1;
        }
        let mut queue: Vec<NodeId> = indegree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut visited = 0usize;
        while let Some(id) = queue.pop() {
            visited += 1;
            for (dst, _) in self.outgoing_edges(id) {
                let deg = indegree.get_mut(&dst).unwrap();
                *deg -= 1;
                if *deg == 0 {
                    queue.push(dst);
                }
            }
        }
        visited == self.nodes.len()
    }

    /// Flattened depth-first traversal from every entry point, visiting
    /// left edges before right edges at each node. Unlabeled edges are visited
    /// in the order they were added, which is stable per call but
    /// otherwise unspecified, matching the contract.
    pub fn depth_first_search_flat(&self) -> Vec<NodeId> {
        let mut visited = hashbrown::HashSet::new();
        let mut order = Vec::new();
        for entry in self.get_entry_points() {
            self.dfs_visit(entry, &mut visited, &mut order);
        }
        order
    }

    fn dfs_visit(&self, id: NodeId, visited: &mut hashbrown::HashSet<NodeId>, order: &mut Vec<NodeId>) {
        if !visited.insert(id) {
            return;
        }
        order.push(id);
        let mut children = self.outgoing_edges(id);
        children.sort_by_key(|(_, label)| match label {
            EdgeLabel::Left => 0,
            EdgeLabel::None => 1,
            EdgeLabel::Right => 2,
        });
        for (child, _) in children {
            self.dfs_visit(child, visited, order);
        }
    }

    /// Remove `id`, reconnecting every incoming edge to every outgoing
    /// edge and preserving the *outgoing* side's label. Used
    /// pervasively by the optimizer to drop a node that has become a
    /// no-op (a Filter folded to `TRUE`, a pushed-down predicate).
    pub fn remove_node_heal(&mut self, id: NodeId) -> Result<()> {
        if !self.nodes.contains_key(&id) {
            return Err(QuillError::invalid_internal_state(format!(
                "remove_node_heal: unknown node {id:?}"
            )));
        }
        let incoming = self.ingoing_edges(id);
        let outgoing = self.outgoing_edges(id);
        self.edges.retain(|e| e.src != id && e.dst != id);
        for (src, _) in &incoming {
            for (dst, out_label) in &outgoing {
                self.edges.push(Edge {
                    src: *src,
                    dst: *dst,
                    label: *out_label,
                });
            }
        }
        self.nodes.remove(&id);
        Ok(())
    }

    /// Insert `new_id` (already carrying `payload`) directly above
    /// `existing`: every edge that used to terminate at `existing` now
    /// terminates at `new_id`, and a single unlabeled edge connects
    /// `new_id` to `existing`. Used to re-insert an unpushed predicate.
    pub fn insert_node_before(&mut self, new_id: NodeId, payload: T, existing: NodeId) -> Result<()> {
        if !self.nodes.contains_key(&existing) {
            return Err(QuillError::invalid_internal_state(format!(
                "insert_node_before: unknown node {existing:?}"
            )));
        }
        self.add_node_with_id(new_id, payload);
        for edge in self.edges.iter_mut().filter(|e| e.dst == existing) {
            edge.dst = new_id;
        }
        self.edges.push(Edge {
            src: new_id,
            dst: existing,
            label: EdgeLabel::None,
        });
        Ok(())
    }

    /// Insert `new_id` directly below `existing`: every edge that used to
    /// originate at `existing` now originates at `new_id` (labels
    /// preserved), and a single unlabeled edge connects `existing` to
    /// `new_id`. Used by operator fusion to splice a `HeapSort` in place
    /// of the `Order`/`Limit` pair it replaces.
    pub fn insert_node_after(&mut self, new_id: NodeId, payload: T, existing: NodeId) -> Result<()> {
        if !self.nodes.contains_key(&existing) {
            return Err(QuillError::invalid_internal_state(format!(
                "insert_node_after: unknown node {existing:?}"
            )));
        }
        self.add_node_with_id(new_id, payload);
        for edge in self.edges.iter_mut().filter(|e| e.src == existing) {
            edge.src = new_id;
        }
        self.edges.push(Edge {
            src: existing,
            dst: new_id,
            label: EdgeLabel::None,
        });
        Ok(())
    }

    /// Deep copy: fresh node ids are not allocated, so the result is
    /// indistinguishable from `self` except for payload independence.
    pub fn copy(&self) -> Self
    where
        T: Clone,
    {
        self.clone()
    }

    /// Merge `other`'s nodes and edges into `self`. Node ids in `other`
    /// that collide with `self` are not remapped — callers (the optimizer
    /// never calls this across independently-allocated dags) must ensure
    /// disjoint id spaces, typically by building `other` from a `copy` of
    /// `self`'s id allocator state.
    pub fn merge(&mut self, other: Self) {
        for (id, payload) in other.nodes {
            self.nodes.insert(id, payload);
        }
        self.edges.extend(other.edges);
        self.next_id = self.next_id.max(other.next_id);
    }

    /// Render a Graphviz `dot` description, for debugging/EXPLAIN output.
    pub fn draw(&self) -> String
    where
        T: std::fmt::Debug,
    {
        let mut out = String::from("digraph plan {\n");
        for (id, payload) in &self.nodes {
            out.push_str(&format!("  n{} [label=\"{:?}\"];\n", id.0, payload));
        }
        for edge in &self.edges {
            let style = match edge.label {
                EdgeLabel::Left => " [label=left]",
                EdgeLabel::Right => " [label=right]",
                EdgeLabel::None => "",
            };
            out.push_str(&format!("  n{} -> n{}{};\n", edge.src.0, edge.dst.0, style));
        }
        out.push_str("}\n");
        out
    }
}

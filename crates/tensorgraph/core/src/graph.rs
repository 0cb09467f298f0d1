// Dotlanth
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.


//! Graph IR: nodes, tensor table and designated inputs/outputs
//!
//! A graph is built incrementally and may be temporarily "open" (a node may
//! read a tensor whose producer is added later). Acyclicity and single static
//! assignment are checked by [`ComputationalGraph::validate`], which the
//! optimizer runs before and after every pass.

use crate::error::{GraphError, GraphResult};
use crate::node::{GraphNode, NodeId};
use crate::tensor::{DataType, TensorDescriptor, TensorId, TensorValue};
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap};

/// Computational graph representation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComputationalGraph {
    nodes: Vec<GraphNode>,
    tensors: BTreeMap<TensorId, TensorDescriptor>,
    graph_inputs: BTreeSet<TensorId>,
    graph_outputs: BTreeSet<TensorId>,
    next_tensor_id: u32,
    next_node_id: u32,
    optimized: bool,
    /// Node positions in dispatch order, cached when the graph is optimized
    execution_order: Option<Vec<usize>>,
}

impl ComputationalGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tensor and return its id
    pub fn add_tensor(&mut self, descriptor: TensorDescriptor) -> TensorId {
        let id = TensorId(self.next_tensor_id);
        self.next_tensor_id += 1;
        self.tensors.insert(id, descriptor);
        id
    }

    /// Reserve a fresh node id for a node built outside `add_node`
    pub fn reserve_node_id(&mut self) -> NodeId {
        let id = NodeId(self.next_node_id);
        self.next_node_id += 1;
        id
    }

    /// Register a tensor supplied by the caller at execution time
    pub fn add_input(&mut self, descriptor: TensorDescriptor) -> TensorId {
        let id = self.add_tensor(descriptor);
        self.graph_inputs.insert(id);
        self.invalidate();
        id
    }

    /// Register a literal tensor together with the node producing it
    pub fn add_constant(&mut self, name: &str, value: TensorValue) -> GraphResult<TensorId> {
        let descriptor = TensorDescriptor::new(name, value.shape().to_vec(), DataType::F32).constant();
        let id = self.add_tensor(descriptor);
        self.add_node(GraphNode::constant(name, id, value))?;
        Ok(id)
    }

    /// Append a node, assigning its id
    pub fn add_node(&mut self, mut node: GraphNode) -> GraphResult<NodeId> {
        if let Some(unknown) = node.inputs.iter().chain(&node.outputs).find(|id| !self.tensors.contains_key(id)) {
            return Err(GraphError::InvalidGraph(format!("node `{}` references unknown tensor {}", node.name, unknown)));
        }
        let id = NodeId(self.next_node_id);
        self.next_node_id += 1;
        node.id = id;
        self.nodes.push(node);
        self.invalidate();
        Ok(id)
    }

    pub fn mark_input(&mut self, id: TensorId) -> GraphResult<()> {
        self.require_tensor(id)?;
        self.graph_inputs.insert(id);
        self.invalidate();
        Ok(())
    }

    /// Designate a tensor that must survive optimization
    pub fn mark_output(&mut self, id: TensorId) -> GraphResult<()> {
        self.require_tensor(id)?;
        self.graph_outputs.insert(id);
        self.invalidate();
        Ok(())
    }

    fn require_tensor(&self, id: TensorId) -> GraphResult<()> {
        if self.tensors.contains_key(&id) {
            Ok(())
        } else {
            Err(GraphError::InvalidGraph(format!("unknown tensor {id}")))
        }
    }

    /// Clear the optimized flag and the cached execution order
    fn invalidate(&mut self) {
        self.optimized = false;
        self.execution_order = None;
    }

    /// Copy of this graph carrying a new node list; the copy is not optimized
    pub fn rebuild(&self, nodes: Vec<GraphNode>) -> Self {
        Self {
            nodes,
            tensors: self.tensors.clone(),
            graph_inputs: self.graph_inputs.clone(),
            graph_outputs: self.graph_outputs.clone(),
            next_tensor_id: self.next_tensor_id,
            next_node_id: self.next_node_id,
            optimized: false,
            execution_order: None,
        }
    }

    /// Mark the graph optimized and cache its dispatch order
    ///
    /// Fails with `InvalidGraph` if the nodes contain a cycle.
    pub fn mark_optimized(&mut self) -> GraphResult<()> {
        let order = self.topological_order()?;
        self.optimized = true;
        self.execution_order = Some(order);
        Ok(())
    }

    pub fn is_optimized(&self) -> bool {
        self.optimized
    }

    pub fn execution_order(&self) -> Option<&[usize]> {
        self.execution_order.as_deref()
    }

    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, id: NodeId) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn tensors(&self) -> &BTreeMap<TensorId, TensorDescriptor> {
        &self.tensors
    }

    pub fn tensor(&self, id: TensorId) -> Option<&TensorDescriptor> {
        self.tensors.get(&id)
    }

    /// Mutable descriptor access; clears the optimized flag
    pub fn tensor_mut(&mut self, id: TensorId) -> Option<&mut TensorDescriptor> {
        self.invalidate();
        self.tensors.get_mut(&id)
    }

    /// Mutable access to every descriptor; clears the optimized flag
    pub fn tensors_mut(&mut self) -> impl Iterator<Item = (&TensorId, &mut TensorDescriptor)> {
        self.invalidate();
        self.tensors.iter_mut()
    }

    /// Drop descriptors for which `keep` returns false; clears the optimized flag
    pub fn retain_tensors(&mut self, mut keep: impl FnMut(TensorId, &TensorDescriptor) -> bool) {
        self.invalidate();
        self.tensors.retain(|id, desc| keep(*id, desc));
    }

    pub fn graph_inputs(&self) -> &BTreeSet<TensorId> {
        &self.graph_inputs
    }

    pub fn graph_outputs(&self) -> &BTreeSet<TensorId> {
        &self.graph_outputs
    }

    pub fn producer_of(&self, tensor: TensorId) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.outputs.contains(&tensor))
    }

    /// Number of node-input slots across the whole graph reading each tensor
    pub fn fan_out(&self) -> HashMap<TensorId, usize> {
        let mut fan_out = HashMap::new();
        for node in &self.nodes {
            for input in &node.inputs {
                *fan_out.entry(*input).or_insert(0) += 1;
            }
        }
        fan_out
    }

    /// Positions of the nodes reading each tensor, in program order
    pub fn consumers(&self) -> HashMap<TensorId, Vec<usize>> {
        let mut consumers: HashMap<TensorId, Vec<usize>> = HashMap::new();
        for (position, node) in self.nodes.iter().enumerate() {
            for input in &node.inputs {
                let readers = consumers.entry(*input).or_default();
                if readers.last() != Some(&position) {
                    readers.push(position);
                }
            }
        }
        consumers
    }

    /// Position of the node producing each tensor
    pub fn producers(&self) -> HashMap<TensorId, usize> {
        let mut producers = HashMap::new();
        for (position, node) in self.nodes.iter().enumerate() {
            for output in &node.outputs {
                producers.entry(*output).or_insert(position);
            }
        }
        producers
    }

    /// Producer-to-consumer dependency graph over node positions
    pub fn dependency_graph(&self) -> DiGraph<usize, TensorId> {
        let mut graph = DiGraph::with_capacity(self.nodes.len(), self.nodes.len());
        let indices: Vec<NodeIndex> = (0..self.nodes.len()).map(|position| graph.add_node(position)).collect();
        let producers = self.producers();
        for (position, node) in self.nodes.iter().enumerate() {
            for input in &node.inputs {
                if let Some(&producer) = producers.get(input) {
                    graph.add_edge(indices[producer], indices[position], *input);
                }
            }
        }
        graph
    }

    /// Node positions such that every node follows the producers of its inputs
    ///
    /// Independent nodes keep their program order, so the result is
    /// deterministic for a given node list.
    pub fn topological_order(&self) -> GraphResult<Vec<usize>> {
        let graph = self.dependency_graph();
        let mut in_degree: Vec<usize> = graph.node_indices().map(|idx| graph.neighbors_directed(idx, Direction::Incoming).count()).collect();

        let mut ready: BinaryHeap<Reverse<usize>> = in_degree.iter().enumerate().filter(|(_, d)| **d == 0).map(|(p, _)| Reverse(p)).collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(Reverse(position)) = ready.pop() {
            order.push(position);
            for successor in graph.neighbors_directed(NodeIndex::new(position), Direction::Outgoing) {
                let slot = &mut in_degree[successor.index()];
                *slot -= 1;
                if *slot == 0 {
                    ready.push(Reverse(successor.index()));
                }
            }
        }

        if order.len() != self.nodes.len() {
            let stuck = in_degree.iter().position(|d| *d > 0).map(|p| &self.nodes[p]);
            let culprit = stuck.map(|n| format!("{} (`{}`)", n.id, n.name)).unwrap_or_default();
            return Err(GraphError::InvalidGraph(format!("cycle detected through node {culprit}")));
        }
        Ok(order)
    }

    /// Check references, single static assignment and acyclicity
    pub fn validate(&self) -> GraphResult<()> {
        for id in self.graph_inputs.iter().chain(&self.graph_outputs) {
            self.require_tensor(*id)?;
        }

        let mut produced: HashMap<TensorId, NodeId> = HashMap::new();
        for node in &self.nodes {
            if let Some(unknown) = node.inputs.iter().chain(&node.outputs).find(|id| !self.tensors.contains_key(id)) {
                return Err(GraphError::InvalidGraph(format!("node {} references unknown tensor {}", node.id, unknown)));
            }
            for output in &node.outputs {
                if self.graph_inputs.contains(output) {
                    return Err(GraphError::InvalidGraph(format!("node {} writes graph input {}", node.id, output)));
                }
                if let Some(previous) = produced.insert(*output, node.id) {
                    return Err(GraphError::InvalidGraph(format!("tensor {} produced by both {} and {}", output, previous, node.id)));
                }
            }
        }

        self.topological_order().map(|_| ())
    }
}

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

//! Dead code elimination pass
//!
//! Removes every node whose outputs cannot reach a graph output, then drops
//! tensor descriptors nothing references any more.

use crate::config::OptimizationConfig;
use crate::optimizer::analysis::live_nodes;
use crate::optimizer::framework::{OptimizationPass, OptimizationResult, PassCounters};
use std::collections::HashSet;
use tensorgraph_core::{ComputationalGraph, GraphNode, GraphResult, TensorId};
use tracing::debug;

/// Statistics about eliminated code
#[derive(Debug, Clone, Default)]
pub struct EliminationStats {
    pub dead_nodes_eliminated: usize,
    pub dead_tensors_eliminated: usize,
}

/// Dead code eliminator driven by backward reachability from the outputs
#[derive(Debug, Default)]
pub struct DeadCodeElimination {
    stats: EliminationStats,
}

impl DeadCodeElimination {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> &EliminationStats {
        &self.stats
    }

    /// Remove dead nodes and unreferenced tensors, returning the counts removed
    pub fn eliminate(&mut self, graph: &ComputationalGraph) -> (ComputationalGraph, usize, usize) {
        let live = live_nodes(graph);
        let kept: Vec<GraphNode> = graph
            .nodes()
            .iter()
            .enumerate()
            .filter(|(position, _)| live.contains(position))
            .map(|(_, node)| node.clone())
            .collect();
        let removed_nodes = graph.node_count() - kept.len();

        let mut referenced: HashSet<TensorId> = graph.graph_inputs().iter().chain(graph.graph_outputs()).copied().collect();
        for node in &kept {
            referenced.extend(node.inputs.iter().chain(&node.outputs).copied());
        }

        let mut next = graph.rebuild(kept);
        let before = next.tensors().len();
        next.retain_tensors(|id, _| referenced.contains(&id));
        let removed_tensors = before - next.tensors().len();

        self.stats.dead_nodes_eliminated += removed_nodes;
        self.stats.dead_tensors_eliminated += removed_tensors;
        (next, removed_nodes, removed_tensors)
    }
}

impl OptimizationPass for DeadCodeElimination {
    fn name(&self) -> &str {
        "dead_code_elimination"
    }

    fn description(&self) -> &str {
        "Removes nodes whose results never reach a graph output"
    }

    fn optimize(&mut self, graph: ComputationalGraph, _config: &OptimizationConfig) -> GraphResult<OptimizationResult<ComputationalGraph>> {
        let (output, removed_nodes, removed_tensors) = self.eliminate(&graph);
        if removed_nodes > 0 {
            debug!(removed_nodes, removed_tensors, "eliminated dead nodes");
        }
        Ok(OptimizationResult {
            output,
            changed: removed_nodes > 0 || removed_tensors > 0,
            counters: PassCounters {
                dead_nodes_removed: removed_nodes,
                ..PassCounters::default()
            },
            warnings: Vec::new(),
        })
    }
}

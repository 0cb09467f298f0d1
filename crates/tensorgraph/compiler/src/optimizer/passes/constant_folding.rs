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

//! Constant folding optimization pass
//!
//! Evaluates pure nodes whose inputs are all literals at compile time and
//! replaces them with `Constant` nodes. Evaluation goes through the reference
//! backend, so a folded value is bit-identical to what the reference CPU
//! backend would compute at execution time.

use crate::config::OptimizationConfig;
use crate::optimizer::framework::{OptimizationPass, OptimizationResult, OptimizationWarning, PassCounters};
use std::collections::{HashMap, HashSet};
use tensorgraph_core::backend::reference;
use tensorgraph_core::{ComputationalGraph, GraphNode, GraphResult, NodeId, TensorId, TensorValue};
use tracing::{debug, warn};

/// Statistics about folding operations
#[derive(Debug, Clone, Default)]
pub struct FoldingStats {
    pub nodes_folded: usize,
    pub sweeps: usize,
    pub evaluation_failures: usize,
}

/// Constant folder over the graph IR
#[derive(Debug, Default)]
pub struct ConstantFolding {
    stats: FoldingStats,
}

impl ConstantFolding {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> &FoldingStats {
        &self.stats
    }
}

/// Literal values of every tensor produced by a `Constant` node
fn seed_constants(graph: &ComputationalGraph) -> HashMap<TensorId, TensorValue> {
    graph
        .nodes()
        .iter()
        .filter_map(|node| match (node.literal(), node.outputs.as_slice()) {
            (Some(value), [output]) => Some((*output, value.clone())),
            _ => None,
        })
        .collect()
}

fn is_foldable(node: &GraphNode, constants: &HashMap<TensorId, TensorValue>, failed: &HashSet<NodeId>) -> bool {
    node.op_kind.is_pure()
        && !node.is_constant()
        && node.custom_op().is_none()
        && !node.inputs.is_empty()
        && !node.outputs.is_empty()
        && !failed.contains(&node.id)
        && node.inputs.iter().all(|input| constants.contains_key(input))
}

impl OptimizationPass for ConstantFolding {
    fn name(&self) -> &str {
        "constant_folding"
    }

    fn description(&self) -> &str {
        "Evaluates nodes whose inputs are all literals and replaces them with constants"
    }

    fn can_optimize(&self, graph: &ComputationalGraph, _config: &OptimizationConfig) -> bool {
        graph.nodes().iter().any(GraphNode::is_constant)
    }

    fn optimize(&mut self, graph: ComputationalGraph, config: &OptimizationConfig) -> GraphResult<OptimizationResult<ComputationalGraph>> {
        let mut graph = graph;
        let order = graph.topological_order()?;
        let mut constants = seed_constants(&graph);
        let mut failed = HashSet::new();
        let mut warnings = Vec::new();
        // One slot per original position; a folded multi-output node fills its slot with several constants
        let mut slots: Vec<Vec<GraphNode>> = graph.nodes().iter().cloned().map(|node| vec![node]).collect();
        let mut folded = 0;
        let mut converged = false;

        for _ in 0..config.max_folding_iterations {
            self.stats.sweeps += 1;
            let mut changed = false;

            for &position in &order {
                let node = match slots[position].as_slice() {
                    [node] if is_foldable(node, &constants, &failed) => node.clone(),
                    _ => continue,
                };

                let evaluated = {
                    let inputs: Vec<&TensorValue> = node.inputs.iter().filter_map(|id| constants.get(id)).collect();
                    reference::evaluate(&node, &inputs)
                };

                match evaluated {
                    Ok(values) => {
                        let multi = node.outputs.len() > 1;
                        let mut replacements = Vec::with_capacity(node.outputs.len());
                        for (index, (output, value)) in node.outputs.iter().zip(values).enumerate() {
                            if let Some(descriptor) = graph.tensor_mut(*output) {
                                descriptor.is_constant = true;
                                descriptor.shape = value.shape().to_vec();
                            }
                            let name = if multi { format!("{}_folded_{index}", node.name) } else { format!("{}_folded", node.name) };
                            let mut replacement = GraphNode::constant(name, *output, value.clone());
                            replacement.id = if index == 0 { node.id } else { graph.reserve_node_id() };
                            constants.insert(*output, value);
                            replacements.push(replacement);
                        }
                        debug!(node = %node.id, op = %node.op_kind, "folded node");
                        slots[position] = replacements;
                        folded += 1;
                        changed = true;
                    }
                    Err(err) => {
                        self.stats.evaluation_failures += 1;
                        failed.insert(node.id);
                        warnings.push(OptimizationWarning::new(
                            "constant_folding",
                            format!("left {} (`{}`) unfolded: {err}", node.id, node.name),
                        ));
                    }
                }
            }

            if !changed {
                converged = true;
                break;
            }
        }

        if !converged {
            warn!(iterations = config.max_folding_iterations, "constant folding stopped before reaching a fixpoint");
        }
        self.stats.nodes_folded += folded;

        let output = if folded > 0 { graph.rebuild(slots.into_iter().flatten().collect()) } else { graph };
        Ok(OptimizationResult {
            output,
            changed: folded > 0,
            counters: PassCounters {
                constants_folded: folded,
                ..PassCounters::default()
            },
            warnings,
        })
    }
}

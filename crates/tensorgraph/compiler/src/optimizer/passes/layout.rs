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

//! Layout rewrite pass
//!
//! Sets the memory layout hint of every tensor from the backend's preference.
//! Only descriptors change; nodes are never restructured.

use crate::config::OptimizationConfig;
use crate::optimizer::framework::{OptimizationPass, OptimizationResult, PassCounters};
use std::collections::HashSet;
use tensorgraph_core::{ChannelOrder, ComputationalGraph, GraphNode, GraphResult, LayoutPreference, MemoryLayout, OpKind, TensorDescriptor, TensorId};
use tracing::debug;

/// Layout hint assignment for the target backend
#[derive(Debug, Default)]
pub struct LayoutRewrite;

impl LayoutRewrite {
    pub fn new() -> Self {
        Self
    }
}

/// Whether `node` runs a matrix multiply on its first two inputs
fn multiplies_matrices(node: &GraphNode) -> bool {
    match node.op_kind.components() {
        Some(components) => components.first() == Some(&OpKind::MatMul),
        None => node.op_kind == OpKind::MatMul,
    }
}

/// Right-hand operands of matrix multiplies
fn matmul_weights(graph: &ComputationalGraph) -> HashSet<TensorId> {
    graph
        .nodes()
        .iter()
        .filter(|node| multiplies_matrices(node))
        .filter_map(|node| node.inputs.get(1).copied())
        .collect()
}

/// Layout a tensor should carry under `preference`
pub fn preferred_layout(descriptor: &TensorDescriptor, is_weight: bool, preference: &LayoutPreference) -> MemoryLayout {
    match descriptor.rank() {
        4 => match preference.channel_order {
            ChannelOrder::ChannelsFirst => MemoryLayout::Nchw,
            ChannelOrder::ChannelsLast => MemoryLayout::Nhwc,
        },
        2 if is_weight && preference.column_major_weights => MemoryLayout::ColumnMajor,
        _ => MemoryLayout::RowMajor,
    }
}

impl OptimizationPass for LayoutRewrite {
    fn name(&self) -> &str {
        "layout_rewrite"
    }

    fn description(&self) -> &str {
        "Assigns memory layout hints preferred by the target backend"
    }

    fn can_optimize(&self, graph: &ComputationalGraph, _config: &OptimizationConfig) -> bool {
        !graph.tensors().is_empty()
    }

    fn optimize(&mut self, graph: ComputationalGraph, config: &OptimizationConfig) -> GraphResult<OptimizationResult<ComputationalGraph>> {
        let mut graph = graph;
        let weights = matmul_weights(&graph);
        let mut rewritten = 0;

        for (id, descriptor) in graph.tensors_mut() {
            let layout = preferred_layout(descriptor, weights.contains(id), &config.layout);
            if descriptor.layout != layout {
                debug!(tensor = %id, from = ?descriptor.layout, to = ?layout, "layout rewritten");
                descriptor.layout = layout;
                rewritten += 1;
            }
        }

        Ok(OptimizationResult {
            output: graph,
            changed: rewritten > 0,
            counters: PassCounters {
                layouts_rewritten: rewritten,
                ..PassCounters::default()
            },
            warnings: Vec::new(),
        })
    }
}

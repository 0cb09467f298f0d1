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

//! Backward liveness from the graph outputs

use std::collections::HashSet;
use tensorgraph_core::{ComputationalGraph, TensorId};

/// Tensors the graph outputs transitively depend on, outputs included
pub fn live_tensors(graph: &ComputationalGraph) -> HashSet<TensorId> {
    let producers = graph.producers();
    let mut live: HashSet<TensorId> = graph.graph_outputs().iter().copied().collect();
    let mut worklist: Vec<TensorId> = live.iter().copied().collect();

    while let Some(tensor) = worklist.pop() {
        let Some(&position) = producers.get(&tensor) else {
            continue;
        };
        for input in &graph.nodes()[position].inputs {
            if live.insert(*input) {
                worklist.push(*input);
            }
        }
    }
    live
}

/// Positions of nodes producing at least one live tensor
pub fn live_nodes(graph: &ComputationalGraph) -> HashSet<usize> {
    let live = live_tensors(graph);
    graph
        .nodes()
        .iter()
        .enumerate()
        .filter(|(_, node)| node.outputs.iter().any(|output| live.contains(output)))
        .map(|(position, _)| position)
        .collect()
}

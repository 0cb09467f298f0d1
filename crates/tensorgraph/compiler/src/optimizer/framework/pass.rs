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

//! Optimization pass interface

use crate::config::OptimizationConfig;
use crate::optimizer::framework::metrics::{OptimizationWarning, PassCounters};
use tensorgraph_core::{ComputationalGraph, GraphResult};

/// A single graph-to-graph rewrite
///
/// Passes take ownership of the working graph and hand back a freshly built
/// one. The pipeline validates whatever comes back before the next pass sees
/// it, so a pass never needs to re-check the graph invariants itself.
pub trait OptimizationPass {
    /// Unique name of the pass
    fn name(&self) -> &str;
    /// Short description of the pass
    fn description(&self) -> &str;

    /// Determine if the pass has anything to do on the given graph
    fn can_optimize(&self, graph: &ComputationalGraph, config: &OptimizationConfig) -> bool {
        let _ = config;
        !graph.nodes().is_empty()
    }

    /// Run the pass, returning the rewritten graph, change flag, counters and warnings
    fn optimize(&mut self, graph: ComputationalGraph, config: &OptimizationConfig) -> GraphResult<OptimizationResult<ComputationalGraph>>;
}

/// Result of running an optimization pass
#[derive(Debug, Clone)]
pub struct OptimizationResult<T> {
    /// Transformed output
    pub output: T,
    /// Whether the pass changed the input
    pub changed: bool,
    /// Rewrite counts for this invocation
    pub counters: PassCounters,
    /// Warnings emitted during the pass
    pub warnings: Vec<OptimizationWarning>,
}

impl<T> OptimizationResult<T> {
    /// Result for a pass that left its input alone
    pub fn unchanged(output: T) -> Self {
        Self {
            output,
            changed: false,
            counters: PassCounters::default(),
            warnings: Vec::new(),
        }
    }
}

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

//! Model compiler driving the optimization pipeline

use crate::config::OptimizationConfig;
use crate::optimizer::framework::{OptimizationPipeline, OptimizationWarning};
use crate::stats::CompilationStats;
use tensorgraph_core::{ComputationalGraph, GraphResult};
use tracing::{debug, info, instrument};

/// Optimizes graphs and keeps the statistics of the last run
#[derive(Debug, Clone, Default)]
pub struct ModelCompiler {
    config: OptimizationConfig,
    stats: CompilationStats,
    warnings: Vec<OptimizationWarning>,
}

impl ModelCompiler {
    pub fn new(config: OptimizationConfig) -> Self {
        Self {
            config,
            stats: CompilationStats::default(),
            warnings: Vec::new(),
        }
    }

    pub fn with_level(level: u8) -> Self {
        Self::new(OptimizationConfig::with_level(level))
    }

    pub fn config(&self) -> &OptimizationConfig {
        &self.config
    }

    /// Optimize `graph` in place with the standard pipeline for the configured level
    ///
    /// An already optimized graph is left as is and reported with no changes.
    /// On error `graph` is left exactly as it was passed in.
    #[instrument(skip_all, fields(level = self.config.optimization_level, nodes = graph.node_count()))]
    pub fn compile(&mut self, graph: &mut ComputationalGraph) -> GraphResult<CompilationStats> {
        if graph.is_optimized() {
            debug!("graph already optimized");
            self.stats = CompilationStats {
                original_nodes: graph.node_count(),
                optimized_nodes: graph.node_count(),
                ..CompilationStats::default()
            };
            self.warnings.clear();
            return Ok(self.stats.clone());
        }
        let mut pipeline = OptimizationPipeline::for_level(self.config.clone());
        self.compile_with(graph, &mut pipeline)
    }

    /// Optimize `graph` in place with a caller-assembled pipeline
    pub fn compile_with(&mut self, graph: &mut ComputationalGraph, pipeline: &mut OptimizationPipeline) -> GraphResult<CompilationStats> {
        let outcome = pipeline.run(graph)?;
        *graph = outcome.graph;
        self.stats = outcome.stats;
        self.warnings = outcome.warnings;

        info!(
            original = self.stats.original_nodes,
            optimized = self.stats.optimized_nodes,
            fused = self.stats.nodes_fused,
            folded = self.stats.constants_folded,
            removed = self.stats.dead_nodes_removed,
            compile_ms = self.stats.compile_time_ms(),
            "graph compiled"
        );
        Ok(self.stats.clone())
    }

    /// Statistics of the last successful compilation
    pub fn stats(&self) -> &CompilationStats {
        &self.stats
    }

    pub fn warnings(&self) -> &[OptimizationWarning] {
        &self.warnings
    }

    /// Human-readable statistics table
    pub fn export_stats(&self) -> String {
        self.stats.to_string()
    }
}

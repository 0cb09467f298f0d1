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

//! Optimization pipeline

use crate::config::OptimizationConfig;
use crate::optimizer::framework::metrics::{OptimizationWarning, PassMetrics};
use crate::optimizer::framework::pass::OptimizationPass;
use crate::optimizer::passes::{ConstantFolding, DeadCodeElimination, LayoutRewrite, OperatorFusion};
use crate::stats::CompilationStats;
use std::collections::BTreeSet;
use std::time::Instant;
use tensorgraph_core::{ComputationalGraph, GraphError, GraphResult, TensorId};
use tracing::{debug, instrument, warn};

/// Optimized graph together with what the pipeline did to produce it
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub graph: ComputationalGraph,
    pub stats: CompilationStats,
    pub warnings: Vec<OptimizationWarning>,
}

/// Ordered list of passes run against a working copy of a graph
pub struct OptimizationPipeline {
    passes: Vec<Box<dyn OptimizationPass>>,
    config: OptimizationConfig,
}

impl OptimizationPipeline {
    /// Create an empty pipeline
    pub fn new(config: OptimizationConfig) -> Self {
        Self { passes: Vec::new(), config }
    }

    /// Create the standard pipeline for the configured optimization level
    pub fn for_level(config: OptimizationConfig) -> Self {
        let level = config.effective_level();
        if level != config.optimization_level {
            warn!(requested = config.optimization_level, using = level, "optimization level out of range");
        }
        let mut pipeline = Self::new(config);
        if level >= 1 {
            pipeline.add_pass(ConstantFolding::new());
            pipeline.add_pass(DeadCodeElimination::new());
        }
        if level >= 2 {
            pipeline.add_pass(OperatorFusion::standard());
            pipeline.add_pass(DeadCodeElimination::new());
            pipeline.add_pass(LayoutRewrite::new());
        }
        if level >= 3 {
            pipeline.add_pass(OperatorFusion::experimental());
            pipeline.add_pass(DeadCodeElimination::new());
        }
        pipeline
    }

    /// Add an optimization pass to the pipeline
    pub fn add_pass<P>(&mut self, pass: P)
    where
        P: OptimizationPass + 'static,
    {
        self.passes.push(Box::new(pass));
    }

    pub fn pass_names(&self) -> Vec<&str> {
        self.passes.iter().map(|pass| pass.name()).collect()
    }

    pub fn config(&self) -> &OptimizationConfig {
        &self.config
    }

    /// Run every pass over a copy of `graph`
    ///
    /// The input is validated first. Each pass result is validated before the
    /// next pass runs; a violation aborts with `GraphCorruption` naming the
    /// pass. `graph` itself is never modified, so callers commit the returned
    /// graph only on success.
    #[instrument(skip_all, fields(level = self.config.optimization_level, passes = self.passes.len()))]
    pub fn run(&mut self, graph: &ComputationalGraph) -> GraphResult<PipelineOutcome> {
        let start = Instant::now();
        graph.validate()?;

        let mut stats = CompilationStats {
            original_nodes: graph.node_count(),
            ..CompilationStats::default()
        };
        let mut warnings = Vec::new();
        let mut working = graph.clone();

        for pass in &mut self.passes {
            if !pass.can_optimize(&working, &self.config) {
                debug!(pass = pass.name(), "pass skipped");
                continue;
            }
            let name = pass.name().to_string();
            let outputs_before = available_outputs(&working);
            let pass_start = Instant::now();

            let result = pass.optimize(working, &self.config).map_err(|err| corruption(&name, err))?;
            check_invariants(&name, &result.output, &outputs_before)?;

            let duration = pass_start.elapsed();
            debug!(pass = %name, changed = result.changed, nodes = result.output.node_count(), ?duration, "pass finished");
            for warning in &result.warnings {
                warn!(pass = %warning.pass_name, "{}", warning.message);
            }

            stats.record(&result.counters);
            stats.passes.push(PassMetrics {
                pass_name: name,
                duration,
                changed: result.changed,
            });
            warnings.extend(result.warnings);
            working = result.output;
        }

        working.mark_optimized()?;
        stats.optimized_nodes = working.node_count();
        stats.compile_time = start.elapsed();

        Ok(PipelineOutcome {
            graph: working,
            stats,
            warnings,
        })
    }
}

/// Graph outputs that are currently supplied by the caller or produced by a node
fn available_outputs(graph: &ComputationalGraph) -> BTreeSet<TensorId> {
    let producers = graph.producers();
    graph
        .graph_outputs()
        .iter()
        .copied()
        .filter(|id| graph.graph_inputs().contains(id) || producers.contains_key(id))
        .collect()
}

fn check_invariants(pass: &str, graph: &ComputationalGraph, outputs_before: &BTreeSet<TensorId>) -> GraphResult<()> {
    graph.validate().map_err(|err| corruption(pass, err))?;
    let outputs_after = available_outputs(graph);
    if let Some(lost) = outputs_before.difference(&outputs_after).next() {
        return Err(GraphError::GraphCorruption {
            pass: pass.to_string(),
            reason: format!("graph output {lost} is no longer produced"),
        });
    }
    Ok(())
}

fn corruption(pass: &str, err: GraphError) -> GraphError {
    match err {
        GraphError::GraphCorruption { .. } => err,
        other => GraphError::GraphCorruption {
            pass: pass.to_string(),
            reason: other.to_string(),
        },
    }
}

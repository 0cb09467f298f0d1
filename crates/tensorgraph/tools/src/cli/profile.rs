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

//! Profile command: run the optimized sample graph and report hotspots

use super::GraphArgs;
use crate::config::ToolConfig;
use anyhow::{Context, Result};
use clap::Args;
use tensorgraph_compiler::runtime::Outputs;
use tensorgraph_compiler::{ExecutionDispatcher, ExecutionProfiler, ProfileReport};
use tensorgraph_core::BackendRegistry;
use tracing::{info, warn};

/// Largest tolerated difference between optimized and reference outputs
const TOLERANCE: f32 = 1e-3;

/// Arguments for the profile command
#[derive(Args, Debug)]
pub struct ProfileArgs {
    #[command(flatten)]
    pub graph: GraphArgs,

    /// Number of profiled runs; the last report is printed
    #[arg(short, long, default_value = "1")]
    pub iterations: usize,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

/// Execute the profile command
pub fn profile_sample(args: ProfileArgs, config: &ToolConfig) -> Result<()> {
    let mut optimization = config.optimization.clone();
    if let Some(level) = args.graph.opt_level {
        optimization.optimization_level = level;
    }

    let sample = args.graph.build()?;
    let dispatcher = ExecutionDispatcher::new(BackendRegistry::reference_cpu(), optimization);

    let reference = dispatcher.run(&sample.graph, sample.inputs()).context("reference run failed")?;

    let mut optimized = sample.graph.clone();
    dispatcher.prepare(&mut optimized)?;
    info!(
        original = sample.graph.node_count(),
        optimized = optimized.node_count(),
        "prepared sample graph"
    );

    let mut profiler = ExecutionProfiler::new(config.profiler.clone());
    let mut last: Option<(Outputs, ProfileReport)> = None;
    for _ in 0..args.iterations.max(1) {
        last = Some(dispatcher.run_profiled(&optimized, sample.inputs(), &mut profiler)?);
    }
    let Some((outputs, report)) = last else {
        anyhow::bail!("no profiled run completed");
    };

    let diff = max_abs_diff(&reference, &outputs);
    if diff > TOLERANCE {
        warn!(diff, "optimized output diverges from the reference run");
    }

    if args.json {
        println!("{}", report.to_json()?);
    } else {
        println!("{}", dispatcher.compilation_stats());
        println!();
        println!("{report}");
        println!();
        println!("Max abs difference vs. unoptimized run: {diff:.3e}");
    }
    Ok(())
}

/// Largest elementwise difference between matching outputs
pub fn max_abs_diff(expected: &Outputs, actual: &Outputs) -> f32 {
    expected
        .iter()
        .map(|(id, value)| match actual.get(id) {
            Some(other) if other.shape() == value.shape() => {
                value.data().iter().zip(other.data()).map(|(a, b)| (a - b).abs()).fold(0.0, f32::max)
            }
            _ => f32::INFINITY,
        })
        .fold(0.0, f32::max)
}

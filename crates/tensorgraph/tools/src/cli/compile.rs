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

//! Compile command: optimize the sample graph and report statistics

use super::GraphArgs;
use crate::config::ToolConfig;
use anyhow::Result;
use clap::Args;
use tensorgraph_compiler::ModelCompiler;
use tensorgraph_core::ComputationalGraph;
use tracing::info;

/// Arguments for the compile command
#[derive(Args, Debug)]
pub struct CompileArgs {
    #[command(flatten)]
    pub graph: GraphArgs,

    /// Print statistics as JSON
    #[arg(long)]
    pub json: bool,

    /// List the nodes of the optimized graph
    #[arg(long)]
    pub show_graph: bool,
}

/// Execute the compile command
pub fn compile_sample(args: CompileArgs, config: &ToolConfig) -> Result<()> {
    let mut optimization = config.optimization.clone();
    if let Some(level) = args.graph.opt_level {
        optimization.optimization_level = level;
    }

    let mut sample = args.graph.build()?;
    let mut compiler = ModelCompiler::new(optimization);
    info!(level = compiler.config().effective_level(), nodes = sample.graph.node_count(), "compiling sample graph");
    compiler.compile(&mut sample.graph)?;

    if args.json {
        println!("{}", compiler.stats().to_json()?);
    } else {
        println!("{}", compiler.stats());
        for warning in compiler.warnings() {
            println!("warning [{}]: {}", warning.pass_name, warning.message);
        }
    }

    if args.show_graph {
        println!();
        print!("{}", describe_graph(&sample.graph));
    }
    Ok(())
}

/// One line per node in dispatch order
pub fn describe_graph(graph: &ComputationalGraph) -> String {
    let order: Vec<usize> = match graph.execution_order() {
        Some(order) => order.to_vec(),
        None => (0..graph.node_count()).collect(),
    };
    let mut out = String::new();
    for index in order {
        let Some(node) = graph.nodes().get(index) else {
            continue;
        };
        let inputs: Vec<String> = node.inputs.iter().map(ToString::to_string).collect();
        let outputs: Vec<String> = node.outputs.iter().map(ToString::to_string).collect();
        out.push_str(&format!(
            "{:>4} {:<28} {:<24} ({}) -> ({})\n",
            node.id.to_string(),
            node.op_kind.to_string(),
            node.name,
            inputs.join(", "),
            outputs.join(", ")
        ));
    }
    out
}

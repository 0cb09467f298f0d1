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

//! TensorGraph compiler CLI
//!
//! Main entry point for the `tgc` command-line interface.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tensorgraph_tools::ToolConfig;
use tensorgraph_tools::cli::compile::{CompileArgs, compile_sample};
use tensorgraph_tools::cli::profile::{ProfileArgs, profile_sample};

#[derive(Parser)]
#[command(name = "tgc")]
#[command(about = "TensorGraph - graph-level optimizing compiler")]
#[command(version = "0.1.0")]
struct Cli {
    /// TOML configuration file; falls back to $TGC_CONFIG
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Optimize the sample transformer block and print statistics
    Compile(CompileArgs),
    /// Execute the optimized sample block under the profiler
    Profile(ProfileArgs),
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = ToolConfig::resolve_config(cli.config)?;

    match cli.command {
        Commands::Compile(args) => compile_sample(args, &config)?,
        Commands::Profile(args) => profile_sample(args, &config)?,
    }

    Ok(())
}

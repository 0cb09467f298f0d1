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

//! Graph-level optimizing compiler and execution dispatcher
//!
//! The optimizer rewrites a [`ComputationalGraph`] through a pass pipeline
//! selected by optimization level. The dispatcher runs the result against an
//! injected [`BackendRegistry`], optionally under an [`ExecutionProfiler`].
//!
//! [`ComputationalGraph`]: tensorgraph_core::ComputationalGraph
//! [`BackendRegistry`]: tensorgraph_core::BackendRegistry

pub mod config;
pub mod optimizer;
pub mod profiling;
pub mod runtime;
pub mod stats;

pub use config::OptimizationConfig;
pub use optimizer::ModelCompiler;
pub use optimizer::framework::{OptimizationPass, OptimizationPipeline, OptimizationResult, OptimizationWarning, PassCounters, PassMetrics};
pub use profiling::{ExecutionProfiler, HotspotDetector, ProfileReport, ProfilerConfig};
pub use runtime::ExecutionDispatcher;
pub use stats::CompilationStats;

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

//! Compilation statistics

use crate::optimizer::framework::{PassCounters, PassMetrics};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Summary of one optimizer run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompilationStats {
    pub original_nodes: usize,
    pub optimized_nodes: usize,
    pub nodes_fused: usize,
    pub constants_folded: usize,
    pub dead_nodes_removed: usize,
    pub layouts_rewritten: usize,
    pub fusions_blocked: usize,
    pub compile_time: Duration,
    /// One entry per pass that ran, in pipeline order
    pub passes: Vec<PassMetrics>,
}

impl CompilationStats {
    /// Fold a pass's counters into the totals
    pub fn record(&mut self, counters: &PassCounters) {
        self.nodes_fused += counters.nodes_fused;
        self.constants_folded += counters.constants_folded;
        self.dead_nodes_removed += counters.dead_nodes_removed;
        self.layouts_rewritten += counters.layouts_rewritten;
        self.fusions_blocked += counters.fusions_blocked;
    }

    /// Share of nodes removed by optimization, in percent
    pub fn graph_reduction_percent(&self) -> f64 {
        if self.original_nodes == 0 {
            return 0.0;
        }
        let removed = self.original_nodes.saturating_sub(self.optimized_nodes);
        removed as f64 * 100.0 / self.original_nodes as f64
    }

    pub fn compile_time_ms(&self) -> f64 {
        self.compile_time.as_secs_f64() * 1000.0
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for CompilationStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Compilation Statistics:")?;
        writeln!(f, "  Original Operations:   {}", self.original_nodes)?;
        writeln!(f, "  Optimized Operations:  {}", self.optimized_nodes)?;
        writeln!(f, "  Operations Fused:      {}", self.nodes_fused)?;
        writeln!(f, "  Constants Folded:      {}", self.constants_folded)?;
        writeln!(f, "  Dead Ops Removed:      {}", self.dead_nodes_removed)?;
        writeln!(f, "  Layouts Rewritten:     {}", self.layouts_rewritten)?;
        writeln!(f, "  Fusions Blocked:       {}", self.fusions_blocked)?;
        writeln!(f, "  Compilation Time:      {:.2} ms", self.compile_time_ms())?;
        write!(f, "  Graph Reduction:       {:.1}%", self.graph_reduction_percent())
    }
}

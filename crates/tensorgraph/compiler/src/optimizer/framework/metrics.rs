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

//! Metrics and diagnostics recorded by optimization passes

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Metrics for a single pass invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassMetrics {
    /// Name of the pass
    pub pass_name: String,
    /// Wall time spent in the pass
    pub duration: Duration,
    /// Whether the pass changed the graph
    pub changed: bool,
}

/// Warning emitted during optimization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimizationWarning {
    /// Pass that emitted the warning
    pub pass_name: String,
    /// Warning message
    pub message: String,
}

impl OptimizationWarning {
    pub fn new(pass_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            pass_name: pass_name.into(),
            message: message.into(),
        }
    }
}

/// Rewrite counts reported by a pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassCounters {
    /// Nodes absorbed into a fused node, excluding the chain head
    pub nodes_fused: usize,
    pub constants_folded: usize,
    pub dead_nodes_removed: usize,
    pub layouts_rewritten: usize,
    /// Fusion candidates rejected because an intermediate escapes the chain
    pub fusions_blocked: usize,
}

impl PassCounters {
    pub fn merge(&mut self, other: &PassCounters) {
        self.nodes_fused += other.nodes_fused;
        self.constants_folded += other.constants_folded;
        self.dead_nodes_removed += other.dead_nodes_removed;
        self.layouts_rewritten += other.layouts_rewritten;
        self.fusions_blocked += other.fusions_blocked;
    }
}

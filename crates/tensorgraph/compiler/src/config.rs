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

//! Optimizer configuration

use serde::{Deserialize, Serialize};
use tensorgraph_core::LayoutPreference;

/// Highest optimization level with a distinct pass list
pub const MAX_OPTIMIZATION_LEVEL: u8 = 3;

/// Configuration for the optimization pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizationConfig {
    /// 0 disables every pass, 3 enables experimental fusion
    pub optimization_level: u8,
    /// Upper bound on fusion sweeps within one pass
    pub max_fusion_rounds: usize,
    /// Upper bound on constant folding sweeps within one pass
    pub max_folding_iterations: usize,
    /// Memory order the target backend prefers
    pub layout: LayoutPreference,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            optimization_level: 2,
            max_fusion_rounds: 16,
            max_folding_iterations: 64,
            layout: LayoutPreference::default(),
        }
    }
}

impl OptimizationConfig {
    pub fn with_level(level: u8) -> Self {
        Self {
            optimization_level: level,
            ..Self::default()
        }
    }

    /// Level clamped to the supported range
    pub fn effective_level(&self) -> u8 {
        self.optimization_level.min(MAX_OPTIMIZATION_LEVEL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_level_is_two() {
        let config = OptimizationConfig::default();
        assert_eq!(config.optimization_level, 2);
        assert_eq!(config.effective_level(), 2);
    }

    #[test]
    fn test_levels_above_three_are_clamped() {
        assert_eq!(OptimizationConfig::with_level(9).effective_level(), 3);
        assert_eq!(OptimizationConfig::with_level(0).effective_level(), 0);
    }
}

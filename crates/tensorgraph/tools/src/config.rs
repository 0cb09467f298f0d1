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

//! Tool configuration loaded from TOML

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tensorgraph_compiler::{OptimizationConfig, ProfilerConfig};

/// Environment variable naming a configuration file
pub const CONFIG_ENV: &str = "TGC_CONFIG";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    pub optimization: OptimizationConfig,
    pub profiler: ProfilerConfig,
}

impl ToolConfig {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Configuration from the CLI path, else from `$TGC_CONFIG`, else defaults
    pub fn resolve_config(cli_config: Option<PathBuf>) -> Result<Self> {
        if let Some(path) = cli_config {
            Self::load_from_file(path)
        } else if let Ok(path) = std::env::var(CONFIG_ENV) {
            Self::load_from_file(path)
        } else {
            Ok(Self::default())
        }
    }
}

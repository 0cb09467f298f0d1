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

//! Command-line interface modules

pub mod compile;
pub mod profile;

use crate::sample::{SampleGraph, TransformerBlockSpec, build_transformer_block};
use clap::Args;

/// Shape of the sample graph, shared by every subcommand
#[derive(Args, Debug, Clone)]
pub struct GraphArgs {
    /// Sequence length of the sample input
    #[arg(long, default_value = "8")]
    pub seq_len: usize,

    /// Hidden width of the sample block
    #[arg(long, default_value = "64")]
    pub hidden: usize,

    /// Attention heads; must divide the hidden width
    #[arg(long, default_value = "8")]
    pub heads: usize,

    /// Optimization level; overrides the configuration file
    #[arg(short = 'O', long)]
    pub opt_level: Option<u8>,
}

impl GraphArgs {
    pub fn build(&self) -> anyhow::Result<SampleGraph> {
        if self.heads == 0 || self.hidden % self.heads != 0 {
            anyhow::bail!("{} heads cannot split hidden width {}", self.heads, self.hidden);
        }
        let spec = TransformerBlockSpec {
            seq_len: self.seq_len,
            hidden: self.hidden,
            num_heads: self.heads,
        };
        Ok(build_transformer_block(spec)?)
    }
}

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

//! Built-in optimization passes

pub mod constant_folding;
pub mod dead_code;
pub mod fusion;
pub mod layout;

pub use constant_folding::ConstantFolding;
pub use dead_code::DeadCodeElimination;
pub use fusion::{FUSION_RULES, FusionRule, OperatorFusion};
pub use layout::LayoutRewrite;

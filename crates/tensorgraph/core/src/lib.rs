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


//! TensorGraph core: graph IR, reference kernels and backend registry
//!
//! The IR is consumed by `tensorgraph-compiler`, which optimizes graphs and
//! dispatches them to a [`BackendRegistry`].

pub mod backend;
pub mod error;
pub mod graph;
pub mod kernels;
pub mod node;
pub mod ops;
pub mod tensor;

pub use backend::{BackendRegistry, ChannelOrder, LayoutPreference, OpHandler, ValueStore};
pub use error::{GraphError, GraphResult, KernelError};
pub use graph::ComputationalGraph;
pub use node::{AttrValue, Attributes, GraphNode, NodeId, component_attr_key};
pub use ops::OpKind;
pub use tensor::{DataType, MemoryLayout, TensorDescriptor, TensorId, TensorValue};
